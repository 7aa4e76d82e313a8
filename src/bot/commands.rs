//! Command surface.
//!
//! Every command resolves the reviewer by chat id first and sends at most
//! one reply. Credential messages (`login:password`) arrive as plain text
//! and are routed here by the dispatcher.

use crate::db::{reviews, settings as settings_db, users, whitelist};
use crate::error::AppError;
use crate::models::{
    EntryKind, SettingKey, User, UserStatus, WhitelistEntry, INTERMEDIATE_STATUSES,
};
use crate::services::reconciler::Services;
use crate::services::school::SchoolApi;
use crate::services::telegram::ChatApi;
use crate::services::vault::SecretStore;
use crate::timeutil;

const PLEASE_AUTHENTICATE: &str = "User not found. Please use /start to authenticate.";

const HELP_TEXT: &str = "*Review Slot Guard Bot*\n\n\
This bot watches your review calendar and guards every incoming booking.\n\n\
*Commands:*\n\n\
/start - Start authentication\n\
/logout - Log out from the bot\n\
/status - Show your current status and active reviews\n\
/settings - Display your current settings\n\
/whitelist - Show your whitelisted projects and families\n\n\
*Whitelist Management:*\n\
/whitelist\\_add <family|project> <name> - Add to whitelist\n\
/whitelist\\_remove <name> - Remove from whitelist\n\n\
*Settings:*\n\
/set\\_deadline\\_shift <minutes> - Response deadline shift (1 - 60)\n\
/set\\_cancel\\_delay <minutes> - Non-whitelist cancel delay (1 - 10)\n\
/set\\_slot\\_shift\\_threshold <minutes> - Slot shift threshold (5 - 60, step 5)\n\
/set\\_slot\\_shift\\_duration <minutes> - Slot shift duration (15 - 60, step 15)\n\
/set\\_cleanup\\_duration <minutes> - Cleanup duration (15, 30, 45, 60)\n\
/set\\_notify\\_whitelist\\_timeout <true|false> - Notify on approval timeout\n\
/set\\_notify\\_non\\_whitelist\\_cancel <true|false> - Notify on non-whitelist cancel";

/// Dispatch one `/command` message.
pub async fn handle_command<S, C, V>(
    services: &Services<S, C, V>,
    chat_id: i64,
    text: &str,
) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let (command, args) = split_command(text);

    match command.as_str() {
        "start" => handle_start(services, chat_id).await,
        "help" => reply(services, chat_id, HELP_TEXT).await,
        "logout" => handle_logout(services, chat_id).await,
        "status" => handle_status(services, chat_id).await,
        "settings" => handle_settings(services, chat_id).await,
        "whitelist" => handle_whitelist(services, chat_id).await,
        "whitelist_add" => handle_whitelist_add(services, chat_id, args).await,
        "whitelist_remove" => handle_whitelist_remove(services, chat_id, args).await,
        "set_deadline_shift" => {
            handle_numeric_setting(services, chat_id, SettingKey::ResponseDeadlineShift, args).await
        }
        "set_cancel_delay" => {
            handle_numeric_setting(services, chat_id, SettingKey::NonWhitelistCancelDelay, args)
                .await
        }
        "set_slot_shift_threshold" => {
            handle_numeric_setting(services, chat_id, SettingKey::SlotShiftThreshold, args).await
        }
        "set_slot_shift_duration" => {
            handle_numeric_setting(services, chat_id, SettingKey::SlotShiftDuration, args).await
        }
        "set_cleanup_duration" => {
            handle_numeric_setting(services, chat_id, SettingKey::CleanupDurations, args).await
        }
        "set_notify_whitelist_timeout" => {
            handle_bool_setting(services, chat_id, SettingKey::NotifyWhitelistTimeout, args).await
        }
        "set_notify_non_whitelist_cancel" => {
            handle_bool_setting(services, chat_id, SettingKey::NotifyNonWhitelistCancel, args).await
        }
        unknown => {
            reply(
                services,
                chat_id,
                &format!("Unknown command: {}\n\nUse /help to see available commands.", unknown),
            )
            .await
        }
    }
}

/// Handle a plain-text message: the credential exchange after `/start`.
pub async fn handle_credentials<S, C, V>(
    services: &Services<S, C, V>,
    chat_id: i64,
    text: &str,
) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let Some((login, password)) = text.trim().split_once(':') else {
        return reply(
            services,
            chat_id,
            "Invalid format. Please send your credentials in the format:\n\n`login:password`",
        )
        .await;
    };

    let login = login.trim();
    let password = password.trim();
    if login.is_empty() || password.is_empty() {
        return reply(
            services,
            chat_id,
            "Invalid format. Please send your credentials in the format:\n\n`login:password`",
        )
        .await;
    }

    if let Some(existing) = users::get_user_by_chat_id(&services.pool, chat_id).await? {
        if existing.is_active() {
            return reply(
                services,
                chat_id,
                &format!(
                    "You are already authenticated as {}.\n\nUse /logout first if you want to re-authenticate.",
                    existing.reviewer_login
                ),
            )
            .await;
        }
    }

    let now = timeutil::to_unix_seconds(timeutil::now_utc());

    let tokens = match services.school.authenticate(login, password).await {
        Ok(tokens) => tokens,
        Err(AppError::BadCredentials) => {
            tracing::info!(chat_id, login, "authentication rejected");
            if users::get_user_by_login(&services.pool, login).await?.is_some() {
                users::record_auth_failure(&services.pool, login, now).await?;
            }
            return reply(
                services,
                chat_id,
                "Authentication failed. Please check your credentials and try again.",
            )
            .await;
        }
        Err(error) => {
            tracing::warn!(chat_id, %error, "authentication call failed");
            return reply(
                services,
                chat_id,
                "The school API is unavailable right now. Please try again later.",
            )
            .await;
        }
    };

    services.vault.store_user_tokens(login, tokens).await?;

    let user = User {
        reviewer_login: login.to_string(),
        status: UserStatus::Active.as_str().to_string(),
        telegram_chat_id: chat_id,
        created_at: now,
        last_auth_success_at: now,
        last_auth_failure_at: None,
    };
    users::upsert_user(&services.pool, &user).await?;
    settings_db::create_default_settings(&services.pool, login).await?;

    tracing::info!(login, chat_id, "reviewer authenticated");

    reply(
        services,
        chat_id,
        &format!(
            "✅ Successfully authenticated as {}!\n\nYou can now use the bot. Use /help to see available commands.",
            login
        ),
    )
    .await
}

async fn handle_start<S, C, V>(services: &Services<S, C, V>, chat_id: i64) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    if let Some(user) = users::get_user_by_chat_id(&services.pool, chat_id).await? {
        if user.is_active() {
            return reply(
                services,
                chat_id,
                &format!("Welcome back, {}! You are already authenticated.", user.reviewer_login),
            )
            .await;
        }
    }

    reply(
        services,
        chat_id,
        "Please authenticate by sending your school credentials in the format:\n\n\
         `login:password`\n\nYour credentials are exchanged for tokens and never stored.",
    )
    .await
}

async fn handle_logout<S, C, V>(services: &Services<S, C, V>, chat_id: i64) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let Some(user) = users::get_user_by_chat_id(&services.pool, chat_id).await? else {
        return reply(services, chat_id, "You are not authenticated.").await;
    };

    if let Err(error) = services.vault.delete_user_tokens(&user.reviewer_login).await {
        tracing::warn!(login = %user.reviewer_login, %error, "token delete failed");
    }
    users::update_user_status(&services.pool, &user.reviewer_login, UserStatus::Inactive).await?;

    tracing::info!(login = %user.reviewer_login, "reviewer logged out");

    reply(
        services,
        chat_id,
        "✅ Logged out successfully. You can authenticate again with /start.",
    )
    .await
}

async fn handle_status<S, C, V>(services: &Services<S, C, V>, chat_id: i64) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let Some(user) = users::get_user_by_chat_id(&services.pool, chat_id).await? else {
        return reply(services, chat_id, PLEASE_AUTHENTICATE).await;
    };

    let open = reviews::list_by_login_and_status(
        &services.pool,
        &user.reviewer_login,
        &INTERMEDIATE_STATUSES,
    )
    .await?;

    let mut message = format!(
        "*Status*\n\nUser: {}\nActive Reviews: {}",
        user.reviewer_login,
        open.len()
    );

    if !open.is_empty() {
        message.push_str("\n\nReviews:");
        for review in &open {
            message.push_str(&format!(
                "\n- {} at {}",
                review.project_name_or_unknown(),
                timeutil::format_short(timeutil::from_unix_seconds(review.review_start_time)),
            ));
        }
    }

    reply(services, chat_id, &message).await
}

async fn handle_settings<S, C, V>(services: &Services<S, C, V>, chat_id: i64) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let Some(user) = users::get_user_by_chat_id(&services.pool, chat_id).await? else {
        return reply(services, chat_id, PLEASE_AUTHENTICATE).await;
    };

    let Some(settings) = settings_db::get_settings(&services.pool, &user.reviewer_login).await?
    else {
        return reply(services, chat_id, "Failed to retrieve settings.").await;
    };

    let message = format!(
        "*Your Settings*\n\n\
         📅 Response Deadline Shift: {} minutes\n\
         ⏱ Non-Whitelist Cancel Delay: {} minutes\n\
         🔔 Notify Whitelist Timeout: {}\n\
         🔔 Notify Non-Whitelist Cancel: {}\n\
         🔄 Slot Shift Threshold: {} minutes\n\
         ⬇️ Slot Shift Duration: {} minutes\n\
         🧹 Cleanup Duration: {} minutes",
        settings.response_deadline_shift_minutes,
        settings.non_whitelist_cancel_delay_minutes,
        yes_no(settings.notify_whitelist_timeout),
        yes_no(settings.notify_non_whitelist_cancel),
        settings.slot_shift_threshold_minutes,
        settings.slot_shift_duration_minutes,
        settings.cleanup_durations_minutes,
    );

    reply(services, chat_id, &message).await
}

async fn handle_whitelist<S, C, V>(services: &Services<S, C, V>, chat_id: i64) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let Some(user) = users::get_user_by_chat_id(&services.pool, chat_id).await? else {
        return reply(services, chat_id, PLEASE_AUTHENTICATE).await;
    };

    let entries = whitelist::list_for_login(&services.pool, &user.reviewer_login).await?;
    if entries.is_empty() {
        return reply(
            services,
            chat_id,
            "Your whitelist is empty.\n\nUse /whitelist\\_add to add projects or families.",
        )
        .await;
    }

    let mut families = Vec::new();
    let mut projects = Vec::new();
    for entry in &entries {
        match entry.kind() {
            Some(EntryKind::Family) => families.push(entry.name.as_str()),
            _ => projects.push(entry.name.as_str()),
        }
    }

    let mut message = String::from("*Your Whitelist*\n\n");
    if !families.is_empty() {
        message.push_str("📁 Families:\n");
        for name in &families {
            message.push_str(&format!("  • {}\n", name));
        }
    }
    if !projects.is_empty() {
        message.push_str("📦 Projects:\n");
        for name in &projects {
            message.push_str(&format!("  • {}\n", name));
        }
    }

    reply(services, chat_id, message.trim_end()).await
}

async fn handle_whitelist_add<S, C, V>(
    services: &Services<S, C, V>,
    chat_id: i64,
    args: &str,
) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let Some(user) = users::get_user_by_chat_id(&services.pool, chat_id).await? else {
        return reply(services, chat_id, PLEASE_AUTHENTICATE).await;
    };

    let Some((kind_arg, name)) = args.trim().split_once(' ') else {
        return reply(
            services,
            chat_id,
            "Usage: /whitelist\\_add <family|project> <name>\n\nExample:\n\
             /whitelist\\_add family C - I\n/whitelist\\_add project go-concurrency",
        )
        .await;
    };

    let Some(kind) = EntryKind::parse(kind_arg) else {
        return reply(services, chat_id, "Invalid entry type. Use 'family' or 'project'.").await;
    };

    let name = name.trim();
    if name.is_empty() {
        return reply(services, chat_id, "The name must not be empty.").await;
    }

    let entry = WhitelistEntry::new(&user.reviewer_login, kind, name);
    whitelist::add_entry(&services.pool, &entry).await?;

    reply(services, chat_id, &format!("✅ Added {} to your whitelist.", name)).await
}

async fn handle_whitelist_remove<S, C, V>(
    services: &Services<S, C, V>,
    chat_id: i64,
    args: &str,
) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let Some(user) = users::get_user_by_chat_id(&services.pool, chat_id).await? else {
        return reply(services, chat_id, PLEASE_AUTHENTICATE).await;
    };

    let name = args.trim();
    if name.is_empty() {
        return reply(
            services,
            chat_id,
            "Usage: /whitelist\\_remove <name>\n\nExample: /whitelist\\_remove C - I",
        )
        .await;
    }

    let removed = whitelist::remove_entry(&services.pool, &user.reviewer_login, name).await?;
    if removed == 0 {
        return reply(services, chat_id, &format!("{} is not in your whitelist.", name)).await;
    }

    reply(services, chat_id, &format!("✅ Removed {} from your whitelist.", name)).await
}

async fn handle_numeric_setting<S, C, V>(
    services: &Services<S, C, V>,
    chat_id: i64,
    key: SettingKey,
    args: &str,
) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let Some(user) = users::get_user_by_chat_id(&services.pool, chat_id).await? else {
        return reply(services, chat_id, PLEASE_AUTHENTICATE).await;
    };

    let Ok(value) = args.trim().parse::<i64>() else {
        return reply(
            services,
            chat_id,
            &format!("Please send a number. Allowed values: {}", key.allowed_values()),
        )
        .await;
    };

    if key.validate(value).is_err() {
        return reply(
            services,
            chat_id,
            &format!("Invalid value. Allowed values: {}", key.allowed_values()),
        )
        .await;
    }

    settings_db::update_numeric_setting(&services.pool, &user.reviewer_login, key, value).await?;

    reply(services, chat_id, &format!("✅ Setting updated to {}", value)).await
}

async fn handle_bool_setting<S, C, V>(
    services: &Services<S, C, V>,
    chat_id: i64,
    key: SettingKey,
    args: &str,
) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let Some(user) = users::get_user_by_chat_id(&services.pool, chat_id).await? else {
        return reply(services, chat_id, PLEASE_AUTHENTICATE).await;
    };

    let value = match args.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => true,
        "false" | "no" | "off" | "0" => false,
        _ => {
            return reply(
                services,
                chat_id,
                &format!("Please send true or false. Allowed values: {}", key.allowed_values()),
            )
            .await;
        }
    };

    settings_db::update_bool_setting(&services.pool, &user.reviewer_login, key, value).await?;

    reply(
        services,
        chat_id,
        &format!("✅ {} set to {}", key.column(), value),
    )
    .await
}

/// Split `/command arg arg` into the command name and its argument string.
///
/// Strips the slash and an optional `@botname` mention suffix.
fn split_command(text: &str) -> (String, &str) {
    let text = text.trim();
    let (head, args) = match text.split_once(' ') {
        Some((head, args)) => (head, args),
        None => (text, ""),
    };

    let command = head.trim_start_matches('/');
    let command = command.split('@').next().unwrap_or(command);

    (command.to_ascii_lowercase(), args)
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

async fn reply<S, C, V>(
    services: &Services<S, C, V>,
    chat_id: i64,
    text: &str,
) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    services.chat.send_plain_message(chat_id, text).await
}
