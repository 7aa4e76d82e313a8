//! Callback path: an inline button was pressed.

use crate::db::{reviews, settings as settings_db, users};
use crate::error::AppError;
use crate::services::reconciler::{apply_step, Services};
use crate::services::school::SchoolApi;
use crate::services::state_machine::{step, StepInputs};
use crate::services::telegram::{parse_callback_data, CallbackQuery, ChatApi};
use crate::services::vault::SecretStore;
use crate::timeutil;

/// Handle one callback query.
///
/// Resolves the reviewer, validates payload and ownership, then drives the
/// state machine with the decision. Every exit answers the callback so the
/// client stops its spinner.
pub async fn handle_callback<S, C, V>(
    services: &Services<S, C, V>,
    query: &CallbackQuery,
) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    let chat_id = query.from.id;

    let Some(user) = users::get_user_by_chat_id(&services.pool, chat_id).await? else {
        tracing::debug!(chat_id, "callback from unknown chat");
        return answer(services, &query.id, "User not found. Please use /start to authenticate.")
            .await;
    };

    let Some(data) = query.data.as_deref() else {
        return answer(services, &query.id, "Invalid callback data").await;
    };

    let (decision, review_id) = match parse_callback_data(data) {
        Ok(parsed) => parsed,
        Err(error) => {
            tracing::debug!(chat_id, %error, "malformed callback data");
            return answer(services, &query.id, "Invalid callback data").await;
        }
    };

    let Some(review) = reviews::get_by_id(&services.pool, review_id).await? else {
        return answer(services, &query.id, "Review request not found").await;
    };

    if review.reviewer_login != user.reviewer_login {
        tracing::warn!(
            login = %user.reviewer_login,
            review_id = %review.id,
            owner = %review.reviewer_login,
            "callback for someone else's review"
        );
        return answer(services, &query.id, "Access denied").await;
    }

    let settings = settings_db::get_settings(&services.pool, &user.reviewer_login)
        .await?
        .ok_or_else(|| {
            AppError::state(format!("settings missing for reviewer {}", user.reviewer_login))
        })?;

    let tokens = match services.vault.get_user_tokens(&user.reviewer_login).await {
        Ok(tokens) => tokens,
        Err(AppError::TokensMissing { .. }) => {
            return answer(
                services,
                &query.id,
                "No stored tokens. Use /logout and authenticate again.",
            )
            .await;
        }
        Err(error) => return Err(error),
    };

    let inputs = StepInputs {
        now: timeutil::now_utc(),
        decision: Some(decision),
        ..Default::default()
    };
    let plan = step(&review, &settings, &inputs)?;

    let committed = apply_step(
        services,
        &user,
        &tokens,
        &review,
        &plan,
        inputs.now,
        Some(&query.id),
    )
    .await?;

    if committed {
        tracing::info!(
            review_id = %review.id,
            login = %user.reviewer_login,
            decision = %decision.as_str(),
            "reviewer decided"
        );
    }

    Ok(())
}

async fn answer<S, C, V>(
    services: &Services<S, C, V>,
    callback_id: &str,
    text: &str,
) -> Result<(), AppError>
where
    S: SchoolApi,
    C: ChatApi,
    V: SecretStore,
{
    services.chat.answer_callback(callback_id, text, false).await
}
