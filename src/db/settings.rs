//! Queries for per-reviewer settings.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::{SettingKey, UserSettings};

const SETTINGS_COLUMNS: &str = "reviewer_login, response_deadline_shift_minutes, \
                                non_whitelist_cancel_delay_minutes, notify_whitelist_timeout, \
                                notify_non_whitelist_cancel, slot_shift_threshold_minutes, \
                                slot_shift_duration_minutes, cleanup_durations_minutes";

/// Create the default settings row for a new reviewer.
///
/// Idempotent: re-authentication keeps whatever the reviewer has tuned.
pub async fn create_default_settings(pool: &DbPool, login: &str) -> Result<(), AppError> {
    let defaults = UserSettings::defaults(login);

    sqlx::query(
        r#"
        INSERT OR IGNORE INTO user_settings (
            reviewer_login, response_deadline_shift_minutes,
            non_whitelist_cancel_delay_minutes, notify_whitelist_timeout,
            notify_non_whitelist_cancel, slot_shift_threshold_minutes,
            slot_shift_duration_minutes, cleanup_durations_minutes
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&defaults.reviewer_login)
    .bind(defaults.response_deadline_shift_minutes)
    .bind(defaults.non_whitelist_cancel_delay_minutes)
    .bind(defaults.notify_whitelist_timeout)
    .bind(defaults.notify_non_whitelist_cancel)
    .bind(defaults.slot_shift_threshold_minutes)
    .bind(defaults.slot_shift_duration_minutes)
    .bind(defaults.cleanup_durations_minutes)
    .execute(pool)
    .await?;

    Ok(())
}

/// Settings for a reviewer.
pub async fn get_settings(pool: &DbPool, login: &str) -> Result<Option<UserSettings>, AppError> {
    let settings = sqlx::query_as::<_, UserSettings>(&format!(
        "SELECT {SETTINGS_COLUMNS} FROM user_settings WHERE reviewer_login = ?"
    ))
    .bind(login)
    .fetch_optional(pool)
    .await?;

    Ok(settings)
}

/// Update one numeric setting. The value must already be validated.
///
/// The column name comes from the closed `SettingKey` match, never from
/// user input.
pub async fn update_numeric_setting(
    pool: &DbPool,
    login: &str,
    key: SettingKey,
    value: i64,
) -> Result<(), AppError> {
    let sql = format!(
        "UPDATE user_settings SET {} = ? WHERE reviewer_login = ?",
        key.column()
    );

    sqlx::query(&sql).bind(value).bind(login).execute(pool).await?;

    Ok(())
}

/// Update one boolean setting.
pub async fn update_bool_setting(
    pool: &DbPool,
    login: &str,
    key: SettingKey,
    value: bool,
) -> Result<(), AppError> {
    update_numeric_setting(pool, login, key, i64::from(value)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::db::users;
    use crate::models::{User, UserStatus};

    async fn setup(pool: &DbPool, login: &str) {
        users::upsert_user(
            pool,
            &User {
                reviewer_login: login.to_string(),
                status: UserStatus::Active.as_str().to_string(),
                telegram_chat_id: 1,
                created_at: 0,
                last_auth_success_at: 0,
                last_auth_failure_at: None,
            },
        )
        .await
        .unwrap();
        create_default_settings(pool, login).await.unwrap();
    }

    #[tokio::test]
    async fn defaults_are_created_once() {
        let pool = db::initialize_in_memory().await.unwrap();
        setup(&pool, "alice").await;

        let settings = get_settings(&pool, "alice").await.unwrap().unwrap();
        assert_eq!(settings, UserSettings::defaults("alice"));

        // Second create must not clobber a tuned value.
        update_numeric_setting(&pool, "alice", SettingKey::SlotShiftThreshold, 40)
            .await
            .unwrap();
        create_default_settings(&pool, "alice").await.unwrap();

        let settings = get_settings(&pool, "alice").await.unwrap().unwrap();
        assert_eq!(settings.slot_shift_threshold_minutes, 40);
    }

    #[tokio::test]
    async fn numeric_and_bool_updates() {
        let pool = db::initialize_in_memory().await.unwrap();
        setup(&pool, "alice").await;

        update_numeric_setting(&pool, "alice", SettingKey::CleanupDurations, 45)
            .await
            .unwrap();
        update_bool_setting(&pool, "alice", SettingKey::NotifyWhitelistTimeout, false)
            .await
            .unwrap();

        let settings = get_settings(&pool, "alice").await.unwrap().unwrap();
        assert_eq!(settings.cleanup_durations_minutes, 45);
        assert!(!settings.notify_whitelist_timeout);
        assert!(settings.notify_non_whitelist_cancel);
    }
}
