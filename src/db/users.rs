//! Queries for reviewer accounts.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::{User, UserStatus};

const USER_COLUMNS: &str = "reviewer_login, status, telegram_chat_id, created_at, \
                            last_auth_success_at, last_auth_failure_at";

/// Insert a reviewer or refresh an existing row after re-authentication.
pub async fn upsert_user(pool: &DbPool, user: &User) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO users (reviewer_login, status, telegram_chat_id, created_at,
                           last_auth_success_at, last_auth_failure_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (reviewer_login) DO UPDATE SET
            status = excluded.status,
            telegram_chat_id = excluded.telegram_chat_id,
            last_auth_success_at = excluded.last_auth_success_at,
            last_auth_failure_at = excluded.last_auth_failure_at
        "#,
    )
    .bind(&user.reviewer_login)
    .bind(&user.status)
    .bind(user.telegram_chat_id)
    .bind(user.created_at)
    .bind(user.last_auth_success_at)
    .bind(user.last_auth_failure_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Look up a reviewer by the chat they write from.
///
/// A chat may also match inactive rows left behind by `logout`; the active
/// one wins, then the most recently authenticated.
pub async fn get_user_by_chat_id(pool: &DbPool, chat_id: i64) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE telegram_chat_id = ? \
         ORDER BY (status = 'ACTIVE') DESC, last_auth_success_at DESC LIMIT 1"
    ))
    .bind(chat_id)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

/// Look up a reviewer by login.
pub async fn get_user_by_login(pool: &DbPool, login: &str) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE reviewer_login = ?"
    ))
    .bind(login)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

/// All reviewers the reconciler should visit.
pub async fn get_active_users(pool: &DbPool) -> Result<Vec<User>, AppError> {
    let users = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE status = ? ORDER BY reviewer_login"
    ))
    .bind(UserStatus::Active.as_str())
    .fetch_all(pool)
    .await?;

    Ok(users)
}

/// Flip a reviewer's status (logout / re-activation).
pub async fn update_user_status(
    pool: &DbPool,
    login: &str,
    status: UserStatus,
) -> Result<(), AppError> {
    sqlx::query("UPDATE users SET status = ? WHERE reviewer_login = ?")
        .bind(status.as_str())
        .bind(login)
        .execute(pool)
        .await?;

    Ok(())
}

/// Record a failed credential exchange for an existing reviewer.
pub async fn record_auth_failure(pool: &DbPool, login: &str, at: i64) -> Result<(), AppError> {
    sqlx::query("UPDATE users SET last_auth_failure_at = ? WHERE reviewer_login = ?")
        .bind(at)
        .bind(login)
        .execute(pool)
        .await?;

    Ok(())
}
