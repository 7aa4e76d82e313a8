//! Queries for review requests.
//!
//! Status transitions are written as conditional updates keyed on the
//! current status. A concurrent tick and callback can both evaluate the
//! same review; whichever commits first wins, the loser sees zero rows
//! affected and re-reads.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::{ReviewRequest, ReviewStatus};

const REVIEW_COLUMNS: &str = "id, reviewer_login, notification_id, project_name, family_label, \
                              review_start_time, calendar_slot_id, decision_deadline, \
                              non_whitelist_cancel_at, telegram_message_id, status, created_at, \
                              decided_at";

/// Insert a freshly ingested review.
pub async fn create_review(pool: &DbPool, review: &ReviewRequest) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO review_requests (
            id, reviewer_login, notification_id, project_name, family_label,
            review_start_time, calendar_slot_id, decision_deadline,
            non_whitelist_cancel_at, telegram_message_id, status, created_at, decided_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&review.id)
    .bind(&review.reviewer_login)
    .bind(&review.notification_id)
    .bind(&review.project_name)
    .bind(&review.family_label)
    .bind(review.review_start_time)
    .bind(&review.calendar_slot_id)
    .bind(review.decision_deadline)
    .bind(review.non_whitelist_cancel_at)
    .bind(&review.telegram_message_id)
    .bind(&review.status)
    .bind(review.created_at)
    .bind(review.decided_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Review by id.
pub async fn get_by_id(pool: &DbPool, id: &str) -> Result<Option<ReviewRequest>, AppError> {
    let review = sqlx::query_as::<_, ReviewRequest>(&format!(
        "SELECT {REVIEW_COLUMNS} FROM review_requests WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(review)
}

/// Any review (terminal or not) for a calendar slot. Used by booking ingest
/// to decide whether a slot is already tracked.
pub async fn get_by_slot_id(
    pool: &DbPool,
    slot_id: &str,
) -> Result<Option<ReviewRequest>, AppError> {
    let review = sqlx::query_as::<_, ReviewRequest>(&format!(
        "SELECT {REVIEW_COLUMNS} FROM review_requests WHERE calendar_slot_id = ? LIMIT 1"
    ))
    .bind(slot_id)
    .fetch_optional(pool)
    .await?;

    Ok(review)
}

/// Reviews for a reviewer in any of the given statuses, oldest first.
pub async fn list_by_login_and_status(
    pool: &DbPool,
    login: &str,
    statuses: &[ReviewStatus],
) -> Result<Vec<ReviewRequest>, AppError> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; statuses.len()].join(", ");
    let sql = format!(
        "SELECT {REVIEW_COLUMNS} FROM review_requests \
         WHERE reviewer_login = ? AND status IN ({placeholders}) \
         ORDER BY created_at, id"
    );

    let mut query = sqlx::query_as::<_, ReviewRequest>(&sql).bind(login);
    for status in statuses {
        query = query.bind(status.as_str());
    }

    Ok(query.fetch_all(pool).await?)
}

/// Commit a plain status transition, conditionally on the current status.
///
/// Returns `true` if this writer won the transition. `decided_at` is set for
/// terminal targets and must be `None` otherwise.
pub async fn transition_status(
    pool: &DbPool,
    id: &str,
    expected: ReviewStatus,
    new: ReviewStatus,
    decided_at: Option<i64>,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE review_requests SET status = ?, decided_at = ? WHERE id = ? AND status = ?",
    )
    .bind(new.as_str())
    .bind(decided_at)
    .bind(id)
    .bind(expected.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record the resolved project and move `UNKNOWN_PROJECT_REVIEW` to
/// `KNOWN_PROJECT_REVIEW`.
pub async fn set_project_info(
    pool: &DbPool,
    id: &str,
    project_name: &str,
    family_label: &str,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE review_requests SET project_name = ?, family_label = ?, status = ? \
         WHERE id = ? AND status = ?",
    )
    .bind(project_name)
    .bind(family_label)
    .bind(ReviewStatus::KnownProjectReview.as_str())
    .bind(id)
    .bind(ReviewStatus::UnknownProjectReview.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Arm the auto-cancel timer and move `KNOWN_PROJECT_REVIEW` to
/// `NOT_WHITELISTED`.
pub async fn transition_to_not_whitelisted(
    pool: &DbPool,
    id: &str,
    cancel_at: i64,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE review_requests SET status = ?, non_whitelist_cancel_at = ? \
         WHERE id = ? AND status = ?",
    )
    .bind(ReviewStatus::NotWhitelisted.as_str())
    .bind(cancel_at)
    .bind(id)
    .bind(ReviewStatus::KnownProjectReview.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record the delivered prompt and move `NEED_TO_APPROVE` to
/// `WAITING_FOR_APPROVE`.
pub async fn transition_to_waiting(
    pool: &DbPool,
    id: &str,
    decision_deadline: i64,
    telegram_message_id: &str,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE review_requests SET status = ?, decision_deadline = ?, telegram_message_id = ? \
         WHERE id = ? AND status = ?",
    )
    .bind(ReviewStatus::WaitingForApprove.as_str())
    .bind(decision_deadline)
    .bind(telegram_message_id)
    .bind(id)
    .bind(ReviewStatus::NeedToApprove.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
