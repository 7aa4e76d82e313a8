//! Queries for whitelist entries.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::{EntryKind, WhitelistEntry};

/// Add an entry; adding the same entry twice is not an error.
pub async fn add_entry(pool: &DbPool, entry: &WhitelistEntry) -> Result<(), AppError> {
    sqlx::query(
        "INSERT OR IGNORE INTO whitelist_entries (reviewer_login, entry_type, name) VALUES (?, ?, ?)",
    )
    .bind(&entry.reviewer_login)
    .bind(&entry.entry_type)
    .bind(&entry.name)
    .execute(pool)
    .await?;

    Ok(())
}

/// Remove a name from the whitelist, whichever kind it was stored under.
///
/// Returns how many rows were removed so the command can tell the reviewer
/// whether the name existed.
pub async fn remove_entry(pool: &DbPool, login: &str, name: &str) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM whitelist_entries WHERE reviewer_login = ? AND name = ?")
        .bind(login)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// All entries for a reviewer, families first, then alphabetical.
pub async fn list_for_login(pool: &DbPool, login: &str) -> Result<Vec<WhitelistEntry>, AppError> {
    let entries = sqlx::query_as::<_, WhitelistEntry>(
        "SELECT reviewer_login, entry_type, name FROM whitelist_entries \
         WHERE reviewer_login = ? ORDER BY entry_type, name",
    )
    .bind(login)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

/// Whitelist check for a classified review: the project name matches a
/// `PROJECT` entry, or its family label matches a `FAMILY` entry.
pub async fn is_whitelisted(
    pool: &DbPool,
    login: &str,
    project_name: &str,
    family_label: &str,
) -> Result<bool, AppError> {
    let count: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM whitelist_entries
        WHERE reviewer_login = ?
          AND ((entry_type = ? AND name = ?) OR (entry_type = ? AND name = ?))
        "#,
    )
    .bind(login)
    .bind(EntryKind::Project.as_str())
    .bind(project_name)
    .bind(EntryKind::Family.as_str())
    .bind(family_label)
    .fetch_one(pool)
    .await?;

    Ok(count.0 > 0)
}
