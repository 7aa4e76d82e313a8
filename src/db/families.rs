//! Queries for the project -> family index.

use crate::db::pool::DbPool;
use crate::error::AppError;

/// Family label for a project, if the index knows it.
pub async fn family_for_project(
    pool: &DbPool,
    project_name: &str,
) -> Result<Option<String>, AppError> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT family_label FROM project_families WHERE project_name = ?")
            .bind(project_name)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(|(label,)| label))
}

/// Write the whole project graph through in one transaction.
///
/// Called when a reviewer sees a project the index does not know; the graph
/// is small enough to refresh wholesale.
pub async fn upsert_families(
    pool: &DbPool,
    pairs: &[(String, String)],
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    for (family_label, project_name) in pairs {
        sqlx::query(
            r#"
            INSERT INTO project_families (project_name, family_label)
            VALUES (?, ?)
            ON CONFLICT (project_name) DO UPDATE SET family_label = excluded.family_label
            "#,
        )
        .bind(project_name)
        .bind(family_label)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn lookup_after_batch_upsert() {
        let pool = db::initialize_in_memory().await.unwrap();

        upsert_families(
            &pool,
            &[
                ("C - I".to_string(), "libft".to_string()),
                ("C - I".to_string(), "get_next_line".to_string()),
                ("Go - II".to_string(), "go-concurrency".to_string()),
            ],
        )
        .await
        .unwrap();

        assert_eq!(
            family_for_project(&pool, "libft").await.unwrap().as_deref(),
            Some("C - I")
        );
        assert_eq!(family_for_project(&pool, "unknown").await.unwrap(), None);
    }

    #[tokio::test]
    async fn refresh_moves_a_project() {
        let pool = db::initialize_in_memory().await.unwrap();

        upsert_families(&pool, &[("C - I".to_string(), "libft".to_string())])
            .await
            .unwrap();
        upsert_families(&pool, &[("C - Core".to_string(), "libft".to_string())])
            .await
            .unwrap();

        assert_eq!(
            family_for_project(&pool, "libft").await.unwrap().as_deref(),
            Some("C - Core")
        );
    }
}
