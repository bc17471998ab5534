use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::decode;
use crate::models::EmailTemplate;
use sqlx::PgExecutor;

/// Active template by title, case-insensitive.
pub async fn find_by_title<'e, E: PgExecutor<'e>>(
    executor: E,
    title: &str,
) -> DbResult<Option<EmailTemplate>> {
    let doc = sqlx::query_scalar::<_, serde_json::Value>(
        "SELECT doc FROM email_templates
         WHERE lower(title) = lower($1) AND (doc->>'isActive')::boolean IS NOT FALSE
         LIMIT 1",
    )
    .bind(title.trim())
    .fetch_optional(executor)
    .await
    .map_err(DatabaseError::from_sqlx)?;
    doc.map(decode).transpose()
}
