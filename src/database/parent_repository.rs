use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::{decode, encode, lock_clause};
use crate::models::Parent;
use sqlx::PgExecutor;
use uuid::Uuid;

/// `password_hash` lives in its own column and never inside `doc`.
fn hydrate(row: Option<(serde_json::Value, String)>) -> DbResult<Option<Parent>> {
    row.map(|(doc, password_hash)| {
        let mut parent: Parent = decode(doc)?;
        parent.password_hash = password_hash;
        Ok(parent)
    })
    .transpose()
}

pub async fn find<'e, E: PgExecutor<'e>>(executor: E, id: Uuid, lock: bool) -> DbResult<Option<Parent>> {
    let sql = format!(
        "SELECT doc, password_hash FROM parents WHERE id = $1{}",
        lock_clause(lock)
    );
    let row = sqlx::query_as::<_, (serde_json::Value, String)>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(DatabaseError::from_sqlx)?;
    hydrate(row)
}

pub async fn find_by_email<'e, E: PgExecutor<'e>>(executor: E, email: &str) -> DbResult<Option<Parent>> {
    let row = sqlx::query_as::<_, (serde_json::Value, String)>(
        "SELECT doc, password_hash FROM parents WHERE lower(email) = lower($1)",
    )
    .bind(email.trim())
    .fetch_optional(executor)
    .await
    .map_err(DatabaseError::from_sqlx)?;
    hydrate(row)
}

/// Upsert. An empty `password_hash` keeps the stored one.
pub async fn save<'e, E: PgExecutor<'e>>(executor: E, parent: &Parent) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO parents (id, email, password_hash, doc, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, now())
         ON CONFLICT (id) DO UPDATE SET
             email = EXCLUDED.email,
             password_hash = CASE WHEN EXCLUDED.password_hash = ''
                                  THEN parents.password_hash
                                  ELSE EXCLUDED.password_hash END,
             doc = EXCLUDED.doc,
             updated_at = now()",
    )
    .bind(parent.id)
    .bind(parent.email.trim().to_lowercase())
    .bind(&parent.password_hash)
    .bind(encode(parent)?)
    .bind(parent.created_at)
    .execute(executor)
    .await
    .map_err(DatabaseError::from_sqlx)?;
    Ok(())
}
