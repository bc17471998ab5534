use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::{decode, decode_all, encode, lock_clause};
use crate::models::{Registration, RegistrationKey};
use sqlx::PgExecutor;
use uuid::Uuid;

pub async fn find_by_key<'e, E: PgExecutor<'e>>(
    executor: E,
    key: &RegistrationKey,
    lock: bool,
) -> DbResult<Option<Registration>> {
    let sql = format!(
        "SELECT doc FROM registrations WHERE parent_id = $1 AND program_key = $2{}",
        lock_clause(lock)
    );
    let doc = sqlx::query_scalar::<_, serde_json::Value>(&sql)
        .bind(key.parent_id())
        .bind(key.program_key())
        .fetch_optional(executor)
        .await
        .map_err(DatabaseError::from_sqlx)?;
    doc.map(decode).transpose()
}

pub async fn for_parent<'e, E: PgExecutor<'e>>(
    executor: E,
    parent_id: Uuid,
    lock: bool,
) -> DbResult<Vec<Registration>> {
    let sql = format!(
        "SELECT doc FROM registrations WHERE parent_id = $1 ORDER BY created_at{}",
        lock_clause(lock)
    );
    let docs = sqlx::query_scalar::<_, serde_json::Value>(&sql)
        .bind(parent_id)
        .fetch_all(executor)
        .await
        .map_err(DatabaseError::from_sqlx)?;
    decode_all(docs)
}

/// Upsert. `(parent_id, program_key)` backs `registrations_program_key`.
pub async fn save<'e, E: PgExecutor<'e>>(executor: E, registration: &Registration) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO registrations (id, parent_id, program_key, doc, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, now())
         ON CONFLICT (id) DO UPDATE SET
             program_key = EXCLUDED.program_key,
             doc = EXCLUDED.doc,
             updated_at = now()",
    )
    .bind(registration.id)
    .bind(registration.parent_id)
    .bind(registration.program_key())
    .bind(encode(registration)?)
    .bind(registration.created_at)
    .execute(executor)
    .await
    .map_err(DatabaseError::from_sqlx)?;
    Ok(())
}
