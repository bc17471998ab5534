use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::{decode_all, encode, lock_clause};
use crate::models::PaymentConfiguration;
use sqlx::PgExecutor;

pub async fn all<'e, E: PgExecutor<'e>>(executor: E, lock: bool) -> DbResult<Vec<PaymentConfiguration>> {
    let sql = format!(
        "SELECT doc FROM payment_configurations ORDER BY updated_at DESC{}",
        lock_clause(lock)
    );
    let docs = sqlx::query_scalar::<_, serde_json::Value>(&sql)
        .fetch_all(executor)
        .await
        .map_err(DatabaseError::from_sqlx)?;
    decode_all(docs)
}

/// Upsert. At most one row per `payment_system` may be active.
pub async fn save<'e, E: PgExecutor<'e>>(
    executor: E,
    configuration: &PaymentConfiguration,
) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO payment_configurations (id, payment_system, is_active, doc, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (id) DO UPDATE SET
             payment_system = EXCLUDED.payment_system,
             is_active = EXCLUDED.is_active,
             doc = EXCLUDED.doc,
             updated_at = EXCLUDED.updated_at",
    )
    .bind(configuration.id)
    .bind(configuration.payment_system.as_str())
    .bind(configuration.is_active)
    .bind(encode(configuration)?)
    .bind(configuration.created_at)
    .bind(configuration.updated_at)
    .execute(executor)
    .await
    .map_err(DatabaseError::from_sqlx)?;
    Ok(())
}
