use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::{decode, decode_all, encode, lock_clause};
use crate::models::Payment;
use sqlx::PgExecutor;
use uuid::Uuid;

pub async fn find_by_external<'e, E: PgExecutor<'e>>(
    executor: E,
    external_payment_id: &str,
    lock: bool,
) -> DbResult<Option<Payment>> {
    let sql = format!(
        "SELECT doc FROM payments WHERE external_id = $1 ORDER BY processed_at DESC LIMIT 1{}",
        lock_clause(lock)
    );
    let doc = sqlx::query_scalar::<_, serde_json::Value>(&sql)
        .bind(external_payment_id)
        .fetch_optional(executor)
        .await
        .map_err(DatabaseError::from_sqlx)?;
    doc.map(decode).transpose()
}

/// Newest first.
pub async fn for_parent<'e, E: PgExecutor<'e>>(executor: E, parent_id: Uuid) -> DbResult<Vec<Payment>> {
    let docs = sqlx::query_scalar::<_, serde_json::Value>(
        "SELECT doc FROM payments WHERE parent_id = $1 ORDER BY processed_at DESC",
    )
    .bind(parent_id)
    .fetch_all(executor)
    .await
    .map_err(DatabaseError::from_sqlx)?;
    decode_all(docs)
}

/// Payments are append-only: a plain INSERT, so a repeated id fails.
pub async fn insert<'e, E: PgExecutor<'e>>(executor: E, payment: &Payment) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO payments (id, parent_id, external_id, payment_system, status, processed_at, doc)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(payment.id)
    .bind(payment.parent_id)
    .bind(&payment.payment_id)
    .bind(payment.payment_system.as_str())
    .bind(status_column(payment))
    .bind(payment.processed_at)
    .bind(encode(payment)?)
    .execute(executor)
    .await
    .map_err(DatabaseError::from_sqlx)?;
    Ok(())
}

pub async fn update<'e, E: PgExecutor<'e>>(executor: E, payment: &Payment) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE payments SET status = $2, doc = $3, updated_at = now() WHERE id = $1",
    )
    .bind(payment.id)
    .bind(status_column(payment))
    .bind(encode(payment)?)
    .execute(executor)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found("Payment", payment.id));
    }
    Ok(())
}

fn status_column(payment: &Payment) -> String {
    serde_json::to_value(payment.status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}
