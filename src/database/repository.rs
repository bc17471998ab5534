//! Shared plumbing for the JSONB document repositories.
//!
//! Every table keeps the entity as a `doc JSONB` column beside the handful of
//! columns its indexes need. Functions here are generic over the executor so
//! the same query runs on the pool or inside a [`DatabaseTransaction`].
//!
//! [`DatabaseTransaction`]: crate::database::transaction::DatabaseTransaction

use crate::database::error::{DatabaseError, DbResult};
use crate::database::store::Document;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

/// `FOR UPDATE` when reading inside a transaction.
pub fn lock_clause(lock: bool) -> &'static str {
    if lock {
        " FOR UPDATE"
    } else {
        ""
    }
}

pub async fn fetch_by_id<'e, T, E>(executor: E, id: Uuid, lock: bool) -> DbResult<Option<T>>
where
    T: Document + DeserializeOwned,
    E: PgExecutor<'e>,
{
    let sql = format!(
        "SELECT doc FROM {} WHERE id = $1{}",
        T::TABLE,
        lock_clause(lock)
    );
    let doc = sqlx::query_scalar::<_, serde_json::Value>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(DatabaseError::from_sqlx)?;
    doc.map(decode).transpose()
}

pub fn decode<T: DeserializeOwned>(doc: serde_json::Value) -> DbResult<T> {
    Ok(serde_json::from_value(doc)?)
}

pub fn decode_all<T: DeserializeOwned>(docs: Vec<serde_json::Value>) -> DbResult<Vec<T>> {
    docs.into_iter().map(decode).collect()
}

pub fn encode<T: Serialize>(entity: &T) -> DbResult<serde_json::Value> {
    Ok(serde_json::to_value(entity)?)
}
