use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::{decode_all, encode, lock_clause};
use crate::models::Player;
use sqlx::PgExecutor;
use uuid::Uuid;

pub async fn for_parent<'e, E: PgExecutor<'e>>(
    executor: E,
    parent_id: Uuid,
    lock: bool,
) -> DbResult<Vec<Player>> {
    let sql = format!(
        "SELECT doc FROM players WHERE parent_id = $1 ORDER BY created_at{}",
        lock_clause(lock)
    );
    let docs = sqlx::query_scalar::<_, serde_json::Value>(&sql)
        .bind(parent_id)
        .fetch_all(executor)
        .await
        .map_err(DatabaseError::from_sqlx)?;
    decode_all(docs)
}

/// Upsert. The identity columns back `players_identity_key`.
pub async fn save<'e, E: PgExecutor<'e>>(executor: E, player: &Player) -> DbResult<()> {
    let identity = player.identity();
    sqlx::query(
        "INSERT INTO players (id, parent_id, full_name_ci, dob, gender_ci, doc, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, now())
         ON CONFLICT (id) DO UPDATE SET
             full_name_ci = EXCLUDED.full_name_ci,
             dob = EXCLUDED.dob,
             gender_ci = EXCLUDED.gender_ci,
             doc = EXCLUDED.doc,
             updated_at = now()",
    )
    .bind(player.id)
    .bind(player.parent_id)
    .bind(identity.normalized_name())
    .bind(identity.dob)
    .bind(identity.gender.trim().to_lowercase())
    .bind(encode(player)?)
    .bind(player.created_at)
    .execute(executor)
    .await
    .map_err(DatabaseError::from_sqlx)?;
    Ok(())
}
