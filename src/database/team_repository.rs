use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::{decode, encode, lock_clause};
use crate::models::Team;
use sqlx::PgExecutor;

pub async fn find_by_identity<'e, E: PgExecutor<'e>>(
    executor: E,
    name: &str,
    grade: &str,
    sex: &str,
    lock: bool,
) -> DbResult<Option<Team>> {
    let sql = format!(
        "SELECT doc FROM teams
         WHERE name_ci = lower($1) AND grade_ci = lower($2) AND sex_ci = lower($3)
         ORDER BY created_at LIMIT 1{}",
        lock_clause(lock)
    );
    let doc = sqlx::query_scalar::<_, serde_json::Value>(&sql)
        .bind(name.trim())
        .bind(grade.trim())
        .bind(sex.trim())
        .fetch_optional(executor)
        .await
        .map_err(DatabaseError::from_sqlx)?;
    doc.map(decode).transpose()
}

pub async fn save<'e, E: PgExecutor<'e>>(executor: E, team: &Team) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO teams (id, name_ci, grade_ci, sex_ci, doc, created_at, updated_at)
         VALUES ($1, lower($2), lower($3), lower($4), $5, $6, now())
         ON CONFLICT (id) DO UPDATE SET
             name_ci = EXCLUDED.name_ci,
             grade_ci = EXCLUDED.grade_ci,
             sex_ci = EXCLUDED.sex_ci,
             doc = EXCLUDED.doc,
             updated_at = now()",
    )
    .bind(team.id)
    .bind(team.name.trim())
    .bind(team.grade.trim())
    .bind(team.sex.trim())
    .bind(encode(team)?)
    .bind(team.created_at)
    .execute(executor)
    .await
    .map_err(DatabaseError::from_sqlx)?;
    Ok(())
}
