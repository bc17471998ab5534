use crate::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use sqlx::Transaction as SqlxTransaction;
use sqlx::{PgConnection, PgPool, Postgres};
use tracing::{debug, error as log_error};

/// Database transaction wrapper for atomic operations
/// Dropping it without `commit` rolls back, so any early return reverts every write
pub struct DatabaseTransaction {
    transaction: Option<SqlxTransaction<'static, Postgres>>,
}

impl DatabaseTransaction {
    /// Begin a new transaction
    pub async fn begin(pool: &PgPool) -> DbResult<Self> {
        debug!("Beginning database transaction");

        let transaction = pool.begin().await.map_err(|e| {
            log_error!("Failed to begin transaction: {}", e);
            DatabaseError::from_sqlx(e)
        })?;

        Ok(Self {
            transaction: Some(transaction),
        })
    }

    /// Commit the transaction
    pub async fn commit(mut self) -> DbResult<()> {
        if let Some(tx) = self.transaction.take() {
            debug!("Committing transaction");

            tx.commit().await.map_err(|e| {
                log_error!("Failed to commit transaction: {}", e);
                DatabaseError::from_sqlx(e)
            })?;

            Ok(())
        } else {
            Err(completed())
        }
    }

    /// Rollback the transaction
    pub async fn rollback(mut self) -> DbResult<()> {
        if let Some(tx) = self.transaction.take() {
            debug!("Rolling back transaction");

            tx.rollback().await.map_err(|e| {
                log_error!("Failed to rollback transaction: {}", e);
                DatabaseError::from_sqlx(e)
            })?;

            Ok(())
        } else {
            Err(completed())
        }
    }

    /// Connection to run queries on inside this transaction
    pub fn conn(&mut self) -> DbResult<&mut PgConnection> {
        self.transaction
            .as_deref_mut()
            .ok_or_else(completed)
    }
}

fn completed() -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::TransactionError {
        message: "Transaction already completed".to_string(),
    })
}
