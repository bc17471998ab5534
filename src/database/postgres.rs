//! Postgres implementation of [`Store`].
//!
//! Rows read through a [`PgTx`] are taken `FOR UPDATE`, so two requests that
//! touch the same parent serialize on the row lock; the unique indexes in
//! `migrations/` catch the inserts that row locks cannot see.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use crate::database::repository::fetch_by_id;
use crate::database::store::{Store, StoreTx};
use crate::database::transaction::DatabaseTransaction;
use crate::database::{
    email_template_repository, init_pool, parent_repository, payment_configuration_repository,
    payment_repository, player_repository, registration_repository, team_repository, PoolConfig,
};
use crate::models::{
    EmailTemplate, Parent, Payment, PaymentConfiguration, Player, Registration, RegistrationKey,
    Team,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, config: PoolConfig) -> DbResult<Self> {
        let pool = init_pool(database_url, Some(config)).await?;
        Ok(Self::new(pool))
    }

    /// Apply pending migrations from `migrations/`.
    pub async fn migrate(&self) -> DbResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                DatabaseError::new(DatabaseErrorKind::QueryError {
                    message: format!("Migration failed: {}", e),
                })
            })?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> DbResult<PgTx> {
        Ok(PgTx {
            tx: DatabaseTransaction::begin(&self.pool).await?,
        })
    }

    async fn ping(&self) -> DbResult<()> {
        crate::database::health_check(&self.pool).await
    }

    async fn find_parent(&self, id: Uuid) -> DbResult<Option<Parent>> {
        parent_repository::find(&self.pool, id, false).await
    }

    async fn find_parent_by_email(&self, email: &str) -> DbResult<Option<Parent>> {
        parent_repository::find_by_email(&self.pool, email).await
    }

    async fn find_player(&self, id: Uuid) -> DbResult<Option<Player>> {
        fetch_by_id(&self.pool, id, false).await
    }

    async fn players_for_parent(&self, parent_id: Uuid) -> DbResult<Vec<Player>> {
        player_repository::for_parent(&self.pool, parent_id, false).await
    }

    async fn find_team(&self, id: Uuid) -> DbResult<Option<Team>> {
        fetch_by_id(&self.pool, id, false).await
    }

    async fn find_payment(&self, id: Uuid) -> DbResult<Option<Payment>> {
        fetch_by_id(&self.pool, id, false).await
    }

    async fn find_payment_by_external(&self, external_payment_id: &str) -> DbResult<Option<Payment>> {
        payment_repository::find_by_external(&self.pool, external_payment_id, false).await
    }

    async fn registrations_for_parent(&self, parent_id: Uuid) -> DbResult<Vec<Registration>> {
        registration_repository::for_parent(&self.pool, parent_id, false).await
    }

    async fn payments_for_parent(&self, parent_id: Uuid) -> DbResult<Vec<Payment>> {
        payment_repository::for_parent(&self.pool, parent_id).await
    }

    async fn find_email_template(&self, title: &str) -> DbResult<Option<EmailTemplate>> {
        email_template_repository::find_by_title(&self.pool, title).await
    }

    async fn payment_configurations(&self) -> DbResult<Vec<PaymentConfiguration>> {
        payment_configuration_repository::all(&self.pool, false).await
    }
}

pub struct PgTx {
    tx: DatabaseTransaction,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn find_parent(&mut self, id: Uuid) -> DbResult<Option<Parent>> {
        parent_repository::find(self.tx.conn()?, id, true).await
    }

    async fn find_player(&mut self, id: Uuid) -> DbResult<Option<Player>> {
        fetch_by_id(self.tx.conn()?, id, true).await
    }

    async fn players_for_parent(&mut self, parent_id: Uuid) -> DbResult<Vec<Player>> {
        player_repository::for_parent(self.tx.conn()?, parent_id, true).await
    }

    async fn find_team(&mut self, id: Uuid) -> DbResult<Option<Team>> {
        fetch_by_id(self.tx.conn()?, id, true).await
    }

    async fn find_team_by_identity(
        &mut self,
        name: &str,
        grade: &str,
        sex: &str,
    ) -> DbResult<Option<Team>> {
        team_repository::find_by_identity(self.tx.conn()?, name, grade, sex, true).await
    }

    async fn find_registration(&mut self, key: &RegistrationKey) -> DbResult<Option<Registration>> {
        registration_repository::find_by_key(self.tx.conn()?, key, true).await
    }

    async fn registrations_for_parent(&mut self, parent_id: Uuid) -> DbResult<Vec<Registration>> {
        registration_repository::for_parent(self.tx.conn()?, parent_id, true).await
    }

    async fn find_payment(&mut self, id: Uuid) -> DbResult<Option<Payment>> {
        fetch_by_id(self.tx.conn()?, id, true).await
    }

    async fn find_payment_by_external(
        &mut self,
        external_payment_id: &str,
    ) -> DbResult<Option<Payment>> {
        payment_repository::find_by_external(self.tx.conn()?, external_payment_id, true).await
    }

    async fn payment_configurations(&mut self) -> DbResult<Vec<PaymentConfiguration>> {
        payment_configuration_repository::all(self.tx.conn()?, true).await
    }

    async fn save_parent(&mut self, parent: &Parent) -> DbResult<()> {
        parent_repository::save(self.tx.conn()?, parent).await
    }

    async fn save_player(&mut self, player: &Player) -> DbResult<()> {
        player_repository::save(self.tx.conn()?, player).await
    }

    async fn save_team(&mut self, team: &Team) -> DbResult<()> {
        team_repository::save(self.tx.conn()?, team).await
    }

    async fn save_registration(&mut self, registration: &Registration) -> DbResult<()> {
        registration_repository::save(self.tx.conn()?, registration).await
    }

    async fn insert_payment(&mut self, payment: &Payment) -> DbResult<()> {
        payment_repository::insert(self.tx.conn()?, payment).await
    }

    async fn update_payment(&mut self, payment: &Payment) -> DbResult<()> {
        payment_repository::update(self.tx.conn()?, payment).await
    }

    async fn save_configuration(&mut self, configuration: &PaymentConfiguration) -> DbResult<()> {
        payment_configuration_repository::save(self.tx.conn()?, configuration).await
    }

    async fn commit(self) -> DbResult<()> {
        self.tx.commit().await
    }

    async fn rollback(self) -> DbResult<()> {
        self.tx.rollback().await
    }
}
