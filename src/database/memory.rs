//! In-process store with the same transactional behaviour as Postgres.
//!
//! A transaction works on a snapshot taken at `begin` and sees its own
//! writes. At commit the unique indexes are checked against the committed
//! state first, then every touched document's version is compared with the
//! version the transaction started from; either failure aborts the commit.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use crate::database::store::{Document, Store, StoreTx};
use crate::models::{
    EmailTemplate, Parent, Payment, PaymentConfiguration, Player, Registration, RegistrationKey,
    Team,
};

#[derive(Debug, Clone)]
struct Versioned<T> {
    version: u64,
    doc: T,
}

#[derive(Debug, Clone)]
struct Table<T> {
    rows: HashMap<Uuid, Versioned<T>>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
        }
    }
}

impl<T: Document> Table<T> {
    fn get(&self, id: Uuid) -> Option<T> {
        self.rows.get(&id).map(|v| v.doc.clone())
    }

    fn version(&self, id: Uuid) -> u64 {
        self.rows.get(&id).map(|v| v.version).unwrap_or(0)
    }

    fn filter(&self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        self.rows
            .values()
            .filter(|v| pred(&v.doc))
            .map(|v| v.doc.clone())
            .collect()
    }

    fn put(&mut self, doc: T) {
        let id = doc.id();
        let version = self.version(id);
        self.rows.insert(id, Versioned { version, doc });
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    parents: Table<Parent>,
    players: Table<Player>,
    teams: Table<Team>,
    registrations: Table<Registration>,
    payments: Table<Payment>,
    configurations: Table<PaymentConfiguration>,
    templates: Table<EmailTemplate>,
}

/// Routes a document type to its table.
trait Stored: Document {
    fn table(tables: &Tables) -> &Table<Self>;
    fn table_mut(tables: &mut Tables) -> &mut Table<Self>;
}

macro_rules! stored {
    ($ty:ty, $field:ident) => {
        impl Stored for $ty {
            fn table(tables: &Tables) -> &Table<Self> {
                &tables.$field
            }
            fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
                &mut tables.$field
            }
        }
    };
}

stored!(Parent, parents);
stored!(Player, players);
stored!(Team, teams);
stored!(Registration, registrations);
stored!(Payment, payments);
stored!(PaymentConfiguration, configurations);
stored!(EmailTemplate, templates);

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Tables>> {
        lock(&self.shared)
    }

    fn seed<T: Stored>(&self, doc: T) {
        if let Ok(mut tables) = self.shared.lock() {
            let table = T::table_mut(&mut tables);
            let version = table.version(doc.id()) + 1;
            table.rows.insert(doc.id(), Versioned { version, doc });
        }
    }

    pub fn seed_parent(&self, parent: Parent) {
        self.seed(parent);
    }

    pub fn seed_player(&self, player: Player) {
        self.seed(player);
    }

    pub fn seed_team(&self, team: Team) {
        self.seed(team);
    }

    pub fn seed_registration(&self, registration: Registration) {
        self.seed(registration);
    }

    pub fn seed_payment(&self, payment: Payment) {
        self.seed(payment);
    }

    pub fn seed_configuration(&self, configuration: PaymentConfiguration) {
        self.seed(configuration);
    }

    pub fn seed_template(&self, template: EmailTemplate) {
        self.seed(template);
    }

    /// Every committed registration, for test assertions.
    pub fn all_registrations(&self) -> Vec<Registration> {
        self.lock()
            .map(|t| t.registrations.filter(|_| true))
            .unwrap_or_default()
    }

    /// Every committed payment, for test assertions.
    pub fn all_payments(&self) -> Vec<Payment> {
        self.lock()
            .map(|t| t.payments.filter(|_| true))
            .unwrap_or_default()
    }
}

fn lock(shared: &Mutex<Tables>) -> DbResult<MutexGuard<'_, Tables>> {
    shared
        .lock()
        .map_err(|_| DatabaseError::transaction("memory store lock poisoned"))
}

fn by_external(payments: &Table<Payment>, external_payment_id: &str) -> Option<Payment> {
    payments
        .rows
        .values()
        .map(|v| &v.doc)
        .find(|p| p.payment_id == external_payment_id)
        .cloned()
}

fn newest_first(mut payments: Vec<Payment>) -> Vec<Payment> {
    payments.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
    payments
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> DbResult<MemoryTx> {
        let working = self.lock()?.clone();
        debug!("Beginning in-memory transaction");
        Ok(MemoryTx {
            shared: Arc::clone(&self.shared),
            working,
            base_versions: HashMap::new(),
        })
    }

    async fn ping(&self) -> DbResult<()> {
        self.lock().map(|_| ())
    }

    async fn find_parent(&self, id: Uuid) -> DbResult<Option<Parent>> {
        Ok(self.lock()?.parents.get(id))
    }

    async fn find_parent_by_email(&self, email: &str) -> DbResult<Option<Parent>> {
        let email = email.trim().to_lowercase();
        Ok(self
            .lock()?
            .parents
            .filter(|p| p.email.eq_ignore_ascii_case(&email))
            .into_iter()
            .next())
    }

    async fn find_player(&self, id: Uuid) -> DbResult<Option<Player>> {
        Ok(self.lock()?.players.get(id))
    }

    async fn players_for_parent(&self, parent_id: Uuid) -> DbResult<Vec<Player>> {
        Ok(self.lock()?.players.filter(|p| p.parent_id == parent_id))
    }

    async fn find_team(&self, id: Uuid) -> DbResult<Option<Team>> {
        Ok(self.lock()?.teams.get(id))
    }

    async fn find_payment(&self, id: Uuid) -> DbResult<Option<Payment>> {
        Ok(self.lock()?.payments.get(id))
    }

    async fn find_payment_by_external(&self, external_payment_id: &str) -> DbResult<Option<Payment>> {
        Ok(by_external(&self.lock()?.payments, external_payment_id))
    }

    async fn registrations_for_parent(&self, parent_id: Uuid) -> DbResult<Vec<Registration>> {
        Ok(self.lock()?.registrations.filter(|r| r.parent_id == parent_id))
    }

    async fn payments_for_parent(&self, parent_id: Uuid) -> DbResult<Vec<Payment>> {
        Ok(newest_first(
            self.lock()?.payments.filter(|p| p.parent_id == parent_id),
        ))
    }

    async fn find_email_template(&self, title: &str) -> DbResult<Option<EmailTemplate>> {
        Ok(self
            .lock()?
            .templates
            .filter(|t| t.is_active && t.title.trim().eq_ignore_ascii_case(title.trim()))
            .into_iter()
            .next())
    }

    async fn payment_configurations(&self) -> DbResult<Vec<PaymentConfiguration>> {
        Ok(self.lock()?.configurations.filter(|_| true))
    }
}

/// Transaction over a [`MemoryStore`].
pub struct MemoryTx {
    shared: Arc<Mutex<Tables>>,
    working: Tables,
    /// Version each touched document had when this transaction first wrote it.
    base_versions: HashMap<(&'static str, Uuid), u64>,
}

impl MemoryTx {
    fn write<T: Stored>(&mut self, doc: &T) {
        let id = doc.id();
        let base = T::table(&self.working).version(id);
        self.base_versions.entry((T::TABLE, id)).or_insert(base);
        T::table_mut(&mut self.working).put(doc.clone());
    }

    fn touched<T: Stored>(&self) -> HashSet<Uuid> {
        self.base_versions
            .keys()
            .filter(|(table, _)| *table == T::TABLE)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Unique keys over the committed rows this transaction did not touch
    /// plus the rows it wrote.
    fn check_unique<T: Stored>(&self, committed: &Tables) -> DbResult<()> {
        let touched = self.touched::<T>();
        if touched.is_empty() {
            return Ok(());
        }

        let mut seen: HashMap<(&'static str, String), Uuid> = HashMap::new();
        for row in T::table(committed).rows.values() {
            if touched.contains(&row.doc.id()) {
                continue;
            }
            if let Some(key) = row.doc.unique_key() {
                seen.insert(key, row.doc.id());
            }
        }

        let working = T::table(&self.working);
        for id in &touched {
            let Some(doc) = working.rows.get(id).map(|v| &v.doc) else {
                continue;
            };
            let Some(key) = doc.unique_key() else {
                continue;
            };
            if let Some(other) = seen.get(&key) {
                if *other != doc.id() {
                    return Err(DatabaseError::unique_violation(key.0, key.1));
                }
            }
            seen.insert(key, doc.id());
        }
        Ok(())
    }

    fn check_versions<T: Stored>(&self, committed: &Tables) -> DbResult<()> {
        for id in self.touched::<T>() {
            let base = self.base_versions.get(&(T::TABLE, id)).copied().unwrap_or(0);
            if T::table(committed).version(id) != base {
                return Err(DatabaseError::new(DatabaseErrorKind::WriteConflict {
                    entity: T::ENTITY.to_string(),
                    id: id.to_string(),
                }));
            }
        }
        Ok(())
    }

    fn apply<T: Stored>(&self, committed: &mut Tables) {
        for id in self.touched::<T>() {
            if let Some(doc) = T::table(&self.working).get(id) {
                let table = T::table_mut(committed);
                let version = table.version(id) + 1;
                table.rows.insert(id, Versioned { version, doc });
            }
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_parent(&mut self, id: Uuid) -> DbResult<Option<Parent>> {
        Ok(self.working.parents.get(id))
    }

    async fn find_player(&mut self, id: Uuid) -> DbResult<Option<Player>> {
        Ok(self.working.players.get(id))
    }

    async fn players_for_parent(&mut self, parent_id: Uuid) -> DbResult<Vec<Player>> {
        Ok(self.working.players.filter(|p| p.parent_id == parent_id))
    }

    async fn find_team(&mut self, id: Uuid) -> DbResult<Option<Team>> {
        Ok(self.working.teams.get(id))
    }

    async fn find_team_by_identity(
        &mut self,
        name: &str,
        grade: &str,
        sex: &str,
    ) -> DbResult<Option<Team>> {
        let same = |a: &str, b: &str| a.trim().eq_ignore_ascii_case(b.trim());
        Ok(self
            .working
            .teams
            .filter(|t| same(&t.name, name) && same(&t.grade, grade) && same(&t.sex, sex))
            .into_iter()
            .next())
    }

    async fn find_registration(&mut self, key: &RegistrationKey) -> DbResult<Option<Registration>> {
        let parent_id = key.parent_id();
        let program_key = key.program_key();
        Ok(self
            .working
            .registrations
            .filter(|r| r.parent_id == parent_id && r.program_key() == program_key)
            .into_iter()
            .next())
    }

    async fn registrations_for_parent(&mut self, parent_id: Uuid) -> DbResult<Vec<Registration>> {
        Ok(self.working.registrations.filter(|r| r.parent_id == parent_id))
    }

    async fn find_payment(&mut self, id: Uuid) -> DbResult<Option<Payment>> {
        Ok(self.working.payments.get(id))
    }

    async fn find_payment_by_external(
        &mut self,
        external_payment_id: &str,
    ) -> DbResult<Option<Payment>> {
        Ok(by_external(&self.working.payments, external_payment_id))
    }

    async fn payment_configurations(&mut self) -> DbResult<Vec<PaymentConfiguration>> {
        Ok(self.working.configurations.filter(|_| true))
    }

    async fn save_parent(&mut self, parent: &Parent) -> DbResult<()> {
        self.write(parent);
        Ok(())
    }

    async fn save_player(&mut self, player: &Player) -> DbResult<()> {
        self.write(player);
        Ok(())
    }

    async fn save_team(&mut self, team: &Team) -> DbResult<()> {
        self.write(team);
        Ok(())
    }

    async fn save_registration(&mut self, registration: &Registration) -> DbResult<()> {
        self.write(registration);
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> DbResult<()> {
        if self.working.payments.rows.contains_key(&payment.id) {
            return Err(DatabaseError::unique_violation("payments_pkey", payment.id.to_string()));
        }
        self.write(payment);
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> DbResult<()> {
        if !self.working.payments.rows.contains_key(&payment.id) {
            return Err(DatabaseError::not_found(Payment::ENTITY, payment.id));
        }
        self.write(payment);
        Ok(())
    }

    async fn save_configuration(&mut self, configuration: &PaymentConfiguration) -> DbResult<()> {
        self.write(configuration);
        Ok(())
    }

    async fn commit(self) -> DbResult<()> {
        let shared = Arc::clone(&self.shared);
        let mut committed = lock(&shared)?;

        self.check_unique::<Parent>(&committed)?;
        self.check_unique::<Player>(&committed)?;
        self.check_unique::<Registration>(&committed)?;
        self.check_unique::<PaymentConfiguration>(&committed)?;

        self.check_versions::<Parent>(&committed)?;
        self.check_versions::<Player>(&committed)?;
        self.check_versions::<Team>(&committed)?;
        self.check_versions::<Registration>(&committed)?;
        self.check_versions::<Payment>(&committed)?;
        self.check_versions::<PaymentConfiguration>(&committed)?;
        self.check_versions::<EmailTemplate>(&committed)?;

        self.apply::<Parent>(&mut committed);
        self.apply::<Player>(&mut committed);
        self.apply::<Team>(&mut committed);
        self.apply::<Registration>(&mut committed);
        self.apply::<Payment>(&mut committed);
        self.apply::<PaymentConfiguration>(&mut committed);
        self.apply::<EmailTemplate>(&mut committed);

        debug!(documents = self.base_versions.len(), "Committed in-memory transaction");
        Ok(())
    }

    async fn rollback(self) -> DbResult<()> {
        debug!(documents = self.base_versions.len(), "Rolled back in-memory transaction");
        Ok(())
    }
}
