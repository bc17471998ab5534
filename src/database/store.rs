//! Storage traits the registration and payment core is written against.
//!
//! [`Store`] is the pool-level handle used for reads outside a transaction;
//! [`StoreTx`] is one multi-document transaction. Reads through a `StoreTx`
//! lock the rows they return until commit or rollback.

use async_trait::async_trait;
use uuid::Uuid;

use crate::database::error::DbResult;
use crate::models::{
    EmailTemplate, Parent, Payment, PaymentConfiguration, Player, Registration, RegistrationKey,
    Team,
};

/// A persisted entity: one row per id in its own table.
pub trait Document: Clone + Send + Sync + 'static {
    const TABLE: &'static str;
    const ENTITY: &'static str;

    fn id(&self) -> Uuid;

    /// Unique index this document participates in, with its key value.
    fn unique_key(&self) -> Option<(&'static str, String)> {
        None
    }
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: StoreTx;

    /// Open a multi-document transaction.
    async fn begin(&self) -> DbResult<Self::Tx>;

    /// Reachability check used by `/health`.
    async fn ping(&self) -> DbResult<()>;

    async fn find_parent(&self, id: Uuid) -> DbResult<Option<Parent>>;

    async fn find_parent_by_email(&self, email: &str) -> DbResult<Option<Parent>>;

    async fn find_player(&self, id: Uuid) -> DbResult<Option<Player>>;

    async fn players_for_parent(&self, parent_id: Uuid) -> DbResult<Vec<Player>>;

    async fn find_team(&self, id: Uuid) -> DbResult<Option<Team>>;

    async fn find_payment(&self, id: Uuid) -> DbResult<Option<Payment>>;

    async fn find_payment_by_external(&self, external_payment_id: &str) -> DbResult<Option<Payment>>;

    async fn registrations_for_parent(&self, parent_id: Uuid) -> DbResult<Vec<Registration>>;

    /// Newest first.
    async fn payments_for_parent(&self, parent_id: Uuid) -> DbResult<Vec<Payment>>;

    /// Active template with this title, compared case-insensitively.
    async fn find_email_template(&self, title: &str) -> DbResult<Option<EmailTemplate>>;

    async fn payment_configurations(&self) -> DbResult<Vec<PaymentConfiguration>>;
}

/// One multi-document transaction. Dropping it without `commit` discards
/// every write.
#[async_trait]
pub trait StoreTx: Send {
    async fn find_parent(&mut self, id: Uuid) -> DbResult<Option<Parent>>;

    async fn find_player(&mut self, id: Uuid) -> DbResult<Option<Player>>;

    async fn players_for_parent(&mut self, parent_id: Uuid) -> DbResult<Vec<Player>>;

    async fn find_team(&mut self, id: Uuid) -> DbResult<Option<Team>>;

    /// Team with the same name, grade and sex, compared case-insensitively.
    async fn find_team_by_identity(
        &mut self,
        name: &str,
        grade: &str,
        sex: &str,
    ) -> DbResult<Option<Team>>;

    async fn find_registration(&mut self, key: &RegistrationKey) -> DbResult<Option<Registration>>;

    async fn registrations_for_parent(&mut self, parent_id: Uuid) -> DbResult<Vec<Registration>>;

    async fn find_payment(&mut self, id: Uuid) -> DbResult<Option<Payment>>;

    async fn find_payment_by_external(
        &mut self,
        external_payment_id: &str,
    ) -> DbResult<Option<Payment>>;

    async fn payment_configurations(&mut self) -> DbResult<Vec<PaymentConfiguration>>;

    async fn save_parent(&mut self, parent: &Parent) -> DbResult<()>;

    async fn save_player(&mut self, player: &Player) -> DbResult<()>;

    async fn save_team(&mut self, team: &Team) -> DbResult<()>;

    async fn save_registration(&mut self, registration: &Registration) -> DbResult<()>;

    /// Payments are append-only; inserting an existing id is an error.
    async fn insert_payment(&mut self, payment: &Payment) -> DbResult<()>;

    /// Used by the refund and webhook paths only.
    async fn update_payment(&mut self, payment: &Payment) -> DbResult<()>;

    async fn save_configuration(&mut self, configuration: &PaymentConfiguration) -> DbResult<()>;

    async fn commit(self) -> DbResult<()>;

    async fn rollback(self) -> DbResult<()>;
}

impl Document for Parent {
    const TABLE: &'static str = "parents";
    const ENTITY: &'static str = "Parent";

    fn id(&self) -> Uuid {
        self.id
    }

    fn unique_key(&self) -> Option<(&'static str, String)> {
        Some((
            crate::database::error::PARENT_EMAIL_INDEX,
            self.email.trim().to_lowercase(),
        ))
    }
}

impl Document for Player {
    const TABLE: &'static str = "players";
    const ENTITY: &'static str = "Player";

    fn id(&self) -> Uuid {
        self.id
    }

    fn unique_key(&self) -> Option<(&'static str, String)> {
        let identity = self.identity();
        Some((
            crate::database::error::PLAYER_IDENTITY_INDEX,
            format!(
                "{}|{}|{}|{}",
                self.parent_id,
                identity.normalized_name(),
                identity.dob,
                identity.gender.trim().to_lowercase()
            ),
        ))
    }
}

impl Document for Team {
    const TABLE: &'static str = "teams";
    const ENTITY: &'static str = "Team";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Document for Registration {
    const TABLE: &'static str = "registrations";
    const ENTITY: &'static str = "Registration";

    fn id(&self) -> Uuid {
        self.id
    }

    fn unique_key(&self) -> Option<(&'static str, String)> {
        Some((
            crate::database::error::REGISTRATION_PROGRAM_INDEX,
            format!("{}|{}", self.parent_id, self.program_key()),
        ))
    }
}

impl Document for Payment {
    const TABLE: &'static str = "payments";
    const ENTITY: &'static str = "Payment";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Document for PaymentConfiguration {
    const TABLE: &'static str = "payment_configurations";
    const ENTITY: &'static str = "PaymentConfiguration";

    fn id(&self) -> Uuid {
        self.id
    }

    fn unique_key(&self) -> Option<(&'static str, String)> {
        self.is_active.then(|| {
            (
                crate::database::error::ACTIVE_CONFIGURATION_INDEX,
                self.payment_system.as_str().to_string(),
            )
        })
    }
}

impl Document for EmailTemplate {
    const TABLE: &'static str = "email_templates";
    const ENTITY: &'static str = "EmailTemplate";

    fn id(&self) -> Uuid {
        self.id
    }
}
