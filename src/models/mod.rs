//! Documents persisted by the registration and payment core.
//!
//! Each entity keeps the embedded-array shape of the portal's document model
//! (`Player::seasons`, `Team::tournaments`); the invariants tying those arrays
//! to top-level mirror fields and to `Registration` rows are enforced by the
//! methods here and by `registration::store`.

pub mod common;
pub mod parent;
pub mod payment;
pub mod payment_config;
pub mod player;
pub mod registration;
pub mod team;

pub use common::{CardDetails, PaymentStamp, PaymentStatus, PaymentType, Program, ProviderKind, TeamLevel};
pub use parent::{CommunicationPreferences, Guardian, Parent, PreferenceKey};
pub use payment::{Payment, PaymentRecordStatus, RefundEntry, RefundStatus};
pub use payment_config::{
    CloverCredentials, EmailTemplate, Environment, PayPalCredentials, PaymentConfiguration,
    PaymentSettings, SquareCredentials, StripeCredentials,
};
pub use player::{Player, PlayerIdentity, PlayerSeason};
pub use registration::{ProgramRef, Registration, RegistrationKey, RegistrationPatch};
pub use team::{LevelConflict, Team, TeamTournament};
