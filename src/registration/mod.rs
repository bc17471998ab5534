//! Player, team and registration bookkeeping shared by the registration
//! endpoints and the payment orchestrator.

pub mod service;
pub mod store;

pub use service::{NewPlayer, PlayerRegistration, RegistrationService, TeamEntry, TeamRegistration};
