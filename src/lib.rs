//! Registration and payment core for a youth basketball club portal.

pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod email;
pub mod error;
pub mod models;
pub mod payments;
pub mod registration;

pub use error::{AppError, AppErrorKind, AppResult};
