//! Bearer tokens and email-verification tokens.

pub mod jwt;
pub mod temp_tokens;

pub use jwt::{Claims, JwtError, JwtService};
pub use temp_tokens::{TempToken, TempTokenStore};
