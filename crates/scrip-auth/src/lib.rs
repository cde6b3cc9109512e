//! Authentication: Argon2id credentials and HS256 bearer tokens.

mod error;
pub mod password;
mod service;
pub mod token;

pub use error::AuthError;
pub use service::AuthService;
pub use token::{Claims, TokenService};
