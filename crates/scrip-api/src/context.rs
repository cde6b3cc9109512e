//! Request-scoped context inserted by the auth middleware.

use uuid::Uuid;

/// The authenticated caller, resolved from the bearer token's subject.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub login: String,
}
