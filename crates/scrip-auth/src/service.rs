//! Registration, login and caller lookup.

use std::sync::Arc;

use tracing::info;

use scrip_core::User;
use scrip_store::Ledger;

use crate::error::AuthError;
use crate::password;

/// Credential management over the ledger's user table.
pub struct AuthService {
    store: Arc<dyn Ledger>,
}

impl AuthService {
    pub fn new(store: Arc<dyn Ledger>) -> Self {
        Self { store }
    }

    /// Register a new account. The password is stored only as an
    /// Argon2id hash.
    pub async fn register(&self, login: &str, password: &str) -> Result<User, AuthError> {
        let hash = password::hash_password(password)?;
        let user = self.store.create_user(login, &hash).await?;
        info!(login, "user registered");
        Ok(user)
    }

    /// Verify credentials. Unknown logins and wrong passwords are
    /// distinct sentinel errors; the HTTP layer maps both to 401.
    pub async fn login(&self, login: &str, password: &str) -> Result<User, AuthError> {
        let user = self
            .store
            .find_user(login)
            .await?
            .ok_or(AuthError::UnknownUser)?;

        if !password::verify_password(password, &user.password_hash)? {
            return Err(AuthError::WrongPassword);
        }

        Ok(user)
    }

    /// Resolve a login (token subject) to its user record.
    pub async fn get_user(&self, login: &str) -> Result<User, AuthError> {
        self.store
            .find_user(login)
            .await?
            .ok_or(AuthError::UnknownUser)
    }
}
