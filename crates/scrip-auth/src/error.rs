use scrip_store::StoreError;

/// Authentication failure. The first four variants are the sentinel
/// values the HTTP layer translates to status codes.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("user is already registered")]
    AlreadyRegistered,

    #[error("user does not exist")]
    UnknownUser,

    #[error("password is incorrect")]
    WrongPassword,

    #[error("token has expired")]
    TokenExpired,

    #[error("invalid token: {0}")]
    TokenInvalid(String),

    #[error("crypto failure: {0}")]
    Crypto(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateUser => AuthError::AlreadyRegistered,
            other => AuthError::Store(other),
        }
    }
}
