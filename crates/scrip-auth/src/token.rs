//! HS256 bearer token issuance and validation.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Token lifetime from issuance.
const TOKEN_TTL_HOURS: i64 = 24;

/// Claims carried by every token. The subject is the user's login — the
/// natural key the rest of the system identifies callers by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject — the user's login.
    pub sub: String,
    /// Issued-at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
}

/// Issues and validates HS256 tokens with a shared secret.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issue a token for `subject`, valid for 24 hours.
    pub fn issue(&self, subject: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Crypto(format!("token encode: {e}")))
    }

    /// Validate signature and expiry, returning the verified claims.
    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["sub", "exp"]);

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid(e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let tokens = TokenService::new("test-secret");
        let token = tokens.issue("alice").unwrap();
        let claims = tokens.validate(&token).unwrap();

        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.exp - claims.iat, TOKEN_TTL_HOURS * 3600);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let issued = TokenService::new("secret-a").issue("alice").unwrap();
        let result = TokenService::new("secret-b").validate(&issued);
        assert!(matches!(result, Err(AuthError::TokenInvalid(_))));
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = TokenService::new("test-secret");
        let stale = Claims {
            sub: "alice".into(),
            iat: (Utc::now() - Duration::hours(48)).timestamp(),
            exp: (Utc::now() - Duration::hours(24)).timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &stale,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        assert!(matches!(tokens.validate(&token), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn garbage_is_rejected() {
        let tokens = TokenService::new("test-secret");
        assert!(matches!(
            tokens.validate("not.a.token"),
            Err(AuthError::TokenInvalid(_))
        ));
    }
}
