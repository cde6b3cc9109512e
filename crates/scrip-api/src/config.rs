//! Service configuration, each item overridable by an environment
//! variable of the matching name.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;

/// Runtime configuration.
///
/// | Variable | Default | Meaning |
/// |---|---|---|
/// | `RUN_ADDRESS` | `localhost:8090` | bind address of the HTTP API |
/// | `ACCRUAL_SYSTEM_ADDRESS` | `http://localhost:8080` | base URL of the accrual calculator |
/// | `DATABASE_URI` | — (required) | Postgres DSN |
/// | `LOG_LEVEL` | `error` | tracing filter when `RUST_LOG` is unset |
/// | `ENV` | `production` | `production` switches JSON logs and the secret-key policy |
/// | `AUTH_SECRET_KEY` | see [`Config::auth_secret`] | HMAC secret for bearer tokens |
#[derive(Debug, Clone)]
pub struct Config {
    pub run_address: String,
    pub accrual_address: String,
    pub database_uri: String,
    pub log_level: String,
    pub env: String,
    auth_secret_key: Option<String>,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            run_address: env_or("RUN_ADDRESS", "localhost:8090"),
            accrual_address: env_or("ACCRUAL_SYSTEM_ADDRESS", "http://localhost:8080"),
            database_uri: env_or("DATABASE_URI", ""),
            log_level: env_or("LOG_LEVEL", "error"),
            env: env_or("ENV", "production"),
            auth_secret_key: std::env::var("AUTH_SECRET_KEY")
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }

    /// Resolve the token-signing secret.
    ///
    /// Production without `AUTH_SECRET_KEY` gets a warning and an
    /// ephemeral random key — tokens stop validating across restarts,
    /// which is the visible symptom of the misconfiguration.
    pub fn auth_secret(&self) -> String {
        match &self.auth_secret_key {
            Some(secret) => secret.clone(),
            None if self.is_production() => {
                tracing::warn!(
                    "AUTH_SECRET_KEY is not set; using an ephemeral key, tokens will not survive restarts"
                );
                generate_secret()
            }
            None => "development-key".to_string(),
        }
    }
}

/// 32 random bytes, base64-encoded.
fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}
