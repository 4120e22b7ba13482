use std::{fmt, net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::rooms::OUTBOUND_QUEUE;

pub const DEFAULT_FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is not valid: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Google service account credentials for the mirror store.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceAccount {
    pub client_email: String,
    /// PKCS#8 PEM.
    pub private_key: String,
    pub private_key_id: Option<String>,
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorConfig {
    pub base_url: String,
    pub project_id: String,
    pub api_key: Option<String>,
    /// `None` sends unauthenticated requests, as the emulator expects.
    pub service_account: Option<ServiceAccount>,
    /// Upper bound on one mirror request, token exchange included.
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub jwt_secret: String,
    pub token_ttl: time::Duration,
    pub bcrypt_cost: u32,
    pub cors_origin: String,
    /// Per-connection outbound queue depth.
    pub outbound_queue: usize,
    /// `None` disables the mirror store.
    pub mirror: Option<MirrorConfig>,
}

impl Config {
    /// Reads `.env` and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

        fn parsed<T: std::str::FromStr>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError> {
            match value {
                Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
                None => Ok(default),
            }
        }

        let bind_addr = parsed("BIND_ADDR", var("BIND_ADDR"), SocketAddr::from(([0, 0, 0, 0], 8000)))?;
        let token_ttl_minutes: i64 = parsed("TOKEN_TTL_MINUTES", var("TOKEN_TTL_MINUTES"), 15)?;
        if token_ttl_minutes <= 0 {
            return Err(ConfigError::Invalid {
                name: "TOKEN_TTL_MINUTES",
                value: token_ttl_minutes.to_string(),
            });
        }
        let bcrypt_cost: u32 = parsed("BCRYPT_COST", var("BCRYPT_COST"), bcrypt::DEFAULT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid { name: "BCRYPT_COST", value: bcrypt_cost.to_string() });
        }

        let outbound_queue: usize = parsed("OUTBOUND_QUEUE", var("OUTBOUND_QUEUE"), OUTBOUND_QUEUE)?;
        if outbound_queue == 0 {
            return Err(ConfigError::Invalid { name: "OUTBOUND_QUEUE", value: "0".to_owned() });
        }

        let mirror = match var("FIREBASE_PROJECT_ID") {
            Some(project_id) => {
                let timeout_secs: u64 = parsed("MIRROR_TIMEOUT_SECS", var("MIRROR_TIMEOUT_SECS"), 10)?;
                if timeout_secs == 0 {
                    return Err(ConfigError::Invalid { name: "MIRROR_TIMEOUT_SECS", value: "0".to_owned() });
                }
                Some(MirrorConfig {
                    base_url: var("FIRESTORE_URL").unwrap_or_else(|| DEFAULT_FIRESTORE_URL.to_owned()),
                    project_id,
                    api_key: var("FIREBASE_API_KEY"),
                    service_account: service_account(&var)?,
                    timeout: Duration::from_secs(timeout_secs),
                })
            }
            None => None,
        };

        Ok(Config {
            bind_addr,
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite:chat.db?mode=rwc".to_owned()),
            jwt_secret: var("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?,
            token_ttl: time::Duration::minutes(token_ttl_minutes),
            bcrypt_cost,
            cors_origin: var("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_owned()),
            outbound_queue,
            mirror,
        })
    }
}

/// Email and key come as a pair. The key may carry literal `\n` sequences,
/// as it does when pasted into a one-line env file.
fn service_account(var: &impl Fn(&str) -> Option<String>) -> Result<Option<ServiceAccount>, ConfigError> {
    let (client_email, private_key) = match (var("FIREBASE_CLIENT_EMAIL"), var("FIREBASE_PRIVATE_KEY")) {
        (None, None) => return Ok(None),
        (Some(_), None) => return Err(ConfigError::Missing("FIREBASE_PRIVATE_KEY")),
        (None, Some(_)) => return Err(ConfigError::Missing("FIREBASE_CLIENT_EMAIL")),
        (Some(email), Some(key)) => (email, key),
    };

    Ok(Some(ServiceAccount {
        client_email,
        private_key: private_key.replace("\\n", "\n"),
        private_key_id: var("FIREBASE_PRIVATE_KEY_ID"),
        token_uri: var("FIREBASE_TOKEN_URI").unwrap_or_else(|| DEFAULT_TOKEN_URI.to_owned()),
    }))
}
