//! Bearer token issuance and validation.
//!
//! Tokens are HS256 JWTs carrying the identity in `sub` and an expiry in `exp`.

use std::fmt;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// The authenticated principal behind a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identity {
    fn from(name: &str) -> Self {
        Identity(name.to_owned())
    }
}

impl From<String> for Identity {
    fn from(name: String) -> Self {
        Identity(name)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a connection was refused. The display text doubles as the close reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthRejection {
    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,
}

impl AuthRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            AuthRejection::MissingToken => "Missing token",
            AuthRejection::InvalidToken => "Invalid token",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

#[derive(Clone)]
pub struct JwtAuth {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: time::Duration,
}

impl JwtAuth {
    pub fn new(secret: &str, ttl: time::Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, identity: &Identity) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: identity.to_string(),
            exp: (OffsetDateTime::now_utc() + self.ttl).unix_timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    pub fn verify(&self, token: Option<&str>) -> Result<Identity, AuthRejection> {
        let Some(token) = token.filter(|token| !token.is_empty()) else {
            return Err(AuthRejection::MissingToken);
        };

        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|_| AuthRejection::InvalidToken)?;
        if data.claims.sub.is_empty() {
            return Err(AuthRejection::InvalidToken);
        }

        Ok(Identity(data.claims.sub))
    }
}
