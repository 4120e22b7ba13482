//! OAuth2 access tokens for a Google service account.
//!
//! A self-signed RS256 assertion is exchanged at the account's token endpoint
//! for a bearer token, which is cached until shortly before it expires.

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::ServiceAccount;

use super::StoreError;

pub(crate) const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
pub(crate) const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

const ASSERTION_LIFETIME: time::Duration = time::Duration::hours(1);
const REFRESH_MARGIN: time::Duration = time::Duration::seconds(60);

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenGrant {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    access_token: String,
    expires_at: OffsetDateTime,
}

pub struct ServiceAccountAuth {
    client_email: String,
    key_id: Option<String>,
    token_uri: String,
    key: EncodingKey,
    http_client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    pub fn new(account: &ServiceAccount, http_client: reqwest::Client) -> Result<Self, StoreError> {
        Ok(Self {
            client_email: account.client_email.clone(),
            key_id: account.private_key_id.clone(),
            token_uri: account.token_uri.clone(),
            key: EncodingKey::from_rsa_pem(account.private_key.as_bytes())?,
            http_client,
            cached: Mutex::new(None),
        })
    }

    /// The cached bearer token, or a fresh one once the cached token is within
    /// a minute of expiring. Concurrent callers wait on a single exchange.
    pub async fn bearer(&self) -> Result<String, StoreError> {
        let mut cached = self.cached.lock().await;
        let now = OffsetDateTime::now_utc();
        if let Some(token) = cached.as_ref().filter(|token| token.expires_at - REFRESH_MARGIN > now) {
            return Ok(token.access_token.clone());
        }

        let grant = self.exchange(now).await?;
        debug!(expires_in = grant.expires_in, "service account token refreshed");
        let token = CachedToken {
            expires_at: now + time::Duration::seconds(grant.expires_in),
            access_token: grant.access_token,
        };
        let bearer = token.access_token.clone();
        *cached = Some(token);
        Ok(bearer)
    }

    fn assertion(&self, now: OffsetDateTime) -> Result<String, StoreError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key_id.clone();

        let iat = now.unix_timestamp();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: DATASTORE_SCOPE,
            aud: &self.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME.whole_seconds(),
        };
        Ok(jsonwebtoken::encode(&header, &claims, &self.key)?)
    }

    async fn exchange(&self, now: OffsetDateTime) -> Result<TokenGrant, StoreError> {
        let assertion = self.assertion(now)?;
        let response = self.http_client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::TokenRejected { status: status.as_u16(), body });
        }
        Ok(response.json().await?)
    }
}
