pub mod appresult;
pub mod auth;
pub mod config;
pub mod db;
pub mod rooms;
pub mod store;

use std::sync::Arc;

use axum::{Router, extract::FromRef, http::{HeaderValue, header::InvalidHeaderValue}};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};

pub use appresult::{AppError, AppResult};

use crate::{
    auth::{JwtAuth, Passwords},
    config::Config,
    rooms::Chat,
    store::{DisabledMirror, FirestoreMirror, MirrorStore, SqliteLog, StoreError},
};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub jwt: JwtAuth,
    pub passwords: Passwords,
    pub chat: Chat,
}

impl AppState {
    /// Fails only when the mirror's credentials cannot be loaded.
    pub fn from_config(config: &Config, db_pool: SqlitePool) -> Result<Self, StoreError> {
        let mirror: Arc<dyn MirrorStore> = match &config.mirror {
            Some(mirror) => Arc::new(FirestoreMirror::new(mirror)?),
            None => Arc::new(DisabledMirror),
        };

        Ok(AppState {
            db_pool: db_pool.clone(),
            jwt: JwtAuth::new(&config.jwt_secret, config.token_ttl),
            passwords: Passwords::new(config.bcrypt_cost),
            chat: Chat::new(Arc::new(SqliteLog::new(db_pool)), mirror).with_outbound_queue(config.outbound_queue),
        })
    }
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .merge(auth::router())
        .merge(rooms::router())
        .with_state(app_state)
}

pub fn cors_layer(origin: &str) -> Result<CorsLayer, InvalidHeaderValue> {
    Ok(CorsLayer::new()
        .allow_origin(origin.parse::<HeaderValue>()?)
        .allow_methods(Any)
        .allow_headers(Any))
}
