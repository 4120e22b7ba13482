use axum::{Form, Json, debug_handler, extract::State};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

use crate::{AppError, AppResult, AppState};

use super::{Identity, JwtAuth, Passwords};

/// OAuth2 password grant form; `grant_type` and `scope` are accepted and ignored.
#[derive(Deserialize)]
pub(crate) struct TokenForm {
    username: String,
    password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn token(
    State(db_pool): State<SqlitePool>,
    State(passwords): State<Passwords>,
    State(jwt): State<JwtAuth>,
    Form(TokenForm { username, password }): Form<TokenForm>,
) -> AppResult<Json<TokenResponse>> {
    let Some((password_hash,)): Option<(String,)> =
        sqlx::query_as("SELECT password_hash FROM users WHERE username=?")
            .bind(&username)
            .fetch_optional(&db_pool)
            .await?
    else {
        return Err(AppError::InvalidCredentials);
    };

    if !passwords.verify(password, password_hash).await? {
        return Err(AppError::InvalidCredentials);
    }

    let access_token = jwt.issue(&Identity::from(username.as_str()))?;
    info!(%username, "issued token");

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_owned(),
    }))
}
