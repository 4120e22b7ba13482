use axum::{Json, debug_handler, extract::State};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

use crate::{AppError, AppResult, AppState};

use super::Passwords;

#[derive(Deserialize)]
pub(crate) struct UserCreate {
    username: String,
    password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Registered {
    pub msg: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn register(
    State(db_pool): State<SqlitePool>,
    State(passwords): State<Passwords>,
    Json(UserCreate { username, password }): Json<UserCreate>,
) -> AppResult<Json<Registered>> {
    if username.is_empty() {
        return Err(AppError::BadRequest("Username required"));
    }

    let password_hash = passwords.hash(password).await?;
    let inserted = sqlx::query("INSERT INTO users (username,password_hash) VALUES (?,?)")
        .bind(&username)
        .bind(password_hash)
        .execute(&db_pool)
        .await;

    match inserted {
        Ok(_) => {}
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(AppError::AlreadyRegistered);
        }
        Err(e) => return Err(e.into()),
    }

    info!(%username, "registered");
    Ok(Json(Registered { msg: "User registered successfully".to_owned() }))
}
