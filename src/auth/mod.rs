//! Credential registration, token issuance, and the gate that checks tokens on
//! connect.

mod gate;
mod passwords;
mod register;
mod token;

use axum::{Router, routing::post};

use crate::AppState;

pub use gate::{AuthRejection, Identity, JwtAuth};
pub use passwords::Passwords;
pub use register::Registered;
pub use token::TokenResponse;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register::register))
        .route("/token", post(token::token))
}
