use anyhow::Context;

use crate::AppResult;

/// bcrypt hashing, run off the async workers.
#[derive(Clone, Copy)]
pub struct Passwords {
    cost: u32,
}

impl Passwords {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub async fn hash(&self, password: String) -> AppResult<String> {
        let cost = self.cost;
        let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .context("password hashing task")??;
        Ok(hash)
    }

    pub async fn verify(&self, password: String, hash: String) -> AppResult<bool> {
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .context("password verification task")??;
        Ok(matches)
    }
}

impl Default for Passwords {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}
