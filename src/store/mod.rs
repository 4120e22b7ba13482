//! Message persistence.
//!
//! Every chat message goes to two places with different guarantees: the
//! [`DurableLog`] is the source of truth for history replay and must accept a
//! message before it is broadcast, while the [`MirrorStore`] is a best-effort
//! remote copy whose failures are only logged.

mod mirror;
mod service_account;
mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rooms::{ChatMessage, RoomId};

pub use mirror::{DisabledMirror, FirestoreMirror};
pub use service_account::ServiceAccountAuth;
pub use sqlite::SqliteLog;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("durable log: {0}")]
    Durable(#[from] sqlx::Error),

    #[error("mirror store request: {0}")]
    MirrorRequest(#[from] reqwest::Error),

    #[error("mirror store rejected write ({status}): {body}")]
    MirrorRejected { status: u16, body: String },

    #[error("service account credentials: {0}")]
    Credentials(#[from] jsonwebtoken::errors::Error),

    #[error("token endpoint rejected the assertion ({status}): {body}")]
    TokenRejected { status: u16, body: String },
}

/// A message as written to either store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub room: RoomId,
    pub sender: String,
    pub message: String,
    pub timestamp: String,
}

impl MessageRecord {
    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage {
            sender: self.sender.clone(),
            message: self.message.clone(),
            timestamp: self.timestamp.clone(),
        }
    }
}

/// A record read back from the durable log together with its append sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedMessage {
    pub seq: i64,
    pub record: MessageRecord,
}

/// Ordered, room-partitioned, append-only message log.
#[async_trait]
pub trait DurableLog: Send + Sync {
    /// Appends `record`, returning a sequence number strictly greater than any
    /// previously returned one.
    async fn append(&self, record: &MessageRecord) -> Result<i64, StoreError>;

    /// Every message of `room` in append order.
    async fn history(&self, room: &RoomId) -> Result<Vec<LoggedMessage>, StoreError>;
}

/// Remote best-effort copy of the message stream.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn append(&self, record: &MessageRecord) -> Result<(), StoreError>;
}
