use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::rooms::RoomId;

use super::{DurableLog, LoggedMessage, MessageRecord, StoreError};

#[derive(Clone)]
pub struct SqliteLog {
    db_pool: SqlitePool,
}

impl SqliteLog {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl DurableLog for SqliteLog {
    async fn append(&self, record: &MessageRecord) -> Result<i64, StoreError> {
        let result = sqlx::query("INSERT INTO messages (room,sender,message,timestamp) VALUES (?,?,?,?)")
            .bind(record.room.as_str())
            .bind(&record.sender)
            .bind(&record.message)
            .bind(&record.timestamp)
            .execute(&self.db_pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    async fn history(&self, room: &RoomId) -> Result<Vec<LoggedMessage>, StoreError> {
        let rows: Vec<(i64, String, String, String)> =
            sqlx::query_as("SELECT id,sender,message,timestamp FROM messages WHERE room=? ORDER BY id")
                .bind(room.as_str())
                .fetch_all(&self.db_pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(seq, sender, message, timestamp)| LoggedMessage {
                seq,
                record: MessageRecord {
                    room: room.clone(),
                    sender,
                    message,
                    timestamp,
                },
            })
            .collect())
    }
}
