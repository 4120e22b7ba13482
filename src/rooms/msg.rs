use serde::{Deserialize, Serialize};

use super::RoomId;

/// Sent once, right after a connection is seated.
#[derive(Debug, Serialize)]
pub struct RoomAssigned<'a> {
    #[serde(rename = "roomId")]
    pub room_id: &'a RoomId,
}

/// Shape shared by replayed history and live traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub message: String,
    pub timestamp: String,
}

/// What a client may send. Anything else in the payload, a `sender` included,
/// is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientMessage {
    pub message: String,
    pub timestamp: String,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
