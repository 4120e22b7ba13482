mod chat;
mod msg;
mod registry;
mod session;
mod ws;

use axum::{Router, routing::get};

use crate::AppState;

pub use chat::Chat;
pub use msg::{ChatMessage, ClientMessage, RoomAssigned};
pub use registry::{
    ConnectionId, Delivery, Membership, OUTBOUND_QUEUE, Outbound, OutboundTx, ROOM_CAPACITY, Registry, RoomHandle, RoomId,
    RoomSnapshot,
};
pub use session::{Session, SessionEnd, SessionState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::room_ws))
}
