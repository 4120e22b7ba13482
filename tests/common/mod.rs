//! Shared harness: an in-process server on an ephemeral port with an in-memory
//! database, and a thin WebSocket client.

#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use pairchat::{
    AppState,
    auth::{Identity, JwtAuth, Passwords},
    db,
    rooms::{Chat, ChatMessage, OUTBOUND_QUEUE, RoomSnapshot},
    router,
    store::{DisabledMirror, SqliteLog},
};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, protocol::CloseFrame},
};

pub const SECRET: &str = "integration-secret";
const WAIT: Duration = Duration::from_secs(2);

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with_queue(OUTBOUND_QUEUE).await
    }

    /// A server whose connections get outbound queues `depth` deep.
    pub async fn spawn_with_queue(depth: usize) -> Self {
        let db_pool = db::memory_pool().await.expect("memory database");
        let chat = Chat::new(Arc::new(SqliteLog::new(db_pool.clone())), Arc::new(DisabledMirror));
        let state = AppState {
            db_pool,
            jwt: JwtAuth::new(SECRET, time::Duration::minutes(5)),
            passwords: Passwords::new(4),
            chat: chat.with_outbound_queue(depth),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        TestServer { addr, state }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn token(&self, name: &str) -> String {
        self.state.jwt.issue(&Identity::from(name)).expect("issue token")
    }

    pub async fn connect_raw(&self, query: &str) -> TestClient {
        let url = format!("ws://{}/ws{query}", self.addr);
        let (ws, _) = connect_async(url).await.expect("websocket connect");
        TestClient { room: String::new(), ws }
    }

    /// Connects with a valid token and consumes the room assignment.
    pub async fn connect(&self, name: &str) -> TestClient {
        let mut client = self.connect_raw(&format!("?token={}", self.token(name))).await;
        let assigned = client.recv_json().await;
        client.room = assigned["roomId"].as_str().expect("roomId").to_owned();
        client
    }

    pub fn rooms(&self) -> Vec<RoomSnapshot> {
        self.state.chat.registry().snapshot()
    }

    pub async fn wait_for_rooms(&self, done: impl Fn(&[RoomSnapshot]) -> bool) {
        tokio::time::timeout(WAIT, async {
            while !done(&self.rooms()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("registry never reached the expected state");
    }
}

pub struct TestClient {
    pub room: String,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::text(text.to_owned())).await.expect("send");
    }

    pub async fn say(&mut self, message: &str, timestamp: &str) {
        let payload = serde_json::json!({ "message": message, "timestamp": timestamp });
        self.send_raw(&payload.to_string()).await;
    }

    async fn next_frame(&mut self) -> Option<Message> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Ok(message) => return Some(message),
                Err(_) => return None,
            }
        }
    }

    pub async fn recv_json(&mut self) -> serde_json::Value {
        let frame = tokio::time::timeout(WAIT, self.next_frame())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended");
        serde_json::from_str(frame.to_text().expect("text frame")).expect("json frame")
    }

    pub async fn recv_chat(&mut self) -> ChatMessage {
        serde_json::from_value(self.recv_json().await).expect("chat message")
    }

    /// Waits for the server's close frame.
    pub async fn recv_close(&mut self) -> CloseFrame {
        let frame = tokio::time::timeout(WAIT, self.next_frame())
            .await
            .expect("timed out waiting for close");
        match frame {
            Some(Message::Close(Some(frame))) => frame,
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    pub async fn expect_silence(&mut self) {
        let frame = tokio::time::timeout(Duration::from_millis(200), self.next_frame()).await;
        assert!(frame.is_err(), "expected nothing, got {frame:?}");
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

pub fn chat(sender: &str, message: &str, timestamp: &str) -> ChatMessage {
    ChatMessage {
        sender: sender.to_owned(),
        message: message.to_owned(),
        timestamp: timestamp.to_owned(),
    }
}
