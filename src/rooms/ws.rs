use axum::{
    debug_handler,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    response::IntoResponse,
};
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{Instrument, info, info_span, warn};

use crate::{
    AppState,
    auth::{AuthRejection, JwtAuth},
};

use super::{
    Chat, ChatMessage, ClientMessage, Membership, Outbound, OutboundTx, RoomAssigned,
    session::{Session, SessionEnd, SessionState},
};

/// How long a violating peer gets to receive its close frame.
const CLOSE_DRAIN: Duration = Duration::from_secs(2);

#[derive(Deserialize)]
pub(crate) struct WsQuery {
    token: Option<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn room_ws(
    Query(WsQuery { token }): Query<WsQuery>,
    State(jwt): State<JwtAuth>,
    State(chat): State<Chat>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(async move |socket| run(socket, token, jwt, chat).await)
}

async fn run(socket: WebSocket, token: Option<String>, jwt: JwtAuth, chat: Chat) {
    let mut session = Session::new();

    session.advance(SessionState::Authenticating);
    let identity = match jwt.verify(token.as_deref()) {
        Ok(identity) => identity,
        Err(rejection) => {
            session.advance(SessionState::Closing);
            info!(end = %SessionEnd::Rejected(rejection), "connection refused");
            reject(socket, rejection).await;
            session.advance(SessionState::Closed);
            return;
        }
    };

    session.advance(SessionState::Matching);
    let (tx, rx) = chat.outbound_channel();
    let membership = chat.join(identity, tx.clone());

    let span = info_span!(
        "session",
        connection = %membership.connection,
        identity = %membership.identity,
        room = %membership.room.id(),
    );
    async move {
        let end = drive(&mut session, socket, &chat, &membership, tx, rx).await;
        info!(%end, "session ending");

        session.advance(SessionState::Closing);
        chat.leave(&membership);
        session.advance(SessionState::Closed);
    }
    .instrument(span)
    .await
}

async fn reject(mut socket: WebSocket, rejection: AuthRejection) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: rejection.reason().into(),
        })))
        .await;
}

/// Replays history, then runs the receive loop until something ends it.
async fn drive(
    session: &mut Session,
    socket: WebSocket,
    chat: &Chat,
    membership: &Membership,
    tx: OutboundTx,
    rx: mpsc::Receiver<Outbound>,
) -> SessionEnd {
    session.advance(SessionState::Replaying);
    let (mut sink, mut stream) = socket.split();
    let replayed_through = match replay(chat, membership, &mut sink).await {
        Ok(seq) => seq,
        Err(end) => return end,
    };

    session.advance(SessionState::Active);
    let mut writer = tokio::spawn(write_live(sink, rx, replayed_through));

    let end = loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                None | Some(Ok(Message::Close(_))) => break SessionEnd::PeerClosed,
                Some(Err(e)) => break SessionEnd::Transport(e),
                Some(Ok(Message::Text(text))) => match ClientMessage::parse(text.as_str()) {
                    Ok(incoming) => {
                        if let Err(e) = chat.send(membership, incoming).await {
                            warn!(error = %e, "message dropped");
                        }
                    }
                    Err(e) => break SessionEnd::ProtocolViolation(e.to_string()),
                },
                Some(Ok(Message::Binary(_))) => {
                    break SessionEnd::ProtocolViolation("binary frame".to_owned());
                }
                Some(Ok(_)) => {}
            },
            _ = &mut writer => break SessionEnd::DeliveryFailed,
            _ = membership.evicted.cancelled() => break SessionEnd::DeliveryFailed,
        }
    };

    if let SessionEnd::ProtocolViolation(_) = end {
        // a full queue means the peer is not reading, so the close is skipped
        let queued = tx.try_send(Outbound::Close {
            code: close_code::INVALID,
            reason: "Invalid payload",
        });
        if queued.is_ok() && tokio::time::timeout(CLOSE_DRAIN, &mut writer).await.is_ok() {
            return end;
        }
    }
    writer.abort();
    end
}

/// Sends the room assignment and the room's stored history. Returns the last
/// replayed sequence so that live copies of the same messages can be skipped.
async fn replay<S>(chat: &Chat, membership: &Membership, sink: &mut S) -> Result<i64, SessionEnd>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let assigned = serde_json::to_string(&RoomAssigned { room_id: membership.room.id() })?;
    sink.send(Message::Text(assigned.into())).await?;

    let history = match chat.history(&membership.room).await {
        Ok(history) => history,
        Err(e) => {
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::ERROR,
                    reason: "History unavailable".into(),
                })))
                .await;
            return Err(SessionEnd::History(e));
        }
    };

    let mut replayed_through = 0;
    for logged in history {
        sink.send(chat_frame(&logged.record.to_chat())?).await?;
        replayed_through = logged.seq;
    }
    Ok(replayed_through)
}

fn chat_frame(message: &ChatMessage) -> Result<Message, serde_json::Error> {
    Ok(Message::Text(serde_json::to_string(message)?.into()))
}

fn already_replayed(outbound: &Outbound, replayed_through: i64) -> bool {
    matches!(outbound, Outbound::Chat { seq, .. } if *seq <= replayed_through)
}

/// Drains the connection's outbound queue into the socket. Ending this task
/// (a failed write) is what tells the session its peer is gone.
async fn write_live<S>(mut sink: S, mut rx: mpsc::Receiver<Outbound>, replayed_through: i64) -> S
where
    S: Sink<Message> + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        if already_replayed(&outbound, replayed_through) {
            continue;
        }

        let frame = match outbound {
            Outbound::Chat { message, .. } => match chat_frame(&message) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "unencodable message");
                    continue;
                }
            },
            Outbound::Close { code, reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
                    .await;
                break;
            }
        };

        if sink.send(frame).await.is_err() {
            break;
        }
    }
    sink
}

#[cfg(test)]
mod tests {
    use std::{convert::Infallible, sync::Arc};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::{
        auth::Identity,
        db,
        rooms::RoomId,
        store::{DisabledMirror, DurableLog, LoggedMessage, MessageRecord, SqliteLog, StoreError},
    };

    /// A log whose history read parks until released, so sends can land while
    /// a joiner is between registration and replay.
    struct GatedLog {
        inner: SqliteLog,
        reading: Notify,
        release: Notify,
    }

    #[async_trait]
    impl DurableLog for GatedLog {
        async fn append(&self, record: &MessageRecord) -> Result<i64, StoreError> {
            self.inner.append(record).await
        }

        async fn history(&self, room: &RoomId) -> Result<Vec<LoggedMessage>, StoreError> {
            self.reading.notify_one();
            self.release.notified().await;
            self.inner.history(room).await
        }
    }

    fn said(message: &str) -> ClientMessage {
        ClientMessage { message: message.to_owned(), timestamp: "t".to_owned() }
    }

    fn live(seq: i64) -> Outbound {
        Outbound::Chat {
            seq,
            message: ChatMessage {
                sender: "a".to_owned(),
                message: "m".to_owned(),
                timestamp: "t".to_owned(),
            },
        }
    }

    #[test]
    fn live_copies_of_replayed_messages_are_skipped() {
        assert!(already_replayed(&live(3), 3));
        assert!(already_replayed(&live(1), 3));
        assert!(!already_replayed(&live(4), 3));
        assert!(!already_replayed(&live(1), 0));
    }

    #[test]
    fn close_is_never_skipped() {
        let close = Outbound::Close { code: close_code::INVALID, reason: "Invalid payload" };
        assert!(!already_replayed(&close, i64::MAX));
    }

    #[tokio::test]
    async fn send_during_replay_reaches_the_joiner_once_in_log_order() {
        let log = Arc::new(GatedLog {
            inner: SqliteLog::new(db::memory_pool().await.unwrap()),
            reading: Notify::new(),
            release: Notify::new(),
        });
        let chat = Chat::new(log.clone(), Arc::new(DisabledMirror));

        let (ta, _ra) = chat.outbound_channel();
        let alice = chat.join(Identity::from("alice"), ta);
        let (tj, rj) = chat.outbound_channel();
        let joiner = chat.join(Identity::from("joe"), tj);

        let mut sink = Vec::<Message>::new().sink_map_err(|never: Infallible| -> axum::Error { match never {} });
        let (replayed, sent) = tokio::join!(replay(&chat, &joiner, &mut sink), async {
            log.reading.notified().await;
            let sent = chat.send(&alice, said("during replay")).await;
            log.release.notify_one();
            sent
        });
        assert_eq!(sent.unwrap().delivered, 2);
        let replayed_through = replayed.unwrap();

        chat.send(&alice, said("after replay")).await.unwrap();
        chat.leave(&alice);
        chat.leave(&joiner);

        let frames = write_live(sink, rj, replayed_through).await.into_inner();
        let texts: Vec<&str> = frames
            .iter()
            .map(|frame| match frame {
                Message::Text(text) => text.as_str(),
                other => panic!("unexpected frame {other:?}"),
            })
            .collect();

        assert_eq!(texts[0], r#"{"roomId":"room1"}"#);
        let seen: Vec<String> = texts[1..]
            .iter()
            .map(|text| serde_json::from_str::<ChatMessage>(text).unwrap().message)
            .collect();
        assert_eq!(seen, ["during replay", "after replay"]);
    }
}
