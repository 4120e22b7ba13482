//! In-memory room registry.
//!
//! Matching, membership changes, and broadcast enumeration all happen under one
//! lock, so a room can never be matched into after it was torn down and never
//! gains a third member. Nothing awaits while the lock is held.

use std::{
    collections::{BTreeMap, btree_map::Entry},
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{
    Mutex as TurnLock, MutexGuard,
    mpsc::{self, error::TrySendError},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::Identity;

use super::msg::ChatMessage;

pub const ROOM_CAPACITY: usize = 2;

/// Default depth of a connection's outbound queue. A recipient that falls this
/// far behind is evicted.
pub const OUTBOUND_QUEUE: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    fn numbered(number: u64) -> Self {
        RoomId(format!("room{number}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        RoomId(id.to_owned())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        ConnectionId(Uuid::now_v7())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// What a session's writer task is asked to put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A live chat message with its durable log sequence.
    Chat { seq: i64, message: ChatMessage },
    Close { code: u16, reason: &'static str },
}

pub type OutboundTx = mpsc::Sender<Outbound>;

struct Member {
    id: ConnectionId,
    identity: Identity,
    tx: OutboundTx,
    evicted: CancellationToken,
}

struct Room {
    id: RoomId,
    members: Vec<Member>,
    turn: Arc<TurnLock<()>>,
}

impl Room {
    fn new(number: u64) -> Self {
        Room {
            id: RoomId::numbered(number),
            members: Vec::with_capacity(ROOM_CAPACITY),
            turn: Arc::new(TurnLock::new(())),
        }
    }

    fn has_seat(&self) -> bool {
        self.members.len() < ROOM_CAPACITY
    }
}

/// A reference to a live (or since torn down) room held by one of its members.
#[derive(Clone)]
pub struct RoomHandle {
    number: u64,
    id: RoomId,
    turn: Arc<TurnLock<()>>,
}

impl RoomHandle {
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Serializes append-then-broadcast within the room so that delivery order
    /// matches durable log order.
    pub async fn take_turn(&self) -> MutexGuard<'_, ()> {
        self.turn.lock().await
    }
}

impl fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("RoomHandle").field(&self.id).finish()
    }
}

/// One connection's seat in a room.
#[derive(Debug, Clone)]
pub struct Membership {
    pub connection: ConnectionId,
    pub identity: Identity,
    pub room: RoomHandle,
    /// Cancelled when a broadcast could not reach this connection and the
    /// registry dropped it from the room.
    pub evicted: CancellationToken,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: Vec<ConnectionId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub members: Vec<Identity>,
}

#[derive(Default)]
struct Rooms {
    created: u64,
    // keyed by creation number, so iteration is creation order
    live: BTreeMap<u64, Room>,
}

impl Rooms {
    fn next_number(&mut self) -> u64 {
        self.created += 1;
        self.created
    }

    fn add_to_room(&mut self, number: u64, member: Member) -> RoomHandle {
        let room = self.live.entry(number).or_insert_with(|| Room::new(number));
        debug_assert!(room.has_seat());
        room.members.push(member);

        RoomHandle {
            number,
            id: room.id.clone(),
            turn: room.turn.clone(),
        }
    }
}

/// First room, in creation order, with a free seat.
fn first_fit(live: &BTreeMap<u64, Room>) -> Option<u64> {
    live.iter()
        .find(|(_, room)| room.has_seat())
        .map(|(number, _)| *number)
}

#[derive(Default)]
pub struct Registry {
    rooms: Mutex<Rooms>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seats `identity` in the first room with space, creating a room when
    /// every existing one is full.
    pub fn assign(&self, identity: Identity, tx: OutboundTx) -> Membership {
        let connection = ConnectionId::new();
        let evicted = CancellationToken::new();
        let mut rooms = self.rooms.lock();

        let number = match first_fit(&rooms.live) {
            Some(number) => number,
            None => rooms.next_number(),
        };
        let room = rooms.add_to_room(number, Member {
            id: connection,
            identity: identity.clone(),
            tx,
            evicted: evicted.clone(),
        });

        Membership { connection, identity, room, evicted }
    }

    /// Removes the connection from its room, deleting the room if that left it
    /// empty. Returns whether the room was torn down.
    pub fn remove_from_room(&self, room: &RoomHandle, connection: ConnectionId) -> bool {
        let mut rooms = self.rooms.lock();

        let Entry::Occupied(mut entry) = rooms.live.entry(room.number) else {
            return false;
        };
        entry.get_mut().members.retain(|member| member.id != connection);
        if entry.get().members.is_empty() {
            entry.remove();
            return true;
        }
        false
    }

    /// Hands `message` to every current member of the room, sender included.
    ///
    /// A member whose queue is full or whose writer is gone is removed from the
    /// room on the spot and its `evicted` token is cancelled; the room is torn
    /// down if that empties it.
    pub fn broadcast(&self, room: &RoomHandle, seq: i64, message: &ChatMessage) -> Delivery {
        let mut rooms = self.rooms.lock();
        let mut delivery = Delivery::default();

        let Entry::Occupied(mut entry) = rooms.live.entry(room.number) else {
            return delivery;
        };
        entry.get_mut().members.retain(|member| {
            let outbound = Outbound::Chat { seq, message: message.clone() };
            match member.tx.try_send(outbound) {
                Ok(()) => {
                    delivery.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_) | TrySendError::Closed(_)) => {
                    member.evicted.cancel();
                    delivery.failed.push(member.id);
                    false
                }
            }
        });
        if entry.get().members.is_empty() {
            entry.remove();
        }
        delivery
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().live.len()
    }

    /// Live rooms in creation order.
    pub fn snapshot(&self) -> Vec<RoomSnapshot> {
        self.rooms
            .lock()
            .live
            .values()
            .map(|room| RoomSnapshot {
                id: room.id.clone(),
                members: room.members.iter().map(|m| m.identity.clone()).collect(),
            })
            .collect()
    }
}
