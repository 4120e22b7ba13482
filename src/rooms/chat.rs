use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
    auth::Identity,
    store::{DurableLog, LoggedMessage, MessageRecord, MirrorStore, StoreError},
};

use super::{ClientMessage, Delivery, Membership, OUTBOUND_QUEUE, Outbound, OutboundTx, Registry, RoomHandle};

/// The room engine shared by every session: registry plus both message stores.
#[derive(Clone)]
pub struct Chat {
    registry: Arc<Registry>,
    log: Arc<dyn DurableLog>,
    mirror: Arc<dyn MirrorStore>,
    outbound_queue: usize,
}

impl Chat {
    pub fn new(log: Arc<dyn DurableLog>, mirror: Arc<dyn MirrorStore>) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            log,
            mirror,
            outbound_queue: OUTBOUND_QUEUE,
        }
    }

    pub fn with_outbound_queue(mut self, depth: usize) -> Self {
        self.outbound_queue = depth.max(1);
        self
    }

    /// A fresh queue for one connection's outbound traffic.
    pub fn outbound_channel(&self) -> (OutboundTx, mpsc::Receiver<Outbound>) {
        mpsc::channel(self.outbound_queue)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn join(&self, identity: Identity, tx: OutboundTx) -> Membership {
        let membership = self.registry.assign(identity, tx);
        info!(
            room = %membership.room.id(),
            identity = %membership.identity,
            connection = %membership.connection,
            "seated"
        );
        membership
    }

    pub async fn history(&self, room: &RoomHandle) -> Result<Vec<LoggedMessage>, StoreError> {
        self.log.history(room.id()).await
    }

    /// Records the message durably, queues the mirror copy, then broadcasts.
    /// A durable failure drops the message before anyone sees it.
    pub async fn send(&self, membership: &Membership, incoming: ClientMessage) -> Result<Delivery, StoreError> {
        let record = MessageRecord {
            room: membership.room.id().clone(),
            sender: membership.identity.to_string(),
            message: incoming.message,
            timestamp: incoming.timestamp,
        };

        let _turn = membership.room.take_turn().await;
        let seq = self.log.append(&record).await?;
        let delivery = self.registry.broadcast(&membership.room, seq, &record.to_chat());
        self.mirror_in_background(record);

        if !delivery.failed.is_empty() {
            info!(room = %membership.room.id(), evicted = ?delivery.failed, "recipients could not keep up");
        }
        Ok(delivery)
    }

    fn mirror_in_background(&self, record: MessageRecord) {
        let mirror = self.mirror.clone();
        tokio::spawn(async move {
            if let Err(e) = mirror.append(&record).await {
                warn!(room = %record.room, error = %e, "mirror store append failed");
            }
        });
    }

    /// Returns whether the room was torn down.
    pub fn leave(&self, membership: &Membership) -> bool {
        let torn_down = self.registry.remove_from_room(&membership.room, membership.connection);
        info!(
            room = %membership.room.id(),
            connection = %membership.connection,
            torn_down,
            "left"
        );
        torn_down
    }
}
