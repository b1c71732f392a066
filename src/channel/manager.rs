use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identity of a single network session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Frame queued for delivery on a connection's socket
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Text(String),
    /// Ask the connection task to close the socket
    Close,
}

/// Connection handle held by the channel registry.
///
/// Frames go through a bounded queue. A subscriber that falls a full queue
/// behind is flagged as overflowed and its connection task closes it.
#[derive(Clone, Debug)]
pub struct Subscriber {
    pub id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    overflow: Arc<Notify>,
}

impl Subscriber {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            tx,
            overflow: Arc::new(Notify::new()),
        }
    }

    /// Queue a text frame. Returns false if the connection is gone or its
    /// queue is full.
    pub fn send(&self, message: &str) -> bool {
        self.push(Outbound::Text(message.to_string()))
    }

    /// Queue a close request for the connection
    pub fn close(&self) -> bool {
        self.push(Outbound::Close)
    }

    /// Resolves once a frame was refused because the queue was full
    pub async fn overflowed(&self) {
        self.overflow.notified().await
    }

    fn push(&self, frame: Outbound) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(connection_id = %self.id, "Send queue full, closing connection");
                // Stores a permit if the connection task is not waiting yet
                self.overflow.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Broadcast registry mapping channel names to subscribed connections.
///
/// Implementations must never suspend mid-mutation and must tolerate calls on
/// channels that do not exist.
pub trait ChannelManager: Send + Sync {
    /// Deliver `message` to every current subscriber of `channel`
    fn post(&self, channel: &str, message: &str);

    /// Subscribe a connection, creating the channel if absent.
    ///
    /// Returns the subscriber id assigned to this membership.
    fn add_listener(&self, subscriber: Subscriber, channel: &str) -> u64;

    /// Unsubscribe a connection; the channel entry is dropped once empty
    fn remove_listener(&self, id: ConnectionId, channel: &str);

    /// Number of live subscribers on `channel` (0 if the channel is absent)
    fn subscriber_count(&self, channel: &str) -> usize;

    /// Number of non-empty channels
    fn channel_count(&self) -> usize;
}

struct ChannelEntry {
    subscribers: HashMap<ConnectionId, Subscriber>,
    /// Last subscriber id handed out on this channel
    sequence: u64,
}

impl ChannelEntry {
    fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            sequence: 0,
        }
    }
}

/// In-memory channel registry. Nothing survives a restart.
pub struct InMemoryChannelManager {
    channels: DashMap<String, ChannelEntry>,
}

impl InMemoryChannelManager {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }
}

impl Default for InMemoryChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelManager for InMemoryChannelManager {
    fn post(&self, channel: &str, message: &str) {
        // Snapshot under the shard lock, send after releasing it
        let targets: Vec<Subscriber> = match self.channels.get(channel) {
            Some(entry) => entry.subscribers.values().cloned().collect(),
            None => return,
        };

        for subscriber in targets {
            if !subscriber.send(message) {
                debug!(connection_id = %subscriber.id, channel = %channel, "Frame not delivered to subscriber");
            }
        }
    }

    fn add_listener(&self, subscriber: Subscriber, channel: &str) -> u64 {
        let mut entry = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(ChannelEntry::new);

        entry.sequence += 1;
        entry.subscribers.insert(subscriber.id, subscriber);
        entry.sequence
    }

    fn remove_listener(&self, id: ConnectionId, channel: &str) {
        if let Some(mut entry) = self.channels.get_mut(channel) {
            entry.subscribers.remove(&id);
        } else {
            return;
        }

        // Re-checked atomically: a concurrent add_listener keeps the entry alive
        self.channels
            .remove_if(channel, |_, entry| entry.subscribers.is_empty());
    }

    fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
