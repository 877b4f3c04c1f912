//! Broadcast groups: per-room member sets and message fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use salon_core::{ConnectionId, Envelope, GroupKey};
use tracing::{debug, warn};

use crate::metrics::CHAT_BROADCAST_DROPS_TOTAL;
use crate::websocket::connection::ClientConnection;

/// Lifetime drops after which a slow client is evicted.
pub const DEFAULT_MAX_DROPPED_MESSAGES: u64 = 100;

/// Live membership of every broadcast group.
///
/// Member sets live in a sharded map, so operations on different groups do
/// not contend and mutations of one group are serialized by its shard lock.
/// Publishing snapshots the members and enqueues outside the lock.
pub struct GroupRegistry {
    groups: DashMap<GroupKey, HashMap<ConnectionId, Arc<ClientConnection>>>,
    max_dropped_messages: u64,
}

impl GroupRegistry {
    pub fn new(max_dropped_messages: u64) -> Self {
        Self {
            groups: DashMap::new(),
            max_dropped_messages: max_dropped_messages.max(1),
        }
    }

    /// Add a connection to a group, creating the group if needed.
    ///
    /// Returns `false` if the connection was already a member.
    pub fn join(&self, key: &GroupKey, connection: Arc<ClientConnection>) -> bool {
        let id = connection.id.clone();
        let mut members = self.groups.entry(key.clone()).or_default();
        if members.contains_key(&id) {
            return false;
        }
        let _ = members.insert(id, connection);
        true
    }

    /// Remove a connection from a group. Empty groups are dropped.
    ///
    /// Returns `false` if the connection or the group was absent.
    pub fn leave(&self, key: &GroupKey, id: &ConnectionId) -> bool {
        let removed = match self.groups.get_mut(key) {
            Some(mut members) => members.remove(id).is_some(),
            None => false,
        };
        let _ = self.groups.remove_if(key, |_, members| members.is_empty());
        removed
    }

    /// Deliver an envelope to every current member of a group.
    ///
    /// The envelope is encoded once and shared. A member whose queue is full
    /// or closed misses this message; once it has missed
    /// `max_dropped_messages` in total it is evicted. Returns how many
    /// members the message was enqueued for.
    pub fn publish(&self, key: &GroupKey, envelope: &Envelope) -> usize {
        let recipients: Vec<Arc<ClientConnection>> = match self.groups.get(key) {
            Some(members) => members.values().cloned().collect(),
            None => return 0,
        };

        let payload: Arc<str> = Arc::from(envelope.encode());
        let mut delivered = 0;
        for conn in &recipients {
            if conn.send(Arc::clone(&payload)) {
                delivered += 1;
                continue;
            }
            counter!(CHAT_BROADCAST_DROPS_TOTAL).increment(1);
            let drops = conn.drop_count();
            if drops >= self.max_dropped_messages {
                if !conn.is_evicted() {
                    warn!(conn_id = %conn.id, group = %key, drops, "evicting slow client");
                    conn.evict();
                }
            } else {
                warn!(conn_id = %conn.id, group = %key, total_drops = drops, "failed to deliver message (queue full or closed)");
            }
        }
        debug!(group = %key, recipients = recipients.len(), delivered, "published");
        delivered
    }

    pub fn member_count(&self, key: &GroupKey) -> usize {
        self.groups.get(key).map_or(0, |members| members.len())
    }

    pub fn is_member(&self, key: &GroupKey, id: &ConnectionId) -> bool {
        self.groups
            .get(key)
            .is_some_and(|members| members.contains_key(id))
    }

    /// Number of non-empty groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Members across all groups.
    pub fn connection_count(&self) -> usize {
        self.groups.iter().map(|entry| entry.value().len()).sum()
    }
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DROPPED_MESSAGES)
    }
}
