//! WebSocket client connection state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use salon_core::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Delivery handle for one connected client.
///
/// Outbound frames go through a bounded queue drained by the session's
/// writer task. Enqueueing never blocks: a full or closed queue counts as a
/// dropped message.
pub struct ClientConnection {
    pub id: ConnectionId,
    tx: mpsc::Sender<Arc<str>>,
    pub connected_at: Instant,
    /// Whether the client has shown activity since the last heartbeat check.
    is_alive: AtomicBool,
    dropped_messages: AtomicU64,
    /// Cancelled when the registry gives up on a slow consumer.
    evicted: CancellationToken,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id,
            tx,
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
            dropped_messages: AtomicU64::new(0),
            evicted: CancellationToken::new(),
        }
    }

    /// Enqueue a text frame for the client.
    ///
    /// Returns `false` if the queue is full or closed, and increments the
    /// dropped message counter.
    pub fn send(&self, message: Arc<str>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record client activity (pong, ping or data frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the client was active since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Signal the owning session to close this connection.
    pub fn evict(&self) {
        self.evicted.cancel();
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.is_cancelled()
    }

    /// Resolves once [`evict`](Self::evict) has been called.
    pub fn evicted(&self) -> WaitForCancellationFuture<'_> {
        self.evicted.cancelled()
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
