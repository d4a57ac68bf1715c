//! Per-client connection state and the live-client registry.
//!
//! A [`ClientConnection`] is created on accept and owned by that client's
//! connection task; the write half is shared so the broadcaster can push
//! events onto the same socket. The [`ClientRegistry`] is the single piece
//! of cross-connection shared mutable state: insertion on accept, removal
//! on close, and broadcast snapshots all go through one mutex.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use futures::stream::SplitSink;
use tokio::net::UnixStream;
use tokio::time::{Instant, timeout};
use tokio_util::codec::Framed;
use trackd_proto::{FrameCodec, ProtocolError, ServerMessage};

/// Deadline for writing one frame to a client.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(120);

/// Write half of a framed client socket.
pub type FrameSink = SplitSink<Framed<UnixStream, FrameCodec>, Bytes>;

#[derive(Debug, Clone, Copy)]
struct ActivityClock {
    last_activity: Instant,
    last_keepalive: Instant,
}

/// State for one accepted client connection.
pub struct ClientConnection {
    /// Unique client identifier, generated on accept.
    pub id: String,
    writer: tokio::sync::Mutex<FrameSink>,
    connected: AtomicBool,
    clock: Mutex<ActivityClock>,
}

impl ClientConnection {
    /// Create connection state around the write half of an accepted socket.
    #[must_use]
    pub fn new(id: String, writer: FrameSink) -> Self {
        let now = Instant::now();
        Self {
            id,
            writer: tokio::sync::Mutex::new(writer),
            connected: AtomicBool::new(true),
            clock: Mutex::new(ActivityClock {
                last_activity: now,
                last_keepalive: now,
            }),
        }
    }

    /// Write one framed message to this client, bounded by [`WRITE_TIMEOUT`].
    ///
    /// On any failure the client is marked disconnected so subsequent
    /// broadcasts skip it.
    ///
    /// # Errors
    ///
    /// Returns the protocol error that killed the write.
    pub async fn send(&self, message: &ServerMessage) -> Result<(), ProtocolError> {
        let payload = message.to_payload()?;
        let result = {
            let mut sink = self.writer.lock().await;
            match timeout(WRITE_TIMEOUT, sink.send(payload)).await {
                Ok(inner) => inner,
                Err(_) => Err(ProtocolError::Timeout {
                    operation: "write",
                    timeout: WRITE_TIMEOUT,
                }),
            }
        };

        if result.is_err() {
            self.mark_disconnected();
        }
        result
    }

    /// Returns `true` until a send failure or eviction marks this client
    /// gone.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Mark this client disconnected; broadcasts skip it from now on.
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Record request activity now.
    pub fn touch_activity(&self) {
        self.lock_clock().last_activity = Instant::now();
    }

    /// Record a keepalive now (also counts as activity).
    pub fn touch_keepalive(&self) {
        let mut clock = self.lock_clock();
        let now = Instant::now();
        clock.last_activity = now;
        clock.last_keepalive = now;
    }

    /// Time since the last request or keepalive.
    #[must_use]
    pub fn activity_age(&self) -> Duration {
        self.lock_clock().last_activity.elapsed()
    }

    /// Time since the last keepalive.
    #[must_use]
    pub fn keepalive_age(&self) -> Duration {
        self.lock_clock().last_keepalive.elapsed()
    }

    fn lock_clock(&self) -> std::sync::MutexGuard<'_, ActivityClock> {
        self.clock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// The live-client set.
///
/// One mutex guards the whole map: mutations are rare relative to
/// per-connection traffic, and the broadcaster only ever takes a snapshot,
/// never holds the lock across a socket write.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, Arc<ClientConnection>>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly accepted client.
    pub fn insert(&self, client: Arc<ClientConnection>) {
        self.lock().insert(client.id.clone(), client);
    }

    /// Remove a client on disconnect; idempotent.
    pub fn remove(&self, client_id: &str) {
        if let Some(client) = self.lock().remove(client_id) {
            client.mark_disconnected();
        }
    }

    /// Snapshot the current clients for iteration outside the lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.lock().values().cloned().collect()
    }

    /// Number of live clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when no clients are connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Mark every client disconnected and clear the set (server shutdown).
    pub fn close_all(&self) {
        let drained: Vec<_> = self.lock().drain().map(|(_, client)| client).collect();
        for client in drained {
            client.mark_disconnected();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<ClientConnection>>> {
        self.clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
