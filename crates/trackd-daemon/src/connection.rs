//! Per-client connection loop.
//!
//! Each accepted socket gets one task running this loop:
//! read a frame (bounded by an adaptive timeout), parse it, dispatch, write
//! the response. States per client: `Connecting → Active → (Idle) →
//! Closing → Closed`.
//!
//! # Error Handling
//!
//! - EOF or a framing error closes the connection without a response (the
//!   peer can no longer be reliably spoken to).
//! - A well-framed but malformed payload gets an error response with a
//!   fresh id and the connection stays active; one bad message does not
//!   kill the session.
//!
//! # Adaptive Timeouts
//!
//! A keepalive ping extends the read timeout to 10 minutes. After each
//! normal request the timeout is re-derived: 10 minutes while a keepalive
//! was seen within the last 5 minutes, 5 minutes otherwise. When a read
//! times out, the peer is dropped if its keepalive is older than 10 minutes
//! or it has been fully inactive for 5; otherwise the timeout tightens to
//! 2 minutes and the loop keeps waiting, so a slow-but-alive client gets
//! room without the server holding a half-dead socket forever.
//!
//! # Cleanup
//!
//! Eviction from the live-client registry is handled by a drop guard, so it
//! runs however the loop exits: clean close, protocol violation, server
//! shutdown, or panic.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::SplitStream;
use tokio::net::UnixStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use trackd_proto::{FrameCodec, Response, ServerMessage, parse_request};

use crate::clients::{ClientConnection, ClientRegistry};
use crate::context::ServerContext;
use crate::dispatch::CommandRegistry;
use crate::handlers::pong_data;

/// Read timeout while keepalives are fresh; also the initial timeout.
pub const READ_TIMEOUT_EXTENDED: Duration = Duration::from_secs(600);

/// Read timeout for connections without a recent keepalive.
pub const READ_TIMEOUT_SHRUNK: Duration = Duration::from_secs(300);

/// Tightened timeout after an inconclusive read timeout.
pub const READ_TIMEOUT_TIGHTENED: Duration = Duration::from_secs(120);

/// Keepalive age under which a session is considered actively maintained.
pub const KEEPALIVE_FRESH_WINDOW: Duration = Duration::from_secs(300);

/// Keepalive age beyond which a timed-out peer is presumed gone.
pub const KEEPALIVE_STALE_BOUND: Duration = Duration::from_secs(600);

/// Activity age beyond which a timed-out peer is reaped as idle.
pub const ACTIVITY_IDLE_BOUND: Duration = Duration::from_secs(300);

/// Read half of a framed client socket.
pub(crate) type FrameStream = SplitStream<Framed<UnixStream, FrameCodec>>;

/// One client's read-dispatch-write loop.
pub(crate) struct ConnectionTask {
    client: Arc<ClientConnection>,
    reader: FrameStream,
    registry: Arc<ClientRegistry>,
    commands: Arc<CommandRegistry>,
    ctx: ServerContext,
    shutdown: CancellationToken,
    read_timeout: Duration,
}

/// Removes the client from the registry however the task exits.
struct EvictionGuard {
    registry: Arc<ClientRegistry>,
    client_id: String,
}

impl Drop for EvictionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.client_id);
        info!(client_id = %self.client_id, "client disconnected");
    }
}

impl ConnectionTask {
    pub(crate) fn new(
        client: Arc<ClientConnection>,
        reader: FrameStream,
        registry: Arc<ClientRegistry>,
        commands: Arc<CommandRegistry>,
        ctx: ServerContext,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            reader,
            registry,
            commands,
            ctx,
            shutdown,
            read_timeout: READ_TIMEOUT_EXTENDED,
        }
    }

    pub(crate) async fn run(mut self) {
        let _guard = EvictionGuard {
            registry: Arc::clone(&self.registry),
            client_id: self.client.id.clone(),
        };
        info!(client_id = %self.client.id, "client connected");

        loop {
            let next = tokio::select! {
                () = self.shutdown.cancelled() => {
                    debug!(client_id = %self.client.id, "server shutting down, closing connection");
                    break;
                },
                read = timeout(self.read_timeout, self.reader.next()) => read,
            };

            match next {
                // Read timeout: decide between reaping and waiting tighter.
                Err(_elapsed) => {
                    if !self.handle_read_timeout() {
                        break;
                    }
                },

                // Clean EOF: peer hung up between frames.
                Ok(None) => {
                    debug!(client_id = %self.client.id, "peer closed connection");
                    break;
                },

                Ok(Some(Err(error))) => {
                    if error.is_connection_fatal() {
                        warn!(
                            client_id = %self.client.id,
                            error = %error,
                            "framing error, closing connection"
                        );
                        break;
                    }
                    let response = Response::error("Invalid request format", None);
                    if self.send(response.into()).await.is_err() {
                        break;
                    }
                },

                Ok(Some(Ok(frame))) => {
                    if !self.handle_frame(&frame).await {
                        break;
                    }
                },
            }
        }
    }

    /// Apply the timeout policy; returns `false` when the connection should
    /// close.
    fn handle_read_timeout(&mut self) -> bool {
        let keepalive_age = self.client.keepalive_age();
        if keepalive_age > KEEPALIVE_STALE_BOUND {
            info!(
                client_id = %self.client.id,
                keepalive_age_secs = keepalive_age.as_secs(),
                "no keepalive within bound, closing connection"
            );
            return false;
        }

        let activity_age = self.client.activity_age();
        if activity_age > ACTIVITY_IDLE_BOUND {
            info!(
                client_id = %self.client.id,
                activity_age_secs = activity_age.as_secs(),
                "connection idle, closing"
            );
            return false;
        }

        debug!(
            client_id = %self.client.id,
            "read timed out but keepalive is recent, tightening timeout"
        );
        self.read_timeout = READ_TIMEOUT_TIGHTENED;
        true
    }

    /// Process one frame; returns `false` when the connection should close.
    async fn handle_frame(&mut self, frame: &[u8]) -> bool {
        let Some(request) = parse_request(frame) else {
            debug!(client_id = %self.client.id, "malformed request payload");
            let response = Response::error("Invalid request format", None);
            return self.send(response.into()).await.is_ok();
        };

        self.client.touch_activity();

        // Keepalive fast path: refresh the idle clocks, extend the session,
        // and answer without dispatch-level logging.
        if request.is_keepalive() {
            self.client.touch_keepalive();
            self.read_timeout = READ_TIMEOUT_EXTENDED;
            trace!(client_id = %self.client.id, "keepalive ping");
            let response = Response::success(request.id.clone(), pong_data(&request.params));
            return self.send(response.into()).await.is_ok();
        }

        debug!(
            client_id = %self.client.id,
            command = %request.command,
            request_id = %request.id,
            "dispatching request"
        );
        let response = self.commands.dispatch(&request, &self.ctx).await;
        if self.send(response.into()).await.is_err() {
            return false;
        }

        self.read_timeout = if self.client.keepalive_age() <= KEEPALIVE_FRESH_WINDOW {
            READ_TIMEOUT_EXTENDED
        } else {
            READ_TIMEOUT_SHRUNK
        };
        true
    }

    async fn send(&self, message: ServerMessage) -> Result<(), ()> {
        if let Err(error) = self.client.send(&message).await {
            warn!(
                client_id = %self.client.id,
                error = %error,
                "failed to write to client"
            );
            return Err(());
        }
        Ok(())
    }
}
