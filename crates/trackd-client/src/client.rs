//! Daemon socket client.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};
use trackd_proto::{
    EventMessage, FrameCodec, JsonMap, ProtocolError, Request, Response, ServerMessage,
    utc_timestamp,
};

/// Default deadline for one request/response round trip.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Interval for [`Client::spawn_keepalive`].
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(90);

type FrameSink = SplitSink<Framed<UnixStream, FrameCodec>, Bytes>;
type FrameStream = SplitStream<Framed<UnixStream, FrameCodec>>;
type PendingMap = Mutex<HashMap<String, oneshot::Sender<Response>>>;

/// Client-side errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connecting to the daemon socket failed.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The client is not connected.
    #[error("not connected to daemon")]
    NotConnected,

    /// The connection dropped while a request was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// No response arrived within the deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Framing or serialization failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Handle to a daemon connection.
///
/// Cheap to clone; all clones share one socket, one pending-request map,
/// and one event stream.
#[derive(Clone)]
pub struct Client {
    sink: Arc<tokio::sync::Mutex<FrameSink>>,
    pending: Arc<PendingMap>,
    events: Arc<Mutex<Option<mpsc::UnboundedReceiver<EventMessage>>>>,
    connected: Arc<AtomicBool>,
}

impl Client {
    /// Connect to the daemon socket at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] when the socket is missing or
    /// refuses the connection.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| ClientError::Connect {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(socket_path = %path.display(), "connected to daemon");

        let (sink, reader) = Framed::new(stream, FrameCodec::new()).split();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(listen(
            reader,
            Arc::clone(&pending),
            event_tx,
            Arc::clone(&connected),
        ));

        Ok(Self {
            sink: Arc::new(tokio::sync::Mutex::new(sink)),
            pending,
            events: Arc::new(Mutex::new(Some(event_rx))),
            connected,
        })
    }

    /// Returns `true` until the read side observes a close or error.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Take the broadcast-event receiver.
    ///
    /// Events arrive in the daemon's publish order. Returns `None` after
    /// the first call.
    #[must_use]
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EventMessage>> {
        lock(&self.events).take()
    }

    /// Issue a request and await its response with the default deadline.
    ///
    /// # Errors
    ///
    /// Fails on disconnect, timeout, or a write error. An error *response*
    /// is a successful round trip; inspect [`Response::status`].
    pub async fn request(&self, command: &str, params: JsonMap) -> Result<Response, ClientError> {
        self.request_with_timeout(command, params, REQUEST_TIMEOUT)
            .await
    }

    /// Issue a request with an explicit response deadline.
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    pub async fn request_with_timeout(
        &self,
        command: &str,
        params: JsonMap,
        deadline: Duration,
    ) -> Result<Response, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let request = Request::new(command, params);
        let payload = serde_json::to_vec(&request)
            .map_err(|error| ProtocolError::MalformedPayload(error.to_string()))?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request.id.clone(), tx);

        if let Err(error) = self.send_frame(Bytes::from(payload)).await {
            lock(&self.pending).remove(&request.id);
            return Err(error);
        }
        trace!(command, request_id = %request.id, "request sent");

        match timeout(deadline, rx).await {
            Ok(Ok(response)) => Ok(response),
            // The listener dropped the sender: connection is gone.
            Ok(Err(_closed)) => Err(ClientError::ConnectionClosed),
            Err(_elapsed) => {
                lock(&self.pending).remove(&request.id);
                Err(ClientError::Timeout(deadline))
            },
        }
    }

    /// Plain ping carrying the client's send time.
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    pub async fn ping(&self) -> Result<Response, ClientError> {
        let mut params = JsonMap::new();
        params.insert("timestamp".to_string(), utc_timestamp().into());
        self.request("ping", params).await
    }

    /// Keepalive ping: refreshes the server's idle clock for this
    /// connection without normal request logging on the daemon side.
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    pub async fn keepalive(&self) -> Result<Response, ClientError> {
        let mut params = JsonMap::new();
        params.insert("timestamp".to_string(), utc_timestamp().into());
        params.insert("keepalive".to_string(), true.into());
        self.request("ping", params).await
    }

    /// Spawn a background task sending keepalives every `interval`.
    ///
    /// The task ends on the first failed keepalive or once the connection
    /// closes.
    pub fn spawn_keepalive(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !client.is_connected() {
                    break;
                }
                match client.keepalive().await {
                    Ok(response) if response.is_success() => {
                        trace!("keepalive pong received");
                    },
                    Ok(response) => {
                        warn!(error = ?response.error, "keepalive rejected");
                    },
                    Err(error) => {
                        warn!(error = %error, "keepalive failed, stopping");
                        break;
                    },
                }
            }
        })
    }

    /// Close the write half; the daemon will observe EOF and drop the
    /// connection.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::Release);
        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
    }

    async fn send_frame(&self, payload: Bytes) -> Result<(), ClientError> {
        let mut sink = self.sink.lock().await;
        sink.send(payload).await.map_err(|error| {
            self.connected.store(false, Ordering::Release);
            ClientError::Protocol(error)
        })
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Read loop: route responses to pending requests and events to the event
/// channel.
async fn listen(
    mut reader: FrameStream,
    pending: Arc<PendingMap>,
    events: mpsc::UnboundedSender<EventMessage>,
    connected: Arc<AtomicBool>,
) {
    while let Some(item) = reader.next().await {
        let frame = match item {
            Ok(frame) => frame,
            Err(error) => {
                if connected.load(Ordering::Acquire) {
                    warn!(error = %error, "socket read error");
                }
                break;
            },
        };

        match serde_json::from_slice::<ServerMessage>(&frame) {
            Ok(ServerMessage::Response(response)) => {
                match lock(&pending).remove(&response.id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    },
                    None => debug!(response_id = %response.id, "unmatched response"),
                }
            },
            Ok(ServerMessage::Event(event)) => {
                let _ = events.send(event);
            },
            Err(error) => {
                warn!(error = %error, "unreadable daemon payload");
            },
        }
    }

    connected.store(false, Ordering::Release);
    // Dropping the senders wakes every in-flight request with
    // ConnectionClosed.
    lock(&pending).clear();
    debug!("listener stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
