//! UDS server lifecycle.
//!
//! [`Server`] owns the command registry, the live-client registry, the
//! event broadcaster, and the shared context; there is no process-global
//! state, so tests can run several independent servers side by side.
//!
//! # Socket Lifecycle
//!
//! `start` creates the socket's parent directory (mode 0700), removes a
//! stale socket file (refusing to unlink a path that is not a socket),
//! binds, and spawns the accept loop. The accept loop polls with a short
//! timeout so it observes the shutdown flag promptly instead of blocking in
//! accept. `stop` cancels everything, closes every live client, waits
//! bounded for the accept loop, and unlinks the socket file; stopping a
//! server that is not running returns `false` with no side effects.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::UnixListener;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trackd_proto::{FrameCodec, fresh_id};

use crate::broadcast::{Broadcaster, EventPublisher};
use crate::clients::{ClientConnection, ClientRegistry};
use crate::config::DaemonConfig;
use crate::connection::ConnectionTask;
use crate::context::ServerContext;
use crate::dispatch::{CommandHandler, CommandRegistry};
use crate::fetch::MediaFetcher;
use crate::handlers;
use crate::progress::ProgressTable;
use crate::store::Store;

/// Poll interval of the accept loop, so shutdown is observed promptly.
const ACCEPT_POLL: Duration = Duration::from_secs(1);

/// How long `stop` waits for the accept loop before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Server lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Could not create or fix up the socket's parent directory.
    #[error("failed to prepare socket directory for {path}: {source}")]
    PrepareSocket {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The socket path exists and is not a socket; refusing to unlink it.
    #[error("path {0} exists but is not a socket")]
    NotASocket(PathBuf),

    /// Binding the listener failed.
    #[error("failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

struct RunningServer {
    shutdown: CancellationToken,
    accept_task: tokio::task::JoinHandle<()>,
    socket_path: PathBuf,
}

/// The trackd daemon server.
pub struct Server {
    ctx: ServerContext,
    commands: CommandRegistry,
    clients: Arc<ClientRegistry>,
    broadcaster: std::sync::Mutex<Option<Broadcaster>>,
    state: tokio::sync::Mutex<Option<RunningServer>>,
}

impl Server {
    /// Build a server around its collaborators.
    ///
    /// Built-in commands are registered here; callers may add more through
    /// [`Server::register_handler`] before starting.
    #[must_use]
    pub fn new(config: DaemonConfig, fetcher: Arc<dyn MediaFetcher>, store: Arc<Store>) -> Self {
        let clients = Arc::new(ClientRegistry::new());
        let (events, broadcaster) = Broadcaster::channel(Arc::clone(&clients));

        let ctx = ServerContext {
            config,
            fetcher,
            store,
            events,
            progress: Arc::new(ProgressTable::new()),
        };

        let mut commands = CommandRegistry::new();
        handlers::register_defaults(&mut commands);

        Self {
            ctx,
            commands,
            clients,
            broadcaster: std::sync::Mutex::new(Some(broadcaster)),
            state: tokio::sync::Mutex::new(None),
        }
    }

    /// Register an additional command handler.
    ///
    /// Last registration for a name wins. Returns `true` when an earlier
    /// registration was replaced.
    pub fn register_handler(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> bool {
        self.commands.register(name, handler)
    }

    /// Shared context handed to handlers and background work.
    #[must_use]
    pub fn context(&self) -> &ServerContext {
        &self.ctx
    }

    /// Publisher for broadcast events.
    #[must_use]
    pub fn events(&self) -> &EventPublisher {
        &self.ctx.events
    }

    /// Socket path this server (will) listen on.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.ctx.config.socket_path
    }

    /// Number of currently connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Bind the socket and launch the accept loop.
    ///
    /// Returns `Ok(false)` without side effects when already running.
    ///
    /// # Errors
    ///
    /// Returns an error when the socket path cannot be prepared or bound.
    pub async fn start(&self) -> Result<bool, ServerError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            warn!("server already running");
            return Ok(false);
        }

        let socket_path = self.ctx.config.socket_path.clone();
        prepare_socket_path(&socket_path)?;

        let listener = UnixListener::bind(&socket_path).map_err(|source| ServerError::Bind {
            path: socket_path.clone(),
            source,
        })?;

        info!(
            socket_path = %socket_path.display(),
            max_connections = self.ctx.config.max_connections,
            "server listening"
        );

        // The broadcaster outlives individual start/stop cycles; it exits
        // only when every publisher handle is gone.
        if let Some(broadcaster) = self
            .broadcaster
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            tokio::spawn(broadcaster.run());
        }

        let shutdown = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.clients),
            Arc::new(self.commands.clone()),
            self.ctx.clone(),
            shutdown.clone(),
            self.ctx.config.max_connections,
        ));

        *state = Some(RunningServer {
            shutdown,
            accept_task,
            socket_path,
        });
        Ok(true)
    }

    /// Stop the server: close all clients, tear down the accept loop, and
    /// unlink the socket file.
    ///
    /// Idempotent: returns `false` without side effects when not running.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        let Some(running) = state.take() else {
            debug!("stop called while not running");
            return false;
        };

        running.shutdown.cancel();
        self.clients.close_all();

        let mut accept_task = running.accept_task;
        if timeout(SHUTDOWN_GRACE, &mut accept_task).await.is_err() {
            warn!("accept loop did not exit within grace period, aborting");
            accept_task.abort();
        }

        if let Err(error) = std::fs::remove_file(&running.socket_path) {
            if error.kind() != io::ErrorKind::NotFound {
                warn!(
                    socket_path = %running.socket_path.display(),
                    error = %error,
                    "could not remove socket file"
                );
            }
        }

        info!("server stopped");
        true
    }

    /// Returns `true` while the accept loop is running.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        // Best-effort cleanup when dropped while running.
        if let Ok(mut state) = self.state.try_lock() {
            if let Some(running) = state.take() {
                running.shutdown.cancel();
                let _ = std::fs::remove_file(&running.socket_path);
            }
        }
    }
}

/// Ensure the parent directory exists (mode 0700) and remove a stale
/// socket file.
fn prepare_socket_path(path: &Path) -> Result<(), ServerError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|source| ServerError::PrepareSocket {
                path: path.to_path_buf(),
                source,
            })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(0o700);
                std::fs::set_permissions(parent, perms).map_err(|source| {
                    ServerError::PrepareSocket {
                        path: path.to_path_buf(),
                        source,
                    }
                })?;
            }
        }
    }

    if path.exists() {
        let metadata =
            std::fs::symlink_metadata(path).map_err(|source| ServerError::PrepareSocket {
                path: path.to_path_buf(),
                source,
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if !metadata.file_type().is_socket() {
                return Err(ServerError::NotASocket(path.to_path_buf()));
            }
        }

        std::fs::remove_file(path).map_err(|source| ServerError::PrepareSocket {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "removed stale socket file");
    }

    Ok(())
}

async fn accept_loop(
    listener: UnixListener,
    clients: Arc<ClientRegistry>,
    commands: Arc<CommandRegistry>,
    ctx: ServerContext,
    shutdown: CancellationToken,
    max_connections: usize,
) {
    let permits = Arc::new(Semaphore::new(max_connections));

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let (stream, _addr) = match timeout(ACCEPT_POLL, listener.accept()).await {
            // Poll tick; go re-check the shutdown flag.
            Err(_elapsed) => continue,
            Ok(Ok(accepted)) => accepted,
            Ok(Err(error)) => {
                if shutdown.is_cancelled() {
                    break;
                }
                warn!(error = %error, "accept failed");
                continue;
            },
        };

        let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
            warn!(max_connections, "connection limit reached, rejecting client");
            continue;
        };

        let client_id = fresh_id();
        let (sink, reader) = Framed::new(stream, FrameCodec::new()).split();
        let client = Arc::new(ClientConnection::new(client_id, sink));
        clients.insert(Arc::clone(&client));

        let task = ConnectionTask::new(
            client,
            reader,
            Arc::clone(&clients),
            Arc::clone(&commands),
            ctx.clone(),
            shutdown.child_token(),
        );
        tokio::spawn(async move {
            let _permit = permit;
            task.run().await;
        });
    }

    debug!("accept loop terminated");
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::testutil::MockFetcher;

    fn test_server(dir: &TempDir) -> Server {
        let config = DaemonConfig {
            socket_path: dir.path().join("trackd.sock"),
            database_path: dir.path().join("trackd.db"),
            ..DaemonConfig::default()
        };
        Server::new(
            config,
            Arc::new(MockFetcher::default()),
            Arc::new(Store::open_in_memory().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_start_and_stop_manage_socket_file() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir);
        let socket_path = server.socket_path().to_path_buf();

        assert!(server.start().await.unwrap());
        assert!(server.is_running().await);
        assert!(socket_path.exists());

        assert!(server.stop().await);
        assert!(!server.is_running().await);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_start_refuses_when_running() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir);

        assert!(server.start().await.unwrap());
        assert!(!server.start().await.unwrap());
        assert!(server.stop().await);
    }

    #[tokio::test]
    async fn test_stop_when_not_running_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir);
        let socket_path = server.socket_path().to_path_buf();

        assert!(!server.stop().await);
        assert!(!socket_path.exists());

        // Stop after a full start/stop cycle is also a no-op.
        assert!(server.start().await.unwrap());
        assert!(server.stop().await);
        assert!(!server.stop().await);
    }

    #[tokio::test]
    async fn test_stale_socket_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir);
        let socket_path = server.socket_path().to_path_buf();

        // Leave a stale socket behind by starting a throwaway server and
        // forgetting to stop it cleanly.
        {
            let stale = test_server(&dir);
            assert!(stale.start().await.unwrap());
            let mut state = stale.state.lock().await;
            let running = state.take().unwrap();
            running.shutdown.cancel();
            let _ = running.accept_task.await;
        }
        assert!(socket_path.exists());

        assert!(server.start().await.unwrap());
        assert!(server.stop().await);
    }

    #[tokio::test]
    async fn test_refuses_non_socket_path() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir);
        std::fs::write(server.socket_path(), b"definitely a file").unwrap();

        let error = server.start().await.unwrap_err();
        assert!(matches!(error, ServerError::NotASocket(_)));
        // The offending file was left alone.
        assert!(server.socket_path().exists());
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir);

        assert!(server.start().await.unwrap());
        assert!(server.stop().await);
        assert!(server.start().await.unwrap());
        assert!(server.socket_path().exists());
        assert!(server.stop().await);
    }
}
