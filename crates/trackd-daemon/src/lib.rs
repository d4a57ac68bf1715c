//! trackd daemon: media fetches over a Unix domain socket.
//!
//! The daemon accepts framed JSON requests (see [`trackd_proto`]),
//! dispatches them to registered command handlers, and pushes asynchronous
//! progress events to every connected client.
//!
//! # Architecture
//!
//! ```text
//! accept loop ──► per-client connection task ──► dispatch ──► handlers
//!                         │                                     │
//!                         ▼                                     ▼
//!                  live-client registry ◄── broadcaster ◄── collaborators
//!                                                        (fetcher, catalog)
//! ```
//!
//! - [`server`]: socket lifecycle, accept loop
//! - [`connection`]: per-client read-dispatch-write loop with adaptive
//!   timeouts
//! - [`clients`]: per-client state and the live-client registry
//! - [`dispatch`]: command registry and the handler error boundary
//! - [`handlers`]: built-in commands
//! - [`broadcast`]: channel-fed event fan-out
//! - [`playlist`]: playlist download engine (blocking and streaming)
//! - [`fetch`]: media-fetch collaborator boundary and the `yt-dlp` impl
//! - [`store`]: sqlite song/playlist catalog
//! - [`progress`]: streaming-download progress table
//! - [`config`]: daemon configuration

pub mod broadcast;
pub mod clients;
pub mod config;
pub mod connection;
pub mod context;
pub mod dispatch;
pub mod fetch;
pub mod handlers;
pub mod playlist;
pub mod progress;
pub mod server;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

pub use broadcast::EventPublisher;
pub use config::{DaemonConfig, default_socket_path};
pub use context::ServerContext;
pub use dispatch::{CommandHandler, CommandRegistry, HandlerError};
pub use fetch::{MediaFetcher, YtDlpFetcher};
pub use server::{Server, ServerError};
pub use store::Store;
