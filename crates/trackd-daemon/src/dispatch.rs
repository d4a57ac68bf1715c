//! Command registry and dispatch boundary.
//!
//! Handlers are registered once at startup into a name-to-handler map; the
//! map is never mutated after the server starts, so dispatch needs no
//! locking and concurrent dispatches for different connections cannot
//! interfere.
//!
//! Every handler failure is absorbed here and converted into an error
//! response; a handler can never take down the connection loop that called
//! it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use trackd_proto::{JsonMap, Request, Response};

use crate::context::ServerContext;
use crate::fetch::FetchError;
use crate::store::StoreError;

/// Failures a command handler can report.
///
/// Both variants become error responses; the distinction exists so handlers
/// can phrase parameter problems separately from collaborator failures.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Missing or invalid command parameters.
    #[error("{0}")]
    InvalidParams(String),

    /// The operation ran and failed, or the collaborator returned nothing.
    #[error("{0}")]
    OperationFailed(String),
}

impl From<FetchError> for HandlerError {
    fn from(error: FetchError) -> Self {
        Self::OperationFailed(error.to_string())
    }
}

impl From<StoreError> for HandlerError {
    fn from(error: StoreError) -> Self {
        Self::OperationFailed(error.to_string())
    }
}

/// A registered command implementation.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Execute the command against the given parameters.
    async fn handle(&self, params: &JsonMap, ctx: &ServerContext)
    -> Result<JsonMap, HandlerError>;
}

/// Name-to-handler map, read-only after startup.
#[derive(Default, Clone)]
pub struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`.
    ///
    /// Registration always succeeds (a trait object is always invocable);
    /// registering a name twice replaces the earlier handler, last write
    /// wins. Returns `true` when an earlier registration was replaced.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) -> bool {
        let name = name.into();
        let replaced = self.handlers.insert(name.clone(), handler).is_some();
        if replaced {
            debug!(command = %name, "replaced existing command handler");
        }
        replaced
    }

    /// Command names currently registered.
    #[must_use]
    pub fn command_names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Dispatch a parsed request and wrap the outcome into a response.
    ///
    /// The response echoes the request's id verbatim, including for unknown
    /// commands and handler failures.
    pub async fn dispatch(&self, request: &Request, ctx: &ServerContext) -> Response {
        let Some(handler) = self.handlers.get(&request.command) else {
            return Response::error(
                format!("Unknown command: {}", request.command),
                Some(request.id.clone()),
            );
        };

        match handler.handle(&request.params, ctx).await {
            Ok(data) => Response::success(request.id.clone(), data),
            Err(error) => Response::error(
                format!("Error processing {}: {error}", request.command),
                Some(request.id.clone()),
            ),
        }
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.command_names())
            .finish()
    }
}
