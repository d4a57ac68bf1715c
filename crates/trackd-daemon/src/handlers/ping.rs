//! The `ping` command.

use async_trait::async_trait;
use serde_json::json;
use trackd_proto::{JsonMap, utc_timestamp};

use crate::context::ServerContext;
use crate::dispatch::{CommandHandler, HandlerError};

/// Build pong data for a ping's parameters.
///
/// Shared with the connection loop's keepalive fast path, so a keepalive
/// ping answered without going through dispatch carries the same shape
/// (including `keepalive: true`) as one dispatched normally.
#[must_use]
pub fn pong_data(params: &JsonMap) -> JsonMap {
    let mut data = JsonMap::new();
    data.insert("message".to_string(), json!("pong"));
    data.insert(
        "timestamp".to_string(),
        json!(
            params
                .get("timestamp")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("none")
        ),
    );
    data.insert("server_time".to_string(), json!(utc_timestamp()));
    if params
        .get("keepalive")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
    {
        data.insert("keepalive".to_string(), json!(true));
    }
    data
}

/// Echo a pong with the client's timestamp and the server time.
pub struct PingHandler;

#[async_trait]
impl CommandHandler for PingHandler {
    async fn handle(
        &self,
        params: &JsonMap,
        _ctx: &ServerContext,
    ) -> Result<JsonMap, HandlerError> {
        Ok(pong_data(params))
    }
}
