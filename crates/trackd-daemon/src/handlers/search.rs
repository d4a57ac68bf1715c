//! The `search` command.

use async_trait::async_trait;
use serde_json::json;
use trackd_proto::JsonMap;

use super::{bool_or, opt_u64, require_str};
use crate::context::ServerContext;
use crate::dispatch::{CommandHandler, HandlerError};

const DEFAULT_LIMIT: usize = 5;

/// Query a platform's search backend.
///
/// Empty results are a success with an empty `results` list, not an error.
pub struct SearchHandler;

#[async_trait]
impl CommandHandler for SearchHandler {
    async fn handle(&self, params: &JsonMap, ctx: &ServerContext) -> Result<JsonMap, HandlerError> {
        let query = require_str(params, "query", "Search query is required")?;
        let platform = params
            .get("platform")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("youtube");
        let limit = opt_u64(params, "limit").map_or(DEFAULT_LIMIT, |limit| limit as usize);
        let include_live = bool_or(params, "include_live", false);

        let hits = ctx
            .fetcher
            .search(query, platform, limit, include_live)
            .await?;

        let mut data = JsonMap::new();
        data.insert(
            "results".to_string(),
            serde_json::to_value(&hits)
                .map_err(|error| HandlerError::OperationFailed(error.to_string()))?,
        );
        data.insert("count".to_string(), json!(hits.len()));
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::SearchHit;
    use crate::testutil::{MockFetcher, test_context, test_context_with_fetcher};

    fn params(value: serde_json::Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    fn hit(title: &str) -> SearchHit {
        SearchHit {
            title: title.to_string(),
            url: format!("https://youtube.com/watch?v={title}"),
            duration: Some(200),
            uploader: "someone".to_string(),
            thumbnail: String::new(),
            platform: "https://youtube.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_query_is_invalid() {
        let ctx = test_context();
        let error = SearchHandler
            .handle(&JsonMap::new(), &ctx)
            .await
            .unwrap_err();
        assert!(error.to_string().contains("Search query is required"));
    }

    #[tokio::test]
    async fn test_results_returned() {
        let mut fetcher = MockFetcher::default();
        fetcher.search_hits = vec![hit("a"), hit("b")];
        let (ctx, _events) = test_context_with_fetcher(fetcher);

        let data = SearchHandler
            .handle(&params(json!({"query": "lofi"})), &ctx)
            .await
            .unwrap();
        assert_eq!(data["count"], json!(2));
        assert_eq!(data["results"].as_array().unwrap().len(), 2);
        assert_eq!(data["results"][0]["title"], json!("a"));
    }

    #[tokio::test]
    async fn test_empty_results_are_success() {
        let ctx = test_context();
        let data = SearchHandler
            .handle(&params(json!({"query": "nothing matches this"})), &ctx)
            .await
            .unwrap();
        assert_eq!(data["count"], json!(0));
        assert_eq!(data["results"], json!([]));
    }

    #[tokio::test]
    async fn test_limit_respected() {
        let mut fetcher = MockFetcher::default();
        fetcher.search_hits = (0..10).map(|i| hit(&format!("t{i}"))).collect();
        let (ctx, _events) = test_context_with_fetcher(fetcher);

        let data = SearchHandler
            .handle(&params(json!({"query": "q", "limit": 3})), &ctx)
            .await
            .unwrap();
        assert_eq!(data["results"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_collaborator_failure_surfaces_reason() {
        let mut fetcher = MockFetcher::default();
        fetcher.fail_with = Some("search backend exploded".to_string());
        let (ctx, _events) = test_context_with_fetcher(fetcher);

        let error = SearchHandler
            .handle(&params(json!({"query": "q"})), &ctx)
            .await
            .unwrap_err();
        assert!(error.to_string().contains("search backend exploded"));
    }
}
