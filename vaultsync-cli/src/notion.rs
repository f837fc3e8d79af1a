//! Blocking Notion REST client behind the async [`Fetcher`] seam.
//!
//! Requests go through `ureq` on the blocking pool. HTTP failures are mapped
//! onto [`UpstreamError`] so the sync layer can tell retryable from fatal.

use std::time::Duration;

use serde_json::{json, Value};

use vaultsync_core::config::SourceConfig;
use vaultsync_core::{Block, BlockKind, ContentTree, ItemId, ItemSummary};
use vaultsync_sync::{async_trait, Fetcher, ItemPage, ListQuery, UpstreamError};

/// Children per block-children request; the API maximum.
const CHILDREN_PAGE_SIZE: usize = 100;

#[derive(Clone)]
pub struct NotionClient {
    agent: ureq::Agent,
    base_url: String,
    token: String,
    version: String,
    database_id: String,
}

impl NotionClient {
    pub fn from_config(source: &SourceConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(source.timeout_secs.max(1)))
            .user_agent(concat!("vaultsync/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            base_url: source.base_url.trim_end_matches('/').to_string(),
            token: source.api_token.clone(),
            version: source.api_version.clone(),
            database_id: source.database_id.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        self.agent
            .request(method, &self.url(path))
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Notion-Version", &self.version)
    }

    fn get(&self, path: &str) -> Result<Value, UpstreamError> {
        tracing::debug!(path, "GET");
        read_response(self.request("GET", path).call())
    }

    fn post(&self, path: &str, body: Value) -> Result<Value, UpstreamError> {
        tracing::debug!(path, "POST");
        read_response(self.request("POST", path).send_json(body))
    }

    fn query_database(&self, query: &ListQuery) -> Result<ItemPage, UpstreamError> {
        let response = self.post(
            &format!("databases/{}/query", self.database_id),
            query_body(query),
        )?;
        page_from_response(&response)
    }

    fn page(&self, id: &ItemId) -> Result<ItemSummary, UpstreamError> {
        let response = self.get(&format!("pages/{id}"))?;
        Ok(ItemSummary::from_api(&response)?)
    }

    /// All children of `block_id`, following cursors and descending into
    /// nested blocks. Child pages and databases are separate items and are
    /// not expanded.
    fn block_children(&self, block_id: &str) -> Result<Vec<Block>, UpstreamError> {
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut path = format!("blocks/{block_id}/children?page_size={CHILDREN_PAGE_SIZE}");
            if let Some(c) = &cursor {
                path.push_str(&format!("&start_cursor={c}"));
            }
            let response = self.get(&path)?;
            for raw in response
                .get("results")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
            {
                let mut block = Block::from_api(raw);
                if block.has_children && expands(&block.kind) {
                    block.children = self.block_children(&block.id)?;
                }
                blocks.push(block);
            }
            match next_cursor(&response) {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        Ok(blocks)
    }

    fn content(&self, id: &ItemId) -> Result<ContentTree, UpstreamError> {
        let item = self.page(id)?;
        let blocks = self.block_children(&id.0)?;
        Ok(ContentTree::new(item, blocks))
    }

    /// Run a blocking call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, UpstreamError>
    where
        T: Send + 'static,
        F: FnOnce(NotionClient) -> Result<T, UpstreamError> + Send + 'static,
    {
        let client = self.clone();
        tokio::task::spawn_blocking(move || f(client))
            .await
            .map_err(|e| UpstreamError::Other(format!("request task failed: {e}")))?
    }
}

#[async_trait]
impl Fetcher for NotionClient {
    async fn test_connection(&self) -> Result<(), UpstreamError> {
        let database = self
            .blocking(|c| {
                let path = format!("databases/{}", c.database_id);
                c.get(&path)
            })
            .await?;
        let title = database
            .get("title")
            .and_then(Value::as_array)
            .and_then(|runs| runs.first())
            .and_then(|r| r.get("plain_text"))
            .and_then(Value::as_str)
            .unwrap_or("(untitled)");
        tracing::info!(database = title, "connected to database");
        Ok(())
    }

    async fn list_items(&self, query: &ListQuery) -> Result<ItemPage, UpstreamError> {
        let query = query.clone();
        self.blocking(move |c| c.query_database(&query)).await
    }

    async fn get_item_content(&self, id: &ItemId) -> Result<ContentTree, UpstreamError> {
        let id = id.clone();
        self.blocking(move |c| c.content(&id)).await
    }
}

fn expands(kind: &BlockKind) -> bool {
    !matches!(kind, BlockKind::ChildPage { .. } | BlockKind::ChildDatabase { .. })
}

fn query_body(query: &ListQuery) -> Value {
    let mut body = json!({ "page_size": query.page_size.clamp(1, 100) });
    if let Some(filter) = &query.filter {
        body["filter"] = filter.clone();
    }
    if let Some(sorts) = &query.sorts {
        body["sorts"] = sorts.clone();
    }
    if let Some(cursor) = &query.cursor {
        body["start_cursor"] = json!(cursor);
    }
    body
}

fn next_cursor(response: &Value) -> Option<String> {
    let has_more = response.get("has_more").and_then(Value::as_bool).unwrap_or(false);
    if !has_more {
        return None;
    }
    response
        .get("next_cursor")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Decode a database query response.
fn page_from_response(response: &Value) -> Result<ItemPage, UpstreamError> {
    let items = response
        .get("results")
        .and_then(Value::as_array)
        .map(|results| results.iter().map(ItemSummary::from_api).collect::<Result<Vec<_>, _>>())
        .transpose()?
        .unwrap_or_default();
    let next_cursor = next_cursor(response);
    Ok(ItemPage {
        items,
        has_more: next_cursor.is_some(),
        next_cursor,
    })
}

fn read_response(response: Result<ureq::Response, ureq::Error>) -> Result<Value, UpstreamError> {
    match response {
        Ok(resp) => resp
            .into_json::<Value>()
            .map_err(|e| UpstreamError::Other(format!("invalid JSON response: {e}"))),
        Err(ureq::Error::Status(code, resp)) => {
            let retry_after = resp.header("Retry-After").and_then(parse_retry_after);
            let body = resp.into_string().unwrap_or_default();
            Err(classify_status(code, retry_after, &error_message(&body)))
        }
        Err(ureq::Error::Transport(t)) => {
            let message = t.to_string();
            if message.contains("timed out") {
                Err(UpstreamError::Timeout(message))
            } else {
                Err(UpstreamError::Unavailable(message))
            }
        }
    }
}

/// Map an HTTP error status onto the sync error taxonomy.
fn classify_status(code: u16, retry_after: Option<Duration>, message: &str) -> UpstreamError {
    match code {
        429 => UpstreamError::RateLimited { retry_after },
        401 | 403 => UpstreamError::Auth(format!("HTTP {code}: {message}")),
        404 => UpstreamError::NotFound(message.to_string()),
        408 => UpstreamError::Timeout(format!("HTTP {code}: {message}")),
        500..=599 => UpstreamError::Unavailable(format!("HTTP {code}: {message}")),
        _ => UpstreamError::Other(format!("HTTP {code}: {message}")),
    }
}

fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

/// The API's `message` field, or the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
