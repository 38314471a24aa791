//! Production [`SearchBackend`] adapter over the inverted-index service's
//! HTTP API. The exact wire dialect is a Non-goal (§2); this speaks the
//! conventional ES-like shape (`_search`, `_msearch`, `_search/scroll`,
//! `_bulk`) that §6's RPC names are drawn from, grounded on the
//! `reqwest::Client` usage in `jlon-starrocks-admin`'s `StarRocksClient`.
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};

use crate::error::{AnalyzerError, Result};
use crate::model::SearchHit;

use super::{BulkOp, ScrollPage, SearchBackend};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn parse_hits(body: &Value) -> Result<Vec<SearchHit>> {
        let raw_hits = body
            .get("hits")
            .and_then(|h| h.get("hits"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut hits = Vec::with_capacity(raw_hits.len());
        for raw in raw_hits {
            let source = raw.get("_source").cloned().unwrap_or(Value::Null);
            let hit: SearchHit = serde_json::from_value(source)?;
            hits.push(hit);
        }
        Ok(hits)
    }

    fn scroll_id(body: &Value) -> Option<String> {
        body.get("_scroll_id").and_then(Value::as_str).map(str::to_string)
    }
}

impl SearchBackend for HttpBackend {
    fn index_exists<'a>(&'a self, index: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let resp = self.http.head(self.url(index)).send().await?;
            Ok(resp.status().is_success())
        })
    }

    fn search<'a>(&'a self, index: &'a str, body: Value) -> BoxFuture<'a, Result<Vec<SearchHit>>> {
        Box::pin(async move {
            let resp = self
                .http
                .post(self.url(&format!("{index}/_search")))
                .json(&body)
                .send()
                .await?
                .error_for_status()
                .map_err(|e| AnalyzerError::Backend {
                    index: index.to_string(),
                    message: e.to_string(),
                })?;
            let parsed: Value = resp.json().await?;
            Self::parse_hits(&parsed)
        })
    }

    fn msearch<'a>(
        &'a self,
        requests: Vec<(String, Value)>,
    ) -> BoxFuture<'a, Result<Vec<Vec<SearchHit>>>> {
        Box::pin(async move {
            let mut ndjson = String::new();
            for (index, body) in &requests {
                ndjson.push_str(&json!({ "index": index }).to_string());
                ndjson.push('\n');
                ndjson.push_str(&body.to_string());
                ndjson.push('\n');
            }
            let resp = self
                .http
                .post(self.url("_msearch"))
                .header("content-type", "application/x-ndjson")
                .body(ndjson)
                .send()
                .await?
                .error_for_status()?;
            let parsed: Value = resp.json().await?;
            let responses = parsed
                .get("responses")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            responses.iter().map(Self::parse_hits).collect()
        })
    }

    fn scroll<'a>(
        &'a self,
        index: &'a str,
        body: Value,
        scroll_id: Option<String>,
        page_size: usize,
    ) -> BoxFuture<'a, Result<ScrollPage>> {
        Box::pin(async move {
            let parsed: Value = match scroll_id {
                None => {
                    let mut initial = body;
                    initial["size"] = json!(page_size);
                    self.http
                        .post(self.url(&format!("{index}/_search?scroll=1m")))
                        .json(&initial)
                        .send()
                        .await?
                        .error_for_status()?
                        .json()
                        .await?
                }
                Some(id) => {
                    self.http
                        .post(self.url("_search/scroll"))
                        .json(&json!({ "scroll": "1m", "scroll_id": id }))
                        .send()
                        .await?
                        .error_for_status()?
                        .json()
                        .await?
                }
            };

            let hits = Self::parse_hits(&parsed)?;
            let next_id = if hits.is_empty() { None } else { Self::scroll_id(&parsed) };
            Ok(ScrollPage { scroll_id: next_id, hits })
        })
    }

    fn bulk<'a>(&'a self, ops: Vec<BulkOp>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if ops.is_empty() {
                return Ok(());
            }
            let mut ndjson = String::new();
            for op in &ops {
                match op {
                    BulkOp::Update { index, id, doc } => {
                        ndjson.push_str(&json!({"update": {"_index": index, "_id": id}}).to_string());
                        ndjson.push('\n');
                        ndjson.push_str(&json!({"doc": doc}).to_string());
                        ndjson.push('\n');
                    }
                    BulkOp::Delete { index, id } => {
                        ndjson.push_str(&json!({"delete": {"_index": index, "_id": id}}).to_string());
                        ndjson.push('\n');
                    }
                }
            }
            self.http
                .post(self.url("_bulk"))
                .header("content-type", "application/x-ndjson")
                .body(ndjson)
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
    }
}
