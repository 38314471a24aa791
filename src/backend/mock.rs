//! In-memory [`SearchBackend`] test double (§10.4), grounded on
//! `RagService::new_mock`'s role of letting the rest of the pipeline run
//! against a deterministic, no-network stand-in.
//!
//! The query-language dialect is a Non-goal (§2), so this mock does not
//! interpret clause semantics. It distinguishes the no-defect probe query
//! from the main similarity query the same way a reviewer would recognize
//! them by eye: the probe is the only query shape with a `unique_id` term
//! clause (§4.2b). Canned hits are keyed by index and installed by tests.
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::error::Result;
use crate::model::SearchHit;

use super::{BulkOp, ScrollPage, SearchBackend};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

fn is_no_defect_probe(body: &Value) -> bool {
    body.get("query")
        .and_then(|q| q.get("bool"))
        .and_then(|b| b.get("must"))
        .and_then(Value::as_array)
        .map(|clauses| {
            clauses
                .iter()
                .any(|c| c.get("term").and_then(|t| t.get("unique_id")).is_some())
        })
        .unwrap_or(false)
}

#[derive(Default)]
struct ScrollCursor {
    remaining: VecDeque<SearchHit>,
}

#[derive(Default)]
pub struct MockBackend {
    main_hits: Mutex<HashMap<String, Vec<SearchHit>>>,
    no_defect_hits: Mutex<HashMap<String, Vec<SearchHit>>>,
    scroll_hits: Mutex<HashMap<String, Vec<SearchHit>>>,
    scroll_cursors: Mutex<HashMap<String, ScrollCursor>>,
    bulk_log: Mutex<Vec<BulkOp>>,
    msearch_delay: Mutex<Option<Duration>>,
    /// Indices explicitly marked missing via [`Self::set_index_missing`].
    /// Every other index is considered to exist, so tests that only install
    /// canned hits (or none, meaning "exists but empty") keep working
    /// without having to opt in to existence (§7 "index-existence checks
    /// guard every pipeline entry").
    missing_indices: Mutex<HashSet<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_main_hits(&self, index: impl Into<String>, hits: Vec<SearchHit>) {
        self.main_hits.lock().unwrap().insert(index.into(), hits);
    }

    pub fn set_no_defect_hits(&self, index: impl Into<String>, hits: Vec<SearchHit>) {
        self.no_defect_hits.lock().unwrap().insert(index.into(), hits);
    }

    pub fn set_scroll_hits(&self, index: impl Into<String>, hits: Vec<SearchHit>) {
        self.scroll_hits.lock().unwrap().insert(index.into(), hits);
    }

    /// Simulate a slow backend, for timeout scenario tests (S6).
    pub fn set_msearch_delay(&self, delay: Duration) {
        *self.msearch_delay.lock().unwrap() = Some(delay);
    }

    /// Mark `index` as absent, so `index_exists` returns `false` and every
    /// pipeline entry point short-circuits to an empty result (§7).
    pub fn set_index_missing(&self, index: impl Into<String>) {
        self.missing_indices.lock().unwrap().insert(index.into());
    }

    pub fn bulk_ops(&self) -> Vec<BulkOp> {
        self.bulk_log.lock().unwrap().clone()
    }

    fn respond(&self, index: &str, body: &Value) -> Vec<SearchHit> {
        if is_no_defect_probe(body) {
            self.no_defect_hits.lock().unwrap().get(index).cloned().unwrap_or_default()
        } else {
            self.main_hits.lock().unwrap().get(index).cloned().unwrap_or_default()
        }
    }
}

impl SearchBackend for MockBackend {
    fn index_exists<'a>(&'a self, index: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(!self.missing_indices.lock().unwrap().contains(index)) })
    }

    fn search<'a>(&'a self, index: &'a str, body: Value) -> BoxFuture<'a, Result<Vec<SearchHit>>> {
        Box::pin(async move { Ok(self.respond(index, &body)) })
    }

    fn msearch<'a>(
        &'a self,
        requests: Vec<(String, Value)>,
    ) -> BoxFuture<'a, Result<Vec<Vec<SearchHit>>>> {
        Box::pin(async move {
            if let Some(delay) = *self.msearch_delay.lock().unwrap() {
                tokio::time::sleep(delay).await;
            }
            Ok(requests.iter().map(|(index, body)| self.respond(index, body)).collect())
        })
    }

    fn scroll<'a>(
        &'a self,
        index: &'a str,
        _body: Value,
        scroll_id: Option<String>,
        page_size: usize,
    ) -> BoxFuture<'a, Result<ScrollPage>> {
        Box::pin(async move {
            let cursor_key = scroll_id.unwrap_or_else(|| format!("mock-scroll-{index}"));
            let mut cursors = self.scroll_cursors.lock().unwrap();
            let cursor = cursors.entry(cursor_key.clone()).or_insert_with(|| ScrollCursor {
                remaining: self
                    .scroll_hits
                    .lock()
                    .unwrap()
                    .get(index)
                    .cloned()
                    .unwrap_or_default()
                    .into(),
            });

            let page: Vec<SearchHit> = (0..page_size).filter_map(|_| cursor.remaining.pop_front()).collect();
            let exhausted = cursor.remaining.is_empty();
            if exhausted {
                cursors.remove(&cursor_key);
            }
            Ok(ScrollPage {
                scroll_id: if exhausted { None } else { Some(cursor_key) },
                hits: page,
            })
        })
    }

    fn bulk<'a>(&'a self, ops: Vec<BulkOp>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.bulk_log.lock().unwrap().extend(ops);
            Ok(())
        })
    }
}
