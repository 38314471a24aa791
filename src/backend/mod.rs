//! The inverted-index search backend as an external collaborator (§6).
//!
//! The backend itself (index admin, document ingestion, the query-language
//! dialect) is out of scope (§2); this module only fixes the shape of the
//! five RPCs the pipeline needs, as a trait so production code talks to a
//! real HTTP service and tests talk to an in-memory double (§10.4, grounded
//! on `RagService::new_mock`).
pub mod http;
pub mod mock;

pub use http::HttpBackend;
pub use mock::MockBackend;

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::error::Result;
use crate::model::SearchHit;

/// A single update or delete operation for the bulk endpoint (§6).
#[derive(Debug, Clone)]
pub enum BulkOp {
    Update { index: String, id: String, doc: Value },
    Delete { index: String, id: String },
}

/// One page of a scrolled search (§4.7, §10.5 "scroll-based streaming").
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub scroll_id: Option<String>,
    pub hits: Vec<SearchHit>,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The five RPCs §6 requires of the backend.
///
/// Methods return boxed futures (rather than `async fn`) so the trait stays
/// object-safe — call sites hold this behind `Arc<dyn SearchBackend>`.
pub trait SearchBackend: Send + Sync {
    fn index_exists<'a>(&'a self, index: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn search<'a>(&'a self, index: &'a str, body: Value) -> BoxFuture<'a, Result<Vec<SearchHit>>>;

    /// Issue one multi-search covering all `(index, body)` pairs in order;
    /// the response vector is positionally aligned with `requests` (§4.4).
    fn msearch<'a>(
        &'a self,
        requests: Vec<(String, Value)>,
    ) -> BoxFuture<'a, Result<Vec<Vec<SearchHit>>>>;

    /// Fetch the next page of a scrolled search. `scroll_id = None` starts a
    /// new scroll; a response with `scroll_id: None` signals exhaustion.
    fn scroll<'a>(
        &'a self,
        index: &'a str,
        body: Value,
        scroll_id: Option<String>,
        page_size: usize,
    ) -> BoxFuture<'a, Result<ScrollPage>>;

    fn bulk<'a>(&'a self, ops: Vec<BulkOp>) -> BoxFuture<'a, Result<()>>;
}
