//! triage-analyzer — the retrieval-and-ranking engine of a test-failure
//! triage service.
//!
//! Given the logs of failing test items across one or more test launches,
//! this crate decides, for each failing test item, the most likely defect
//! classification and the most similar previously-triaged test item. It also
//! groups a launch's logs into clusters of semantically similar failures,
//! and answers ad-hoc "find similar test items" queries.
//!
//! The shared engine behind all three is: query construction → backend
//! multi-search → text-similarity scoring → decision.
//!
//! Highlights
//! - [`auto_analyzer::AutoAnalyzer`]: producer/consumer auto-analysis with a
//!   wall-clock timeout and an early-finish cancellation flag.
//! - [`cluster::service::ClusterService`]: local grouping plus historical
//!   extension against the backend, with stable 64-bit content hashing.
//! - [`search_service::SearchService`]: precision-guarded similarity search
//!   over scrolled backend results.
//! - [`backend::SearchBackend`]: the inverted-index backend as a trait, with
//!   a real HTTP adapter and an in-memory mock for tests.
//!
//! Out of scope (external collaborators only, see `spec.md` §2): the
//! inverted-index backend itself, index administration and document
//! ingestion, log preprocessing primitives, the boosting classifier and
//! model selection internals, the message-bus stats sink's transport, and
//! the HTTP façade.
//!
//! Error handling
//! - Infrastructure failures (backend transport, channel death, bad config)
//!   surface as [`error::AnalyzerError`].
//! - Per-test-item processing failures never abort a run; they are recorded
//!   into [`stats::LaunchStats`] and the item is reported as `not_found`.
//!
//! Observability
//! - Every async entry point is `#[instrument]`ed with structured fields
//!   (counts, timings, decisions) rather than ad-hoc string logging.
//! - Library code never force-installs a global subscriber; call
//!   [`init_tracing`] from a binary or test harness that wants one.
//!
//! Configuration
//! - [`config::EngineConfig`] holds the process-wide ambient options (§6);
//!   [`model::AnalyzerConfig`] holds the per-analysis-call options (§3).
use std::path::Path;

pub mod auto_analyzer;
pub mod backend;
pub mod batch;
pub mod cluster;
pub mod config;
pub mod error;
pub mod featurizer;
pub mod issue_type;
pub mod model;
pub mod query;
pub mod search_service;
pub mod similarity;
pub mod stats;

pub use auto_analyzer::AutoAnalyzer;
pub use backend::{HttpBackend, MockBackend, SearchBackend};
pub use cluster::{ClusterOptions, ClusterService};
pub use config::EngineConfig;
pub use error::{AnalyzerError, Result};
pub use model::{
    AnalysisCandidate, AnalysisResult, AnalyzerConfig, AnalyzerMode, ClusterInfo, Launch, Log,
    NumberOfLogLines, QueryPurpose, TestItem,
};
pub use query::QueryBuilder;
pub use search_service::{SearchMatch, SearchQuery, SearchService};
pub use similarity::{SimilarityScorer, TokenWeights};

/// Install a `tracing-subscriber` registry with an `EnvFilter` stdout layer
/// plus a rolling file layer under `log_dir` (grounded on
/// `jlon-starrocks-admin`'s `tracing-appender` setup). Safe to call more
/// than once; only the first call takes effect.
///
/// Library code never calls this itself — only binaries and integration
/// tests that want a preconfigured subscriber should.
pub fn init_tracing(log_dir: impl AsRef<Path>) -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let file_appender = tracing_appender::rolling::daily(log_dir.as_ref(), "triage-analyzer.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    guard
}
