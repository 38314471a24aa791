//! Error types for the triage engine.
//!
//! [`AnalyzerError`] captures backend transport/payload failures, channel
//! failures, timeouts, and configuration problems. Per-test-item processing
//! failures are *not* represented here — those are recorded into
//! [`crate::stats::LaunchStats`] and do not abort the surrounding call (see
//! the error handling design in `SPEC_FULL.md` §10.2).
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("backend transport error: {0}")]
    Transport(String),

    #[error("backend reported an error for index '{index}': {message}")]
    Backend { index: String, message: String },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("model/featurizer error: {0}")]
    Model(String),
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;

impl From<reqwest::Error> for AnalyzerError {
    fn from(e: reqwest::Error) -> Self {
        AnalyzerError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for AnalyzerError {
    fn from(e: serde_json::Error) -> Self {
        AnalyzerError::Deserialize(e.to_string())
    }
}
