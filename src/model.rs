//! The data model shared by every pipeline stage (§3 of `SPEC_FULL.md`).
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Logs at or above this numeric level participate in the pipeline; everything
/// below it is ignored (§3 invariant 1).
pub const ERROR_LEVEL: i32 = 40000;

/// Analyzer operating mode, controlling the launch-scoping constraint applied
/// by the query builder (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalyzerMode {
    All,
    LaunchName,
    CurrentLaunch,
}

/// `numberOfLogLines` as specified in §3: `-1` means "use full structured
/// fields"; any other value means "first-N-lines merged message".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberOfLogLines(pub i64);

impl NumberOfLogLines {
    pub const FULL_FIELDS: NumberOfLogLines = NumberOfLogLines(-1);

    pub fn is_full_fields(self) -> bool {
        self.0 == -1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub analyzer_mode: AnalyzerMode,
    pub number_of_log_lines: NumberOfLogLines,
    /// Percentage in [0, 100]; `0` means "use the engine default".
    pub min_should_match: u8,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            analyzer_mode: AnalyzerMode::All,
            number_of_log_lines: NumberOfLogLines::FULL_FIELDS,
            min_should_match: 0,
        }
    }
}

/// A log record after tokenization and field derivation (§3, §GLOSSARY).
///
/// Construction (tokenization, exception/status-code extraction, merging of
/// short logs) is out of scope per §2 — callers hand in an already-prepared
/// `Log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    pub log_id: Uuid,
    pub message: String,
    pub detected_message: String,
    pub stacktrace: String,
    pub merged_small_logs: String,
    pub whole_message: String,
    pub found_exceptions: String,
    pub potential_status_codes: String,
    pub only_numbers: String,
    pub log_level: i32,
    pub is_merged: bool,
    pub unique_id: String,
    pub test_case_hash: i64,
    pub test_item: Uuid,
    pub launch_id: Uuid,
    pub launch_name: String,
    pub issue_type: String,
    pub cluster_id: u64,
    pub cluster_message: String,
}

impl Log {
    /// §3 invariant 1: error-gated and non-empty on at least one text field.
    pub fn is_eligible(&self) -> bool {
        self.log_level >= ERROR_LEVEL && (!self.message.is_empty() || !self.merged_small_logs.is_empty())
    }

    /// §3 invariant 2: branch routing is a pure function of `message` presence.
    pub fn branch(&self) -> LogBranch {
        if self.message.is_empty() {
            LogBranch::Merged
        } else {
            LogBranch::MessageDetectedStacktrace
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogBranch {
    MessageDetectedStacktrace,
    Merged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestItem {
    pub test_item_id: Uuid,
    pub logs: Vec<Log>,
}

impl TestItem {
    /// Logs below [`ERROR_LEVEL`] are ignored everywhere in the core (§3).
    pub fn eligible_logs(&self) -> impl Iterator<Item = &Log> {
        self.logs.iter().filter(|l| l.is_eligible())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Launch {
    pub launch_id: Uuid,
    pub launch_name: String,
    pub project: String,
    pub analyzer_config: AnalyzerConfig,
    pub test_items: Vec<TestItem>,
}

/// Maximum number of test items processed per `analyze_logs` invocation
/// (§3 invariant 5, §9 open question 2 — a tunable with this default).
pub const MAX_TEST_ITEMS_PER_RUN: usize = 4_000;

/// Purpose of a query built by [`crate::query::builder`] — selects between
/// the main similarity query and the no-defect probe (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPurpose {
    MainSimilarity,
    NoDefectProbe,
}

/// One backend search hit, as consumed by the ranking stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub log_id: Uuid,
    pub test_item: Uuid,
    pub issue_type: String,
    pub message: String,
    pub merged_small_logs: String,
    pub potential_status_codes: String,
    pub score: f32,
    /// Cluster annotation already present on this document, if any (§4.6
    /// historical extension reads these; [`NO_CLUSTER`] means unset).
    #[serde(default)]
    pub cluster_id: u64,
    #[serde(default)]
    pub cluster_message: String,
}

/// A per-test-item work unit carrying the two query-kind result pools (§3).
#[derive(Debug, Clone, Default)]
pub struct AnalysisCandidate {
    pub test_item: Option<Uuid>,
    pub candidates: Vec<(Log, Vec<SearchHit>)>,
    pub candidates_with_no_defect: Vec<(Log, Vec<SearchHit>)>,
}

impl AnalysisCandidate {
    pub fn test_item_id(&self) -> Option<Uuid> {
        self.test_item
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub test_item: Uuid,
    pub issue_type: String,
    pub relevant_item: Uuid,
}

/// A cluster of semantically similar logs (§3, §GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_id: u64,
    pub cluster_message: String,
    pub log_ids: Vec<Uuid>,
}

/// Reserved "no cluster assigned" sentinel (§3 invariant 3).
pub const NO_CLUSTER: u64 = 0;
