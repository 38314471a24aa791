//! BatchQueryRunner (§4.4): buffers queries into size-bounded batches,
//! issues one multi-search per batch, and groups results back into
//! per-test-item [`AnalysisCandidate`]s.
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::backend::SearchBackend;
use crate::error::Result;
use crate::model::{AnalysisCandidate, Log, QueryPurpose, SearchHit};

/// First three flushes use a small batch to cut latency for short launches;
/// afterwards batches amortize round-trips at the configured full size (§4.4).
const WARMUP_FLUSHES: u32 = 3;
const WARMUP_BATCH_SIZE: usize = 5;
const DEFAULT_MAX_BATCH_SIZE: usize = 30;

/// Metadata carried alongside a pending query body, used to route its
/// result back to the owning test item and query-kind pool on flush.
#[derive(Debug, Clone)]
pub struct BatchLogInfo {
    pub test_item: Uuid,
    pub log: Log,
    pub purpose: QueryPurpose,
}

pub struct BatchQueryRunner<B: SearchBackend> {
    backend: Arc<B>,
    max_batch_size: usize,
    pending: Vec<(String, Value)>,
    info: Vec<BatchLogInfo>,
    flush_count: u32,
}

impl<B: SearchBackend> BatchQueryRunner<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_max_batch_size(backend, DEFAULT_MAX_BATCH_SIZE)
    }

    pub fn with_max_batch_size(backend: Arc<B>, max_batch_size: usize) -> Self {
        Self {
            backend,
            max_batch_size,
            pending: Vec::new(),
            info: Vec::new(),
            flush_count: 0,
        }
    }

    fn current_bound(&self) -> usize {
        if self.flush_count < WARMUP_FLUSHES {
            WARMUP_BATCH_SIZE
        } else {
            self.max_batch_size
        }
    }

    pub fn push(&mut self, index: String, query: Value, info: BatchLogInfo) {
        self.pending.push((index, query));
        self.info.push(info);
    }

    pub fn should_flush(&self) -> bool {
        self.pending.len() >= self.current_bound()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Issue one multi-search over everything pending and group the
    /// positionally-aligned responses into per-test-item candidates (§4.4).
    /// A no-op when nothing is pending.
    #[instrument(skip(self), fields(pending = self.pending.len(), flush_count = self.flush_count))]
    pub async fn flush(&mut self) -> Result<Vec<AnalysisCandidate>> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }

        let requests = std::mem::take(&mut self.pending);
        let infos = std::mem::take(&mut self.info);
        self.flush_count += 1;

        let responses = self.backend.msearch(requests).await?;
        Ok(Self::group_by_test_item(infos, responses))
    }

    fn group_by_test_item(infos: Vec<BatchLogInfo>, responses: Vec<Vec<SearchHit>>) -> Vec<AnalysisCandidate> {
        let mut order: Vec<Uuid> = Vec::new();
        let mut grouped: HashMap<Uuid, AnalysisCandidate> = HashMap::new();

        for (info, hits) in infos.into_iter().zip(responses) {
            let candidate = grouped.entry(info.test_item).or_insert_with(|| {
                order.push(info.test_item);
                AnalysisCandidate {
                    test_item: Some(info.test_item),
                    ..Default::default()
                }
            });
            match info.purpose {
                QueryPurpose::MainSimilarity => candidate.candidates.push((info.log, hits)),
                QueryPurpose::NoDefectProbe => candidate.candidates_with_no_defect.push((info.log, hits)),
            }
        }

        order
            .into_iter()
            .filter_map(|id| grouped.remove(&id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use serde_json::json;

    fn sample_log(test_item: Uuid) -> Log {
        Log {
            log_id: Uuid::new_v4(),
            message: "npe".into(),
            detected_message: "npe".into(),
            stacktrace: String::new(),
            merged_small_logs: String::new(),
            whole_message: "npe".into(),
            found_exceptions: String::new(),
            potential_status_codes: String::new(),
            only_numbers: String::new(),
            log_level: crate::model::ERROR_LEVEL,
            is_merged: false,
            unique_id: "u".into(),
            test_case_hash: 1,
            test_item,
            launch_id: Uuid::new_v4(),
            launch_name: "l".into(),
            issue_type: String::new(),
            cluster_id: 0,
            cluster_message: String::new(),
        }
    }

    #[tokio::test]
    async fn warmup_schedule_then_full_size() {
        let backend = Arc::new(MockBackend::new());
        backend.set_main_hits("idx", vec![]);
        let mut runner = BatchQueryRunner::with_max_batch_size(backend, 30);

        for _ in 0..5 {
            runner.push(
                "idx".into(),
                json!({}),
                BatchLogInfo {
                    test_item: Uuid::new_v4(),
                    log: sample_log(Uuid::new_v4()),
                    purpose: QueryPurpose::MainSimilarity,
                },
            );
        }
        assert!(runner.should_flush()); // warm-up bound is 5
        runner.flush().await.unwrap();
        assert_eq!(runner.current_bound(), 5); // still within warm-up after 1 flush
    }

    #[tokio::test]
    async fn flush_groups_both_query_kinds_by_test_item() {
        let backend = Arc::new(MockBackend::new());
        backend.set_main_hits("idx", vec![]);
        backend.set_no_defect_hits("idx", vec![]);
        let mut runner = BatchQueryRunner::with_max_batch_size(backend, 30);

        let test_item = Uuid::new_v4();
        runner.push(
            "idx".into(),
            json!({"query": {"bool": {"must": []}}}),
            BatchLogInfo {
                test_item,
                log: sample_log(test_item),
                purpose: QueryPurpose::MainSimilarity,
            },
        );
        runner.push(
            "idx".into(),
            json!({"query": {"bool": {"must": [{"term": {"unique_id": {"value": "u", "boost": 1.0}}}]}}}),
            BatchLogInfo {
                test_item,
                log: sample_log(test_item),
                purpose: QueryPurpose::NoDefectProbe,
            },
        );

        let candidates = runner.flush().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].candidates.len(), 1);
        assert_eq!(candidates[0].candidates_with_no_defect.len(), 1);
    }

    #[tokio::test]
    async fn flush_on_empty_is_noop() {
        let backend = Arc::new(MockBackend::new());
        let mut runner = BatchQueryRunner::new(backend);
        assert!(runner.flush().await.unwrap().is_empty());
    }
}
