//! AutoAnalyzer (§4.5): the top-level auto-analysis orchestrator, and its
//! producer/consumer concurrency contract (§5).
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::backend::SearchBackend;
use crate::batch::{BatchLogInfo, BatchQueryRunner};
use crate::config::EngineConfig;
use crate::featurizer::{choose_issue_type, Featurizer, Model, ModelChooser, ModelKind};
use crate::issue_type;
use crate::model::{AnalysisCandidate, AnalysisResult, AnalyzerConfig, Launch, Log, QueryPurpose, MAX_TEST_ITEMS_PER_RUN};
use crate::query::QueryBuilder;
use crate::similarity::SimilarityScorer;
use crate::stats::{LaunchStats, StatsSink};

/// Consumer re-checks the done signal / queue state on this cadence when
/// there is nothing to do (§5 "yields for 100 ms").
const CONSUMER_IDLE_TICK: Duration = Duration::from_millis(100);
/// Early-finish fires once the wall clock has this much left (§5).
const EARLY_FINISH_MARGIN: Duration = Duration::from_secs(5);
/// Bounded queue between producer and consumer (§5 "shared resources").
const CANDIDATE_QUEUE_CAPACITY: usize = 64;

pub struct AutoAnalyzer<B: SearchBackend> {
    backend: Arc<B>,
    cfg: EngineConfig,
    scorer: SimilarityScorer,
    featurizer: Arc<dyn Featurizer>,
    model_chooser: Arc<dyn ModelChooser>,
    stats_sink: Arc<dyn StatsSink>,
}

impl<B: SearchBackend + 'static> AutoAnalyzer<B> {
    pub fn new(
        backend: Arc<B>,
        cfg: EngineConfig,
        scorer: SimilarityScorer,
        featurizer: Arc<dyn Featurizer>,
        model_chooser: Arc<dyn ModelChooser>,
        stats_sink: Arc<dyn StatsSink>,
    ) -> Self {
        Self {
            backend,
            cfg,
            scorer,
            featurizer,
            model_chooser,
            stats_sink,
        }
    }

    /// Run auto-analysis over `launches` within `timeout` (§4.5, §5). Never
    /// returns `Err` for per-item failures — only infrastructure failures
    /// (stats publish) propagate, and even those are logged rather than
    /// losing already-collected results (§7 "no error aborts a whole launch
    /// run").
    #[instrument(skip(self, launches), fields(launch_count = launches.len(), timeout_secs = timeout.as_secs()))]
    pub async fn analyze_logs(&self, launches: Vec<Launch>, timeout: Duration) -> Vec<AnalysisResult> {
        let mut stats: HashMap<Uuid, LaunchStats> = launches
            .iter()
            .map(|l| (l.launch_id, LaunchStats::new(l.launch_id, l.analyzer_config.number_of_log_lines.0)))
            .collect();

        let work = Self::flatten_and_truncate(&launches);

        let (candidate_tx, mut candidate_rx) = mpsc::channel::<AnalysisCandidate>(CANDIDATE_QUEUE_CAPACITY);
        let (done_tx, mut done_rx) = oneshot::channel::<()>();
        let early_finish = Arc::new(AtomicBool::new(false));

        let producer = {
            let backend = self.backend.clone();
            let cfg = self.cfg.clone();
            let early_finish = early_finish.clone();
            let work = work.clone();
            tokio::spawn(async move {
                Self::run_producer(backend, cfg, work, candidate_tx, early_finish).await;
                let _ = done_tx.send(());
            })
        };

        let start = Instant::now();
        let deadline = start + timeout;
        let mut producer_finished = false;
        let mut model_cache: HashMap<(String, ModelKind), Arc<dyn Model>> = HashMap::new();
        let mut results = Vec::new();

        loop {
            if producer_finished && candidate_rx.is_empty() {
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining <= EARLY_FINISH_MARGIN {
                early_finish.store(true, Ordering::SeqCst);
            }
            if remaining.is_zero() {
                break;
            }

            tokio::select! {
                biased;
                _ = &mut done_rx, if !producer_finished => {
                    producer_finished = true;
                }
                maybe_candidate = candidate_rx.recv() => {
                    match maybe_candidate {
                        Some(candidate) => {
                            self.process_candidate(candidate, &launches, &mut model_cache, &mut stats, &mut results).await;
                        }
                        None => producer_finished = true,
                    }
                }
                _ = tokio::time::sleep(CONSUMER_IDLE_TICK) => {}
            }
        }

        producer.abort();

        for launch in &launches {
            if let Some(s) = stats.get_mut(&launch.launch_id) {
                s.set_processed_time(start.elapsed());
            }
        }
        if let Err(e) = self.stats_sink.publish(&stats).await {
            warn!(error = %e, "failed to publish launch stats");
        }

        results
    }

    /// §3 invariant 5: at most [`MAX_TEST_ITEMS_PER_RUN`] test items are
    /// processed; excess are silently truncated with a log line.
    fn flatten_and_truncate(launches: &[Launch]) -> Vec<TestItemWork> {
        let mut work = Vec::new();
        for launch in launches {
            for test_item in &launch.test_items {
                let logs: Vec<Log> = test_item.eligible_logs().cloned().collect();
                if logs.is_empty() {
                    continue;
                }
                work.push(TestItemWork {
                    project: launch.project.clone(),
                    analyzer_config: launch.analyzer_config.clone(),
                    test_item: test_item.test_item_id,
                    logs,
                });
            }
        }

        if work.len() > MAX_TEST_ITEMS_PER_RUN {
            warn!(
                total = work.len(),
                kept = MAX_TEST_ITEMS_PER_RUN,
                "truncating test items to the per-invocation cap"
            );
            work.truncate(MAX_TEST_ITEMS_PER_RUN);
        }
        work
    }

    async fn run_producer(
        backend: Arc<B>,
        cfg: EngineConfig,
        work: Vec<TestItemWork>,
        candidate_tx: mpsc::Sender<AnalysisCandidate>,
        early_finish: Arc<AtomicBool>,
    ) {
        let mut runner = BatchQueryRunner::new(backend.clone());
        // §7: "index-existence checks guard every pipeline entry; missing
        // index yields an empty result and short-circuits" — cached per
        // index since many test items in a launch share one project/index.
        let mut known_indices: HashMap<String, bool> = HashMap::new();

        'outer: for item in work {
            if early_finish.load(Ordering::SeqCst) {
                break;
            }

            let index = cfg.index_name(&item.project);
            let exists = match known_indices.get(&index) {
                Some(&exists) => exists,
                None => {
                    let exists = backend.index_exists(&index).await.unwrap_or(false);
                    known_indices.insert(index.clone(), exists);
                    exists
                }
            };
            if !exists {
                continue;
            }

            let test_item = item.test_item;
            for log in &item.logs {
                let main_query = QueryBuilder::build(log, &item.analyzer_config, QueryPurpose::MainSimilarity, &cfg, test_item);
                runner.push(
                    index.clone(),
                    main_query.to_value(),
                    BatchLogInfo {
                        test_item,
                        log: log.clone(),
                        purpose: QueryPurpose::MainSimilarity,
                    },
                );
                let probe_query = QueryBuilder::build(log, &item.analyzer_config, QueryPurpose::NoDefectProbe, &cfg, test_item);
                runner.push(
                    index,
                    probe_query.to_value(),
                    BatchLogInfo {
                        test_item,
                        log: log.clone(),
                        purpose: QueryPurpose::NoDefectProbe,
                    },
                );

                if runner.should_flush() {
                    if !Self::flush_and_send(&mut runner, &candidate_tx).await {
                        break 'outer;
                    }
                }
            }

            if early_finish.load(Ordering::SeqCst) {
                break;
            }
        }

        // Drain the in-flight batch even after early-finish fired (§5).
        let _ = Self::flush_and_send(&mut runner, &candidate_tx).await;
    }

    async fn flush_and_send(runner: &mut BatchQueryRunner<B>, tx: &mpsc::Sender<AnalysisCandidate>) -> bool {
        match runner.flush().await {
            Ok(candidates) => {
                for candidate in candidates {
                    if tx.send(candidate).await.is_err() {
                        return false;
                    }
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "producer-side batch flush failed; continuing with partial results");
                true
            }
        }
    }

    async fn process_candidate(
        &self,
        candidate: AnalysisCandidate,
        launches: &[Launch],
        model_cache: &mut HashMap<(String, ModelKind), Arc<dyn Model>>,
        stats: &mut HashMap<Uuid, LaunchStats>,
        results: &mut Vec<AnalysisResult>,
    ) {
        let Some(test_item) = candidate.test_item_id() else {
            return;
        };

        if let Some(result) = self.no_defect_shortcircuit(&candidate) {
            results.push(result);
            return;
        }

        let project = launches
            .iter()
            .find(|l| l.test_items.iter().any(|t| t.test_item_id == test_item))
            .map(|l| l.project.clone())
            .unwrap_or_default();
        let launch_id = launches
            .iter()
            .find(|l| l.test_items.iter().any(|t| t.test_item_id == test_item))
            .map(|l| l.launch_id);

        let model = model_cache
            .entry((project.clone(), ModelKind::AutoAnalysis))
            .or_insert_with(|| self.model_chooser.choose_model(&project, ModelKind::AutoAnalysis))
            .clone();
        let defect_type_model = model_cache
            .entry((project.clone(), ModelKind::DefectType))
            .or_insert_with(|| self.model_chooser.choose_model(&project, ModelKind::DefectType))
            .clone();

        let feature_ids = model.feature_ids();
        let output = self.featurizer.featurize(&candidate, &self.scorer, &feature_ids, defect_type_model.as_ref());

        if output.features.is_empty() {
            if let Some(launch_id) = launch_id {
                if let Some(s) = stats.get_mut(&launch_id) {
                    s.not_found += 1;
                }
            }
            return;
        }

        // §7 "per-test-item processing error": a featurizer that hands back a
        // feature row per issue type is a contract the rest of this function
        // relies on (`choose_issue_type` zips `issue_type_names` against the
        // model's per-row output); a mismatch here is a real processing
        // failure, not a "no match found" outcome, so it goes to `errors`
        // rather than `not_found`.
        if output.features.rows.len() != output.issue_type_names.len() {
            if let Some(launch_id) = launch_id {
                if let Some(s) = stats.get_mut(&launch_id) {
                    s.record_error(
                        test_item,
                        format!(
                            "featurizer produced {} feature rows for {} issue types",
                            output.features.rows.len(),
                            output.issue_type_names.len()
                        ),
                    );
                }
            }
            return;
        }

        let (labels, probabilities) = model.predict(&output.features);

        if labels.len() != output.features.rows.len() || probabilities.len() != output.features.rows.len() {
            if let Some(launch_id) = launch_id {
                if let Some(s) = stats.get_mut(&launch_id) {
                    s.record_error(
                        test_item,
                        format!(
                            "model predicted {} labels / {} probabilities for {} feature rows",
                            labels.len(),
                            probabilities.len(),
                            output.features.rows.len()
                        ),
                    );
                }
            }
            return;
        }

        let winner = choose_issue_type(&labels, &probabilities, &output.issue_type_names, &output.scores_by_issue_type);

        if let Some(launch_id) = launch_id {
            if let Some(s) = stats.get_mut(&launch_id) {
                s.model_info.insert(model.model_info());
                s.model_info.insert(output.defect_type_model_info.clone());
            }
        }

        match winner {
            Some(issue_type) => {
                let relevant_item = Self::pick_relevant_item(&candidate, &issue_type).unwrap_or(test_item);
                results.push(AnalysisResult {
                    test_item,
                    issue_type,
                    relevant_item,
                });
                if let Some(launch_id) = launch_id {
                    if let Some(s) = stats.get_mut(&launch_id) {
                        s.processed += 1;
                    }
                }
            }
            None => {
                if let Some(launch_id) = launch_id {
                    if let Some(s) = stats.get_mut(&launch_id) {
                        s.not_found += 1;
                    }
                }
            }
        }
    }

    /// §4.5 step 1, §9 open question 1: scan hits in reverse order and keep
    /// the *last* ND hit whose similarity clears the threshold.
    fn no_defect_shortcircuit(&self, candidate: &AnalysisCandidate) -> Option<AnalysisResult> {
        let test_item = candidate.test_item_id()?;

        for (log, hits) in &candidate.candidates_with_no_defect {
            if !hits.iter().any(|h| issue_type::is_no_defect(&h.issue_type)) {
                continue;
            }
            for hit in hits.iter().rev() {
                if !issue_type::is_no_defect(&hit.issue_type) {
                    continue;
                }
                let message_sim = self.scorer.score(&log.message, &hit.message);
                let similarity = if message_sim.both_empty {
                    self.scorer.score(&log.merged_small_logs, &hit.merged_small_logs).similarity
                } else {
                    message_sim.similarity
                };
                if similarity >= self.cfg.no_defect_min_similarity {
                    return Some(AnalysisResult {
                        test_item,
                        issue_type: hit.issue_type.clone(),
                        relevant_item: hit.test_item,
                    });
                }
            }
        }
        None
    }

    /// The hit backing the winning issue type with the strongest backend
    /// score ("mrHit" / most-relevant hit, §4.5 step 4).
    fn pick_relevant_item(candidate: &AnalysisCandidate, issue_type: &str) -> Option<Uuid> {
        candidate
            .candidates
            .iter()
            .flat_map(|(_, hits)| hits.iter())
            .filter(|h| h.issue_type == issue_type)
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
            .map(|h| h.test_item)
    }
}

/// One flattened, eligible test item queued for query construction (§4.5
/// step 0). `project` resolves the backend index once per item.
#[derive(Debug, Clone)]
struct TestItemWork {
    project: String,
    analyzer_config: AnalyzerConfig,
    test_item: Uuid,
    logs: Vec<Log>,
}
