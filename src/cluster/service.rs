//! ClusterService (§4.6): groups a launch's logs, extends groups with
//! historical matches from the backend, assigns stable cluster ids, and
//! writes the annotations back as one bulk update.
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::json;
use sha1::{Digest, Sha1};
use tracing::instrument;
use uuid::Uuid;

use crate::backend::{BulkOp, SearchBackend};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::model::{ClusterInfo, Launch, Log, NumberOfLogLines, NO_CLUSTER};
use crate::query::ast::{Clause, MinShouldMatch, Query};
use crate::similarity::SimilarityScorer;

use super::clusterizer;

/// Cap on how many group members contribute bigrams to the hash (§4.6 step 5,
/// §9 open question 3).
const MAX_HASH_MEMBERS: usize = 100;
const CLUSTER_HASH_MODULUS: u128 = 10_000_000_000_000_000; // 10^16

/// Signature used to partition logs before clustering: logs with different
/// found_exceptions/potential_status_code sets can never share a cluster.
type Signature = (String, String);

fn sorted_token_key(s: &str) -> String {
    let set: BTreeSet<&str> = s.split_whitespace().collect();
    set.into_iter().collect::<Vec<_>>().join(" ")
}

fn signature_of(log: &Log) -> Signature {
    (
        sorted_token_key(&log.found_exceptions),
        sorted_token_key(&log.potential_status_codes),
    )
}

fn first_n_lines(text: &str, n: NumberOfLogLines) -> String {
    if n.is_full_fields() {
        text.to_string()
    } else {
        text.lines().take(n.0.max(0) as usize).collect::<Vec<_>>().join("\n")
    }
}

fn strip_numbers(text: &str) -> String {
    text.chars().filter(|c| !c.is_ascii_digit()).collect()
}

fn canonical_message(log: &Log, number_of_log_lines: NumberOfLogLines, clean_numbers: bool) -> String {
    let truncated = first_n_lines(&log.whole_message, number_of_log_lines);
    if clean_numbers {
        strip_numbers(&truncated)
    } else {
        truncated
    }
}

fn bigrams(text: &str) -> BTreeSet<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.windows(2).map(|w| w.iter().collect()).collect()
}

/// §4.6 step 5: AND-reduce bigram presence across up to [`MAX_HASH_MEMBERS`]
/// members, hash the concatenation with SHA1, reduce mod 10^16. An empty
/// intersection (no bigrams shared by every member) hashes `""`, a known and
/// accepted collision class (§9 open question 3).
fn compute_cluster_hash(members: &[String]) -> u64 {
    let capped = &members[..members.len().min(MAX_HASH_MEMBERS)];
    let mut intersection: Option<BTreeSet<String>> = None;
    for member in capped {
        let bg = bigrams(member);
        intersection = Some(match intersection {
            None => bg,
            Some(prev) => prev.intersection(&bg).cloned().collect(),
        });
    }
    let combined: String = intersection.unwrap_or_default().into_iter().collect();

    let mut hasher = Sha1::new();
    hasher.update(combined.as_bytes());
    let digest = hasher.finalize();

    let mut value: u128 = 0;
    for byte in digest {
        value = (value * 256 + byte as u128) % CLUSTER_HASH_MODULUS;
    }
    value as u64
}

/// A local (within-launch) group produced by §4.6 step 3, before historical
/// extension. `messages` are the (optionally number-stripped) canonical
/// texts used for similarity; `raw_first_lines` are the un-stripped
/// first-N-lines texts used for the reported `cluster_message` (§4.6 step 5).
struct LocalGroup {
    log_ids: Vec<Uuid>,
    messages: Vec<String>,
    raw_first_lines: Vec<String>,
}

impl LocalGroup {
    fn representative(&self) -> &str {
        &self.messages[0]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClusterOptions {
    pub number_of_log_lines: NumberOfLogLines,
    pub clean_numbers: bool,
    pub for_update: bool,
}

pub struct ClusterService<B: SearchBackend> {
    backend: Arc<B>,
    scorer: SimilarityScorer,
}

impl<B: SearchBackend> ClusterService<B> {
    pub fn new(backend: Arc<B>, scorer: SimilarityScorer) -> Self {
        Self { backend, scorer }
    }

    fn historical_query(
        log_signature: &Signature,
        representative: &str,
        min_should_match: MinShouldMatch,
        launch: &Launch,
        same_launch: bool,
        exclude_log_ids: &[Uuid],
    ) -> Query {
        let mut query = Query::default();
        query.push(Clause::Exists { field: "cluster_message".into() }.filter());

        if !log_signature.0.is_empty() {
            let values: Vec<String> = log_signature.0.split(' ').map(str::to_string).collect();
            query.push(
                Clause::Terms {
                    field: "found_exceptions".into(),
                    values,
                    min_should_match: MinShouldMatch::Count(1),
                    boost: 1.0,
                }
                .filter(),
            );
        }
        if !log_signature.1.is_empty() {
            let values: Vec<String> = log_signature.1.split(' ').map(str::to_string).collect();
            query.push(
                Clause::Terms {
                    field: "potential_status_codes".into(),
                    values,
                    min_should_match: MinShouldMatch::Count(1),
                    boost: 1.0,
                }
                .filter(),
            );
        }

        if same_launch {
            query.push(
                Clause::Term {
                    field: "launch_id".into(),
                    value: launch.launch_id.to_string(),
                    boost: 1.0,
                }
                .filter(),
            );
        } else {
            for id in exclude_log_ids {
                query.push(
                    Clause::Term {
                        field: "log_id".into(),
                        value: id.to_string(),
                        boost: 1.0,
                    }
                    .must_not(),
                );
            }
        }

        query.push(
            Clause::MoreLikeThis {
                field: "whole_message".into(),
                like: representative.to_string(),
                min_should_match,
                boost: 1.0,
            }
            .must(),
        );

        query
    }

    /// One historical-extension pass (§4.6 step 4): find logs elsewhere that
    /// already carry a cluster annotation and are similar enough to this
    /// group's representative. `launch_log_ids` excludes every log in the
    /// current launch, not just this group's own members, so a hit that is
    /// actually a sibling group's member in the same launch can never be
    /// pulled in and misattributed. Returns the cluster ids of joined hits
    /// whose annotation predates this run, plus every joined hit's log id.
    async fn extend_group(
        &self,
        index: &str,
        signature: &Signature,
        group: &LocalGroup,
        threshold: f32,
        min_should_match: MinShouldMatch,
        launch: &Launch,
        same_launch: bool,
        launch_log_ids: &[Uuid],
    ) -> Result<(Option<(u64, String)>, Vec<Uuid>)> {
        let query = Self::historical_query(
            signature,
            group.representative(),
            min_should_match,
            launch,
            same_launch,
            launch_log_ids,
        );
        let hits = self.backend.search(index, query.to_value()).await?;
        if hits.is_empty() {
            return Ok((None, Vec::new()));
        }

        let mut messages = vec![group.representative().to_string()];
        messages.extend(hits.iter().map(|h| h.message.clone()));
        let grouped = clusterizer::cluster(&messages, threshold, &self.scorer);

        let representative_group = grouped.iter().find(|g| g.contains(&0));
        let Some(representative_group) = representative_group else {
            return Ok((None, Vec::new()));
        };

        let joined_hits: Vec<&crate::model::SearchHit> = representative_group
            .iter()
            .filter(|&&idx| idx != 0)
            .map(|&idx| &hits[idx - 1])
            .collect();

        if joined_hits.is_empty() {
            return Ok((None, Vec::new()));
        }

        let inherited = joined_hits
            .iter()
            .find(|h| h.cluster_id != NO_CLUSTER)
            .map(|h| (h.cluster_id, h.cluster_message.clone()));
        let joined_ids = joined_hits.iter().map(|h| h.log_id).collect();

        Ok((inherited, joined_ids))
    }

    /// Run clustering for `launch` and return one [`ClusterInfo`] per final
    /// group (including singletons, per §3 invariant 3). Writes the
    /// `{cluster_id, cluster_message}` annotation for every member back to
    /// the backend as one bulk call.
    #[instrument(skip(self, launch, cfg), fields(launch_id = %launch.launch_id, for_update = opts.for_update))]
    pub async fn cluster(&self, launch: &Launch, opts: ClusterOptions, cfg: &EngineConfig) -> Result<Vec<ClusterInfo>> {
        let index = cfg.index_name(&launch.project);

        // §7: missing (or unreachable) index yields an empty result and
        // short-circuits rather than erroring.
        if !matches!(self.backend.index_exists(&index).await, Ok(true)) {
            return Ok(Vec::new());
        }

        // Step 1: canonical message per eligible log, bucketed by signature (step 2).
        let mut buckets: HashMap<Signature, Vec<(Uuid, String, String)>> = HashMap::new();
        for test_item in &launch.test_items {
            for log in test_item.eligible_logs() {
                let canonical = canonical_message(log, opts.number_of_log_lines, opts.clean_numbers);
                let raw = first_n_lines(&log.whole_message, opts.number_of_log_lines);
                buckets
                    .entry(signature_of(log))
                    .or_default()
                    .push((log.log_id, canonical, raw));
            }
        }

        let threshold = cfg.cluster_logs_min_similarity;
        let min_should_match = MinShouldMatch::Percent((threshold * 100.0).round() as u8);

        let mut local_groups: Vec<(Signature, LocalGroup)> = Vec::new();
        for (signature, members) in buckets {
            let messages: Vec<String> = members.iter().map(|(_, m, _)| m.clone()).collect();
            for indices in clusterizer::cluster(&messages, threshold, &self.scorer) {
                let log_ids = indices.iter().map(|&i| members[i].0).collect();
                let group_messages = indices.iter().map(|&i| members[i].1.clone()).collect();
                let raw_first_lines = indices.iter().map(|&i| members[i].2.clone()).collect();
                local_groups.push((
                    signature.clone(),
                    LocalGroup {
                        log_ids,
                        messages: group_messages,
                        raw_first_lines,
                    },
                ));
            }
        }

        // §4.6 step 4: historical-extension queries exclude every log id in
        // the current launch, not just the group being extended, so a hit
        // cannot be a sibling group's own member.
        let launch_log_ids: Vec<Uuid> = local_groups.iter().flat_map(|(_, g)| g.log_ids.iter().copied()).collect();

        let mut results = Vec::with_capacity(local_groups.len());
        let mut bulk_ops = Vec::new();

        for (signature, group) in local_groups {
            let (mut inherited, mut extra_ids) = self
                .extend_group(&index, &signature, &group, threshold, min_should_match, launch, false, &launch_log_ids)
                .await?;

            if opts.for_update {
                let (same_launch_inherited, mut same_launch_ids) = self
                    .extend_group(&index, &signature, &group, threshold, min_should_match, launch, true, &launch_log_ids)
                    .await?;
                if inherited.is_none() {
                    inherited = same_launch_inherited;
                }
                extra_ids.append(&mut same_launch_ids);
            }

            let mut log_ids = group.log_ids.clone();
            log_ids.extend(extra_ids);

            let (cluster_id, cluster_message) = match inherited {
                Some((id, message)) => (id, message),
                None => {
                    let id = compute_cluster_hash(&group.messages);
                    let message = group.raw_first_lines[0].clone();
                    (id, message)
                }
            };

            for &log_id in &log_ids {
                bulk_ops.push(BulkOp::Update {
                    index: index.clone(),
                    id: log_id.to_string(),
                    doc: json!({ "cluster_id": cluster_id, "cluster_message": cluster_message }),
                });
            }

            results.push(ClusterInfo {
                cluster_id,
                cluster_message,
                log_ids,
            });
        }

        if !bulk_ops.is_empty() {
            self.backend.bulk(bulk_ops).await?;
        }

        Ok(results)
    }
}

/// Clusters of size > 1 count toward the reported cluster total (§3
/// invariant 3, §4.6 closing note).
pub fn cluster_num(clusters: &[ClusterInfo]) -> usize {
    clusters.iter().filter(|c| c.log_ids.len() > 1).count()
}

/// `true` iff no group of size > 1 emerged (§4.6 closing note).
pub fn not_found(clusters: &[ClusterInfo]) -> bool {
    cluster_num(clusters) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::model::TestItem;

    #[tokio::test]
    async fn missing_index_short_circuits_to_empty(/* §7 */) {
        let backend = Arc::new(MockBackend::new());
        let cfg = EngineConfig::default();
        let launch = Launch {
            launch_id: Uuid::new_v4(),
            launch_name: "l".into(),
            project: "demo".into(),
            analyzer_config: crate::model::AnalyzerConfig::default(),
            test_items: vec![TestItem { test_item_id: Uuid::new_v4(), logs: vec![sample_log()] }],
        };
        backend.set_index_missing(cfg.index_name(&launch.project));

        let service = ClusterService::new(backend, SimilarityScorer::default());
        let opts = ClusterOptions { number_of_log_lines: NumberOfLogLines::FULL_FIELDS, clean_numbers: false, for_update: false };
        let clusters = service.cluster(&launch, opts, &cfg).await.unwrap();
        assert!(clusters.is_empty());
    }

    #[test]
    fn signature_ignores_token_order() {
        let mut a = sample_log();
        a.found_exceptions = "b a".into();
        let mut b = sample_log();
        b.found_exceptions = "a b".into();
        assert_eq!(signature_of(&a), signature_of(&b));
    }

    #[test]
    fn cluster_hash_is_stable_for_same_members() {
        let members = vec!["conn refused 500 FooEx".to_string(), "conn refused 500 FooEx".to_string()];
        let h1 = compute_cluster_hash(&members);
        let h2 = compute_cluster_hash(&members);
        assert_eq!(h1, h2);
        assert!(h1 < 10_000_000_000_000_000);
    }

    #[test]
    fn cluster_hash_differs_for_disjoint_members() {
        let a = vec!["aaaa".to_string(), "aaaa".to_string()];
        let b = vec!["zzzz".to_string(), "zzzz".to_string()];
        assert_ne!(compute_cluster_hash(&a), compute_cluster_hash(&b));
    }

    #[test]
    fn no_common_bigrams_hashes_to_empty_string_collision_class() {
        let disjoint = vec!["aa".to_string(), "zz".to_string()];
        assert_eq!(compute_cluster_hash(&disjoint), compute_cluster_hash(&[]));
    }

    #[test]
    fn cluster_num_excludes_singletons() {
        let clusters = vec![
            ClusterInfo { cluster_id: 1, cluster_message: "a".into(), log_ids: vec![Uuid::new_v4(), Uuid::new_v4()] },
            ClusterInfo { cluster_id: 2, cluster_message: "b".into(), log_ids: vec![Uuid::new_v4()] },
        ];
        assert_eq!(cluster_num(&clusters), 1);
        assert!(!not_found(&clusters));
    }

    fn sample_log() -> Log {
        Log {
            log_id: Uuid::new_v4(),
            message: "m".into(),
            detected_message: "m".into(),
            stacktrace: String::new(),
            merged_small_logs: String::new(),
            whole_message: "m".into(),
            found_exceptions: String::new(),
            potential_status_codes: String::new(),
            only_numbers: String::new(),
            log_level: crate::model::ERROR_LEVEL,
            is_merged: false,
            unique_id: "u".into(),
            test_case_hash: 1,
            test_item: Uuid::new_v4(),
            launch_id: Uuid::new_v4(),
            launch_name: "l".into(),
            issue_type: String::new(),
            cluster_id: 0,
            cluster_message: String::new(),
        }
    }
}
