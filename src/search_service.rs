//! SearchService (§4.7): "find test items whose logs look like X",
//! subject to precision gates on both message and status-code similarity.
use std::collections::HashSet;

use tracing::instrument;
use uuid::Uuid;

use crate::backend::SearchBackend;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::issue_type;
use crate::query::ast::{Clause, MinShouldMatch, Query};
use crate::similarity::SimilarityScorer;

/// Hard cap on hits streamed per input message, regardless of how many the
/// backend reports (§4.7).
const SCROLL_CAP: usize = 10_000;
/// Page size requested per `scroll` call.
const SCROLL_PAGE_SIZE: usize = 500;
/// Status-code similarity gate is intentionally tighter than the message
/// gate: codes either match or they don't (§4.7).
const STATUS_CODE_MIN_SIMILARITY: f32 = 0.99;

/// A caller-supplied free-form message to search for, plus its status codes
/// (already extracted, per §2 "log preprocessing ... consumed as pure
/// functions").
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub message: String,
    pub potential_status_codes: String,
}

/// One matched test item (§4.7 "unique (logId, testItemId) pairs").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SearchMatch {
    pub log_id: Uuid,
    pub test_item: Uuid,
}

fn token_set(text: &str) -> HashSet<&str> {
    text.split_whitespace().collect()
}

/// Scales `minShouldMatch` down for short messages, where demanding a fixed
/// percentage of a 2-3 token message is too strict to find anything (§4.7
/// "compute per-text min-should-match from length").
fn min_should_match_for_length(token_count: usize, base_percent: u8) -> MinShouldMatch {
    match token_count {
        0..=2 => MinShouldMatch::Count(1),
        3..=5 => MinShouldMatch::Percent(base_percent.min(60)),
        _ => MinShouldMatch::Percent(base_percent),
    }
}

pub struct SearchService<B: SearchBackend> {
    backend: std::sync::Arc<B>,
    scorer: SimilarityScorer,
}

impl<B: SearchBackend> SearchService<B> {
    pub fn new(backend: std::sync::Arc<B>, scorer: SimilarityScorer) -> Self {
        Self { backend, scorer }
    }

    fn build_query(message: &str, launch_ids: &[Uuid], exclude_item_id: Uuid, min_should_match: MinShouldMatch) -> Query {
        let mut query = Query::default();

        // "issue_type starts with TI or ti" is an OR, not an AND: push both
        // wildcards into the top-level should bucket with
        // minimum_should_match=1 rather than as two separate filters, which
        // would demand both patterns match the same string at once (§4.7).
        query.push(Clause::Wildcard { field: "issue_type".into(), pattern: "TI*".into() }.should());
        query.push(Clause::Wildcard { field: "issue_type".into(), pattern: "ti*".into() }.should());
        query.minimum_should_match = Some(MinShouldMatch::Count(1));
        if !launch_ids.is_empty() {
            query.push(
                Clause::Terms {
                    field: "launch_id".into(),
                    values: launch_ids.iter().map(Uuid::to_string).collect(),
                    min_should_match: MinShouldMatch::Count(1),
                    boost: 1.0,
                }
                .filter(),
            );
        }
        query.push(
            Clause::Term {
                field: "test_item".into(),
                value: exclude_item_id.to_string(),
                boost: 1.0,
            }
            .must_not(),
        );
        query.push(
            Clause::MoreLikeThis {
                field: "message".into(),
                like: message.to_string(),
                min_should_match,
                boost: 1.0,
            }
            .must(),
        );

        query
    }

    /// §4.7: for each input message, dedup by token set, build a precision
    /// query, stream hits up to [`SCROLL_CAP`], and keep only hits clearing
    /// both the message and status-code similarity gates.
    #[instrument(skip(self, messages, cfg), fields(index = %index, message_count = messages.len()))]
    pub async fn search(
        &self,
        index: &str,
        messages: &[SearchQuery],
        launch_ids: &[Uuid],
        exclude_item_id: Uuid,
        cfg: &EngineConfig,
    ) -> Result<Vec<SearchMatch>> {
        // §7: missing (or unreachable) index yields an empty result and
        // short-circuits rather than erroring.
        if !matches!(self.backend.index_exists(index).await, Ok(true)) {
            return Ok(Vec::new());
        }

        let base_percent = (cfg.search_logs_min_similarity * 100.0).round() as u8;
        let mut already_searched: HashSet<String> = HashSet::new();
        let mut matches: HashSet<SearchMatch> = HashSet::new();

        for query in messages {
            let tokens = token_set(&query.message);
            if tokens.is_empty() {
                continue;
            }
            let mut sorted: Vec<&str> = tokens.iter().copied().collect();
            sorted.sort_unstable();
            let dedup_key = sorted.join(" ");
            if !already_searched.insert(dedup_key) {
                continue;
            }

            let min_should_match = min_should_match_for_length(tokens.len(), base_percent);
            let body = Self::build_query(&query.message, launch_ids, exclude_item_id, min_should_match).to_value();

            let mut scroll_id: Option<String> = None;
            let mut collected = 0usize;
            loop {
                let page = self.backend.scroll(index, body.clone(), scroll_id.clone(), SCROLL_PAGE_SIZE).await?;
                for hit in &page.hits {
                    if !issue_type::is_to_investigate(&hit.issue_type) {
                        continue;
                    }
                    let message_sim = self.scorer.score(&query.message, &hit.message);
                    if message_sim.similarity < cfg.search_logs_min_similarity {
                        continue;
                    }
                    let code_sim = self.scorer.score(&query.potential_status_codes, &hit.potential_status_codes);
                    if code_sim.similarity < STATUS_CODE_MIN_SIMILARITY {
                        continue;
                    }
                    matches.insert(SearchMatch {
                        log_id: hit.log_id,
                        test_item: hit.test_item,
                    });
                }
                collected += page.hits.len();

                match page.scroll_id {
                    Some(next) if collected < SCROLL_CAP => scroll_id = Some(next),
                    _ => break,
                }
            }
        }

        Ok(matches.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::model::SearchHit;
    use std::sync::Arc;

    #[test]
    fn issue_type_wildcards_are_ored_not_anded() {
        let query = SearchService::<MockBackend>::build_query("a b", &[], Uuid::new_v4(), MinShouldMatch::Percent(80));
        let body = query.to_value();
        let should = body["query"]["bool"]["should"].as_array().unwrap();
        assert_eq!(should.len(), 2);
        assert_eq!(body["query"]["bool"]["minimum_should_match"], "1");
        // Neither wildcard clause is in `filter`, where it would be ANDed
        // against its sibling and never match any real string.
        assert!(body["query"]["bool"]["filter"].as_array().unwrap().is_empty());
    }

    fn hit(issue_type: &str, message: &str, status_codes: &str) -> SearchHit {
        SearchHit {
            log_id: Uuid::new_v4(),
            test_item: Uuid::new_v4(),
            issue_type: issue_type.to_string(),
            message: message.to_string(),
            merged_small_logs: String::new(),
            potential_status_codes: status_codes.to_string(),
            score: 1.0,
            cluster_id: 0,
            cluster_message: String::new(),
        }
    }

    #[tokio::test]
    async fn keeps_only_hits_clearing_both_gates(/* S5 */) {
        let backend = Arc::new(MockBackend::new());
        let mut hits = Vec::new();
        for _ in 0..3 {
            hits.push(hit("TI001", "timeout 504 gateway", "504"));
        }
        for _ in 0..2 {
            hits.push(hit("TI001", "timeout 504 gateway", "200"));
        }
        backend.set_scroll_hits("idx", hits);

        let service = SearchService::new(backend, SimilarityScorer::default());
        let cfg = EngineConfig::default();
        let queries = vec![SearchQuery {
            message: "timeout 504 gateway".into(),
            potential_status_codes: "504".into(),
        }];

        let launch_ids = vec![Uuid::from_u128(17)];
        let matches = service.search("idx", &queries, &launch_ids, Uuid::new_v4(), &cfg).await.unwrap();
        assert_eq!(matches.len(), 3);
    }

    #[tokio::test]
    async fn deduplicates_messages_by_token_set() {
        let backend = Arc::new(MockBackend::new());
        backend.set_scroll_hits("idx", vec![hit("TI001", "a b c", "1")]);
        let service = SearchService::new(backend, SimilarityScorer::default());
        let cfg = EngineConfig::default();

        let queries = vec![
            SearchQuery { message: "a b c".into(), potential_status_codes: "1".into() },
            SearchQuery { message: "c b a".into(), potential_status_codes: "1".into() },
        ];

        let matches = service.search("idx", &queries, &[], Uuid::new_v4(), &cfg).await.unwrap();
        // Second query is a token-set duplicate of the first, so only one
        // scroll cycle runs; still only unique (logId, testItem) pairs come out.
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn missing_index_short_circuits_to_empty(/* §7 */) {
        let backend = Arc::new(MockBackend::new());
        backend.set_scroll_hits("idx", vec![hit("TI001", "a b c", "1")]);
        backend.set_index_missing("idx");
        let service = SearchService::new(backend, SimilarityScorer::default());
        let cfg = EngineConfig::default();

        let queries = vec![SearchQuery { message: "a b c".into(), potential_status_codes: "1".into() }];
        let matches = service.search("idx", &queries, &[], Uuid::new_v4(), &cfg).await.unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn non_investigate_hits_are_ignored() {
        let backend = Arc::new(MockBackend::new());
        backend.set_scroll_hits("idx", vec![hit("PB001", "a b c", "1")]);
        let service = SearchService::new(backend, SimilarityScorer::default());
        let cfg = EngineConfig::default();

        let queries = vec![SearchQuery { message: "a b c".into(), potential_status_codes: "1".into() }];
        let matches = service.search("idx", &queries, &[], Uuid::new_v4(), &cfg).await.unwrap();
        assert!(matches.is_empty());
    }
}
