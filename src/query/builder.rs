//! Pure query construction: `build(log, analyzer_config, purpose) → Query`
//! (§4.2). No I/O, no backend dependency — exactly the shape that makes the
//! clause composition in `query::ast` unit-testable.
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::model::{AnalyzerConfig, AnalyzerMode, Log, QueryPurpose};

use super::ast::{Clause, MinShouldMatch, Query};

/// Parse a `"N%"` or bare-integer threshold string into [`MinShouldMatch`].
/// Unparseable input falls back to `Percent(80)`, matching the teacher's
/// tolerant-default posture around external config values.
pub fn parse_min_should_match(s: &str) -> MinShouldMatch {
    let trimmed = s.trim();
    if let Some(pct) = trimmed.strip_suffix('%') {
        if let Ok(p) = pct.parse::<u8>() {
            return MinShouldMatch::Percent(p);
        }
    } else if let Ok(n) = trimmed.parse::<u32>() {
        return MinShouldMatch::Count(n);
    }
    MinShouldMatch::Percent(80)
}

fn effective_min_should_match(analyzer: &AnalyzerConfig, cfg: &EngineConfig) -> MinShouldMatch {
    if analyzer.min_should_match > 0 {
        MinShouldMatch::Percent(analyzer.min_should_match)
    } else {
        parse_min_should_match(&cfg.min_should_match)
    }
}

fn split_tokens(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

/// Stateless query builder (§4.2). Held as a unit struct so call sites read
/// `QueryBuilder::build(...)` consistently with the rest of the pipeline's
/// stage-named entry points.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryBuilder;

impl QueryBuilder {
    /// Apply the launch-scoping constraint shared by both query purposes.
    fn push_launch_constraint(query: &mut Query, log: &Log, analyzer: &AnalyzerConfig, cfg: &EngineConfig) {
        match analyzer.analyzer_mode {
            AnalyzerMode::LaunchName => query.push(
                Clause::Term {
                    field: "launch_name".into(),
                    value: log.launch_name.clone(),
                    boost: 1.0,
                }
                .filter(),
            ),
            AnalyzerMode::CurrentLaunch => query.push(
                Clause::Term {
                    field: "launch_id".into(),
                    value: log.launch_id.to_string(),
                    boost: 1.0,
                }
                .filter(),
            ),
            AnalyzerMode::All => query.push(
                Clause::Term {
                    field: "launch_name".into(),
                    value: log.launch_name.clone(),
                    boost: cfg.boost_launch,
                }
                .should(),
            ),
        }
    }

    fn push_shared_filters(query: &mut Query, log: &Log, analyzer: &AnalyzerConfig, cfg: &EngineConfig) {
        query.push(
            Clause::Range {
                field: "log_level".into(),
                gte: crate::model::ERROR_LEVEL as i64,
            }
            .filter(),
        );
        query.push(Clause::Exists { field: "issue_type".into() }.filter());
        Self::push_launch_constraint(query, log, analyzer, cfg);
    }

    fn push_main_similarity(query: &mut Query, log: &Log, analyzer: &AnalyzerConfig, cfg: &EngineConfig) {
        let msm = effective_min_should_match(analyzer, cfg);

        match log.branch() {
            crate::model::LogBranch::MessageDetectedStacktrace => {
                query.push(
                    Clause::Term {
                        field: "is_merged".into(),
                        value: "false".into(),
                        boost: 1.0,
                    }
                    .filter(),
                );

                if analyzer.number_of_log_lines.is_full_fields() {
                    query.push(
                        Clause::MoreLikeThis {
                            field: "detected_message".into(),
                            like: log.detected_message.clone(),
                            min_should_match: msm,
                            boost: 4.0,
                        }
                        .must(),
                    );
                    if !log.stacktrace.is_empty() {
                        query.push(
                            Clause::MoreLikeThis {
                                field: "stacktrace".into(),
                                like: log.stacktrace.clone(),
                                min_should_match: msm,
                                boost: 2.0,
                            }
                            .must(),
                        );
                    } else {
                        query.push(Clause::Exists { field: "stacktrace".into() }.must_not());
                    }
                } else {
                    query.push(
                        Clause::MoreLikeThis {
                            field: "message".into(),
                            like: log.message.clone(),
                            min_should_match: msm,
                            boost: 4.0,
                        }
                        .must(),
                    );
                    query.push(
                        Clause::MoreLikeThis {
                            field: "detected_message".into(),
                            like: log.detected_message.clone(),
                            min_should_match: MinShouldMatch::Percent(80),
                            boost: 2.0,
                        }
                        .should(),
                    );
                    query.push(
                        Clause::MoreLikeThis {
                            field: "stacktrace".into(),
                            like: log.stacktrace.clone(),
                            min_should_match: MinShouldMatch::Percent(60),
                            boost: 1.0,
                        }
                        .should(),
                    );
                }

                query.push(
                    Clause::MoreLikeThis {
                        field: "merged_small_logs".into(),
                        like: log.merged_small_logs.clone(),
                        min_should_match: MinShouldMatch::Percent(80),
                        boost: 0.5,
                    }
                    .should(),
                );
                let only_numbers = split_tokens(&log.only_numbers);
                if !only_numbers.is_empty() {
                    query.push(
                        Clause::Terms {
                            field: "only_numbers".into(),
                            values: only_numbers,
                            min_should_match: MinShouldMatch::Count(1),
                            boost: 4.0,
                        }
                        .should(),
                    );
                }
            }
            crate::model::LogBranch::Merged => {
                query.push(
                    Clause::Term {
                        field: "is_merged".into(),
                        value: "true".into(),
                        boost: 1.0,
                    }
                    .filter(),
                );
                query.push(Clause::Exists { field: "message".into() }.must_not());
                query.push(
                    Clause::MoreLikeThis {
                        field: "merged_small_logs".into(),
                        like: log.merged_small_logs.clone(),
                        min_should_match: msm,
                        boost: 2.0,
                    }
                    .must(),
                );
            }
        }

        let found_exceptions = split_tokens(&log.found_exceptions);
        if !found_exceptions.is_empty() {
            query.push(
                Clause::Terms {
                    field: "found_exceptions".into(),
                    values: found_exceptions,
                    min_should_match: MinShouldMatch::Count(1),
                    boost: 4.0,
                }
                .must(),
            );
        }
        let status_codes = split_tokens(&log.potential_status_codes);
        if !status_codes.is_empty() {
            query.push(
                Clause::Terms {
                    field: "potential_status_codes".into(),
                    values: status_codes,
                    min_should_match: MinShouldMatch::Count(1),
                    boost: 4.0,
                }
                .should(),
            );
        }
    }

    fn push_no_defect_probe(
        query: &mut Query,
        log: &Log,
        analyzer: &AnalyzerConfig,
        cfg: &EngineConfig,
        self_test_item: Uuid,
    ) {
        let msm = effective_min_should_match(analyzer, cfg);

        query.push(
            Clause::Term {
                field: "is_merged".into(),
                value: "false".into(),
                boost: 1.0,
            }
            .filter(),
        );
        query.push(
            Clause::Wildcard {
                field: "issue_type".into(),
                pattern: "TI*".into(),
            }
            .must_not(),
        );
        query.push(
            Clause::Wildcard {
                field: "issue_type".into(),
                pattern: "ti*".into(),
            }
            .must_not(),
        );
        query.push(
            Clause::Term {
                field: "test_item".into(),
                value: self_test_item.to_string(),
                boost: 1.0,
            }
            .must_not(),
        );
        query.push(
            Clause::Term {
                field: "unique_id".into(),
                value: log.unique_id.clone(),
                boost: 1.0,
            }
            .must(),
        );
        query.push(
            Clause::Term {
                field: "test_case_hash".into(),
                value: log.test_case_hash.to_string(),
                boost: 1.0,
            }
            .must(),
        );
        query.push(
            Clause::MoreLikeThis {
                field: "message".into(),
                like: log.message.clone(),
                min_should_match: msm,
                boost: 1.0,
            }
            .must(),
        );
    }

    /// Build a structured backend query for `log` under `analyzer` and
    /// `purpose`. `self_test_item` is the test item `log` belongs to, needed
    /// by the no-defect probe's self-exclusion clause.
    pub fn build(
        log: &Log,
        analyzer: &AnalyzerConfig,
        purpose: QueryPurpose,
        cfg: &EngineConfig,
        self_test_item: Uuid,
    ) -> Query {
        let mut query = Query::default();
        Self::push_shared_filters(&mut query, log, analyzer, cfg);
        match purpose {
            QueryPurpose::MainSimilarity => Self::push_main_similarity(&mut query, log, analyzer, cfg),
            QueryPurpose::NoDefectProbe => {
                Self::push_no_defect_probe(&mut query, log, analyzer, cfg, self_test_item)
            }
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NumberOfLogLines;

    fn sample_log(message: &str) -> Log {
        Log {
            log_id: Uuid::new_v4(),
            message: message.to_string(),
            detected_message: message.to_string(),
            stacktrace: String::new(),
            merged_small_logs: String::new(),
            whole_message: message.to_string(),
            found_exceptions: String::new(),
            potential_status_codes: String::new(),
            only_numbers: String::new(),
            log_level: crate::model::ERROR_LEVEL,
            is_merged: false,
            unique_id: "u1".into(),
            test_case_hash: 42,
            test_item: Uuid::new_v4(),
            launch_id: Uuid::new_v4(),
            launch_name: "nightly".into(),
            issue_type: String::new(),
            cluster_id: 0,
            cluster_message: String::new(),
        }
    }

    #[test]
    fn branch_a_full_fields_sets_is_merged_false_filter() {
        let log = sample_log("NullPointerException at Foo.bar");
        let cfg = EngineConfig::default();
        let analyzer = AnalyzerConfig::default();
        let q = QueryBuilder::build(&log, &analyzer, QueryPurpose::MainSimilarity, &cfg, log.test_item);

        assert!(q.filter.iter().any(|c| matches!(
            c,
            Clause::Term { field, value, .. } if field == "is_merged" && value == "false"
        )));
        assert!(q.must.iter().any(|c| matches!(
            c,
            Clause::MoreLikeThis { field, .. } if field == "detected_message"
        )));
        // No stacktrace present -> must-not exist.
        assert!(q
            .must_not
            .iter()
            .any(|c| matches!(c, Clause::Exists { field } if field == "stacktrace")));
    }

    #[test]
    fn branch_a_with_stacktrace_must_matches_it() {
        let mut log = sample_log("boom");
        log.stacktrace = "at Foo.bar(Foo.java:10)".into();
        let cfg = EngineConfig::default();
        let analyzer = AnalyzerConfig::default();
        let q = QueryBuilder::build(&log, &analyzer, QueryPurpose::MainSimilarity, &cfg, log.test_item);

        assert!(q.must.iter().any(|c| matches!(
            c,
            Clause::MoreLikeThis { field, boost, .. } if field == "stacktrace" && (*boost - 2.0).abs() < 1e-6
        )));
        assert!(q.must_not.is_empty());
    }

    #[test]
    fn branch_a_first_n_lines_uses_message_field() {
        let log = sample_log("short merged text");
        let cfg = EngineConfig::default();
        let mut analyzer = AnalyzerConfig::default();
        analyzer.number_of_log_lines = NumberOfLogLines(5);
        let q = QueryBuilder::build(&log, &analyzer, QueryPurpose::MainSimilarity, &cfg, log.test_item);

        assert!(q.must.iter().any(|c| matches!(
            c,
            Clause::MoreLikeThis { field, boost, .. } if field == "message" && (*boost - 4.0).abs() < 1e-6
        )));
        assert!(q.should.iter().any(|c| matches!(
            c,
            Clause::MoreLikeThis { field, .. } if field == "detected_message"
        )));
    }

    #[test]
    fn branch_b_merged_logs_filters_is_merged_true() {
        let mut log = sample_log("");
        log.merged_small_logs = "some merged content".into();
        let cfg = EngineConfig::default();
        let analyzer = AnalyzerConfig::default();
        let q = QueryBuilder::build(&log, &analyzer, QueryPurpose::MainSimilarity, &cfg, log.test_item);

        assert!(q.filter.iter().any(|c| matches!(
            c,
            Clause::Term { field, value, .. } if field == "is_merged" && value == "true"
        )));
        assert!(q
            .must_not
            .iter()
            .any(|c| matches!(c, Clause::Exists { field } if field == "message")));
    }

    #[test]
    fn found_exceptions_adds_high_precision_must_gate() {
        let mut log = sample_log("npe");
        log.found_exceptions = "java.lang.NullPointerException".into();
        let cfg = EngineConfig::default();
        let analyzer = AnalyzerConfig::default();
        let q = QueryBuilder::build(&log, &analyzer, QueryPurpose::MainSimilarity, &cfg, log.test_item);

        assert!(q.must.iter().any(|c| matches!(
            c,
            Clause::Terms { field, .. } if field == "found_exceptions"
        )));
    }

    #[test]
    fn all_mode_boosts_launch_name_instead_of_filtering() {
        let log = sample_log("npe");
        let cfg = EngineConfig::default();
        let analyzer = AnalyzerConfig::default(); // AnalyzerMode::All
        let q = QueryBuilder::build(&log, &analyzer, QueryPurpose::MainSimilarity, &cfg, log.test_item);

        assert!(q.should.iter().any(|c| matches!(
            c,
            Clause::Term { field, .. } if field == "launch_name"
        )));
        assert!(!q.filter.iter().any(|c| matches!(
            c,
            Clause::Term { field, .. } if field == "launch_name"
        )));
    }

    #[test]
    fn launch_name_mode_filters_on_launch_name() {
        let log = sample_log("npe");
        let cfg = EngineConfig::default();
        let mut analyzer = AnalyzerConfig::default();
        analyzer.analyzer_mode = AnalyzerMode::LaunchName;
        let q = QueryBuilder::build(&log, &analyzer, QueryPurpose::MainSimilarity, &cfg, log.test_item);

        assert!(q.filter.iter().any(|c| matches!(
            c,
            Clause::Term { field, .. } if field == "launch_name"
        )));
    }

    #[test]
    fn no_defect_probe_excludes_self_and_requires_identity_fields() {
        let log = sample_log("npe");
        let cfg = EngineConfig::default();
        let analyzer = AnalyzerConfig::default();
        let q = QueryBuilder::build(&log, &analyzer, QueryPurpose::NoDefectProbe, &cfg, log.test_item);

        assert!(q.must_not.iter().any(|c| matches!(
            c,
            Clause::Term { field, value, .. } if field == "test_item" && value == &log.test_item.to_string()
        )));
        assert!(q
            .must
            .iter()
            .any(|c| matches!(c, Clause::Term { field, .. } if field == "unique_id")));
        assert!(q
            .must
            .iter()
            .any(|c| matches!(c, Clause::Term { field, .. } if field == "test_case_hash")));
        assert_eq!(
            q.must_not
                .iter()
                .filter(|c| matches!(c, Clause::Wildcard { field, .. } if field == "issue_type"))
                .count(),
            2
        );
    }
}
