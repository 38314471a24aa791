//! End-to-end scenarios S1-S6 from `spec.md` §8, run against [`MockBackend`].
use std::sync::Arc;
use std::time::{Duration, Instant};

use triage_analyzer::featurizer::{FeatureMatrix, Model, ScoreFeaturizer, WeightedModelChooser};
use triage_analyzer::stats::NoopStatsSink;
use triage_analyzer::{
    AnalyzerConfig, AnalyzerMode, AutoAnalyzer, ClusterOptions, ClusterService, EngineConfig, Launch,
    Log, MockBackend, NumberOfLogLines, SearchMatch, SearchQuery, SearchService, SimilarityScorer,
    TestItem,
};
use uuid::Uuid;

fn base_log(test_item: Uuid, launch_id: Uuid, message: &str) -> Log {
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
        log_level: triage_analyzer::model::ERROR_LEVEL,
        is_merged: false,
        unique_id: "u".into(),
        test_case_hash: 1,
        test_item,
        launch_id,
        launch_name: "nightly".into(),
        issue_type: String::new(),
        cluster_id: 0,
        cluster_message: String::new(),
    }
}

fn search_hit(issue_type: &str, message: &str) -> triage_analyzer::model::SearchHit {
    triage_analyzer::model::SearchHit {
        log_id: Uuid::new_v4(),
        test_item: Uuid::new_v4(),
        issue_type: issue_type.to_string(),
        message: message.to_string(),
        merged_small_logs: String::new(),
        potential_status_codes: String::new(),
        score: 1.0,
        cluster_id: 0,
        cluster_message: String::new(),
    }
}

/// Always predicts the first (and only, in these scenarios) issue type
/// positive — standing in for a trained boosting classifier, since the real
/// model is out of scope (§2).
#[derive(Debug)]
struct AlwaysPositiveModel;

impl Model for AlwaysPositiveModel {
    fn predict(&self, features: &FeatureMatrix) -> (Vec<bool>, Vec<f32>) {
        let n = features.rows.len();
        (vec![true; n], vec![1.0; n])
    }
    fn feature_ids(&self) -> Vec<usize> {
        Vec::new()
    }
    fn model_info(&self) -> String {
        "always-positive-test-model".to_string()
    }
}

fn always_positive_engine(backend: Arc<MockBackend>) -> AutoAnalyzer<MockBackend> {
    AutoAnalyzer::new(
        backend,
        EngineConfig::default(),
        SimilarityScorer::default(),
        Arc::new(ScoreFeaturizer),
        Arc::new(WeightedModelChooser::new(Arc::new(AlwaysPositiveModel), 0.0)),
        Arc::new(NoopStatsSink),
    )
}

fn single_item_launch(test_item: Uuid, launch_id: Uuid, message: &str) -> Launch {
    Launch {
        launch_id,
        launch_name: "nightly".into(),
        project: "demo".into(),
        analyzer_config: AnalyzerConfig {
            analyzer_mode: AnalyzerMode::All,
            number_of_log_lines: NumberOfLogLines::FULL_FIELDS,
            min_should_match: 0,
        },
        test_items: vec![TestItem {
            test_item_id: test_item,
            logs: vec![base_log(test_item, launch_id, message)],
        }],
    }
}

#[tokio::test]
async fn s1_model_wins_when_no_defect_probe_is_empty() {
    let backend = Arc::new(MockBackend::new());
    let cfg = EngineConfig::default();
    let index = cfg.index_name("demo");
    backend.set_main_hits(&index, vec![search_hit("PB001", "NullPointerException at Foo.bar")]);

    let test_item = Uuid::new_v4();
    let launch = single_item_launch(test_item, Uuid::new_v4(), "NullPointerException at Foo.bar");

    let engine = always_positive_engine(backend);
    let results = engine.analyze_logs(vec![launch], Duration::from_secs(10)).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].test_item, test_item);
    assert_eq!(results[0].issue_type, "PB001");
}

#[tokio::test]
async fn s2_no_defect_probe_preempts_the_model() {
    let backend = Arc::new(MockBackend::new());
    let cfg = EngineConfig::default();
    let index = cfg.index_name("demo");
    backend.set_main_hits(&index, vec![search_hit("PB001", "NullPointerException at Foo.bar")]);
    backend.set_no_defect_hits(&index, vec![search_hit("ND001", "NullPointerException at Foo.bar")]);

    let test_item = Uuid::new_v4();
    let launch = single_item_launch(test_item, Uuid::new_v4(), "NullPointerException at Foo.bar");

    let engine = always_positive_engine(backend);
    let results = engine.analyze_logs(vec![launch], Duration::from_secs(10)).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].issue_type, "ND001");
}

#[tokio::test]
async fn s3_truncates_to_four_thousand_test_items() {
    let backend = Arc::new(MockBackend::new());
    let launch_id = Uuid::new_v4();
    let mut test_items = Vec::with_capacity(5_000);
    for _ in 0..5_000 {
        let test_item = Uuid::new_v4();
        test_items.push(TestItem {
            test_item_id: test_item,
            logs: vec![base_log(test_item, launch_id, "boom")],
        });
    }
    let launch = Launch {
        launch_id,
        launch_name: "nightly".into(),
        project: "demo".into(),
        analyzer_config: AnalyzerConfig::default(),
        test_items,
    };

    let engine = always_positive_engine(backend);
    let results = engine.analyze_logs(vec![launch], Duration::from_secs(60)).await;

    assert!(results.len() <= 4_000);
}

#[tokio::test]
async fn s4_clustering_splits_by_error_signature() {
    let backend = Arc::new(MockBackend::new());
    let launch_id = Uuid::new_v4();

    let mut a = base_log(Uuid::new_v4(), launch_id, "conn refused 500 FooEx");
    a.whole_message = "conn refused 500 FooEx".into();
    a.found_exceptions = "FooEx".into();
    a.potential_status_codes = "500".into();

    let mut b = base_log(Uuid::new_v4(), launch_id, "conn refused 500 FooEx");
    b.whole_message = "conn refused 500 FooEx".into();
    b.found_exceptions = "FooEx".into();
    b.potential_status_codes = "500".into();

    let mut c = base_log(Uuid::new_v4(), launch_id, "OOM 500 BarEx");
    c.whole_message = "OOM 500 BarEx".into();
    c.found_exceptions = "BarEx".into();
    c.potential_status_codes = "500".into();

    let launch = Launch {
        launch_id,
        launch_name: "nightly".into(),
        project: "demo".into(),
        analyzer_config: AnalyzerConfig::default(),
        test_items: vec![TestItem {
            test_item_id: Uuid::new_v4(),
            logs: vec![a, b, c],
        }],
    };

    let service = ClusterService::new(backend, SimilarityScorer::default());
    let opts = ClusterOptions {
        number_of_log_lines: NumberOfLogLines::FULL_FIELDS,
        clean_numbers: false,
        for_update: false,
    };
    let cfg = EngineConfig::default();
    let clusters = service.cluster(&launch, opts, &cfg).await.unwrap();

    assert_eq!(clusters.len(), 2);
    let joined = clusters.iter().find(|c| c.log_ids.len() == 2).expect("A and B join a cluster");
    assert_ne!(joined.cluster_id, 0);
    assert_eq!(joined.cluster_message, "conn refused 500 FooEx");
    let singleton = clusters.iter().find(|c| c.log_ids.len() == 1).expect("C is alone");
    assert_ne!(singleton.log_ids[0], joined.log_ids[0]);
}

#[tokio::test]
async fn s5_search_service_keeps_only_hits_clearing_both_gates() {
    let backend = Arc::new(MockBackend::new());
    let mut hits = Vec::new();
    for _ in 0..3 {
        let mut h = search_hit("TI001", "timeout 504 gateway");
        h.potential_status_codes = "504".into();
        hits.push(h);
    }
    for _ in 0..2 {
        let mut h = search_hit("TI001", "timeout 504 gateway");
        h.potential_status_codes = "200".into();
        hits.push(h);
    }
    backend.set_scroll_hits("idx", hits);

    let service = SearchService::new(backend, SimilarityScorer::default());
    let cfg = EngineConfig::default();
    let queries = vec![SearchQuery {
        message: "timeout 504 gateway".into(),
        potential_status_codes: "504".into(),
    }];

    let matches: Vec<SearchMatch> = service
        .search("idx", &queries, &[Uuid::from_u128(17)], Uuid::new_v4(), &cfg)
        .await
        .unwrap();

    assert_eq!(matches.len(), 3);
}

#[tokio::test]
async fn s6_timeout_returns_partial_results_without_panicking() {
    let backend = Arc::new(MockBackend::new());
    backend.set_msearch_delay(Duration::from_secs(3));

    let test_item = Uuid::new_v4();
    let launch = single_item_launch(test_item, Uuid::new_v4(), "boom");

    let engine = always_positive_engine(backend);
    let started = Instant::now();
    let results = engine.analyze_logs(vec![launch], Duration::from_secs(2)).await;

    assert!(started.elapsed() < Duration::from_secs(4), "should return near the 2s deadline, not wait for the 3s backend");
    assert!(results.len() <= 1);
}
