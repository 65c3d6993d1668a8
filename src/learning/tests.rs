use super::*;
use crate::config::PatternStoreConfig;
use crate::memory::InMemoryStore;
use crate::models::{AbTest, ErrorKind, StrategyUnderTest};

fn loop_with(pattern_store: Arc<PatternStore>) -> LearningLoop {
    LearningLoop::new(
        LearningLoopConfig::default(),
        pattern_store,
        Arc::new(InMemoryStore::new()),
        "learning-loop",
    )
}

#[tokio::test]
async fn recommend_returns_highest_confidence_plus_alternatives() {
    let store = Arc::new(PatternStore::new(PatternStoreConfig::default()));
    for (conf, ptype) in [(0.9, "a"), (0.8, "b"), (0.7, "c"), (0.6, "d"), (0.95, "e")] {
        let mut p = Pattern::new("security_scan", ptype, serde_json::json!({}));
        p.confidence = conf;
        store.store(p).await.unwrap();
    }
    let learning = loop_with(store);
    let rec = learning
        .recommend(Some("security_scan"), None, 0.5)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.pattern.domain, "e");
    assert_eq!(rec.alternatives.len(), 3);
}

#[tokio::test]
async fn recommend_respects_threshold() {
    let store = Arc::new(PatternStore::new(PatternStoreConfig::default()));
    let mut p = Pattern::new("security_scan", "low", serde_json::json!({}));
    p.confidence = 0.1;
    store.store(p).await.unwrap();
    let learning = loop_with(store);
    let rec = learning.recommend(None, None, 0.5).await.unwrap();
    assert!(rec.is_none());
}

#[tokio::test]
async fn record_outcome_feeds_pattern_store() {
    let store = Arc::new(PatternStore::new(PatternStoreConfig::default()));
    let p = Pattern::new("generate_tests", "d", serde_json::json!({}));
    store.store(p.clone()).await.unwrap();
    let learning = loop_with(store.clone());
    let rec = Recommendation {
        pattern: p,
        alternatives: vec![],
    };
    let updated = learning.record_outcome(&rec, true).await.unwrap();
    assert_eq!(updated.usage_count, 1);
}

#[tokio::test]
async fn ab_test_winner_favors_higher_success_and_lower_time() {
    let store = Arc::new(PatternStore::new(PatternStoreConfig::default()));
    let learning = loop_with(store);

    let test = AbTest::new(
        "gate-strategy",
        vec![
            StrategyUnderTest {
                name: "fast".into(),
                config: serde_json::json!({}),
            },
            StrategyUnderTest {
                name: "thorough".into(),
                config: serde_json::json!({}),
            },
        ],
        2,
    );
    let test_id = test.id.clone();
    learning.start_ab_test(test).await;

    for _ in 0..2 {
        learning.record_ab_sample(&test_id, "fast", true, 1.0).await.unwrap();
        learning
            .record_ab_sample(&test_id, "thorough", true, 5.0)
            .await
            .unwrap();
    }

    let completed = learning.advance_ab_tests().await.unwrap();
    assert_eq!(completed, 1);
    let test = learning.ab_test(&test_id).await.unwrap();
    assert_eq!(test.status, AbTestStatus::Completed);
    assert_eq!(test.winner.as_deref(), Some("fast"));
}

#[tokio::test]
async fn train_creates_one_pattern_per_signature() {
    let store = Arc::new(PatternStore::new(PatternStoreConfig::default()));
    let learning = loop_with(store.clone());

    for i in 0..5 {
        learning
            .record_execution(ExecutionEvent {
                task_id: format!("t{i}"),
                task_type: "generate_tests".into(),
                strategy: Some("default".into()),
                success: i % 2 == 0,
                duration_secs: 1.0,
                error_kind: if i % 2 == 0 { None } else { Some(ErrorKind::Timeout) },
                recorded_at: chrono::Utc::now(),
            })
            .await;
    }

    let report = learning.train(3).await.unwrap();
    assert_eq!(report.patterns_learned, 1);
    assert_eq!(report.iterations, 3);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn assign_mitigations_only_after_frequency_threshold() {
    let store = Arc::new(PatternStore::new(PatternStoreConfig::default()));
    let learning = loop_with(store);

    for i in 0..4 {
        learning
            .record_execution(ExecutionEvent {
                task_id: format!("t{i}"),
                task_type: "security_scan".into(),
                strategy: None,
                success: false,
                duration_secs: 0.1,
                error_kind: Some(ErrorKind::TransientNetwork),
                recorded_at: chrono::Utc::now(),
            })
            .await;
    }

    let assigned = learning.assign_mitigations().await.unwrap();
    assert_eq!(assigned, 1);
    // A second pass with no new signal must not reassign.
    let assigned_again = learning.assign_mitigations().await.unwrap();
    assert_eq!(assigned_again, 0);
}

#[tokio::test]
async fn auto_apply_requires_explicit_memory_opt_in() {
    let store = Arc::new(PatternStore::new(PatternStoreConfig::default()));
    let mut p = Pattern::new("generate_tests", "d", serde_json::json!({}));
    p.confidence = 0.95;
    p.success_rate = 0.9;
    store.store(p).await.unwrap();
    let learning = loop_with(store);

    let applied = learning.maybe_auto_apply().await.unwrap();
    assert_eq!(applied, 0, "auto-apply must not run without opt-in");
}
