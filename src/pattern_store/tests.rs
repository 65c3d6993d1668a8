use super::*;
use crate::config::PatternStoreConfig;
use crate::models::Pattern;

fn config() -> PatternStoreConfig {
    PatternStoreConfig {
        max_patterns: 3,
        learning_rate: 0.05,
        min_confidence_threshold: 0.2,
    }
}

fn pattern(id: &str, confidence: f64) -> Pattern {
    Pattern {
        id: id.to_string(),
        pattern_type: "strategy".to_string(),
        domain: "test_generation".to_string(),
        content: serde_json::json!({}),
        embedding: None,
        confidence,
        usage_count: 0,
        success_rate: 0.0,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn store_and_get_round_trip() {
    let store = PatternStore::new(config());
    store.store(pattern("p1", 0.5)).await.unwrap();
    let fetched = store.get("p1").await.unwrap().unwrap();
    assert_eq!(fetched.id, "p1");
    assert_eq!(fetched.confidence, 0.5);
}

#[tokio::test]
async fn store_at_capacity_evicts_exactly_one_lowest_confidence_entry() {
    let store = PatternStore::new(config());
    store.store(pattern("low", 0.1)).await.unwrap();
    store.store(pattern("mid", 0.5)).await.unwrap();
    store.store(pattern("high", 0.9)).await.unwrap();
    assert_eq!(store.len().await, 3);

    store.store(pattern("new", 0.6)).await.unwrap();

    assert_eq!(store.len().await, 3);
    assert!(store.get("low").await.unwrap().is_none());
    assert!(store.get("mid").await.unwrap().is_some());
    assert!(store.get("high").await.unwrap().is_some());
    assert!(store.get("new").await.unwrap().is_some());
}

#[tokio::test]
async fn update_confidence_converges_to_one_after_repeated_success() {
    let store = PatternStore::new(config());
    store.store(pattern("p1", 0.5)).await.unwrap();

    for _ in 0..100 {
        store.update_confidence("p1", true).await.unwrap();
    }

    let pattern = store.get("p1").await.unwrap().unwrap();
    assert_eq!(pattern.confidence, 1.0);
    assert_eq!(pattern.usage_count, 100);
    assert_eq!(pattern.success_rate, 1.0);
}

#[tokio::test]
async fn update_confidence_clamps_to_zero_after_repeated_failure() {
    let store = PatternStore::new(config());
    store.store(pattern("p1", 0.1)).await.unwrap();

    for _ in 0..50 {
        store.update_confidence("p1", false).await.unwrap();
    }

    let pattern = store.get("p1").await.unwrap().unwrap();
    assert_eq!(pattern.confidence, 0.0);
    assert_eq!(pattern.success_rate, 0.0);
    assert_eq!(pattern.usage_count, 50);
}

#[tokio::test]
async fn update_confidence_on_missing_pattern_is_not_found() {
    let store = PatternStore::new(config());
    let result = store.update_confidence("missing", true).await;
    assert!(matches!(result, Err(FleetError::NotFound(_))));
}

#[tokio::test]
async fn boost_confidence_clamps_and_is_distinct_from_update_confidence() {
    let store = PatternStore::new(config());
    store.store(pattern("p1", 0.95)).await.unwrap();
    let boosted = store.boost_confidence("p1", 0.5).await.unwrap();
    assert_eq!(boosted.confidence, 1.0);
    assert_eq!(boosted.usage_count, 0, "boost must not touch usage_count");
}

#[tokio::test]
async fn delete_removes_pattern() {
    let store = PatternStore::new(config());
    store.store(pattern("p1", 0.5)).await.unwrap();
    assert!(store.delete("p1").await.unwrap());
    assert!(store.get("p1").await.unwrap().is_none());
    assert!(!store.delete("p1").await.unwrap());
}

#[tokio::test]
async fn query_filters_by_type_domain_and_confidence_range() {
    let store = PatternStore::new(config());
    store.store(pattern("low", 0.1)).await.unwrap();
    store.store(pattern("high", 0.9)).await.unwrap();

    let matched = store
        .query(PatternQuery {
            min_confidence: Some(0.5),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].id, "high");
}

#[tokio::test]
async fn export_then_import_is_identity_on_ids() {
    let store = PatternStore::new(config());
    store.store(pattern("p1", 0.3)).await.unwrap();
    store.store(pattern("p2", 0.7)).await.unwrap();

    let exported = store.export_all().await.unwrap();
    let added = store.import(exported).await.unwrap();

    assert_eq!(added, 0, "importing what was exported must add nothing new");
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn find_similar_ranks_by_cosine_similarity() {
    let store = PatternStore::new(config());
    let mut close = pattern("close", 0.5);
    close.embedding = Some(vec![1.0, 0.0, 0.0]);
    let mut far = pattern("far", 0.5);
    far.embedding = Some(vec![0.0, 1.0, 0.0]);
    store.store(close).await.unwrap();
    store.store(far).await.unwrap();

    let top = store.find_similar(&[1.0, 0.0, 0.0], 1).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].0.id, "close");
}
