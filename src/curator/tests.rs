use super::*;
use crate::config::{CuratorConfig, LearningLoopConfig, PatternStoreConfig};
use crate::memory::InMemoryStore;
use crate::models::Pattern;

fn pattern_with_confidence(confidence: f64) -> Pattern {
    let mut p = Pattern::new("generate_tests", "d", serde_json::json!({}));
    p.confidence = confidence;
    p
}

fn curator() -> (Curator, Arc<PatternStore>) {
    let store = Arc::new(PatternStore::new(PatternStoreConfig::default()));
    let curator = Curator::new(CuratorConfig::default(), store.clone());
    (curator, store)
}

#[tokio::test]
async fn find_low_confidence_returns_gray_band_only() {
    let (curator, store) = curator();
    store.store(pattern_with_confidence(0.05)).await.unwrap(); // below auto_reject
    let gray = pattern_with_confidence(0.25);
    let gray_id = gray.id.clone();
    store.store(gray).await.unwrap();
    store.store(pattern_with_confidence(0.9)).await.unwrap(); // above low_conf cutoff

    let found = curator.find_low_confidence(10).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, gray_id);
}

#[tokio::test]
async fn review_approve_boosts_confidence_and_records_feedback() {
    let (curator, store) = curator();
    let p = pattern_with_confidence(0.5);
    let id = p.id.clone();
    store.store(p).await.unwrap();

    curator.start_session().await;
    curator
        .review(
            &id,
            ReviewDecision {
                approved: true,
                corrected_content: None,
                quality: 0.8,
                explanation: "looks right".into(),
            },
        )
        .await
        .unwrap();

    let updated = store.get(&id).await.unwrap().unwrap();
    assert!((updated.confidence - 0.6).abs() < 1e-9);

    let session = curator.end_session().await.unwrap();
    assert_eq!(session.approved_count(), 1);
    assert_eq!(session.rejected_count(), 0);
}

#[tokio::test]
async fn review_reject_deletes_pattern() {
    let (curator, store) = curator();
    let p = pattern_with_confidence(0.2);
    let id = p.id.clone();
    store.store(p).await.unwrap();

    curator
        .review(
            &id,
            ReviewDecision {
                approved: false,
                corrected_content: None,
                quality: 0.1,
                explanation: "wrong".into(),
            },
        )
        .await
        .unwrap();

    assert!(store.get(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn auto_curate_empty_store_returns_zeroes() {
    let (curator, _store) = curator();
    let report = curator.auto_curate().await.unwrap();
    assert_eq!(report.approved, 0);
    assert_eq!(report.rejected, 0);
    assert_eq!(report.needs_review, 0);
}

#[tokio::test]
async fn auto_curate_buckets_correctly() {
    let (curator, store) = curator();
    let low_id = {
        let p = pattern_with_confidence(0.05);
        let id = p.id.clone();
        store.store(p).await.unwrap();
        id
    };
    store.store(pattern_with_confidence(0.25)).await.unwrap();
    store.store(pattern_with_confidence(0.95)).await.unwrap();

    let report = curator.auto_curate().await.unwrap();
    assert_eq!(report.rejected, 1);
    assert_eq!(report.approved, 1);
    assert_eq!(report.needs_review, 1);
    assert!(store.get(&low_id).await.unwrap().is_none());
}

#[tokio::test]
async fn auto_curate_counts_whole_gray_band_not_just_low_confidence_subband() {
    // 0.6 sits between the default low_confidence_threshold (0.4) and
    // auto_approve_threshold (0.85): not auto-rejected, not auto-approved,
    // and outside find_low_confidence's narrower sub-band. It must still
    // show up as needing review.
    let (curator, store) = curator();
    store.store(pattern_with_confidence(0.05)).await.unwrap();
    store.store(pattern_with_confidence(0.6)).await.unwrap();
    store.store(pattern_with_confidence(0.95)).await.unwrap();

    let report = curator.auto_curate().await.unwrap();
    assert_eq!(report.rejected, 1);
    assert_eq!(report.approved, 1);
    assert_eq!(report.needs_review, 1);
}

#[tokio::test]
async fn force_learning_flushes_buffer_and_trains() {
    let (curator, store) = curator();
    let p = pattern_with_confidence(0.5);
    let id = p.id.clone();
    store.store(p).await.unwrap();
    curator
        .review(
            &id,
            ReviewDecision {
                approved: true,
                corrected_content: None,
                quality: 0.7,
                explanation: "ok".into(),
            },
        )
        .await
        .unwrap();

    let learning_loop = Arc::new(LearningLoop::new(
        LearningLoopConfig::default(),
        store,
        Arc::new(InMemoryStore::new()),
        "curator",
    ));
    let curator = curator.with_learning_loop(learning_loop);

    let report = curator.force_learning().await.unwrap();
    assert_eq!(report.flushed, 1);

    let report2 = curator.force_learning().await.unwrap();
    assert_eq!(report2.flushed, 0, "buffer must be empty after first flush");
}
