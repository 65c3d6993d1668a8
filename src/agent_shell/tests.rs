use super::*;
use crate::config::{DispatcherConfig, PatternStoreConfig};
use crate::coordinator::AgentRegistry;
use crate::event_bus::EventBus;
use crate::memory::InMemoryStore;
use crate::models::{AgentIdentity, AgentKind, Capability};
use std::collections::HashMap;

fn shell() -> Arc<AgentShell> {
    let memory = Arc::new(InMemoryStore::new());
    let event_bus = Arc::new(EventBus::new(Default::default()).with_memory(memory.clone()));
    let pattern_store = Arc::new(PatternStore::new(PatternStoreConfig::default()));
    let identity = AgentIdentity {
        id: "shell-1".to_string(),
        kind: AgentKind::from("qe"),
        capabilities: vec![Capability::new("generate_tests", "1.0")],
    };
    let lifecycle = Arc::new(LifecycleManager::new(identity, memory.clone()));
    let dispatcher = Arc::new(
        TaskDispatcher::new(DispatcherConfig::default(), "shell-1").with_event_bus(event_bus.clone()),
    );
    let registry = Arc::new(AgentRegistry::new());
    let mailboxes = Arc::new(tokio::sync::RwLock::new(HashMap::new()));
    let coordinator = Arc::new(Coordinator::new(
        "shell-1",
        event_bus,
        memory.clone(),
        registry,
        mailboxes,
    ));
    Arc::new(AgentShell::new(
        lifecycle,
        dispatcher,
        coordinator,
        pattern_store,
        memory,
    ))
}

#[tokio::test]
async fn generate_tests_reports_count_and_emits_event() {
    let shell = shell();
    shell.register_default_handlers().await;
    let (_, mut events) = shell.coordinator.subscribe_event("test.*").await;

    let task_id = shell
        .submit(crate::models::Task::new(
            "generate_tests",
            serde_json::json!({ "path": "src/" }),
        ))
        .await
        .unwrap();

    let results = shell.run_once().await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].task_id, task_id);
    match &results[0].outcome {
        TaskOutcome::Success { payload } => {
            assert_eq!(payload["tests_generated"], 5);
        }
        other => panic!("expected success, got {other:?}"),
    }

    let event = events.try_recv().expect("test.generated should have fired");
    assert_eq!(event.event_type, "test.generated");
}

#[tokio::test]
async fn security_scan_passes_with_no_findings() {
    let shell = shell();
    shell.register_default_handlers().await;

    shell
        .submit(crate::models::Task::new("security_scan", serde_json::json!({})))
        .await
        .unwrap();
    let results = shell.run_once().await.unwrap();
    assert_eq!(results.len(), 1);
    match &results[0].outcome {
        TaskOutcome::Success { payload } => {
            assert_eq!(payload["gate"]["passed"], true);
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn enforce_security_gate_blocks_on_critical_finding() {
    let shell = shell();
    shell.register_default_handlers().await;

    let mut pattern = crate::models::Pattern::new(
        "cve_match",
        "v1.2.3",
        serde_json::json!({ "id": "CVE-2026-0001", "severity": "critical" }),
    );
    pattern.confidence = 0.9;
    shell.context.pattern_store.store(pattern).await.unwrap();

    let (_, mut critical_events) = shell.coordinator.subscribe_event("security.critical.found").await;

    shell
        .submit(crate::models::Task::new(
            "enforce_security_gate",
            serde_json::json!({ "target": "v1.2.3" }),
        ))
        .await
        .unwrap();
    let results = shell.run_once().await.unwrap();
    assert_eq!(results.len(), 1);
    match &results[0].outcome {
        TaskOutcome::Success { payload } => {
            assert_eq!(payload["passed"], false);
            assert_eq!(payload["blockers"].as_array().unwrap().len(), 1);
            assert!(payload["reason"]
                .as_str()
                .unwrap()
                .starts_with("1 blocker(s) found"));
        }
        other => panic!("expected success, got {other:?}"),
    }

    critical_events
        .try_recv()
        .expect("security.critical.found should have fired");
}

#[tokio::test]
async fn run_once_on_empty_queue_is_a_no_op() {
    let shell = shell();
    shell.register_default_handlers().await;
    let results = shell.run_once().await.unwrap();
    assert!(results.is_empty());
    assert_eq!(shell.lifecycle.status().await, AgentStatus::Uninitialized);
}

#[tokio::test]
async fn unregistered_task_type_fails_without_panicking() {
    let shell = shell();
    shell
        .submit(crate::models::Task::new("unknown_type", serde_json::json!({})))
        .await
        .unwrap();
    let results = shell.run_once().await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0].outcome, TaskOutcome::Failure { .. }));
}

#[tokio::test]
async fn happy_path_test_generation_then_gated_scan() {
    let shell = shell();
    shell.register_default_handlers().await;

    let t1 = crate::models::Task::new("generate_tests", serde_json::json!({ "path": "src/" }));
    let t1_id = shell.submit(t1).await.unwrap();

    let t2 = crate::models::Task::new("security_scan", serde_json::json!({}))
        .depends_on(vec![t1_id.clone()]);
    let t2_id = shell.submit(t2).await.unwrap();

    // t1 has no prerequisites and runs first; t2 is held back until t1 is
    // in the finished set.
    let first = shell.run_once().await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].task_id, t1_id);
    assert!(matches!(first[0].outcome, TaskOutcome::Success { .. }));

    let second = shell.run_once().await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].task_id, t2_id);
    match &second[0].outcome {
        TaskOutcome::Success { payload } => assert_eq!(payload["gate"]["passed"], true),
        other => panic!("expected success, got {other:?}"),
    }

    let events = shell
        .context
        .memory
        .query(crate::memory::EVENTS_PARTITION, "*")
        .await
        .unwrap();
    let generated = events
        .iter()
        .filter(|e| e.value["event_type"] == "test.generated")
        .count();
    let scanned = events
        .iter()
        .filter(|e| e.value["event_type"] == "security.scan.completed")
        .count();
    assert_eq!(generated, 1);
    assert_eq!(scanned, 1);
}

#[tokio::test]
async fn internal_handler_failure_marks_agent_failed_and_emits_critical_event() {
    struct ExplodingHandler;

    #[async_trait::async_trait]
    impl TaskTypeHandler for ExplodingHandler {
        async fn handle(
            &self,
            _task: &crate::models::Task,
            _cancel: crate::dispatcher::CancellationToken,
            _ctx: &HandlerContext,
        ) -> crate::error::Result<serde_json::Value> {
            Err(crate::error::FleetError::Internal(anyhow::anyhow!("unclassified blowup")))
        }
    }

    let shell = shell();
    shell.register_handler("explode", Arc::new(ExplodingHandler)).await;
    shell.lifecycle.initialize(|| async { Ok(()) }).await.unwrap();
    let (_, mut failed_events) = shell.coordinator.subscribe_event("task.failed").await;

    shell
        .submit(crate::models::Task::new("explode", serde_json::json!({})))
        .await
        .unwrap();
    let results = shell.run_once().await.unwrap();

    assert_eq!(results.len(), 1);
    assert!(matches!(
        results[0].outcome,
        TaskOutcome::Failure { kind: crate::error::ErrorKind::Internal, .. }
    ));
    assert_eq!(shell.lifecycle.status().await, AgentStatus::Failed);

    let event = failed_events.try_recv().expect("task.failed should have fired");
    assert_eq!(event.event_type, "task.failed");
    assert_eq!(event.severity, Severity::Critical);
}

#[tokio::test]
async fn timeout_cancels_a_handler_that_never_yields_past_its_deadline() {
    struct SlowHandler;

    #[async_trait::async_trait]
    impl TaskTypeHandler for SlowHandler {
        async fn handle(
            &self,
            _task: &crate::models::Task,
            cancel: crate::dispatcher::CancellationToken,
            _ctx: &HandlerContext,
        ) -> crate::error::Result<serde_json::Value> {
            loop {
                if cancel.is_cancelled() {
                    return Err(crate::error::FleetError::Cancelled);
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        }
    }

    let shell = shell();
    shell.register_handler("slow", Arc::new(SlowHandler)).await;

    let task = crate::models::Task::new("slow", serde_json::json!({}))
        .with_deadline(chrono::Utc::now() + chrono::Duration::milliseconds(100));
    shell.submit(task).await.unwrap();

    let start = std::time::Instant::now();
    let results = shell.run_once().await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(results.len(), 1);
    assert!(matches!(results[0].outcome, TaskOutcome::Cancelled));
    assert_eq!(results[0].retries_consumed, 0);
    assert!(elapsed < std::time::Duration::from_millis(200), "took {elapsed:?}");
}
