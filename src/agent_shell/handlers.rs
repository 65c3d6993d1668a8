//! Bundled task handlers for test generation, security scanning, and gate
//! enforcement. These are illustrative adapter implementations, not real
//! QE analyses — the actual SAST/DAST/coverage engines live behind this
//! same `TaskTypeHandler` seam and are plugged in by the caller. They
//! simulate pluggable outcomes so the dispatch/gate/event machinery can be
//! exercised end to end without a real scanner attached.

use super::{HandlerContext, TaskTypeHandler};
use crate::dispatcher::CancellationToken;
use crate::error::Result;
use crate::models::{Severity, Task};
use crate::pattern_store::PatternQuery;
use async_trait::async_trait;

const CVE_MATCH_PATTERN_TYPE: &str = "cve_match";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Finding {
    pub id: String,
    pub severity: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GateResult {
    pub passed: bool,
    pub blockers: Vec<Finding>,
    pub reason: String,
    pub security_score: u32,
}

/// Block when `high_count > max_high`, reporting the exclusive excess.
/// Critical findings always block.
fn evaluate_gate(findings: &[Finding], max_high: u64) -> GateResult {
    let critical: Vec<Finding> = findings
        .iter()
        .filter(|f| f.severity == "critical")
        .cloned()
        .collect();
    let high: Vec<Finding> = findings
        .iter()
        .filter(|f| f.severity == "high")
        .cloned()
        .collect();
    let excess_high = (high.len() as u64).saturating_sub(max_high) as usize;

    let mut blockers = critical.clone();
    blockers.extend(high.into_iter().take(excess_high));

    let security_score = 100u32
        .saturating_sub((critical.len() as u32) * 40)
        .saturating_sub((blockers.len().saturating_sub(critical.len()) as u32) * 10);

    let passed = blockers.is_empty();
    let reason = format!(
        "{} blocker(s) found, security score: {}",
        blockers.len(),
        security_score
    );

    GateResult {
        passed,
        blockers,
        reason,
        security_score,
    }
}

async fn gather_findings(ctx: &HandlerContext) -> Vec<Finding> {
    let patterns = ctx
        .pattern_store
        .query(PatternQuery {
            pattern_type: Some(CVE_MATCH_PATTERN_TYPE.to_string()),
            ..Default::default()
        })
        .await
        .unwrap_or_default();
    patterns
        .into_iter()
        .filter_map(|p| serde_json::from_value::<Finding>(p.content).ok())
        .collect()
}

/// Simulates generating tests for `task.payload.path`. Emits `test.generated`.
pub struct GenerateTestsHandler;

#[async_trait]
impl TaskTypeHandler for GenerateTestsHandler {
    async fn handle(
        &self,
        task: &Task,
        _cancel: CancellationToken,
        ctx: &HandlerContext,
    ) -> Result<serde_json::Value> {
        let path = task
            .payload
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".")
            .to_string();
        let tests_generated = 5;

        ctx.coordinator
            .emit_event(
                "test.generated",
                serde_json::json!({ "task_id": task.id, "path": path, "count": tests_generated }),
                Severity::Low,
            )
            .await?;

        Ok(serde_json::json!({ "path": path, "tests_generated": tests_generated }))
    }
}

/// Simulates a security scan: gathers findings from the pattern store's
/// `cve_match` patterns (CVE ingestion itself is external; this handler
/// only assumes a CVE-shaped pattern has already landed in the store),
/// evaluates the gate, and emits `security.scan.completed` plus one
/// `security.critical.found` per critical finding.
pub struct SecurityScanHandler;

#[async_trait]
impl TaskTypeHandler for SecurityScanHandler {
    async fn handle(
        &self,
        task: &Task,
        _cancel: CancellationToken,
        ctx: &HandlerContext,
    ) -> Result<serde_json::Value> {
        let max_high = task
            .payload
            .get("max_high")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let findings = gather_findings(ctx).await;
        let gate = evaluate_gate(&findings, max_high);

        for critical in gate.blockers.iter().filter(|f| f.severity == "critical") {
            ctx.coordinator
                .emit_event(
                    "security.critical.found",
                    serde_json::json!({ "task_id": task.id, "finding": critical }),
                    Severity::Critical,
                )
                .await?;
        }

        ctx.coordinator
            .emit_event(
                "security.scan.completed",
                serde_json::json!({ "task_id": task.id, "findings": findings, "gate": &gate }),
                Severity::Low,
            )
            .await?;

        Ok(serde_json::json!({ "findings": findings, "gate": gate }))
    }
}

/// Enforces a deployment gate against `task.payload.target`, using the
/// same scan/gate logic as [`SecurityScanHandler`] but reporting the gate
/// result as the task's own outcome rather than a side artifact.
pub struct EnforceSecurityGateHandler;

#[async_trait]
impl TaskTypeHandler for EnforceSecurityGateHandler {
    async fn handle(
        &self,
        task: &Task,
        _cancel: CancellationToken,
        ctx: &HandlerContext,
    ) -> Result<serde_json::Value> {
        let target = task
            .payload
            .get("target")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let max_high = task
            .payload
            .get("max_high")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let findings = gather_findings(ctx).await;
        let gate = evaluate_gate(&findings, max_high);

        for critical in gate.blockers.iter().filter(|f| f.severity == "critical") {
            ctx.coordinator
                .emit_event(
                    "security.critical.found",
                    serde_json::json!({ "task_id": task.id, "target": target, "finding": critical }),
                    Severity::Critical,
                )
                .await?;
        }

        ctx.coordinator
            .emit_event(
                "gate.result",
                serde_json::json!({ "task_id": task.id, "target": target, "passed": gate.passed }),
                if gate.passed { Severity::Low } else { Severity::High },
            )
            .await?;

        serde_json::to_value(&gate).map_err(crate::error::FleetError::Serialization)
    }
}
