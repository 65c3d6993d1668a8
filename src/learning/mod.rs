//! Improvement cycle, recommendation, and training.
//!
//! The learning loop owns the fleet's [`crate::pattern_store::PatternStore`]
//! mutations and a rolling log of [`ExecutionEvent`]s. It runs its
//! four-step improvement cycle on a timer or on explicit trigger
//! ([`LearningLoop::run_cycle`]), and exposes `recommend`/`record_outcome`
//! for agents making in-the-moment strategy choices.

#[cfg(test)]
mod tests;

use crate::config::LearningLoopConfig;
use crate::error::Result;
use crate::event_bus::EventBus;
use crate::memory::MemoryStore;
use crate::models::{AbTest, AbTestStatus, ErrorKind, ExecutionEvent, Pattern, Severity};
use crate::pattern_store::{PatternQuery, PatternStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

const AUTO_APPLY_MEMORY_PARTITION: &str = "phase1/learning";
const AUTO_APPLY_MEMORY_KEY: &str = "auto_apply_enabled";

/// Outcome of one improvement cycle, reported for observability.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CycleReport {
    pub mitigations_assigned: usize,
    pub recommendations_emitted: usize,
    pub ab_tests_completed: usize,
    pub strategies_auto_applied: usize,
}

/// Reported by [`LearningLoop::train`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrainingReport {
    pub iterations: u32,
    pub patterns_learned: usize,
    pub duration_secs: f64,
    pub average_confidence: f64,
}

/// A pattern recommendation, carrying its id so [`LearningLoop::record_outcome`]
/// can feed the confidence update back in.
#[derive(Debug, Clone)]
pub struct Recommendation {
    pub pattern: Pattern,
    pub alternatives: Vec<Pattern>,
}

struct FailureTracker {
    frequency: u64,
    mitigation: Option<String>,
}

pub struct LearningLoop {
    config: LearningLoopConfig,
    pattern_store: Arc<PatternStore>,
    memory: Arc<dyn MemoryStore>,
    event_bus: Option<Arc<EventBus>>,
    source_id: String,
    execution_events: RwLock<Vec<ExecutionEvent>>,
    ab_tests: RwLock<HashMap<String, Mutex<AbTest>>>,
    /// error-kind-tag -> mitigation name, the "configurable rule table" of
    /// the improvement cycle's first step.
    mitigation_rules: HashMap<String, String>,
    failure_trackers: RwLock<HashMap<String, FailureTracker>>,
    failure_frequency_threshold: u64,
}

impl LearningLoop {
    pub fn new(
        config: LearningLoopConfig,
        pattern_store: Arc<PatternStore>,
        memory: Arc<dyn MemoryStore>,
        source_id: impl Into<String>,
    ) -> Self {
        let mut mitigation_rules = HashMap::new();
        mitigation_rules.insert("timeout".to_string(), "increase_timeout".to_string());
        mitigation_rules.insert(
            "transient_network".to_string(),
            "add_retry_with_backoff".to_string(),
        );
        mitigation_rules.insert(
            "dependency_unavailable".to_string(),
            "circuit_break_dependency".to_string(),
        );
        mitigation_rules.insert("storage".to_string(), "failover_storage_backend".to_string());

        Self {
            config,
            pattern_store,
            memory,
            event_bus: None,
            source_id: source_id.into(),
            execution_events: RwLock::new(Vec::new()),
            ab_tests: RwLock::new(HashMap::new()),
            mitigation_rules,
            failure_trackers: RwLock::new(HashMap::new()),
            failure_frequency_threshold: 3,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_mitigation_rule(mut self, kind: impl Into<String>, mitigation: impl Into<String>) -> Self {
        self.mitigation_rules.insert(kind.into(), mitigation.into());
        self
    }

    /// Feeds one execution outcome into the learning loop's bookkeeping:
    /// the rolling event log (used by `train`) and, on failure, the
    /// frequency tracker consulted by step 1 of the improvement cycle.
    pub async fn record_execution(&self, event: ExecutionEvent) {
        if !event.success {
            if let Some(kind) = event.error_kind {
                let tag = error_kind_tag(kind);
                let mut trackers = self.failure_trackers.write().await;
                let tracker = trackers.entry(tag).or_insert(FailureTracker {
                    frequency: 0,
                    mitigation: None,
                });
                tracker.frequency += 1;
            }
        }
        self.execution_events.write().await.push(event);
    }

    /// Runs one improvement cycle: mitigation assignment, recommendation
    /// scan, A/B test advancement, then bounded auto-apply, in order.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        report.mitigations_assigned = self.assign_mitigations().await?;
        report.recommendations_emitted = self.scan_high_confidence_low_usage().await?;
        report.ab_tests_completed = self.advance_ab_tests().await?;
        report.strategies_auto_applied = self.maybe_auto_apply().await?;
        Ok(report)
    }

    /// Step 1: assign a mitigation to every failure signature whose
    /// frequency exceeds the threshold and has none yet.
    async fn assign_mitigations(&self) -> Result<usize> {
        let mut trackers = self.failure_trackers.write().await;
        let mut assigned = 0;
        for (tag, tracker) in trackers.iter_mut() {
            if tracker.frequency > self.failure_frequency_threshold && tracker.mitigation.is_none() {
                if let Some(mitigation) = self.mitigation_rules.get(tag) {
                    tracker.mitigation = Some(mitigation.clone());
                    self.memory
                        .store(
                            "phase1",
                            &format!("learning/{}/mitigations/{}", self.source_id, tag),
                            serde_json::json!({ "mitigation": mitigation, "frequency": tracker.frequency }),
                            None,
                            &self.source_id,
                        )
                        .await?;
                    assigned += 1;
                }
            }
        }
        Ok(assigned)
    }

    /// Step 2: emit a `strategy_recommendation` event for every pattern
    /// that is high-confidence but rarely used.
    async fn scan_high_confidence_low_usage(&self) -> Result<usize> {
        let candidates = self
            .pattern_store
            .query(PatternQuery {
                min_confidence: Some(crate::constants::HIGH_CONFIDENCE_LOW_USAGE_CONFIDENCE),
                ..Default::default()
            })
            .await?;
        let mut emitted = 0;
        for pattern in candidates
            .into_iter()
            .filter(|p| p.usage_count < crate::constants::HIGH_CONFIDENCE_LOW_USAGE_MAX_USAGE)
        {
            if let Some(bus) = &self.event_bus {
                bus.publish(
                    "strategy_recommendation",
                    serde_json::json!({ "pattern_id": pattern.id, "pattern_type": pattern.pattern_type }),
                    Severity::Low,
                    self.source_id.clone(),
                )
                .await?;
            }
            emitted += 1;
        }
        Ok(emitted)
    }

    /// Step 3: declare winners for any A/B test whose sample budget is
    /// full, using `0.7*success_rate + 0.3*(1 - normalized_avg_time)`.
    async fn advance_ab_tests(&self) -> Result<usize> {
        let tests = self.ab_tests.read().await;
        let mut completed = 0;
        for test_lock in tests.values() {
            let mut test = test_lock.lock().await;
            if test.status != AbTestStatus::Running || !test.sample_budget_full() {
                continue;
            }
            let max_avg_time = test
                .accumulators
                .values()
                .map(|a| a.avg_time_secs)
                .fold(0.0_f64, f64::max);
            let winner = test
                .accumulators
                .iter()
                .map(|(name, acc)| {
                    let normalized_time = if max_avg_time > 0.0 {
                        acc.avg_time_secs / max_avg_time
                    } else {
                        0.0
                    };
                    let score = 0.7 * acc.success_rate + 0.3 * (1.0 - normalized_time);
                    (name.clone(), score)
                })
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(name, _)| name);
            test.winner = winner;
            test.status = AbTestStatus::Completed;
            self.memory
                .store(
                    "phase1",
                    &format!("learning/{}/ab_test/{}", self.source_id, test.id),
                    serde_json::to_value(&*test).map_err(crate::error::FleetError::Serialization)?,
                    None,
                    &self.source_id,
                )
                .await?;
            completed += 1;
        }
        Ok(completed)
    }

    /// Step 4: if auto-apply is opted into via an explicit memory entry,
    /// apply up to `AUTO_APPLY_MAX_STRATEGIES` patterns satisfying
    /// `confidence > 0.9 ∧ success_rate > 0.8`.
    async fn maybe_auto_apply(&self) -> Result<usize> {
        if !self.config.auto_apply_enabled {
            let opted_in = self
                .memory
                .retrieve(AUTO_APPLY_MEMORY_PARTITION, AUTO_APPLY_MEMORY_KEY)
                .await?
                .and_then(|entry| entry.value.as_bool())
                .unwrap_or(false);
            if !opted_in {
                return Ok(0);
            }
        }

        let candidates = self
            .pattern_store
            .query(PatternQuery {
                min_confidence: Some(crate::constants::AUTO_APPLY_MIN_CONFIDENCE),
                ..Default::default()
            })
            .await?;
        let applied: Vec<_> = candidates
            .into_iter()
            .filter(|p| p.success_rate > crate::constants::AUTO_APPLY_MIN_SUCCESS_RATE)
            .take(crate::constants::AUTO_APPLY_MAX_STRATEGIES)
            .collect();

        for pattern in &applied {
            self.memory
                .store(
                    "phase1",
                    &format!("learning/{}/auto_applied/{}", self.source_id, pattern.id),
                    serde_json::json!({ "applied_at": chrono::Utc::now() }),
                    None,
                    &self.source_id,
                )
                .await?;
        }
        Ok(applied.len())
    }

    /// Highest-confidence pattern passing `min_confidence_threshold`, plus
    /// up to three alternatives, scoped to `pattern_type`/`domain` if given.
    pub async fn recommend(
        &self,
        pattern_type: Option<&str>,
        domain: Option<&str>,
        min_confidence_threshold: f64,
    ) -> Result<Option<Recommendation>> {
        let mut candidates = self
            .pattern_store
            .query(PatternQuery {
                pattern_type: pattern_type.map(String::from),
                domain: domain.map(String::from),
                min_confidence: Some(min_confidence_threshold),
                limit: Some(4),
            })
            .await?;
        if candidates.is_empty() {
            return Ok(None);
        }
        let pattern = candidates.remove(0);
        Ok(Some(Recommendation {
            pattern,
            alternatives: candidates,
        }))
    }

    /// Feeds a recommendation's outcome back into the pattern store's
    /// confidence update rule.
    pub async fn record_outcome(&self, recommendation: &Recommendation, success: bool) -> Result<Pattern> {
        self.pattern_store
            .update_confidence(&recommendation.pattern.id, success)
            .await
    }

    /// Registers a new A/B test under the loop's management.
    pub async fn start_ab_test(&self, test: AbTest) {
        self.ab_tests.write().await.insert(test.id.clone(), Mutex::new(test));
    }

    /// Records one sample for `strategy_name` in `test_id`. Updates are
    /// serialized per test id via the per-test lock.
    pub async fn record_ab_sample(
        &self,
        test_id: &str,
        strategy_name: &str,
        success: bool,
        duration_secs: f64,
    ) -> Result<()> {
        let tests = self.ab_tests.read().await;
        let test_lock = tests
            .get(test_id)
            .ok_or_else(|| crate::error::FleetError::NotFound(format!("ab_test {test_id}")))?;
        let mut test = test_lock.lock().await;
        let acc = test
            .accumulators
            .entry(strategy_name.to_string())
            .or_default();
        let n = acc.sample_count as f64;
        acc.success_rate = (acc.success_rate * n + if success { 1.0 } else { 0.0 }) / (n + 1.0);
        acc.avg_time_secs = (acc.avg_time_secs * n + duration_secs) / (n + 1.0);
        acc.sample_count += 1;
        Ok(())
    }

    pub async fn ab_test(&self, test_id: &str) -> Option<AbTest> {
        let tests = self.ab_tests.read().await;
        match tests.get(test_id) {
            Some(lock) => Some(lock.lock().await.clone()),
            None => None,
        }
    }

    /// Bounded passes over the recorded execution log, creating or
    /// updating one pattern per distinct `(task_type, strategy)` signature.
    pub async fn train(&self, iterations: u32) -> Result<TrainingReport> {
        let start = std::time::Instant::now();
        let events = self.execution_events.read().await.clone();
        let mut signatures: HashMap<(String, Option<String>), (u64, u64)> = HashMap::new();

        for _pass in 0..iterations.max(1) {
            for event in &events {
                let key = (event.task_type.clone(), event.strategy.clone());
                let entry = signatures.entry(key).or_insert((0, 0));
                entry.0 += 1;
                if event.success {
                    entry.1 += 1;
                }
            }
        }

        let mut patterns_learned = 0;
        let mut confidence_sum = 0.0;
        for ((task_type, strategy), (total, successes)) in signatures {
            let success_rate = successes as f64 / total as f64;
            let existing = self
                .pattern_store
                .query(PatternQuery {
                    pattern_type: Some(task_type.clone()),
                    domain: strategy.clone(),
                    ..Default::default()
                })
                .await?;
            let pattern = if let Some(found) = existing.into_iter().next() {
                self.pattern_store.update_confidence(&found.id, success_rate >= 0.5).await?
            } else {
                let mut pattern = Pattern::new(
                    task_type,
                    strategy.clone().unwrap_or_default(),
                    serde_json::json!({ "strategy": strategy }),
                );
                pattern.confidence = success_rate;
                pattern.success_rate = success_rate;
                pattern.usage_count = total;
                self.pattern_store.store(pattern.clone()).await?;
                pattern
            };
            confidence_sum += pattern.confidence;
            patterns_learned += 1;
        }

        let average_confidence = if patterns_learned > 0 {
            confidence_sum / patterns_learned as f64
        } else {
            0.0
        };

        Ok(TrainingReport {
            iterations,
            patterns_learned,
            duration_secs: start.elapsed().as_secs_f64(),
            average_confidence,
        })
    }
}

fn error_kind_tag(kind: ErrorKind) -> String {
    match kind {
        ErrorKind::Validation => "validation",
        ErrorKind::Timeout => "timeout",
        ErrorKind::TransientNetwork => "transient_network",
        ErrorKind::Storage => "storage",
        ErrorKind::DependencyUnavailable => "dependency_unavailable",
        ErrorKind::NotFound => "not_found",
        ErrorKind::Cancelled => "cancelled",
        ErrorKind::Internal => "internal",
    }
    .to_string()
}
