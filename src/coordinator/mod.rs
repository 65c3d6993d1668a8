//! Bridges the event bus, the memory store, and (optionally) the transport
//! into a single per-agent routing surface.


use crate::error::Result;
use crate::event_bus::EventBus;
use crate::memory::MemoryStore;
use crate::models::{AgentId, AgentMessage, Event, MessageTarget, Severity};
use crate::transport::{SharedTransport, Transport};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

fn agent_channel(agent_id: &str) -> String {
    format!("agent/{agent_id}")
}

fn broadcast_channel(swarm_id: &str) -> String {
    format!("broadcast/{swarm_id}")
}

/// Process-local registry of colocated agent ids, consulted by the
/// coordinator before deciding whether a directed message needs the
/// transport at all.
#[derive(Default)]
pub struct AgentRegistry {
    colocated: RwLock<HashSet<AgentId>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, agent_id: impl Into<AgentId>) {
        self.colocated.write().await.insert(agent_id.into());
    }

    pub async fn unregister(&self, agent_id: &str) {
        self.colocated.write().await.remove(agent_id);
    }

    pub async fn is_colocated(&self, agent_id: &str) -> bool {
        self.colocated.read().await.contains(agent_id)
    }
}

/// Wires one agent to the shared event bus, memory store, and optional
/// transport. Messages to a colocated agent are delivered in-process;
/// everything else is serialized onto the transport. Delivery is
/// best-effort, at-most-once; no acknowledgements are implemented.
pub struct Coordinator {
    agent_id: AgentId,
    event_bus: Arc<EventBus>,
    memory: Arc<dyn MemoryStore>,
    transport: Option<SharedTransport>,
    registry: Arc<AgentRegistry>,
    /// In-process mailboxes for colocated agents, keyed by agent id.
    mailboxes: Arc<RwLock<std::collections::HashMap<AgentId, mpsc::Sender<AgentMessage>>>>,
    swarm_id: RwLock<Option<String>>,
}

impl Coordinator {
    pub fn new(
        agent_id: impl Into<AgentId>,
        event_bus: Arc<EventBus>,
        memory: Arc<dyn MemoryStore>,
        registry: Arc<AgentRegistry>,
        mailboxes: Arc<RwLock<std::collections::HashMap<AgentId, mpsc::Sender<AgentMessage>>>>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            event_bus,
            memory,
            transport: None,
            registry,
            mailboxes,
            swarm_id: RwLock::new(None),
        }
    }

    pub fn with_transport(mut self, transport: SharedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub async fn emit_event(
        &self,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        severity: Severity,
    ) -> Result<Event> {
        self.event_bus
            .publish(event_type, payload, severity, self.agent_id.clone())
            .await
    }

    pub async fn subscribe_event(
        &self,
        pattern: impl Into<String>,
    ) -> (String, mpsc::Receiver<Event>) {
        self.event_bus.subscribe(pattern).await
    }

    /// Joins `swarm_id` (or the agent's current swarm if `None`), returning
    /// the broadcast channel name used for this swarm's messages.
    pub async fn join_swarm(&self, swarm_id: Option<String>) -> Result<String> {
        let swarm_id = swarm_id.unwrap_or_else(|| "default".to_string());
        *self.swarm_id.write().await = Some(swarm_id.clone());
        self.memory
            .store_shared(
                "swarm",
                &format!("{swarm_id}/members/{}", self.agent_id),
                serde_json::json!({ "agent_id": self.agent_id }),
                &self.agent_id,
            )
            .await?;
        Ok(broadcast_channel(&swarm_id))
    }

    /// Broadcasts `payload` on `kind` to the agent's current swarm (or
    /// `swarm_id` if given). In-process colocated agents are not targeted
    /// by broadcasts: broadcasts always go out over the channel naming
    /// convention `broadcast/<swarm_id>`.
    pub async fn broadcast_message(
        &self,
        swarm_id: Option<&str>,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<()> {
        let swarm_id = match swarm_id {
            Some(s) => s.to_string(),
            None => self
                .swarm_id
                .read()
                .await
                .clone()
                .unwrap_or_else(|| "default".to_string()),
        };
        let message = AgentMessage {
            source: self.agent_id.clone(),
            target: MessageTarget::Broadcast {
                swarm_id: swarm_id.clone(),
            },
            channel: broadcast_channel(&swarm_id),
            kind: kind.into(),
            payload,
            timestamp: chrono::Utc::now(),
        };

        if let Some(transport) = &self.transport {
            transport
                .send(&message.channel, serde_json::to_value(&message)?)
                .await?;
        }
        Ok(())
    }

    /// Sends a directed message to `target`. Colocated targets are
    /// delivered in-process; otherwise the message is serialized onto the
    /// transport using channel `agent/<target_id>`.
    pub async fn send_message(
        &self,
        target: &str,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<()> {
        let message = AgentMessage {
            source: self.agent_id.clone(),
            target: MessageTarget::Agent(target.to_string()),
            channel: agent_channel(target),
            kind: kind.into(),
            payload,
            timestamp: chrono::Utc::now(),
        };

        if self.registry.is_colocated(target).await {
            let mailboxes = self.mailboxes.read().await;
            if let Some(sender) = mailboxes.get(target) {
                // Best-effort: a full mailbox silently drops, matching the
                // bus's own overflow policy rather than blocking the sender.
                let _ = sender.try_send(message);
                return Ok(());
            }
        }

        if let Some(transport) = &self.transport {
            transport
                .send(&message.channel, serde_json::to_value(&message)?)
                .await?;
            return Ok(());
        }

        Err(crate::error::FleetError::DependencyUnavailable(format!(
            "no route to agent {target}: not colocated and no transport configured"
        )))
    }
}
