//! Graph-Session Event Log (§4.2): an append-only, per-`streamRequestId`
//! list of typed events used for tracing, reasoning capture, and
//! post-turn artifact name/description finalization.
//!
//! Grounded on the teacher's `event::AgentEvent` /
//! `event::OrchestrationEvent` enums (`#[derive(Debug, Clone)]`, one
//! struct-like variant per occasion) — the shape of each variant follows
//! that precedent closely. The difference is delivery: the teacher's
//! `EventHandler` is a push-only callback trait; the post-turn artifact
//! finalizer described in §4.2 needs to *enumerate* history after the
//! turn ends, so this is an owned, readable log rather than a callback.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// One typed occurrence during a turn (§3, §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphSessionEvent {
    ToolExecution {
        agent_id: String,
        tool_name: String,
        args: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        duration_ms: u64,
        tool_id: String,
    },
    AgentReasoning { agent_id: String, text: String },
    AgentGenerate { agent_id: String, step_count: u32 },
    Transfer { agent_id: String, target: String },
    DelegationSent { agent_id: String, target: String, delegation_id: String },
    DelegationReturned { agent_id: String, target: String, delegation_id: String },
    ArtifactSaved {
        agent_id: String,
        artifact_id: String,
        artifact_type: Option<String>,
        tool_call_id: String,
        tool_name: String,
        summary: Value,
        full: Value,
        pending_generation: bool,
    },
}

/// An entry in the log: the event plus its wall-clock timestamp (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub event: GraphSessionEvent,
    /// Unix millis, wall-clock order of observation (§5: "not the order the model intended").
    pub ts: i64,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Per-`streamRequestId` append-only event log, guarded so that writes
/// from the executing agent and its delegates are serialized (§5).
#[derive(Clone)]
pub struct GraphSessionEventLog {
    events: Arc<Mutex<Vec<TimestampedEvent>>>,
}

impl GraphSessionEventLog {
    pub fn new() -> Self {
        Self { events: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Append one event, stamping it with the current time.
    pub async fn append(&self, event: GraphSessionEvent) {
        let mut events = self.events.lock().await;
        events.push(TimestampedEvent { event, ts: now_millis() });
    }

    /// Snapshot the full ordered log, e.g. for the post-turn artifact finalizer or a trace exporter.
    pub async fn snapshot(&self) -> Vec<TimestampedEvent> {
        self.events.lock().await.clone()
    }

    /// All `artifact_saved` events still awaiting name/description generation.
    pub async fn pending_artifacts(&self) -> Vec<TimestampedEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| matches!(
                &e.event,
                GraphSessionEvent::ArtifactSaved { pending_generation: true, .. }
            ))
            .cloned()
            .collect()
    }
}

impl Default for GraphSessionEventLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide registry of event logs keyed by `streamRequestId`, so that
/// delegates sharing a caller's session can append to the same log (§4.2, §5).
#[derive(Clone)]
pub struct EventLogRegistry {
    logs: Arc<Mutex<HashMap<String, GraphSessionEventLog>>>,
}

impl EventLogRegistry {
    pub fn new() -> Self {
        Self { logs: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Fetch or create the log for a `streamRequestId`.
    pub async fn get_or_create(&self, stream_request_id: &str) -> GraphSessionEventLog {
        let mut logs = self.logs.lock().await;
        logs.entry(stream_request_id.to_string())
            .or_insert_with(GraphSessionEventLog::new)
            .clone()
    }
}

impl Default for EventLogRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_and_snapshot_preserves_order() {
        let log = GraphSessionEventLog::new();
        log.append(GraphSessionEvent::Transfer {
            agent_id: "a1".into(),
            target: "refund-agent".into(),
        })
        .await;
        log.append(GraphSessionEvent::AgentGenerate { agent_id: "a1".into(), step_count: 1 })
            .await;
        let snapshot = log.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert!(matches!(snapshot[0].event, GraphSessionEvent::Transfer { .. }));
        assert!(matches!(snapshot[1].event, GraphSessionEvent::AgentGenerate { .. }));
    }

    #[tokio::test]
    async fn pending_artifacts_filters_by_flag() {
        let log = GraphSessionEventLog::new();
        log.append(GraphSessionEvent::ArtifactSaved {
            agent_id: "a1".into(),
            artifact_id: "art1".into(),
            artifact_type: Some("WebSource".into()),
            tool_call_id: "call1".into(),
            tool_name: "search".into(),
            summary: serde_json::json!({"title": "Web Sources"}),
            full: serde_json::json!({"title": "Web Sources", "url": "https://x"}),
            pending_generation: true,
        })
        .await;
        log.append(GraphSessionEvent::AgentGenerate { agent_id: "a1".into(), step_count: 2 })
            .await;
        let pending = log.pending_artifacts().await;
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn registry_shares_log_across_delegates() {
        let registry = EventLogRegistry::new();
        let caller_log = registry.get_or_create("stream1").await;
        caller_log
            .append(GraphSessionEvent::DelegationSent {
                agent_id: "a1".into(),
                target: "b1".into(),
                delegation_id: "del_1".into(),
            })
            .await;
        let delegate_log = registry.get_or_create("stream1").await;
        let snapshot = delegate_log.snapshot().await;
        assert_eq!(snapshot.len(), 1);
    }
}
