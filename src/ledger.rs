//! Tool-Session Ledger (§4.1): a per-request, in-memory map of
//! `toolCallId → ToolResultRecord`, swept by TTL.
//!
//! Grounded on the teacher's process-wide lazily-initialised singleton
//! idiom (`lazy_static! { static ref SHARED_HTTP_CLIENT: ... }` in
//! `clients::common`) and its detached-sweeper-task idiom
//! (`Agent::emit_sync` spawns a fire-and-forget `tokio::task`).
//!
//! # Example
//!
//! ```rust,no_run
//! use agentturn::ledger::{ToolSessionLedger, ToolResultRecord};
//! use agentturn::config::CoreConfig;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let ledger = ToolSessionLedger::new(CoreConfig::default());
//! let session_id = ledger.create("tenant", "project", "conv1", "task1").await;
//! ledger.record(&session_id, ToolResultRecord {
//!     tool_call_id: "call_1".into(),
//!     tool_name: "search".into(),
//!     args: serde_json::json!({"q": "rust"}),
//!     result: serde_json::json!({"items": []}),
//!     timestamp: 0,
//! }).await;
//! assert!(ledger.get(&session_id, "call_1").await.is_some());
//! # }
//! ```

use crate::config::CoreConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use uuid::Uuid;

/// One entry in a [`ToolSession`], keyed by `toolCallId` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: serde_json::Value,
    pub result: serde_json::Value,
    /// Unix millis.
    pub timestamp: i64,
}

/// One request's worth of ledger state (§3).
#[derive(Debug, Clone)]
pub struct ToolSession {
    pub session_id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub context_id: String,
    pub task_id: String,
    pub results: HashMap<String, ToolResultRecord>,
    pub created_at: SystemTime,
}

struct Inner {
    sessions: RwLock<HashMap<String, ToolSession>>,
}

/// Process-local, process-wide ledger singleton (§4.1, §5: "NOT a persistence layer").
#[derive(Clone)]
pub struct ToolSessionLedger {
    inner: Arc<Inner>,
    config: CoreConfig,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl ToolSessionLedger {
    /// Build a ledger and spawn its TTL sweeper on the current runtime.
    pub fn new(config: CoreConfig) -> Self {
        let ledger = Self {
            inner: Arc::new(Inner {
                sessions: RwLock::new(HashMap::new()),
            }),
            config,
        };
        ledger.spawn_sweeper();
        ledger
    }

    fn spawn_sweeper(&self) {
        let inner = Arc::clone(&self.inner);
        let ttl = self.config.ledger_ttl;
        let interval = self.config.ledger_sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let mut sessions = inner.sessions.write().await;
                let before = sessions.len();
                sessions.retain(|_, session| {
                    session
                        .created_at
                        .elapsed()
                        .map(|age| age < ttl)
                        .unwrap_or(true)
                });
                let removed = before - sessions.len();
                if removed > 0 {
                    log::debug!("ledger sweep removed {} expired session(s)", removed);
                }
            }
        });
    }

    /// Allocate a fresh session (§4.1).
    pub async fn create(
        &self,
        tenant_id: &str,
        project_id: &str,
        context_id: &str,
        task_id: &str,
    ) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.ensure(&session_id, tenant_id, project_id, context_id, task_id)
            .await;
        session_id
    }

    /// Idempotent creation, used when a delegate reuses the caller's `sessionId` (§4.1, §9).
    pub async fn ensure(
        &self,
        session_id: &str,
        tenant_id: &str,
        project_id: &str,
        context_id: &str,
        task_id: &str,
    ) {
        let mut sessions = self.inner.sessions.write().await;
        sessions.entry(session_id.to_string()).or_insert_with(|| ToolSession {
            session_id: session_id.to_string(),
            tenant_id: tenant_id.to_string(),
            project_id: project_id.to_string(),
            context_id: context_id.to_string(),
            task_id: task_id.to_string(),
            results: HashMap::new(),
            created_at: SystemTime::now(),
        });
    }

    /// Insert a record by `toolCallId`. Unknown sessions are dropped and logged (§4.1, §7).
    pub async fn record(&self, session_id: &str, mut record: ToolResultRecord) {
        if record.timestamp == 0 {
            record.timestamp = now_millis();
        }
        let mut sessions = self.inner.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.results.insert(record.tool_call_id.clone(), record);
            }
            None => {
                log::warn!(
                    "tool-session-ledger: record() for unknown session {}",
                    session_id
                );
            }
        }
    }

    /// Look up a record by `toolCallId` (§4.1, §4.8).
    pub async fn get(&self, session_id: &str, tool_call_id: &str) -> Option<ToolResultRecord> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(session_id)
            .and_then(|s| s.results.get(tool_call_id))
            .cloned()
    }

    /// Number of recorded entries for a session — monotone non-decreasing per §8 property 8.
    pub async fn entry_count(&self, session_id: &str) -> Option<usize> {
        let sessions = self.inner.sessions.read().await;
        sessions.get(session_id).map(|s| s.results.len())
    }

    /// Fetch session identity/metadata (§4.1).
    pub async fn session(&self, session_id: &str) -> Option<ToolSession> {
        let sessions = self.inner.sessions.read().await;
        sessions.get(session_id).cloned()
    }

    /// Explicit teardown (§4.1). Not required for correctness — the sweeper reclaims expired
    /// sessions on its own — but lets a caller free memory early once a turn is known to be done.
    pub async fn end(&self, session_id: &str) {
        let mut sessions = self.inner.sessions.write().await;
        sessions.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> ToolResultRecord {
        ToolResultRecord {
            tool_call_id: id.to_string(),
            tool_name: "search".to_string(),
            args: serde_json::json!({}),
            result: serde_json::json!({"ok": true}),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn record_and_get_round_trip() {
        let ledger = ToolSessionLedger::new(CoreConfig::default());
        let session_id = ledger.create("t", "p", "conv", "task").await;
        ledger.record(&session_id, record("call_1")).await;
        let got = ledger.get(&session_id, "call_1").await.unwrap();
        assert_eq!(got.tool_name, "search");
    }

    #[tokio::test]
    async fn unknown_session_record_is_dropped_not_panicking() {
        let ledger = ToolSessionLedger::new(CoreConfig::default());
        ledger.record("does-not-exist", record("call_1")).await;
        assert!(ledger.get("does-not-exist", "call_1").await.is_none());
    }

    #[tokio::test]
    async fn entry_count_is_monotone_non_decreasing() {
        let ledger = ToolSessionLedger::new(CoreConfig::default());
        let session_id = ledger.create("t", "p", "conv", "task").await;
        let mut last = 0;
        for i in 0..5 {
            ledger
                .record(&session_id, record(&format!("call_{}", i)))
                .await;
            let count = ledger.entry_count(&session_id).await.unwrap();
            assert!(count >= last);
            last = count;
        }
        assert_eq!(last, 5);
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let ledger = ToolSessionLedger::new(CoreConfig::default());
        ledger.ensure("shared", "t", "p", "conv", "task").await;
        ledger.ensure("shared", "t", "p", "conv", "task").await;
        ledger.record("shared", record("call_1")).await;
        assert_eq!(ledger.entry_count("shared").await.unwrap(), 1);
    }
}
