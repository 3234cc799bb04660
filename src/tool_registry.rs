//! Tool Registry (§4.4): resolves a tool name referenced by the model into
//! one of four callable kinds — remote MCP tool, transfer, delegation, or
//! built-in — and wraps every call so an `AgentReasoning`/`ToolExecution`
//! event is appended uniformly, with internal tools (`thinking_complete`,
//! `save_tool_result`) exempted from the event (§4.4, §9 Design Notes:
//! "avoid an inheritance tree; a tagged union over callable kind reads
//! better here").
//!
//! Grounded on the toolkit's [`crate::tool_protocol::ToolProtocol`] trait
//! (`execute`/`list_tools` as the remote-tool call shape used here).

use crate::artifact_extractor::attach_structure_hints;
use crate::event_log::{GraphSessionEvent, GraphSessionEventLog};
use crate::ledger::{ToolResultRecord, ToolSessionLedger};
use crate::tool_protocol::{ToolMetadata, ToolProtocol, ToolResult};
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;

/// Names reserved for phase control; never routed through the ledger/event path (§4.1, §4.4).
pub const INTERNAL_TOOL_NAMES: &[&str] = &["thinking_complete", "save_tool_result", "get_reference_artifact"];

/// What kind of target a tool name resolves to (§4.4, §9).
pub enum CallableTool {
    /// A tool hosted behind an MCP-compatible HTTP relay.
    Remote { metadata: ToolMetadata, protocol: Arc<dyn ToolProtocol> },
    /// A transfer relation: executing it ends the caller's turn (§4.9, §4.10).
    /// `description` is the Task Handler's one-level-deep relation summary
    /// for the target agent, surfaced verbatim in the tool manifest.
    Transfer { target_agent_id: String, description: String },
    /// A delegation relation: executing it performs an A2A round trip and
    /// returns control to the caller (§4.9, §4.11).
    Delegate { target_agent_id: String, description: String },
    /// A core-provided tool (`thinking_complete`, `save_tool_result`).
    BuiltIn { name: String },
}

impl CallableTool {
    pub fn name(&self) -> &str {
        match self {
            CallableTool::Remote { metadata, .. } => &metadata.name,
            CallableTool::Transfer { target_agent_id, .. } => target_agent_id,
            CallableTool::Delegate { target_agent_id, .. } => target_agent_id,
            CallableTool::BuiltIn { name } => name,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, CallableTool::BuiltIn { name } if INTERNAL_TOOL_NAMES.contains(&name.as_str()))
    }
}

/// Per-turn map from tool name to its resolved [`CallableTool`] (§4.4).
#[derive(Default)]
pub struct ToolRegistry {
    entries: HashMap<String, CallableTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tool: CallableTool) {
        self.entries.insert(name.into(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&CallableTool> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All non-internal remote/builtin tool metadata, for phase-1 manifest rendering (§4.3).
    pub fn remote_metadata(&self) -> Vec<&ToolMetadata> {
        self.entries
            .values()
            .filter_map(|t| match t {
                CallableTool::Remote { metadata, .. } => Some(metadata),
                _ => None,
            })
            .collect()
    }

    /// Native-tool-calling definitions for every entry, synthesizing a
    /// schema for transfer/delegate/built-in kinds that have no remote
    /// [`ToolMetadata`] of their own (§4.4, §4.5).
    pub fn tool_definitions(&self) -> Vec<crate::client_wrapper::ToolDefinition> {
        self.entries
            .values()
            .map(|tool| match tool {
                CallableTool::Remote { metadata, .. } => metadata.to_tool_definition(),
                CallableTool::Transfer { target_agent_id, description } => crate::client_wrapper::ToolDefinition {
                    name: format!("transfer_to_{}", target_agent_id),
                    description: description.clone(),
                    parameters_schema: serde_json::json!({
                        "type": "object",
                        "properties": { "reason": { "type": "string" } },
                        "required": [],
                    }),
                },
                CallableTool::Delegate { target_agent_id, description } => crate::client_wrapper::ToolDefinition {
                    name: format!("delegate_to_{}", target_agent_id),
                    description: description.clone(),
                    parameters_schema: serde_json::json!({
                        "type": "object",
                        "properties": { "text": { "type": "string" } },
                        "required": ["text"],
                    }),
                },
                CallableTool::BuiltIn { name } if name == "thinking_complete" => crate::client_wrapper::ToolDefinition {
                    name: name.clone(),
                    description: "Signal that planning is complete and the structured response should be produced.".to_string(),
                    parameters_schema: serde_json::json!({ "type": "object", "properties": {}, "required": [] }),
                },
                CallableTool::BuiltIn { name } if name == "get_reference_artifact" => crate::client_wrapper::ToolDefinition {
                    name: name.clone(),
                    description: "Fetch one previously saved artifact by id, for citation or reuse.".to_string(),
                    parameters_schema: serde_json::json!({
                        "type": "object",
                        "properties": { "artifactId": { "type": "string" } },
                        "required": ["artifactId"],
                    }),
                },
                CallableTool::BuiltIn { name } => crate::client_wrapper::ToolDefinition {
                    name: name.clone(),
                    description: "Project a ledgered tool result into one or more citable artifacts.".to_string(),
                    parameters_schema: serde_json::json!({
                        "type": "object",
                        "properties": {
                            "toolCallId": { "type": "string" },
                            "baseSelector": { "type": "string" },
                            "propSelectors": { "type": "object" },
                            "artifactType": { "type": "string" },
                        },
                        "required": ["toolCallId", "baseSelector"],
                    }),
                },
            })
            .collect()
    }
}

/// Execute a remote tool, appending a `tool_execution` event unless the
/// tool is internal (§4.4: "the event carries the same shape regardless of
/// which kind of callable ran"). On a successful [`CallableTool::Remote`]
/// call, the parsed result is also recorded into the Tool-Session Ledger
/// (§4.4, §4.8) so later `save_tool_result`/`get_reference_artifact` calls
/// can project or fetch it; when `has_artifact_components` is set, the
/// recorded result is annotated with structure hints first (§4.8).
pub async fn execute_and_log(
    agent_id: &str,
    tool_call_id: &str,
    tool: &CallableTool,
    args: serde_json::Value,
    event_log: &GraphSessionEventLog,
    ledger: &ToolSessionLedger,
    session_id: &str,
    has_artifact_components: bool,
) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
    log::debug!("tool_registry: dispatching {} (call {}) for agent {}", tool.name(), tool_call_id, agent_id);
    let started = Instant::now();
    let result = match tool {
        CallableTool::Remote { metadata, protocol } => protocol.execute(&metadata.name, args.clone()).await,
        CallableTool::BuiltIn { name } => Err(format!("built-in tool {} must be handled by the executor", name).into()),
        CallableTool::Transfer { .. } | CallableTool::Delegate { .. } => {
            Err("transfer/delegate relations are not executed through execute_and_log".into())
        }
    };

    if let (CallableTool::Remote { .. }, Ok(r)) = (tool, &result) {
        if r.success {
            let recorded = if has_artifact_components { attach_structure_hints(&r.output) } else { r.output.clone() };
            ledger
                .record(
                    session_id,
                    ToolResultRecord {
                        tool_call_id: tool_call_id.to_string(),
                        tool_name: tool.name().to_string(),
                        args: args.clone(),
                        result: recorded,
                        timestamp: 0,
                    },
                )
                .await;
        }
    }

    if tool.is_internal() {
        return result;
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    let event = match &result {
        Ok(r) => {
            if !r.success {
                log::warn!("tool_registry: {} (call {}) returned failure: {:?}", tool.name(), tool_call_id, r.error);
            }
            GraphSessionEvent::ToolExecution {
                agent_id: agent_id.to_string(),
                tool_name: tool.name().to_string(),
                args,
                result: Some(r.output.clone()),
                error: if r.success { None } else { r.error.clone() },
                duration_ms,
                tool_id: tool_call_id.to_string(),
            }
        }
        Err(e) => {
            log::warn!("tool_registry: {} (call {}) failed to execute: {}", tool.name(), tool_call_id, e);
            GraphSessionEvent::ToolExecution {
                agent_id: agent_id.to_string(),
                tool_name: tool.name().to_string(),
                args,
                result: None,
                error: Some(e.to_string()),
                duration_ms,
                tool_id: tool_call_id.to_string(),
            }
        }
    };
    event_log.append(event).await;

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoProtocol;

    #[async_trait]
    impl ToolProtocol for EchoProtocol {
        async fn execute(&self, tool_name: &str, parameters: serde_json::Value) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
            Ok(ToolResult::success(serde_json::json!({"tool": tool_name, "echo": parameters})))
        }

        async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
            Ok(vec![])
        }

        async fn get_tool_metadata(&self, tool_name: &str) -> Result<ToolMetadata, Box<dyn Error + Send + Sync>> {
            Ok(ToolMetadata::new(tool_name, ""))
        }

        fn protocol_name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn remote_tool_execution_appends_event() {
        let log = GraphSessionEventLog::new();
        let ledger = ToolSessionLedger::new(crate::config::CoreConfig::default());
        let session_id = ledger.create("t", "p", "conv", "task").await;
        let tool = CallableTool::Remote {
            metadata: ToolMetadata::new("search", "search the web"),
            protocol: Arc::new(EchoProtocol),
        };
        execute_and_log("agent1", "call_1", &tool, serde_json::json!({"q": "rust"}), &log, &ledger, &session_id, false)
            .await
            .unwrap();
        let snapshot = log.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert!(matches!(snapshot[0].event, GraphSessionEvent::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn remote_tool_success_is_recorded_in_ledger() {
        let log = GraphSessionEventLog::new();
        let ledger = ToolSessionLedger::new(crate::config::CoreConfig::default());
        let session_id = ledger.create("t", "p", "conv", "task").await;
        let tool = CallableTool::Remote {
            metadata: ToolMetadata::new("search", "search the web"),
            protocol: Arc::new(EchoProtocol),
        };
        execute_and_log("agent1", "call_1", &tool, serde_json::json!({"q": "rust"}), &log, &ledger, &session_id, false)
            .await
            .unwrap();
        let recorded = ledger.get(&session_id, "call_1").await;
        assert!(recorded.is_some());
    }

    #[tokio::test]
    async fn internal_tool_execution_skips_event() {
        let log = GraphSessionEventLog::new();
        let ledger = ToolSessionLedger::new(crate::config::CoreConfig::default());
        let session_id = ledger.create("t", "p", "conv", "task").await;
        let tool = CallableTool::BuiltIn { name: "thinking_complete".to_string() };
        assert!(tool.is_internal());
        let _ = execute_and_log("agent1", "call_1", &tool, serde_json::json!({}), &log, &ledger, &session_id, false).await;
        assert!(log.snapshot().await.is_empty());
    }

    #[test]
    fn registry_filters_remote_metadata_only() {
        let mut registry = ToolRegistry::new();
        registry.insert("search", CallableTool::Remote {
            metadata: ToolMetadata::new("search", "search the web"),
            protocol: Arc::new(EchoProtocol),
        });
        registry.insert(
            "transfer_to_billing",
            CallableTool::Transfer { target_agent_id: "billing".into(), description: "Transfer to billing.".into() },
        );
        assert_eq!(registry.remote_metadata().len(), 1);
        assert_eq!(registry.len(), 2);
    }
}
