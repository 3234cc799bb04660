//! Task Handler (§4.10): adapts an ingress [`Task`] into an [`crate::executor`]
//! invocation. Hydrates the target agent and its transfer/delegate relations
//! from [`Storage`], resolves the conversation's `contextId`, builds the
//! per-turn [`ToolRegistry`], and turns a `Transfer` outcome back into the
//! egress transfer artifact the ingress layer re-routes on.
//!
//! Grounded on the `other_examples/` A2A task-shape reference for the
//! `Task`/`Artifact`/`Part` egress shapes (§6); the `Storage`-shaped
//! hydration walk has no teacher precedent (the teacher carries no
//! persistence layer of its own) and is authored fresh in the style already
//! established by `collaborators.rs`'s async trait collaborators.

use crate::collaborators::{ContextResolver, HeaderMap, Storage};
use crate::error::CoreError;
use crate::executor::TurnOutcome;
use crate::model::{Agent, Artifact, DelegateRelation, Graph, Part, Task, TaskResult, TaskState, TaskStatus};
use crate::tool_protocol::ToolProtocol;
use crate::tool_registry::{CallableTool, ToolRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Collaborators the Task Handler needs to hydrate one turn (§4.10, §6).
pub struct TaskHandlerDeps<'a> {
    pub storage: &'a dyn Storage,
    pub context_resolver: Option<&'a dyn ContextResolver>,
    /// Single MCP-style relay reachable tools are discovered through; `None`
    /// means the agent has no remote tools configured. Held as an `Arc` so
    /// each resolved [`CallableTool::Remote`] can share ownership of it.
    pub tool_protocol: Option<Arc<dyn ToolProtocol>>,
}

/// Everything the Agent Turn Executor needs, assembled from storage (§4.9, §4.10).
pub struct HydratedTurn {
    pub agent: Agent,
    pub graph: Graph,
    pub context_vars: HashMap<String, String>,
    pub registry: ToolRegistry,
    pub conversation_id: String,
    /// Streaming is suppressed for delegate-originated turns (§4.10).
    pub suppress_streaming: bool,
}

/// Resolve `contextId` with the spec's fallback chain: the ingress
/// `conversationId`, then an id extracted from a structured `task.id` (the
/// convention used here is `"<conversationId>__<suffix>"`, matching how
/// this core's own task ids are minted), then `"default"` (§4.10, §6).
pub fn resolve_context_id(conversation_id: Option<&str>, task_id: &str) -> String {
    if let Some(id) = conversation_id {
        if !id.is_empty() && id != "default" {
            return id.to_string();
        }
    }
    if let Some((prefix, _)) = task_id.split_once("__") {
        if !prefix.is_empty() {
            return prefix.to_string();
        }
    }
    "default".to_string()
}

/// Build a one-level-deep relation summary: the target agent's own
/// description plus the names of the agents *it* can transfer/delegate to,
/// so the caller can reason about downstream routing without a second hop
/// through storage (§4.10).
fn relation_summary(target: &Agent, related: &HashMap<String, Agent>) -> String {
    let mut summary = target.description.clone();
    let mut downstream: Vec<String> = target.transfer_relations.iter().cloned().collect();
    for rel in &target.delegate_relations {
        if let DelegateRelation::Internal { agent_id } = rel {
            downstream.push(agent_id.clone());
        }
    }
    if !downstream.is_empty() {
        downstream.sort();
        downstream.dedup();
        let names: Vec<&str> = downstream
            .iter()
            .map(|id| related.get(id).map(|a| a.name.as_str()).unwrap_or(id.as_str()))
            .collect();
        summary.push_str(&format!(" (can further route to: {})", names.join(", ")));
    }
    summary
}

/// Populate a [`ToolRegistry`] with `agent`'s transfer and delegate
/// relations, each carrying a [`relation_summary`] description (§4.10).
fn insert_relations(registry: &mut ToolRegistry, agent: &Agent, related: &HashMap<String, Agent>) {
    for target_id in &agent.transfer_relations {
        let description = match related.get(target_id) {
            Some(target) => format!("Transfer the conversation to {}: {}", target.name, relation_summary(target, related)),
            None => format!("Transfer the conversation to {}.", target_id),
        };
        registry.insert(format!("transfer_to_{}", target_id), CallableTool::Transfer { target_agent_id: target_id.clone(), description });
    }

    for relation in &agent.delegate_relations {
        match relation {
            DelegateRelation::Internal { agent_id } => {
                let description = match related.get(agent_id) {
                    Some(target) => format!("Delegate a sub-task to {} and wait for its result: {}", target.name, relation_summary(target, related)),
                    None => format!("Delegate a sub-task to {} and wait for its result.", agent_id),
                };
                registry.insert(format!("delegate_to_{}", agent_id), CallableTool::Delegate { target_agent_id: agent_id.clone(), description });
            }
            DelegateRelation::External { agent_id, base_url, .. } => {
                let description = format!("Delegate a sub-task to the external agent {} at {} and wait for its result.", agent_id, base_url);
                registry.insert(format!("delegate_to_{}", agent_id), CallableTool::Delegate { target_agent_id: agent_id.clone(), description });
            }
        }
    }
}

/// Hydrate `agent_id`'s configuration and relations, and assemble the
/// [`ToolRegistry`] and resolved context variables for one turn (§4.10).
pub async fn hydrate_turn(
    tenant_id: &str,
    project_id: &str,
    graph_id: &str,
    agent_id: &str,
    task: &Task,
    request_headers: &HeaderMap,
    deps: &TaskHandlerDeps<'_>,
) -> Result<HydratedTurn, CoreError> {
    let agent = deps
        .storage
        .get_agent_by_id(tenant_id, project_id, agent_id)
        .await?
        .ok_or_else(|| CoreError::AgentNotFound(agent_id.to_string()))?;
    let graph = deps.storage.get_full_graph_definition(tenant_id, project_id, graph_id).await?;
    let related_agents: HashMap<String, Agent> = deps
        .storage
        .get_related_agents_for_graph(tenant_id, project_id, graph_id)
        .await?
        .into_iter()
        .map(|a| (a.id.clone(), a))
        .collect();

    let mut registry = ToolRegistry::new();
    insert_relations(&mut registry, &agent, &related_agents);

    if agent.requires_structured_output() {
        registry.insert("thinking_complete", CallableTool::BuiltIn { name: "thinking_complete".to_string() });
    }
    if !agent.artifact_components.is_empty() {
        registry.insert("save_tool_result", CallableTool::BuiltIn { name: "save_tool_result".to_string() });
    }
    if graph.has_artifact_components {
        registry.insert("get_reference_artifact", CallableTool::BuiltIn { name: "get_reference_artifact".to_string() });
    }

    if let Some(protocol) = &deps.tool_protocol {
        let available = protocol.list_tools().await.map_err(|e| CoreError::Other(e.to_string()))?;
        for metadata in available {
            if agent.tools.contains(&metadata.name) {
                registry.insert(metadata.name.clone(), CallableTool::Remote { metadata, protocol: Arc::clone(protocol) });
            }
        }
    }

    let context_config_id = agent.context_config_id.clone().or_else(|| graph.context_config_id.clone());
    let conversation_id = resolve_context_id(Some(&task.metadata.conversation_id), &task.id);
    let context_vars = match (context_config_id, deps.context_resolver) {
        (Some(config_id), Some(resolver)) => resolver.resolve(&config_id, &conversation_id, request_headers).await?,
        _ => HashMap::new(),
    };

    Ok(HydratedTurn {
        agent,
        graph,
        context_vars,
        registry,
        conversation_id,
        suppress_streaming: task.metadata.is_delegation,
    })
}

/// Build the egress transfer artifact a `TRANSFER → END` outcome produces:
/// a single data part `{type:'transfer', target, task_id, reason,
/// original_message}` with state `Completed` (§4.9, §6). The ingress layer
/// re-routes to `target` by issuing a new task to it.
pub fn transfer_artifact(task_id: &str, target_agent_id: &str, reason: Option<&str>, original_message: &str) -> Artifact {
    Artifact {
        artifact_id: Uuid::new_v4().to_string(),
        task_id: task_id.to_string(),
        artifact_type: Some("transfer".to_string()),
        name: None,
        description: None,
        parts: vec![Part::Data {
            data: serde_json::json!({
                "type": "transfer",
                "target": target_agent_id,
                "taskId": task_id,
                "reason": reason,
                "originalMessage": original_message,
            }),
        }],
        metadata: HashMap::new(),
    }
}

/// Turn an [`executor::run_turn`](crate::executor::run_turn) outcome into
/// the egress [`TaskResult`] shape (§4.9 `END`, §4.10, §6): a `Transfer`
/// outcome is interpreted into a single transfer artifact rather than
/// exposed as a distinct status, so the ingress layer only ever sees
/// `Completed` or `Failed`.
pub fn finalize_outcome(task_id: &str, original_message: &str, outcome: TurnOutcome) -> TaskResult {
    match outcome {
        TurnOutcome::Completed { artifacts } => TaskResult { status: TaskStatus { state: TaskState::Completed, message: None }, artifacts },
        TurnOutcome::Transfer { target_agent_id, reason } => TaskResult {
            status: TaskStatus { state: TaskState::Completed, message: None },
            artifacts: vec![transfer_artifact(task_id, &target_agent_id, reason.as_deref(), original_message)],
        },
        TurnOutcome::Failed { message } => TaskResult { status: TaskStatus { state: TaskState::Failed, message: Some(message) }, artifacts: vec![] },
    }
}
