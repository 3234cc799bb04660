//! Data model: [`Agent`], [`Graph`], [`Task`], conversation messages, and
//! [`Artifact`]s, per §3 of the specification.
//!
//! These are inert configuration/record types hydrated from storage each
//! turn — unlike the stateful, session-owning agent abstraction this
//! toolkit originally shipped, an [`Agent`] here carries no live model
//! session or tool registry of its own; the [`crate::executor`] builds
//! those per turn from the agent's configuration.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One of the three model roles an agent can bind to a concrete model spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModelRole {
    Base,
    StructuredOutput,
    Summarizer,
}

/// A concrete model binding: provider model id plus opaque provider options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model: String,
    #[serde(default)]
    pub provider_options: HashMap<String, serde_json::Value>,
}

/// Hard ceiling on phase-1 generation steps (§3, §4.9).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StopWhen {
    pub step_count_is: u32,
}

impl Default for StopWhen {
    fn default() -> Self {
        Self { step_count_is: 12 }
    }
}

/// A peer reachable via the delegate tool, either in-graph or external.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DelegateRelation {
    Internal { agent_id: String },
    External {
        agent_id: String,
        base_url: String,
        #[serde(default)]
        credential_store_id: Option<String>,
    },
}

/// One schema-typed output shape an agent may emit in phase 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataComponent {
    pub name: String,
    pub description: String,
    pub props_schema: serde_json::Value,
}

/// One artifact-type schema an agent may create via `save_tool_result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactComponent {
    pub artifact_type: String,
    pub summary_props: serde_json::Value,
    pub full_props: serde_json::Value,
}

/// How much prior conversation is fed into prompt assembly (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ConversationHistoryConfig {
    None,
    Full { limit: u32 },
    Scoped { limit: u32 },
}

impl Default for ConversationHistoryConfig {
    fn default() -> Self {
        ConversationHistoryConfig::None
    }
}

/// Static configuration of one participant in a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub graph_id: String,
    pub name: String,
    pub description: String,
    pub agent_prompt: String,
    pub models: HashMap<ModelRole, ModelSpec>,
    #[serde(default)]
    pub stop_when: StopWhen,
    #[serde(default)]
    pub transfer_relations: HashSet<String>,
    #[serde(default)]
    pub delegate_relations: Vec<DelegateRelation>,
    #[serde(default)]
    pub tools: HashSet<String>,
    #[serde(default)]
    pub data_components: Vec<DataComponent>,
    #[serde(default)]
    pub artifact_components: Vec<ArtifactComponent>,
    #[serde(default)]
    pub conversation_history_config: ConversationHistoryConfig,
    #[serde(default)]
    pub context_config_id: Option<String>,
}

impl Agent {
    /// Phase 2 is entered only when the agent declares at least one data component (§8, property 2).
    pub fn requires_structured_output(&self) -> bool {
        !self.data_components.is_empty()
    }

    /// Resolve the model spec for a role, falling back to `base` for `structuredOutput` per §3.
    pub fn model_for(&self, role: ModelRole) -> Option<&ModelSpec> {
        self.models
            .get(&role)
            .or_else(|| {
                if role == ModelRole::StructuredOutput {
                    self.models.get(&ModelRole::Base)
                } else {
                    None
                }
            })
    }
}

/// A set of agents with directional transfer/delegate relations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub id: String,
    pub tenant_id: String,
    pub project_id: String,
    #[serde(default)]
    pub graph_prompt: Option<String>,
    #[serde(default)]
    pub context_config_id: Option<String>,
    /// Whether any agent in the graph declares artifact components — gates
    /// whether artifact-referencing rules appear in the prompt (§3).
    pub has_artifact_components: bool,
}

/// Lifecycle state of a [`Task`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    Completed,
    Failed,
    Working,
}

/// A single text or data input/output part (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Part {
    Text { text: String },
    Data { data: serde_json::Value },
}

/// Request-scoped identifiers carried on a [`Task`] (§3, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub conversation_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub stream_request_id: Option<String>,
    #[serde(default)]
    pub is_delegation: bool,
    #[serde(default)]
    pub delegation_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// One execution of one agent turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub context_id: String,
    pub input_parts: Vec<Part>,
    pub metadata: TaskMetadata,
}

impl Task {
    /// Concatenation of text parts with single-space separators (§6).
    pub fn text_input(&self) -> String {
        self.input_parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                Part::Data { .. } => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Status block of an egress task result (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default)]
    pub message: Option<String>,
}

/// A structured, citable projection of a tool result, or a full task artifact (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: String,
    pub task_id: String,
    #[serde(default)]
    pub artifact_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub parts: Vec<Part>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// The egress shape produced at `END` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub artifacts: Vec<Artifact>,
}

/// Role of a conversation participant (§3). Distinct from tool-call [`crate::client_wrapper::Role`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationRole {
    User,
    Agent,
}

/// Whether a message is visible to the end user or internal to agent-to-agent traffic (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    External,
    Internal,
}

/// Discriminates ordinary user turns from A2A request/response traffic (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    User,
    A2aRequest,
    A2aResponse,
}

/// Persisted content: text, structured data, or both (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// One entry in a conversation's ordered log (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub conversation_id: String,
    pub role: ConversationRole,
    pub content: MessageContent,
    pub visibility: Visibility,
    pub message_type: MessageType,
    #[serde(default)]
    pub from_agent_id: Option<String>,
    #[serde(default)]
    pub to_agent_id: Option<String>,
    #[serde(default)]
    pub from_external_agent_id: Option<String>,
    #[serde(default)]
    pub to_external_agent_id: Option<String>,
    /// Set on `a2a-request`/`a2a-response` messages to `del_<nanoid>` (§4.11).
    #[serde(default)]
    pub delegation_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_agent() -> Agent {
        Agent {
            id: "a1".into(),
            tenant_id: "t1".into(),
            project_id: "p1".into(),
            graph_id: "g1".into(),
            name: "Support Agent".into(),
            description: "Handles support queries".into(),
            agent_prompt: "You are a support agent.".into(),
            models: HashMap::new(),
            stop_when: StopWhen::default(),
            transfer_relations: HashSet::new(),
            delegate_relations: Vec::new(),
            tools: HashSet::new(),
            data_components: Vec::new(),
            artifact_components: Vec::new(),
            conversation_history_config: ConversationHistoryConfig::None,
            context_config_id: None,
        }
    }

    #[test]
    fn no_data_components_means_no_structured_output() {
        let agent = base_agent();
        assert!(!agent.requires_structured_output());
    }

    #[test]
    fn structured_output_role_falls_back_to_base() {
        let mut agent = base_agent();
        agent.models.insert(
            ModelRole::Base,
            ModelSpec { model: "gpt-4.1".into(), provider_options: HashMap::new() },
        );
        let resolved = agent.model_for(ModelRole::StructuredOutput).unwrap();
        assert_eq!(resolved.model, "gpt-4.1");
    }

    #[test]
    fn task_text_input_joins_text_parts_with_single_space() {
        let task = Task {
            id: "task1".into(),
            context_id: "conv1".into(),
            input_parts: vec![
                Part::Text { text: "hello".into() },
                Part::Text { text: "world".into() },
            ],
            metadata: TaskMetadata::default(),
        };
        assert_eq!(task.text_input(), "hello world");
    }
}
