//! Trait shapes for the collaborators this core treats as external (§1, §6.1):
//! persistent storage, context resolution, and credential resolution.
//!
//! These are `async_trait`s in the same style as the toolkit's
//! `ClientWrapper` and `ToolProtocol` traits — implementors plug in a real
//! database, a real context-validation service, a real secrets manager;
//! the crate ships an in-memory `Storage` for its own tests, grounded on
//! the teacher's `tool_protocol::tests::MockProtocol` pattern.

use crate::error::CoreError;
use crate::model::{Agent, ArtifactComponent, DataComponent, Graph, Task};
use async_trait::async_trait;
use std::collections::HashMap;

/// HTTP headers synthesized by [`CredentialResolver`], e.g. before an MCP
/// connect or an A2A send to an external agent (§6).
pub type HeaderMap = HashMap<String, String>;

/// Named, deterministic storage operations consumed by the Task Handler
/// and Artifact Extractor (§6). Each call is scoped by tenant/project and
/// optionally graph.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_agent_by_id(&self, tenant_id: &str, project_id: &str, agent_id: &str) -> Result<Option<Agent>, CoreError>;
    async fn get_agent_graph_by_id(&self, tenant_id: &str, project_id: &str, graph_id: &str) -> Result<Option<Graph>, CoreError>;
    async fn get_related_agents_for_graph(&self, tenant_id: &str, project_id: &str, graph_id: &str) -> Result<Vec<Agent>, CoreError>;
    async fn get_data_components_for_agent(&self, agent_id: &str) -> Result<Vec<DataComponent>, CoreError>;
    async fn get_artifact_components_for_agent(&self, agent_id: &str) -> Result<Vec<ArtifactComponent>, CoreError>;
    async fn get_context_config_id(&self, agent_id: &str) -> Result<Option<String>, CoreError>;
    async fn get_credential_reference(&self, credential_store_id: &str) -> Result<serde_json::Value, CoreError>;
    async fn get_full_graph_definition(&self, tenant_id: &str, project_id: &str, graph_id: &str) -> Result<Graph, CoreError>;
    async fn graph_has_artifact_components(&self, graph_id: &str) -> Result<bool, CoreError>;
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, CoreError>;
    async fn list_task_ids_by_context_id(&self, context_id: &str) -> Result<Vec<String>, CoreError>;
    async fn create_message(&self, message: crate::model::ConversationMessage) -> Result<(), CoreError>;
    async fn save_a2a_message_response(&self, delegation_id: &str, message: crate::model::ConversationMessage) -> Result<(), CoreError>;
    async fn get_formatted_conversation_history(&self, conversation_id: &str, config: &crate::model::ConversationHistoryConfig) -> Result<Vec<crate::model::ConversationMessage>, CoreError>;
    async fn get_conversation_scoped_artifacts(&self, conversation_id: &str) -> Result<Vec<crate::model::Artifact>, CoreError>;
    async fn get_ledger_artifacts(&self, task_id: &str) -> Result<Vec<crate::model::Artifact>, CoreError>;
    async fn add_ledger_artifacts(&self, artifacts: Vec<crate::model::Artifact>) -> Result<(), CoreError>;
}

/// Resolves a named context config against a conversation and request
/// headers into a key/value map consumed by template rendering (§2, §4.3).
#[async_trait]
pub trait ContextResolver: Send + Sync {
    async fn resolve(
        &self,
        context_config_id: &str,
        conversation_id: &str,
        headers: &HeaderMap,
    ) -> Result<HashMap<String, String>, CoreError>;
}

/// Builds HTTP headers for a named credential store or inline params,
/// used before MCP connect and before A2A send to external agents (§6).
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(
        &self,
        credential_store_id: Option<&str>,
        retrieval_params: &serde_json::Value,
    ) -> Result<HeaderMap, CoreError>;
}

#[cfg(test)]
pub mod testing {
    //! In-memory collaborator implementations for this crate's own test
    //! suite, grounded on `tool_protocol::tests::MockProtocol`.

    use super::*;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct InMemoryStorage {
        pub agents: RwLock<HashMap<String, Agent>>,
        pub graphs: RwLock<HashMap<String, Graph>>,
        pub tasks: RwLock<HashMap<String, Task>>,
        pub messages: RwLock<Vec<crate::model::ConversationMessage>>,
        pub ledger_artifacts: RwLock<Vec<crate::model::Artifact>>,
    }

    impl InMemoryStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert_agent(&self, agent: Agent) {
            self.agents.write().await.insert(agent.id.clone(), agent);
        }

        pub async fn insert_graph(&self, graph: Graph) {
            self.graphs.write().await.insert(graph.id.clone(), graph);
        }
    }

    #[async_trait]
    impl Storage for InMemoryStorage {
        async fn get_agent_by_id(&self, _tenant_id: &str, _project_id: &str, agent_id: &str) -> Result<Option<Agent>, CoreError> {
            Ok(self.agents.read().await.get(agent_id).cloned())
        }

        async fn get_agent_graph_by_id(&self, _tenant_id: &str, _project_id: &str, graph_id: &str) -> Result<Option<Graph>, CoreError> {
            Ok(self.graphs.read().await.get(graph_id).cloned())
        }

        async fn get_related_agents_for_graph(&self, _tenant_id: &str, _project_id: &str, graph_id: &str) -> Result<Vec<Agent>, CoreError> {
            Ok(self
                .agents
                .read()
                .await
                .values()
                .filter(|a| a.graph_id == graph_id)
                .cloned()
                .collect())
        }

        async fn get_data_components_for_agent(&self, agent_id: &str) -> Result<Vec<DataComponent>, CoreError> {
            Ok(self
                .agents
                .read()
                .await
                .get(agent_id)
                .map(|a| a.data_components.clone())
                .unwrap_or_default())
        }

        async fn get_artifact_components_for_agent(&self, agent_id: &str) -> Result<Vec<ArtifactComponent>, CoreError> {
            Ok(self
                .agents
                .read()
                .await
                .get(agent_id)
                .map(|a| a.artifact_components.clone())
                .unwrap_or_default())
        }

        async fn get_context_config_id(&self, agent_id: &str) -> Result<Option<String>, CoreError> {
            Ok(self
                .agents
                .read()
                .await
                .get(agent_id)
                .and_then(|a| a.context_config_id.clone()))
        }

        async fn get_credential_reference(&self, _credential_store_id: &str) -> Result<serde_json::Value, CoreError> {
            Ok(serde_json::json!({}))
        }

        async fn get_full_graph_definition(&self, tenant_id: &str, project_id: &str, graph_id: &str) -> Result<Graph, CoreError> {
            self.get_agent_graph_by_id(tenant_id, project_id, graph_id)
                .await?
                .ok_or_else(|| CoreError::StorageError(format!("graph not found: {}", graph_id)))
        }

        async fn graph_has_artifact_components(&self, graph_id: &str) -> Result<bool, CoreError> {
            Ok(self.graphs.read().await.get(graph_id).map(|g| g.has_artifact_components).unwrap_or(false))
        }

        async fn get_task(&self, task_id: &str) -> Result<Option<Task>, CoreError> {
            Ok(self.tasks.read().await.get(task_id).cloned())
        }

        async fn list_task_ids_by_context_id(&self, context_id: &str) -> Result<Vec<String>, CoreError> {
            Ok(self
                .tasks
                .read()
                .await
                .values()
                .filter(|t| t.context_id == context_id)
                .map(|t| t.id.clone())
                .collect())
        }

        async fn create_message(&self, message: crate::model::ConversationMessage) -> Result<(), CoreError> {
            self.messages.write().await.push(message);
            Ok(())
        }

        async fn save_a2a_message_response(&self, _delegation_id: &str, message: crate::model::ConversationMessage) -> Result<(), CoreError> {
            self.messages.write().await.push(message);
            Ok(())
        }

        async fn get_formatted_conversation_history(&self, conversation_id: &str, _config: &crate::model::ConversationHistoryConfig) -> Result<Vec<crate::model::ConversationMessage>, CoreError> {
            Ok(self
                .messages
                .read()
                .await
                .iter()
                .filter(|m| m.conversation_id == conversation_id)
                .cloned()
                .collect())
        }

        async fn get_conversation_scoped_artifacts(&self, _conversation_id: &str) -> Result<Vec<crate::model::Artifact>, CoreError> {
            Ok(self.ledger_artifacts.read().await.clone())
        }

        async fn get_ledger_artifacts(&self, task_id: &str) -> Result<Vec<crate::model::Artifact>, CoreError> {
            Ok(self
                .ledger_artifacts
                .read()
                .await
                .iter()
                .filter(|a| a.task_id == task_id)
                .cloned()
                .collect())
        }

        async fn add_ledger_artifacts(&self, artifacts: Vec<crate::model::Artifact>) -> Result<(), CoreError> {
            self.ledger_artifacts.write().await.extend(artifacts);
            Ok(())
        }
    }

    pub struct NoopCredentialResolver;

    #[async_trait]
    impl CredentialResolver for NoopCredentialResolver {
        async fn resolve(&self, _credential_store_id: Option<&str>, _retrieval_params: &serde_json::Value) -> Result<HeaderMap, CoreError> {
            Ok(HeaderMap::new())
        }
    }

    pub struct NoopContextResolver;

    #[async_trait]
    impl ContextResolver for NoopContextResolver {
        async fn resolve(&self, _context_config_id: &str, _conversation_id: &str, _headers: &HeaderMap) -> Result<HashMap<String, String>, CoreError> {
            Ok(HashMap::new())
        }
    }
}
