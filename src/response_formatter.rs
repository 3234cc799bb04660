//! Response Formatter (§4.7): applies the Incremental Stream Parser's
//! resolution logic once to a fully materialized response, for callers
//! that did not stream. Pre-fetches all of the conversation's artifacts
//! in a single pass rather than resolving them one marker at a time.

use crate::collaborators::Storage;
use crate::error::CoreError;
use crate::model::{Artifact, Part};
use crate::stream_parser::{resolve_once, ArtifactResolver};
use std::collections::HashMap;

/// An [`ArtifactResolver`] backed by a single prefetched snapshot of a
/// conversation's artifacts (§4.7).
pub struct PrefetchedArtifacts {
    by_id: HashMap<(String, String), serde_json::Value>,
}

impl PrefetchedArtifacts {
    pub fn from_artifacts(artifacts: &[Artifact]) -> Self {
        let by_id = artifacts
            .iter()
            .map(|a| {
                (
                    (a.artifact_id.clone(), a.task_id.clone()),
                    serde_json::json!({
                        "artifactId": a.artifact_id,
                        "taskId": a.task_id,
                        "name": a.name,
                        "description": a.description,
                        "artifactType": a.artifact_type,
                    }),
                )
            })
            .collect();
        Self { by_id }
    }

    /// Fetch every artifact scoped to `conversation_id` and build a resolver from it.
    pub async fn load(storage: &dyn Storage, conversation_id: &str) -> Result<Self, CoreError> {
        let artifacts = storage.get_conversation_scoped_artifacts(conversation_id).await?;
        Ok(Self::from_artifacts(&artifacts))
    }

    /// Whether the conversation has any artifacts yet, for the phase-1
    /// prompt's artifact-manifest block (§4.3).
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl ArtifactResolver for PrefetchedArtifacts {
    fn resolve(&self, artifact_id: &str, task_id: &str) -> Option<serde_json::Value> {
        self.by_id.get(&(artifact_id.to_string(), task_id.to_string())).cloned()
    }
}

/// Resolve a fully materialized text response into ordered parts (§4.7).
pub fn format_text_response(text: &str, artifacts: &PrefetchedArtifacts) -> Vec<Part> {
    resolve_once(text, artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_marker_and_drops_unknown_one() {
        let artifacts = vec![Artifact {
            artifact_id: "art1".to_string(),
            task_id: "task1".to_string(),
            artifact_type: Some("WebSource".to_string()),
            name: Some("Sources".to_string()),
            description: None,
            parts: vec![],
            metadata: Default::default(),
        }];
        let resolver = PrefetchedArtifacts::from_artifacts(&artifacts);
        let text = r#"See <artifact:ref id="art1" task="task1"/> and <artifact:ref id="missing" task="x"/>."#;
        let parts = format_text_response(text, &resolver);
        let data_count = parts.iter().filter(|p| matches!(p, Part::Data { .. })).count();
        assert_eq!(data_count, 1);
    }
}
