//! Prompt Assembler (§4.3): builds phase-1 and phase-2 system prompts
//! from templates, agent config, resolved context, and tool/artifact/
//! data-component manifests. It does NOT execute model calls.
//!
//! The `{{var}}` expander is new, hand-rolled code — there is no
//! templating crate precedent in the retrieval pack, and a regex-driven
//! substitution is small enough that reaching for a templating crate
//! would be disproportionate, matching this toolkit's general preference
//! for hand-rolled control flow over a crate for small, bounded parsers
//! (see `agent::parse_tool_call`'s brace counting for the same texture).

use crate::model::{Agent, ArtifactComponent, DataComponent, Graph};
use crate::tool_protocol::ToolMetadata;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    /// Matches `{{var}}` / `{{ var }}` placeholders in agent and graph prompts.
    static ref TEMPLATE_VAR: Regex = Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").unwrap();
}

/// Tool names must match `^[A-Za-z0-9_-]{1,100}$` (§4.3, §8 property 7).
pub fn sanitize_tool_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    cleaned.chars().take(100).collect()
}

/// Render `{{var}}` placeholders against `context`, dropping unresolved
/// variables silently (strict=false, unresolved-preserved=false) and
/// logging each miss at debug level (§9).
pub fn render_template(template: &str, context: &HashMap<String, String>) -> String {
    TEMPLATE_VAR.replace_all(template, |caps: &regex::Captures| {
        let key = &caps[1];
        match context.get(key) {
            Some(value) => value.clone(),
            None => {
                log::debug!("prompt assembler: unresolved template variable {{{{{}}}}}", key);
                String::new()
            }
        }
    })
    .into_owned()
}

/// A single tool's entry in the manifest rendered into phase-1 prompts (§4.3).
pub struct ToolManifestEntry {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

impl From<&ToolMetadata> for ToolManifestEntry {
    fn from(m: &ToolMetadata) -> Self {
        Self {
            name: sanitize_tool_name(&m.name),
            description: m.description.clone(),
            parameters_schema: serde_json::to_value(&m.parameters).unwrap_or(serde_json::Value::Null),
        }
    }
}

fn render_tool_manifest(tools: &[ToolManifestEntry]) -> String {
    if tools.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\nAvailable tools:\n");
    for tool in tools {
        out.push_str(&format!(
            "- {}: {}\n  parameters: {}\n",
            tool.name, tool.description, tool.parameters_schema
        ));
    }
    out
}

fn render_artifact_manifest(has_existing_artifacts: bool) -> String {
    if !has_existing_artifacts {
        return String::new();
    }
    "\n\nThis conversation already has artifacts. Reference them with \
     <artifact:ref id=\"...\" task=\"...\"/> rather than restating their content."
        .to_string()
}

fn render_thinking_preparation_block() -> String {
    "\n\nYou MUST NOT produce natural-language output in this phase. Plan using \
     tool calls only, and call `thinking_complete` exactly once when planning is \
     finished — that is the only sanctioned way to end this phase."
        .to_string()
}

/// Assembles phase-1 and phase-2 prompts from the same template bundle (§4.3).
pub struct PromptAssembler;

impl PromptAssembler {
    /// Build the phase-1 (planning) system prompt.
    pub fn phase1(
        agent: &Agent,
        graph: &Graph,
        context: &HashMap<String, String>,
        tools: &[ToolManifestEntry],
        has_existing_artifacts: bool,
    ) -> String {
        let mut prompt = render_template(&agent.agent_prompt, context);
        if let Some(graph_prompt) = &graph.graph_prompt {
            prompt.push_str("\n\n");
            prompt.push_str(&render_template(graph_prompt, context));
        }
        prompt.push_str(&render_tool_manifest(tools));
        prompt.push_str(&render_artifact_manifest(has_existing_artifacts));
        if agent.requires_structured_output() {
            prompt.push_str(&render_thinking_preparation_block());
        }
        prompt
    }

    /// Build the phase-2 (structured output) system prompt.
    pub fn phase2(
        agent: &Agent,
        context: &HashMap<String, String>,
        data_components: &[DataComponent],
        artifact_components: &[ArtifactComponent],
    ) -> String {
        let mut prompt = render_template(&agent.agent_prompt, context);
        prompt.push_str("\n\nProduce exactly one structured response conforming to the schema. \
            Available data components:\n");
        for dc in data_components {
            prompt.push_str(&format!("- {}: {} (props: {})\n", dc.name, dc.description, dc.props_schema));
        }
        if !artifact_components.is_empty() {
            prompt.push_str("\nAvailable artifact-creation components:\n");
            for ac in artifact_components {
                prompt.push_str(&format!(
                    "- ArtifactCreate_{}: summary={} full={}\n",
                    ac.artifact_type, ac.summary_props, ac.full_props
                ));
            }
        }
        prompt
    }
}
