//! Artifact Extractor / `save_tool_result` built-in (§4.8): projects a
//! ledgered tool result into one or more artifacts via JMESPath selectors,
//! appending a `pendingGeneration=true` `artifact_saved` event per item and
//! returning immediately — name/description are filled in later by the
//! post-turn finalizer (§4.2, §4.8).
//!
//! Uses the `jmespath` crate (crates.io): no retrieval-pack precedent
//! exists for JMESPath specifically, but it is the unmodified, real
//! realization of the query language this tool's contract names (see
//! DESIGN.md). The embedded-JSON recursion and diagnostic-message
//! construction are new code grounded in the toolkit's manual-`Display`
//! error style (`tool_protocol::ToolError`, `resource_protocol::ResourceError`).

use crate::event_log::{GraphSessionEvent, GraphSessionEventLog};
use crate::ledger::ToolSessionLedger;
use crate::model::ArtifactComponent;
use jmespath::ToJmespath;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Arguments the model supplies to `save_tool_result` (§4.8).
#[derive(Debug, Clone, Deserialize)]
pub struct SaveToolResultArgs {
    pub tool_call_id: String,
    pub base_selector: String,
    #[serde(default)]
    pub prop_selectors: HashMap<String, String>,
    #[serde(default)]
    pub artifact_type: Option<String>,
}

/// Arguments the model supplies to `get_reference_artifact` (§4.4, §4.8).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetReferenceArtifactArgs {
    pub artifact_id: String,
}

/// Execute `get_reference_artifact`: fetch one previously saved artifact by
/// id from the turn's conversation, for citation or reuse (§4.4, §4.8).
/// Never fails the turn — an unknown id comes back as `found: false`,
/// matching `save_tool_result`'s "never throws" contract.
pub async fn get_reference_artifact(
    storage: &dyn crate::collaborators::Storage,
    conversation_id: &str,
    args: &GetReferenceArtifactArgs,
) -> serde_json::Value {
    match storage.get_conversation_scoped_artifacts(conversation_id).await {
        Ok(artifacts) => match artifacts.into_iter().find(|a| a.artifact_id == args.artifact_id) {
            Some(artifact) => serde_json::json!({"found": true, "artifact": artifact}),
            None => serde_json::json!({"found": false, "error": "artifact not found"}),
        },
        Err(e) => serde_json::json!({"found": false, "error": e.to_string()}),
    }
}

/// One saved artifact summary returned to the model (§4.8).
#[derive(Debug, Clone, Serialize)]
pub struct SavedArtifactSummary {
    pub artifact_id: String,
    pub task_id: String,
    pub summary_data: serde_json::Value,
}

/// The `save_tool_result` success/diagnostic result. Always returned as a
/// structured tool result — `save_tool_result` never throws (§4.8, §9).
#[derive(Debug, Clone, Serialize)]
pub struct SaveToolResultOutcome {
    pub saved: bool,
    #[serde(default)]
    pub artifacts: Vec<SavedArtifactSummary>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SaveToolResultOutcome {
    fn failure(error: impl Into<String>) -> Self {
        Self { saved: false, artifacts: Vec::new(), warnings: Vec::new(), error: Some(error.into()) }
    }
}

/// Recursively parse embedded JSON strings into structured values (§4.8 step 2).
fn parse_embedded_json(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => match serde_json::from_str::<serde_json::Value>(s.trim()) {
            Ok(parsed) if parsed.is_object() || parsed.is_array() => parse_embedded_json(parsed),
            _ => serde_json::Value::String(s),
        },
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(parse_embedded_json).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter().map(|(k, v)| (k, parse_embedded_json(v))).collect(),
        ),
        other => other,
    }
}

fn jmespath_search(expr_str: &str, data: &serde_json::Value) -> Result<serde_json::Value, String> {
    let expr = jmespath::compile(expr_str).map_err(|e| e.to_string())?;
    let var = data.clone().to_jmespath().map_err(|e| e.to_string())?;
    let result = expr.search(var).map_err(|e| e.to_string())?;
    serde_json::to_value(&*result).map_err(|e| e.to_string())
}

fn is_empty(value: &serde_json::Value) -> bool {
    matches!(value, serde_json::Value::Null)
        || matches!(value, serde_json::Value::Array(a) if a.is_empty())
}

/// Collect dot-paths at which `key` occurs anywhere in `value`, for the
/// "suggested alternatives" part of the diagnostic (§4.8 step 3).
fn find_key_paths(value: &serde_json::Value, key: &str, prefix: &str, out: &mut Vec<String>) {
    if let serde_json::Value::Object(map) = value {
        for (k, v) in map {
            let path = if prefix.is_empty() { k.clone() } else { format!("{}.{}", prefix, k) };
            if k == key {
                out.push(path.clone());
            }
            find_key_paths(v, key, &path, out);
        }
    } else if let serde_json::Value::Array(items) = value {
        for (i, item) in items.iter().enumerate() {
            find_key_paths(item, key, &format!("{}[{}]", prefix, i), out);
        }
    }
}

fn failing_component(selector: &str) -> String {
    selector
        .trim_end_matches(|c: char| c == ']' || c.is_ascii_digit() || c == '[')
        .rsplit(|c: char| c == '.' || c == '[')
        .next()
        .unwrap_or(selector)
        .trim_matches(|c: char| c == '\'' || c == '"' || c == '?' || c == ']')
        .to_string()
}

/// Build the diagnostic message returned when `baseSelector` yields nothing (§4.8 step 3).
fn diagnostic_message(base_selector: &str, data: &serde_json::Value) -> String {
    let top_level_keys: Vec<String> = match data {
        serde_json::Value::Object(map) => map.keys().cloned().collect(),
        serde_json::Value::Array(_) => vec!["<array root — no named keys>".to_string()],
        _ => vec!["<non-object root>".to_string()],
    };

    let component = failing_component(base_selector);
    let mut alternatives = Vec::new();
    find_key_paths(data, &component, "", &mut alternatives);

    let mut message = format!(
        "Tool result did not match selector \"{}\".\nDETECTED ISSUES: the path component \"{}\" was not found where expected.\nAVAILABLE TOP-LEVEL KEYS: {}",
        base_selector,
        component,
        top_level_keys.join(", ")
    );
    if !alternatives.is_empty() {
        message.push_str(&format!("\nTHE KEY \"{}\" DOES APPEAR AT: {}", component, alternatives.join(", ")));
    }
    message
}

fn normalize_to_items(value: serde_json::Value) -> Vec<serde_json::Value> {
    match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn prop_names(schema: &serde_json::Value) -> Vec<String> {
    match schema {
        serde_json::Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

fn project_item(
    item: &serde_json::Value,
    prop_names: &[String],
    prop_selectors: &HashMap<String, String>,
    warnings: &mut Vec<String>,
) -> serde_json::Value {
    let mut out = serde_json::Map::new();
    for name in prop_names {
        let selector = prop_selectors.get(name);
        let via_selector = selector.and_then(|sel| jmespath_search(sel, item).ok()).filter(|v| !is_empty(v));
        if selector.is_some() && via_selector.is_none() {
            warnings.push(format!(
                "propSelector for \"{}\" did not resolve a value; fell back to direct property access",
                name
            ));
        }
        let resolved = via_selector.or_else(|| item.get(name).cloned().filter(|v| !is_empty(v)));
        match resolved {
            Some(value) => {
                out.insert(name.clone(), value);
            }
            None => warnings.push(format!("could not resolve prop \"{}\"", name)),
        }
    }
    serde_json::Value::Object(out)
}

/// Collect terminal field paths and array paths within `value`, dot/bracket
/// style so they read as JMESPath fragments (§4.8 "Structure hints").
fn collect_paths(value: &serde_json::Value, prefix: &str, fields: &mut Vec<String>, arrays: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                let path = if prefix.is_empty() { k.clone() } else { format!("{}.{}", prefix, k) };
                collect_paths(v, &path, fields, arrays);
            }
        }
        serde_json::Value::Array(items) => {
            if !prefix.is_empty() {
                arrays.push(prefix.to_string());
            }
            if let Some(first) = items.first() {
                let elem_prefix = if prefix.is_empty() { String::new() } else { format!("{}[]", prefix) };
                collect_paths(first, &elem_prefix, fields, arrays);
            }
        }
        _ => {
            if !prefix.is_empty() {
                fields.push(prefix.to_string());
            }
        }
    }
}

fn example_selector_for(array_path: &str) -> String {
    format!("{}[?<field>=='<value>'] | [0]", array_path)
}

/// Derive the `_structureHints` annotation appended to a ledgered remote
/// tool result once any agent in the graph declares artifact components
/// (§4.8 "Structure hints"): terminal field paths, array paths, example
/// compound selectors, and a note on selector forms `propSelectors` must
/// avoid (re-indexing relative to a single projected item).
pub fn structure_hints(result: &serde_json::Value) -> serde_json::Value {
    let mut fields = Vec::new();
    let mut arrays = Vec::new();
    collect_paths(result, "", &mut fields, &mut arrays);
    fields.sort();
    fields.dedup();
    arrays.sort();
    arrays.dedup();
    let examples: Vec<String> = arrays.iter().map(|a| example_selector_for(a)).collect();

    serde_json::json!({
        "fieldPaths": fields,
        "arrayPaths": arrays,
        "exampleSelectors": examples,
        "forbidden": "propSelectors are evaluated against a single projected item; do not re-index with [0] or re-apply the array path inside one.",
    })
}

/// Attach `_structureHints` to a recorded remote-tool result, wrapping
/// non-object results so the annotation still has somewhere to live (§4.8).
pub fn attach_structure_hints(result: &serde_json::Value) -> serde_json::Value {
    let hints = structure_hints(result);
    match result {
        serde_json::Value::Object(map) => {
            let mut out = map.clone();
            out.insert("_structureHints".to_string(), hints);
            serde_json::Value::Object(out)
        }
        other => serde_json::json!({ "value": other, "_structureHints": hints }),
    }
}

/// Execute `save_tool_result` against the ledger entry for `args.tool_call_id` (§4.8).
pub async fn save_tool_result(
    agent_id: &str,
    ledger: &ToolSessionLedger,
    session_id: &str,
    task_id: &str,
    args: &SaveToolResultArgs,
    artifact_component: Option<&ArtifactComponent>,
    event_log: &GraphSessionEventLog,
) -> SaveToolResultOutcome {
    let record = match ledger.get(session_id, &args.tool_call_id).await {
        Some(r) => r,
        None => return SaveToolResultOutcome::failure("Tool result not found"),
    };

    let parsed = parse_embedded_json(record.result.clone());

    let base = match jmespath_search(&args.base_selector, &parsed) {
        Ok(v) if !is_empty(&v) => v,
        Ok(_) => return SaveToolResultOutcome::failure(diagnostic_message(&args.base_selector, &parsed)),
        Err(e) => {
            return SaveToolResultOutcome::failure(format!(
                "Invalid baseSelector \"{}\": {}",
                args.base_selector, e
            ))
        }
    };

    let items = normalize_to_items(base);
    let (summary_names, full_names) = match artifact_component {
        Some(ac) => (prop_names(&ac.summary_props), prop_names(&ac.full_props)),
        None => (Vec::new(), Vec::new()),
    };

    let mut warnings = Vec::new();
    let mut artifacts = Vec::new();

    for item in &items {
        let summary = project_item(item, &summary_names, &args.prop_selectors, &mut warnings);
        let full = project_item(item, &full_names, &args.prop_selectors, &mut warnings);
        let artifact_id = Uuid::new_v4().to_string();

        event_log
            .append(GraphSessionEvent::ArtifactSaved {
                agent_id: agent_id.to_string(),
                artifact_id: artifact_id.clone(),
                artifact_type: args.artifact_type.clone(),
                tool_call_id: args.tool_call_id.clone(),
                tool_name: record.tool_name.clone(),
                summary: summary.clone(),
                full,
                pending_generation: true,
            })
            .await;

        artifacts.push(SavedArtifactSummary {
            artifact_id,
            task_id: task_id.to_string(),
            summary_data: summary,
        });
    }

    SaveToolResultOutcome { saved: true, artifacts, warnings, error: None }
}
