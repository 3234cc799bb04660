//! Incremental Stream Parser (§4.6): turns a text-delta or partial-object
//! stream into an ordered list of `text` / `data` [`Part`]s, resolving
//! `<artifact:ref id="…" task="…"/>` markers against a conversation's
//! artifacts without ever splitting a marker across two emitted parts.
//!
//! The `futures_util::Stream` plumbing this eventually feeds follows the
//! teacher's `MessageChunkStream`/`chunks_to_stream` idiom
//! (`client_wrapper.rs`, `clients/common.rs`); the safe-boundary scan
//! itself has no teacher precedent and is hand-written here as a small
//! byte-scanner over the fixed literal prefix `<artifact:ref`.

use crate::model::Part;
use lazy_static::lazy_static;
use regex::Regex;

const MARKER_LITERAL: &str = "<artifact:ref";

lazy_static! {
    static ref MARKER_RE: Regex =
        Regex::new(r#"<artifact:ref\s+id="([^"]*?)"\s+task="([^"]*?)"\s*/>"#).unwrap();
}

/// Resolves an artifact-ref marker (or an artifact-reference data component)
/// into the `{artifactId, taskId, name, description, artifactType,
/// artifactSummary}` shape emitted to the client (§4.6). Markers with no
/// match resolve to `None` and are dropped silently.
pub trait ArtifactResolver: Send + Sync {
    fn resolve(&self, artifact_id: &str, task_id: &str) -> Option<serde_json::Value>;
}

/// One `dataComponents[]` delta entry from a partial-object stream (§4.6).
pub struct DataComponentDelta {
    pub name: String,
    pub props: serde_json::Value,
}

/// The largest prefix length of `buf` that is guaranteed not to be the
/// start of an incomplete `<artifact:ref` marker (§4.6).
fn safe_boundary_len(buf: &str) -> usize {
    if let Some(idx) = buf.find(MARKER_LITERAL) {
        return idx;
    }
    let max_overlap = buf.len().min(MARKER_LITERAL.len() - 1);
    for k in (1..=max_overlap).rev() {
        if buf.as_bytes()[buf.len() - k..] == MARKER_LITERAL.as_bytes()[..k] {
            return buf.len() - k;
        }
    }
    buf.len()
}

/// Accumulates a single task's model output into ordered parts (§4.6).
pub struct StreamParser {
    buffer: String,
    finalized: bool,
}

impl StreamParser {
    pub fn new() -> Self {
        Self { buffer: String::new(), finalized: false }
    }

    /// Feed a text delta, returning whatever parts are now safe to emit.
    pub fn push_text_delta(&mut self, delta: &str, resolver: &dyn ArtifactResolver) -> Vec<Part> {
        assert!(!self.finalized, "push after finalize");
        self.buffer.push_str(delta);
        let mut parts = Vec::new();

        while let Some(m) = MARKER_RE.find(&self.buffer) {
            if m.start() > 0 {
                parts.push(Part::Text { text: self.buffer[..m.start()].to_string() });
            }
            let caps = MARKER_RE.captures(&self.buffer[m.start()..m.end()]).unwrap();
            if let Some(resolved) = resolver.resolve(&caps[1], &caps[2]) {
                parts.push(Part::Data { data: resolved });
            }
            self.buffer = self.buffer[m.end()..].to_string();
        }

        let safe_len = safe_boundary_len(&self.buffer);
        if safe_len > 0 {
            parts.push(Part::Text { text: self.buffer[..safe_len].to_string() });
            self.buffer = self.buffer[safe_len..].to_string();
        }
        parts
    }

    /// Normalize one object-stream `dataComponents[]` delta (§4.6).
    pub fn push_data_component(
        &mut self,
        delta: DataComponentDelta,
        resolver: &dyn ArtifactResolver,
    ) -> Option<Part> {
        let artifact_id = delta.props.get("artifact_id").and_then(|v| v.as_str());
        let task_id = delta.props.get("task_id").and_then(|v| v.as_str());
        if let (Some(artifact_id), Some(task_id)) = (artifact_id, task_id) {
            return resolver.resolve(artifact_id, task_id).map(|data| Part::Data { data });
        }
        Some(Part::Data { data: serde_json::json!({ "name": delta.name, "props": delta.props }) })
    }

    /// Flush any residual buffered text once the upstream stream has ended (§4.6).
    pub fn finalize(&mut self) -> Vec<Part> {
        self.finalized = true;
        if self.buffer.is_empty() {
            return Vec::new();
        }
        vec![Part::Text { text: std::mem::take(&mut self.buffer) }]
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a complete, already-materialized text in one pass (§4.7: the
/// Response Formatter applies the same resolution logic as the streaming
/// parser, just without needing a safe-boundary scan since there is no
/// "more data coming" to wait for).
pub fn resolve_once(text: &str, resolver: &dyn ArtifactResolver) -> Vec<Part> {
    let mut parser = StreamParser::new();
    let mut parts = parser.push_text_delta(text, resolver);
    parts.extend(parser.finalize());
    parts
}
