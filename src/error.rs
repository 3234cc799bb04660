//! Error types for the agent turn execution core.
//!
//! Following the rest of this crate, error enums implement `Display`/`Error`
//! by hand rather than deriving them through a macro crate. `CoreError`
//! covers every failure that is fatal to a turn (see the error-handling
//! table in the specification); failures that happen *inside* a tool call
//! are never represented as `CoreError` — they are captured as a
//! [`crate::tool_protocol::ToolResult`] and fed back to the model instead.

use std::error::Error;
use std::fmt;

/// Fatal-to-the-turn failures.
///
/// A `CoreError` always ends the turn (state `Failed`). Anything that the
/// model itself can observe and retry from is represented elsewhere as a
/// tool result, never as this type.
#[derive(Debug)]
pub enum CoreError {
    /// The task's input contained no usable text.
    MissingInput,
    /// `storage.get_agent_by_id` returned nothing for the given id.
    AgentNotFound(String),
    /// The model provider call failed (network error, non-2xx, malformed body).
    ModelError(String),
    /// A per-phase deadline elapsed before the provider call returned.
    Timeout(&'static str),
    /// A storage collaborator call failed.
    StorageError(String),
    /// An A2A delegation exhausted its retry budget.
    A2ATransport(String),
    /// Context validation against request headers failed.
    ContextValidation(String),
    /// Catch-all for collaborator / serialization errors at the turn boundary.
    Other(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::MissingInput => {
                write!(f, "No text content found in task input")
            }
            CoreError::AgentNotFound(id) => write!(f, "Agent not found: {}", id),
            CoreError::ModelError(msg) => write!(f, "model provider error: {}", msg),
            CoreError::Timeout(phase) => write!(f, "timeout in {}", phase),
            CoreError::StorageError(msg) => write!(f, "storage error: {}", msg),
            CoreError::A2ATransport(msg) => write!(f, "A2A transport error: {}", msg),
            CoreError::ContextValidation(msg) => write!(f, "context validation failed: {}", msg),
            CoreError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Other(format!("json error: {}", e))
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        CoreError::A2ATransport(e.to_string())
    }
}

/// Convert into the boxed error shape used at collaborator-trait boundaries.
pub fn boxed(e: CoreError) -> Box<dyn Error + Send + Sync> {
    Box::new(StringError(e.to_string()))
}

#[derive(Debug)]
struct StringError(String);

impl fmt::Display for StringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for StringError {}
