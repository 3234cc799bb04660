//! Model Driver (§4.5): a uniform `generate_text` / `generate_object` /
//! `stream_text` / `stream_object` interface over an external provider,
//! with per-call timeouts, tool-choice policy, and a stop predicate.
//!
//! Grounded on the toolkit's [`crate::client_wrapper::ClientWrapper`]
//! trait (native tool-calling, `Message`/`Role`/`NativeToolCall`) and on
//! its `send_with_native_tools` provider-call shape for the native
//! tool-calling wire shape. `ClientWrapper` has no notion of a
//! schema-constrained "object" response, so `generate_object` is built on
//! top of `generate_text` by instructing the model to emit a single JSON
//! object and parsing the result — the same "ask, then parse" shape the
//! toolkit already uses for tool-call detection in `agent::parse_tool_call`,
//! just applied to the whole response body instead of an embedded blob.

use crate::client_wrapper::{ClientWrapper, Message, MessageChunkStream, NativeToolCall, Role, ToolDefinition};
use crate::error::CoreError;
use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Which phase is driving this call, used only to pick a timeout and
/// disposition on cancellation (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Phase1NonStreaming,
    Phase1Streaming,
    Phase2,
}

/// Tool-choice policy threaded into the provider call (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    /// Natural text + tools allowed.
    Auto,
    /// Forces a tool call; used in phase 1 when structured output is required.
    Required,
    /// No tools offered; used in phase 2.
    None,
}

/// One step of phase-1 generation: the assistant message plus whatever
/// tool calls it requested (§4.5's `steps[]`).
#[derive(Debug, Clone)]
pub struct GenerationStep {
    pub text: String,
    pub tool_calls: Vec<NativeToolCall>,
}

/// Aggregate result of `generate_text` (§4.5).
#[derive(Debug, Clone)]
pub struct TextGeneration {
    pub steps: Vec<GenerationStep>,
    pub text: String,
}

/// Result of `generate_object` (§4.5): the parsed object plus the raw text it came from.
#[derive(Debug, Clone)]
pub struct ObjectGeneration {
    pub object: serde_json::Value,
    pub raw_text: String,
}

/// A predicate evaluated after each phase-1 step to decide whether to keep
/// generating. Returning `true` stops the loop (§4.9's stop predicate).
pub type StopPredicate = Arc<dyn Fn(&[GenerationStep]) -> bool + Send + Sync>;

/// One event in a `stream_text` stream (§4.5): incremental text as it
/// arrives, a native tool call once the model selects one, or the
/// terminal aggregate equivalent to what `generate_text` would have
/// returned for the same step.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCall(NativeToolCall),
    Finish(TextGeneration),
}

/// One event in a `stream_object` stream (§4.5): a running snapshot of the
/// schema-constrained object as it's revealed, then the terminal aggregate.
#[derive(Debug, Clone)]
pub enum ObjectStreamEvent {
    PartialObject(serde_json::Value),
    Finish(ObjectGeneration),
}

/// A boxed stream of [`StreamEvent`]s, returned by `stream_text` (§4.5).
pub type TextEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// A boxed stream of [`ObjectStreamEvent`]s, returned by `stream_object` (§4.5).
pub type ObjectEventStream = Pin<Box<dyn Stream<Item = ObjectStreamEvent> + Send>>;

/// Replay one `generate_text`-style aggregate as the event sequence a
/// streaming caller would have seen, for providers with no true
/// incremental output to offer.
fn events_from_generation(generation: TextGeneration) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if let Some(step) = generation.steps.last() {
        if !step.text.is_empty() {
            events.push(StreamEvent::TextDelta(step.text.clone()));
        }
        events.extend(step.tool_calls.iter().cloned().map(StreamEvent::ToolCall));
    }
    events.push(StreamEvent::Finish(generation));
    events
}

/// Uniform interface over an external model provider (§4.5, §6.1).
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate_text(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        tool_choice: ToolChoice,
        stop_predicate: StopPredicate,
        max_steps: u32,
        timeout: Duration,
    ) -> Result<TextGeneration, CoreError>;

    async fn generate_object(
        &self,
        messages: &[Message],
        schema: &serde_json::Value,
        timeout: Duration,
    ) -> Result<ObjectGeneration, CoreError>;

    /// Stream one phase-1 model call a delta at a time (§4.5). The default
    /// degrades any provider with no real incremental output into a single
    /// `generate_text` round trip replayed as `text-delta`(s) followed by
    /// `finish`; implementors that front a genuinely streaming provider
    /// should override this.
    async fn stream_text(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        tool_choice: ToolChoice,
        timeout: Duration,
    ) -> Result<TextEventStream, CoreError> {
        let generation = self.generate_text(messages, tools, tool_choice, Arc::new(|_| true), 1, timeout).await?;
        Ok(Box::pin(futures_util::stream::iter(events_from_generation(generation))))
    }

    /// Stream one phase-2 structured-output call (§4.5). The default
    /// degrades to a single complete `PartialObject` followed by `finish`,
    /// since `generate_object` has no notion of incremental fields itself.
    async fn stream_object(
        &self,
        messages: &[Message],
        schema: &serde_json::Value,
        timeout: Duration,
    ) -> Result<ObjectEventStream, CoreError> {
        let generation = self.generate_object(messages, schema, timeout).await?;
        Ok(Box::pin(futures_util::stream::iter(vec![
            ObjectStreamEvent::PartialObject(generation.object.clone()),
            ObjectStreamEvent::Finish(generation),
        ])))
    }
}

/// Adapts any [`ClientWrapper`] (the toolkit's provider-specific client
/// abstraction) into a [`ModelProvider`].
pub struct ClientWrapperModelProvider<T: ClientWrapper> {
    client: Arc<T>,
}

impl<T: ClientWrapper> ClientWrapperModelProvider<T> {
    pub fn new(client: Arc<T>) -> Self {
        Self { client }
    }
}

fn message_has_tool_call_prefix(tool_calls: &[NativeToolCall], prefix: &str) -> bool {
    tool_calls.iter().any(|tc| tc.name.starts_with(prefix))
}

/// Default stop predicate: stop on any `transfer_to_*` call or a
/// `thinking_complete` call (§4.9). The step cap is enforced by the caller.
pub fn default_stop_predicate() -> StopPredicate {
    Arc::new(|steps: &[GenerationStep]| {
        steps
            .last()
            .map(|step| {
                message_has_tool_call_prefix(&step.tool_calls, "transfer_to_")
                    || step.tool_calls.iter().any(|tc| tc.name == "thinking_complete")
            })
            .unwrap_or(false)
    })
}

#[async_trait]
impl<T: ClientWrapper> ModelProvider for ClientWrapperModelProvider<T> {
    async fn generate_text(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        tool_choice: ToolChoice,
        stop_predicate: StopPredicate,
        max_steps: u32,
        timeout: Duration,
    ) -> Result<TextGeneration, CoreError> {
        let tools_arg = if matches!(tool_choice, ToolChoice::None) || tools.is_empty() {
            None
        } else {
            Some(tools.to_vec())
        };

        let mut transcript: Vec<Message> = messages.to_vec();
        let mut steps = Vec::new();

        for _ in 0..max_steps.max(1) {
            let response = tokio::time::timeout(
                timeout,
                self.client.send_message(&transcript, tools_arg.clone()),
            )
            .await
            .map_err(|_| CoreError::Timeout("phase1"))?
            .map_err(|e| CoreError::ModelError(e.to_string()))?;

            let step = GenerationStep {
                text: response.content.to_string(),
                tool_calls: response.tool_calls.clone(),
            };

            transcript.push(Message {
                role: Role::Assistant,
                content: response.content.clone(),
                tool_calls: response.tool_calls.clone(),
            });

            let is_last = step.tool_calls.is_empty();
            steps.push(step);

            if stop_predicate(&steps) || is_last {
                break;
            }
        }

        let text = steps.last().map(|s| s.text.clone()).unwrap_or_default();
        Ok(TextGeneration { steps, text })
    }

    async fn generate_object(
        &self,
        messages: &[Message],
        schema: &serde_json::Value,
        timeout: Duration,
    ) -> Result<ObjectGeneration, CoreError> {
        let mut transcript: Vec<Message> = messages.to_vec();
        transcript.push(Message {
            role: Role::System,
            content: std::sync::Arc::from(format!(
                "Respond with exactly one JSON object conforming to this schema and nothing else:\n{}",
                schema
            )),
            tool_calls: vec![],
        });

        let response = tokio::time::timeout(timeout, self.client.send_message(&transcript, None))
            .await
            .map_err(|_| CoreError::Timeout("phase2"))?
            .map_err(|e| CoreError::ModelError(e.to_string()))?;

        let raw_text = response.content.to_string();
        let object: serde_json::Value = serde_json::from_str(raw_text.trim()).map_err(|e| {
            CoreError::ModelError(format!("phase 2 response was not valid JSON: {}", e))
        })?;

        Ok(ObjectGeneration { object, raw_text })
    }

    async fn stream_text(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        tool_choice: ToolChoice,
        timeout: Duration,
    ) -> Result<TextEventStream, CoreError> {
        let tools_arg = if matches!(tool_choice, ToolChoice::None) || tools.is_empty() {
            None
        } else {
            Some(tools.to_vec())
        };

        if tools_arg.is_some() {
            // Native tool-calling is not representable over `MessageChunk`
            // (see `ClientWrapper::send_message_stream`'s doc comment), so a
            // turn that may select a tool falls back to one round trip
            // replayed as a stream.
            let generation = self.generate_text(messages, tools, tool_choice, Arc::new(|_| true), 1, timeout).await?;
            return Ok(Box::pin(futures_util::stream::iter(events_from_generation(generation))));
        }

        let maybe_chunks = tokio::time::timeout(timeout, self.client.send_message_stream(messages, None))
            .await
            .map_err(|_| CoreError::Timeout("phase1_stream"))?
            .map_err(|e| CoreError::ModelError(e.to_string()))?;

        match maybe_chunks {
            Some(chunks) => Ok(Box::pin(chunk_stream_to_events(chunks))),
            None => {
                let generation = self.generate_text(messages, tools, tool_choice, Arc::new(|_| true), 1, timeout).await?;
                Ok(Box::pin(futures_util::stream::iter(events_from_generation(generation))))
            }
        }
    }
}

enum ChunkStreamState {
    Streaming { chunks: MessageChunkStream, acc: String },
    Done,
}

/// Turn a provider's [`MessageChunkStream`] into [`StreamEvent`]s,
/// accumulating content so the terminal `Finish` carries the same
/// aggregate shape `generate_text` would have produced for one step.
fn chunk_stream_to_events(chunks: MessageChunkStream) -> impl Stream<Item = StreamEvent> + Send {
    futures_util::stream::unfold(ChunkStreamState::Streaming { chunks, acc: String::new() }, |mut state| async move {
        loop {
            match state {
                ChunkStreamState::Streaming { mut chunks, mut acc } => match chunks.next().await {
                    Some(Ok(chunk)) if chunk.content.is_empty() => {
                        state = ChunkStreamState::Streaming { chunks, acc };
                    }
                    Some(Ok(chunk)) => {
                        acc.push_str(&chunk.content);
                        let delta = chunk.content;
                        return Some((StreamEvent::TextDelta(delta), ChunkStreamState::Streaming { chunks, acc }));
                    }
                    Some(Err(_)) | None => {
                        let generation = TextGeneration {
                            steps: vec![GenerationStep { text: acc.clone(), tool_calls: vec![] }],
                            text: acc,
                        };
                        return Some((StreamEvent::Finish(generation), ChunkStreamState::Done));
                    }
                },
                ChunkStreamState::Done => return None,
            }
        }
    })
}
