//! Agent Turn Executor (§4.9): the `INIT → LOAD → PHASE_1 → { TRANSFER |
//! PHASE_2 | DONE } → FORMAT → END` state machine that drives one agent's
//! turn — phase-1 planning with native tool calls, phase-2 structured
//! output when the agent declares data components, and the handoff of a
//! transfer tool call back to the Task Handler.
//!
//! The step loop (call model → inspect tool calls → execute each
//! sequentially → feed results back → loop) is grounded on the teacher's
//! `Agent::send`/`Agent::generate_with_tokens` tool loop in `agent.rs`,
//! including its event-emission cadence — but the *detection* mechanism is
//! replaced: rather than parsing a `{"tool_call":...}` blob out of free
//! text (`Agent::parse_tool_call`'s brace counting), this inspects
//! `Message.tool_calls: Vec<NativeToolCall>` returned by the Model Driver,
//! since native tool-calling with a real `toolChoice` policy is required
//! and the teacher's own `send_with_native_tools` already demonstrates it
//! at the client layer.

use crate::a2a::{delegate, A2ATransport, DelegationRequest};
use crate::artifact_extractor::{get_reference_artifact, save_tool_result, GetReferenceArtifactArgs, SaveToolResultArgs};
use crate::client_wrapper::{Message, Role};
use crate::collaborators::Storage;
use crate::config::CoreConfig;
use crate::event_log::{GraphSessionEvent, GraphSessionEventLog};
use crate::ledger::ToolSessionLedger;
use crate::model::{Agent, Artifact, Graph, Part, Task};
use crate::model_driver::{default_stop_predicate, ModelProvider, ObjectStreamEvent, StreamEvent, ToolChoice};
use crate::prompt::PromptAssembler;
use crate::response_formatter::{format_text_response, PrefetchedArtifacts};
use crate::stream_parser::{ArtifactResolver, StreamParser};
use crate::tool_registry::{execute_and_log, CallableTool, ToolRegistry};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Everything invariant for the duration of one turn.
pub struct TurnInput<'a> {
    pub agent: &'a Agent,
    pub graph: &'a Graph,
    pub task: &'a Task,
    pub history: Vec<Message>,
    pub context_vars: HashMap<String, String>,
}

/// The collaborators a turn needs, assembled by the Task Handler (§4.10).
pub struct TurnDeps<'a> {
    pub model: &'a dyn ModelProvider,
    pub registry: ToolRegistry,
    pub ledger: &'a ToolSessionLedger,
    pub event_log: &'a GraphSessionEventLog,
    pub storage: &'a dyn Storage,
    pub a2a_transport: Option<&'a dyn A2ATransport>,
    pub config: &'a CoreConfig,
    pub session_id: String,
    /// Drive phase 1/phase 2 through `stream_text`/`stream_object` instead
    /// of the single-shot `generate_text`/`generate_object` calls (§4.9).
    pub streaming: bool,
}

/// What a turn produced (§4.9).
#[derive(Debug)]
pub enum TurnOutcome {
    Completed { artifacts: Vec<Artifact> },
    Transfer { target_agent_id: String, reason: Option<String> },
    Failed { message: String },
}

fn tool_result_message(call_id: &str, payload: serde_json::Value) -> Message {
    Message {
        role: Role::Tool { call_id: call_id.to_string() },
        content: Arc::from(payload.to_string().as_str()),
        tool_calls: vec![],
    }
}

/// `PHASE_1 → { TRANSFER | PHASE_2 | DONE }` (§4.9).
enum Phase1Outcome {
    Transfer { target_agent_id: String, reason: Option<String> },
    EnterPhase2,
    Done { text: String },
    DoneStreamed { parts: Vec<Part> },
    Failed { message: String },
}

/// What one tool call resolves to, shared by the streaming and
/// non-streaming phase-1 loops (§4.9, §4.4).
enum ToolDispatch {
    ThinkingComplete(Message),
    Transfer { target_agent_id: String, reason: Option<String> },
    Message(Message),
}

/// Execute one native tool call and turn it into the message (or
/// control-flow signal) the phase-1 loop should act on (§4.4).
async fn dispatch_tool_call(
    input: &TurnInput<'_>,
    deps: &TurnDeps<'_>,
    call: &crate::client_wrapper::NativeToolCall,
) -> ToolDispatch {
    if call.name == "thinking_complete" {
        return ToolDispatch::ThinkingComplete(tool_result_message(&call.id, serde_json::json!({"acknowledged": true})));
    }
    if call.name == "save_tool_result" {
        let args: Result<SaveToolResultArgs, _> = serde_json::from_value(call.arguments.clone());
        let payload = match args {
            Ok(args) => {
                let ac = input
                    .agent
                    .artifact_components
                    .iter()
                    .find(|ac| Some(&ac.artifact_type) == args.artifact_type.as_ref());
                let outcome = save_tool_result(
                    &input.agent.id,
                    deps.ledger,
                    &deps.session_id,
                    &input.task.id,
                    &args,
                    ac,
                    deps.event_log,
                )
                .await;
                serde_json::to_value(&outcome).unwrap_or(serde_json::Value::Null)
            }
            Err(e) => serde_json::json!({"saved": false, "error": format!("invalid save_tool_result arguments: {}", e)}),
        };
        return ToolDispatch::Message(tool_result_message(&call.id, payload));
    }
    if call.name == "get_reference_artifact" {
        let args: Result<GetReferenceArtifactArgs, _> = serde_json::from_value(call.arguments.clone());
        let payload = match args {
            Ok(args) => get_reference_artifact(deps.storage, &input.task.metadata.conversation_id, &args).await,
            Err(e) => serde_json::json!({"found": false, "error": format!("invalid get_reference_artifact arguments: {}", e)}),
        };
        return ToolDispatch::Message(tool_result_message(&call.id, payload));
    }

    match deps.registry.get(&call.name) {
        Some(CallableTool::Transfer { target_agent_id, .. }) => {
            deps.event_log
                .append(GraphSessionEvent::Transfer { agent_id: input.agent.id.clone(), target: target_agent_id.clone() })
                .await;
            let reason = call.arguments.get("reason").and_then(|v| v.as_str()).map(|s| s.to_string());
            ToolDispatch::Transfer { target_agent_id: target_agent_id.clone(), reason }
        }
        Some(CallableTool::Delegate { target_agent_id, .. }) => {
            let target_agent_id = target_agent_id.clone();
            let text = call.arguments.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let payload = match deps.a2a_transport {
                Some(transport) => {
                    let req = DelegationRequest {
                        caller_agent_id: &input.agent.id,
                        target_agent_id: &target_agent_id,
                        target_is_external: false,
                        delegate_tool_call_id: &call.id,
                        text,
                        tenant_id: &input.agent.tenant_id,
                        project_id: &input.agent.project_id,
                        conversation_id: &input.task.metadata.conversation_id,
                    };
                    match delegate(req, transport, deps.storage, deps.ledger, &deps.session_id, deps.event_log, deps.config).await {
                        Ok(result) => result,
                        Err(e) => serde_json::json!({"error": e.to_string()}),
                    }
                }
                None => serde_json::json!({"error": "no A2A transport configured"}),
            };
            ToolDispatch::Message(tool_result_message(&call.id, payload))
        }
        Some(tool @ CallableTool::Remote { .. }) => {
            let has_artifact_components = !input.agent.artifact_components.is_empty();
            let result = execute_and_log(
                &input.agent.id,
                &call.id,
                tool,
                call.arguments.clone(),
                deps.event_log,
                deps.ledger,
                &deps.session_id,
                has_artifact_components,
            )
            .await;
            let payload = match result {
                Ok(r) => serde_json::to_value(&r).unwrap_or(serde_json::Value::Null),
                Err(e) => serde_json::json!({"success": false, "error": e.to_string()}),
            };
            ToolDispatch::Message(tool_result_message(&call.id, payload))
        }
        Some(CallableTool::BuiltIn { name }) => {
            ToolDispatch::Message(tool_result_message(&call.id, serde_json::json!({"error": format!("unhandled built-in tool {}", name)})))
        }
        None => ToolDispatch::Message(tool_result_message(&call.id, serde_json::json!({"error": format!("unknown tool: {}", call.name)}))),
    }
}

async fn run_phase1(
    input: &TurnInput<'_>,
    deps: &TurnDeps<'_>,
    tool_defs: &[crate::client_wrapper::ToolDefinition],
    has_existing_artifacts: bool,
) -> (Vec<Message>, Phase1Outcome) {
    let requires_structured_output = input.agent.requires_structured_output();
    let step_cap = if input.agent.stop_when.step_count_is > 0 {
        input.agent.stop_when.step_count_is
    } else {
        deps.config.default_step_cap
    };
    let tool_choice = if requires_structured_output { ToolChoice::Required } else { ToolChoice::Auto };
    let timeout = deps.config.phase1_timeout.min(deps.config.max_timeout_ceiling);

    let mut messages = input.history.clone();
    let manifest: Vec<_> = deps.registry.remote_metadata().iter().map(|m| (*m).into()).collect();
    let system_prompt = PromptAssembler::phase1(input.agent, input.graph, &input.context_vars, &manifest, has_existing_artifacts);
    messages.insert(0, Message { role: Role::System, content: Arc::from(system_prompt.as_str()), tool_calls: vec![] });
    messages.push(Message { role: Role::User, content: Arc::from(input.task.text_input().as_str()), tool_calls: vec![] });

    let mut last_text = String::new();

    for step_count in 1..=step_cap {
        let generation = match deps
            .model
            .generate_text(&messages, tool_defs, tool_choice, default_stop_predicate(), 1, timeout)
            .await
        {
            Ok(g) => g,
            Err(e) => return (messages, Phase1Outcome::Failed { message: e.to_string() }),
        };
        let Some(step) = generation.steps.last() else {
            return (messages, Phase1Outcome::Failed { message: "model returned no generation step".to_string() });
        };
        last_text = step.text.clone();

        messages.push(Message { role: Role::Assistant, content: Arc::from(step.text.as_str()), tool_calls: step.tool_calls.clone() });
        deps.event_log.append(GraphSessionEvent::AgentGenerate { agent_id: input.agent.id.clone(), step_count }).await;
        if !step.text.is_empty() && !step.tool_calls.is_empty() {
            deps.event_log
                .append(GraphSessionEvent::AgentReasoning { agent_id: input.agent.id.clone(), text: step.text.clone() })
                .await;
        }

        if step.tool_calls.is_empty() {
            return (messages, Phase1Outcome::Done { text: last_text });
        }

        let mut saw_thinking_complete = false;
        for call in &step.tool_calls {
            match dispatch_tool_call(input, deps, call).await {
                ToolDispatch::ThinkingComplete(msg) => {
                    saw_thinking_complete = true;
                    messages.push(msg);
                }
                ToolDispatch::Transfer { target_agent_id, reason } => {
                    return (messages, Phase1Outcome::Transfer { target_agent_id, reason });
                }
                ToolDispatch::Message(msg) => messages.push(msg),
            }
        }

        if requires_structured_output && saw_thinking_complete {
            return (messages, Phase1Outcome::EnterPhase2);
        }
    }

    (messages, Phase1Outcome::Done { text: last_text })
}

/// Streaming counterpart of [`run_phase1`]: drives `stream_text` and feeds
/// every text delta through the [`StreamParser`] so artifact-ref markers
/// resolve incrementally instead of in one final pass (§4.6, §4.9).
async fn run_phase1_streaming(
    input: &TurnInput<'_>,
    deps: &TurnDeps<'_>,
    tool_defs: &[crate::client_wrapper::ToolDefinition],
    has_existing_artifacts: bool,
    resolver: &dyn ArtifactResolver,
) -> (Vec<Message>, Phase1Outcome) {
    let requires_structured_output = input.agent.requires_structured_output();
    let step_cap = if input.agent.stop_when.step_count_is > 0 {
        input.agent.stop_when.step_count_is
    } else {
        deps.config.default_step_cap
    };
    let tool_choice = if requires_structured_output { ToolChoice::Required } else { ToolChoice::Auto };
    let timeout = deps.config.phase1_stream_timeout.min(deps.config.max_timeout_ceiling);

    let mut messages = input.history.clone();
    let manifest: Vec<_> = deps.registry.remote_metadata().iter().map(|m| (*m).into()).collect();
    let system_prompt = PromptAssembler::phase1(input.agent, input.graph, &input.context_vars, &manifest, has_existing_artifacts);
    messages.insert(0, Message { role: Role::System, content: Arc::from(system_prompt.as_str()), tool_calls: vec![] });
    messages.push(Message { role: Role::User, content: Arc::from(input.task.text_input().as_str()), tool_calls: vec![] });

    let mut last_parts: Vec<Part> = Vec::new();

    for step_count in 1..=step_cap {
        let mut stream = match deps.model.stream_text(&messages, tool_defs, tool_choice, timeout).await {
            Ok(s) => s,
            Err(e) => return (messages, Phase1Outcome::Failed { message: e.to_string() }),
        };

        let mut parser = StreamParser::new();
        let mut step_parts = Vec::new();
        let mut step_text = String::new();
        let mut step_tool_calls = Vec::new();

        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::TextDelta(delta) => step_parts.extend(parser.push_text_delta(&delta, resolver)),
                StreamEvent::ToolCall(call) => step_tool_calls.push(call),
                StreamEvent::Finish(generation) => {
                    if let Some(last_step) = generation.steps.last() {
                        step_text = last_step.text.clone();
                        if step_tool_calls.is_empty() {
                            step_tool_calls = last_step.tool_calls.clone();
                        }
                    }
                }
            }
        }
        step_parts.extend(parser.finalize());
        last_parts = step_parts;

        messages.push(Message { role: Role::Assistant, content: Arc::from(step_text.as_str()), tool_calls: step_tool_calls.clone() });
        deps.event_log.append(GraphSessionEvent::AgentGenerate { agent_id: input.agent.id.clone(), step_count }).await;
        if !step_text.is_empty() && !step_tool_calls.is_empty() {
            deps.event_log
                .append(GraphSessionEvent::AgentReasoning { agent_id: input.agent.id.clone(), text: step_text.clone() })
                .await;
        }

        if step_tool_calls.is_empty() {
            return (messages, Phase1Outcome::DoneStreamed { parts: last_parts });
        }

        let mut saw_thinking_complete = false;
        for call in &step_tool_calls {
            match dispatch_tool_call(input, deps, call).await {
                ToolDispatch::ThinkingComplete(msg) => {
                    saw_thinking_complete = true;
                    messages.push(msg);
                }
                ToolDispatch::Transfer { target_agent_id, reason } => {
                    return (messages, Phase1Outcome::Transfer { target_agent_id, reason });
                }
                ToolDispatch::Message(msg) => messages.push(msg),
            }
        }

        if requires_structured_output && saw_thinking_complete {
            return (messages, Phase1Outcome::EnterPhase2);
        }
    }

    (messages, Phase1Outcome::DoneStreamed { parts: last_parts })
}

/// `PHASE_2`: construct the structured-output transcript and call
/// `generate_object` against the union schema of data/artifact components (§4.9).
async fn run_phase2(input: &TurnInput<'_>, deps: &TurnDeps<'_>, reasoning_transcript: &[Message]) -> Result<serde_json::Value, crate::error::CoreError> {
    let system_prompt = PromptAssembler::phase2(
        input.agent,
        &input.context_vars,
        &input.agent.data_components,
        &input.agent.artifact_components,
    );

    let mut messages = vec![Message { role: Role::System, content: Arc::from(system_prompt.as_str()), tool_calls: vec![] }];
    messages.extend(reasoning_transcript.iter().cloned());

    let schema = build_phase2_schema(input.agent);
    let timeout = deps.config.phase2_timeout.min(deps.config.max_timeout_ceiling);
    let generation = deps.model.generate_object(&messages, &schema, timeout).await?;
    Ok(generation.object)
}

/// Streaming counterpart of [`run_phase2`]: drives `stream_object` and
/// keeps the latest partial/finished object (§4.9).
async fn run_phase2_streaming(
    input: &TurnInput<'_>,
    deps: &TurnDeps<'_>,
    reasoning_transcript: &[Message],
) -> Result<serde_json::Value, crate::error::CoreError> {
    let system_prompt = PromptAssembler::phase2(
        input.agent,
        &input.context_vars,
        &input.agent.data_components,
        &input.agent.artifact_components,
    );

    let mut messages = vec![Message { role: Role::System, content: Arc::from(system_prompt.as_str()), tool_calls: vec![] }];
    messages.extend(reasoning_transcript.iter().cloned());

    let schema = build_phase2_schema(input.agent);
    let timeout = deps.config.phase2_timeout.min(deps.config.max_timeout_ceiling);
    let mut stream = deps.model.stream_object(&messages, &schema, timeout).await?;
    let mut object = serde_json::Value::Null;
    while let Some(event) = stream.next().await {
        match event {
            ObjectStreamEvent::PartialObject(value) => object = value,
            ObjectStreamEvent::Finish(generation) => object = generation.object,
        }
    }
    Ok(object)
}

fn build_phase2_schema(agent: &Agent) -> serde_json::Value {
    let mut one_of: Vec<serde_json::Value> = agent
        .data_components
        .iter()
        .map(|dc| serde_json::json!({"title": dc.name, "description": dc.description, "properties": dc.props_schema}))
        .collect();
    for ac in &agent.artifact_components {
        one_of.push(serde_json::json!({
            "title": format!("ArtifactCreate_{}", ac.artifact_type),
            "properties": { "summary": ac.summary_props, "full": ac.full_props },
        }));
    }
    one_of.push(serde_json::json!({"title": "ArtifactReference", "properties": {"artifactId": "string", "taskId": "string"}}));
    serde_json::json!({ "oneOf": one_of })
}

/// Drive one full turn for `input.agent` (§4.9).
pub async fn run_turn(input: TurnInput<'_>, deps: TurnDeps<'_>) -> TurnOutcome {
    if input.task.text_input().trim().is_empty() {
        return TurnOutcome::Failed { message: crate::error::CoreError::MissingInput.to_string() };
    }

    let prefetched = match PrefetchedArtifacts::load(deps.storage, &input.task.metadata.conversation_id).await {
        Ok(p) => p,
        Err(e) => return TurnOutcome::Failed { message: e.to_string() },
    };

    let tool_defs = deps.registry.tool_definitions();
    let (messages, phase1_outcome) = if deps.streaming {
        run_phase1_streaming(&input, &deps, &tool_defs, !prefetched.is_empty(), &prefetched).await
    } else {
        run_phase1(&input, &deps, &tool_defs, !prefetched.is_empty()).await
    };

    match phase1_outcome {
        Phase1Outcome::Failed { message } => TurnOutcome::Failed { message },
        Phase1Outcome::Transfer { target_agent_id, reason } => TurnOutcome::Transfer { target_agent_id, reason },
        Phase1Outcome::EnterPhase2 => {
            let object_result =
                if deps.streaming { run_phase2_streaming(&input, &deps, &messages).await } else { run_phase2(&input, &deps, &messages).await };
            match object_result {
                Ok(object) => {
                    let artifact = Artifact {
                        artifact_id: Uuid::new_v4().to_string(),
                        task_id: input.task.id.clone(),
                        artifact_type: None,
                        name: None,
                        description: None,
                        parts: vec![Part::Data { data: object }],
                        metadata: HashMap::new(),
                    };
                    deps.event_log.append(GraphSessionEvent::AgentGenerate { agent_id: input.agent.id.clone(), step_count: 0 }).await;
                    TurnOutcome::Completed { artifacts: vec![artifact] }
                }
                Err(e) => TurnOutcome::Failed { message: e.to_string() },
            }
        }
        Phase1Outcome::Done { text } => {
            let parts = format_text_response(&text, &prefetched);
            let artifacts = vec![Artifact {
                artifact_id: Uuid::new_v4().to_string(),
                task_id: input.task.id.clone(),
                artifact_type: None,
                name: None,
                description: None,
                parts,
                metadata: HashMap::new(),
            }];
            TurnOutcome::Completed { artifacts }
        }
        Phase1Outcome::DoneStreamed { parts } => {
            let artifacts = vec![Artifact {
                artifact_id: Uuid::new_v4().to_string(),
                task_id: input.task.id.clone(),
                artifact_type: None,
                name: None,
                description: None,
                parts,
                metadata: HashMap::new(),
            }];
            TurnOutcome::Completed { artifacts }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::testing::InMemoryStorage;
    use crate::model::{ConversationHistoryConfig, StopWhen, TaskMetadata};
    use crate::model_driver::{ClientWrapperModelProvider, TextGeneration};
    use crate::model_driver::testing::ScriptedClient;
    use crate::tool_protocol::{ToolMetadata, ToolResult};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::error::Error;

    fn base_agent() -> Agent {
        Agent {
            id: "a1".into(),
            tenant_id: "t".into(),
            project_id: "p".into(),
            graph_id: "g".into(),
            name: "A".into(),
            description: "".into(),
            agent_prompt: "You are a helpful agent.".into(),
            models: HashMap::new(),
            stop_when: StopWhen { step_count_is: 4 },
            transfer_relations: HashSet::new(),
            delegate_relations: Vec::new(),
            tools: HashSet::new(),
            data_components: Vec::new(),
            artifact_components: Vec::new(),
            conversation_history_config: ConversationHistoryConfig::None,
            context_config_id: None,
        }
    }

    fn base_graph() -> Graph {
        Graph { id: "g".into(), tenant_id: "t".into(), project_id: "p".into(), graph_prompt: None, context_config_id: None, has_artifact_components: false }
    }

    fn base_task() -> Task {
        Task {
            id: "task1".into(),
            context_id: "conv1".into(),
            input_parts: vec![Part::Text { text: "hello".into() }],
            metadata: TaskMetadata { conversation_id: "conv1".into(), ..Default::default() },
        }
    }

    fn text_message(text: &str) -> Message {
        Message { role: Role::Assistant, content: Arc::from(text), tool_calls: vec![] }
    }

    fn tool_call_message(name: &str, args: serde_json::Value) -> Message {
        Message {
            role: Role::Assistant,
            content: Arc::from(""),
            tool_calls: vec![crate::client_wrapper::NativeToolCall { id: "call_1".into(), name: name.into(), arguments: args }],
        }
    }

    struct EchoProtocol;

    #[async_trait]
    impl crate::tool_protocol::ToolProtocol for EchoProtocol {
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
    async fn plain_text_turn_completes_without_tools() {
        let client = Arc::new(ScriptedClient::new(vec![text_message("Hi there!")]));
        let model = ClientWrapperModelProvider::new(client);
        let agent = base_agent();
        let graph = base_graph();
        let task = base_task();
        let storage = InMemoryStorage::new();
        let ledger = ToolSessionLedger::new(CoreConfig::default());
        let session_id = ledger.create("t", "p", "conv1", "task1").await;
        let event_log = GraphSessionEventLog::new();
        let config = CoreConfig::default();

        let input = TurnInput { agent: &agent, graph: &graph, task: &task, history: vec![], context_vars: HashMap::new() };
        let deps = TurnDeps {
            model: &model,
            registry: ToolRegistry::new(),
            ledger: &ledger,
            event_log: &event_log,
            storage: &storage,
            a2a_transport: None,
            config: &config,
            session_id,
            streaming: false,
        };

        match run_turn(input, deps).await {
            TurnOutcome::Completed { artifacts } => {
                assert_eq!(artifacts.len(), 1);
                assert!(matches!(&artifacts[0].parts[0], Part::Text { text } if text == "Hi there!"));
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn transfer_tool_call_ends_turn_with_transfer_outcome() {
        let client = Arc::new(ScriptedClient::new(vec![tool_call_message("transfer_to_billing", serde_json::json!({"reason": "needs billing"}))]));
        let model = ClientWrapperModelProvider::new(client);
        let agent = base_agent();
        let graph = base_graph();
        let task = base_task();
        let storage = InMemoryStorage::new();
        let ledger = ToolSessionLedger::new(CoreConfig::default());
        let session_id = ledger.create("t", "p", "conv1", "task1").await;
        let event_log = GraphSessionEventLog::new();
        let config = CoreConfig::default();

        let mut registry = ToolRegistry::new();
        registry.insert(
            "transfer_to_billing",
            CallableTool::Transfer { target_agent_id: "billing".into(), description: "Transfer to billing.".into() },
        );

        let input = TurnInput { agent: &agent, graph: &graph, task: &task, history: vec![], context_vars: HashMap::new() };
        let deps =
            TurnDeps { model: &model, registry, ledger: &ledger, event_log: &event_log, storage: &storage, a2a_transport: None, config: &config, session_id, streaming: false };

        match run_turn(input, deps).await {
            TurnOutcome::Transfer { target_agent_id, reason } => {
                assert_eq!(target_agent_id, "billing");
                assert_eq!(reason.as_deref(), Some("needs billing"));
            }
            other => panic!("expected Transfer, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn remote_tool_then_thinking_complete_enters_phase2() {
        let client = Arc::new(ScriptedClient::new(vec![
            tool_call_message("search", serde_json::json!({"q": "rust"})),
            tool_call_message("thinking_complete", serde_json::json!({})),
        ]));
        let model = ClientWrapperModelProvider::new(client);
        let mut agent = base_agent();
        agent.data_components.push(crate::model::DataComponent {
            name: "Answer".into(),
            description: "the final answer".into(),
            props_schema: serde_json::json!({"text": "string"}),
        });
        let graph = base_graph();
        let task = base_task();
        let storage = InMemoryStorage::new();
        let ledger = ToolSessionLedger::new(CoreConfig::default());
        let session_id = ledger.create("t", "p", "conv1", "task1").await;
        let event_log = GraphSessionEventLog::new();
        let config = CoreConfig::default();

        let mut registry = ToolRegistry::new();
        registry.insert("search", CallableTool::Remote { metadata: ToolMetadata::new("search", "search the web"), protocol: Arc::new(EchoProtocol) });
        registry.insert("thinking_complete", CallableTool::BuiltIn { name: "thinking_complete".into() });

        // Phase 2 needs its own scripted model call; chain a second client for generate_object.
        struct TwoPhaseProvider {
            phase1: ClientWrapperModelProvider<ScriptedClient>,
        }

        #[async_trait]
        impl ModelProvider for TwoPhaseProvider {
            async fn generate_text(
                &self,
                messages: &[Message],
                tools: &[crate::client_wrapper::ToolDefinition],
                tool_choice: ToolChoice,
                stop_predicate: crate::model_driver::StopPredicate,
                max_steps: u32,
                timeout: Duration,
            ) -> Result<TextGeneration, crate::error::CoreError> {
                self.phase1.generate_text(messages, tools, tool_choice, stop_predicate, max_steps, timeout).await
            }

            async fn generate_object(
                &self,
                _messages: &[Message],
                _schema: &serde_json::Value,
                _timeout: Duration,
            ) -> Result<crate::model_driver::ObjectGeneration, crate::error::CoreError> {
                Ok(crate::model_driver::ObjectGeneration {
                    object: serde_json::json!({"text": "42"}),
                    raw_text: "{\"text\": \"42\"}".to_string(),
                })
            }
        }

        let model = TwoPhaseProvider { phase1: model };

        let input = TurnInput { agent: &agent, graph: &graph, task: &task, history: vec![], context_vars: HashMap::new() };
        let deps =
            TurnDeps { model: &model, registry, ledger: &ledger, event_log: &event_log, storage: &storage, a2a_transport: None, config: &config, session_id, streaming: false };

        match run_turn(input, deps).await {
            TurnOutcome::Completed { artifacts } => {
                assert_eq!(artifacts.len(), 1);
                assert!(matches!(&artifacts[0].parts[0], Part::Data { data } if data["text"] == "42"));
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn step_cap_without_thinking_complete_falls_through_to_done() {
        let scripted: Vec<Message> = (0..10).map(|_| tool_call_message("search", serde_json::json!({}))).collect();
        let client = Arc::new(ScriptedClient::new(scripted));
        let model = ClientWrapperModelProvider::new(client);
        let mut agent = base_agent();
        agent.stop_when = StopWhen { step_count_is: 2 };
        agent.data_components.push(crate::model::DataComponent { name: "Answer".into(), description: "".into(), props_schema: serde_json::json!({}) });
        let graph = base_graph();
        let task = base_task();
        let storage = InMemoryStorage::new();
        let ledger = ToolSessionLedger::new(CoreConfig::default());
        let session_id = ledger.create("t", "p", "conv1", "task1").await;
        let event_log = GraphSessionEventLog::new();
        let config = CoreConfig::default();

        let mut registry = ToolRegistry::new();
        registry.insert("search", CallableTool::Remote { metadata: ToolMetadata::new("search", "search the web"), protocol: Arc::new(EchoProtocol) });

        let input = TurnInput { agent: &agent, graph: &graph, task: &task, history: vec![], context_vars: HashMap::new() };
        let deps =
            TurnDeps { model: &model, registry, ledger: &ledger, event_log: &event_log, storage: &storage, a2a_transport: None, config: &config, session_id, streaming: false };

        match run_turn(input, deps).await {
            TurnOutcome::Completed { artifacts } => assert_eq!(artifacts.len(), 1),
            other => panic!("expected Completed (fell through after step cap), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_input_fails_before_calling_the_model() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let model = ClientWrapperModelProvider::new(client);
        let agent = base_agent();
        let graph = base_graph();
        let mut task = base_task();
        task.input_parts = vec![];
        let storage = InMemoryStorage::new();
        let ledger = ToolSessionLedger::new(CoreConfig::default());
        let session_id = ledger.create("t", "p", "conv1", "task1").await;
        let event_log = GraphSessionEventLog::new();
        let config = CoreConfig::default();

        let input = TurnInput { agent: &agent, graph: &graph, task: &task, history: vec![], context_vars: HashMap::new() };
        let deps = TurnDeps {
            model: &model,
            registry: ToolRegistry::new(),
            ledger: &ledger,
            event_log: &event_log,
            storage: &storage,
            a2a_transport: None,
            config: &config,
            session_id,
            streaming: false,
        };

        match run_turn(input, deps).await {
            TurnOutcome::Failed { message } => assert!(message.contains("No text content")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn streaming_turn_falls_back_to_replayed_generation_and_completes() {
        // ScriptedClient has no native streaming support, so this exercises
        // ClientWrapperModelProvider::stream_text's fallback-to-replay path
        // feeding a single text delta through the StreamParser.
        let client = Arc::new(ScriptedClient::new(vec![text_message("Hi there!")]));
        let model = ClientWrapperModelProvider::new(client);
        let agent = base_agent();
        let graph = base_graph();
        let task = base_task();
        let storage = InMemoryStorage::new();
        let ledger = ToolSessionLedger::new(CoreConfig::default());
        let session_id = ledger.create("t", "p", "conv1", "task1").await;
        let event_log = GraphSessionEventLog::new();
        let config = CoreConfig::default();

        let input = TurnInput { agent: &agent, graph: &graph, task: &task, history: vec![], context_vars: HashMap::new() };
        let deps = TurnDeps {
            model: &model,
            registry: ToolRegistry::new(),
            ledger: &ledger,
            event_log: &event_log,
            storage: &storage,
            a2a_transport: None,
            config: &config,
            session_id,
            streaming: true,
        };

        match run_turn(input, deps).await {
            TurnOutcome::Completed { artifacts } => {
                assert_eq!(artifacts.len(), 1);
                assert!(matches!(&artifacts[0].parts[0], Part::Text { text } if text == "Hi there!"));
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }
}
