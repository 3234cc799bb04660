//! A2A Client & Router (§4.11): the HTTP(S)-like RPC a `delegate_to_*`
//! tool call turns into, with bounded exponential backoff, persisted
//! request/response messages, and ledger/event-log recording at the
//! delegation boundary.
//!
//! The backoff loop is new code (no teacher precedent for retrying an
//! outbound RPC); its shape — a capped loop around `tokio::time::sleep`
//! bailing out past a wall-clock budget — mirrors the toolkit's general
//! preference for explicit, inspectable control flow over a retry crate.

use crate::collaborators::Storage;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::event_log::{GraphSessionEvent, GraphSessionEventLog};
use crate::ledger::{ToolResultRecord, ToolSessionLedger};
use crate::model::{ConversationMessage, ConversationRole, MessageContent, MessageType, Visibility};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// HTTP status codes that warrant a retry (§4.11).
const RETRYABLE_STATUS_CODES: &[u16] = &[429, 500, 502, 503, 504];

/// The outcome of one delegate-tool-call RPC attempt (§4.11).
pub enum A2AAttemptOutcome {
    Success(serde_json::Value),
    RetryableFailure(String),
    FatalFailure(String),
}

/// Transport used to actually reach a delegate agent. Implementors carry
/// whatever HTTP client / routing table is appropriate for the deployment;
/// this crate only prescribes the retry and bookkeeping wrapped around it.
#[async_trait]
pub trait A2ATransport: Send + Sync {
    async fn send(&self, target_agent_id: &str, message: &ConversationMessage) -> A2AAttemptOutcome;
}

/// Everything needed to perform one delegation (§4.11).
pub struct DelegationRequest<'a> {
    pub caller_agent_id: &'a str,
    pub target_agent_id: &'a str,
    pub target_is_external: bool,
    pub delegate_tool_call_id: &'a str,
    pub text: String,
    pub tenant_id: &'a str,
    pub project_id: &'a str,
    pub conversation_id: &'a str,
}

fn new_message(
    req: &DelegationRequest<'_>,
    message_type: MessageType,
    content: MessageContent,
    delegation_id: &str,
) -> ConversationMessage {
    ConversationMessage {
        id: Uuid::new_v4().to_string(),
        tenant_id: req.tenant_id.to_string(),
        project_id: req.project_id.to_string(),
        conversation_id: req.conversation_id.to_string(),
        role: ConversationRole::Agent,
        content,
        visibility: if req.target_is_external { Visibility::External } else { Visibility::Internal },
        message_type,
        from_agent_id: Some(req.caller_agent_id.to_string()),
        to_agent_id: Some(req.target_agent_id.to_string()),
        from_external_agent_id: None,
        to_external_agent_id: if req.target_is_external { Some(req.target_agent_id.to_string()) } else { None },
        delegation_id: Some(delegation_id.to_string()),
    }
}

/// Run the send-with-retry loop, returning the resolved content or a
/// [`CoreError::A2ATransport`] once the wall-clock retry budget is spent (§4.11).
async fn send_with_backoff(
    transport: &dyn A2ATransport,
    target_agent_id: &str,
    message: &ConversationMessage,
    config: &CoreConfig,
) -> Result<serde_json::Value, CoreError> {
    let started = Instant::now();
    let mut backoff = config.a2a_retry_initial_backoff;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        log::debug!("a2a: sending to {} (attempt {})", target_agent_id, attempt);
        match transport.send(target_agent_id, message).await {
            A2AAttemptOutcome::Success(value) => return Ok(value),
            A2AAttemptOutcome::FatalFailure(msg) => {
                log::warn!("a2a: fatal failure sending to {}: {}", target_agent_id, msg);
                return Err(CoreError::A2ATransport(msg));
            }
            A2AAttemptOutcome::RetryableFailure(msg) => {
                if started.elapsed() + backoff > config.a2a_retry_max_elapsed {
                    log::warn!(
                        "a2a: exhausted retry budget sending to {} after {:?} ({} attempts): {}",
                        target_agent_id,
                        started.elapsed(),
                        attempt,
                        msg
                    );
                    return Err(CoreError::A2ATransport(format!(
                        "exhausted retry budget after {:?}: {}",
                        started.elapsed(),
                        msg
                    )));
                }
                log::debug!(
                    "a2a: retryable failure sending to {} (attempt {}): {}; backing off {:?}",
                    target_agent_id,
                    attempt,
                    msg,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config.a2a_retry_max_backoff);
            }
        }
    }
}

/// Perform one delegation end to end: persist the request, send with
/// retry, persist the response, record into the caller's ledger, and
/// append `delegation_sent`/`delegation_returned` events (§4.11).
pub async fn delegate(
    req: DelegationRequest<'_>,
    transport: &dyn A2ATransport,
    storage: &dyn Storage,
    ledger: &ToolSessionLedger,
    caller_session_id: &str,
    event_log: &GraphSessionEventLog,
    config: &CoreConfig,
) -> Result<serde_json::Value, CoreError> {
    let delegation_id = format!("del_{}", Uuid::new_v4().simple());

    let request_message = new_message(
        &req,
        MessageType::A2aRequest,
        MessageContent { text: Some(req.text.clone()), data: None },
        &delegation_id,
    );
    storage.create_message(request_message.clone()).await?;
    event_log
        .append(GraphSessionEvent::DelegationSent {
            agent_id: req.caller_agent_id.to_string(),
            target: req.target_agent_id.to_string(),
            delegation_id: delegation_id.clone(),
        })
        .await;

    let result = send_with_backoff(transport, req.target_agent_id, &request_message, config).await?;

    let response_message = new_message(
        &req,
        MessageType::A2aResponse,
        MessageContent { text: None, data: Some(result.clone()) },
        &delegation_id,
    );
    storage.save_a2a_message_response(&delegation_id, response_message).await?;

    event_log
        .append(GraphSessionEvent::DelegationReturned {
            agent_id: req.caller_agent_id.to_string(),
            target: req.target_agent_id.to_string(),
            delegation_id: delegation_id.clone(),
        })
        .await;

    ledger
        .record(
            caller_session_id,
            ToolResultRecord {
                tool_call_id: req.delegate_tool_call_id.to_string(),
                tool_name: format!("delegate_to_{}", req.target_agent_id),
                args: serde_json::json!({ "text": req.text }),
                result: result.clone(),
                timestamp: 0,
            },
        )
        .await;

    Ok(result)
}

/// Whether an HTTP status code from a transport implementation should be retried (§4.11).
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::testing::InMemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn fast_config() -> CoreConfig {
        let mut config = CoreConfig::default();
        config.a2a_retry_initial_backoff = Duration::from_millis(1);
        config.a2a_retry_max_backoff = Duration::from_millis(4);
        config.a2a_retry_max_elapsed = Duration::from_millis(50);
        config
    }

    struct ScriptedTransport {
        failures_before_success: AtomicUsize,
        calls: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl A2ATransport for ScriptedTransport {
        async fn send(&self, target: &str, _message: &ConversationMessage) -> A2AAttemptOutcome {
            self.calls.lock().unwrap().push(target.to_string());
            if self.failures_before_success.load(Ordering::SeqCst) > 0 {
                self.failures_before_success.fetch_sub(1, Ordering::SeqCst);
                A2AAttemptOutcome::RetryableFailure("503 from peer".to_string())
            } else {
                A2AAttemptOutcome::Success(serde_json::json!({"answer": "done"}))
            }
        }
    }

    fn req<'a>(call_id: &'a str) -> DelegationRequest<'a> {
        DelegationRequest {
            caller_agent_id: "a1",
            target_agent_id: "b1",
            target_is_external: false,
            delegate_tool_call_id: call_id,
            text: "please help".to_string(),
            tenant_id: "t",
            project_id: "p",
            conversation_id: "conv1",
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_retries_and_records_into_ledger() {
        let storage = InMemoryStorage::new();
        let ledger = ToolSessionLedger::new(fast_config());
        let session_id = ledger.create("t", "p", "conv1", "task1").await;
        let event_log = GraphSessionEventLog::new();
        let transport = ScriptedTransport { failures_before_success: AtomicUsize::new(2), calls: StdMutex::new(vec![]) };

        let result = delegate(req("call_1"), &transport, &storage, &ledger, &session_id, &event_log, &fast_config())
            .await
            .unwrap();

        assert_eq!(result["answer"], "done");
        assert_eq!(transport.calls.lock().unwrap().len(), 3);
        let recorded = ledger.get(&session_id, "call_1").await.unwrap();
        assert_eq!(recorded.result["answer"], "done");
        let events = event_log.snapshot().await;
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn fatal_failure_returns_immediately_without_retrying() {
        let storage = InMemoryStorage::new();
        let ledger = ToolSessionLedger::new(fast_config());
        let session_id = ledger.create("t", "p", "conv1", "task1").await;
        let event_log = GraphSessionEventLog::new();
        struct AlwaysFatal;
        #[async_trait]
        impl A2ATransport for AlwaysFatal {
            async fn send(&self, _target: &str, _message: &ConversationMessage) -> A2AAttemptOutcome {
                A2AAttemptOutcome::FatalFailure("400 bad request".to_string())
            }
        }
        let err = delegate(req("call_1"), &AlwaysFatal, &storage, &ledger, &session_id, &event_log, &fast_config())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::A2ATransport(_)));
    }

    #[tokio::test]
    async fn persistent_retryable_failure_exhausts_budget() {
        let storage = InMemoryStorage::new();
        let ledger = ToolSessionLedger::new(fast_config());
        let session_id = ledger.create("t", "p", "conv1", "task1").await;
        let event_log = GraphSessionEventLog::new();
        let transport = ScriptedTransport { failures_before_success: AtomicUsize::new(1000), calls: StdMutex::new(vec![]) };
        let err = delegate(req("call_1"), &transport, &storage, &ledger, &session_id, &event_log, &fast_config())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::A2ATransport(_)));
    }

    #[test]
    fn retryable_status_codes_match_spec_table() {
        for code in [429, 500, 502, 503, 504] {
            assert!(is_retryable_status(code));
        }
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(404));
    }
}
