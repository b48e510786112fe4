//! Approval gate
//!
//! Wraps tool execution with the approval flow. When the policy requires
//! approval the gate publishes an `ApprovalRequested` event carrying a
//! single-use responder and waits for whichever comes first:
//!
//! - a decision on the responder
//! - the gate timeout (5 minutes by default)
//! - cancellation of the caller's scope
//!
//! `Approve` and `AutoAccept` run the call with the approved marker set on the
//! execution scope. `AutoAccept` also switches the session into auto-accept
//! mode. `Reject` returns a rejected result without running the call.

use super::policy::ApprovalPolicy;
use super::{ApprovalAction, ApprovalDecision};
use crate::events::{ApprovalResponder, Event, EventBus, EventKind};
use crate::session::{AgentMode, StateManager};
use async_trait::async_trait;
use futures::future::join_all;
use sdk::errors::EngineError;
use sdk::types::{ToolCall, ToolExecutionResult};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Time to wait for an approval decision
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Execution scope handed to a tool executor
#[derive(Debug, Clone)]
pub struct ExecutionScope {
    pub request_id: String,
    /// Set when the call passed through an explicit approval
    pub approved: bool,
    pub cancel: CancellationToken,
}

/// Runs a tool call
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        scope: &ExecutionScope,
        call: &ToolCall,
    ) -> Result<ToolExecutionResult, EngineError>;
}

/// Adapts an async closure into a `ToolExecutor`
pub struct FnExecutor<F>(F);

impl<F> FnExecutor<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> ToolExecutor for FnExecutor<F>
where
    F: Fn(ExecutionScope, ToolCall) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolExecutionResult, EngineError>> + Send,
{
    async fn execute(
        &self,
        scope: &ExecutionScope,
        call: &ToolCall,
    ) -> Result<ToolExecutionResult, EngineError> {
        (self.0)(scope.clone(), call.clone()).await
    }
}

/// Error from `execute_batch`, carrying the results completed before it
#[derive(Debug, Error)]
#[error("tool execution failed after {} completed calls: {source}", .completed.len())]
pub struct BatchError {
    pub completed: Vec<ToolExecutionResult>,
    #[source]
    pub source: EngineError,
}

/// Collaborators for an `ApprovalGate`
pub struct ApprovalGateConfig {
    pub policy: Arc<dyn ApprovalPolicy>,
    pub state: Arc<dyn StateManager>,
    /// Sink for approval requests. Without one, any call that needs
    /// approval fails immediately.
    pub events: Option<Arc<EventBus>>,
    pub request_id: String,
}

/// Intercepts tool execution with the approval flow
#[derive(Clone)]
pub struct ApprovalGate {
    policy: Arc<dyn ApprovalPolicy>,
    state: Arc<dyn StateManager>,
    events: Option<Arc<EventBus>>,
    request_id: String,
    timeout: Duration,
}

impl ApprovalGate {
    pub fn new(config: ApprovalGateConfig) -> Self {
        Self {
            policy: config.policy,
            state: config.state,
            events: config.events,
            request_id: config.request_id,
            timeout: DEFAULT_APPROVAL_TIMEOUT,
        }
    }

    /// Same gate, different request
    pub fn with_request_id(&self, request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..self.clone()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn policy(&self) -> Arc<dyn ApprovalPolicy> {
        Arc::clone(&self.policy)
    }

    fn scope(&self, approved: bool, cancel: &CancellationToken) -> ExecutionScope {
        ExecutionScope {
            request_id: self.request_id.clone(),
            approved,
            cancel: cancel.clone(),
        }
    }

    /// Whether this call must wait for a decision
    ///
    /// Auto-accept mode bypasses the policy entirely.
    pub fn requires_approval(&self, call: &ToolCall, is_chat_mode: bool) -> bool {
        if self.state.agent_mode() == AgentMode::AutoAccept {
            return false;
        }
        self.policy.should_require_approval(call, is_chat_mode)
    }

    /// Publish an approval request and wait for the decision
    pub async fn request_decision(
        &self,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> Result<ApprovalAction, EngineError> {
        let events = match &self.events {
            Some(events) if events.has_subscribers(EventKind::ApprovalRequested) => events,
            _ => return Err(EngineError::ApprovalSinkMissing),
        };

        let (responder, rx) = ApprovalResponder::channel();
        let event = Event::ApprovalRequested {
            request_id: self.request_id.clone(),
            tool_call: call.clone(),
            responder,
        };

        tracing::debug!(
            request_id = %self.request_id,
            tool = %call.name,
            call_id = %call.id,
            "Requesting tool approval"
        );

        let wait_for_decision = async {
            if events.publish(event).await == 0 {
                return Err(EngineError::ApprovalSinkMissing);
            }
            // Every responder clone dropped without an answer
            rx.await.map_err(|_| EngineError::ApprovalCancelled)
        };

        let action = tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::ApprovalCancelled),
            _ = tokio::time::sleep(self.timeout) => {
                tracing::warn!(
                    request_id = %self.request_id,
                    tool = %call.name,
                    timeout_secs = self.timeout.as_secs(),
                    "Approval request timed out"
                );
                Err(EngineError::ApprovalTimeout(self.timeout.as_secs()))
            }
            result = wait_for_decision => result,
        }?;

        match action {
            ApprovalAction::AutoAccept => {
                tracing::info!(
                    request_id = %self.request_id,
                    tool = %call.name,
                    "Switching to auto-accept mode"
                );
                self.state.set_agent_mode(AgentMode::AutoAccept);
            }
            ApprovalAction::Reject => {
                tracing::info!(
                    request_id = %self.request_id,
                    tool = %call.name,
                    "Tool call rejected"
                );
            }
            ApprovalAction::Approve => {}
        }

        Ok(action)
    }

    /// Resolve the approval state of a call without running it
    ///
    /// Timeouts become `TimedOut`; cancellation and a missing sink are errors.
    pub async fn resolve(
        &self,
        call: &ToolCall,
        is_chat_mode: bool,
        cancel: &CancellationToken,
    ) -> Result<ApprovalDecision, EngineError> {
        if !self.requires_approval(call, is_chat_mode) {
            return Ok(ApprovalDecision::NotRequired);
        }

        match self.request_decision(call, cancel).await {
            Ok(ApprovalAction::Approve | ApprovalAction::AutoAccept) => {
                Ok(ApprovalDecision::Approved)
            }
            Ok(ApprovalAction::Reject) => Ok(ApprovalDecision::Rejected),
            Err(EngineError::ApprovalTimeout(_)) => Ok(ApprovalDecision::TimedOut),
            Err(e) => Err(e),
        }
    }

    /// Run (or refuse) a call according to an already resolved decision
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        decision: ApprovalDecision,
        cancel: &CancellationToken,
        next: &dyn ToolExecutor,
    ) -> Result<ToolExecutionResult, EngineError> {
        match decision {
            ApprovalDecision::NotRequired => {
                run_timed(next, &self.scope(false, cancel), call).await
            }
            ApprovalDecision::Approved => run_timed(next, &self.scope(true, cancel), call).await,
            ApprovalDecision::Rejected => Ok(rejected_result(call)),
            ApprovalDecision::TimedOut => Ok(timed_out_result(call, self.timeout)),
            ApprovalDecision::Skipped => Ok(ToolExecutionResult::failure(
                &call.name,
                "Tool execution skipped because an earlier tool call was rejected",
            )
            .with_arguments(arguments_value(call))),
        }
    }

    /// Run a single call through the approval flow
    ///
    /// An approval timeout is returned as `ApprovalTimeout`.
    pub async fn execute(
        &self,
        call: &ToolCall,
        is_chat_mode: bool,
        cancel: &CancellationToken,
        next: &dyn ToolExecutor,
    ) -> Result<ToolExecutionResult, EngineError> {
        if !self.requires_approval(call, is_chat_mode) {
            return run_timed(next, &self.scope(false, cancel), call).await;
        }

        match self.request_decision(call, cancel).await? {
            ApprovalAction::Reject => Ok(rejected_result(call)),
            ApprovalAction::Approve | ApprovalAction::AutoAccept => {
                run_timed(next, &self.scope(true, cancel), call).await
            }
        }
    }

    /// Run several calls
    ///
    /// Calls that need no approval run first, concurrently. Calls that need
    /// approval then run one at a time in their original order, and the
    /// batch stops at the first rejection. A timed out approval is recorded
    /// as a failed result and the batch continues.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        is_chat_mode: bool,
        cancel: &CancellationToken,
        executor: &dyn ToolExecutor,
    ) -> Result<Vec<ToolExecutionResult>, BatchError> {
        let (gated, direct): (Vec<&ToolCall>, Vec<&ToolCall>) = calls
            .iter()
            .partition(|call| self.requires_approval(call, is_chat_mode));

        let mut results = Vec::with_capacity(calls.len());

        let scope = self.scope(false, cancel);
        let outcomes = join_all(direct.iter().map(|call| run_timed(executor, &scope, call))).await;
        for outcome in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(source) => {
                    return Err(BatchError {
                        completed: results,
                        source,
                    })
                }
            }
        }

        for call in gated {
            match self.execute(call, is_chat_mode, cancel, executor).await {
                Ok(result) => {
                    let rejected = result.rejected;
                    results.push(result);
                    if rejected {
                        tracing::info!(
                            request_id = %self.request_id,
                            tool = %call.name,
                            "Tool execution rejected, stopping batch execution"
                        );
                        break;
                    }
                }
                Err(EngineError::ApprovalTimeout(_)) => {
                    results.push(timed_out_result(call, self.timeout));
                }
                Err(source) => {
                    return Err(BatchError {
                        completed: results,
                        source,
                    })
                }
            }
        }

        Ok(results)
    }
}

async fn run_timed(
    next: &dyn ToolExecutor,
    scope: &ExecutionScope,
    call: &ToolCall,
) -> Result<ToolExecutionResult, EngineError> {
    let started = Instant::now();
    let result = next.execute(scope, call).await?;
    if result.duration_ms == 0 {
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        return Ok(result.with_duration_ms(elapsed));
    }
    Ok(result)
}

fn arguments_value(call: &ToolCall) -> serde_json::Value {
    call.parsed_arguments()
        .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone()))
}

fn rejected_result(call: &ToolCall) -> ToolExecutionResult {
    ToolExecutionResult::rejected(&call.name).with_arguments(arguments_value(call))
}

fn timed_out_result(call: &ToolCall, timeout: Duration) -> ToolExecutionResult {
    ToolExecutionResult::failure(
        &call.name,
        format!("Approval request timed out after {:?}", timeout),
    )
    .with_arguments(arguments_value(call))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{PermissiveApprovalPolicy, StrictApprovalPolicy};
    use crate::session::SessionState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolExecutor for CountingExecutor {
        async fn execute(
            &self,
            scope: &ExecutionScope,
            call: &ToolCall,
        ) -> Result<ToolExecutionResult, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolExecutionResult::success(
                &call.name,
                serde_json::json!({ "approved": scope.approved }),
            ))
        }
    }

    fn gate(policy: Arc<dyn ApprovalPolicy>, events: Option<Arc<EventBus>>) -> ApprovalGate {
        ApprovalGate::new(ApprovalGateConfig {
            policy,
            state: Arc::new(SessionState::new()),
            events,
            request_id: "req-1".to_string(),
        })
    }

    #[tokio::test]
    async fn test_not_required_runs_without_marker() {
        let gate = gate(Arc::new(PermissiveApprovalPolicy), None);
        let executor = CountingExecutor {
            calls: AtomicUsize::new(0),
        };

        let result = gate
            .execute(
                &ToolCall::new("1", "Read", "{}"),
                true,
                &CancellationToken::new(),
                &executor,
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.data.unwrap()["approved"], false);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_sink_fails_immediately() {
        let gate = gate(Arc::new(StrictApprovalPolicy), None);
        let err = gate
            .request_decision(&ToolCall::new("1", "Write", "{}"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ApprovalSinkMissing));
    }

    #[tokio::test]
    async fn test_bus_without_subscribers_counts_as_missing_sink() {
        let gate = gate(Arc::new(StrictApprovalPolicy), Some(Arc::new(EventBus::new())));
        let err = gate
            .request_decision(&ToolCall::new("1", "Write", "{}"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ApprovalSinkMissing));
    }

    #[tokio::test]
    async fn test_approved_call_carries_marker() {
        let events = Arc::new(EventBus::new());
        let mut rx = events.subscribe(EventKind::ApprovalRequested);
        let gate = gate(Arc::new(StrictApprovalPolicy), Some(Arc::clone(&events)));
        let executor = CountingExecutor {
            calls: AtomicUsize::new(0),
        };

        tokio::spawn(async move {
            if let Some(Event::ApprovalRequested { responder, .. }) = rx.recv().await {
                responder.respond(ApprovalAction::Approve);
            }
        });

        let result = gate
            .execute(
                &ToolCall::new("1", "Write", "{}"),
                true,
                &CancellationToken::new(),
                &executor,
            )
            .await
            .unwrap();

        assert_eq!(result.data.unwrap()["approved"], true);
    }

    #[tokio::test]
    async fn test_dropped_responder_is_cancellation() {
        let events = Arc::new(EventBus::new());
        let mut rx = events.subscribe(EventKind::ApprovalRequested);
        let gate = gate(Arc::new(StrictApprovalPolicy), Some(Arc::clone(&events)));

        tokio::spawn(async move {
            let event = rx.recv().await;
            drop(event);
            drop(rx);
        });

        let err = gate
            .request_decision(&ToolCall::new("1", "Write", "{}"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ApprovalCancelled));
    }

    #[tokio::test]
    async fn test_resolve_maps_timeout() {
        let events = Arc::new(EventBus::new());
        let _rx = events.subscribe(EventKind::ApprovalRequested);
        let gate = gate(Arc::new(StrictApprovalPolicy), Some(Arc::clone(&events)))
            .with_timeout(Duration::from_millis(20));

        let decision = gate
            .resolve(&ToolCall::new("1", "Write", "{}"), true, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(decision, ApprovalDecision::TimedOut);
    }

    #[tokio::test]
    async fn test_dispatch_refused_decisions_never_execute() {
        let gate =
            gate(Arc::new(StrictApprovalPolicy), None).with_timeout(Duration::from_millis(250));
        let executor = CountingExecutor {
            calls: AtomicUsize::new(0),
        };
        let call = ToolCall::new("1", "Write", r#"{"path": "a.txt"}"#);
        let cancel = CancellationToken::new();

        let rejected = gate
            .dispatch(&call, ApprovalDecision::Rejected, &cancel, &executor)
            .await
            .unwrap();
        assert!(rejected.rejected);
        assert_eq!(rejected.arguments["path"], "a.txt");

        let timed_out = gate
            .dispatch(&call, ApprovalDecision::TimedOut, &cancel, &executor)
            .await
            .unwrap();
        assert!(!timed_out.success);
        assert!(!timed_out.rejected);
        assert_eq!(
            timed_out.error.as_deref(),
            Some("Approval request timed out after 250ms")
        );

        let skipped = gate
            .dispatch(&call, ApprovalDecision::Skipped, &cancel, &executor)
            .await
            .unwrap();
        assert!(!skipped.success);

        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_with_request_id_keeps_timeout() {
        let original =
            gate(Arc::new(StrictApprovalPolicy), None).with_timeout(Duration::from_secs(7));
        let derived = original.with_request_id("req-2");
        assert_eq!(derived.request_id(), "req-2");
        assert_eq!(derived.timeout(), Duration::from_secs(7));
        assert_eq!(original.request_id(), "req-1");
    }
}
