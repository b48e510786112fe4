//! Turn loop
//!
//! Drives one conversation turn through the state machine:
//!
//! 1. CheckingQueue: drain queued messages into the conversation
//! 2. StreamingLLM: call the model (bounded by `llm_timeout`)
//! 3. PostStream: completion, or tool evaluation if tools were requested
//! 4. EvaluatingTools: resolve approvals through the gate
//! 5. ExecutingTools: run permitted calls, record refusals as results
//! 6. PostToolExecution: append tool results, loop back or complete
//!
//! Any error resets the machine to Idle before it is returned.

use super::context::AgentContext;
use super::state::AgentExecutionState::{self, *};
use super::state_machine::{guards, TurnStateMachine};
use crate::approval::{ApprovalDecision, ApprovalGate, ToolExecutor};
use crate::config::AgentConfig;
use crate::conversation::{PlainResultFormatter, ResultFormatter};
use crate::events::EventBus;
use crate::queue::MessageQueue;
use async_trait::async_trait;
use futures::future::join_all;
use sdk::errors::EngineError;
use sdk::types::{Message, MessageRole, ToolCall, ToolExecutionResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default timeout for each model call
const LLM_TIMEOUT_SECS: u64 = 300;

/// Default model call limit per turn
const DEFAULT_MAX_TURNS: usize = 50;

/// Assistant output of one model call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

/// Transport to the model provider
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, conversation: &[Message]) -> Result<ModelResponse, EngineError>;
}

/// Offline model that repeats the latest user message
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoModel;

#[async_trait]
impl ModelClient for EchoModel {
    async fn complete(&self, conversation: &[Message]) -> Result<ModelResponse, EngineError> {
        let last_user = conversation
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        Ok(ModelResponse::text(format!("Echo: {}", last_user)))
    }
}

/// Turn loop limits
#[derive(Debug, Clone)]
pub struct TurnLoopConfig {
    pub max_turns: usize,
    pub chat_mode: bool,
    pub llm_timeout: Duration,
}

impl Default for TurnLoopConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            chat_mode: true,
            llm_timeout: Duration::from_secs(LLM_TIMEOUT_SECS),
        }
    }
}

impl From<&AgentConfig> for TurnLoopConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_turns: config.max_turns,
            chat_mode: config.chat_mode,
            llm_timeout: config.llm_timeout(),
        }
    }
}

/// Summary of a finished turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub request_id: String,
    pub conversation: Vec<Message>,
    /// Model calls made
    pub turns: usize,
    /// Results of every tool call, in request order
    pub tool_results: Vec<ToolExecutionResult>,
    /// Text of the final assistant message, if the turn ended on one
    pub final_answer: Option<String>,
    /// Messages queued after the last queue check, left for the next turn
    pub queued_remaining: usize,
}

/// Drives turns for one conversation session
pub struct TurnLoop {
    machine: TurnStateMachine,
    model: Arc<dyn ModelClient>,
    gate: ApprovalGate,
    executor: Arc<dyn ToolExecutor>,
    queue: Arc<MessageQueue>,
    formatter: Arc<dyn ResultFormatter>,
    config: TurnLoopConfig,
}

impl TurnLoop {
    pub fn new(
        model: Arc<dyn ModelClient>,
        gate: ApprovalGate,
        executor: Arc<dyn ToolExecutor>,
        queue: Arc<MessageQueue>,
        config: TurnLoopConfig,
    ) -> Self {
        Self {
            machine: TurnStateMachine::new(),
            model,
            gate,
            executor,
            queue,
            formatter: Arc::new(PlainResultFormatter),
            config,
        }
    }

    /// Announce state transitions on the given bus
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.machine = TurnStateMachine::with_events(events);
        self
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn ResultFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn state(&self) -> AgentExecutionState {
        self.machine.current_state()
    }

    pub fn previous_state(&self) -> AgentExecutionState {
        self.machine.previous_state()
    }

    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    /// Run one turn starting from `conversation`
    pub async fn run_turn(
        &mut self,
        conversation: Vec<Message>,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        if self.machine.current_state() != Idle {
            warn!(state = %self.machine.current_state(), "Turn loop not idle, resetting");
            self.machine.reset();
        }

        let mut ctx = AgentContext::new(
            self.gate.request_id(),
            conversation,
            self.config.max_turns,
            self.gate.policy(),
            Arc::clone(&self.queue),
        )
        .with_chat_mode(self.config.chat_mode)
        .with_cancellation(cancel);

        info!(
            request_id = %ctx.request_id,
            max_turns = ctx.max_turns,
            "Starting turn"
        );

        let mut tool_results = Vec::new();

        if let Err(e) = self.drive(&mut ctx, &mut tool_results).await {
            error!(
                request_id = %ctx.request_id,
                state = %self.machine.current_state(),
                error = %e,
                "Turn failed"
            );
            self.machine.reset();
            return Err(e);
        }

        let final_answer = ctx
            .conversation
            .last()
            .filter(|m| m.role == MessageRole::Assistant)
            .map(|m| m.content.clone());

        info!(
            request_id = %ctx.request_id,
            turns = ctx.turns,
            tool_results = tool_results.len(),
            "Turn completed"
        );

        Ok(TurnOutcome {
            request_id: ctx.request_id,
            conversation: ctx.conversation,
            turns: ctx.turns,
            tool_results,
            final_answer,
            queued_remaining: self.queue.size(),
        })
    }

    async fn drive(
        &mut self,
        ctx: &mut AgentContext,
        tool_results: &mut Vec<ToolExecutionResult>,
    ) -> Result<(), EngineError> {
        self.machine.transition(ctx, CheckingQueue)?;

        loop {
            match self.machine.current_state() {
                CheckingQueue => self.check_queue(ctx)?,
                StreamingLLM => self.stream(ctx).await?,
                PostStream => self.post_stream(ctx)?,
                EvaluatingTools => self.evaluate_tools(ctx).await?,
                ExecutingTools => self.execute_tools(ctx, tool_results).await?,
                PostToolExecution => self.post_tool_execution(ctx)?,
                Completing => {
                    self.machine.transition(ctx, Idle)?;
                    return Ok(());
                }
                Idle => return Ok(()),
            }
        }
    }

    fn check_queue(&mut self, ctx: &mut AgentContext) -> Result<(), EngineError> {
        let mut drained = 0;
        while let Some(queued) = self.queue.dequeue() {
            ctx.conversation.push(queued.message);
            drained += 1;
        }

        if drained > 0 {
            debug!(request_id = %ctx.request_id, drained, "Drained queued messages");
        }

        if guards::can_complete(ctx) {
            return self.machine.transition(ctx, Idle);
        }

        self.machine.transition(ctx, StreamingLLM)
    }

    async fn stream(&mut self, ctx: &mut AgentContext) -> Result<(), EngineError> {
        let llm_timeout = self.config.llm_timeout;

        let response = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(EngineError::TurnCancelled),
            result = timeout(llm_timeout, self.model.complete(&ctx.conversation)) => match result {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    error!("Model call failed: {}", e);
                    return Err(e);
                }
                Err(_) => {
                    error!("Model call timed out after {}s", llm_timeout.as_secs());
                    return Err(EngineError::LLMTimeout);
                }
            },
        };

        self.machine.transition(ctx, PostStream)?;

        ctx.turns += 1;
        ctx.has_tool_results = false;
        let message =
            Message::assistant(response.content).with_tool_calls(response.tool_calls.clone());
        ctx.conversation.push(message);
        ctx.set_tool_calls(response.tool_calls);

        debug!(
            request_id = %ctx.request_id,
            turn = ctx.turns,
            tool_calls = ctx.pending_tool_calls.len(),
            "Model response received"
        );

        Ok(())
    }

    fn post_stream(&mut self, ctx: &mut AgentContext) -> Result<(), EngineError> {
        if guards::has_pending_tool_calls(ctx) {
            self.machine.transition(ctx, EvaluatingTools)
        } else {
            self.machine.transition(ctx, Completing)
        }
    }

    async fn evaluate_tools(&mut self, ctx: &mut AgentContext) -> Result<(), EngineError> {
        let mut rejected = false;

        for index in 0..ctx.pending_tool_calls.len() {
            let call = ctx.pending_tool_calls[index].call.clone();

            let decision = if !self.gate.requires_approval(&call, ctx.is_chat_mode) {
                ApprovalDecision::NotRequired
            } else if rejected {
                ApprovalDecision::Skipped
            } else {
                self.gate.resolve(&call, ctx.is_chat_mode, &ctx.cancel).await?
            };

            if decision == ApprovalDecision::Rejected {
                rejected = true;
            }

            debug!(tool = %call.name, call_id = %call.id, ?decision, "Tool call evaluated");
            ctx.pending_tool_calls[index].decision = Some(decision);
        }

        self.machine.transition(ctx, ExecutingTools)
    }

    async fn execute_tools(
        &mut self,
        ctx: &mut AgentContext,
        tool_results: &mut Vec<ToolExecutionResult>,
    ) -> Result<(), EngineError> {
        let executor = Arc::clone(&self.executor);

        // Calls that needed no approval run concurrently
        let direct: Vec<usize> = ctx
            .pending_tool_calls
            .iter()
            .enumerate()
            .filter(|(_, p)| p.decision == Some(ApprovalDecision::NotRequired))
            .map(|(i, _)| i)
            .collect();

        let outcomes = join_all(direct.iter().map(|&i| {
            self.gate.dispatch(
                &ctx.pending_tool_calls[i].call,
                ApprovalDecision::NotRequired,
                &ctx.cancel,
                executor.as_ref(),
            )
        }))
        .await;

        for (index, outcome) in direct.into_iter().zip(outcomes) {
            let name = ctx.pending_tool_calls[index].call.name.clone();
            ctx.pending_tool_calls[index].result = Some(into_result(&name, outcome));
        }

        // Gated calls run one at a time, in request order
        for index in 0..ctx.pending_tool_calls.len() {
            let decision = match ctx.pending_tool_calls[index].decision {
                Some(ApprovalDecision::NotRequired) => continue,
                Some(decision) => decision,
                None => ApprovalDecision::Skipped,
            };

            let outcome = self
                .gate
                .dispatch(
                    &ctx.pending_tool_calls[index].call,
                    decision,
                    &ctx.cancel,
                    executor.as_ref(),
                )
                .await;

            let name = ctx.pending_tool_calls[index].call.name.clone();
            ctx.pending_tool_calls[index].result = Some(into_result(&name, outcome));
        }

        tool_results.extend(
            ctx.pending_tool_calls
                .iter()
                .filter_map(|p| p.result.clone()),
        );

        self.machine.transition(ctx, PostToolExecution)
    }

    fn post_tool_execution(&mut self, ctx: &mut AgentContext) -> Result<(), EngineError> {
        for pending in std::mem::take(&mut ctx.pending_tool_calls) {
            if let Some(result) = pending.result {
                let content = self.formatter.format_tool_result(&result);
                ctx.conversation
                    .push(Message::tool_result(content, pending.call.id));
            }
        }
        ctx.has_tool_results = true;

        if guards::max_turns_reached(ctx) {
            info!(
                request_id = %ctx.request_id,
                turns = ctx.turns,
                "Maximum turns reached"
            );
            self.machine.transition(ctx, Completing)
        } else {
            self.machine.transition(ctx, CheckingQueue)
        }
    }
}

fn into_result(
    tool_name: &str,
    outcome: Result<ToolExecutionResult, EngineError>,
) -> ToolExecutionResult {
    outcome.unwrap_or_else(|e| {
        warn!(tool = %tool_name, error = %e, "Tool execution failed");
        ToolExecutionResult::failure(tool_name, e.to_string())
    })
}
