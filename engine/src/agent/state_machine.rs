//! Turn state machine
//!
//! Each edge of the transition table carries an optional guard, a pure
//! predicate over `AgentContext`. A transition succeeds only when the edge
//! exists and its guard holds; otherwise the current state is left untouched.
//!
//! | From              | To                | Guard                     |
//! |-------------------|-------------------|---------------------------|
//! | Idle              | CheckingQueue     | none                      |
//! | CheckingQueue     | StreamingLLM      | conversation non-empty    |
//! | CheckingQueue     | Idle              | `can_complete`            |
//! | StreamingLLM      | PostStream        | none                      |
//! | PostStream        | EvaluatingTools   | pending tool calls        |
//! | PostStream        | Completing        | no pending tool calls     |
//! | EvaluatingTools   | ExecutingTools    | approvals resolved        |
//! | ExecutingTools    | PostToolExecution | all calls resolved        |
//! | PostToolExecution | Completing        | `max_turns_reached`       |
//! | PostToolExecution | CheckingQueue     | not `max_turns_reached`   |
//! | Completing        | Idle              | none                      |

use super::context::AgentContext;
use super::state::AgentExecutionState;
use crate::events::{Event, EventBus};
use sdk::errors::EngineError;
use sdk::types::MessageRole;
use std::sync::Arc;

use AgentExecutionState::*;

/// Guard predicate attached to an edge
pub type Guard = fn(&AgentContext) -> bool;

/// Guard predicates
pub mod guards {
    use super::*;

    pub fn conversation_non_empty(ctx: &AgentContext) -> bool {
        !ctx.conversation.is_empty()
    }

    /// The turn has nothing left to do
    ///
    /// Requires at least one model call, no unseen tool results, an empty
    /// queue, and a model-authored last message.
    pub fn can_complete(ctx: &AgentContext) -> bool {
        ctx.turns > 0
            && !ctx.has_tool_results
            && ctx.message_queue.is_empty()
            && ctx.last_role() == Some(MessageRole::Assistant)
    }

    pub fn has_pending_tool_calls(ctx: &AgentContext) -> bool {
        !ctx.pending_tool_calls.is_empty()
    }

    pub fn no_pending_tool_calls(ctx: &AgentContext) -> bool {
        ctx.pending_tool_calls.is_empty()
    }

    /// Any pending call requires approval under the active policy
    pub fn needs_approval(ctx: &AgentContext) -> bool {
        ctx.pending_tool_calls
            .iter()
            .any(|p| ctx.requires_approval(&p.call))
    }

    /// Every pending call that requires approval has a decision
    pub fn approvals_resolved(ctx: &AgentContext) -> bool {
        ctx.pending_tool_calls
            .iter()
            .all(|p| p.decision.is_some() || !ctx.requires_approval(&p.call))
    }

    /// Every pending call has a result
    pub fn all_calls_resolved(ctx: &AgentContext) -> bool {
        ctx.pending_tool_calls.iter().all(|p| p.result.is_some())
    }

    pub fn max_turns_reached(ctx: &AgentContext) -> bool {
        ctx.turns >= ctx.max_turns
    }

    pub fn below_max_turns(ctx: &AgentContext) -> bool {
        !max_turns_reached(ctx)
    }
}

#[derive(Clone, Copy)]
struct Edge {
    from: AgentExecutionState,
    to: AgentExecutionState,
    guard: Option<Guard>,
}

#[rustfmt::skip]
const EDGES: &[Edge] = &[
    Edge { from: Idle, to: CheckingQueue, guard: None },
    Edge { from: CheckingQueue, to: StreamingLLM, guard: Some(guards::conversation_non_empty) },
    Edge { from: CheckingQueue, to: Idle, guard: Some(guards::can_complete) },
    Edge { from: StreamingLLM, to: PostStream, guard: None },
    Edge { from: PostStream, to: EvaluatingTools, guard: Some(guards::has_pending_tool_calls) },
    Edge { from: PostStream, to: Completing, guard: Some(guards::no_pending_tool_calls) },
    Edge { from: EvaluatingTools, to: ExecutingTools, guard: Some(guards::approvals_resolved) },
    Edge { from: ExecutingTools, to: PostToolExecution, guard: Some(guards::all_calls_resolved) },
    Edge { from: PostToolExecution, to: Completing, guard: Some(guards::max_turns_reached) },
    Edge { from: PostToolExecution, to: CheckingQueue, guard: Some(guards::below_max_turns) },
    Edge { from: Completing, to: Idle, guard: None },
];

/// Drives one turn through the transition table
///
/// One task drives a given instance; callers serialize access.
pub struct TurnStateMachine {
    current: AgentExecutionState,
    previous: AgentExecutionState,
    events: Option<Arc<EventBus>>,
}

impl TurnStateMachine {
    pub fn new() -> Self {
        Self {
            current: Idle,
            previous: Idle,
            events: None,
        }
    }

    /// Announce transitions on the given bus
    pub fn with_events(events: Arc<EventBus>) -> Self {
        Self {
            events: Some(events),
            ..Self::new()
        }
    }

    pub fn current_state(&self) -> AgentExecutionState {
        self.current
    }

    pub fn previous_state(&self) -> AgentExecutionState {
        self.previous
    }

    fn find_edge(&self, target: AgentExecutionState) -> Option<&'static Edge> {
        EDGES
            .iter()
            .find(|e| e.from == self.current && e.to == target)
    }

    /// Move to `target`
    ///
    /// Fails with `NoSuchEdge` when the table has no such edge and with
    /// `GuardFailed` when the edge's guard is false. The state is unchanged
    /// on failure.
    pub fn transition(
        &mut self,
        ctx: &AgentContext,
        target: AgentExecutionState,
    ) -> Result<(), EngineError> {
        let edge = self.find_edge(target).ok_or_else(|| EngineError::NoSuchEdge {
            from: self.current.to_string(),
            to: target.to_string(),
        })?;

        if let Some(guard) = edge.guard {
            if !guard(ctx) {
                return Err(EngineError::GuardFailed {
                    from: self.current.to_string(),
                    to: target.to_string(),
                });
            }
        }

        self.previous = self.current;
        self.current = target;

        tracing::debug!(
            request_id = %ctx.request_id,
            from = %self.previous,
            to = %self.current,
            turn = ctx.turns,
            "State transition"
        );

        if let Some(events) = &self.events {
            // Telemetry only
            let _ = events.try_publish(Event::StateTransition {
                from: self.previous,
                to: self.current,
            });
        }

        Ok(())
    }

    /// Whether `transition(ctx, target)` would succeed
    pub fn can_transition(&self, ctx: &AgentContext, target: AgentExecutionState) -> bool {
        self.find_edge(target)
            .is_some_and(|edge| edge.guard.map_or(true, |guard| guard(ctx)))
    }

    /// States reachable from the current one under this context
    pub fn valid_transitions(&self, ctx: &AgentContext) -> Vec<AgentExecutionState> {
        EDGES
            .iter()
            .filter(|e| e.from == self.current)
            .filter(|e| e.guard.map_or(true, |guard| guard(ctx)))
            .map(|e| e.to)
            .collect()
    }

    /// Force the machine back to Idle
    pub fn reset(&mut self) {
        self.previous = self.current;
        self.current = Idle;
    }
}

impl Default for TurnStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
