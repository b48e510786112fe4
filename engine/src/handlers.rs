//! Command handlers for CLI operations
//!
//! - run: drive one turn with the offline echo model
//! - config: print the effective configuration

use anyhow::{Context, Result};
use serde_json::json;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{EchoModel, TurnLoop, TurnLoopConfig, TurnOutcome};
use crate::approval::{
    ApprovalAction, ApprovalGate, ApprovalGateConfig, ExecutionScope, FnExecutor,
    StandardApprovalPolicy,
};
use crate::config::Config;
use crate::events::{Event, EventBus, EventKind};
use crate::monitor::{BackgroundTaskMonitor, InMemoryTaskTracker};
use crate::queue::MessageQueue;
use crate::session::SessionState;
use sdk::errors::EngineError;
use sdk::types::{Message, ToolCall};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Map an answer typed at the approval prompt to an action
///
/// Anything unrecognised counts as a rejection.
pub fn parse_approval_answer(answer: &str) -> ApprovalAction {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ApprovalAction::Approve,
        "a" | "always" => ApprovalAction::AutoAccept,
        _ => ApprovalAction::Reject,
    }
}

fn prompt_for_approval(call: &ToolCall) -> ApprovalAction {
    let mut stderr = std::io::stderr();
    let _ = write!(
        stderr,
        "Allow tool '{}' with arguments {}? [y]es / [n]o / [a]lways: ",
        call.name, call.arguments
    );
    let _ = stderr.flush();

    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => ApprovalAction::Reject,
        Ok(_) => parse_approval_answer(&line),
    }
}

/// Answer approval requests on stdin until the bus subscription closes
async fn answer_approvals(mut requests: mpsc::Receiver<Event>) {
    while let Some(event) = requests.recv().await {
        let Event::ApprovalRequested {
            tool_call,
            responder,
            ..
        } = event
        else {
            continue;
        };

        let action = tokio::task::spawn_blocking(move || prompt_for_approval(&tool_call))
            .await
            .unwrap_or(ApprovalAction::Reject);

        if !responder.respond(action) {
            tracing::debug!("Approval answered after the request was abandoned");
        }
    }
}

/// Run one turn
pub async fn handle_run(prompt: String, config: &Config, format: OutputFormat) -> Result<()> {
    let request_id = Uuid::new_v4().to_string();

    let events = Arc::new(EventBus::with_buffer(config.monitor.event_buffer));
    let state = Arc::new(SessionState::with_events(Arc::clone(&events)));
    let queue = Arc::new(MessageQueue::new());

    let policy = StandardApprovalPolicy::new(&config.approval, state.clone())
        .context("Failed to build approval policy")?;

    let gate = ApprovalGate::new(ApprovalGateConfig {
        policy: Arc::new(policy),
        state,
        events: Some(Arc::clone(&events)),
        request_id: request_id.clone(),
    })
    .with_timeout(config.approval.timeout());

    let approvals = tokio::spawn(answer_approvals(
        events.subscribe(EventKind::ApprovalRequested),
    ));

    let tracker = Arc::new(InMemoryTaskTracker::new());
    let monitor = Arc::new(
        BackgroundTaskMonitor::new(tracker, Arc::clone(&events), Arc::clone(&queue), &request_id)
            .with_tick_interval(config.monitor.tick_interval()),
    );

    let cancel = CancellationToken::new();
    let monitor_task = {
        let monitor = Arc::clone(&monitor);
        let scope = cancel.child_token();
        tokio::spawn(async move { monitor.start(scope).await })
    };

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, cancelling turn");
                cancel.cancel();
            }
        })
    };

    // No tools are registered for the offline model
    let executor = FnExecutor::new(|_scope: ExecutionScope, call: ToolCall| async move {
        Err::<sdk::types::ToolExecutionResult, _>(EngineError::ToolNotFound(call.name))
    });

    let mut turn_loop = TurnLoop::new(
        Arc::new(EchoModel),
        gate,
        Arc::new(executor),
        Arc::clone(&queue),
        TurnLoopConfig::from(&config.agent),
    )
    .with_events(Arc::clone(&events));

    let outcome = turn_loop
        .run_turn(vec![Message::user(prompt)], cancel.clone())
        .await;

    monitor.stop();
    cancel.cancel();
    monitor_task.await.ok();
    interrupt.abort();
    approvals.abort();

    let outcome = outcome.context("Turn failed")?;
    print_outcome(&outcome, format)
}

fn print_outcome(outcome: &TurnOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if let Some(answer) = &outcome.final_answer {
                println!("{}", answer);
            }
            for result in &outcome.tool_results {
                if result.rejected {
                    println!("[{}] rejected", result.tool_name);
                } else if let Some(error) = &result.error {
                    println!("[{}] failed: {}", result.tool_name, error);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "request_id": outcome.request_id,
                "turns": outcome.turns,
                "answer": outcome.final_answer,
                "tool_results": outcome.tool_results,
                "queued_remaining": outcome.queued_remaining,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&output).context("Failed to serialize output")?
            );
        }
    }
    Ok(())
}

/// Print the effective configuration
pub fn handle_config(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            print!("{}", config.to_toml().context("Failed to render configuration")?);
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(config).context("Failed to serialize configuration")?
            );
        }
    }
    Ok(())
}
