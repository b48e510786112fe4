use proptest::prelude::*;
use std::sync::Arc;

use sdk::types::Message;
use steward_engine::agent::{guards, AgentContext};
use steward_engine::approval::PermissiveApprovalPolicy;
use steward_engine::config::Config;
use steward_engine::queue::MessageQueue;

fn context(turns: usize, max_turns: usize, queue: Arc<MessageQueue>) -> AgentContext {
    let mut ctx = AgentContext::new(
        "req-prop",
        vec![Message::user("hi"), Message::assistant("hello")],
        max_turns,
        Arc::new(PermissiveApprovalPolicy),
        queue,
    );
    ctx.turns = turns;
    ctx
}

// The queue hands messages back in the order they were enqueued
proptest! {
    #[test]
    fn test_queue_preserves_fifo_order(contents in prop::collection::vec("[a-z ]{0,24}", 0..40)) {
        let queue = MessageQueue::new();
        for content in &contents {
            queue.enqueue(Message::user(content.clone()), "req-prop");
        }
        prop_assert_eq!(queue.size(), contents.len());

        let mut drained = Vec::new();
        while let Some(queued) = queue.dequeue() {
            drained.push(queued.message.content);
        }

        prop_assert_eq!(drained, contents);
        prop_assert!(queue.is_empty());
    }
}

// Once the turn limit is reached, it stays reached
proptest! {
    #[test]
    fn test_max_turns_reached_is_monotonic(max_turns in 1usize..100, turns in 0usize..200) {
        let queue = Arc::new(MessageQueue::new());
        let ctx = context(turns, max_turns, Arc::clone(&queue));
        let next = context(turns + 1, max_turns, queue);

        if guards::max_turns_reached(&ctx) {
            prop_assert!(guards::max_turns_reached(&next));
        }
        prop_assert_ne!(guards::max_turns_reached(&ctx), guards::below_max_turns(&ctx));
    }
}

// A turn that never called the model cannot complete
proptest! {
    #[test]
    fn test_cannot_complete_without_model_call(max_turns in 1usize..100, has_tool_results: bool) {
        let mut ctx = context(0, max_turns, Arc::new(MessageQueue::new()));
        ctx.has_tool_results = has_tool_results;
        prop_assert!(!guards::can_complete(&ctx));
    }
}

// Pending queue messages block completion
proptest! {
    #[test]
    fn test_queued_messages_block_completion(turns in 1usize..50, queued in 0usize..5) {
        let queue = Arc::new(MessageQueue::new());
        for i in 0..queued {
            queue.enqueue(Message::user(format!("queued {}", i)), "req-prop");
        }
        let ctx = context(turns, 100, queue);
        prop_assert_eq!(guards::can_complete(&ctx), queued == 0);
    }
}

// Any positive limits produce a valid configuration
proptest! {
    #[test]
    fn test_positive_limits_validate(
        log_level in "error|warn|info|debug|trace",
        max_turns in 1usize..500,
        approval_timeout in 1u64..3600,
        tick_ms in 1u64..10_000,
    ) {
        let toml = format!(
            "[core]\nlog_level = \"{}\"\n\n\
             [agent]\nmax_turns = {}\n\n\
             [approval]\ntimeout_secs = {}\n\n\
             [monitor]\ntick_interval_ms = {}\n",
            log_level, max_turns, approval_timeout, tick_ms
        );

        let config = Config::from_toml(&toml).unwrap();
        prop_assert_eq!(config.agent.max_turns, max_turns);
        prop_assert_eq!(config.approval.timeout_secs, approval_timeout);
        prop_assert_eq!(config.monitor.tick_interval_ms, tick_ms);
    }
}
