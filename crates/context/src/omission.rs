//! Whole-message omission, the escalation past truncation.
//!
//! Drops entire messages oldest-first until the estimate fits the budget or
//! the floor is reached. Strictly reducing and never errors; the caller
//! accepts the best effort without re-checking.

use tl_domain::message::{LlmMessage, Role};
use tl_domain::trace::TraceEvent;

use crate::compress::{last_user_index, strip_meta_arguments, ContextCompressor};
use crate::tokens::TokenAccountant;

// Hard stop against pathological inputs.
const OMISSION_SAFETY_LIMIT: u32 = 500;

impl ContextCompressor {
    /// Drop whole messages oldest-first, in batches, until the estimate is
    /// within `max_tokens` or no more messages can be safely removed. The
    /// leading system message and the most recent user turn are never
    /// dropped.
    pub fn compress_by_omission(
        &self,
        accountant: &dyn TokenAccountant,
        mut messages: Vec<LlmMessage>,
        model: &str,
        max_tokens: u64,
    ) -> Vec<LlmMessage> {
        strip_meta_arguments(&mut messages);

        let before_tokens = accountant.count(model, &messages);
        let before_len = messages.len();
        if before_tokens <= max_tokens {
            return messages;
        }

        let batch = self.config().omission_batch_size.max(1);
        let floor = self.config().omission_min_messages;

        let mut guard = OMISSION_SAFETY_LIMIT;
        while accountant.count(model, &messages) > max_tokens && guard > 0 {
            guard -= 1;
            if messages.len() <= floor {
                tracing::warn!(
                    remaining = messages.len(),
                    floor,
                    "omission floor reached, returning best effort"
                );
                break;
            }
            let removed = remove_oldest_batch(&mut messages, batch, floor);
            if removed == 0 {
                break;
            }
        }

        TraceEvent::CompressionApplied {
            stage: "omission".into(),
            tokens_before: before_tokens,
            tokens_after: accountant.count(model, &messages),
            messages_before: before_len,
            messages_after: messages.len(),
        }
        .emit();
        messages
    }
}

/// Remove up to `batch` droppable messages from the front, stopping at the
/// floor. Returns how many were removed.
fn remove_oldest_batch(messages: &mut Vec<LlmMessage>, batch: usize, floor: usize) -> usize {
    let mut removed = 0;
    while removed < batch && messages.len() > floor {
        let pinned_user = last_user_index(messages);
        let candidate = messages.iter().position(|m| m.role != Role::System).filter(
            |idx| Some(*idx) != pinned_user,
        );
        match candidate {
            Some(idx) => {
                messages.remove(idx);
                removed += 1;
            }
            None => break,
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::EstimatingAccountant;
    use tl_domain::config::CompressionConfig;
    use tl_domain::message::MessageContent;

    fn msg(role: Role, chars: usize, id: &str) -> LlmMessage {
        LlmMessage {
            role,
            content: MessageContent::Text("y".repeat(chars)),
            message_id: Some(id.to_string()),
        }
    }

    #[test]
    fn drops_oldest_first_and_keeps_pinned() {
        let acc = EstimatingAccountant::default();
        let c = ContextCompressor::new(CompressionConfig {
            omission_min_messages: 2,
            ..CompressionConfig::default()
        });
        let mut messages = vec![LlmMessage::system("sys")];
        for i in 0..50 {
            messages.push(msg(Role::Assistant, 8_000, &format!("a{i}")));
        }
        messages.push(LlmMessage::user("latest"));

        let out = c.compress_by_omission(&acc, messages, "claude-sonnet-4", 10_000);
        assert_eq!(out[0].text(), Some("sys"));
        assert_eq!(out.last().unwrap().text(), Some("latest"));
        // Survivors are the newest assistant messages.
        if out.len() > 2 {
            assert_ne!(out[1].message_id.as_deref(), Some("a0"));
        }
    }

    #[test]
    fn under_budget_returns_unchanged_length() {
        let acc = EstimatingAccountant::default();
        let c = ContextCompressor::new(CompressionConfig::default());
        let messages = vec![LlmMessage::system("sys"), LlmMessage::user("hi")];
        let out = c.compress_by_omission(&acc, messages, "claude-sonnet-4", 100_000);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn stops_at_floor_with_best_effort() {
        let acc = EstimatingAccountant::default();
        let c = ContextCompressor::new(CompressionConfig {
            omission_min_messages: 10,
            ..CompressionConfig::default()
        });
        let messages: Vec<_> = (0..12)
            .map(|i| msg(Role::Assistant, 100_000, &format!("a{i}")))
            .collect();
        let before = acc.count("claude-sonnet-4", &messages);
        let out = c.compress_by_omission(&acc, messages, "claude-sonnet-4", 1_000);
        // Could not meet budget, but strictly reduced and respected floor.
        assert_eq!(out.len(), 10);
        assert!(acc.count("claude-sonnet-4", &out) < before);
    }
}
