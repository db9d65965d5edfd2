//! Deterministic tiered context compression.
//!
//! When a prepared request exceeds its token budget, content is reduced in
//! escalating tiers: tool results first, then user messages, then assistant
//! messages, oldest first within each tier. The leading system message and
//! the most recent user turn are never touched. Truncation is deterministic
//! (same input, same output) so prompt caching keeps hitting on the
//! compressed prefix across turns.

use tl_domain::config::CompressionConfig;
use tl_domain::message::{ContentPart, LlmMessage, MessageContent, Role};
use tl_domain::trace::TraceEvent;

use crate::tokens::TokenAccountant;

const COMPRESS_PASSES: u32 = 5;

#[derive(Debug, Clone)]
pub struct ContextCompressor {
    config: CompressionConfig,
}

impl ContextCompressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Primary strategy: truncate old message content until the estimate
    /// fits `max_tokens`. Best effort; the caller escalates to
    /// [`compress_by_omission`](Self::compress_by_omission) if the result is
    /// still over budget.
    pub fn compress(
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
            return self.middle_out(messages);
        }

        let mut threshold = self.config.per_message_token_threshold;
        for _ in 0..COMPRESS_PASSES {
            self.truncate_tier(accountant, &mut messages, model, Tier::ToolResult, threshold);
            if accountant.count(model, &messages) <= max_tokens {
                break;
            }
            self.truncate_tier(accountant, &mut messages, model, Tier::User, threshold);
            if accountant.count(model, &messages) <= max_tokens {
                break;
            }
            self.truncate_tier(accountant, &mut messages, model, Tier::Assistant, threshold);
            if accountant.count(model, &messages) <= max_tokens {
                break;
            }
            // Tighten the bar each pass so smaller messages become
            // candidates too.
            threshold = (threshold / 2).max(1);
        }

        let messages = self.middle_out(messages);
        TraceEvent::CompressionApplied {
            stage: "truncation".into(),
            tokens_before: before_tokens,
            tokens_after: accountant.count(model, &messages),
            messages_before: before_len,
            messages_after: messages.len(),
        }
        .emit();
        messages
    }

    /// One tier of truncation. Walks newest to oldest; within the tier the
    /// most recent N qualifying messages only get the middle-out cap, older
    /// ones are head-truncated hard.
    fn truncate_tier(
        &self,
        accountant: &dyn TokenAccountant,
        messages: &mut [LlmMessage],
        model: &str,
        tier: Tier,
        token_threshold: u64,
    ) {
        let keep_recent = match tier {
            Tier::ToolResult => self.config.keep_recent_tool_results,
            Tier::User => self.config.keep_recent_user_messages,
            Tier::Assistant => self.config.keep_recent_assistant_messages,
        };
        let pinned_user = last_user_index(messages);

        let mut seen = 0usize;
        for (idx, msg) in messages.iter_mut().enumerate().rev() {
            if idx == 0 && msg.role == Role::System {
                continue;
            }
            if Some(idx) == pinned_user {
                continue;
            }
            if !tier.matches(msg) {
                continue;
            }
            seen += 1;
            if accountant.count_message(model, msg) <= token_threshold {
                continue;
            }
            if seen > keep_recent {
                head_truncate(msg, self.config.head_truncate_chars);
            } else {
                middle_truncate(msg, self.config.recent_truncate_chars);
            }
        }
    }

    /// Cap the total message count by dropping from the middle, keeping the
    /// head and tail halves.
    pub fn middle_out(&self, messages: Vec<LlmMessage>) -> Vec<LlmMessage> {
        let max = self.config.middle_out_max_messages;
        if max == 0 || messages.len() <= max {
            return messages;
        }
        let keep_start = max / 2;
        let keep_end = max - keep_start;
        let tail_from = messages.len() - keep_end;
        let mut result = Vec::with_capacity(max);
        for (idx, msg) in messages.into_iter().enumerate() {
            if idx < keep_start || idx >= tail_from {
                result.push(msg);
            }
        }
        result
    }
}

// ── tier selection ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    ToolResult,
    User,
    Assistant,
}

impl Tier {
    fn matches(self, msg: &LlmMessage) -> bool {
        match self {
            Tier::ToolResult => is_tool_result(msg),
            Tier::User => msg.role == Role::User && !is_tool_result(msg),
            Tier::Assistant => msg.role == Role::Assistant,
        }
    }
}

fn is_tool_result(msg: &LlmMessage) -> bool {
    if msg.role == Role::Tool {
        return true;
    }
    match &msg.content {
        MessageContent::Text(t) => t.contains("\"tool_execution\"") || t.contains("ToolResult"),
        MessageContent::Parts(parts) => parts
            .iter()
            .any(|p| matches!(p, ContentPart::ToolResult { .. })),
    }
}

/// Index of the most recent user message, if any. That turn is pinned.
pub(crate) fn last_user_index(messages: &[LlmMessage]) -> Option<usize> {
    messages.iter().rposition(|m| m.role == Role::User)
}

// ── meta-payload stripping ──

/// Tool-execution payloads echo the full call arguments; drop them before
/// anything is counted, they are reproducible from the assistant message.
pub(crate) fn strip_meta_arguments(messages: &mut [LlmMessage]) {
    for msg in messages.iter_mut() {
        let MessageContent::Text(text) = &msg.content else {
            continue;
        };
        let Ok(mut value) = serde_json::from_str::<serde_json::Value>(text) else {
            continue;
        };
        let Some(exec) = value.get_mut("tool_execution").and_then(|v| v.as_object_mut()) else {
            continue;
        };
        if exec.remove("arguments").is_some() {
            if let Ok(stripped) = serde_json::to_string(&value) {
                msg.content = MessageContent::Text(stripped);
            }
        }
    }
}

// ── truncation primitives ──

fn floor_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn flatten_chars(content: &MessageContent) -> Option<String> {
    match content {
        MessageContent::Text(t) => Some(t.clone()),
        MessageContent::Parts(_) => serde_json::to_string(content).ok(),
    }
}

/// Hard truncation for old messages: keep the head, drop the rest.
fn head_truncate(msg: &mut LlmMessage, max_chars: usize) {
    let Some(text) = flatten_chars(&msg.content) else {
        return;
    };
    if text.len() <= max_chars {
        return;
    }
    let boundary = floor_boundary(&text, max_chars);
    let mut result = text[..boundary].to_string();
    result.push_str("... (truncated)");
    if let Some(id) = &msg.message_id {
        result.push_str(&format!(
            "\n\nmessage_id \"{id}\"\nUse the expand-message tool to see the full content"
        ));
    }
    msg.content = MessageContent::Text(result);
}

/// Soft truncation for recent-but-huge messages: keep both ends, drop the
/// middle.
fn middle_truncate(msg: &mut LlmMessage, max_chars: usize) {
    let Some(text) = flatten_chars(&msg.content) else {
        return;
    };
    if text.len() <= max_chars {
        return;
    }
    // Reserve space for the marker text.
    let keep = max_chars.saturating_sub(150);
    let start_len = keep / 2;
    let end_len = keep - start_len;
    let head_end = floor_boundary(&text, start_len);
    let tail_start = ceil_boundary(&text, text.len() - end_len);
    msg.content = MessageContent::Text(format!(
        "{}\n\n... (middle truncated) ...\n\n{}",
        &text[..head_end],
        &text[tail_start..]
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::EstimatingAccountant;

    fn big(role: Role, chars: usize, id: &str) -> LlmMessage {
        LlmMessage {
            role,
            content: MessageContent::Text("x".repeat(chars)),
            message_id: Some(id.to_string()),
        }
    }

    fn compressor() -> ContextCompressor {
        ContextCompressor::new(CompressionConfig::default())
    }

    #[test]
    fn under_budget_is_untouched() {
        let acc = EstimatingAccountant::default();
        let messages = vec![LlmMessage::system("sys"), LlmMessage::user("hello")];
        let out = compressor().compress(&acc, messages.clone(), "claude-sonnet-4", 100_000);
        assert_eq!(out, messages);
    }

    #[test]
    fn system_and_last_user_survive_intact() {
        let acc = EstimatingAccountant::default();
        let mut messages = vec![LlmMessage::system("the system prompt")];
        for i in 0..40 {
            messages.push(big(Role::User, 50_000, &format!("u{i}")));
            messages.push(big(Role::Assistant, 50_000, &format!("a{i}")));
        }
        messages.push(LlmMessage::user("final question"));

        let out = compressor().compress(&acc, messages, "claude-sonnet-4", 50_000);
        assert_eq!(out.first().unwrap().text(), Some("the system prompt"));
        assert_eq!(out.last().unwrap().text(), Some("final question"));
    }

    #[test]
    fn reduces_token_estimate() {
        let acc = EstimatingAccountant::default();
        let mut messages = vec![LlmMessage::system("sys")];
        for i in 0..30 {
            messages.push(big(Role::User, 80_000, &format!("u{i}")));
            messages.push(big(Role::Assistant, 80_000, &format!("a{i}")));
        }
        let before = acc.count("claude-sonnet-4", &messages);
        let out = compressor().compress(&acc, messages, "claude-sonnet-4", 100_000);
        let after = acc.count("claude-sonnet-4", &out);
        assert!(after < before);
    }

    #[test]
    fn old_messages_are_head_truncated_with_expand_hint() {
        let acc = EstimatingAccountant::default();
        let mut messages = vec![LlmMessage::system("sys")];
        for i in 0..25 {
            messages.push(big(Role::User, 40_000, &format!("u{i}")));
        }
        let out = compressor().compress(&acc, messages, "claude-sonnet-4", 20_000);
        let oldest = out[1].text().unwrap();
        assert!(oldest.contains("(truncated)"));
        assert!(oldest.contains("message_id \"u0\""));
    }

    #[test]
    fn middle_out_caps_message_count() {
        let c = ContextCompressor::new(CompressionConfig {
            middle_out_max_messages: 6,
            ..CompressionConfig::default()
        });
        let messages: Vec<_> = (0..10)
            .map(|i| big(Role::User, 10, &format!("m{i}")))
            .collect();
        let out = c.middle_out(messages);
        assert_eq!(out.len(), 6);
        assert_eq!(out[0].message_id.as_deref(), Some("m0"));
        assert_eq!(out[5].message_id.as_deref(), Some("m9"));
        assert_eq!(out[2].message_id.as_deref(), Some("m2"));
        assert_eq!(out[3].message_id.as_deref(), Some("m7"));
    }

    #[test]
    fn meta_arguments_are_stripped() {
        let mut messages = vec![LlmMessage {
            role: Role::Tool,
            content: MessageContent::Text(
                r#"{"tool_execution":{"name":"grep","arguments":{"pattern":"x"},"result":"ok"}}"#
                    .into(),
            ),
            message_id: None,
        }];
        strip_meta_arguments(&mut messages);
        let text = messages[0].text().unwrap();
        assert!(!text.contains("arguments"));
        assert!(text.contains("result"));
    }

    #[test]
    fn compression_is_deterministic() {
        let acc = EstimatingAccountant::default();
        let mut messages = vec![LlmMessage::system("sys")];
        for i in 0..30 {
            messages.push(big(Role::User, 60_000, &format!("u{i}")));
        }
        let a = compressor().compress(&acc, messages.clone(), "claude-sonnet-4", 30_000);
        let b = compressor().compress(&acc, messages, "claude-sonnet-4", 30_000);
        assert_eq!(a, b);
    }
}
