//! Token accounting.
//!
//! The engine never sees provider tokenizers; it works against this trait.
//! [`EstimatingAccountant`] is the default implementation: a character-length
//! heuristic (4 chars per token) over the serialized message content, with
//! context windows resolved through the model catalog. Deployments that want
//! exact counts plug in their own accountant.

use tl_domain::message::{LlmMessage, MessageContent};
use tl_domain::model::ModelCatalog;

/// Chars of serialized content per estimated token.
const CHARS_PER_TOKEN: u64 = 4;

/// Fixed per-message overhead (role tag, framing).
const PER_MESSAGE_TOKENS: u64 = 4;

pub trait TokenAccountant: Send + Sync {
    /// Estimated token count of a prepared request.
    fn count(&self, model: &str, messages: &[LlmMessage]) -> u64;

    /// Estimated token count of a single message.
    fn count_message(&self, model: &str, message: &LlmMessage) -> u64 {
        self.count(model, std::slice::from_ref(message))
    }

    /// Context window of the model, in tokens.
    fn context_window(&self, model: &str) -> u64;
}

#[derive(Debug, Clone, Default)]
pub struct EstimatingAccountant {
    catalog: ModelCatalog,
}

impl EstimatingAccountant {
    pub fn new(catalog: ModelCatalog) -> Self {
        Self { catalog }
    }
}

fn content_chars(content: &MessageContent) -> u64 {
    match content {
        MessageContent::Text(t) => t.len() as u64,
        MessageContent::Parts(_) => serde_json::to_string(content)
            .map(|s| s.len() as u64)
            .unwrap_or(0),
    }
}

impl TokenAccountant for EstimatingAccountant {
    fn count(&self, _model: &str, messages: &[LlmMessage]) -> u64 {
        messages
            .iter()
            .map(|m| content_chars(&m.content) / CHARS_PER_TOKEN + PER_MESSAGE_TOKENS)
            .sum()
    }

    fn context_window(&self, model: &str) -> u64 {
        self.catalog.context_window(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_scales_with_content_length() {
        let acc = EstimatingAccountant::default();
        let short = vec![LlmMessage::user("hi")];
        let long = vec![LlmMessage::user("x".repeat(4_000))];
        assert!(acc.count("claude-sonnet-4", &long) > acc.count("claude-sonnet-4", &short));
        assert!(acc.count("claude-sonnet-4", &long) >= 1_000);
    }

    #[test]
    fn window_comes_from_catalog() {
        let acc = EstimatingAccountant::default();
        assert_eq!(acc.context_window("claude-sonnet-4"), 200_000);
        assert_eq!(acc.context_window("mystery"), 128_000);
    }
}
