//! Prompt-cache annotation.
//!
//! Providers with prefix caching charge a premium to write a cache segment
//! and a discount to read it, so markers go on the largest stable
//! boundaries: the system prompt first, then the oldest sufficiently large
//! history messages. Both operations are pure functions of their input;
//! annotating an already annotated list is a fixed point.

use tl_domain::config::CachingConfig;
use tl_domain::message::{
    CacheControl, ContentPart, LlmMessage, MessageContent, Role,
};
use tl_domain::model::ModelCatalog;

#[derive(Debug, Clone, Default)]
pub struct CacheAnnotator {
    config: CachingConfig,
    catalog: ModelCatalog,
}

impl CacheAnnotator {
    pub fn new(config: CachingConfig, catalog: ModelCatalog) -> Self {
        Self { config, catalog }
    }

    /// Mark up to `max_breakpoints` cache boundaries. No-op for models
    /// without prompt caching.
    pub fn annotate(&self, mut messages: Vec<LlmMessage>, model: &str) -> Vec<LlmMessage> {
        if !self.catalog.supports_prompt_caching(model) {
            return messages;
        }

        let mut marks = messages.iter().filter(|m| m.has_cache_marker()).count();

        // System prompt first: it is identical across every turn of the
        // thread, the highest-value cache segment.
        if marks < self.config.max_breakpoints {
            if let Some(first) = messages.first_mut() {
                if first.role == Role::System
                    && !first.has_cache_marker()
                    && content_len(&first.content) >= self.config.min_chars_for_cache
                {
                    mark(first);
                    marks += 1;
                }
            }
        }

        // Then the oldest large history messages: old content is stable,
        // recent content churns every turn.
        for msg in messages.iter_mut() {
            if marks >= self.config.max_breakpoints {
                break;
            }
            if msg.role == Role::System || msg.has_cache_marker() {
                continue;
            }
            if content_len(&msg.content) < self.config.min_chars_for_cache {
                continue;
            }
            mark(msg);
            marks += 1;
        }

        messages
    }

    /// Strip markers beyond the provider maximum, keeping the earliest
    /// ones. Models without caching support lose every marker.
    pub fn validate(&self, mut messages: Vec<LlmMessage>, model: &str) -> Vec<LlmMessage> {
        let allowed = if self.catalog.supports_prompt_caching(model) {
            self.config.max_breakpoints
        } else {
            0
        };

        let mut seen = 0usize;
        for msg in messages.iter_mut() {
            if !msg.has_cache_marker() {
                continue;
            }
            seen += 1;
            if seen > allowed {
                unmark(msg);
            }
        }
        messages
    }
}

fn content_len(content: &MessageContent) -> usize {
    match content {
        MessageContent::Text(t) => t.len(),
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text, .. } => text.len(),
                ContentPart::ToolResult { content, .. } => content.len(),
                _ => 0,
            })
            .sum(),
    }
}

/// Attach a cache marker to the last text part, wrapping plain text into a
/// single-part list if needed.
fn mark(msg: &mut LlmMessage) {
    match &mut msg.content {
        MessageContent::Text(t) => {
            let text = std::mem::take(t);
            msg.content = MessageContent::Parts(vec![ContentPart::Text {
                text,
                cache_control: Some(CacheControl::ephemeral()),
            }]);
        }
        MessageContent::Parts(parts) => {
            if let Some(ContentPart::Text { cache_control, .. }) = parts
                .iter_mut()
                .rev()
                .find(|p| matches!(p, ContentPart::Text { .. }))
            {
                *cache_control = Some(CacheControl::ephemeral());
            }
        }
    }
}

fn unmark(msg: &mut LlmMessage) {
    if let MessageContent::Parts(parts) = &mut msg.content {
        for part in parts.iter_mut() {
            if let ContentPart::Text { cache_control, .. } = part {
                *cache_control = None;
            }
        }
    }
}
