use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prepared-request messages (what the transport sees)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Marker attached to a content part so the provider can reuse a cached
/// prefix ending at that boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub kind: CacheKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Ephemeral,
}

impl CacheControl {
    pub fn ephemeral() -> Self {
        Self {
            kind: CacheKind::Ephemeral,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    ImageUrl {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

/// A role-tagged message in a prepared request.
///
/// `message_id` links back to the persisted record when the message came
/// from thread history; synthetic messages (system prompt, partial-content
/// carryover) have none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: Role,
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl LlmMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
            message_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            message_id: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            message_id: None,
        }
    }

    /// Extract the plain-text content (first text part, or the full text).
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text, .. } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// Whether any part of this message carries a cache marker.
    pub fn has_cache_marker(&self) -> bool {
        match &self.content {
            MessageContent::Text(_) => false,
            MessageContent::Parts(parts) => parts
                .iter()
                .any(|p| matches!(p, ContentPart::Text { cache_control: Some(_), .. })),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persisted records (what the store holds)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Type tag of a persisted message.
///
/// `AssistantResponseEnd` is a terminal accounting record, not conversation
/// content: it carries token usage and the model name for billing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Assistant,
    Tool,
    AssistantResponseEnd,
    ImageContext,
    #[serde(other)]
    Unknown,
}

/// A conversation thread. Created once; only `metadata` is ever mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A persisted message row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub thread_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Structured payload. For LLM messages this is a role-tagged object;
    /// for accounting records it is a [`ResponseEndContent`].
    pub content: serde_json::Value,
    /// Distinguishes conversation content from side-channel records.
    pub is_llm_message: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_version_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Token usage for one completed turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

impl TokenUsage {
    pub fn is_zero(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0
    }
}

/// Payload of an `assistant_response_end` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEndContent {
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_unknown_for_unrecognized_tags() {
        let t: MessageType = serde_json::from_str("\"browser_state\"").unwrap();
        assert_eq!(t, MessageType::Unknown);
        let t: MessageType = serde_json::from_str("\"assistant_response_end\"").unwrap();
        assert_eq!(t, MessageType::AssistantResponseEnd);
    }

    #[test]
    fn text_extraction_prefers_first_text_part() {
        let msg = LlmMessage {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::ImageUrl {
                    url: "data:image/png;base64,xyz".into(),
                    media_type: Some("image/png".into()),
                },
                ContentPart::Text {
                    text: "what is in this image?".into(),
                    cache_control: None,
                },
            ]),
            message_id: None,
        };
        assert_eq!(msg.text(), Some("what is in this image?"));
    }

    #[test]
    fn cache_marker_detection() {
        let mut msg = LlmMessage::system("prompt");
        assert!(!msg.has_cache_marker());
        msg.content = MessageContent::Parts(vec![ContentPart::Text {
            text: "prompt".into(),
            cache_control: Some(CacheControl::ephemeral()),
        }]);
        assert!(msg.has_cache_marker());
    }

    #[test]
    fn response_end_content_parses_partial_usage() {
        let content: ResponseEndContent = serde_json::from_value(serde_json::json!({
            "usage": { "prompt_tokens": 100, "completion_tokens": 50 },
            "model": "claude-sonnet-4"
        }))
        .unwrap();
        assert_eq!(content.usage.prompt_tokens, 100);
        assert_eq!(content.usage.cache_read_input_tokens, 0);
    }
}
