use serde::{Deserialize, Serialize};
use tl_domain::chunk::BoxStream;
use tl_domain::error::Result;
use tl_domain::message::LlmMessage;
use tl_domain::tool::{ToolChoice, ToolSchema};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Reply types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Extended-thinking options forwarded to the provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningOptions {
    pub enabled: bool,
    /// Provider-specific effort hint ("low", "medium", "high").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
}

/// A provider-agnostic completion request, fully prepared: compressed,
/// cache-annotated, with the system prompt in first position.
#[derive(Debug, Clone, Default)]
pub struct TransportRequest {
    /// The prepared conversation, system prompt first.
    pub messages: Vec<LlmMessage>,
    /// Model identifier, possibly carrying a route prefix.
    pub model: String,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u64>,
    /// Tool schemas the model may invoke (native tool calling only).
    pub tools: Vec<ToolSchema>,
    pub tool_choice: ToolChoice,
    /// When `true`, ask for an incremental event stream.
    pub stream: bool,
    pub reasoning: Option<ReasoningOptions>,
}

/// What the transport hands back: either the provider's complete response
/// payload or a stream of raw provider events. Both are untyped JSON; the
/// response interpreter owns the decoding.
pub enum TransportReply {
    Complete(serde_json::Value),
    Stream(BoxStream<'static, Result<serde_json::Value>>),
}

impl std::fmt::Debug for TransportReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(v) => f.debug_tuple("Complete").field(v).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM transport must implement.
///
/// Implementations translate the prepared request into a concrete wire
/// protocol. Failures must come back as domain errors, with overload
/// conditions classified via [`crate::classifier`] so the engine can
/// reroute them.
#[async_trait::async_trait]
pub trait LlmTransport: Send + Sync {
    /// Send a prepared request. Honors `req.stream`.
    async fn send(&self, req: TransportRequest) -> Result<TransportReply>;

    /// A unique identifier for this transport instance.
    fn provider_id(&self) -> &str;
}
