//! Response interpreter contract.
//!
//! The interpreter owns everything between the raw provider payload and
//! the normalized chunk stream: delta assembly, tool-call extraction, XML
//! parsing, persistence of assistant output. The engine only fixes the
//! boundary types; the parsing internals live with the collaborator.

use serde_json::Value;
use tl_domain::chunk::{BoxStream, ResponseChunk};
use tl_domain::config::ProcessorConfig;
use tl_domain::error::Result;
use tl_domain::message::LlmMessage;

/// Everything an interpreter needs to know about the turn it is decoding.
#[derive(Debug, Clone)]
pub struct InterpretContext {
    pub thread_id: String,
    /// Stable across all iterations of one run.
    pub run_id: String,
    pub model: String,
    pub processor: ProcessorConfig,
    /// The prepared request the provider saw.
    pub prompt_messages: Vec<LlmMessage>,
    /// Whether the driver may issue continuation turns.
    pub can_auto_continue: bool,
    pub iteration: u32,
}

#[async_trait::async_trait]
pub trait ResponseInterpreter: Send + Sync {
    /// Decode an incremental provider event stream.
    async fn interpret_stream(
        &self,
        raw: BoxStream<'static, Result<Value>>,
        ctx: InterpretContext,
    ) -> Result<BoxStream<'static, Result<ResponseChunk>>>;

    /// Decode a complete provider response. Still yields a chunk stream so
    /// the driver consumes both modes identically.
    async fn interpret_complete(
        &self,
        raw: Value,
        ctx: InterpretContext,
    ) -> Result<BoxStream<'static, Result<ResponseChunk>>>;
}
