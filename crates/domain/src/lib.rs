pub mod chunk;
pub mod config;
pub mod error;
pub mod message;
pub mod model;
pub mod tool;
pub mod trace;

// Re-exports for convenience.
pub use chunk::{BoxStream, ChunkStatus, FinishReason, ResponseChunk};
pub use config::{
    CachingConfig, CompressionConfig, EngineConfig, FetchConfig, ProcessorConfig, RoutingConfig,
};
pub use error::{Error, Result};
pub use message::{
    CacheControl, ContentPart, LlmMessage, MessageContent, MessageRecord, MessageType,
    ResponseEndContent, Role, ThreadRecord, TokenUsage,
};
pub use model::{ModelCatalog, ModelProfile};
pub use tool::{ToolChoice, ToolSchema};
pub use trace::TraceEvent;
