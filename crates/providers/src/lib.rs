pub mod classifier;
pub mod routing;
pub mod traits;

// Re-exports for convenience.
pub use classifier::classify_provider_error;
pub use routing::overload_fallback_route;
pub use traits::{LlmTransport, ReasoningOptions, TransportReply, TransportRequest};
