pub mod cache;
pub mod compress;
pub mod omission;
pub mod tokens;

// Re-exports for convenience.
pub use cache::CacheAnnotator;
pub use compress::ContextCompressor;
pub use tokens::{EstimatingAccountant, TokenAccountant};
