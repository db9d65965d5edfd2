/// Shared error type used across all Threadloom crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Thread/message store read or write failed.
    #[error("persistence: {0}")]
    Persistence(String),

    /// Provider call failed or timed out.
    #[error("transport {provider}: {message}")]
    Transport { provider: String, message: String },

    /// Provider-specific overload signal. Recoverable: the auto-continue
    /// driver reroutes to the fallback route and retries.
    #[error("overloaded {provider}: {message}")]
    Overload { provider: String, message: String },

    /// Token count could not be brought under the safe limit even after
    /// both compression passes. Reported, not fatal to the caller.
    #[error("token budget exceeded: {counted} > {limit}")]
    BudgetExceeded { counted: u64, limit: u64 },

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is the overload condition handled by
    /// retry-with-fallback rather than termination.
    pub fn is_overload(&self) -> bool {
        matches!(self, Error::Overload { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
