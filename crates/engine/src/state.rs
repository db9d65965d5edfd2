//! Per-run continuation state.

/// Mutable state of one auto-continue run.
///
/// Owned exclusively by the driver for the lifetime of the run; each
/// iteration reads it through the orchestrator and the driver mutates it
/// between iterations. Never shared across tasks.
#[derive(Debug, Clone)]
pub struct ContinuationState {
    /// Stable identifier for the whole run, across all iterations.
    pub run_id: String,
    /// Completed continuation iterations so far.
    pub iteration: u32,
    /// Assistant content accumulated across split calls. Carried into the
    /// next iteration as a synthetic assistant message.
    pub partial_content: String,
}

impl ContinuationState {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            iteration: 0,
            partial_content: String::new(),
        }
    }
}

impl Default for ContinuationState {
    fn default() -> Self {
        Self::new()
    }
}
