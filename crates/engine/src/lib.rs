pub mod driver;
pub mod interpreter;
pub mod orchestrator;
pub mod state;
pub mod toolset;

use std::path::Path;

use tl_domain::config::EngineConfig;
use tl_domain::error::{Error, Result};

// Re-exports for convenience.
pub use driver::{ConversationEngine, RunOptions, DEFAULT_MAX_AUTO_CONTINUES};
pub use interpreter::{InterpretContext, ResponseInterpreter};
pub use orchestrator::TurnOrchestrator;
pub use state::ContinuationState;
pub use toolset::ToolSchemaProvider;

/// Load engine configuration from a TOML file. A missing file means
/// defaults; a malformed one is an error.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
    toml::from_str(&raw).map_err(|e| Error::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.compression.cache_precheck_tokens, 80_000);
    }

    #[test]
    fn malformed_config_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[compression\nbroken").unwrap();
        assert!(matches!(load_config(&path), Err(Error::Config(_))));
    }

    #[test]
    fn overrides_apply_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[compression]\ncache_precheck_tokens = 50000\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.compression.cache_precheck_tokens, 50_000);
        assert_eq!(config.caching.max_breakpoints, 4);
    }
}
