//! Model catalog — per-model capabilities the engine needs to size and
//! annotate requests: context window and prompt-caching support.
//!
//! Lookup is by substring so dated or route-prefixed model names
//! (`openrouter/claude-sonnet-4-20250514`) resolve to the same profile.

use serde::{Deserialize, Serialize};

/// Capabilities of one model family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Substring matched against the full model name.
    pub name_contains: String,
    pub context_window_tokens: u64,
    #[serde(default)]
    pub supports_prompt_caching: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
}

/// Registry of known model profiles with a conservative default window
/// for anything unrecognized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalog {
    #[serde(default)]
    pub profiles: Vec<ModelProfile>,
    #[serde(default = "d_default_window")]
    pub default_window_tokens: u64,
}

fn d_default_window() -> u64 {
    128_000
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            profiles: vec![
                ModelProfile {
                    name_contains: "claude".into(),
                    context_window_tokens: 200_000,
                    supports_prompt_caching: true,
                    max_output_tokens: Some(64_000),
                },
                ModelProfile {
                    name_contains: "gpt-5".into(),
                    context_window_tokens: 400_000,
                    supports_prompt_caching: false,
                    max_output_tokens: Some(128_000),
                },
                ModelProfile {
                    name_contains: "gpt-4o".into(),
                    context_window_tokens: 128_000,
                    supports_prompt_caching: false,
                    max_output_tokens: Some(16_384),
                },
                ModelProfile {
                    name_contains: "gemini".into(),
                    context_window_tokens: 1_000_000,
                    supports_prompt_caching: false,
                    max_output_tokens: Some(65_536),
                },
                ModelProfile {
                    name_contains: "deepseek".into(),
                    context_window_tokens: 128_000,
                    supports_prompt_caching: false,
                    max_output_tokens: None,
                },
            ],
            default_window_tokens: d_default_window(),
        }
    }
}

impl ModelCatalog {
    pub fn profile(&self, model: &str) -> Option<&ModelProfile> {
        let lower = model.to_lowercase();
        self.profiles
            .iter()
            .find(|p| lower.contains(&p.name_contains))
    }

    /// Context window for a model, falling back to the default window.
    pub fn context_window(&self, model: &str) -> u64 {
        self.profile(model)
            .map(|p| p.context_window_tokens)
            .unwrap_or(self.default_window_tokens)
    }

    pub fn supports_prompt_caching(&self, model: &str) -> bool {
        self.profile(model)
            .map(|p| p.supports_prompt_caching)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_route_prefix_and_date_suffix() {
        let catalog = ModelCatalog::default();
        assert_eq!(
            catalog.context_window("openrouter/claude-sonnet-4-20250514"),
            200_000
        );
        assert!(catalog.supports_prompt_caching("claude-sonnet-4"));
    }

    #[test]
    fn unknown_model_gets_default_window() {
        let catalog = ModelCatalog::default();
        assert_eq!(catalog.context_window("mystery-model"), 128_000);
        assert!(!catalog.supports_prompt_caching("mystery-model"));
    }
}
