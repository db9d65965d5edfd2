//! Overload fallback routing.
//!
//! When the primary provider reports an overload, the same request is
//! retried through an aggregator route: any dated `-YYYYMMDD` suffix is
//! stripped (aggregators list the undated alias) and the configured route
//! prefix is prepended once.

use regex::Regex;
use std::sync::OnceLock;
use tl_domain::config::RoutingConfig;

fn dated_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-\d{8}$").expect("static pattern"))
}

/// Rewrite a model name onto the overload fallback route.
pub fn overload_fallback_route(model: &str, config: &RoutingConfig) -> String {
    let stripped = dated_suffix().replace(model, "");
    if stripped.starts_with(&config.overload_fallback_prefix) {
        stripped.into_owned()
    } else {
        format!("{}{}", config.overload_fallback_prefix, stripped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_dated_suffix_and_prefixes() {
        let config = RoutingConfig::default();
        assert_eq!(
            overload_fallback_route("claude-sonnet-4-20250514", &config),
            "openrouter/claude-sonnet-4"
        );
    }

    #[test]
    fn undated_model_just_gets_prefix() {
        let config = RoutingConfig::default();
        assert_eq!(
            overload_fallback_route("claude-sonnet-4", &config),
            "openrouter/claude-sonnet-4"
        );
    }

    #[test]
    fn prefix_is_applied_exactly_once() {
        let config = RoutingConfig::default();
        assert_eq!(
            overload_fallback_route("openrouter/claude-sonnet-4", &config),
            "openrouter/claude-sonnet-4"
        );
    }

    #[test]
    fn short_digit_runs_are_not_dates() {
        let config = RoutingConfig::default();
        assert_eq!(
            overload_fallback_route("gpt-4o", &config),
            "openrouter/gpt-4o"
        );
    }
}
