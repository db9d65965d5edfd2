//! Transport error classification.
//!
//! Overload is the one provider failure the engine can do something about
//! (reroute through a fallback route and retry the same iteration), so it
//! is classified into its own typed variant at the transport boundary.
//! Everything else becomes an opaque transport error.

use tl_domain::error::Error;

/// Anthropic's dedicated overload status.
const OVERLOAD_STATUS: u16 = 529;

/// Classify a provider failure into a domain error.
///
/// `status` is the HTTP status when one was received; `body` is the raw
/// error payload or exception text.
pub fn classify_provider_error(provider: &str, status: Option<u16>, body: &str) -> Error {
    if is_overload(status, body) {
        tracing::warn!(
            provider = %provider,
            status = ?status,
            "provider reported overload, eligible for fallback rerouting"
        );
        Error::Overload {
            provider: provider.to_string(),
            message: truncated(body),
        }
    } else {
        tracing::warn!(
            provider = %provider,
            status = ?status,
            "provider call failed with a non-retriable error"
        );
        Error::Transport {
            provider: provider.to_string(),
            message: truncated(body),
        }
    }
}

fn is_overload(status: Option<u16>, body: &str) -> bool {
    if status == Some(OVERLOAD_STATUS) {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("overloaded") || lower.contains("overloaded_error")
}

// Provider error bodies can embed whole request payloads; keep logs sane.
fn truncated(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_529_is_overload() {
        let err = classify_provider_error("anthropic", Some(529), "{}");
        assert!(err.is_overload());
    }

    #[test]
    fn overloaded_body_is_overload() {
        let err = classify_provider_error(
            "anthropic",
            Some(500),
            "AnthropicException - Overloaded",
        );
        assert!(err.is_overload());
    }

    #[test]
    fn plain_5xx_is_transport() {
        let err = classify_provider_error("openai", Some(503), "service unavailable");
        assert!(!err.is_overload());
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(2_000);
        match classify_provider_error("openai", None, &body) {
            Error::Transport { message, .. } => assert!(message.len() < 600),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
