//! Engine configuration.
//!
//! Every numeric policy constant lives here rather than inline: the
//! safe-limit headroom tiers and compression targets are empirically tuned
//! per provider and need to be revisitable without touching engine code.
//! All sections are TOML-loadable with serde defaults.

use crate::model::ModelCatalog;
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token budget & compression
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Below this prepared-request token count, cache annotation is applied;
    /// above it the request will be compressed anyway and annotating would
    /// waste the cache-boundary budget.
    #[serde(default = "d_cache_precheck")]
    pub cache_precheck_tokens: u64,

    /// Headroom reserved for model output + the next turn, by window size.
    #[serde(default = "d_large_headroom")]
    pub large_window_headroom: u64,
    #[serde(default = "d_medium_headroom")]
    pub medium_window_headroom: u64,
    #[serde(default = "d_small_headroom")]
    pub small_window_headroom: u64,

    /// Extra margin subtracted from the safe limit when escalating to
    /// whole-message omission, which is coarser and can overshoot.
    #[serde(default = "d_omission_margin")]
    pub omission_extra_margin: u64,

    /// Most recent N tool results / user messages / assistant messages are
    /// never truncated by the primary compression pass.
    #[serde(default = "d_keep_tools")]
    pub keep_recent_tool_results: usize,
    #[serde(default = "d_keep_ten")]
    pub keep_recent_user_messages: usize,
    #[serde(default = "d_keep_ten")]
    pub keep_recent_assistant_messages: usize,

    /// Messages whose estimated token count is below this are never
    /// truncated.
    #[serde(default = "d_per_message_threshold")]
    pub per_message_token_threshold: u64,

    /// Old (non-protected) messages are head-truncated to this many chars.
    #[serde(default = "d_head_truncate")]
    pub head_truncate_chars: usize,

    /// Protected-but-huge messages are middle-out truncated to this cap.
    #[serde(default = "d_recent_truncate")]
    pub recent_truncate_chars: usize,

    /// Whole-message omission: messages removed per iteration, and the
    /// floor below which no more messages are removed.
    #[serde(default = "d_omission_batch")]
    pub omission_batch_size: usize,
    #[serde(default = "d_keep_ten")]
    pub omission_min_messages: usize,

    /// After compression, cap the total message count by dropping from the
    /// middle of the list.
    #[serde(default = "d_middle_out")]
    pub middle_out_max_messages: usize,
}

fn d_cache_precheck() -> u64 {
    80_000
}
fn d_large_headroom() -> u64 {
    32_000
}
fn d_medium_headroom() -> u64 {
    20_000
}
fn d_small_headroom() -> u64 {
    10_000
}
fn d_omission_margin() -> u64 {
    10_000
}
fn d_keep_tools() -> usize {
    5
}
fn d_keep_ten() -> usize {
    10
}
fn d_per_message_threshold() -> u64 {
    1_000
}
fn d_head_truncate() -> usize {
    3_000
}
fn d_recent_truncate() -> usize {
    100_000
}
fn d_omission_batch() -> usize {
    10
}
fn d_middle_out() -> usize {
    320
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            cache_precheck_tokens: d_cache_precheck(),
            large_window_headroom: d_large_headroom(),
            medium_window_headroom: d_medium_headroom(),
            small_window_headroom: d_small_headroom(),
            omission_extra_margin: d_omission_margin(),
            keep_recent_tool_results: d_keep_tools(),
            keep_recent_user_messages: d_keep_ten(),
            keep_recent_assistant_messages: d_keep_ten(),
            per_message_token_threshold: d_per_message_threshold(),
            head_truncate_chars: d_head_truncate(),
            recent_truncate_chars: d_recent_truncate(),
            omission_batch_size: d_omission_batch(),
            omission_min_messages: d_keep_ten(),
            middle_out_max_messages: d_middle_out(),
        }
    }
}

impl CompressionConfig {
    /// Per-turn token budget for a model's context window.
    ///
    /// The tiers are a hard contract: they encode provider headroom
    /// requirements (output allowance + safety margin).
    pub fn safe_limit(&self, context_window: u64) -> u64 {
        if context_window >= 200_000 {
            context_window.saturating_sub(self.large_window_headroom)
        } else if context_window >= 100_000 {
            context_window.saturating_sub(self.medium_window_headroom)
        } else {
            context_window.saturating_sub(self.small_window_headroom)
        }
    }

    /// Target for the omission escalation pass.
    pub fn omission_target(&self, safe_limit: u64) -> u64 {
        safe_limit.saturating_sub(self.omission_extra_margin)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt caching
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachingConfig {
    /// Provider maximum number of cache breakpoints per request.
    #[serde(default = "d_max_breakpoints")]
    pub max_breakpoints: usize,
    /// Content shorter than this is not worth a breakpoint.
    #[serde(default = "d_min_chars_for_cache")]
    pub min_chars_for_cache: usize,
}

fn d_max_breakpoints() -> usize {
    4
}
fn d_min_chars_for_cache() -> usize {
    10_000
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            max_breakpoints: d_max_breakpoints(),
            min_chars_for_cache: d_min_chars_for_cache(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// History fetch & fallback routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// History records are converted in pages of this size, with a
    /// scheduler yield between pages on very long threads.
    #[serde(default = "d_page_size")]
    pub message_page_size: usize,
}

fn d_page_size() -> usize {
    1_000
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            message_page_size: d_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Route prefix applied to the model name when the provider reports an
    /// overload and the driver retries through the fallback route.
    #[serde(default = "d_fallback_prefix")]
    pub overload_fallback_prefix: String,
}

fn d_fallback_prefix() -> String {
    "openrouter/".into()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            overload_fallback_prefix: d_fallback_prefix(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Processor & engine aggregates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-run tool-calling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Native provider function calling (tool schemas on the request).
    #[serde(default = "d_true")]
    pub native_tool_calling: bool,
    /// Embedded-XML tool calling parsed out of assistant text.
    #[serde(default)]
    pub xml_tool_calling: bool,
    /// Cap on XML tool invocations per turn. 0 = no limit.
    #[serde(default)]
    pub max_xml_tool_calls: u32,
    /// Embed tool schemas and usage examples in the system prompt.
    #[serde(default)]
    pub include_xml_examples: bool,
}

fn d_true() -> bool {
    true
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            native_tool_calling: true,
            xml_tool_calling: false,
            max_xml_tool_calls: 0,
            include_xml_examples: false,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub caching: CachingConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub models: ModelCatalog,
}
