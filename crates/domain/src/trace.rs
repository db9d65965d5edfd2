use serde::Serialize;

/// Structured trace events emitted across all threadloom crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ThreadCreated {
        thread_id: String,
    },
    MessageAppended {
        thread_id: String,
        message_id: String,
        message_type: String,
    },
    TurnStarted {
        thread_id: String,
        model: String,
        iteration: u32,
        streaming: bool,
    },
    HistoryFetched {
        thread_id: String,
        records: usize,
        llm_messages: usize,
        skipped_malformed: usize,
    },
    BudgetChecked {
        model: String,
        counted_tokens: u64,
        safe_limit: u64,
        compressed: bool,
    },
    CompressionApplied {
        stage: String,
        tokens_before: u64,
        tokens_after: u64,
        messages_before: usize,
        messages_after: usize,
    },
    SystemMessagesCollapsed {
        thread_id: String,
        collapsed: usize,
    },
    CacheAnnotated {
        marked: usize,
        stripped: usize,
        precheck_tokens: u64,
    },
    OverloadReroute {
        from_model: String,
        to_model: String,
        provider: String,
    },
    AutoContinue {
        thread_id: String,
        iteration: u32,
        reason: String,
    },
    AutoContinueCeiling {
        thread_id: String,
        ceiling: u32,
    },
    UsageRecorded {
        thread_id: String,
        message_id: String,
        prompt_tokens: u64,
        completion_tokens: u64,
        cache_read_tokens: u64,
        cache_creation_tokens: u64,
    },
    BillingDeducted {
        account_id: String,
        cost: f64,
        success: bool,
    },
    TurnFinished {
        thread_id: String,
        iterations: u32,
        finish_reason: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "tl_event");
    }
}
