//! Turn orchestration: exactly one request/response exchange.
//!
//! `run_once` prepares the request (history fetch, partial-content
//! carryover, cache annotation, budget enforcement, system-message
//! collapse), issues the provider call, and hands the raw result to the
//! response interpreter. Setup failures come back as `Err`; the driver
//! decides whether they are retriable.

use std::sync::Arc;

use tl_context::{CacheAnnotator, ContextCompressor, TokenAccountant};
use tl_domain::chunk::{BoxStream, ResponseChunk};
use tl_domain::config::EngineConfig;
use tl_domain::error::{Error, Result};
use tl_domain::message::{LlmMessage, Role};
use tl_domain::tool::ToolChoice;
use tl_domain::trace::TraceEvent;
use tl_providers::traits::{LlmTransport, TransportReply, TransportRequest};
use tl_store::MessageStore;

use crate::driver::RunOptions;
use crate::interpreter::{InterpretContext, ResponseInterpreter};
use crate::state::ContinuationState;
use crate::toolset::ToolSchemaProvider;

pub struct TurnOrchestrator {
    config: EngineConfig,
    store: Arc<MessageStore>,
    accountant: Arc<dyn TokenAccountant>,
    compressor: ContextCompressor,
    annotator: CacheAnnotator,
    transport: Arc<dyn LlmTransport>,
    interpreter: Arc<dyn ResponseInterpreter>,
    tools: Option<Arc<dyn ToolSchemaProvider>>,
}

impl TurnOrchestrator {
    pub fn new(
        config: EngineConfig,
        store: Arc<MessageStore>,
        accountant: Arc<dyn TokenAccountant>,
        transport: Arc<dyn LlmTransport>,
        interpreter: Arc<dyn ResponseInterpreter>,
    ) -> Self {
        let compressor = ContextCompressor::new(config.compression.clone());
        let annotator = CacheAnnotator::new(config.caching.clone(), config.models.clone());
        Self {
            config,
            store,
            accountant,
            compressor,
            annotator,
            transport,
            interpreter,
            tools: None,
        }
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolSchemaProvider>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// XML tool-calling instruction block for the configured toolset, if
    /// any tools are registered.
    pub fn xml_instruction_block(&self) -> Option<String> {
        let tools = self.tools.as_ref()?;
        crate::toolset::xml_instructions(&tools.openapi_schemas(), &tools.usage_examples())
    }

    /// One exchange with the provider. `model` may differ from
    /// `options.model` when the driver has rerouted after an overload.
    pub async fn run_once(
        &self,
        thread_id: &str,
        system_prompt: &LlmMessage,
        model: &str,
        options: &RunOptions,
        temporary_message: Option<&LlmMessage>,
        state: &ContinuationState,
    ) -> Result<BoxStream<'static, Result<ResponseChunk>>> {
        // 1. History, minus any system-role messages: the engine's own
        // system prompt is authoritative.
        let mut history = self.store.fetch_llm_messages(thread_id).await?;
        let fetched = history.len();
        history.retain(|m| m.role != Role::System);
        if history.len() < fetched {
            tracing::info!(
                removed = fetched - history.len(),
                thread_id,
                "dropped system messages from thread history"
            );
        }

        // 2. Assemble: system prompt, history, optional temporary message,
        // then partial content carried over from the previous iteration.
        let mut prepared = Vec::with_capacity(history.len() + 3);
        prepared.push(system_prompt.clone());
        prepared.extend(history);
        if let Some(tmp) = temporary_message {
            prepared.push(tmp.clone());
        }
        if state.iteration > 0 && !state.partial_content.is_empty() {
            prepared.push(LlmMessage::assistant(state.partial_content.clone()));
        }

        // 3. Tool schemas. With native calling disabled, tool choice is
        // forced off regardless of caller preference.
        let (tools, tool_choice) = if options.processor.native_tool_calling {
            let schemas = self
                .tools
                .as_ref()
                .map(|t| t.openapi_schemas())
                .unwrap_or_default();
            (schemas, options.tool_choice)
        } else {
            (Vec::new(), ToolChoice::None)
        };

        // 4. Cache annotation, gated by the pre-check: a request that will
        // be compressed anyway would waste its cache boundaries.
        let precheck = self.accountant.count(model, &prepared);
        if precheck < self.config.compression.cache_precheck_tokens {
            let annotated = self.annotator.annotate(prepared, model);
            let marked = annotated.iter().filter(|m| m.has_cache_marker()).count();
            prepared = self.annotator.validate(annotated, model);
            let kept = prepared.iter().filter(|m| m.has_cache_marker()).count();
            TraceEvent::CacheAnnotated {
                marked: kept,
                stripped: marked - kept,
                precheck_tokens: precheck,
            }
            .emit();
        } else {
            tracing::warn!(
                tokens = precheck,
                "skipping cache annotation due to high token count"
            );
        }

        // 5–6. Budget enforcement against the model's safe limit.
        let counted = self.accountant.count(model, &prepared);
        let window = self.accountant.context_window(model);
        let safe_limit = self.config.compression.safe_limit(window);
        TraceEvent::BudgetChecked {
            model: model.to_string(),
            counted_tokens: counted,
            safe_limit,
            compressed: counted > safe_limit,
        }
        .emit();
        if counted > safe_limit {
            prepared =
                self.compressor
                    .compress(self.accountant.as_ref(), prepared, model, safe_limit);
            let counted = self.accountant.count(model, &prepared);
            if counted > safe_limit {
                tracing::warn!(
                    counted,
                    safe_limit,
                    "still over limit after truncation, omitting messages"
                );
                let target = self.config.compression.omission_target(safe_limit);
                prepared = self.compressor.compress_by_omission(
                    self.accountant.as_ref(),
                    prepared,
                    model,
                    target,
                );
                let counted = self.accountant.count(model, &prepared);
                if counted > safe_limit {
                    // Best effort is accepted; reported, not fatal.
                    let over = Error::BudgetExceeded {
                        counted,
                        limit: safe_limit,
                    };
                    tracing::warn!(error = %over, thread_id, "request exceeds budget after omission");
                }
            }
        }

        // 7. Invariant: exactly one leading system message. More than one
        // here is an upstream formatting bug; heal and log it.
        let system_count = prepared.iter().filter(|m| m.role == Role::System).count();
        if system_count > 1 {
            tracing::error!(
                count = system_count,
                thread_id,
                "multiple system messages in prepared request"
            );
            let mut seen = false;
            prepared.retain(|m| {
                if m.role == Role::System {
                    if seen {
                        return false;
                    }
                    seen = true;
                }
                true
            });
            TraceEvent::SystemMessagesCollapsed {
                thread_id: thread_id.to_string(),
                collapsed: system_count - 1,
            }
            .emit();
        }

        // 8–9. Provider call, then hand off to the interpreter.
        let ctx = InterpretContext {
            thread_id: thread_id.to_string(),
            run_id: state.run_id.clone(),
            model: model.to_string(),
            processor: options.processor.clone(),
            prompt_messages: prepared.clone(),
            can_auto_continue: options.max_auto_continues > 0,
            iteration: state.iteration,
        };
        let request = TransportRequest {
            messages: prepared,
            model: model.to_string(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            tools,
            tool_choice,
            stream: options.stream,
            reasoning: options.reasoning.clone(),
        };
        match self.transport.send(request).await? {
            TransportReply::Stream(raw) => self.interpreter.interpret_stream(raw, ctx).await,
            TransportReply::Complete(value) => {
                self.interpreter.interpret_complete(value, ctx).await
            }
        }
    }
}
