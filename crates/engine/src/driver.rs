//! Auto-continue driver: the caller-facing entry point.
//!
//! Runs turns in a strict loop. A `tool_calls` finish or an out-of-band
//! `length` signal starts the next iteration with the suppressed chunk
//! swallowed; a provider overload reroutes the model and retries the same
//! iteration; everything else either finishes the run or terminates it
//! with a single error chunk. The returned stream is lazy: nothing runs
//! until the caller pulls, and dropping it releases the provider call.

use std::sync::Arc;

use futures_util::StreamExt;

use tl_domain::chunk::{BoxStream, FinishReason, ResponseChunk};
use tl_domain::config::{ProcessorConfig, RoutingConfig};
use tl_domain::error::Error;
use tl_domain::message::LlmMessage;
use tl_domain::tool::ToolChoice;
use tl_domain::trace::TraceEvent;
use tl_providers::routing::overload_fallback_route;
use tl_providers::ReasoningOptions;

use crate::orchestrator::TurnOrchestrator;
use crate::state::ContinuationState;
use crate::toolset::embed_in_system_prompt;

/// Default ceiling on continuation iterations per run.
pub const DEFAULT_MAX_AUTO_CONTINUES: u32 = 25;

/// Caller-supplied parameters for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub model: String,
    pub stream: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u64>,
    pub processor: ProcessorConfig,
    pub tool_choice: ToolChoice,
    /// Continuation ceiling. Zero disables auto-continue entirely: exactly
    /// one turn runs and its stream is returned unwrapped.
    pub max_auto_continues: u32,
    /// Per-turn XML tool-call cap; folded into the processor config when
    /// the config does not set one itself.
    pub max_xml_tool_calls: u32,
    pub reasoning: Option<ReasoningOptions>,
    /// Extra message appended after history on the first iteration only.
    pub temporary_message: Option<LlmMessage>,
}

impl RunOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            stream: true,
            temperature: None,
            max_tokens: None,
            processor: ProcessorConfig::default(),
            tool_choice: ToolChoice::Auto,
            max_auto_continues: DEFAULT_MAX_AUTO_CONTINUES,
            max_xml_tool_calls: 0,
            reasoning: None,
            temporary_message: None,
        }
    }
}

pub struct ConversationEngine {
    orchestrator: Arc<TurnOrchestrator>,
    routing: RoutingConfig,
}

impl ConversationEngine {
    pub fn new(orchestrator: Arc<TurnOrchestrator>, routing: RoutingConfig) -> Self {
        Self {
            orchestrator,
            routing,
        }
    }

    /// Run a conversation turn (or an auto-continue chain of turns) and
    /// return one logically ordered chunk stream. The stream always ends
    /// with a `finish` chunk or a `status/error` chunk.
    pub fn run_thread(
        &self,
        thread_id: impl Into<String>,
        system_prompt: LlmMessage,
        options: RunOptions,
    ) -> BoxStream<'static, ResponseChunk> {
        let orchestrator = self.orchestrator.clone();
        let routing = self.routing.clone();
        let thread_id = thread_id.into();

        Box::pin(async_stream::stream! {
            let mut options = options;
            if options.max_xml_tool_calls > 0 && options.processor.max_xml_tool_calls == 0 {
                options.processor.max_xml_tool_calls = options.max_xml_tool_calls;
            }

            let mut system_prompt = system_prompt;
            if options.processor.include_xml_examples && options.processor.xml_tool_calling {
                if let Some(block) = orchestrator.xml_instruction_block() {
                    embed_in_system_prompt(&mut system_prompt, &block);
                }
            }

            let ceiling = options.max_auto_continues;
            let temporary = options.temporary_message.take();
            let mut state = ContinuationState::new();
            let mut model = options.model.clone();
            let mut final_reason = String::from("stop");

            'run: loop {
                TraceEvent::TurnStarted {
                    thread_id: thread_id.clone(),
                    model: model.clone(),
                    iteration: state.iteration,
                    streaming: options.stream,
                }
                .emit();

                let mut wants_continue = false;
                let mut halted = false;
                let temp = if state.iteration == 0 { temporary.as_ref() } else { None };

                match orchestrator
                    .run_once(&thread_id, &system_prompt, &model, &options, temp, &state)
                    .await
                {
                    Err(e) if e.is_overload() && ceiling > 0 && can_reroute(&model, &routing) => {
                        model = reroute(&model, &routing, &e);
                        continue 'run;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, thread_id, "error executing turn");
                        yield ResponseChunk::error(format!("Error executing thread: {e}"));
                        final_reason = "error".into();
                        break 'run;
                    }
                    Ok(mut chunks) => {
                        while let Some(item) = chunks.next().await {
                            match item {
                                Ok(ResponseChunk::Content { content }) => {
                                    state.partial_content.push_str(&content);
                                    yield ResponseChunk::Content { content };
                                }
                                Ok(ResponseChunk::Finish { reason: FinishReason::ToolCalls })
                                    if ceiling > 0 =>
                                {
                                    // Suppressed: the caller sees one
                                    // continuous response.
                                    if !wants_continue {
                                        wants_continue = true;
                                        state.iteration += 1;
                                        TraceEvent::AutoContinue {
                                            thread_id: thread_id.clone(),
                                            iteration: state.iteration,
                                            reason: "tool_calls".into(),
                                        }
                                        .emit();
                                    }
                                }
                                Ok(
                                    chunk @ ResponseChunk::Finish {
                                        reason: FinishReason::XmlToolLimitReached,
                                    },
                                ) => {
                                    // Forwarded so the caller knows why
                                    // generation halted.
                                    halted = true;
                                    final_reason = "xml_tool_limit_reached".into();
                                    yield chunk;
                                }
                                Ok(ResponseChunk::Status {
                                    completion_signal: Some(FinishReason::Length),
                                    ..
                                }) if ceiling > 0 => {
                                    // The provider cut the output short;
                                    // same treatment as a tool-call split.
                                    if !wants_continue {
                                        wants_continue = true;
                                        state.iteration += 1;
                                        TraceEvent::AutoContinue {
                                            thread_id: thread_id.clone(),
                                            iteration: state.iteration,
                                            reason: "length".into(),
                                        }
                                        .emit();
                                    }
                                }
                                Ok(chunk @ ResponseChunk::Finish { reason }) => {
                                    final_reason = reason_label(reason).into();
                                    yield chunk;
                                }
                                Ok(chunk) => yield chunk,
                                Err(e)
                                    if e.is_overload()
                                        && ceiling > 0
                                        && can_reroute(&model, &routing) =>
                                {
                                    model = reroute(&model, &routing, &e);
                                    // Retry the same iteration on the
                                    // fallback route.
                                    wants_continue = true;
                                    halted = false;
                                    break;
                                }
                                Err(e) => {
                                    tracing::error!(error = %e, thread_id, "error in turn stream");
                                    yield ResponseChunk::error(format!(
                                        "Error in thread processing: {e}"
                                    ));
                                    final_reason = "error".into();
                                    break 'run;
                                }
                            }
                        }
                    }
                }

                if halted || !wants_continue {
                    break 'run;
                }
                if state.iteration >= ceiling && ceiling > 0 {
                    tracing::warn!(ceiling, thread_id, "reached maximum auto-continue limit");
                    TraceEvent::AutoContinueCeiling {
                        thread_id: thread_id.clone(),
                        ceiling,
                    }
                    .emit();
                    yield ResponseChunk::Content {
                        content: format!(
                            "\n[Agent reached maximum auto-continue limit of {ceiling}]"
                        ),
                    };
                    final_reason = "auto_continue_limit".into();
                    break 'run;
                }
            }

            TraceEvent::TurnFinished {
                thread_id: thread_id.clone(),
                iterations: state.iteration,
                finish_reason: final_reason,
            }
            .emit();
        })
    }
}

/// A second overload on the fallback route itself is terminal.
fn can_reroute(model: &str, routing: &RoutingConfig) -> bool {
    overload_fallback_route(model, routing) != model
}

fn reroute(model: &str, routing: &RoutingConfig, err: &Error) -> String {
    let to = overload_fallback_route(model, routing);
    let provider = match err {
        Error::Overload { provider, .. } => provider.clone(),
        _ => String::new(),
    };
    tracing::error!(from = model, to = %to, "provider overloaded, falling back");
    TraceEvent::OverloadReroute {
        from_model: model.to_string(),
        to_model: to.clone(),
        provider,
    }
    .emit();
    to
}

fn reason_label(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::XmlToolLimitReached => "xml_tool_limit_reached",
        FinishReason::Length => "length",
    }
}
