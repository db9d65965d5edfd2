use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the response.
    Stop,
    /// The model emitted native tool calls and wants them executed.
    ToolCalls,
    /// The per-turn XML tool-call cap was hit mid-generation.
    XmlToolLimitReached,
    /// The provider truncated the output at its length cap.
    Length,
}

/// Status severity carried by a `status` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Info,
    Error,
}

/// One normalized chunk of a conversation turn, as delivered to the caller.
///
/// This is a closed set: interpreters decode raw provider output into these
/// variants once, at construction time. In particular, a provider status
/// payload that embeds a finish reason (e.g. an output-length truncation
/// reported out-of-band) is decoded into `completion_signal` here rather
/// than re-parsed downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseChunk {
    /// Assistant text (possibly a delta in streaming mode).
    Content { content: String },

    /// A tool invocation detected in the response.
    ToolCall { payload: serde_json::Value },

    /// Generation finished for this turn.
    Finish { reason: FinishReason },

    /// Out-of-band status: informational notes and terminal errors.
    Status {
        status: ChunkStatus,
        message: String,
        /// Finish reason embedded in the provider's status payload, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        completion_signal: Option<FinishReason>,
    },
}

impl ResponseChunk {
    /// Terminal error chunk. The stream always ends with either a `finish`
    /// chunk or one of these.
    pub fn error(message: impl Into<String>) -> Self {
        ResponseChunk::Status {
            status: ChunkStatus::Error,
            message: message.into(),
            completion_signal: None,
        }
    }

    /// Informational status chunk.
    pub fn info(message: impl Into<String>) -> Self {
        ResponseChunk::Status {
            status: ChunkStatus::Info,
            message: message.into(),
            completion_signal: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_serializes_with_type_tag() {
        let chunk = ResponseChunk::Finish {
            reason: FinishReason::ToolCalls,
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "finish");
        assert_eq!(json["reason"], "tool_calls");
    }

    #[test]
    fn status_omits_absent_completion_signal() {
        let json = serde_json::to_value(ResponseChunk::error("boom")).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["status"], "error");
        assert!(json.get("completion_signal").is_none());
    }

    #[test]
    fn completion_signal_round_trips() {
        let chunk = ResponseChunk::Status {
            status: ChunkStatus::Info,
            message: "provider stopped at output cap".into(),
            completion_signal: Some(FinishReason::Length),
        };
        let json = serde_json::to_string(&chunk).unwrap();
        let back: ResponseChunk = serde_json::from_str(&json).unwrap();
        match back {
            ResponseChunk::Status {
                completion_signal, ..
            } => assert_eq!(completion_signal, Some(FinishReason::Length)),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
