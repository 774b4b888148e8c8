use serde::{Deserialize, Serialize};

use super::response::{FinishReason, Usage};

/// Normalized event produced by an adapter while reading a backend stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamEvent {
    /// Message start, carrying the author role
    Start {
        /// Role of the streamed message (always "assistant" in practice)
        role: String,
    },
    /// Incremental content delta
    Delta(StreamDelta),
    /// A content block finished; finalizes any tool call accumulating
    /// at that index
    BlockStop {
        /// Content index of the finished block
        index: u32,
    },
    /// Message finished
    MessageStop {
        /// Why generation stopped
        finish_reason: FinishReason,
    },
    /// Final usage statistics
    Usage(Usage),
}

/// Incremental update within a streaming response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDelta {
    /// Incremental text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Incremental refusal text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
    /// Incremental tool call data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<StreamToolCall>,
}

/// Partial tool call data within a stream delta
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamToolCall {
    /// Content index this tool call accumulates under
    pub index: u32,
    /// Tool call ID (present on the opening chunk only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Partial function call data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<StreamFunctionCall>,
}

/// Partial function call data within a streaming tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFunctionCall {
    /// Function name (present on the opening chunk only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Incremental JSON-argument fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Chunk delivered to the caller's sink
///
/// Every normalized chunk is offered, text-bearing or not, so downstream
/// consumers can observe non-text events. `artificial` marks text injected
/// by the tool orchestrator rather than received from the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkEvent {
    /// Identifier of the message being streamed
    pub message_id: String,
    /// Visible text carried by this chunk, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Whether the text was injected rather than streamed from the backend
    #[serde(default)]
    pub artificial: bool,
}
