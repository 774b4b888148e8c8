//! Canonical types for request/response representation
//!
//! These types are backend-agnostic and serve as the normalized contract
//! every adapter translates to and from.

pub mod message;
pub mod request;
pub mod response;
pub mod stream;
pub mod tool;

pub use message::{AssetRef, Content, ContentPart, FunctionCall, ImageUrl, Message, Role, ToolCall};
pub use request::{CompletionParams, CompletionRequest, StopSequences};
pub use response::{Choice, ChoiceMessage, CompletionResponse, FinishReason, Usage};
pub use stream::{ChunkEvent, StreamDelta, StreamEvent, StreamFunctionCall, StreamToolCall};
pub use tool::{
    FunctionDefinition, ToolChoice, ToolChoiceFunction, ToolChoiceFunctionName, ToolChoiceMode, ToolDefinition,
    sanitize_tool_name,
};
