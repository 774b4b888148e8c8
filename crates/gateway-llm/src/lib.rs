//! Unified completion layer over multiple LLM backends
//!
//! Translates a canonical request/response model to and from each backend's
//! native wire format (`OpenAI`-compatible, Vertex AI, AWS Bedrock), with
//! stream assembly, transient retry, length continuation, attachment
//! resolution, and an explicit tool-invocation loop on top.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod assets;
pub mod convert;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod stream;
pub mod tokenizer;
pub mod types;

pub use error::GatewayError;
pub use orchestrator::{FollowUp, Tool, ToolLoopOptions, ToolOutcome, TurnOutcome, invoke_with_tools};
pub use provider::{InvokeOptions, Provider};
pub use registry::{ProviderKind, ProviderRegistry};
pub use retry::invoke_with_continuation;
pub use stream::StreamState;
pub use types::{ChunkEvent, CompletionRequest, CompletionResponse, Message, StreamEvent};
