//! Credential and model configuration for the provider gateway
//!
//! Secrets are loaded once at process start; model profiles describe what a
//! configured model can do so adapters never have to guess.

pub mod model;
pub mod secrets;

pub use model::{AttachmentEncoding, GatewayConfig, ModelProfile, ProviderModelConfig, TokenizerKind};
pub use secrets::{AwsSecrets, OpenAiSecrets, ProviderSecrets, VertexSecrets};
