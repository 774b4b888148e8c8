use indexmap::IndexMap;
use serde::Deserialize;

/// Top-level gateway configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Model configurations keyed by `provider/model` composite name
    #[serde(default)]
    pub models: IndexMap<String, ProviderModelConfig>,
}

/// Configuration for one model on one backend
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderModelConfig {
    /// Backend-native model identifier
    pub model: String,
    /// Candidate regions for region-steered backends (Bedrock)
    #[serde(default)]
    pub regions: Vec<String>,
    /// Capability profile
    #[serde(default)]
    pub profile: ModelProfile,
}

/// What a configured model can do
///
/// Adapters consult the profile instead of probing the backend; a wrong flag
/// degrades to a rejected request, never to silent misbehavior.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelProfile {
    /// Whether the model accepts tool definitions
    #[serde(default = "default_true")]
    pub supports_tools: bool,
    /// Whether the model accepts a tool-choice policy
    #[serde(default = "default_true")]
    pub supports_tool_choice: bool,
    /// Whether the model accepts a named (forced) tool choice
    #[serde(default)]
    pub supports_named_tool_choice: bool,
    /// Whether the model can stream when tools are attached
    #[serde(default = "default_true")]
    pub supports_streaming_tools: bool,
    /// Whether the model continues a trailing assistant turn (prefill)
    #[serde(default)]
    pub supports_assistant_prefill: bool,
    /// Whether the model accepts a temperature parameter
    #[serde(default = "default_true")]
    pub supports_temperature: bool,
    /// How image attachments must be encoded, if supported at all
    #[serde(default)]
    pub image_encoding: Option<AttachmentEncoding>,
    /// How document attachments must be encoded, if supported at all
    #[serde(default)]
    pub document_encoding: Option<AttachmentEncoding>,
    /// Input-token budget used by the continuation controller
    #[serde(default)]
    pub max_input_tokens: Option<u32>,
    /// Tokenizer used for budget decisions
    #[serde(default)]
    pub tokenizer: TokenizerKind,
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self {
            supports_tools: true,
            supports_tool_choice: true,
            supports_named_tool_choice: false,
            supports_streaming_tools: true,
            supports_assistant_prefill: false,
            supports_temperature: true,
            image_encoding: None,
            document_encoding: None,
            max_input_tokens: None,
            tokenizer: TokenizerKind::default(),
        }
    }
}

/// Encoding a backend requires for an attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentEncoding {
    /// Remote URL the backend fetches itself
    Url,
    /// Raw bytes inlined into the payload
    Binary,
    /// base64 data URL inlined into the payload
    Base64,
    /// Extracted text substituted for the attachment
    Text,
}

/// Tokenizer used for budget decisions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    /// Cheap character-count estimate
    #[default]
    Estimate,
    /// Exact BPE count via tiktoken
    Tiktoken,
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_defaults_are_permissive_except_prefill() {
        let profile = ModelProfile::default();
        assert!(profile.supports_tools);
        assert!(profile.supports_streaming_tools);
        assert!(!profile.supports_assistant_prefill);
        assert!(profile.image_encoding.is_none());
    }

    #[test]
    fn model_config_deserializes_with_partial_profile() {
        let config: ProviderModelConfig = serde_json::from_str(
            r#"{
                "model": "anthropic.claude-sonnet",
                "regions": ["us-east-1", "us-west-2"],
                "profile": { "supports_assistant_prefill": true, "image_encoding": "binary" }
            }"#,
        )
        .expect("valid config");

        assert_eq!(config.regions.len(), 2);
        assert!(config.profile.supports_assistant_prefill);
        assert_eq!(config.profile.image_encoding, Some(AttachmentEncoding::Binary));
        assert!(config.profile.supports_temperature);
    }
}
