//! Provider registry
//!
//! Built once at startup from the credential bundle and the model table,
//! then treated as read-only. A backend whose credentials were incomplete
//! registers no factory and is simply unavailable.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use gateway_config::{
    AwsSecrets, GatewayConfig, ModelProfile, OpenAiSecrets, ProviderModelConfig, ProviderSecrets, VertexSecrets,
};

use crate::error::GatewayError;
use crate::provider::Provider;
use crate::provider::bedrock::BedrockProvider;
use crate::provider::openai::OpenAiProvider;
use crate::provider::vertex::{StaticToken, VertexProvider};

/// Backend identifier, the prefix of a `provider/model` composite name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions backend
    OpenAi,
    /// Vertex AI publisher-model backend
    Vertex,
    /// AWS Bedrock Converse backend
    Bedrock,
}

/// Credential slice held for one available backend
enum Factory {
    OpenAi(OpenAiSecrets),
    Vertex(VertexSecrets),
    Bedrock(AwsSecrets),
}

/// Read-only registry resolving composite names to adapter instances
pub struct ProviderRegistry {
    factories: HashMap<ProviderKind, Factory>,
    models: HashMap<String, ProviderModelConfig>,
}

impl ProviderRegistry {
    /// Build the registry from the credential bundle and model table
    #[must_use]
    pub fn from_secrets(secrets: ProviderSecrets, config: &GatewayConfig) -> Self {
        let mut factories = HashMap::new();
        if let Some(openai) = secrets.openai {
            factories.insert(ProviderKind::OpenAi, Factory::OpenAi(openai));
        }
        if let Some(vertex) = secrets.vertex {
            factories.insert(ProviderKind::Vertex, Factory::Vertex(vertex));
        }
        if let Some(aws) = secrets.aws {
            factories.insert(ProviderKind::Bedrock, Factory::Bedrock(aws));
        }

        let available: Vec<String> = factories.keys().map(ToString::to_string).collect();
        tracing::info!(backends = ?available, "provider registry constructed");

        Self {
            factories,
            models: config.models.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    /// Whether a backend registered a factory
    #[must_use]
    pub fn is_available(&self, kind: ProviderKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Resolve a `provider/model` composite name to an adapter
    ///
    /// Models absent from the configured table fall back to the composite's
    /// model part with a default profile.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] for a malformed composite or
    /// unknown backend prefix, and [`GatewayError::ServiceUnavailable`] for
    /// a backend with no registered factory.
    pub async fn resolve(&self, composite: &str) -> Result<Arc<dyn Provider>, GatewayError> {
        let Some((prefix, model_part)) = composite.split_once('/') else {
            return Err(GatewayError::InvalidRequest(format!(
                "model name {composite:?} is not a provider/model composite"
            )));
        };
        let kind = ProviderKind::from_str(prefix)
            .map_err(|_| GatewayError::InvalidRequest(format!("unknown provider {prefix:?}")))?;

        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| GatewayError::ServiceUnavailable(format!("no credentials for provider {kind}")))?;

        let (model, regions, profile) = self.models.get(composite).map_or_else(
            || (model_part.to_owned(), Vec::new(), ModelProfile::default()),
            |config| (config.model.clone(), config.regions.clone(), config.profile.clone()),
        );

        match factory {
            Factory::OpenAi(secrets) => {
                let provider = OpenAiProvider::new(
                    composite.to_owned(),
                    secrets.api_key.clone(),
                    secrets.base_url.as_ref().map(url::Url::as_str),
                    model,
                    profile,
                )?;
                Ok(Arc::new(provider))
            }
            Factory::Vertex(secrets) => Ok(Arc::new(VertexProvider::new(
                composite.to_owned(),
                secrets.project_id.clone(),
                secrets.location.clone(),
                model,
                profile,
                Arc::new(StaticToken::new(secrets.access_token.clone())),
            ))),
            Factory::Bedrock(secrets) => Ok(Arc::new(
                BedrockProvider::new(composite.to_owned(), secrets, &regions, model, profile).await,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openai_only_registry() -> ProviderRegistry {
        let secrets = ProviderSecrets {
            openai: Some(OpenAiSecrets {
                api_key: "sk-test".to_owned().into(),
                base_url: None,
            }),
            vertex: None,
            aws: None,
        };
        ProviderRegistry::from_secrets(secrets, &GatewayConfig::default())
    }

    #[test]
    fn incomplete_backends_register_no_factory() {
        let registry = openai_only_registry();
        assert!(registry.is_available(ProviderKind::OpenAi));
        assert!(!registry.is_available(ProviderKind::Bedrock));
        assert!(!registry.is_available(ProviderKind::Vertex));
    }

    #[tokio::test]
    async fn unavailable_backend_resolves_to_service_unavailable() {
        let registry = openai_only_registry();
        let result = registry.resolve("bedrock/anthropic.claude-sonnet").await;
        assert!(matches!(result, Err(GatewayError::ServiceUnavailable(_))));
    }

    #[tokio::test]
    async fn malformed_composite_is_invalid() {
        let registry = openai_only_registry();
        assert!(matches!(
            registry.resolve("gpt-test").await,
            Err(GatewayError::InvalidRequest(_))
        ));
        assert!(matches!(
            registry.resolve("acme/gpt-test").await,
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn unconfigured_model_falls_back_to_defaults() {
        let registry = openai_only_registry();
        let provider = registry.resolve("openai/gpt-test").await.expect("resolves");
        assert_eq!(provider.name(), "openai/gpt-test");
        assert!(provider.profile().supports_tools);
    }

    #[test]
    fn kind_parses_its_composite_prefix() {
        assert_eq!(ProviderKind::from_str("openai").expect("parses"), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::Bedrock.to_string(), "bedrock");
    }
}
