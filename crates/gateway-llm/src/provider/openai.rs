//! OpenAI-compatible adapter speaking the chat completions API

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use gateway_config::ModelProfile;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{InvokeOptions, Provider, apply_and_offer, error_from_status, error_from_transport};
use crate::convert::openai::{openai_chunk_to_events, request_to_openai, response_from_openai};
use crate::error::GatewayError;
use crate::protocol::openai::{OpenAiStreamChunk, OpenAiStreamOptions};
use crate::stream::StreamState;
use crate::types::response::unix_timestamp;
use crate::types::{CompletionRequest, CompletionResponse};

/// Default `OpenAI` API base URL
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Whether the base URL is the canonical `OpenAI` API rather than a
/// compatible third party
fn is_canonical_openai(base_url: &Url) -> bool {
    base_url.host_str().is_some_and(|h| h == "api.openai.com")
}

/// OpenAI-compatible backend adapter
pub struct OpenAiProvider {
    name: String,
    client: Client,
    base_url: Url,
    api_key: SecretString,
    model: String,
    profile: ModelProfile,
}

impl OpenAiProvider {
    /// Create an adapter for one configured model
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] when the base URL does not
    /// parse.
    pub fn new(
        name: String,
        api_key: SecretString,
        base_url: Option<&str>,
        model: String,
        profile: ModelProfile,
    ) -> Result<Self, GatewayError> {
        let base_url = Url::parse(base_url.unwrap_or(DEFAULT_BASE_URL))
            .map_err(|e| GatewayError::InvalidRequest(format!("invalid base URL: {e}")))?;

        Ok(Self {
            name,
            client: Client::new(),
            base_url,
            api_key,
            model,
            profile,
        })
    }

    fn completions_url(&self) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/chat/completions")
    }
}

#[async_trait::async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    async fn invoke(
        &self,
        request: &CompletionRequest,
        options: &InvokeOptions,
    ) -> Result<Option<CompletionResponse>, GatewayError> {
        if let Some(assets) = &options.assets {
            assets.resolve_all(&request.messages).await;
        }

        // Streaming with tools attached is withheld from models that
        // cannot interleave the two
        let stream = request.stream && (!request.has_tools() || self.profile.supports_streaming_tools);

        let mut wire = request_to_openai(request, &self.profile, options.assets.as_deref());
        wire.model = self.model.clone();
        wire.stream = if stream { Some(true) } else { None };
        if stream && is_canonical_openai(&self.base_url) {
            wire.stream_options = Some(OpenAiStreamOptions { include_usage: true });
        }

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(self.api_key.expose_secret())
            .json(&wire)
            .send()
            .await
            .map_err(|e| error_from_transport(&self.name, &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_status(&self.name, status, body));
        }

        if !stream {
            let wire_response = response
                .json()
                .await
                .map_err(|e| GatewayError::InternalProviderError(format!("failed to parse response: {e}")))?;
            let completion = response_from_openai(wire_response);
            if let Some(choice) = completion.first_choice() {
                options.offer_chunk(choice.message.content.clone(), false).await;
            }
            return Ok(Some(completion));
        }

        let mut events = response.bytes_stream().eventsource();
        let mut state = StreamState::new();
        let mut id: Option<String> = None;
        let mut created: Option<u64> = None;

        while !state.is_closed() || state.usage().is_none() {
            let event = tokio::select! {
                () = options.cancel.cancelled() => return Err(GatewayError::StreamAborted),
                event = events.next() => event,
            };
            let Some(event) = event else { break };
            let event = event.map_err(|e| GatewayError::ConnectionError(e.to_string()))?;

            let data = event.data.trim();
            if data == "[DONE]" {
                break;
            }

            let chunk: OpenAiStreamChunk = match serde_json::from_str(data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::debug!(provider = %self.name, error = %e, "skipping unparseable SSE chunk");
                    continue;
                }
            };
            id.get_or_insert_with(|| chunk.id.clone());
            created.get_or_insert(chunk.created);

            for stream_event in openai_chunk_to_events(&chunk) {
                apply_and_offer(&mut state, stream_event, options).await;
            }
        }

        let usage = state.usage();
        Ok(state.into_choice().map(|choice| CompletionResponse {
            id: id.unwrap_or_else(|| format!("openai-{}", uuid::Uuid::new_v4())),
            created: created.unwrap_or_else(unix_timestamp),
            model: request.model.clone(),
            choices: vec![choice],
            usage,
        }))
    }
}
