//! Vertex AI adapter speaking the publisher-model `generateContent` API

use std::sync::Arc;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use gateway_config::ModelProfile;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};

use super::{InvokeOptions, Provider, apply_and_offer, error_from_status, error_from_transport};
use crate::convert::vertex::{request_to_vertex, response_from_vertex, vertex_chunk_to_events};
use crate::error::GatewayError;
use crate::protocol::vertex::VertexStreamChunk;
use crate::stream::StreamState;
use crate::types::response::unix_timestamp;
use crate::types::{CompletionRequest, CompletionResponse};

/// Source of OAuth bearer tokens for Vertex calls
///
/// A trait seam so deployments can plug in metadata-server or
/// service-account token refresh without the adapter knowing.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    /// A currently valid bearer token
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ConnectionError`] when a token cannot be
    /// obtained.
    async fn token(&self) -> Result<String, GatewayError>;
}

/// Token source backed by a fixed pre-issued token
pub struct StaticToken(SecretString);

impl StaticToken {
    /// Wrap a pre-issued token
    #[must_use]
    pub const fn new(token: SecretString) -> Self {
        Self(token)
    }
}

#[async_trait::async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, GatewayError> {
        Ok(self.0.expose_secret().to_owned())
    }
}

/// Vertex AI backend adapter
pub struct VertexProvider {
    name: String,
    client: Client,
    project: String,
    location: String,
    model: String,
    profile: ModelProfile,
    tokens: Arc<dyn TokenSource>,
}

impl VertexProvider {
    /// Create an adapter for one configured model
    #[must_use]
    pub fn new(
        name: String,
        project: String,
        location: String,
        model: String,
        profile: ModelProfile,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            name,
            client: Client::new(),
            project,
            location,
            model,
            profile,
            tokens,
        }
    }

    fn endpoint(&self, stream: bool) -> String {
        let verb = if stream {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };
        format!(
            "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{model}:{verb}",
            location = self.location,
            project = self.project,
            model = self.model,
        )
    }
}

#[async_trait::async_trait]
impl Provider for VertexProvider {
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

        let stream = request.stream && (!request.has_tools() || self.profile.supports_streaming_tools);

        let wire = request_to_vertex(request, &self.profile, options.assets.as_deref());
        let token = self.tokens.token().await?;

        let response = self
            .client
            .post(self.endpoint(stream))
            .bearer_auth(token)
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
            let completion = response_from_vertex(wire_response, &request.model);
            if let Some(choice) = completion.first_choice() {
                options.offer_chunk(choice.message.content.clone(), false).await;
            }
            return Ok(Some(completion));
        }

        let mut events = response.bytes_stream().eventsource();
        let mut state = StreamState::new();
        let mut started = false;
        let mut tool_index: u32 = 0;

        loop {
            let event = tokio::select! {
                () = options.cancel.cancelled() => return Err(GatewayError::StreamAborted),
                event = events.next() => event,
            };
            let Some(event) = event else { break };
            let event = event.map_err(|e| GatewayError::ConnectionError(e.to_string()))?;

            let chunk: VertexStreamChunk = match serde_json::from_str(event.data.trim()) {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::debug!(provider = %self.name, error = %e, "skipping unparseable SSE chunk");
                    continue;
                }
            };

            for stream_event in vertex_chunk_to_events(&chunk, &mut started, &mut tool_index) {
                apply_and_offer(&mut state, stream_event, options).await;
            }
        }

        let usage = state.usage();
        Ok(state.into_choice().map(|choice| CompletionResponse {
            id: format!("vertex-{}", uuid::Uuid::new_v4()),
            created: unix_timestamp(),
            model: request.model.clone(),
            choices: vec![choice],
            usage,
        }))
    }
}
