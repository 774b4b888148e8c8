//! Provider trait and per-backend adapters

pub mod bedrock;
pub mod openai;
pub mod vertex;

use std::sync::Arc;

use async_trait::async_trait;
use gateway_config::ModelProfile;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::assets::AssetResolver;
use crate::error::GatewayError;
use crate::stream::StreamState;
use crate::types::{ChunkEvent, CompletionRequest, CompletionResponse, StreamEvent};

/// Per-invocation collaborators threaded through every adapter call
pub struct InvokeOptions {
    /// Identifier of the message being produced, stamped on chunk events
    pub message_id: String,
    /// Sink for normalized chunks; absent when the caller does not observe
    /// streaming
    pub chunks: Option<mpsc::Sender<ChunkEvent>>,
    /// Cancellation token created at the top of the conversation turn
    pub cancel: CancellationToken,
    /// Attachment resolver for this request
    pub assets: Option<Arc<AssetResolver>>,
}

impl InvokeOptions {
    /// Options with no sink, no resolver, and a fresh token
    #[must_use]
    pub fn new(message_id: String) -> Self {
        Self {
            message_id,
            chunks: None,
            cancel: CancellationToken::new(),
            assets: None,
        }
    }

    /// Attach a chunk sink
    #[must_use]
    pub fn with_chunks(mut self, chunks: mpsc::Sender<ChunkEvent>) -> Self {
        self.chunks = Some(chunks);
        self
    }

    /// Attach a cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Attach an asset resolver
    #[must_use]
    pub fn with_assets(mut self, assets: Arc<AssetResolver>) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Offer one chunk to the sink, if a sink is attached
    ///
    /// A full or closed sink drops the chunk rather than stalling the
    /// invocation.
    pub async fn offer_chunk(&self, content: Option<String>, artificial: bool) {
        if let Some(tx) = &self.chunks {
            let _ = tx
                .send(ChunkEvent {
                    message_id: self.message_id.clone(),
                    content,
                    artificial,
                })
                .await;
        }
    }
}

/// Trait implemented by each backend adapter
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name, used in logs
    fn name(&self) -> &str;

    /// Capability profile of the configured model
    fn profile(&self) -> &ModelProfile;

    /// Translate, invoke, and normalize one completion
    ///
    /// Returns `None` when the backend produced nothing assemblable (no
    /// role or finish reason ever arrived).
    ///
    /// # Errors
    ///
    /// Returns a canonical [`GatewayError`] mapped from the backend's
    /// native failure.
    async fn invoke(
        &self,
        request: &CompletionRequest,
        options: &InvokeOptions,
    ) -> Result<Option<CompletionResponse>, GatewayError>;
}

/// Fold one normalized event into the stream state and offer it to the sink
///
/// Every applied event reaches the sink, textless ones with no content, so
/// a consumer observes the full normalized flow rather than only visible
/// text.
pub(crate) async fn apply_and_offer(state: &mut StreamState, event: StreamEvent, options: &InvokeOptions) {
    let contributed = state.apply(event);
    options.offer_chunk(contributed, false).await;
}

/// Map an HTTP error status from a REST backend to the canonical taxonomy
pub(crate) fn error_from_status(provider: &str, status: reqwest::StatusCode, body: String) -> GatewayError {
    match status.as_u16() {
        429 => GatewayError::RateLimited,
        400 | 404 | 413 | 422 => GatewayError::InvalidRequest(body),
        500 => GatewayError::InternalProviderError(body),
        502 | 503 | 504 => GatewayError::ServiceUnavailable(body),
        code => {
            tracing::warn!(provider, status = code, "unmapped provider error status");
            GatewayError::Other(anyhow::anyhow!("provider returned {status}: {body}"))
        }
    }
}

/// Map a transport-level reqwest failure to the canonical taxonomy
pub(crate) fn error_from_transport(provider: &str, e: &reqwest::Error) -> GatewayError {
    if e.is_connect() || e.is_timeout() || e.is_request() {
        GatewayError::ConnectionError(e.to_string())
    } else {
        tracing::warn!(provider, error = %e, "unmapped transport error");
        GatewayError::Other(anyhow::anyhow!("transport error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinishReason, StreamDelta};

    #[tokio::test]
    async fn textless_events_still_reach_the_sink() {
        let (tx, mut rx) = mpsc::channel(8);
        let options = InvokeOptions::new("msg-1".to_owned()).with_chunks(tx);
        let mut state = StreamState::new();

        apply_and_offer(
            &mut state,
            StreamEvent::Start {
                role: "assistant".to_owned(),
            },
            &options,
        )
        .await;
        apply_and_offer(
            &mut state,
            StreamEvent::Delta(StreamDelta {
                content: Some("Hi".to_owned()),
                ..StreamDelta::default()
            }),
            &options,
        )
        .await;
        apply_and_offer(
            &mut state,
            StreamEvent::MessageStop {
                finish_reason: FinishReason::Stop,
            },
            &options,
        )
        .await;
        drop(options);

        let mut contents = Vec::new();
        while let Some(chunk) = rx.recv().await {
            assert_eq!(chunk.message_id, "msg-1");
            contents.push(chunk.content);
        }
        assert_eq!(contents, vec![None, Some("Hi".to_owned()), None]);
    }

    #[test]
    fn status_mapping_covers_canonical_kinds() {
        assert!(matches!(
            error_from_status("test", reqwest::StatusCode::TOO_MANY_REQUESTS, String::new()),
            GatewayError::RateLimited
        ));
        assert!(matches!(
            error_from_status("test", reqwest::StatusCode::BAD_REQUEST, String::new()),
            GatewayError::InvalidRequest(_)
        ));
        assert!(matches!(
            error_from_status("test", reqwest::StatusCode::SERVICE_UNAVAILABLE, String::new()),
            GatewayError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            error_from_status("test", reqwest::StatusCode::INTERNAL_SERVER_ERROR, String::new()),
            GatewayError::InternalProviderError(_)
        ));
        assert!(matches!(
            error_from_status("test", reqwest::StatusCode::IM_A_TEAPOT, String::new()),
            GatewayError::Other(_)
        ));
    }
}
