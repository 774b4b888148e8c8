//! Attachment resolution for messages referencing stored binaries
//!
//! Each distinct source URL is resolved once per request into the form the
//! target backend accepts; the four strategy groups resolve concurrently
//! and the URL strategy batches signing per storage bucket.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use gateway_config::AttachmentEncoding;

use crate::error::GatewayError;
use crate::types::{AssetRef, ContentPart, ImageUrl, Message};

/// Attachment classification derived from the MIME type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// Raster image
    Image,
    /// Everything else (PDFs, spreadsheets, plain text)
    Document,
}

/// Classify an attachment by MIME type
#[must_use]
pub fn classify(mime_type: &str) -> AssetKind {
    if mime_type.starts_with("image/") {
        AssetKind::Image
    } else {
        AssetKind::Document
    }
}

/// Resolved destination for one attachment
#[derive(Debug, Clone)]
pub enum ResolvedAsset {
    /// Signed remote URL the backend fetches itself
    Url(String),
    /// Raw bytes for backends that take binary blocks natively
    Binary {
        /// Attachment bytes
        bytes: Vec<u8>,
        /// MIME type of the bytes
        mime_type: String,
    },
    /// base64 data URL for inline transport
    DataUrl(String),
    /// Extracted text substituted for the attachment
    Text(String),
}

/// Fetch seam for attachment storage
///
/// Kept behind a trait so tests can count fetches with a mock.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Sign a batch of paths within one bucket, returning URLs in order
    async fn sign_urls(&self, bucket: &str, paths: &[String]) -> Result<Vec<String>, GatewayError>;

    /// Download an attachment's bytes
    async fn fetch_binary(&self, asset: &AssetRef) -> Result<Vec<u8>, GatewayError>;

    /// Extract an attachment's text
    async fn fetch_text(&self, asset: &AssetRef) -> Result<String, GatewayError>;
}

/// Per-request attachment resolver with a source-URL cache
pub struct AssetResolver {
    fetcher: Arc<dyn AssetFetcher>,
    image_encoding: Option<AttachmentEncoding>,
    document_encoding: Option<AttachmentEncoding>,
    cache: Mutex<HashMap<String, ResolvedAsset>>,
}

impl AssetResolver {
    /// Create a resolver for one request
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn AssetFetcher>,
        image_encoding: Option<AttachmentEncoding>,
        document_encoding: Option<AttachmentEncoding>,
    ) -> Self {
        Self {
            fetcher,
            image_encoding,
            document_encoding,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Encoding the target backend requires for this attachment kind
    const fn encoding_for(&self, kind: AssetKind) -> Option<AttachmentEncoding> {
        match kind {
            AssetKind::Image => self.image_encoding,
            AssetKind::Document => self.document_encoding,
        }
    }

    /// Resolve every attachment referenced by `messages`
    ///
    /// Strategy groups run concurrently; a failure for one attachment is
    /// logged and that attachment stays unresolved (and is later omitted).
    pub async fn resolve_all(&self, messages: &[Message]) {
        let mut seen: HashSet<String> = HashSet::new();
        let mut url_buckets: HashMap<String, Vec<AssetRef>> = HashMap::new();
        let mut binary_refs: Vec<AssetRef> = Vec::new();
        let mut base64_refs: Vec<AssetRef> = Vec::new();
        let mut text_refs: Vec<AssetRef> = Vec::new();

        {
            let cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            for asset in messages.iter().filter_map(|m| m.attachments.as_ref()).flatten() {
                if cache.contains_key(&asset.url) || !seen.insert(asset.url.clone()) {
                    continue;
                }
                let Some(encoding) = self.encoding_for(classify(&asset.mime_type)) else {
                    tracing::debug!(url = %asset.url, mime = %asset.mime_type, "attachment kind unsupported by model, omitting");
                    continue;
                };
                match encoding {
                    AttachmentEncoding::Url => url_buckets.entry(asset.bucket.clone()).or_default().push(asset.clone()),
                    AttachmentEncoding::Binary => binary_refs.push(asset.clone()),
                    AttachmentEncoding::Base64 => base64_refs.push(asset.clone()),
                    AttachmentEncoding::Text => text_refs.push(asset.clone()),
                }
            }
        }

        let (urls, binaries, base64s, texts) = tokio::join!(
            self.resolve_url_group(url_buckets),
            self.resolve_binary_group(binary_refs),
            self.resolve_base64_group(base64_refs),
            self.resolve_text_group(text_refs),
        );

        let mut cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for (url, resolved) in urls.into_iter().chain(binaries).chain(base64s).chain(texts) {
            cache.insert(url, resolved);
        }
    }

    async fn resolve_url_group(&self, buckets: HashMap<String, Vec<AssetRef>>) -> Vec<(String, ResolvedAsset)> {
        let mut resolved = Vec::new();
        for (bucket, assets) in buckets {
            let paths: Vec<String> = assets.iter().map(|a| a.path.clone()).collect();
            match self.fetcher.sign_urls(&bucket, &paths).await {
                Ok(signed) => {
                    for (asset, url) in assets.iter().zip(signed) {
                        resolved.push((asset.url.clone(), ResolvedAsset::Url(url)));
                    }
                }
                Err(e) => {
                    tracing::warn!(bucket = %bucket, error = %e, "failed to sign attachment URLs, omitting batch");
                }
            }
        }
        resolved
    }

    async fn resolve_binary_group(&self, assets: Vec<AssetRef>) -> Vec<(String, ResolvedAsset)> {
        let mut resolved = Vec::new();
        for asset in assets {
            match self.fetcher.fetch_binary(&asset).await {
                Ok(bytes) => resolved.push((
                    asset.url.clone(),
                    ResolvedAsset::Binary {
                        bytes,
                        mime_type: asset.mime_type.clone(),
                    },
                )),
                Err(e) => {
                    tracing::warn!(url = %asset.url, error = %e, "failed to fetch attachment, omitting");
                }
            }
        }
        resolved
    }

    async fn resolve_base64_group(&self, assets: Vec<AssetRef>) -> Vec<(String, ResolvedAsset)> {
        let mut resolved = Vec::new();
        for asset in assets {
            match self.fetcher.fetch_binary(&asset).await {
                Ok(bytes) => {
                    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                    let data_url = format!("data:{};base64,{encoded}", asset.mime_type);
                    resolved.push((asset.url.clone(), ResolvedAsset::DataUrl(data_url)));
                }
                Err(e) => {
                    tracing::warn!(url = %asset.url, error = %e, "failed to fetch attachment, omitting");
                }
            }
        }
        resolved
    }

    async fn resolve_text_group(&self, assets: Vec<AssetRef>) -> Vec<(String, ResolvedAsset)> {
        let mut resolved = Vec::new();
        for asset in assets {
            match self.fetcher.fetch_text(&asset).await {
                Ok(text) => resolved.push((asset.url.clone(), ResolvedAsset::Text(text))),
                Err(e) => {
                    tracing::warn!(url = %asset.url, error = %e, "failed to extract attachment text, omitting");
                }
            }
        }
        resolved
    }

    /// Resolved form of an attachment, if resolution succeeded
    #[must_use]
    pub fn resolved(&self, url: &str) -> Option<ResolvedAsset> {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(url)
            .cloned()
    }

    /// Rewrite a private asset URL to its resolved destination
    ///
    /// URLs with no cached resolution pass through unchanged.
    #[must_use]
    pub fn adjust_url(&self, url: &str) -> String {
        match self.resolved(url) {
            Some(ResolvedAsset::Url(signed)) => signed,
            Some(ResolvedAsset::DataUrl(data)) => data,
            _ => url.to_owned(),
        }
    }

    /// Content parts carrying an attachment on a text-or-URL wire
    ///
    /// Unresolved attachments yield nothing and are omitted from the
    /// outgoing message. Binary resolutions are re-encoded as data URLs
    /// here; backends with native binary blocks read [`Self::resolved`]
    /// directly instead.
    #[must_use]
    pub fn content_parts_for(&self, asset: &AssetRef) -> Vec<ContentPart> {
        match self.resolved(&asset.url) {
            Some(ResolvedAsset::Url(url)) => vec![ContentPart::ImageUrl {
                image_url: ImageUrl { url },
            }],
            Some(ResolvedAsset::DataUrl(url)) => vec![ContentPart::ImageUrl {
                image_url: ImageUrl { url },
            }],
            Some(ResolvedAsset::Binary { bytes, mime_type }) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                vec![ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:{mime_type};base64,{encoded}"),
                    },
                }]
            }
            Some(ResolvedAsset::Text(text)) => vec![ContentPart::Text { text }],
            None => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::types::{Content, Role};

    struct CountingFetcher {
        binary_calls: AtomicUsize,
        sign_calls: AtomicUsize,
    }

    impl CountingFetcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                binary_calls: AtomicUsize::new(0),
                sign_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AssetFetcher for CountingFetcher {
        async fn sign_urls(&self, _bucket: &str, paths: &[String]) -> Result<Vec<String>, GatewayError> {
            self.sign_calls.fetch_add(1, Ordering::SeqCst);
            Ok(paths.iter().map(|p| format!("https://signed.example/{p}")).collect())
        }

        async fn fetch_binary(&self, _asset: &AssetRef) -> Result<Vec<u8>, GatewayError> {
            self.binary_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1, 2, 3])
        }

        async fn fetch_text(&self, _asset: &AssetRef) -> Result<String, GatewayError> {
            Ok("extracted".to_owned())
        }
    }

    fn image_asset(url: &str) -> AssetRef {
        AssetRef {
            bucket: "media".to_owned(),
            path: "photo.png".to_owned(),
            url: url.to_owned(),
            mime_type: "image/png".to_owned(),
        }
    }

    fn message_with(asset: AssetRef) -> Message {
        Message {
            role: Role::User,
            content: Content::Text("look at this".to_owned()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
            attachments: Some(vec![asset]),
        }
    }

    #[tokio::test]
    async fn repeated_references_fetch_once() {
        let fetcher = CountingFetcher::new();
        let resolver = AssetResolver::new(fetcher.clone(), Some(AttachmentEncoding::Base64), None);

        let messages = vec![
            message_with(image_asset("asset://media/photo.png")),
            message_with(image_asset("asset://media/photo.png")),
        ];

        resolver.resolve_all(&messages).await;
        resolver.resolve_all(&messages).await;

        assert_eq!(fetcher.binary_calls.load(Ordering::SeqCst), 1);
        assert!(resolver.resolved("asset://media/photo.png").is_some());
    }

    #[tokio::test]
    async fn url_strategy_batches_per_bucket() {
        let fetcher = CountingFetcher::new();
        let resolver = AssetResolver::new(fetcher.clone(), Some(AttachmentEncoding::Url), None);

        let mut a = image_asset("asset://media/a.png");
        a.path = "a.png".to_owned();
        let mut b = image_asset("asset://media/b.png");
        b.path = "b.png".to_owned();

        resolver.resolve_all(&[message_with(a), message_with(b)]).await;

        assert_eq!(fetcher.sign_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            resolver.adjust_url("asset://media/a.png"),
            "https://signed.example/a.png"
        );
    }

    #[tokio::test]
    async fn unsupported_kind_is_omitted() {
        let fetcher = CountingFetcher::new();
        let resolver = AssetResolver::new(fetcher.clone(), Some(AttachmentEncoding::Url), None);

        let mut doc = image_asset("asset://media/report.pdf");
        doc.mime_type = "application/pdf".to_owned();

        resolver.resolve_all(&[message_with(doc.clone())]).await;

        assert!(resolver.resolved("asset://media/report.pdf").is_none());
        assert!(resolver.content_parts_for(&doc).is_empty());
    }

    #[test]
    fn mime_classification() {
        assert_eq!(classify("image/jpeg"), AssetKind::Image);
        assert_eq!(classify("application/pdf"), AssetKind::Document);
        assert_eq!(classify("text/plain"), AssetKind::Document);
    }
}
