//! Token counting for budget decisions

use gateway_config::TokenizerKind;

use crate::types::CompletionRequest;

/// Per-message framing overhead in the chat prompt format
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Counts tokens for a block of text
pub trait TokenCounter: Send + Sync {
    /// Number of tokens in `text`
    fn count(&self, text: &str) -> usize;
}

/// Cheap character-count estimate (about four characters per token)
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimationTokenizer;

impl TokenCounter for EstimationTokenizer {
    fn count(&self, text: &str) -> usize {
        text.len().div_ceil(4)
    }
}

/// Exact BPE count backed by tiktoken
pub struct TiktokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

impl TiktokenCounter {
    /// Create a counter using the `o200k_base` encoding
    ///
    /// Falls back to the estimation tokenizer at the call site when the
    /// encoding tables cannot be loaded.
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            bpe: tiktoken_rs::o200k_base()?,
        })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Build the counter a model profile asks for
#[must_use]
pub fn counter_for(kind: TokenizerKind) -> Box<dyn TokenCounter> {
    match kind {
        TokenizerKind::Estimate => Box::new(EstimationTokenizer),
        TokenizerKind::Tiktoken => TiktokenCounter::new().map_or_else(
            |e| {
                tracing::warn!(error = %e, "tiktoken unavailable, falling back to estimation");
                Box::new(EstimationTokenizer) as Box<dyn TokenCounter>
            },
            |c| Box::new(c) as Box<dyn TokenCounter>,
        ),
    }
}

/// Count the tokens a request's messages will consume as a prompt
#[must_use]
pub fn count_request_tokens(counter: &dyn TokenCounter, request: &CompletionRequest) -> usize {
    request
        .messages
        .iter()
        .map(|m| counter.count(&m.content.as_text()) + MESSAGE_OVERHEAD_TOKENS)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[test]
    fn estimation_rounds_up() {
        let counter = EstimationTokenizer;
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("abc"), 1);
        assert_eq!(counter.count("abcd"), 1);
        assert_eq!(counter.count("abcde"), 2);
    }

    #[test]
    fn request_count_includes_per_message_overhead() {
        let request = CompletionRequest::new(
            "test/model".to_owned(),
            vec![
                Message::user("abcd".to_owned()),
                Message::assistant("efgh".to_owned()),
            ],
        );
        let counter = EstimationTokenizer;
        assert_eq!(count_request_tokens(&counter, &request), 2 + 2 * MESSAGE_OVERHEAD_TOKENS);
    }
}
