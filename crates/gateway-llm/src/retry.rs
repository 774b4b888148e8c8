//! Transient retry and truncation-aware continuation
//!
//! Two independent mechanisms: exponential-backoff retry around one adapter
//! call, and a "continue where you left off" loop engaged when a response is
//! truncated by length and the backend supports assistant prefill.

use std::future::Future;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::provider::{InvokeOptions, Provider};
use crate::tokenizer::{self, count_request_tokens};
use crate::types::{CompletionRequest, CompletionResponse, Content, FinishReason, Message, Role, Usage};

/// Total attempts including the first
pub const MAX_ATTEMPTS: u32 = 5;

const BASE_DELAY_MS: u64 = 1_000;
const MAX_DELAY_MS: u64 = 30_000;
const JITTER_MS: u64 = 1_000;

/// Retry a transient-failing operation with exponential backoff
///
/// Backoff doubles from one second, capped at thirty, plus up to a second
/// of jitter. Only transient errors are re-attempted; the last error is
/// re-raised after the attempts are exhausted. Cancellation interrupts the
/// backoff sleep and surfaces as [`GatewayError::StreamAborted`].
///
/// # Errors
///
/// Propagates the operation's error once attempts are exhausted or the
/// error is not transient.
pub async fn retry_with_backoff<T, F, Fut>(cancel: &CancellationToken, mut op: F) -> Result<T, GatewayError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt: u32 = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                let exponential = BASE_DELAY_MS.saturating_mul(1 << (attempt - 1)).min(MAX_DELAY_MS);
                let jitter = rand::rng().random_range(0..JITTER_MS);
                let delay_ms = exponential + jitter;
                let delay = std::time::Duration::from_millis(delay_ms);

                tracing::debug!(attempt, delay_ms, error = %e, "transient provider error, backing off");

                tokio::select! {
                    () = cancel.cancelled() => return Err(GatewayError::StreamAborted),
                    () = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Invoke with transient retry and, when truncated, length continuation
///
/// Continuation only engages when the model profile supports assistant
/// prefill. Each segment's partial text is appended (or amended onto a
/// trailing assistant turn) as a prefill and the request re-issued; text is
/// concatenated and usage summed element-wise across segments. The loop
/// stops on a non-`length` finish reason, when the input-token budget would
/// be exceeded, or after `max_segments` segments.
///
/// # Errors
///
/// Propagates adapter errors after the retry policy is exhausted.
pub async fn invoke_with_continuation(
    provider: &dyn Provider,
    request: &CompletionRequest,
    options: &InvokeOptions,
    max_segments: Option<u32>,
) -> Result<Option<CompletionResponse>, GatewayError> {
    let response = retry_with_backoff(&options.cancel, |_| provider.invoke(request, options)).await?;

    let profile = provider.profile();
    if !profile.supports_assistant_prefill {
        return Ok(response);
    }
    let Some(mut merged) = response else {
        return Ok(None);
    };

    let counter = tokenizer::counter_for(profile.tokenizer);
    let mut working = request.clone();
    let mut segments: u32 = 1;

    while merged.finish_reason() == Some(FinishReason::Length) {
        if max_segments.is_some_and(|cap| segments >= cap) {
            tracing::debug!(segments, "continuation segment cap reached");
            break;
        }

        let accumulated = merged
            .first_choice()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        // Amend a trailing assistant turn, else append the prefill
        match working.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => {
                last.content = Content::Text(accumulated);
            }
            _ => working.messages.push(Message::assistant(accumulated)),
        }

        if let Some(budget) = profile.max_input_tokens {
            let prompt_tokens = count_request_tokens(counter.as_ref(), &working);
            if prompt_tokens >= budget as usize {
                tracing::debug!(prompt_tokens, budget, "input-token budget reached, stopping continuation");
                break;
            }
        }

        let next = retry_with_backoff(&options.cancel, |_| provider.invoke(&working, options)).await?;
        let Some(next) = next else { break };

        merged = merge_segments(merged, next);
        segments += 1;
    }

    Ok(Some(merged))
}

/// Concatenate a continuation segment onto the response assembled so far
fn merge_segments(base: CompletionResponse, next: CompletionResponse) -> CompletionResponse {
    let usage = match (base.usage, next.usage) {
        (Some(a), Some(b)) => Some(a.merged_with(b)),
        (a, b) => a.or(b),
    };

    let mut choices = base.choices;
    if let (Some(merged), Some(segment)) = (choices.first_mut(), next.choices.into_iter().next()) {
        let mut content = merged.message.content.take().unwrap_or_default();
        content.push_str(segment.message.content.as_deref().unwrap_or_default());
        merged.message.content = Some(content);
        merged.message.tool_calls = segment.message.tool_calls;
        merged.finish_reason = segment.finish_reason;
    }

    CompletionResponse {
        id: base.id,
        created: base.created,
        model: base.model,
        choices,
        usage,
    }
}

/// Sum usages element-wise, treating absent values as zero
#[must_use]
pub fn aggregate_usage(usages: &[Usage]) -> Usage {
    usages.iter().copied().fold(Usage::default(), Usage::merged_with)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::types::{Choice, ChoiceMessage};

    fn response(text: &str, finish: FinishReason, usage: Usage) -> CompletionResponse {
        CompletionResponse {
            id: "resp-1".to_owned(),
            created: 0,
            model: "test/model".to_owned(),
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage::text(text.to_owned()),
                finish_reason: Some(finish),
                logprobs: None,
            }],
            usage: Some(usage),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn four_failures_then_success_invokes_five_times() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let counted = Arc::clone(&calls);
        let result = retry_with_backoff(&cancel, move |_| {
            let calls = Arc::clone(&counted);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 5 {
                    Err(GatewayError::ServiceUnavailable("overloaded".to_owned()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn five_failures_raise_the_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let counted = Arc::clone(&calls);
        let result: Result<u32, _> = retry_with_backoff(&cancel, move |_| {
            let calls = Arc::clone(&counted);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::RateLimited)
            }
        })
        .await;

        assert!(matches!(result, Err(GatewayError::RateLimited)));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn non_transient_errors_propagate_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let counted = Arc::clone(&calls);
        let result: Result<u32, _> = retry_with_backoff(&cancel, move |_| {
            let calls = Arc::clone(&counted);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::InvalidRequest("bad schema".to_owned()))
            }
        })
        .await;

        assert!(matches!(result, Err(GatewayError::InvalidRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn merged_segments_concatenate_text_and_sum_usage() {
        let first = response(
            "Hel",
            FinishReason::Length,
            Usage {
                prompt_tokens: 10,
                completion_tokens: 2,
                total_tokens: 12,
            },
        );
        let second = response(
            "lo",
            FinishReason::Stop,
            Usage {
                prompt_tokens: 12,
                completion_tokens: 1,
                total_tokens: 13,
            },
        );

        let merged = merge_segments(first, second);
        let choice = merged.first_choice().expect("choice");
        assert_eq!(choice.message.content.as_deref(), Some("Hello"));
        assert_eq!(choice.finish_reason, Some(FinishReason::Stop));
        assert_eq!(
            merged.usage,
            Some(Usage {
                prompt_tokens: 22,
                completion_tokens: 3,
                total_tokens: 25,
            })
        );
    }
}
