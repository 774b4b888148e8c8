//! Tool invocation loop
//!
//! An explicit loop with an accumulating turn value. Each round invokes the
//! model, executes any requested tool calls sequentially in call order, and
//! decides whether the model should see the results in a further round.
//! Validation failures are fed back to the model as tool text rather than
//! raised, so it can self-correct.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::provider::{InvokeOptions, Provider};
use crate::retry::invoke_with_continuation;
use crate::types::{
    CompletionRequest, CompletionResponse, Content, FinishReason, Message, Role, ToolCall, ToolDefinition, Usage,
};

/// Default cap on model round-trips within one turn
pub const DEFAULT_MAX_ROUNDS: u32 = 8;

/// Whether an executed tool wants the model to see its result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    /// Perform a follow-up round even if the model already produced content
    Want,
    /// A follow-up round adds nothing
    Unnecessary,
    /// Suppress the follow-up round regardless of what other tools want
    Prevent,
}

/// Result of one tool execution
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Payload fed back to the model as the tool's result
    pub result: serde_json::Value,
    /// Text surfaced to the end user directly, bypassing the model
    pub assistant_text: Option<String>,
    /// Follow-up preference; `None` defers to the other tools
    pub follow_up: Option<FollowUp>,
}

impl ToolOutcome {
    /// Outcome carrying only a result payload
    #[must_use]
    pub const fn new(result: serde_json::Value) -> Self {
        Self {
            result,
            assistant_text: None,
            follow_up: None,
        }
    }

    /// Attach direct assistant-facing text
    #[must_use]
    pub fn with_assistant_text(mut self, text: impl Into<String>) -> Self {
        self.assistant_text = Some(text.into());
        self
    }

    /// Attach a follow-up preference
    #[must_use]
    pub const fn with_follow_up(mut self, policy: FollowUp) -> Self {
        self.follow_up = Some(policy);
        self
    }
}

/// A callable tool registered with the loop
#[async_trait]
pub trait Tool: Send + Sync {
    /// Definition advertised to the model
    fn definition(&self) -> ToolDefinition;

    /// Execute with parsed JSON arguments
    ///
    /// # Errors
    ///
    /// A returned `Err` is a validation message, delivered to the model as
    /// the tool's textual result instead of failing the turn.
    async fn execute(&self, arguments: &serde_json::Value) -> Result<ToolOutcome, String>;

    /// Rewrite the settled turn after the loop finishes
    ///
    /// Runs once per registered tool in registration order, letting a tool
    /// drive a state transition orthogonal to conversation content.
    async fn epilogue(&self, outcome: TurnOutcome) -> TurnOutcome {
        outcome
    }
}

/// Accumulated result of one conversation turn
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    /// Final assistant-visible text
    pub content: Option<String>,
    /// Tool payloads collected across all rounds, in execution order
    pub payloads: Vec<serde_json::Value>,
    /// Usage summed over every round
    pub usage: Usage,
    /// Number of model invocations performed
    pub rounds: u32,
}

/// Knobs for one run of the loop
pub struct ToolLoopOptions {
    /// Model round-trip cap; exceeding it fails the turn
    pub max_rounds: u32,
    /// Length-continuation segment cap, passed to the controller
    pub max_segments: Option<u32>,
    /// Handler for tool calls naming no registered tool
    pub fallback: Option<Arc<dyn Tool>>,
}

impl Default for ToolLoopOptions {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_segments: None,
            fallback: None,
        }
    }
}

/// One executed call's contribution to the round
struct ExecutedCall {
    text: String,
    outcome: Option<ToolOutcome>,
}

/// Invoke the model, executing requested tools until the turn settles
///
/// Tool definitions are attached only when `tools` is non-empty. Each
/// round's calls run sequentially in the order the model gave them since
/// tool side effects are ordering-sensitive.
///
/// # Errors
///
/// Propagates adapter errors, and returns
/// [`GatewayError::ToolLoopExceeded`] when the model keeps requesting tools
/// past the round cap.
pub async fn invoke_with_tools(
    provider: &dyn Provider,
    request: &CompletionRequest,
    tools: &[Arc<dyn Tool>],
    options: &InvokeOptions,
    loop_options: &ToolLoopOptions,
) -> Result<TurnOutcome, GatewayError> {
    let mut working = request.clone();
    if tools.is_empty() {
        working.tools = None;
    } else {
        working.tools = Some(tools.iter().map(|t| t.definition()).collect());
    }

    let mut outcome = TurnOutcome::default();

    loop {
        if outcome.rounds >= loop_options.max_rounds {
            tracing::warn!(
                provider = provider.name(),
                max_rounds = loop_options.max_rounds,
                "tool loop exceeded round cap"
            );
            return Err(GatewayError::ToolLoopExceeded {
                max_rounds: loop_options.max_rounds,
            });
        }

        let response = invoke_with_continuation(provider, &working, options, loop_options.max_segments).await?;
        outcome.rounds += 1;

        let Some(response) = response else { break };
        if let Some(usage) = response.usage {
            outcome.usage = outcome.usage.merged_with(usage);
        }

        let calls = tool_calls_of(&response);
        let Some(calls) = calls else {
            outcome.content = response.first_choice().and_then(|c| c.message.content.clone());
            break;
        };

        let choice_content = response.first_choice().and_then(|c| c.message.content.clone());
        let mut executed: Vec<ExecutedCall> = Vec::with_capacity(calls.len());

        for call in &calls {
            executed.push(execute_call(call, tools, loop_options.fallback.as_deref()).await);
        }

        for call in &executed {
            if let Some(tool_outcome) = &call.outcome {
                outcome.payloads.push(tool_outcome.result.clone());
            }
        }

        let assistant_texts: Vec<&str> = executed
            .iter()
            .filter_map(|c| c.outcome.as_ref().and_then(|o| o.assistant_text.as_deref()))
            .collect();
        let joined = assistant_texts.join("\n");
        if !joined.is_empty() && choice_content.as_deref() != Some(joined.as_str()) {
            options.offer_chunk(Some(joined.clone()), true).await;
        }

        let go = should_follow_up(&executed, choice_content.is_some());

        if go {
            // Feed the results back: the assistant turn that made the calls,
            // then one tool turn per result
            working.messages.push(Message {
                role: Role::Assistant,
                content: Content::Text(choice_content.unwrap_or_default()),
                name: None,
                tool_calls: Some(calls.clone()),
                tool_call_id: None,
                attachments: None,
            });
            for (call, exec) in calls.iter().zip(&executed) {
                working
                    .messages
                    .push(Message::tool_result(call.id.clone(), exec.text.clone()));
            }
        } else {
            outcome.content = if joined.is_empty() { choice_content } else { Some(joined) };
            break;
        }
    }

    for tool in tools {
        outcome = tool.epilogue(outcome).await;
    }

    Ok(outcome)
}

fn tool_calls_of(response: &CompletionResponse) -> Option<Vec<ToolCall>> {
    let choice = response.first_choice()?;
    if choice.finish_reason != Some(FinishReason::ToolCalls) {
        return None;
    }
    choice.message.tool_calls.clone().filter(|calls| !calls.is_empty())
}

/// Execute one requested call
///
/// Parse failures, unknown tools, and validation failures all become tool
/// text the model can react to; none of them contribute a follow-up policy.
async fn execute_call(call: &ToolCall, tools: &[Arc<dyn Tool>], fallback: Option<&dyn Tool>) -> ExecutedCall {
    let arguments: serde_json::Value = match serde_json::from_str(&call.function.arguments) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(tool = %call.function.name, error = %e, "tool call arguments failed to parse");
            return ExecutedCall {
                text: format!("invalid tool arguments: {e}"),
                outcome: None,
            };
        }
    };

    let handler = tools
        .iter()
        .map(Arc::as_ref)
        .find(|t| t.definition().function.name == call.function.name)
        .or(fallback);

    let Some(handler) = handler else {
        tracing::debug!(tool = %call.function.name, "tool call names no registered tool");
        return ExecutedCall {
            text: format!("unknown tool: {}", call.function.name),
            outcome: None,
        };
    };

    match handler.execute(&arguments).await {
        Ok(outcome) => {
            let text = match &outcome.result {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            ExecutedCall {
                text,
                outcome: Some(outcome),
            }
        }
        Err(validation) => ExecutedCall {
            text: validation,
            outcome: None,
        },
    }
}

/// Combine per-tool preferences into one round-trip decision
fn should_follow_up(executed: &[ExecutedCall], has_content: bool) -> bool {
    let outcomes: Vec<&ToolOutcome> = executed.iter().filter_map(|c| c.outcome.as_ref()).collect();
    let policies: Vec<FollowUp> = outcomes.iter().filter_map(|o| o.follow_up).collect();

    if policies.contains(&FollowUp::Prevent) {
        return false;
    }
    // When every tool already spoke to the user directly there is nothing
    // left for the model to say
    if !outcomes.is_empty() && outcomes.iter().all(|o| o.assistant_text.is_some()) {
        return false;
    }
    if policies.contains(&FollowUp::Want) {
        return true;
    }
    if !outcomes.is_empty() && outcomes.len() == policies.len() && policies.iter().all(|p| *p == FollowUp::Unnecessary)
    {
        return false;
    }

    !has_content
}
