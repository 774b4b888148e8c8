//! Stream-state assembly shared by every adapter
//!
//! Folds successive normalized chunks into a running state and finally into
//! a canonical choice. A choice is only assemblable once both the role and
//! the finish reason are known; until then the state yields nothing.

use std::collections::BTreeMap;

use crate::types::{Choice, ChoiceMessage, FinishReason, FunctionCall, StreamEvent, ToolCall, Usage};

/// Tool call accumulating across delta chunks, keyed by content index
#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl PartialToolCall {
    fn finalize(self) -> Option<ToolCall> {
        Some(ToolCall {
            id: self.id?,
            function: FunctionCall {
                name: self.name?,
                arguments: self.arguments,
            },
        })
    }
}

/// Mutable per-invocation assembly state
#[derive(Debug, Default)]
pub struct StreamState {
    /// Whether the stream is still open (no message-stop folded in yet)
    open: bool,
    text: String,
    refusal: String,
    role: Option<String>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    pending: BTreeMap<u32, PartialToolCall>,
    tool_calls: Vec<ToolCall>,
}

impl StreamState {
    /// Fresh state for one adapter invocation
    #[must_use]
    pub fn new() -> Self {
        Self {
            open: true,
            ..Self::default()
        }
    }

    /// Whether a message-stop has been folded in
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        !self.open
    }

    /// Whether any tool call finished accumulating
    #[must_use]
    pub const fn tool_calls_collected(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Final usage, if the backend reported it
    #[must_use]
    pub const fn usage(&self) -> Option<Usage> {
        self.usage
    }

    /// Accumulated visible text so far
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Fold one normalized event into the state
    ///
    /// Returns the visible text the event contributed, so the adapter can
    /// forward it to the caller's chunk sink.
    pub fn apply(&mut self, event: StreamEvent) -> Option<String> {
        match event {
            StreamEvent::Start { role } => {
                self.role = Some(role);
                None
            }
            StreamEvent::Delta(delta) => {
                if let Some(refusal) = delta.refusal {
                    self.refusal.push_str(&refusal);
                }
                if let Some(tc) = delta.tool_call {
                    let pending = self.pending.entry(tc.index).or_default();
                    if let Some(id) = tc.id {
                        pending.id = Some(id);
                    }
                    if let Some(function) = tc.function {
                        if let Some(name) = function.name {
                            pending.name = Some(name);
                        }
                        if let Some(fragment) = function.arguments {
                            pending.arguments.push_str(&fragment);
                        }
                    }
                }
                if let Some(content) = delta.content {
                    self.text.push_str(&content);
                    return Some(content);
                }
                None
            }
            StreamEvent::BlockStop { index } => {
                if let Some(pending) = self.pending.remove(&index)
                    && let Some(call) = pending.finalize()
                {
                    self.tool_calls.push(call);
                }
                None
            }
            StreamEvent::MessageStop { finish_reason } => {
                self.finish_reason = Some(finish_reason);
                self.open = false;
                // Finalize anything still accumulating; backends that send
                // no explicit block-stop end the blocks here
                for (_, pending) in std::mem::take(&mut self.pending) {
                    if let Some(call) = pending.finalize() {
                        self.tool_calls.push(call);
                    }
                }
                None
            }
            StreamEvent::Usage(usage) => {
                self.usage = Some(usage);
                None
            }
        }
    }

    /// Produce the terminal choice once role and finish reason are known
    #[must_use]
    pub fn into_choice(self) -> Option<Choice> {
        let role = self.role?;
        let finish_reason = self.finish_reason?;

        let content = if self.text.is_empty() { None } else { Some(self.text) };
        let refusal = if self.refusal.is_empty() {
            None
        } else {
            Some(self.refusal)
        };
        let tool_calls = if self.tool_calls.is_empty() {
            None
        } else {
            Some(self.tool_calls)
        };

        Some(Choice {
            index: 0,
            message: ChoiceMessage {
                role,
                content,
                refusal,
                tool_calls,
            },
            finish_reason: Some(finish_reason),
            logprobs: None,
        })
    }
}
