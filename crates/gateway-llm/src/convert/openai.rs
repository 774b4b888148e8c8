//! Conversion between canonical types and the `OpenAI` wire format

use gateway_config::ModelProfile;

use crate::assets::AssetResolver;
use crate::protocol::openai::{
    OpenAiChoice, OpenAiContent, OpenAiContentPart, OpenAiFunction, OpenAiFunctionCall, OpenAiImageUrl, OpenAiMessage,
    OpenAiRequest, OpenAiResponse, OpenAiStreamChunk, OpenAiTool, OpenAiToolCall,
};
use crate::types::{
    Choice, ChoiceMessage, CompletionRequest, CompletionResponse, Content, ContentPart, FinishReason, FunctionCall,
    ImageUrl, Message, Role, StopSequences, StreamDelta, StreamEvent, StreamFunctionCall, StreamToolCall, ToolCall,
    ToolChoice, ToolChoiceMode, Usage,
};

// -- Outbound: canonical request -> OpenAI wire request --

/// Translate a repaired canonical conversation into an `OpenAI` request
pub fn request_to_openai(
    request: &CompletionRequest,
    profile: &ModelProfile,
    assets: Option<&AssetResolver>,
) -> OpenAiRequest {
    let messages = super::repair_conversation(&request.messages, profile.supports_assistant_prefill)
        .iter()
        .map(|m| message_to_openai(m, assets))
        .collect();

    let tools = if request.has_tools() && profile.supports_tools {
        request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| OpenAiTool {
                    tool_type: t.tool_type.clone(),
                    function: OpenAiFunction {
                        name: t.function.name.clone(),
                        description: t.function.description.clone(),
                        parameters: t.function.parameters.clone(),
                    },
                })
                .collect()
        })
    } else {
        None
    };

    let tool_choice = if tools.is_some() {
        request.tool_choice.as_ref().and_then(|tc| tool_choice_to_value(tc, profile))
    } else {
        None
    };

    OpenAiRequest {
        model: request.model.clone(),
        messages,
        temperature: if profile.supports_temperature {
            request.params.temperature
        } else {
            None
        },
        top_p: request.params.top_p,
        max_tokens: request.params.max_tokens,
        stop: request.params.stop.as_ref().map(stop_to_value),
        stream: if request.stream { Some(true) } else { None },
        tools,
        tool_choice,
        stream_options: None,
    }
}

fn stop_to_value(stop: &StopSequences) -> serde_json::Value {
    match stop {
        StopSequences::One(s) => serde_json::Value::String(s.clone()),
        StopSequences::Many(v) => serde_json::json!(v),
    }
}

fn tool_choice_to_value(choice: &ToolChoice, profile: &ModelProfile) -> Option<serde_json::Value> {
    match choice {
        ToolChoice::Mode(mode) => {
            if !profile.supports_tool_choice {
                return None;
            }
            let s = match mode {
                ToolChoiceMode::None => "none",
                ToolChoiceMode::Auto => "auto",
                ToolChoiceMode::Required => "required",
            };
            Some(serde_json::Value::String(s.to_owned()))
        }
        ToolChoice::Function(func) => {
            if !profile.supports_named_tool_choice {
                return None;
            }
            Some(serde_json::json!({
                "type": func.tool_type,
                "function": { "name": func.function.name }
            }))
        }
    }
}

/// Convert a canonical message, rewriting asset URLs and appending
/// resolved attachments as content parts
fn message_to_openai(msg: &Message, assets: Option<&AssetResolver>) -> OpenAiMessage {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let mut parts: Option<Vec<OpenAiContentPart>> = None;
    let mut text: Option<String> = None;

    match &msg.content {
        Content::Text(t) => text = Some(t.clone()),
        Content::Parts(content_parts) => {
            parts = Some(content_parts.iter().map(|p| content_part_to_openai(p, assets)).collect());
        }
    }

    if let (Some(resolver), Some(attachments)) = (assets, &msg.attachments) {
        let extra: Vec<OpenAiContentPart> = attachments
            .iter()
            .flat_map(|a| resolver.content_parts_for(a))
            .map(|p| content_part_to_openai(&p, assets))
            .collect();

        if !extra.is_empty() {
            let mut all = parts.take().unwrap_or_else(|| {
                text.take()
                    .filter(|t| !t.is_empty())
                    .map(|t| vec![OpenAiContentPart::Text { text: t }])
                    .unwrap_or_default()
            });
            all.extend(extra);
            parts = Some(all);
        }
    }

    let content = match (parts, text) {
        (Some(p), _) => Some(OpenAiContent::Parts(p)),
        (None, Some(t)) => Some(OpenAiContent::Text(t)),
        (None, None) => None,
    };

    let tool_calls = msg.tool_calls.as_ref().map(|calls| {
        calls
            .iter()
            .map(|tc| OpenAiToolCall {
                id: tc.id.clone(),
                tool_type: "function".to_owned(),
                function: OpenAiFunctionCall {
                    name: tc.function.name.clone(),
                    arguments: tc.function.arguments.clone(),
                },
            })
            .collect()
    });

    OpenAiMessage {
        role: role.to_owned(),
        content,
        name: msg.name.clone(),
        tool_calls,
        tool_call_id: msg.tool_call_id.clone(),
    }
}

fn content_part_to_openai(part: &ContentPart, assets: Option<&AssetResolver>) -> OpenAiContentPart {
    match part {
        ContentPart::Text { text } => OpenAiContentPart::Text { text: text.clone() },
        ContentPart::ImageUrl { image_url } => {
            let url = assets.map_or_else(|| image_url.url.clone(), |r| r.adjust_url(&image_url.url));
            OpenAiContentPart::ImageUrl {
                image_url: OpenAiImageUrl { url },
            }
        }
    }
}

// -- Inbound: OpenAI wire -> canonical types --

/// Decode an `OpenAI` message back into the canonical shape
#[must_use]
pub fn message_from_openai(msg: OpenAiMessage) -> Message {
    let role = match msg.role.as_str() {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    };

    let content = match msg.content {
        Some(OpenAiContent::Text(text)) => Content::Text(text),
        Some(OpenAiContent::Parts(parts)) => Content::Parts(
            parts
                .into_iter()
                .map(|p| match p {
                    OpenAiContentPart::Text { text } => ContentPart::Text { text },
                    OpenAiContentPart::ImageUrl { image_url } => ContentPart::ImageUrl {
                        image_url: ImageUrl { url: image_url.url },
                    },
                })
                .collect(),
        ),
        None => Content::Text(String::new()),
    };

    let tool_calls = msg.tool_calls.map(|calls| {
        calls
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                function: FunctionCall {
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                },
            })
            .collect()
    });

    Message {
        role,
        content,
        name: msg.name,
        tool_calls,
        tool_call_id: msg.tool_call_id,
        attachments: None,
    }
}

/// Decode an `OpenAI` response into a canonical completion
#[must_use]
pub fn response_from_openai(resp: OpenAiResponse) -> CompletionResponse {
    CompletionResponse {
        id: resp.id,
        created: resp.created,
        model: resp.model,
        choices: resp.choices.into_iter().map(choice_from_openai).collect(),
        usage: resp.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}

fn choice_from_openai(c: OpenAiChoice) -> Choice {
    let finish_reason = c.finish_reason.as_deref().and_then(parse_finish_reason);

    let tool_calls = c.message.tool_calls.map(|calls| {
        calls
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                function: FunctionCall {
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                },
            })
            .collect()
    });

    Choice {
        index: c.index,
        message: ChoiceMessage {
            role: c.message.role,
            content: c.message.content,
            refusal: c.message.refusal,
            tool_calls,
        },
        finish_reason,
        logprobs: c.logprobs,
    }
}

// -- Stream conversion --

/// Convert an `OpenAI` stream chunk into normalized stream events
#[must_use]
pub fn openai_chunk_to_events(chunk: &OpenAiStreamChunk) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    for choice in &chunk.choices {
        if let Some(role) = &choice.delta.role {
            events.push(StreamEvent::Start { role: role.clone() });
        }

        // A chunk may carry several parallel tool-call deltas; each keeps
        // its own index so the assembler accumulates them separately
        let mut tool_calls = choice.delta.tool_calls.iter().flatten().map(|tc| StreamToolCall {
            index: tc.index,
            id: tc.id.clone(),
            function: tc.function.as_ref().map(|f| StreamFunctionCall {
                name: f.name.clone(),
                arguments: f.arguments.clone(),
            }),
        });

        let first_call = tool_calls.next();
        if choice.delta.content.is_some() || choice.delta.refusal.is_some() || first_call.is_some() {
            events.push(StreamEvent::Delta(StreamDelta {
                content: choice.delta.content.clone(),
                refusal: choice.delta.refusal.clone(),
                tool_call: first_call,
            }));
        }
        for tool_call in tool_calls {
            events.push(StreamEvent::Delta(StreamDelta {
                content: None,
                refusal: None,
                tool_call: Some(tool_call),
            }));
        }

        if let Some(reason) = choice.finish_reason.as_deref().and_then(parse_finish_reason) {
            events.push(StreamEvent::MessageStop { finish_reason: reason });
        }
    }

    if let Some(usage) = &chunk.usage {
        events.push(StreamEvent::Usage(Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }));
    }

    events
}

/// Parse a finish reason string, accepting common backend aliases
pub(crate) fn parse_finish_reason(s: &str) -> Option<FinishReason> {
    match s {
        "stop" | "end_turn" => Some(FinishReason::Stop),
        "length" | "max_tokens" => Some(FinishReason::Length),
        "tool_calls" | "tool_use" => Some(FinishReason::ToolCalls),
        "content_filter" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_round_trips() {
        let original = Message::user("explain ownership".to_owned());
        let wire = message_to_openai(&original, None);
        let back = message_from_openai(wire);
        assert_eq!(back.content.as_text(), "explain ownership");
        assert_eq!(back.role, Role::User);
    }

    #[test]
    fn leading_assistant_payload_starts_with_user() {
        let request = CompletionRequest::new(
            "openai/gpt-test".to_owned(),
            vec![Message::assistant("continuing".to_owned())],
        );
        let wire = request_to_openai(&request, &ModelProfile::default(), None);
        assert_eq!(wire.messages[0].role, "user");
    }

    #[test]
    fn unsupported_temperature_is_dropped() {
        let mut request = CompletionRequest::new("openai/gpt-test".to_owned(), vec![Message::user("hi".to_owned())]);
        request.params.temperature = Some(0.3);

        let profile = ModelProfile {
            supports_temperature: false,
            ..ModelProfile::default()
        };
        let wire = request_to_openai(&request, &profile, None);
        assert!(wire.temperature.is_none());
    }

    #[test]
    fn empty_tool_list_is_omitted() {
        let mut request = CompletionRequest::new("openai/gpt-test".to_owned(), vec![Message::user("hi".to_owned())]);
        request.tools = Some(vec![]);

        let wire = request_to_openai(&request, &ModelProfile::default(), None);
        assert!(wire.tools.is_none());
    }

    #[test]
    fn named_tool_choice_requires_capability() {
        use crate::types::{ToolChoiceFunction, ToolChoiceFunctionName, ToolDefinition};

        let mut request = CompletionRequest::new("openai/gpt-test".to_owned(), vec![Message::user("hi".to_owned())]);
        request.tools = Some(vec![ToolDefinition::function("lookup", None, None)]);
        request.tool_choice = Some(ToolChoice::Function(ToolChoiceFunction {
            tool_type: "function".to_owned(),
            function: ToolChoiceFunctionName {
                name: "lookup".to_owned(),
            },
        }));

        let wire = request_to_openai(&request, &ModelProfile::default(), None);
        assert!(wire.tool_choice.is_none());

        let profile = ModelProfile {
            supports_named_tool_choice: true,
            ..ModelProfile::default()
        };
        let wire = request_to_openai(&request, &profile, None);
        assert!(wire.tool_choice.is_some());
    }

    #[test]
    fn stream_chunk_maps_to_start_delta_and_stop() {
        let chunk: OpenAiStreamChunk = serde_json::from_str(
            r#"{
                "id": "chunk-1",
                "created": 1,
                "model": "gpt-test",
                "choices": [{
                    "index": 0,
                    "delta": { "role": "assistant", "content": "Hi" },
                    "finish_reason": "stop"
                }]
            }"#,
        )
        .expect("valid chunk");

        let events = openai_chunk_to_events(&chunk);
        assert!(matches!(events[0], StreamEvent::Start { .. }));
        assert!(matches!(events[1], StreamEvent::Delta(_)));
        assert!(matches!(
            events[2],
            StreamEvent::MessageStop {
                finish_reason: FinishReason::Stop
            }
        ));
    }

    #[test]
    fn parallel_tool_call_deltas_all_survive_assembly() {
        let chunk: OpenAiStreamChunk = serde_json::from_str(
            r#"{
                "id": "chunk-1",
                "created": 1,
                "model": "gpt-test",
                "choices": [{
                    "index": 0,
                    "delta": {
                        "role": "assistant",
                        "tool_calls": [
                            {
                                "index": 0,
                                "id": "call_a",
                                "function": { "name": "get_weather", "arguments": "{\"city\":\"Lyon\"}" }
                            },
                            {
                                "index": 1,
                                "id": "call_b",
                                "function": { "name": "get_time", "arguments": "{\"tz\":\"CET\"}" }
                            }
                        ]
                    },
                    "finish_reason": null
                }]
            }"#,
        )
        .expect("valid chunk");

        let mut state = crate::stream::StreamState::new();
        for event in openai_chunk_to_events(&chunk) {
            state.apply(event);
        }
        state.apply(StreamEvent::MessageStop {
            finish_reason: FinishReason::ToolCalls,
        });

        let choice = state.into_choice().expect("assemblable");
        let calls = choice.message.tool_calls.expect("tool calls");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[1].id, "call_b");
        assert_eq!(calls[1].function.name, "get_time");
    }
}
