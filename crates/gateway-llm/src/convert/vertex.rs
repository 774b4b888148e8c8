//! Conversion between canonical types and the Vertex AI wire format
//!
//! Vertex carries system text out-of-band, calls the assistant "model",
//! and represents tool traffic as function call/response parts rather
//! than dedicated roles.

use std::collections::HashMap;

use gateway_config::ModelProfile;

use crate::assets::{AssetResolver, ResolvedAsset};
use crate::protocol::vertex::{
    VertexCandidate, VertexContent, VertexFileData, VertexFunctionCall, VertexFunctionCallingConfig,
    VertexFunctionDeclaration, VertexFunctionResponse, VertexGenerationConfig, VertexInlineData, VertexPart,
    VertexRequest, VertexResponse, VertexStreamChunk, VertexTool, VertexToolConfig,
};
use crate::types::response::unix_timestamp;
use crate::types::{
    Choice, ChoiceMessage, CompletionRequest, CompletionResponse, Content, ContentPart, FinishReason, FunctionCall,
    Message, Role, StreamDelta, StreamEvent, StreamFunctionCall, StreamToolCall, ToolCall, ToolChoice, ToolChoiceMode,
    Usage,
};

// -- Outbound: canonical request -> Vertex wire request --

/// Translate a repaired canonical conversation into a Vertex request
pub fn request_to_vertex(
    request: &CompletionRequest,
    profile: &ModelProfile,
    assets: Option<&AssetResolver>,
) -> VertexRequest {
    let repaired = super::repair_conversation(&request.messages, profile.supports_assistant_prefill);

    // Tool results arrive keyed by call ID but Vertex wants the function
    // name back, so recover it from the assistant turn that made the call
    let call_names: HashMap<&str, &str> = repaired
        .iter()
        .filter_map(|m| m.tool_calls.as_ref())
        .flatten()
        .map(|tc| (tc.id.as_str(), tc.function.name.as_str()))
        .collect();

    let system_text: Vec<String> = repaired
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_text())
        .filter(|t| !t.is_empty())
        .collect();
    let system_instruction = if system_text.is_empty() {
        None
    } else {
        Some(VertexContent {
            role: None,
            parts: vec![VertexPart::Text(system_text.join("\n"))],
        })
    };

    let contents = repaired
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| message_to_vertex(m, &call_names, assets))
        .collect();

    let tools = if request.has_tools() && profile.supports_tools {
        request.tools.as_ref().map(|tools| {
            vec![VertexTool {
                function_declarations: tools
                    .iter()
                    .map(|t| VertexFunctionDeclaration {
                        name: t.function.name.clone(),
                        description: t.function.description.clone(),
                        parameters: t.function.parameters.clone(),
                    })
                    .collect(),
            }]
        })
    } else {
        None
    };

    let tool_config = if tools.is_some() {
        request.tool_choice.as_ref().and_then(|tc| tool_config_from_choice(tc, profile))
    } else {
        None
    };

    VertexRequest {
        contents,
        system_instruction,
        generation_config: Some(VertexGenerationConfig {
            temperature: if profile.supports_temperature {
                request.params.temperature
            } else {
                None
            },
            top_p: request.params.top_p,
            max_output_tokens: request.params.max_tokens,
            stop_sequences: request.params.stop.as_ref().map(|s| s.as_slice().to_vec()),
            candidate_count: Some(1),
        }),
        tools,
        tool_config,
    }
}

fn tool_config_from_choice(choice: &ToolChoice, profile: &ModelProfile) -> Option<VertexToolConfig> {
    let config = match choice {
        ToolChoice::Mode(mode) => {
            if !profile.supports_tool_choice {
                return None;
            }
            VertexFunctionCallingConfig {
                mode: match mode {
                    ToolChoiceMode::None => "NONE",
                    ToolChoiceMode::Auto => "AUTO",
                    ToolChoiceMode::Required => "ANY",
                }
                .to_owned(),
                allowed_function_names: None,
            }
        }
        ToolChoice::Function(func) => {
            if !profile.supports_named_tool_choice {
                return None;
            }
            VertexFunctionCallingConfig {
                mode: "ANY".to_owned(),
                allowed_function_names: Some(vec![func.function.name.clone()]),
            }
        }
    };

    Some(VertexToolConfig {
        function_calling_config: config,
    })
}

fn message_to_vertex(msg: &Message, call_names: &HashMap<&str, &str>, assets: Option<&AssetResolver>) -> VertexContent {
    let role = match msg.role {
        Role::Assistant => "model",
        _ => "user",
    };

    let mut parts: Vec<VertexPart> = Vec::new();

    if msg.role == Role::Tool {
        let name = msg
            .tool_call_id
            .as_deref()
            .and_then(|id| call_names.get(id).copied())
            .or(msg.name.as_deref())
            .unwrap_or("function")
            .to_owned();
        let text = msg.content.as_text();
        let response = serde_json::from_str(&text).unwrap_or_else(|_| serde_json::json!({ "result": text }));
        parts.push(VertexPart::FunctionResponse(VertexFunctionResponse { name, response }));
    } else {
        match &msg.content {
            Content::Text(text) => {
                if !text.is_empty() {
                    parts.push(VertexPart::Text(text.clone()));
                }
            }
            Content::Parts(content_parts) => {
                for part in content_parts {
                    parts.push(content_part_to_vertex(part));
                }
            }
        }

        if let Some(calls) = &msg.tool_calls {
            for tc in calls {
                let args = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::String(tc.function.arguments.clone()));
                parts.push(VertexPart::FunctionCall(VertexFunctionCall {
                    name: tc.function.name.clone(),
                    args,
                }));
            }
        }
    }

    if let (Some(resolver), Some(attachments)) = (assets, &msg.attachments) {
        for asset in attachments {
            if let Some(part) = asset_to_vertex_part(resolver, &asset.url) {
                parts.push(part);
            }
        }
    }

    // A backend rejects empty part lists; the repair placeholder covers
    // alternation but tool-call-only turns can still arrive partless
    if parts.is_empty() {
        parts.push(VertexPart::Text(super::PLACEHOLDER_USER_TEXT.to_owned()));
    }

    VertexContent {
        role: Some(role.to_owned()),
        parts,
    }
}

fn content_part_to_vertex(part: &ContentPart) -> VertexPart {
    match part {
        ContentPart::Text { text } => VertexPart::Text(text.clone()),
        ContentPart::ImageUrl { image_url } => parse_data_url(&image_url.url).map_or_else(
            || {
                VertexPart::FileData(VertexFileData {
                    mime_type: mime_from_url(&image_url.url),
                    file_uri: image_url.url.clone(),
                })
            },
            |(mime_type, data)| VertexPart::InlineData(VertexInlineData { mime_type, data }),
        ),
    }
}

/// Vertex takes inline bytes natively, so binary resolutions skip the
/// data-URL round trip other wires need
fn asset_to_vertex_part(resolver: &AssetResolver, url: &str) -> Option<VertexPart> {
    use base64::Engine;

    match resolver.resolved(url)? {
        ResolvedAsset::Url(signed) => Some(VertexPart::FileData(VertexFileData {
            mime_type: mime_from_url(&signed),
            file_uri: signed,
        })),
        ResolvedAsset::Binary { bytes, mime_type } => Some(VertexPart::InlineData(VertexInlineData {
            mime_type,
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        })),
        ResolvedAsset::DataUrl(data_url) => {
            let (mime_type, data) = parse_data_url(&data_url)?;
            Some(VertexPart::InlineData(VertexInlineData { mime_type, data }))
        }
        ResolvedAsset::Text(text) => Some(VertexPart::Text(text)),
    }
}

/// Split a `data:<mime>;base64,<payload>` URL into its MIME type and payload
fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (mime_type, data) = rest.split_once(";base64,")?;
    Some((mime_type.to_owned(), data.to_owned()))
}

fn mime_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let mime = match path.rsplit('.').next() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        _ => "image/jpeg",
    };
    mime.to_owned()
}

// -- Inbound: Vertex wire -> canonical types --

/// Decode a Vertex response into a canonical completion
#[must_use]
pub fn response_from_vertex(resp: VertexResponse, model: &str) -> CompletionResponse {
    CompletionResponse {
        id: format!("vertex-{}", uuid::Uuid::new_v4()),
        created: unix_timestamp(),
        model: model.to_owned(),
        choices: resp.candidates.into_iter().map(choice_from_candidate).collect(),
        usage: resp.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }),
    }
}

fn choice_from_candidate(candidate: VertexCandidate) -> Choice {
    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    if let Some(content) = candidate.content {
        for part in content.parts {
            match part {
                VertexPart::Text(t) => text.push_str(&t),
                VertexPart::FunctionCall(call) => {
                    tool_calls.push(ToolCall {
                        id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                        function: FunctionCall {
                            name: call.name,
                            arguments: call.args.to_string(),
                        },
                    });
                }
                VertexPart::InlineData(_) | VertexPart::FileData(_) | VertexPart::FunctionResponse(_) => {}
            }
        }
    }

    let finish_reason = parse_vertex_finish(candidate.finish_reason.as_deref(), !tool_calls.is_empty());

    Choice {
        index: candidate.index.unwrap_or(0),
        message: ChoiceMessage {
            role: "assistant".to_owned(),
            content: if text.is_empty() { None } else { Some(text) },
            refusal: None,
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        },
        finish_reason,
        logprobs: None,
    }
}

/// Map a Vertex finish reason, upgrading STOP to tool-calls when the
/// candidate carried function call parts
fn parse_vertex_finish(reason: Option<&str>, has_tool_calls: bool) -> Option<FinishReason> {
    match reason? {
        "STOP" => {
            if has_tool_calls {
                Some(FinishReason::ToolCalls)
            } else {
                Some(FinishReason::Stop)
            }
        }
        "MAX_TOKENS" => Some(FinishReason::Length),
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => Some(FinishReason::ContentFilter),
        other => {
            tracing::warn!(finish_reason = other, "unmapped vertex finish reason");
            None
        }
    }
}

// -- Stream conversion --

/// Convert one Vertex SSE chunk into normalized stream events
///
/// Vertex sends complete function calls per chunk, so each yields a delta
/// followed by an immediate block stop. `started` and `tool_index` carry
/// adapter state across chunks.
pub fn vertex_chunk_to_events(chunk: &VertexStreamChunk, started: &mut bool, tool_index: &mut u32) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    for candidate in &chunk.candidates {
        let mut has_tool_calls = false;

        if let Some(content) = &candidate.content {
            if !*started {
                *started = true;
                events.push(StreamEvent::Start {
                    role: "assistant".to_owned(),
                });
            }

            for part in &content.parts {
                match part {
                    VertexPart::Text(t) => {
                        events.push(StreamEvent::Delta(StreamDelta {
                            content: Some(t.clone()),
                            ..StreamDelta::default()
                        }));
                    }
                    VertexPart::FunctionCall(call) => {
                        has_tool_calls = true;
                        let index = *tool_index;
                        *tool_index += 1;
                        events.push(StreamEvent::Delta(StreamDelta {
                            tool_call: Some(StreamToolCall {
                                index,
                                id: Some(format!("call_{}", uuid::Uuid::new_v4().simple())),
                                function: Some(StreamFunctionCall {
                                    name: Some(call.name.clone()),
                                    arguments: Some(call.args.to_string()),
                                }),
                            }),
                            ..StreamDelta::default()
                        }));
                        events.push(StreamEvent::BlockStop { index });
                    }
                    VertexPart::InlineData(_) | VertexPart::FileData(_) | VertexPart::FunctionResponse(_) => {}
                }
            }
        }

        if let Some(reason) = parse_vertex_finish(candidate.finish_reason.as_deref(), has_tool_calls || *tool_index > 0)
        {
            events.push(StreamEvent::MessageStop { finish_reason: reason });
        }
    }

    if let Some(usage) = &chunk.usage_metadata {
        events.push(StreamEvent::Usage(Usage {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
        }));
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_text_moves_out_of_band() {
        let request = CompletionRequest::new(
            "vertex/gemini-test".to_owned(),
            vec![
                Message {
                    role: Role::System,
                    content: Content::Text("be terse".to_owned()),
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                    attachments: None,
                },
                Message::user("hi".to_owned()),
            ],
        );

        let wire = request_to_vertex(&request, &ModelProfile::default(), None);
        let system = wire.system_instruction.expect("system instruction");
        assert!(matches!(&system.parts[0], VertexPart::Text(t) if t == "be terse"));
        assert_eq!(wire.contents.len(), 1);
        assert_eq!(wire.contents[0].role.as_deref(), Some("user"));
    }

    #[test]
    fn assistant_role_becomes_model() {
        let request = CompletionRequest::new(
            "vertex/gemini-test".to_owned(),
            vec![Message::user("hi".to_owned()), Message::assistant("hello".to_owned())],
        );

        let profile = ModelProfile {
            supports_assistant_prefill: true,
            ..ModelProfile::default()
        };
        let wire = request_to_vertex(&request, &profile, None);
        assert_eq!(wire.contents[1].role.as_deref(), Some("model"));
    }

    #[test]
    fn tool_result_recovers_function_name_from_call_id() {
        let mut assistant = Message::assistant(String::new());
        assistant.tool_calls = Some(vec![ToolCall {
            id: "call_42".to_owned(),
            function: FunctionCall {
                name: "get_weather".to_owned(),
                arguments: "{\"city\":\"Lyon\"}".to_owned(),
            },
        }]);

        let request = CompletionRequest::new(
            "vertex/gemini-test".to_owned(),
            vec![
                Message::user("weather?".to_owned()),
                assistant,
                Message::tool_result("call_42".to_owned(), "{\"temp\": 18}".to_owned()),
            ],
        );

        let wire = request_to_vertex(&request, &ModelProfile::default(), None);
        let tool_turn = wire.contents.last().expect("tool turn");
        assert_eq!(tool_turn.role.as_deref(), Some("user"));
        match &tool_turn.parts[0] {
            VertexPart::FunctionResponse(resp) => {
                assert_eq!(resp.name, "get_weather");
                assert_eq!(resp.response["temp"], 18);
            }
            other => panic!("expected function response, got {other:?}"),
        }
    }

    #[test]
    fn data_urls_become_inline_data() {
        let part = content_part_to_vertex(&ContentPart::ImageUrl {
            image_url: crate::types::ImageUrl {
                url: "data:image/png;base64,AAAA".to_owned(),
            },
        });
        match part {
            VertexPart::InlineData(inline) => {
                assert_eq!(inline.mime_type, "image/png");
                assert_eq!(inline.data, "AAAA");
            }
            other => panic!("expected inline data, got {other:?}"),
        }

        let part = content_part_to_vertex(&ContentPart::ImageUrl {
            image_url: crate::types::ImageUrl {
                url: "https://example.com/photo.png".to_owned(),
            },
        });
        assert!(matches!(part, VertexPart::FileData(f) if f.mime_type == "image/png"));
    }

    #[test]
    fn stop_with_function_calls_maps_to_tool_calls() {
        let resp: VertexResponse = serde_json::from_str(
            r#"{
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [{ "functionCall": { "name": "lookup", "args": { "id": 7 } } }]
                    },
                    "finishReason": "STOP"
                }],
                "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15 }
            }"#,
        )
        .expect("valid response");

        let completion = response_from_vertex(resp, "gemini-test");
        assert_eq!(completion.finish_reason(), Some(FinishReason::ToolCalls));
        let calls = completion.choices[0].message.tool_calls.as_ref().expect("calls");
        assert_eq!(calls[0].function.name, "lookup");
        assert_eq!(completion.usage.expect("usage").total_tokens, 15);
    }

    #[test]
    fn safety_finish_maps_to_content_filter() {
        assert_eq!(parse_vertex_finish(Some("SAFETY"), false), Some(FinishReason::ContentFilter));
        assert_eq!(parse_vertex_finish(Some("MAX_TOKENS"), false), Some(FinishReason::Length));
        assert_eq!(parse_vertex_finish(Some("STOP"), false), Some(FinishReason::Stop));
    }

    #[test]
    fn stream_chunks_emit_start_once() {
        let chunk: VertexStreamChunk = serde_json::from_str(
            r#"{
                "candidates": [{
                    "content": { "role": "model", "parts": [{ "text": "Hel" }] }
                }]
            }"#,
        )
        .expect("valid chunk");

        let mut started = false;
        let mut tool_index = 0;
        let events = vertex_chunk_to_events(&chunk, &mut started, &mut tool_index);
        assert!(matches!(events[0], StreamEvent::Start { .. }));

        let events = vertex_chunk_to_events(&chunk, &mut started, &mut tool_index);
        assert!(matches!(events[0], StreamEvent::Delta(_)));
    }
}
