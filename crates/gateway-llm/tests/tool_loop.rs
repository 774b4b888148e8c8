//! End-to-end turns driven through the public API with a scripted backend

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use gateway_config::ModelProfile;
use gateway_llm::orchestrator::ToolLoopOptions;
use gateway_llm::types::{
    Choice, ChoiceMessage, FinishReason, FunctionCall, Message, ToolCall, ToolDefinition, Usage,
};
use gateway_llm::{
    CompletionRequest, CompletionResponse, GatewayError, InvokeOptions, Provider, Tool, ToolOutcome,
    invoke_with_continuation, invoke_with_tools,
};

struct ScriptedProvider {
    profile: ModelProfile,
    responses: Mutex<Vec<CompletionResponse>>,
    invocations: AtomicU32,
    seen_requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    fn new(mut responses: Vec<CompletionResponse>) -> Self {
        responses.reverse();
        Self {
            profile: ModelProfile::default(),
            responses: Mutex::new(responses),
            invocations: AtomicU32::new(0),
            seen_requests: Mutex::new(Vec::new()),
        }
    }

    fn with_prefill(mut self) -> Self {
        self.profile.supports_assistant_prefill = true;
        self
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    async fn invoke(
        &self,
        request: &CompletionRequest,
        options: &InvokeOptions,
    ) -> Result<Option<CompletionResponse>, GatewayError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.seen_requests.lock().expect("requests lock").push(request.clone());

        let response = self.responses.lock().expect("responses lock").pop();
        if let Some(response) = &response
            && let Some(choice) = response.first_choice()
        {
            options.offer_chunk(choice.message.content.clone(), false).await;
        }
        Ok(response)
    }
}

fn response(text: &str, finish: FinishReason, usage: Usage) -> CompletionResponse {
    CompletionResponse {
        id: "resp".to_owned(),
        created: 0,
        model: "scripted/model".to_owned(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage::text(text.to_owned()),
            finish_reason: Some(finish),
            logprobs: None,
        }],
        usage: Some(usage),
    }
}

fn tool_call_response(name: &str, arguments: &str, usage: Usage) -> CompletionResponse {
    CompletionResponse {
        id: "resp".to_owned(),
        created: 0,
        model: "scripted/model".to_owned(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_owned(),
                content: None,
                refusal: None,
                tool_calls: Some(vec![ToolCall {
                    id: "call_1".to_owned(),
                    function: FunctionCall {
                        name: name.to_owned(),
                        arguments: arguments.to_owned(),
                    },
                }]),
            },
            finish_reason: Some(FinishReason::ToolCalls),
            logprobs: None,
        }],
        usage: Some(usage),
    }
}

fn usage(prompt: u32, completion: u32) -> Usage {
    Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: prompt + completion,
    }
}

struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "get_weather",
            Some("Current weather for a city".to_owned()),
            Some(serde_json::json!({
                "type": "object",
                "properties": { "city": { "type": "string" } },
                "required": ["city"]
            })),
        )
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<ToolOutcome, String> {
        let Some(city) = arguments.get("city").and_then(serde_json::Value::as_str) else {
            return Err("missing required argument: city".to_owned());
        };
        Ok(ToolOutcome::new(serde_json::json!({ "city": city, "temp_c": 18 })))
    }
}

#[tokio::test]
async fn tool_round_trip_settles_with_summed_usage() {
    let provider = ScriptedProvider::new(vec![
        tool_call_response("get_weather", r#"{"city":"Lyon"}"#, usage(20, 10)),
        response("It is 18C in Lyon.", FinishReason::Stop, usage(40, 8)),
    ]);
    let tools: Vec<std::sync::Arc<dyn Tool>> = vec![std::sync::Arc::new(WeatherTool)];

    let request = CompletionRequest::new(
        "scripted/model".to_owned(),
        vec![Message::user("weather in Lyon?".to_owned())],
    );
    let options = InvokeOptions::new("msg-1".to_owned());

    let outcome = invoke_with_tools(&provider, &request, &tools, &options, &ToolLoopOptions::default())
        .await
        .expect("turn settles");

    assert_eq!(provider.invocations.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.content.as_deref(), Some("It is 18C in Lyon."));
    assert_eq!(outcome.payloads.len(), 1);
    assert_eq!(outcome.payloads[0]["temp_c"], 18);
    assert_eq!(outcome.usage, usage(60, 18));

    // The follow-up request carried the assistant's calls and the tool result
    let seen = provider.seen_requests.lock().expect("requests lock");
    let follow_up = &seen[1];
    assert_eq!(follow_up.messages.len(), 3);
    assert!(follow_up.messages[1].tool_calls.is_some());
    assert_eq!(follow_up.messages[2].tool_call_id.as_deref(), Some("call_1"));
}

#[tokio::test]
async fn validation_message_reaches_the_model_as_tool_text() {
    let provider = ScriptedProvider::new(vec![
        tool_call_response("get_weather", r#"{"town":"Lyon"}"#, usage(20, 10)),
        response("Which city did you mean?", FinishReason::Stop, usage(30, 6)),
    ]);
    let tools: Vec<std::sync::Arc<dyn Tool>> = vec![std::sync::Arc::new(WeatherTool)];

    let request = CompletionRequest::new("scripted/model".to_owned(), vec![Message::user("weather?".to_owned())]);
    let options = InvokeOptions::new("msg-1".to_owned());

    let outcome = invoke_with_tools(&provider, &request, &tools, &options, &ToolLoopOptions::default())
        .await
        .expect("turn settles");

    assert_eq!(outcome.content.as_deref(), Some("Which city did you mean?"));

    let seen = provider.seen_requests.lock().expect("requests lock");
    let tool_turn = seen[1].messages.last().expect("tool turn");
    assert_eq!(tool_turn.content.as_text(), "missing required argument: city");
}

#[tokio::test]
async fn length_continuation_merges_segments_through_the_controller() {
    let provider = ScriptedProvider::new(vec![
        response("Hel", FinishReason::Length, usage(10, 2)),
        response("lo", FinishReason::Stop, usage(12, 1)),
    ])
    .with_prefill();

    let request = CompletionRequest::new("scripted/model".to_owned(), vec![Message::user("say hello".to_owned())]);
    let options = InvokeOptions::new("msg-1".to_owned());

    let merged = invoke_with_continuation(&provider, &request, &options, None)
        .await
        .expect("invocation succeeds")
        .expect("response assembled");

    let choice = merged.first_choice().expect("choice");
    assert_eq!(choice.message.content.as_deref(), Some("Hello"));
    assert_eq!(choice.finish_reason, Some(FinishReason::Stop));
    assert_eq!(merged.usage, Some(usage(22, 3)));

    // The second request carried the partial text as an assistant prefill
    let seen = provider.seen_requests.lock().expect("requests lock");
    let continuation = seen[1].messages.last().expect("prefill turn");
    assert_eq!(continuation.content.as_text(), "Hel");
}

#[tokio::test]
async fn chunks_arrive_on_the_sink_in_order() {
    let provider = ScriptedProvider::new(vec![
        tool_call_response("get_weather", r#"{"city":"Lyon"}"#, usage(20, 10)),
        response("18C.", FinishReason::Stop, usage(40, 2)),
    ]);
    let tools: Vec<std::sync::Arc<dyn Tool>> = vec![std::sync::Arc::new(WeatherTool)];

    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    let request = CompletionRequest::new("scripted/model".to_owned(), vec![Message::user("weather?".to_owned())]);
    let options = InvokeOptions::new("msg-1".to_owned()).with_chunks(tx);

    invoke_with_tools(&provider, &request, &tools, &options, &ToolLoopOptions::default())
        .await
        .expect("turn settles");
    drop(options);

    let mut texts = Vec::new();
    while let Some(chunk) = rx.recv().await {
        assert_eq!(chunk.message_id, "msg-1");
        if let Some(text) = chunk.content {
            texts.push(text);
        }
    }
    assert_eq!(texts, vec!["18C.".to_owned()]);
}
