//! AWS Bedrock adapter speaking the Converse API

use async_trait::async_trait;
use aws_sdk_bedrockruntime::Client as BedrockClient;
use aws_sdk_bedrockruntime::error::SdkError;
use aws_sdk_bedrockruntime::operation::converse::ConverseError;
use aws_sdk_bedrockruntime::operation::converse_stream::ConverseStreamError;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ContentBlockDelta, ContentBlockStart, ConversationRole, ConverseOutput, ConverseStreamOutput,
    ImageBlock, ImageFormat, ImageSource, InferenceConfiguration, Message as BedrockMessage, StopReason,
    SystemContentBlock, Tool, ToolConfiguration, ToolInputSchema, ToolResultBlock, ToolResultContentBlock,
    ToolSpecification, ToolUseBlock,
};
use gateway_config::{AwsSecrets, ModelProfile};
use secrecy::ExposeSecret;

use super::{InvokeOptions, Provider, apply_and_offer};
use crate::assets::ResolvedAsset;
use crate::convert::repair_conversation;
use crate::error::GatewayError;
use crate::stream::StreamState;
use crate::types::response::unix_timestamp;
use crate::types::{
    Choice, ChoiceMessage, CompletionRequest, CompletionResponse, Content, ContentPart, FinishReason, FunctionCall,
    Message, Role, StreamDelta, StreamEvent, StreamFunctionCall, StreamToolCall, ToolCall, Usage,
};

/// AWS Bedrock backend adapter
pub struct BedrockProvider {
    name: String,
    client: BedrockClient,
    model: String,
    profile: ModelProfile,
}

impl BedrockProvider {
    /// Create an adapter for one configured model
    ///
    /// `candidates` lists the regions the model is deployed in; the region
    /// actually used is steered by [`select_region`].
    pub async fn new(
        name: String,
        secrets: &AwsSecrets,
        candidates: &[String],
        model: String,
        profile: ModelProfile,
    ) -> Self {
        let region = select_region(&secrets.region, candidates);

        let credentials = aws_credential_types::Credentials::new(
            secrets.access_key_id.expose_secret(),
            secrets.secret_access_key.expose_secret(),
            None,
            None,
            "gateway-config",
        );

        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region))
            .credentials_provider(credentials)
            .load()
            .await;

        Self {
            name,
            client: BedrockClient::new(&aws_config),
            model,
            profile,
        }
    }
}

/// Pick the region to call a model in
///
/// The configured default wins when the model is deployed there; otherwise
/// the first candidate sharing the default's geography prefix, otherwise
/// the first candidate at all.
#[must_use]
pub fn select_region(configured: &str, candidates: &[String]) -> String {
    if candidates.is_empty() || candidates.iter().any(|c| c == configured) {
        return configured.to_owned();
    }

    let prefix = configured.split('-').next().unwrap_or(configured);
    candidates
        .iter()
        .find(|c| c.split('-').next() == Some(prefix))
        .unwrap_or(&candidates[0])
        .clone()
}

#[async_trait]
impl Provider for BedrockProvider {
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

        let repaired = repair_conversation(&request.messages, self.profile.supports_assistant_prefill);
        let (system_blocks, messages) = build_converse_input(&repaired, options);
        let inference = build_inference_config(request, &self.profile);
        let tool_config = if self.profile.supports_tools {
            build_tool_config(request)
        } else {
            None
        };

        if stream {
            self.invoke_streaming(request, options, system_blocks, messages, inference, tool_config)
                .await
        } else {
            self.invoke_unary(request, options, system_blocks, messages, inference, tool_config)
                .await
        }
    }
}

impl BedrockProvider {
    async fn invoke_unary(
        &self,
        request: &CompletionRequest,
        options: &InvokeOptions,
        system_blocks: Vec<SystemContentBlock>,
        messages: Vec<BedrockMessage>,
        inference: InferenceConfiguration,
        tool_config: Option<ToolConfiguration>,
    ) -> Result<Option<CompletionResponse>, GatewayError> {
        let mut converse = self
            .client
            .converse()
            .model_id(&self.model)
            .set_system(Some(system_blocks))
            .set_messages(Some(messages))
            .inference_config(inference);
        if let Some(config) = tool_config {
            converse = converse.tool_config(config);
        }

        let output = tokio::select! {
            () = options.cancel.cancelled() => return Err(GatewayError::StreamAborted),
            output = converse.send() => output.map_err(|e| error_from_converse(&self.name, &e))?,
        };

        let finish_reason = finish_from_stop_reason(output.stop_reason());
        let (content, tool_calls) = match output.output() {
            Some(ConverseOutput::Message(msg)) => extract_response_message(msg),
            _ => (None, None),
        };

        #[allow(clippy::cast_sign_loss)]
        let usage = output.usage().map(|u| Usage {
            prompt_tokens: u.input_tokens() as u32,
            completion_tokens: u.output_tokens() as u32,
            total_tokens: u.total_tokens() as u32,
        });

        options.offer_chunk(content.clone(), false).await;

        Ok(Some(CompletionResponse {
            id: format!("bedrock-{}", uuid::Uuid::new_v4()),
            created: unix_timestamp(),
            model: request.model.clone(),
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage {
                    role: "assistant".to_owned(),
                    content,
                    refusal: None,
                    tool_calls,
                },
                finish_reason: Some(finish_reason),
                logprobs: None,
            }],
            usage,
        }))
    }

    async fn invoke_streaming(
        &self,
        request: &CompletionRequest,
        options: &InvokeOptions,
        system_blocks: Vec<SystemContentBlock>,
        messages: Vec<BedrockMessage>,
        inference: InferenceConfiguration,
        tool_config: Option<ToolConfiguration>,
    ) -> Result<Option<CompletionResponse>, GatewayError> {
        let mut converse = self
            .client
            .converse_stream()
            .model_id(&self.model)
            .set_system(Some(system_blocks))
            .set_messages(Some(messages))
            .inference_config(inference);
        if let Some(config) = tool_config {
            converse = converse.tool_config(config);
        }

        let output = tokio::select! {
            () = options.cancel.cancelled() => return Err(GatewayError::StreamAborted),
            output = converse.send() => output.map_err(|e| error_from_converse_stream(&self.name, &e))?,
        };

        let mut receiver = output.stream;
        let mut state = StreamState::new();

        loop {
            let received = tokio::select! {
                () = options.cancel.cancelled() => return Err(GatewayError::StreamAborted),
                received = receiver.recv() => received,
            };
            let stream_output = match received {
                Ok(Some(stream_output)) => stream_output,
                Ok(None) => break,
                Err(e) => return Err(GatewayError::ConnectionError(e.to_string())),
            };

            if let Some(event) = converse_stream_event(&stream_output) {
                apply_and_offer(&mut state, event, options).await;
            }
        }

        let usage = state.usage();
        Ok(state.into_choice().map(|choice| CompletionResponse {
            id: format!("bedrock-{}", uuid::Uuid::new_v4()),
            created: unix_timestamp(),
            model: request.model.clone(),
            choices: vec![choice],
            usage,
        }))
    }
}

/// Normalize one Converse stream event
fn converse_stream_event(output: &ConverseStreamOutput) -> Option<StreamEvent> {
    match output {
        ConverseStreamOutput::MessageStart(start) => Some(StreamEvent::Start {
            role: match start.role() {
                ConversationRole::User => "user".to_owned(),
                _ => "assistant".to_owned(),
            },
        }),
        ConverseStreamOutput::ContentBlockStart(start) => match start.start() {
            Some(ContentBlockStart::ToolUse(tool)) => Some(StreamEvent::Delta(StreamDelta {
                content: None,
                refusal: None,
                tool_call: Some(StreamToolCall {
                    index: u32::try_from(start.content_block_index()).unwrap_or(0),
                    id: Some(tool.tool_use_id().to_owned()),
                    function: Some(StreamFunctionCall {
                        name: Some(tool.name().to_owned()),
                        arguments: None,
                    }),
                }),
            })),
            _ => None,
        },
        ConverseStreamOutput::ContentBlockDelta(delta) => match delta.delta() {
            Some(ContentBlockDelta::Text(text)) => Some(StreamEvent::Delta(StreamDelta {
                content: Some(text.clone()),
                refusal: None,
                tool_call: None,
            })),
            Some(ContentBlockDelta::ToolUse(tool)) => Some(StreamEvent::Delta(StreamDelta {
                content: None,
                refusal: None,
                tool_call: Some(StreamToolCall {
                    index: u32::try_from(delta.content_block_index()).unwrap_or(0),
                    id: None,
                    function: Some(StreamFunctionCall {
                        name: None,
                        arguments: Some(tool.input().to_owned()),
                    }),
                }),
            })),
            _ => None,
        },
        ConverseStreamOutput::ContentBlockStop(stop) => Some(StreamEvent::BlockStop {
            index: u32::try_from(stop.content_block_index()).unwrap_or(0),
        }),
        ConverseStreamOutput::MessageStop(stop) => Some(StreamEvent::MessageStop {
            finish_reason: finish_from_stop_reason(stop.stop_reason()),
        }),
        ConverseStreamOutput::Metadata(meta) => meta.usage().map(|u| {
            #[allow(clippy::cast_sign_loss)]
            StreamEvent::Usage(Usage {
                prompt_tokens: u.input_tokens() as u32,
                completion_tokens: u.output_tokens() as u32,
                total_tokens: u.total_tokens() as u32,
            })
        }),
        _ => None,
    }
}

const fn finish_from_stop_reason(reason: &StopReason) -> FinishReason {
    match reason {
        StopReason::MaxTokens => FinishReason::Length,
        StopReason::ToolUse => FinishReason::ToolCalls,
        StopReason::ContentFiltered | StopReason::GuardrailIntervened => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn error_from_converse(provider: &str, e: &SdkError<ConverseError>) -> GatewayError {
    match e {
        SdkError::ServiceError(ctx) => match ctx.err() {
            ConverseError::ThrottlingException(_) => GatewayError::RateLimited,
            ConverseError::ServiceUnavailableException(err) => GatewayError::ServiceUnavailable(err.to_string()),
            ConverseError::ValidationException(err) => GatewayError::InvalidRequest(err.to_string()),
            ConverseError::InternalServerException(err) => GatewayError::InternalProviderError(err.to_string()),
            ConverseError::ModelErrorException(err) => GatewayError::ConnectionError(err.to_string()),
            other => {
                tracing::warn!(provider, error = %other, "unmapped bedrock service error");
                GatewayError::Other(anyhow::anyhow!("bedrock error: {other}"))
            }
        },
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => GatewayError::ConnectionError(e.to_string()),
        other => {
            tracing::warn!(provider, error = %other, "unmapped bedrock sdk error");
            GatewayError::Other(anyhow::anyhow!("bedrock error: {other}"))
        }
    }
}

fn error_from_converse_stream(provider: &str, e: &SdkError<ConverseStreamError>) -> GatewayError {
    match e {
        SdkError::ServiceError(ctx) => match ctx.err() {
            ConverseStreamError::ThrottlingException(_) => GatewayError::RateLimited,
            ConverseStreamError::ServiceUnavailableException(err) => GatewayError::ServiceUnavailable(err.to_string()),
            ConverseStreamError::ValidationException(err) => GatewayError::InvalidRequest(err.to_string()),
            ConverseStreamError::InternalServerException(err) => {
                GatewayError::InternalProviderError(err.to_string())
            }
            ConverseStreamError::ModelErrorException(err) => GatewayError::ConnectionError(err.to_string()),
            other => {
                tracing::warn!(provider, error = %other, "unmapped bedrock service error");
                GatewayError::Other(anyhow::anyhow!("bedrock error: {other}"))
            }
        },
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => GatewayError::ConnectionError(e.to_string()),
        other => {
            tracing::warn!(provider, error = %other, "unmapped bedrock sdk error");
            GatewayError::Other(anyhow::anyhow!("bedrock error: {other}"))
        }
    }
}

fn build_inference_config(request: &CompletionRequest, profile: &ModelProfile) -> InferenceConfiguration {
    let mut config = InferenceConfiguration::builder();

    if profile.supports_temperature
        && let Some(temp) = request.params.temperature
    {
        #[allow(clippy::cast_possible_truncation)]
        {
            config = config.temperature(temp as f32);
        }
    }
    if let Some(top_p) = request.params.top_p {
        #[allow(clippy::cast_possible_truncation)]
        {
            config = config.top_p(top_p as f32);
        }
    }
    if let Some(max_tokens) = request.params.max_tokens {
        #[allow(clippy::cast_possible_wrap)]
        {
            config = config.max_tokens(max_tokens as i32);
        }
    }
    if let Some(stop) = &request.params.stop {
        for seq in stop.as_slice() {
            config = config.stop_sequences(seq.clone());
        }
    }

    config.build()
}

fn build_tool_config(request: &CompletionRequest) -> Option<ToolConfiguration> {
    let tools = request.tools.as_ref().filter(|t| !t.is_empty())?;

    let mut builder = ToolConfiguration::builder();
    for tool in tools {
        let input_schema = tool.function.parameters.as_ref().map_or_else(
            || ToolInputSchema::Json(aws_smithy_types::Document::Object(std::collections::HashMap::new())),
            |p| ToolInputSchema::Json(value_to_document(p)),
        );

        let mut spec = ToolSpecification::builder()
            .name(&tool.function.name)
            .input_schema(input_schema);
        if let Some(desc) = &tool.function.description {
            spec = spec.description(desc);
        }

        if let Ok(spec) = spec.build() {
            builder = builder.tools(Tool::ToolSpec(spec));
        }
    }

    builder.build().ok()
}

/// Translate a repaired conversation into Converse system blocks and
/// messages
///
/// Consecutive user-side turns fold into one Converse message so tool
/// results co-locate with the user content that follows them, which the
/// API requires.
fn build_converse_input(
    messages: &[Message],
    options: &InvokeOptions,
) -> (Vec<SystemContentBlock>, Vec<BedrockMessage>) {
    let mut system_blocks = Vec::new();
    let mut converse: Vec<(ConversationRole, Vec<ContentBlock>)> = Vec::new();

    for msg in messages {
        if msg.role == Role::System {
            let text = msg.content.as_text();
            if !text.is_empty() {
                system_blocks.push(SystemContentBlock::Text(text));
            }
            continue;
        }

        let role = match msg.role {
            Role::Assistant => ConversationRole::Assistant,
            _ => ConversationRole::User,
        };
        let blocks = build_content_blocks(msg, options);

        match converse.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => converse.push((role, blocks)),
        }
    }

    let bedrock_messages = converse
        .into_iter()
        .filter_map(|(role, mut blocks)| {
            if blocks.is_empty() {
                blocks.push(ContentBlock::Text(crate::convert::PLACEHOLDER_USER_TEXT.to_owned()));
            }
            BedrockMessage::builder().role(role).set_content(Some(blocks)).build().ok()
        })
        .collect();

    (system_blocks, bedrock_messages)
}

fn build_content_blocks(msg: &Message, options: &InvokeOptions) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();

    if msg.role == Role::Tool {
        let result = ToolResultBlock::builder()
            .tool_use_id(msg.tool_call_id.clone().unwrap_or_default())
            .content(ToolResultContentBlock::Text(msg.content.as_text()))
            .build();
        if let Ok(result) = result {
            blocks.push(ContentBlock::ToolResult(result));
        }
        return blocks;
    }

    match &msg.content {
        Content::Text(text) => {
            if !text.is_empty() {
                blocks.push(ContentBlock::Text(text.clone()));
            }
        }
        Content::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => blocks.push(ContentBlock::Text(text.clone())),
                    ContentPart::ImageUrl { image_url } => {
                        if let Some(block) = image_block_from_data_url(&image_url.url) {
                            blocks.push(block);
                        }
                    }
                }
            }
        }
    }

    if let Some(calls) = &msg.tool_calls {
        for tc in calls {
            let input =
                serde_json::from_str::<serde_json::Value>(&tc.function.arguments).unwrap_or_else(|_| serde_json::json!({}));
            let tool_use = ToolUseBlock::builder()
                .tool_use_id(&tc.id)
                .name(&tc.function.name)
                .input(value_to_document(&input))
                .build();
            if let Ok(tool_use) = tool_use {
                blocks.push(ContentBlock::ToolUse(tool_use));
            }
        }
    }

    if let (Some(resolver), Some(attachments)) = (&options.assets, &msg.attachments) {
        for asset in attachments {
            if let Some(ResolvedAsset::Binary { bytes, mime_type }) = resolver.resolved(&asset.url)
                && let Some(block) = image_block_from_bytes(bytes, &mime_type)
            {
                blocks.push(block);
            }
        }
    }

    blocks
}

/// Decode an inline data URL into a Converse image block
fn image_block_from_data_url(url: &str) -> Option<ContentBlock> {
    let rest = url.strip_prefix("data:")?;
    let (mime_type, data) = rest.split_once(";base64,")?;
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, data).ok()?;
    image_block_from_bytes(bytes, mime_type)
}

fn image_block_from_bytes(bytes: Vec<u8>, mime_type: &str) -> Option<ContentBlock> {
    let format = match mime_type {
        "image/png" => ImageFormat::Png,
        "image/gif" => ImageFormat::Gif,
        "image/webp" => ImageFormat::Webp,
        _ => ImageFormat::Jpeg,
    };

    ImageBlock::builder()
        .format(format)
        .source(ImageSource::Bytes(aws_smithy_types::Blob::new(bytes)))
        .build()
        .ok()
        .map(ContentBlock::Image)
}

fn extract_response_message(msg: &BedrockMessage) -> (Option<String>, Option<Vec<ToolCall>>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in msg.content() {
        match block {
            ContentBlock::Text(t) => text.push_str(t),
            ContentBlock::ToolUse(tu) => {
                let arguments =
                    serde_json::to_string(&document_to_value(tu.input())).unwrap_or_else(|_| "{}".to_owned());
                tool_calls.push(ToolCall {
                    id: tu.tool_use_id().to_owned(),
                    function: FunctionCall {
                        name: tu.name().to_owned(),
                        arguments,
                    },
                });
            }
            _ => {}
        }
    }

    (
        if text.is_empty() { None } else { Some(text) },
        if tool_calls.is_empty() { None } else { Some(tool_calls) },
    )
}

/// Convert a `serde_json::Value` to an AWS `Document`
fn value_to_document(value: &serde_json::Value) -> aws_smithy_types::Document {
    match value {
        serde_json::Value::Null => aws_smithy_types::Document::Null,
        serde_json::Value::Bool(b) => aws_smithy_types::Document::Bool(*b),
        serde_json::Value::Number(n) =>
        {
            #[allow(clippy::cast_precision_loss)]
            n.as_i64().map_or_else(
                || {
                    n.as_f64().map_or(aws_smithy_types::Document::Null, |f| {
                        aws_smithy_types::Document::Number(aws_smithy_types::Number::Float(f))
                    })
                },
                |i| aws_smithy_types::Document::Number(aws_smithy_types::Number::Float(i as f64)),
            )
        }
        serde_json::Value::String(s) => aws_smithy_types::Document::String(s.clone()),
        serde_json::Value::Array(arr) => aws_smithy_types::Document::Array(arr.iter().map(value_to_document).collect()),
        serde_json::Value::Object(map) => {
            let obj: std::collections::HashMap<String, aws_smithy_types::Document> =
                map.iter().map(|(k, v)| (k.clone(), value_to_document(v))).collect();
            aws_smithy_types::Document::Object(obj)
        }
    }
}

/// Convert an AWS `Document` to a `serde_json::Value`
fn document_to_value(doc: &aws_smithy_types::Document) -> serde_json::Value {
    match doc {
        aws_smithy_types::Document::Object(map) => {
            let obj: serde_json::Map<String, serde_json::Value> =
                map.iter().map(|(k, v)| (k.clone(), document_to_value(v))).collect();
            serde_json::Value::Object(obj)
        }
        aws_smithy_types::Document::Array(arr) => serde_json::Value::Array(arr.iter().map(document_to_value).collect()),
        aws_smithy_types::Document::Number(n) => {
            let f = n.to_f64_lossy();
            serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        aws_smithy_types::Document::String(s) => serde_json::Value::String(s.clone()),
        aws_smithy_types::Document::Bool(b) => serde_json::Value::Bool(*b),
        aws_smithy_types::Document::Null => serde_json::Value::Null,
    }
}
