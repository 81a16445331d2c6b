//! Pure mapping between the generic chat model and the OpenAI-compatible wire shapes.

use serde_json::{Map, Value};

use crate::error::{ModelError, ModelResult};
use crate::models::{
    Candidate, Content, FinishReason, FunctionCall, GenerateContentRequest,
    GenerateContentResponse, GenerationConfig, Part, Role,
};
use crate::types::{ModelId, UsageMetadata};
use crate::wire::{
    ChatMessage, ChatRequest, ChatResponse, FunctionCallDelta, MessageRole, StreamEvent, Usage,
};

/// Translate a generation request into a chat completion body.
///
/// Parameters set on the request win over `defaults`; a parameter absent
/// from both is left out of the payload.
pub fn to_chat_request(
    request: &GenerateContentRequest,
    model: &ModelId,
    defaults: &GenerationConfig,
) -> ChatRequest {
    let params = &request.config;
    ChatRequest {
        model: model.as_str().to_string(),
        messages: to_chat_messages(request),
        temperature: params.temperature.or(defaults.temperature),
        max_tokens: params.max_tokens.or(defaults.max_tokens),
        top_p: params.top_p.or(defaults.top_p),
        stream: None,
    }
}

/// System instruction first, then one message per turn in order.
/// Only text parts are carried over.
pub fn to_chat_messages(request: &GenerateContentRequest) -> Vec<ChatMessage> {
    let system = request
        .system_instruction
        .as_ref()
        .map(|instruction| ChatMessage::new(MessageRole::System, instruction.text()));

    let turns = request.contents.iter().map(|content| {
        let role = match content.role {
            Role::User => MessageRole::User,
            Role::Model => MessageRole::Assistant,
        };
        ChatMessage::new(role, content.text())
    });

    system.into_iter().chain(turns).collect()
}

/// Map a wire finish reason; anything unrecognised, including a missing value, is `Other`
pub fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::MaxTokens,
        Some("content_filter") => FinishReason::Safety,
        _ => FinishReason::Other,
    }
}

fn map_usage(usage: Option<Usage>) -> UsageMetadata {
    usage
        .map(|u| UsageMetadata::new(u.prompt_tokens, u.completion_tokens, u.total_tokens))
        .unwrap_or_default()
}

/// Parse a legacy `function_call`; the JSON-encoded arguments must be an object
pub fn parse_function_call(call: &FunctionCallDelta) -> ModelResult<FunctionCall> {
    let args = match call.arguments.as_deref().map(str::trim) {
        None | Some("") => Map::new(),
        Some(raw) => serde_json::from_str::<Map<String, Value>>(raw).map_err(|e| {
            ModelError::Parse(format!(
                "invalid arguments for function `{}`: {}",
                call.name.as_deref().unwrap_or_default(),
                e
            ))
        })?,
    };
    Ok(FunctionCall::new(call.name.clone().unwrap_or_default(), args))
}

/// Translate a unary response. Only the first choice is used.
pub fn from_chat_response(response: ChatResponse) -> ModelResult<GenerateContentResponse> {
    let usage = map_usage(response.usage);
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::Translation("response contains no choices".to_string()))?;

    let text = choice.message.content.unwrap_or_default();
    let function_call = choice
        .message
        .function_call
        .as_ref()
        .map(parse_function_call)
        .transpose()
        .map_err(|e| ModelError::Translation(e.to_string()))?;

    let mut parts = Vec::new();
    if !text.is_empty() || function_call.is_none() {
        parts.push(Part::text(text.clone()));
    }
    if let Some(call) = &function_call {
        parts.push(Part::function_call(call.clone()));
    }

    Ok(GenerateContentResponse {
        candidates: vec![Candidate {
            content: Content::new(Role::Model, parts),
            finish_reason: Some(map_finish_reason(choice.finish_reason.as_deref())),
            index: choice.index,
        }],
        text,
        function_calls: function_call.into_iter().collect(),
        usage,
    })
}

/// Translate one stream event into a chunk.
///
/// Returns `Ok(None)` for events with nothing to report: no choice, or a
/// delta with neither content nor a finish reason.
pub fn from_stream_event(event: StreamEvent) -> ModelResult<Option<GenerateContentResponse>> {
    let usage = map_usage(event.usage);
    let Some(choice) = event.choices.into_iter().next() else {
        return Ok(None);
    };

    let text = choice.delta.content.unwrap_or_default();
    let function_call = choice
        .delta
        .function_call
        .as_ref()
        .map(parse_function_call)
        .transpose()?;

    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(Part::text(text.clone()));
    }
    if let Some(call) = &function_call {
        parts.push(Part::function_call(call.clone()));
    }

    if parts.is_empty() && choice.finish_reason.is_none() {
        return Ok(None);
    }

    Ok(Some(GenerateContentResponse {
        candidates: vec![Candidate {
            content: Content::new(Role::Model, parts),
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map(|reason| map_finish_reason(Some(reason))),
            index: choice.index,
        }],
        text,
        function_calls: function_call.into_iter().collect(),
        usage,
    }))
}

/// All text of the given turns, concatenated in order
pub fn contents_text(contents: &[Content]) -> String {
    contents.iter().map(Content::text).collect()
}
