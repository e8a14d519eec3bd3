use super::anthropic_types::{
    ErrorResponse, MessagesResponse, ResponseContentBlock, StopReason, Usage,
};
use super::openai_types::{ChatCompletionResponse, ChatErrorResponse, ChatUsage};
use super::reassembler::parse_arguments;
use crate::error::{ProxyError, Result};

/// Translate an OpenAI Chat Completion response into an Anthropic Messages response.
/// Pure function: `requested_model` is what the client originally asked for.
///
/// # Errors
/// Returns `ProxyError::UpstreamProtocol` if the response has no choices, or
/// `ProxyError::MalformedToolArguments` if a tool call's arguments are not valid JSON.
pub fn openai_to_anthropic(
    resp: &ChatCompletionResponse,
    requested_model: &str,
) -> Result<MessagesResponse> {
    let choice = resp.choices.first().ok_or_else(|| {
        ProxyError::protocol(
            "provider response has no choices",
            serde_json::to_string(resp).unwrap_or_default(),
        )
    })?;

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    let text = choice
        .message
        .content
        .as_deref()
        .filter(|s| !s.is_empty())
        .or_else(|| {
            choice
                .message
                .reasoning_content
                .as_deref()
                .filter(|s| !s.is_empty())
        });
    if let Some(text) = text {
        content.push(ResponseContentBlock::Text {
            text: text.to_string(),
        });
    }

    let mut has_tool_use = false;
    for tc in choice.message.tool_calls.iter().flatten() {
        let input = parse_arguments(&tc.id, &tc.function.arguments)?;
        content.push(ResponseContentBlock::ToolUse {
            id: tc.id.clone(),
            name: tc.function.name.clone(),
            input,
        });
        has_tool_use = true;
    }

    // Clients expect non-empty content
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let mut stop_reason = choice
        .finish_reason
        .as_deref()
        .map_or(StopReason::EndTurn, map_finish_reason);
    if has_tool_use && stop_reason == StopReason::EndTurn {
        stop_reason = StopReason::ToolUse;
    }

    Ok(MessagesResponse {
        id: message_id(&resp.id),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: requested_model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage: translate_usage(resp.usage.as_ref()),
    })
}

/// Map an OpenAI `finish_reason` to an Anthropic `stop_reason`.
/// Unknown reasons end the turn; they are logged, never fatal.
pub fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "stop" | "content_filter" => StopReason::EndTurn,
        "length" => StopReason::MaxTokens,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        other => {
            tracing::warn!(finish_reason = other, "Unrecognized finish_reason, using end_turn");
            StopReason::EndTurn
        }
    }
}

pub fn translate_usage(usage: Option<&ChatUsage>) -> Usage {
    usage.map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    })
}

/// Anthropic-looking message id derived from the provider's completion id.
pub fn message_id(upstream_id: &str) -> String {
    let suffix = upstream_id.trim_start_matches("chatcmpl-");
    if suffix.is_empty() {
        format!("msg_{}", uuid::Uuid::new_v4().simple())
    } else {
        format!("msg_{suffix}")
    }
}

/// Translate an OpenAI error into an Anthropic error response
pub fn openai_error_to_anthropic(err: &ChatErrorResponse) -> ErrorResponse {
    let error_type = match err.error.error_type.as_str() {
        "invalid_request_error" => "invalid_request_error",
        "authentication_error" | "invalid_api_key" => "authentication_error",
        "permission_error" => "permission_error",
        "not_found_error" => "not_found_error",
        "rate_limit_error" | "rate_limit_exceeded" | "insufficient_quota" => "rate_limit_error",
        "overloaded_error" => "overloaded_error",
        _ => "api_error",
    };

    ErrorResponse::new(error_type, &err.error.message)
}
