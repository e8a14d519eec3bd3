//! Translate Anthropic Messages API requests into `OpenAI` Chat Completions requests.
//!
//! Handles the system prompt, multi-block content (text, images), tool use, tool results,
//! and tool choice mapping. A single Anthropic turn can expand into multiple `OpenAI`
//! messages: a user turn with `tool_result` blocks becomes one `tool`-role message per
//! result, followed by a user message for whatever else the turn carried.

use std::collections::HashSet;

use super::anthropic_types::{
    join_text, ContentBlock, Message, MessagesRequest, Role, Tool, ToolChoice, ToolChoiceAuto,
    ToolChoiceSpecific, ToolResultContent,
};
use super::context::TranslationContext;
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatTool, ChatToolCall,
    ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction, ChatToolChoiceSpecific,
    ContentPart, ImageUrlDetail, StreamOptions,
};
use crate::error::{ProxyError, Result};

/// Translate an Anthropic Messages API request into an `OpenAI` Chat Completions request.
///
/// # Errors
/// Returns `ProxyError::Validation` if the conversation is empty or a `tool_result`
/// references a `tool_use` id that no earlier assistant turn produced.
pub fn anthropic_to_openai(
    req: &MessagesRequest,
    ctx: &TranslationContext,
) -> Result<ChatCompletionRequest> {
    if req.messages.is_empty() {
        return Err(ProxyError::validation("messages must not be empty"));
    }

    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(ref system) = ctx.system {
        messages.push(ChatMessage::text("system", system.clone()));
    }

    let mut tool_ids = ToolIds::default();
    for (turn, msg) in req.messages.iter().enumerate() {
        let mut translated = translate_message(msg, turn, &mut tool_ids)?;
        messages.append(&mut translated);
    }

    let tools: Option<Vec<ChatTool>> = req
        .tools
        .as_ref()
        .filter(|tools| !tools.is_empty())
        .map(|tools| tools.iter().map(translate_tool).collect());

    // tool_choice without tools is rejected by most providers
    let tool_choice = tools
        .as_ref()
        .and(req.tool_choice.as_ref())
        .map(translate_tool_choice);

    let stream = req.is_streaming();
    let stream_options = stream.then_some(StreamOptions {
        include_usage: true,
    });

    Ok(ChatCompletionRequest {
        model: ctx.upstream_model.clone(),
        messages,
        max_tokens: Some(ctx.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        stream,
        stream_options,
        tools,
        tool_choice,
        stop: req.stop_sequences.clone(),
        user: req.metadata.as_ref().and_then(|m| m.user_id.clone()),
    })
}

/// `tool_use` ids issued by assistant turns so far, and those already answered.
#[derive(Debug, Default)]
struct ToolIds {
    issued: HashSet<String>,
    answered: HashSet<String>,
}

fn translate_message(
    msg: &Message,
    turn: usize,
    tool_ids: &mut ToolIds,
) -> Result<Vec<ChatMessage>> {
    let blocks = msg.content.blocks();

    match msg.role {
        Role::User => translate_user_message(&blocks, turn, tool_ids),
        Role::Assistant => Ok(vec![translate_assistant_message(
            &blocks,
            &mut tool_ids.issued,
        )]),
    }
}

fn translate_user_message(
    blocks: &[ContentBlock],
    turn: usize,
    tool_ids: &mut ToolIds,
) -> Result<Vec<ChatMessage>> {
    let mut messages = Vec::new();
    let mut content_parts: Vec<ContentPart> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                content_parts.push(ContentPart::Text { text: text.clone() });
            }
            ContentBlock::Image { source } => {
                let data_uri = format!("data:{};base64,{}", source.media_type, source.data);
                content_parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrlDetail { url: data_uri },
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                if !tool_ids.issued.contains(tool_use_id) {
                    return Err(ProxyError::validation(format!(
                        "messages.{turn}: tool_result references unknown tool_use_id '{tool_use_id}'"
                    )));
                }
                if !tool_ids.answered.insert(tool_use_id.clone()) {
                    return Err(ProxyError::validation(format!(
                        "messages.{turn}: duplicate tool_result for tool_use_id '{tool_use_id}'"
                    )));
                }
                // Tool messages must directly follow the assistant message that called them,
                // so they go ahead of any text in the same turn.
                messages.push(ChatMessage::tool(
                    tool_use_id.clone(),
                    tool_result_to_string(content.as_ref(), *is_error),
                ));
            }
            ContentBlock::Thinking { .. } | ContentBlock::ToolUse { .. } => {}
        }
    }

    if !content_parts.is_empty() || messages.is_empty() {
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: Some(collapse_content_parts(content_parts)),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    Ok(messages)
}

fn translate_assistant_message(
    blocks: &[ContentBlock],
    issued_tool_ids: &mut HashSet<String>,
) -> ChatMessage {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                issued_tool_ids.insert(id.clone());
                tool_calls.push(ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        // Value -> String serialization cannot fail
                        arguments: input.to_string(),
                    },
                });
            }
            ContentBlock::Thinking { .. }
            | ContentBlock::Image { .. }
            | ContentBlock::ToolResult { .. } => {}
        }
    }

    let text = join_text(text_parts);
    let content = if text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(ChatContent::Text(text))
    };

    ChatMessage {
        role: "assistant".to_string(),
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    }
}

/// Plain text stays a string; anything with an image becomes a parts array.
fn collapse_content_parts(parts: Vec<ContentPart>) -> ChatContent {
    let all_text = parts
        .iter()
        .all(|p| matches!(p, ContentPart::Text { .. }));

    if all_text {
        let text = join_text(parts.iter().map(|p| match p {
            ContentPart::Text { text } => text.as_str(),
            ContentPart::ImageUrl { .. } => "",
        }));
        return ChatContent::Text(text);
    }
    ChatContent::Parts(parts)
}

/// Render a tool result as the string content of a `tool` message.
pub fn tool_result_to_string(content: Option<&ToolResultContent>, is_error: Option<bool>) -> String {
    let prefix = if is_error == Some(true) { "ERROR: " } else { "" };

    let body = match content {
        Some(ToolResultContent::Text(t)) => t.clone(),
        Some(ToolResultContent::Blocks(blocks)) => {
            let rendered: Vec<String> = blocks.iter().map(render_result_block).collect();
            join_text(rendered.iter().map(String::as_str))
        }
        Some(ToolResultContent::Structured(serde_json::Value::Null)) | None => String::new(),
        Some(ToolResultContent::Structured(value)) => value.to_string(),
    };

    format!("{prefix}{body}")
}

/// Text blocks contribute their text; any other block is kept as compact JSON.
fn render_result_block(block: &serde_json::Value) -> String {
    let is_text = block.get("type").and_then(|t| t.as_str()) == Some("text");
    match block.get("text").and_then(|t| t.as_str()) {
        Some(text) if is_text => text.to_string(),
        _ => match block {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

fn translate_tool(tool: &Tool) -> ChatTool {
    ChatTool {
        tool_type: "function".to_string(),
        function: ChatFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
        },
    }
}

fn translate_tool_choice(tc: &ToolChoice) -> ChatToolChoice {
    match tc {
        ToolChoice::Auto(ToolChoiceAuto { choice_type }) => match choice_type.as_str() {
            "any" => ChatToolChoice::String("required".to_string()),
            "none" => ChatToolChoice::String("none".to_string()),
            _ => ChatToolChoice::String("auto".to_string()),
        },
        ToolChoice::Specific(ToolChoiceSpecific { name, .. }) => {
            ChatToolChoice::Specific(ChatToolChoiceSpecific {
                choice_type: "function".to_string(),
                function: ChatToolChoiceFunction { name: name.clone() },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::translate::anthropic_types::*;
    use serde_json::json;

    fn request(messages: serde_json::Value) -> MessagesRequest {
        serde_json::from_value(json!({
            "model": "claude-sonnet-4-20250514",
            "max_tokens": 1024,
            "messages": messages,
        }))
        .unwrap()
    }

    fn translate(req: &MessagesRequest) -> Result<ChatCompletionRequest> {
        let config = ProxyConfig::new("http://localhost:1", "test-key");
        anthropic_to_openai(req, &TranslationContext::new(req, &config))
    }

    fn weather_exchange() -> serde_json::Value {
        json!([
            {"role": "user", "content": "Weather in NYC and Paris?"},
            {"role": "assistant", "content": [
                {"type": "text", "text": "Checking both."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "NYC"}},
                {"type": "tool_use", "id": "toolu_2", "name": "get_weather", "input": {"city": "Paris", "units": ["c"]}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "Sunny"},
                {"type": "tool_result", "tool_use_id": "toolu_2", "content": [{"type": "text", "text": "Rain"}]},
                {"type": "text", "text": "Summarize please."}
            ]}
        ])
    }

    #[test]
    fn test_system_prompt_leads() {
        let mut req = MessagesRequest::user_text("m", 10, "Hello");
        req.system = Some(SystemContent::Text("You are helpful".to_string()));

        let result = translate(&req).unwrap();
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].role, "system");
        assert_eq!(result.messages[0].content_text(), Some("You are helpful"));
        assert_eq!(result.messages[1].role, "user");
        assert_eq!(result.messages[1].content_text(), Some("Hello"));
    }

    #[test]
    fn test_no_system_prompt_emits_no_system_message() {
        let result = translate(&MessagesRequest::user_text("m", 10, "Hello")).unwrap();
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].role, "user");
    }

    #[test]
    fn test_empty_messages_rejected() {
        let req = request(json!([]));
        assert!(matches!(translate(&req), Err(ProxyError::Validation { .. })));
    }

    #[test]
    fn test_user_text_blocks_joined_with_newline() {
        let req = request(json!([{"role": "user", "content": [
            {"type": "text", "text": "first"},
            {"type": "text", "text": ""},
            {"type": "text", "text": "second"}
        ]}]));
        let result = translate(&req).unwrap();
        assert_eq!(result.messages[0].content_text(), Some("first\nsecond"));
    }

    #[test]
    fn test_tool_use_blocks_become_ordered_tool_calls() {
        let result = translate(&request(weather_exchange())).unwrap();

        let assistant = &result.messages[1];
        assert_eq!(assistant.role, "assistant");
        assert_eq!(assistant.content_text(), Some("Checking both."));

        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(calls[1].id, "toolu_2");
        assert_eq!(calls[0].function.arguments, r#"{"city":"NYC"}"#);
        let parsed: serde_json::Value = serde_json::from_str(&calls[1].function.arguments).unwrap();
        assert_eq!(parsed, json!({"city": "Paris", "units": ["c"]}));
    }

    #[test]
    fn test_tool_results_split_into_tool_messages_before_text() {
        let result = translate(&request(weather_exchange())).unwrap();

        let roles: Vec<&str> = result.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "tool", "tool", "user"]);
        assert_eq!(result.messages[2].tool_call_id.as_deref(), Some("toolu_1"));
        assert_eq!(result.messages[2].content_text(), Some("Sunny"));
        assert_eq!(result.messages[3].tool_call_id.as_deref(), Some("toolu_2"));
        assert_eq!(result.messages[3].content_text(), Some("Rain"));
        assert_eq!(result.messages[4].content_text(), Some("Summarize please."));
    }

    #[test]
    fn test_tool_only_assistant_has_null_content() {
        let req = request(json!([
            {"role": "user", "content": "go"},
            {"role": "assistant", "content": [
                {"type": "tool_use", "id": "toolu_9", "name": "ls", "input": {}}
            ]}
        ]));
        let result = translate(&req).unwrap();
        assert_eq!(result.messages[1].content, None);
        assert_eq!(
            result.messages[1].tool_calls.as_ref().unwrap()[0].function.arguments,
            "{}"
        );
    }

    #[test]
    fn test_dangling_tool_result_rejected() {
        let req = request(json!([
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_missing", "content": "x"}
            ]}
        ]));
        match translate(&req) {
            Err(ProxyError::Validation { message }) => assert!(message.contains("toolu_missing")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_tool_result_must_follow_its_tool_use() {
        let req = request(json!([
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "early"}
            ]},
            {"role": "assistant", "content": [
                {"type": "tool_use", "id": "toolu_1", "name": "ls", "input": {}}
            ]}
        ]));
        assert!(matches!(translate(&req), Err(ProxyError::Validation { .. })));
    }

    #[test]
    fn test_second_tool_result_for_same_id_rejected() {
        let req = request(json!([
            {"role": "user", "content": "list files"},
            {"role": "assistant", "content": [
                {"type": "tool_use", "id": "toolu_1", "name": "ls", "input": {}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "a.txt"}
            ]},
            {"role": "assistant", "content": "Found a.txt."},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "b.txt"}
            ]}
        ]));
        match translate(&req) {
            Err(ProxyError::Validation { message }) => {
                assert!(message.starts_with("messages.4:"));
                assert!(message.contains("duplicate tool_result"));
                assert!(message.contains("toolu_1"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_tool_result_stringification() {
        assert_eq!(
            tool_result_to_string(Some(&ToolResultContent::Text("ok".into())), Some(true)),
            "ERROR: ok"
        );
        assert_eq!(tool_result_to_string(None, None), "");
        assert_eq!(
            tool_result_to_string(
                Some(&ToolResultContent::Structured(json!({"rows": 2}))),
                None
            ),
            r#"{"rows":2}"#
        );
        let image = json!({"type": "image", "source": {"type": "url"}});
        let rendered = tool_result_to_string(
            Some(&ToolResultContent::Blocks(vec![
                json!({"type": "text", "text": "a"}),
                image.clone(),
            ])),
            None,
        );
        let (text, rest) = rendered.split_once('\n').unwrap();
        assert_eq!(text, "a");
        assert_eq!(serde_json::from_str::<serde_json::Value>(rest).unwrap(), image);
    }

    #[test]
    fn test_tools_and_tool_choice_mapping() {
        let mut req = MessagesRequest::user_text("m", 10, "weather?");
        req.tools = Some(vec![Tool {
            name: "get_weather".to_string(),
            description: Some("Get current weather".to_string()),
            input_schema: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
        }]);
        req.tool_choice = Some(ToolChoice::Auto(ToolChoiceAuto {
            choice_type: "any".to_string(),
        }));

        let result = translate(&req).unwrap();
        let tools = result.tools.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].tool_type, "function");
        assert_eq!(tools[0].function.name, "get_weather");
        assert_eq!(tools[0].function.parameters["properties"]["city"]["type"], "string");
        assert_eq!(
            result.tool_choice,
            Some(ChatToolChoice::String("required".to_string()))
        );
    }

    #[test]
    fn test_tool_choice_dropped_without_tools() {
        let mut req = MessagesRequest::user_text("m", 10, "hi");
        req.tool_choice = Some(ToolChoice::Specific(ToolChoiceSpecific {
            choice_type: "tool".to_string(),
            name: "x".to_string(),
        }));
        assert!(translate(&req).unwrap().tool_choice.is_none());
    }

    #[test]
    fn test_streaming_flag_and_usage_request() {
        let mut req = MessagesRequest::user_text("m", 10, "hi");
        assert!(!translate(&req).unwrap().stream);

        req.stream = Some(true);
        let result = translate(&req).unwrap();
        assert!(result.stream);
        assert!(result.stream_options.unwrap().include_usage);
    }

    #[test]
    fn test_image_block_becomes_data_uri_part() {
        let req = request(json!([{"role": "user", "content": [
            {"type": "text", "text": "what is this?"},
            {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}}
        ]}]));
        let result = translate(&req).unwrap();
        match result.messages[0].content.as_ref().unwrap() {
            ChatContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(
                    parts[1],
                    ContentPart::ImageUrl {
                        image_url: ImageUrlDetail {
                            url: "data:image/png;base64,AAAA".to_string()
                        }
                    }
                );
            }
            other => panic!("expected parts, got {other:?}"),
        }
    }
}
