//! State machine for translating OpenAI streaming chunks into Anthropic SSE events.
//!
//! The [`StreamTranslator`] processes OpenAI `ChatCompletionChunk`s one at a time,
//! tracking which content blocks are open, and emits the corresponding Anthropic stream
//! events (`message_start`, `content_block_delta`, ...). It does no I/O, so the same logic
//! runs behind the async proxy and under tests fed with canned chunk sequences.
//!
//! Per response the translator moves through
//! `Idle -> Start -> (InText | InToolCall)* -> Closing -> Done`:
//! text fragments open a text block, the first delta of each tool-call slot closes any
//! open text block and opens a `tool_use` block, and the finish signal finalizes every
//! tool call and closes all open blocks. `message_delta` and `message_stop` are held back
//! until the upstream ends so that a trailing usage chunk is still reported.
//!
//! `reasoning_content` is buffered rather than streamed. It becomes the text block only
//! if the response carries no regular content by the time a tool call opens or the
//! stream closes, which is the same rule the non-streaming translation applies.

use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StopReason,
    StreamEvent, Usage,
};
use super::openai_types::{ChatCompletionChunk, ChunkToolCall};
use super::reassembler::{CompletedToolCall, ToolCallReassembler};
use super::response::{map_finish_reason, translate_usage};
use crate::error::{ProxyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing emitted yet.
    Idle,
    /// `message_start` sent, no content block open.
    Start,
    /// The most recent content went to an open text block.
    InText,
    /// The most recent content went to a tool-call block.
    InToolCall,
    /// Finish signal seen; every block is closed.
    Closing,
    /// `message_stop` or a terminal error has been emitted.
    Done,
}

#[derive(Debug, Clone, Copy)]
struct ToolBlock {
    slot: u64,
    index: usize,
}

/// State machine that translates OpenAI streaming chunks into Anthropic SSE events.
///
/// Usage:
///   let mut translator = StreamTranslator::new("claude-sonnet-4-20250514");
///   for chunk in openai_chunks {
///       let events = translator.process_chunk(&chunk);
///       // send each event as SSE
///   }
///   let final_events = translator.finish();
#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    msg_id: String,
    state: StreamState,
    next_block_index: usize,
    text_block: Option<usize>,
    tool_blocks: Vec<ToolBlock>,
    reassembler: ToolCallReassembler,
    completed: Vec<CompletedToolCall>,
    stop_reason: Option<StopReason>,
    usage: Usage,
    /// Reasoning text held back; `None` once regular content arrived or it was flushed.
    reasoning: Option<String>,
}

impl StreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            state: StreamState::Idle,
            next_block_index: 0,
            text_block: None,
            tool_blocks: Vec::new(),
            reassembler: ToolCallReassembler::new(),
            completed: Vec::new(),
            stop_reason: None,
            usage: Usage::default(),
            reasoning: Some(String::new()),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == StreamState::Done
    }

    /// Tool calls finalized so far, in block order.
    pub fn completed_tool_calls(&self) -> &[CompletedToolCall] {
        &self.completed
    }

    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    /// Feed one item pulled from the upstream: a chunk, or the error that ended the stream.
    pub fn step(&mut self, item: Result<ChatCompletionChunk>) -> Vec<StreamEvent> {
        match item {
            Ok(chunk) => self.process_chunk(&chunk),
            Err(e) => self.fail(&e),
        }
    }

    /// Drive the translator over a complete chunk sequence, including the end of stream.
    pub fn translate_all<I>(&mut self, chunks: I) -> Vec<StreamEvent>
    where
        I: IntoIterator<Item = Result<ChatCompletionChunk>>,
    {
        let mut events = Vec::new();
        for item in chunks {
            events.append(&mut self.step(item));
            if self.is_finished() {
                return events;
            }
        }
        events.append(&mut self.finish());
        events
    }

    /// Process a single OpenAI streaming chunk, returning zero or more Anthropic SSE events.
    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        if self.state == StreamState::Done {
            return Vec::new();
        }

        if let Some(ref usage) = chunk.usage {
            self.usage = translate_usage(Some(usage));
        }

        let mut events = Vec::new();
        self.ensure_started(&mut events);

        if self.state == StreamState::Closing {
            return events;
        }

        let Some(choice) = chunk.choices.first() else {
            return events;
        };

        // Reasoning models (Kimi K2.5, DeepSeek R1) stream chain-of-thought in
        // `reasoning_content` ahead of the answer.
        match choice.delta.content.as_deref().filter(|s| !s.is_empty()) {
            Some(text) => {
                self.reasoning = None;
                self.push_text(text, &mut events);
            }
            None => {
                if let (Some(buffer), Some(thought)) =
                    (self.reasoning.as_mut(), choice.delta.reasoning_content.as_deref())
                {
                    buffer.push_str(thought);
                }
            }
        }

        for tc in choice.delta.tool_calls.iter().flatten() {
            self.push_tool_delta(tc, &mut events);
        }

        if let Some(ref reason) = choice.finish_reason {
            if let Err(e) = self.close_blocks(map_finish_reason(reason), &mut events) {
                events.append(&mut self.fail(&e));
            }
        }

        events
    }

    /// Call when the upstream stream ends (on `[DONE]` or connection close).
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.state == StreamState::Done {
            return Vec::new();
        }

        let mut events = Vec::new();
        self.ensure_started(&mut events);

        // Upstream ended without a finish signal
        if self.state != StreamState::Closing {
            if let Err(e) = self.close_blocks(StopReason::EndTurn, &mut events) {
                events.append(&mut self.fail(&e));
                return events;
            }
        }

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: self.stop_reason,
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: self.usage.output_tokens,
            },
        });
        events.push(StreamEvent::MessageStop);
        self.state = StreamState::Done;

        events
    }

    /// Terminate the stream with an error event. Events already sent stay sent.
    pub fn fail(&mut self, err: &ProxyError) -> Vec<StreamEvent> {
        if self.state == StreamState::Done {
            return Vec::new();
        }
        self.state = StreamState::Done;
        vec![StreamEvent::Error {
            error: err.to_error_response().error,
        }]
    }

    fn ensure_started(&mut self, events: &mut Vec<StreamEvent>) {
        if self.state == StreamState::Idle {
            events.push(self.make_message_start());
            events.push(StreamEvent::Ping);
            self.state = StreamState::Start;
        }
    }

    fn open_block(&mut self) -> usize {
        let index = self.next_block_index;
        self.next_block_index += 1;
        index
    }

    fn push_text(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        let index = match self.text_block {
            Some(index) => index,
            None => {
                let index = self.open_block();
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseContentBlock::Text {
                        text: String::new(),
                    },
                });
                self.text_block = Some(index);
                index
            }
        };

        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::TextDelta {
                text: text.to_string(),
            },
        });
        self.state = StreamState::InText;
    }

    /// Emit buffered reasoning as text when no regular content ever arrived.
    fn flush_reasoning(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(text) = self.reasoning.take().filter(|t| !t.is_empty()) {
            self.push_text(&text, events);
        }
    }

    fn push_tool_delta(&mut self, tc: &ChunkToolCall, events: &mut Vec<StreamEvent>) {
        let is_new = self.reassembler.apply(tc);

        let index = if is_new {
            self.flush_reasoning(events);
            if let Some(text_index) = self.text_block.take() {
                events.push(StreamEvent::ContentBlockStop { index: text_index });
            }

            let index = self.open_block();
            let id = self.reassembler.ensure_id(tc.index).unwrap_or_default();
            let name = self
                .reassembler
                .slot(tc.index)
                .map(|s| s.name().to_string())
                .unwrap_or_default();

            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: ResponseContentBlock::ToolUse {
                    id,
                    name,
                    input: serde_json::Value::Object(serde_json::Map::new()),
                },
            });
            self.tool_blocks.push(ToolBlock {
                slot: tc.index,
                index,
            });
            index
        } else {
            match self.tool_blocks.iter().find(|b| b.slot == tc.index) {
                Some(block) => block.index,
                None => return,
            }
        };

        let fragment = tc
            .function
            .as_ref()
            .and_then(|f| f.arguments.as_deref())
            .filter(|a| !a.is_empty());
        if let Some(fragment) = fragment {
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta {
                    partial_json: fragment.to_string(),
                },
            });
        }
        self.state = StreamState::InToolCall;
    }

    /// Finalize all tool calls, then close every open block in the order they were opened.
    fn close_blocks(&mut self, reason: StopReason, events: &mut Vec<StreamEvent>) -> Result<()> {
        self.flush_reasoning(events);

        for result in self.reassembler.finalize_all() {
            self.completed.push(result?);
        }

        let mut open: Vec<usize> = self.tool_blocks.iter().map(|b| b.index).collect();
        open.extend(self.text_block.take());
        open.sort_unstable();
        events.extend(
            open.into_iter()
                .map(|index| StreamEvent::ContentBlockStop { index }),
        );
        self.tool_blocks.clear();

        self.stop_reason = Some(if reason == StopReason::EndTurn && !self.completed.is_empty() {
            StopReason::ToolUse
        } else {
            reason
        });
        self.state = StreamState::Closing;
        Ok(())
    }

    fn make_message_start(&self) -> StreamEvent {
        StreamEvent::MessageStart {
            message: Box::new(MessagesResponse {
                id: self.msg_id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage {
                    input_tokens: self.usage.input_tokens,
                    output_tokens: 0,
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TimeoutPhase;
    use crate::translate::openai_types::*;
    use serde_json::json;

    fn text_chunk(content: &str, finish: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "c1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "test".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: Some(content.to_string()),
                    ..ChunkDelta::default()
                },
                finish_reason: finish.map(String::from),
            }],
            usage: None,
        }
    }

    fn tool_chunk(deltas: Vec<ChunkToolCall>, finish: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "c1".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    tool_calls: Some(deltas),
                    ..ChunkDelta::default()
                },
                finish_reason: finish.map(String::from),
            }],
            ..ChatCompletionChunk::default()
        }
    }

    fn tool_delta(index: u64, id: Option<&str>, name: Option<&str>, args: &str) -> ChunkToolCall {
        ChunkToolCall {
            index,
            id: id.map(String::from),
            call_type: None,
            function: Some(ChunkToolCallFunction {
                name: name.map(String::from),
                arguments: Some(args.to_string()),
            }),
        }
    }

    fn names(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(StreamEvent::event_name).collect()
    }

    fn starts_and_stops(events: &[StreamEvent]) -> (Vec<usize>, Vec<usize>) {
        let starts = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockStart { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        let stops = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockStop { index } => Some(*index),
                _ => None,
            })
            .collect();
        (starts, stops)
    }

    #[test]
    fn test_simple_text_stream() {
        let mut translator = StreamTranslator::new("test-model");

        let events = translator.process_chunk(&text_chunk("Hello", None));
        assert_eq!(
            names(&events),
            vec!["message_start", "ping", "content_block_start", "content_block_delta"]
        );
        assert_eq!(translator.state(), StreamState::InText);

        let events = translator.process_chunk(&text_chunk(" world", None));
        assert_eq!(names(&events), vec!["content_block_delta"]);

        let events = translator.process_chunk(&text_chunk("", Some("stop")));
        assert_eq!(names(&events), vec!["content_block_stop"]);
        assert_eq!(translator.state(), StreamState::Closing);

        let events = translator.finish();
        assert_eq!(names(&events), vec!["message_delta", "message_stop"]);
        assert!(matches!(
            &events[0],
            StreamEvent::MessageDelta { delta, .. } if delta.stop_reason == Some(StopReason::EndTurn)
        ));
        assert!(translator.is_finished());
        assert!(translator.finish().is_empty());
    }

    #[test]
    fn test_two_chunk_tool_call() {
        let mut translator = StreamTranslator::new("test-model");

        let first = tool_chunk(
            vec![tool_delta(0, Some("call_1"), Some("get_weather"), "{\"city\":")],
            None,
        );
        let second = tool_chunk(vec![tool_delta(0, None, None, "\"NYC\"}")], Some("tool_calls"));

        let events = translator.translate_all(vec![Ok(first), Ok(second)]);

        assert_eq!(
            names(&events),
            vec![
                "message_start",
                "ping",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
        assert_eq!(
            events[2],
            StreamEvent::ContentBlockStart {
                index: 0,
                content_block: ResponseContentBlock::ToolUse {
                    id: "call_1".to_string(),
                    name: "get_weather".to_string(),
                    input: json!({}),
                },
            }
        );
        let partials: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockDelta {
                    delta: Delta::InputJsonDelta { partial_json },
                    ..
                } => Some(partial_json.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(partials, "{\"city\":\"NYC\"}");

        let completed = translator.completed_tool_calls();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].input, json!({"city": "NYC"}));
        assert!(matches!(
            &events[6],
            StreamEvent::MessageDelta { delta, .. } if delta.stop_reason == Some(StopReason::ToolUse)
        ));
    }

    #[test]
    fn test_text_then_tool_closes_text_block_first() {
        let mut translator = StreamTranslator::new("test-model");
        let _ = translator.process_chunk(&text_chunk("Checking...", None));

        let events = translator.process_chunk(&tool_chunk(
            vec![tool_delta(0, Some("call_abc"), Some("search"), "{\"q\"")],
            None,
        ));
        assert_eq!(
            names(&events),
            vec!["content_block_stop", "content_block_start", "content_block_delta"]
        );
        assert_eq!(events[0], StreamEvent::ContentBlockStop { index: 0 });
        assert!(matches!(events[1], StreamEvent::ContentBlockStart { index: 1, .. }));
        assert_eq!(translator.state(), StreamState::InToolCall);
    }

    #[test]
    fn test_interleaved_slots_get_blocks_in_first_seen_order() {
        let mut translator = StreamTranslator::new("test-model");
        let events = translator.translate_all(vec![
            Ok(text_chunk("Two lookups.", None)),
            Ok(tool_chunk(
                vec![
                    tool_delta(0, Some("a"), Some("first"), "{\"n\":"),
                    tool_delta(1, Some("b"), Some("second"), "{\"n\":"),
                ],
                None,
            )),
            Ok(tool_chunk(vec![tool_delta(1, None, None, "2}")], None)),
            Ok(tool_chunk(vec![tool_delta(0, None, None, "1}")], Some("tool_calls"))),
        ]);

        let (starts, stops) = starts_and_stops(&events);
        assert_eq!(starts, vec![0, 1, 2]);
        assert_eq!(stops, vec![0, 1, 2]);

        // Slot 1's second fragment lands on block 2, slot 0's on block 1
        let routed: Vec<(usize, &str)> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::InputJsonDelta { partial_json },
                } => Some((*index, partial_json.as_str())),
                _ => None,
            })
            .collect();
        assert_eq!(routed, vec![(1, "{\"n\":"), (2, "{\"n\":"), (2, "2}"), (1, "1}")]);

        let inputs: Vec<_> = translator
            .completed_tool_calls()
            .iter()
            .map(|c| (c.name.as_str(), c.input.clone()))
            .collect();
        assert_eq!(inputs, vec![("first", json!({"n": 1})), ("second", json!({"n": 2}))]);
    }

    #[test]
    fn test_trailing_usage_chunk_is_reported() {
        let mut translator = StreamTranslator::new("test-model");
        let usage_chunk = ChatCompletionChunk {
            usage: Some(ChatUsage {
                prompt_tokens: 12,
                completion_tokens: 34,
                total_tokens: 46,
            }),
            ..ChatCompletionChunk::default()
        };

        let events = translator.translate_all(vec![
            Ok(text_chunk("hi", Some("length"))),
            Ok(usage_chunk),
        ]);

        let delta = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::MessageDelta { delta, usage } => Some((delta.clone(), usage.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(delta.0.stop_reason, Some(StopReason::MaxTokens));
        assert_eq!(delta.1.output_tokens, 34);
        assert_eq!(translator.usage().input_tokens, 12);
    }

    #[test]
    fn test_malformed_arguments_end_stream_with_error() {
        let mut translator = StreamTranslator::new("test-model");
        let events = translator.translate_all(vec![
            Ok(tool_chunk(vec![tool_delta(0, Some("c"), Some("f"), "{\"a\": tru")], None)),
            Ok(tool_chunk(vec![], Some("tool_calls"))),
        ]);

        let last = events.last().unwrap();
        assert_eq!(last.event_name(), "error");
        assert!(!names(&events).contains(&"message_stop"));
        if let StreamEvent::Error { error } = last {
            assert_eq!(error.error_type, "api_error");
            assert!(error.message.contains("{\"a\": tru"));
        }
        assert!(translator.is_finished());
    }

    #[test]
    fn test_upstream_error_mid_stream_is_terminal() {
        let mut translator = StreamTranslator::new("test-model");
        let events = translator.translate_all(vec![
            Ok(text_chunk("partial", None)),
            Err(ProxyError::timeout(TimeoutPhase::StreamIdle)),
            Ok(text_chunk("never seen", None)),
        ]);

        assert_eq!(
            names(&events),
            vec![
                "message_start",
                "ping",
                "content_block_start",
                "content_block_delta",
                "error"
            ]
        );
        if let Some(StreamEvent::Error { error }) = events.last() {
            assert_eq!(error.error_type, "timeout_error");
        }
    }

    #[test]
    fn test_stream_without_finish_reason_still_closes() {
        let mut translator = StreamTranslator::new("test-model");
        let events = translator.translate_all(vec![Ok(tool_chunk(
            vec![tool_delta(0, Some("c"), Some("ls"), "")],
            None,
        ))]);

        let (starts, stops) = starts_and_stops(&events);
        assert_eq!(starts, stops);
        assert_eq!(names(&events).last(), Some(&"message_stop"));
        assert_eq!(translator.completed_tool_calls()[0].input, json!({}));
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::MessageDelta { delta, .. } if delta.stop_reason == Some(StopReason::ToolUse)
        )));
    }

    #[test]
    fn test_finish_without_chunks() {
        let mut translator = StreamTranslator::new("test-model");
        let events = translator.finish();

        assert_eq!(
            names(&events),
            vec!["message_start", "ping", "message_delta", "message_stop"]
        );
    }

    fn reasoning_chunk(thought: &str) -> ChatCompletionChunk {
        ChatCompletionChunk {
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    reasoning_content: Some(thought.to_string()),
                    ..ChunkDelta::default()
                },
                ..ChunkChoice::default()
            }],
            ..ChatCompletionChunk::default()
        }
    }

    fn streamed_text(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockDelta {
                    delta: Delta::TextDelta { text },
                    ..
                } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn sync_text(content: Option<&str>, reasoning: Option<&str>) -> String {
        let resp: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": content,
                    "reasoning_content": reasoning,
                },
                "finish_reason": "stop",
            }],
        }))
        .unwrap();
        crate::translate::response::openai_to_anthropic(&resp, "test-model")
            .unwrap()
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_reasoning_only_response_surfaces_as_text_at_close() {
        let mut translator = StreamTranslator::new("test-model");
        let events = translator.process_chunk(&reasoning_chunk("thinking..."));
        assert_eq!(names(&events), vec!["message_start", "ping"]);

        let events = translator.process_chunk(&text_chunk("", Some("stop")));
        assert_eq!(
            names(&events),
            vec!["content_block_start", "content_block_delta", "content_block_stop"]
        );
        assert_eq!(streamed_text(&events), "thinking...");
        assert_eq!(streamed_text(&events), sync_text(None, Some("thinking...")));
    }

    #[test]
    fn test_reasoning_is_dropped_once_content_arrives() {
        let mut translator = StreamTranslator::new("test-model");
        let events = translator.translate_all(vec![
            Ok(reasoning_chunk("I think. ")),
            Ok(text_chunk("Answer", Some("stop"))),
        ]);

        assert_eq!(streamed_text(&events), "Answer");
        assert_eq!(
            streamed_text(&events),
            sync_text(Some("Answer"), Some("I think. "))
        );
        let (starts, stops) = starts_and_stops(&events);
        assert_eq!(starts, vec![0]);
        assert_eq!(stops, vec![0]);
    }

    #[test]
    fn test_reasoning_before_tool_call_keeps_text_first() {
        let mut translator = StreamTranslator::new("test-model");
        let events = translator.translate_all(vec![
            Ok(reasoning_chunk("Need the weather.")),
            Ok(tool_chunk(
                vec![tool_delta(0, Some("call_1"), Some("get_weather"), "{}")],
                Some("tool_calls"),
            )),
        ]);

        assert!(matches!(
            events[2],
            StreamEvent::ContentBlockStart {
                index: 0,
                content_block: ResponseContentBlock::Text { .. }
            }
        ));
        assert!(matches!(
            events[5],
            StreamEvent::ContentBlockStart {
                index: 1,
                content_block: ResponseContentBlock::ToolUse { .. }
            }
        ));
        assert_eq!(streamed_text(&events), "Need the weather.");
    }
}
