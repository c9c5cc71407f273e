//! Decoding of OpenAI-compatible chat-completion streams.
//!
//! `StreamDecoder` turns an SSE line stream into raw deltas: text fragments,
//! tool-call fragments, and one terminal [`RawDelta::Done`] carrying the
//! reassembled tool calls, usage and the backend's finish reason. It does not
//! judge content; that is the pipeline's job.

use std::collections::VecDeque;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{CoreResult, RelayError};
use crate::http_client::SseStream;
use crate::model::{TokenUsage, ToolCall};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments_delta: String,
}

/// Aggregate data available once the stream ends.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamSummary {
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    /// Raw finish reason as reported by the backend, if any.
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawDelta {
    Text(String),
    ToolCall(ToolCallFragment),
    Done(StreamSummary),
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct WireUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct PromptTokensDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}

impl From<WireUsage> for TokenUsage {
    fn from(u: WireUsage) -> Self {
        TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            cache_read_tokens: u
                .prompt_tokens_details
                .map(|d| d.cached_tokens)
                .unwrap_or_default(),
            cache_write_tokens: 0,
        }
    }
}

#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

pub struct StreamDecoder {
    provider: String,
    lines: SseStream,
    pending: VecDeque<RawDelta>,
    tool_calls: Vec<ToolCallAccumulator>,
    usage: TokenUsage,
    finish_reason: Option<String>,
    finished: bool,
}

impl StreamDecoder {
    pub fn new(provider: &str, lines: SseStream) -> Self {
        Self {
            provider: provider.to_string(),
            lines,
            pending: VecDeque::new(),
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
            finish_reason: None,
            finished: false,
        }
    }

    /// Next raw delta. Yields `Done` exactly once (on `[DONE]` or clean EOF), or an
    /// error, and `None` afterwards.
    pub async fn next_delta(&mut self) -> Option<CoreResult<RawDelta>> {
        loop {
            if let Some(delta) = self.pending.pop_front() {
                return Some(Ok(delta));
            }
            if self.finished {
                return None;
            }
            let sse = match self.lines.next().await {
                None => return Some(Ok(self.finish())),
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                Some(Ok(sse)) => sse,
            };
            let line = sse.line.trim();
            // blank separators, comments and non-data fields (event:, id:, retry:)
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                return Some(Ok(self.finish()));
            }
            if let Err(e) = self.apply(data) {
                self.finished = true;
                return Some(Err(e));
            }
        }
    }

    fn apply(&mut self, data: &str) -> CoreResult<()> {
        let value: Value = serde_json::from_str(data).map_err(|e| RelayError::Decode {
            provider: self.provider.clone(),
            message: format!("failed to parse stream chunk: {e}"),
        })?;
        if let Some(err) = value.get("error") {
            return Err(stream_error(&self.provider, err));
        }
        let chunk: StreamChunk = serde_json::from_value(value).map_err(|e| RelayError::Decode {
            provider: self.provider.clone(),
            message: format!("unexpected stream chunk shape: {e}"),
        })?;

        if let Some(usage) = chunk.usage {
            self.usage = usage.into();
        }

        for choice in chunk.choices {
            if let Some(reason) = choice.finish_reason
                && !reason.is_empty()
            {
                self.finish_reason = Some(reason);
            }
            let Some(delta) = choice.delta else {
                continue;
            };
            if let Some(text) = delta.content
                && !text.is_empty()
            {
                self.pending.push_back(RawDelta::Text(text));
            }
            for call in delta.tool_calls.unwrap_or_default() {
                self.apply_tool_call(call);
            }
        }
        Ok(())
    }

    fn apply_tool_call(&mut self, call: StreamToolCallDelta) {
        let index = call.index;
        if self.tool_calls.len() <= index {
            self.tool_calls
                .resize_with(index + 1, ToolCallAccumulator::default);
        }
        let current = &mut self.tool_calls[index];
        let id = call.id.filter(|id| !id.is_empty());
        if let Some(id) = &id {
            current.id = id.clone();
        }
        let (name, arguments) = match call.function {
            Some(f) => (f.name.filter(|n| !n.is_empty()), f.arguments.unwrap_or_default()),
            None => (None, String::new()),
        };
        if let Some(name) = &name {
            current.name = name.clone();
        }
        current.arguments.push_str(&arguments);

        if id.is_none() && name.is_none() && arguments.is_empty() {
            return;
        }
        self.pending.push_back(RawDelta::ToolCall(ToolCallFragment {
            index,
            id,
            name,
            arguments_delta: arguments,
        }));
    }

    fn finish(&mut self) -> RawDelta {
        self.finished = true;
        let tool_calls = std::mem::take(&mut self.tool_calls)
            .into_iter()
            .enumerate()
            .filter(|(_, acc)| !acc.name.trim().is_empty())
            .map(|(index, acc)| ToolCall {
                id: if acc.id.trim().is_empty() {
                    format!("stream_tool_call_{}", index + 1)
                } else {
                    acc.id
                },
                name: acc.name,
                input: acc.arguments,
                finished: true,
            })
            .collect();
        RawDelta::Done(StreamSummary {
            tool_calls,
            usage: self.usage,
            finish_reason: self.finish_reason.take(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<CompletionToolCall>,
}

#[derive(Debug, Deserialize)]
struct CompletionToolCall {
    #[serde(default)]
    id: String,
    function: CompletionFunction,
}

#[derive(Debug, Deserialize)]
struct CompletionFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Decode a non-streaming chat completion into its text and a summary shaped like
/// the streaming one. Only the first choice is used.
pub fn decode_completion(provider: &str, body: Value) -> CoreResult<(String, StreamSummary)> {
    if let Some(err) = body.get("error") {
        return Err(stream_error(provider, err));
    }
    let completion: Completion = serde_json::from_value(body).map_err(|e| RelayError::Decode {
        provider: provider.to_string(),
        message: format!("unexpected completion shape: {e}"),
    })?;
    let usage = completion.usage.map(TokenUsage::from).unwrap_or_default();
    let Some(choice) = completion.choices.into_iter().next() else {
        return Ok((
            String::new(),
            StreamSummary {
                usage,
                ..StreamSummary::default()
            },
        ));
    };
    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .enumerate()
        .map(|(index, call)| ToolCall {
            id: if call.id.is_empty() {
                format!("tool_call_{}", index + 1)
            } else {
                call.id
            },
            name: call.function.name,
            input: call.function.arguments,
            finished: true,
        })
        .collect();
    Ok((
        choice.message.content.unwrap_or_default(),
        StreamSummary {
            tool_calls,
            usage,
            finish_reason: choice.finish_reason,
        },
    ))
}

/// Map an in-stream `{"error": {...}}` object to `ProviderError`.
fn stream_error(provider: &str, err: &Value) -> RelayError {
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());
    let code = match err.get("code") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => "stream".to_string(),
    };
    RelayError::ProviderError {
        provider: provider.to_string(),
        code,
        message,
    }
}
