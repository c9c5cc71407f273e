//! Mapping from a normalized conversation to chat-completion request parameters.
//!
//! Backend quirks are data: a [`ParamSupport`] table says which optional
//! parameters a backend accepts and which token-limit field its reasoning
//! models expect. Building is deterministic and does no I/O.

use serde::Serialize;
use serde_json::{Value, json};

use crate::model::{Message, ModelSpec, Role, ToolDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLimitField {
    MaxTokens,
    MaxCompletionTokens,
}

/// Which optional parameters a backend accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSupport {
    pub temperature: bool,
    pub top_p: bool,
    pub stop: bool,
    pub penalties: bool,
    pub reasoning_effort: bool,
    /// Token-limit field for reasoning-capable models; others always use `max_tokens`.
    pub reasoning_token_field: TokenLimitField,
    pub stream_usage: bool,
}

impl ParamSupport {
    pub const fn all() -> Self {
        Self {
            temperature: true,
            top_p: true,
            stop: true,
            penalties: true,
            reasoning_effort: true,
            reasoning_token_field: TokenLimitField::MaxCompletionTokens,
            stream_usage: true,
        }
    }
}

/// Caller-tunable generation settings. Unsupported ones are dropped per backend.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerationOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Vec<String>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub reasoning_effort: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StreamOptions {
    pub include_usage: bool,
}

/// Wire body of a chat-completion request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatParams {
    pub model: String,
    pub messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

#[derive(Debug, Clone)]
pub struct RequestBuilder {
    model: ModelSpec,
    support: ParamSupport,
    options: GenerationOptions,
}

impl RequestBuilder {
    pub fn new(model: ModelSpec, support: ParamSupport, options: GenerationOptions) -> Self {
        Self {
            model,
            support,
            options,
        }
    }

    pub fn model(&self) -> &ModelSpec {
        &self.model
    }

    /// Build the request body. `messages` are already in wire form; a system prompt,
    /// when given, is prepended as the first message.
    pub fn build(
        &self,
        system_prompt: Option<&str>,
        messages: Vec<Value>,
        tools: &[ToolDefinition],
        stream: bool,
    ) -> ChatParams {
        let s = &self.support;
        let o = &self.options;

        let mut wire = Vec::with_capacity(messages.len() + 1);
        if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
            wire.push(json!({"role": "system", "content": prompt}));
        }
        wire.extend(messages);

        let limit = o.max_tokens.unwrap_or(self.model.default_max_tokens);
        let field = if self.model.can_reason {
            s.reasoning_token_field
        } else {
            TokenLimitField::MaxTokens
        };
        let (max_tokens, max_completion_tokens) = match field {
            TokenLimitField::MaxTokens => (Some(limit), None),
            TokenLimitField::MaxCompletionTokens => (None, Some(limit)),
        };

        ChatParams {
            model: self.model.api_model.clone(),
            messages: wire,
            tools: tools.iter().map(convert_tool).collect(),
            max_tokens,
            max_completion_tokens,
            temperature: o.temperature.filter(|_| s.temperature),
            top_p: o.top_p.filter(|_| s.top_p),
            stop: (s.stop && !o.stop.is_empty()).then(|| o.stop.clone()),
            frequency_penalty: o.frequency_penalty.filter(|_| s.penalties),
            presence_penalty: o.presence_penalty.filter(|_| s.penalties),
            reasoning_effort: o
                .reasoning_effort
                .clone()
                .filter(|_| s.reasoning_effort && self.model.can_reason),
            stream,
            stream_options: (stream && s.stream_usage).then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

/// OpenAI-compatible wire form of one message. Tool-result messages expand to one
/// wire message per result.
pub fn convert_message(msg: &Message) -> Vec<Value> {
    match msg.role {
        Role::System => vec![json!({"role": "system", "content": msg.content})],
        Role::User => vec![json!({"role": "user", "content": msg.content})],
        Role::Assistant => {
            let mut out = json!({"role": "assistant"});
            out["content"] = if msg.content.is_empty() && !msg.tool_calls.is_empty() {
                Value::Null
            } else {
                Value::String(msg.content.clone())
            };
            if !msg.tool_calls.is_empty() {
                out["tool_calls"] = msg
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {"name": c.name, "arguments": c.input},
                        })
                    })
                    .collect();
            }
            vec![out]
        }
        Role::Tool => {
            if msg.tool_results.is_empty() {
                return vec![json!({"role": "user", "content": msg.content})];
            }
            msg.tool_results
                .iter()
                .map(|r| {
                    json!({
                        "role": "tool",
                        "tool_call_id": r.tool_call_id,
                        "content": r.content,
                    })
                })
                .collect()
        }
    }
}

pub fn convert_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": {
                "type": "object",
                "properties": tool.parameters,
                "required": tool.required,
            },
        },
    })
}
