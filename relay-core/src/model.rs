use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Why the backend stopped generating.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    EndTurn,
    MaxTokens,
    ToolUse,
    ContentFiltered,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::MaxTokens => "max_tokens",
            Self::ToolUse => "tool_use",
            Self::ContentFiltered => "content_filtered",
        }
    }
}

/// A tool invocation requested by the assistant. `input` is the raw JSON argument text.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: String,
    #[serde(default)]
    pub finished: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// One normalized conversation entry.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
}

impl Message {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            tool_results: results,
            ..Self::text(Role::Tool, "")
        }
    }
}

/// A tool the model may call. `parameters` holds the JSON-schema `properties` object.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub required: Vec<String>,
}

/// Token accounting; fields a backend does not report stay zero.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Finalized result of one logical call.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ProviderResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
}

/// Static description of a model the engine can target.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub id: String,
    pub provider: String,
    pub api_model: String,
    pub context_window: u32,
    pub default_max_tokens: u32,
    pub can_reason: bool,
}

impl ModelSpec {
    pub fn new(id: &str, provider: &str, api_model: &str) -> Self {
        Self {
            id: id.to_string(),
            provider: provider.to_string(),
            api_model: api_model.to_string(),
            context_window: 128_000,
            default_max_tokens: 4_096,
            can_reason: false,
        }
    }

    /// Look up a model in the built-in catalog. Unknown ids fall back to a
    /// non-reasoning spec that sends the id verbatim.
    pub fn builtin(id: &str) -> Self {
        let entry = CATALOG.iter().find(|(cid, ..)| *cid == id);
        match entry {
            Some(&(cid, provider, api_model, context_window, default_max_tokens, can_reason)) => {
                Self {
                    id: cid.to_string(),
                    provider: provider.to_string(),
                    api_model: api_model.to_string(),
                    context_window,
                    default_max_tokens,
                    can_reason,
                }
            }
            None => {
                let provider = if id.starts_with("grok-") { "xai" } else { "openai" };
                Self::new(id, provider, id)
            }
        }
    }
}

// (id, provider, api model, context window, default max tokens, reasoning)
const CATALOG: &[(&str, &str, &str, u32, u32, bool)] = &[
    ("grok-4", "xai", "grok-4-0709", 256_000, 20_000, true),
    ("grok-4-0709", "xai", "grok-4-0709", 256_000, 20_000, true),
    ("grok-3", "xai", "grok-3", 131_072, 20_000, true),
    ("grok-3-mini", "xai", "grok-3-mini", 131_072, 20_000, true),
    ("grok-3-fast", "xai", "grok-3-fast", 131_072, 20_000, true),
    ("grok-3-mini-fast", "xai", "grok-3-mini-fast", 131_072, 20_000, true),
    ("grok-2-vision", "xai", "grok-2-vision-1212", 32_768, 8_000, true),
    ("gpt-4o", "openai", "gpt-4o", 128_000, 4_096, false),
    ("gpt-4o-mini", "openai", "gpt-4o-mini", 128_000, 4_096, false),
    ("o3-mini", "openai", "o3-mini", 200_000, 50_000, true),
];
