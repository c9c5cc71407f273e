/// Span/log attribute keys for engine attempts.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_PROVIDER: &str = "llm.provider";
pub const KEY_MODEL: &str = "llm.model";
pub const KEY_ENDPOINT: &str = "llm.endpoint";
pub const KEY_ATTEMPT: &str = "retry.attempt";
pub const KEY_RETRY_DELAY_MS: &str = "retry.delay_ms";

pub const KEY_FINISH_REASON: &str = "finish.reason";
pub const KEY_TOKENS_INPUT: &str = "tokens.input";
pub const KEY_TOKENS_OUTPUT: &str = "tokens.output";

/// Error-related (if applicable)
pub const KEY_ERROR_KIND: &str = "error.kind";
pub const KEY_ERROR_MESSAGE: &str = "error.message";

/// Span name for a single network attempt.
pub const SPAN_ATTEMPT: &str = "provider.attempt";
