pub mod openai;
pub mod xai;

use std::path::PathBuf;

use tracing::debug;

/// System prompt source for a backend: an optional file that wins when readable,
/// falling back to a fixed prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemPrompt {
    fixed: Option<String>,
    file: Option<PathBuf>,
}

impl SystemPrompt {
    pub fn new(fixed: Option<String>, file: Option<PathBuf>) -> Self {
        Self { fixed, file }
    }

    /// Re-reads the file on every call so edits apply to the next request.
    pub fn resolve(&self) -> Option<String> {
        if let Some(path) = &self.file {
            match std::fs::read_to_string(path) {
                Ok(text) if !text.trim().is_empty() => return Some(text),
                Ok(_) => debug!(path = %path.display(), "system prompt file is empty"),
                Err(e) => debug!(path = %path.display(), error = %e, "system prompt file unreadable"),
            }
        }
        self.fixed.clone()
    }
}
