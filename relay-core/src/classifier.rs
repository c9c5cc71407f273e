//! Detection of backend failures that arrive as ordinary assistant text.
//!
//! Some backends answer HTTP 200 and put "rate limit exceeded, try again" in the
//! completion itself. Matching is a plain case-insensitive substring test, so a
//! legitimate answer that talks about rate limits is flagged too; the phrase list
//! is configurable for that reason.

/// Phrases that mark content as a masked backend error.
pub const DEFAULT_ERROR_PHRASES: &[&str] = &[
    "try again",
    "rate limit",
    "too many requests",
    "please retry",
    "service unavailable",
    "quota exceeded",
    "temporarily unavailable",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentErrorClassifier {
    // stored lowercased
    phrases: Vec<String>,
}

impl Default for ContentErrorClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_PHRASES.iter().copied())
    }
}

impl ContentErrorClassifier {
    /// Build a classifier from a phrase list. Phrases are kept verbatim apart from
    /// case, so surrounding spaces act as word boundaries. Blank phrases are ignored
    /// since they would match almost everything.
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|p| p.as_ref().to_lowercase())
            .filter(|p| !p.trim().is_empty())
            .collect();
        Self { phrases }
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// True if `text` contains any configured phrase, ignoring case.
    pub fn is_error_content(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        self.phrases.iter().any(|p| lower.contains(p.as_str()))
    }

    /// First phrase found in `text`, for diagnostics.
    pub fn matched_phrase(&self, text: &str) -> Option<&str> {
        if text.is_empty() {
            return None;
        }
        let lower = text.to_lowercase();
        self.phrases
            .iter()
            .find(|p| lower.contains(p.as_str()))
            .map(String::as_str)
    }
}
