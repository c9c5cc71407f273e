//! Retry decisions for the engine's attempt loop.
//!
//! Three failure signals feed one decision: HTTP status codes, backend-declared
//! retry hints (`Retry-After`), and content-masked errors found by the
//! classifier. The loop itself never inspects errors; it only follows the
//! [`RetryDecision`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::RetryCfg;
use crate::error::RelayError;

pub const DEFAULT_MAX_RETRIES: u32 = 8;
pub const DEFAULT_BASE_DELAY_MS: u64 = 2_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 120_000;
pub const DEFAULT_JITTER_RATIO: f64 = 0.2;
pub const DEFAULT_RETRY_STATUSES: &[u16] = &[429, 500];

/// Outcome of [`RetryPolicy::decide`]. A non-retry always carries the error to surface.
#[derive(Debug)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Fail(RelayError),
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Option<Duration>,
    jitter_ratio: f64,
    retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryCfg::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryCfg) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: cfg.max_delay_ms.map(Duration::from_millis),
            jitter_ratio: cfg.jitter_ratio.clamp(0.0, 1.0),
            retry_statuses: cfg.retry_statuses.clone(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decide what to do after attempt `attempt` (1-based) failed with `error`.
    ///
    /// Quota exhaustion and cancellation always come back unchanged. Otherwise an
    /// attempt past the ceiling becomes [`RelayError::MaxRetriesExceeded`] whatever
    /// the error was; below it, errors without a retry delay (unknown statuses,
    /// I/O failures) come back unchanged.
    pub fn decide(&self, provider: &str, attempt: u32, error: RelayError) -> RetryDecision {
        if matches!(error, RelayError::QuotaExceeded { .. } | RelayError::Cancelled) {
            return RetryDecision::Fail(error);
        }
        if attempt > self.max_retries {
            return RetryDecision::Fail(RelayError::MaxRetriesExceeded {
                provider: provider.to_string(),
                max_retries: self.max_retries,
                last: Box::new(error),
            });
        }
        match self.retry_delay(attempt, &error) {
            Some(delay) => RetryDecision::Retry { delay },
            None => RetryDecision::Fail(error),
        }
    }

    fn retry_delay(&self, attempt: u32, error: &RelayError) -> Option<Duration> {
        match error {
            RelayError::ContentMasked { .. } => Some(self.jittered_backoff(attempt)),
            other => {
                if let Some(ms) = other.retry_after_ms() {
                    return Some(Duration::from_millis(ms));
                }
                match other.status() {
                    Some(status) if self.retry_statuses.contains(&status) => {
                        Some(self.backoff(attempt))
                    }
                    _ => None,
                }
            }
        }
    }

    /// `base * 2^(attempt-1)`, capped by `max_delay` when set.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1_u32 << shift);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Backoff plus a uniform jitter in `[0, jitter_ratio * backoff]`.
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        let max_jitter_ms = (backoff.as_millis() as f64 * self.jitter_ratio) as u64;
        if max_jitter_ms == 0 {
            return backoff;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
        backoff + Duration::from_millis(jitter_ms)
    }
}

/// Parse a `Retry-After` value (integer seconds or HTTP-date) into milliseconds.
/// Dates in the past yield `Some(0)`.
pub fn parse_retry_after_ms(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1000));
    }
    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    if delay_ms <= 0 {
        return Some(0);
    }
    u64::try_from(delay_ms).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    fn masked() -> RelayError {
        RelayError::ContentMasked {
            provider: "xai".into(),
            content: "rate limit".into(),
        }
    }

    fn delay_of(d: RetryDecision) -> Duration {
        match d {
            RetryDecision::Retry { delay } => delay,
            RetryDecision::Fail(e) => panic!("expected retry, got {e:?}"),
        }
    }

    fn error_of(d: RetryDecision) -> RelayError {
        match d {
            RetryDecision::Fail(e) => e,
            RetryDecision::Retry { delay } => panic!("expected failure, got retry after {delay:?}"),
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_millis(2_000));
        assert_eq!(p.backoff(2), Duration::from_millis(4_000));
        assert_eq!(p.backoff(4), Duration::from_millis(16_000));
    }

    #[test]
    fn backoff_respects_cap() {
        let p = RetryPolicy::from_config(&RetryCfg {
            max_delay_ms: Some(5_000),
            ..RetryCfg::default()
        });
        assert_eq!(p.backoff(3), Duration::from_millis(5_000));
        assert_eq!(p.backoff(40), Duration::from_millis(5_000));
    }

    #[test]
    fn masked_content_retries_with_bounded_jitter() {
        let p = policy();
        for _ in 0..64 {
            let d = delay_of(p.decide("xai", 3, masked()));
            assert!(d >= Duration::from_millis(8_000), "{d:?}");
            assert!(d <= Duration::from_millis(9_600), "{d:?}");
        }
    }

    #[test]
    fn retry_after_is_used_exactly() {
        let err = RelayError::RateLimited {
            provider: "xai".into(),
            retry_after_ms: Some(2_000),
            message: "slow down".into(),
        };
        assert_eq!(delay_of(policy().decide("xai", 5, err)), Duration::from_millis(2_000));
    }

    #[test]
    fn retry_after_on_server_error_is_honored() {
        let err = RelayError::ProviderUnavailable {
            provider: "xai".into(),
            status: Some(503),
            retry_after_ms: Some(750),
        };
        assert_eq!(delay_of(policy().decide("xai", 1, err)), Duration::from_millis(750));
    }

    #[test]
    fn status_429_and_500_use_plain_backoff() {
        let p = policy();
        let rl = RelayError::RateLimited {
            provider: "xai".into(),
            retry_after_ms: None,
            message: "limit".into(),
        };
        assert_eq!(delay_of(p.decide("xai", 2, rl)), Duration::from_millis(4_000));

        let ise = RelayError::ProviderUnavailable {
            provider: "xai".into(),
            status: Some(500),
            retry_after_ms: None,
        };
        assert_eq!(delay_of(p.decide("xai", 1, ise)), Duration::from_millis(2_000));
    }

    #[test]
    fn other_statuses_and_io_are_surfaced_as_is() {
        let p = policy();
        let bad_gateway = RelayError::ProviderUnavailable {
            provider: "xai".into(),
            status: Some(502),
            retry_after_ms: None,
        };
        assert!(matches!(
            error_of(p.decide("xai", 1, bad_gateway)),
            RelayError::ProviderUnavailable { status: Some(502), .. }
        ));

        let io = RelayError::ProviderUnavailable {
            provider: "xai".into(),
            status: None,
            retry_after_ms: None,
        };
        assert!(matches!(
            error_of(p.decide("xai", 1, io)),
            RelayError::ProviderUnavailable { status: None, .. }
        ));

        let bad_request = RelayError::ProviderError {
            provider: "xai".into(),
            code: "400".into(),
            message: "bad".into(),
        };
        assert!(matches!(
            error_of(p.decide("xai", 1, bad_request)),
            RelayError::ProviderError { .. }
        ));
    }

    #[test]
    fn quota_is_permanent_on_first_attempt() {
        let err = RelayError::QuotaExceeded {
            provider: "xai".into(),
            message: "monthly spending limit".into(),
        };
        assert!(matches!(
            error_of(policy().decide("xai", 1, err)),
            RelayError::QuotaExceeded { .. }
        ));
    }

    #[test]
    fn exhausted_after_max_retries() {
        let p = policy().with_max_retries(2);
        assert!(p.decide("xai", 2, masked()).is_retry());
        match error_of(p.decide("xai", 3, masked())) {
            RelayError::MaxRetriesExceeded { max_retries, last, provider } => {
                assert_eq!(max_retries, 2);
                assert_eq!(provider, "xai");
                assert!(matches!(*last, RelayError::ContentMasked { .. }));
            }
            other => panic!("expected MaxRetriesExceeded, got {other:?}"),
        }
    }

    #[test]
    fn ceiling_applies_to_non_retryable_errors_too() {
        let p = policy().with_max_retries(2);
        let io = || RelayError::ProviderUnavailable {
            provider: "xai".into(),
            status: None,
            retry_after_ms: None,
        };
        assert!(matches!(
            error_of(p.decide("xai", 2, io())),
            RelayError::ProviderUnavailable { status: None, .. }
        ));
        match error_of(p.decide("xai", 3, io())) {
            RelayError::MaxRetriesExceeded { max_retries, last, .. } => {
                assert_eq!(max_retries, 2);
                assert!(matches!(*last, RelayError::ProviderUnavailable { status: None, .. }));
            }
            other => panic!("expected MaxRetriesExceeded, got {other:?}"),
        }
    }

    #[test]
    fn quota_and_cancel_ignore_the_ceiling() {
        let p = policy().with_max_retries(0);
        let quota = RelayError::QuotaExceeded {
            provider: "openai".into(),
            message: "insufficient_quota".into(),
        };
        assert!(matches!(error_of(p.decide("openai", 5, quota)), RelayError::QuotaExceeded { .. }));
        assert!(matches!(error_of(p.decide("openai", 5, RelayError::Cancelled)), RelayError::Cancelled));
    }

    #[test]
    fn zero_jitter_ratio_is_deterministic() {
        let p = RetryPolicy::from_config(&RetryCfg {
            jitter_ratio: 0.0,
            ..RetryCfg::default()
        });
        assert_eq!(delay_of(p.decide("xai", 1, masked())), Duration::from_millis(2_000));
    }

    #[test]
    fn retry_after_parses_seconds_and_dates() {
        assert_eq!(parse_retry_after_ms("2"), Some(2_000));
        assert_eq!(parse_retry_after_ms(" 0 "), Some(0));
        assert_eq!(parse_retry_after_ms(""), None);
        assert_eq!(parse_retry_after_ms("soon"), None);
        assert_eq!(parse_retry_after_ms("Wed, 21 Oct 2015 07:28:00 GMT"), Some(0));

        let future = (Utc::now() + chrono::Duration::seconds(30)).to_rfc2822();
        let ms = parse_retry_after_ms(&future).expect("future date");
        assert!(ms > 25_000 && ms <= 30_000, "{ms}");
    }
}
