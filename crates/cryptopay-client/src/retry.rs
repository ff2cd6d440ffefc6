//! Retry policy with exponential backoff.
//!
//! Decides how long to wait between attempts of one outbound call. Delays
//! grow as `base_delay * 2^attempt`, are capped at `max_delay`, optionally
//! jittered, and never undercut a server-provided `Retry-After` hint.

use std::{collections::BTreeSet, time::Duration};

use chrono::{DateTime, Utc};
use cryptopay_core::CryptoPayError;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Statuses retried when no explicit set is configured.
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Retry configuration for outbound calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt. `0` means a single attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff.
    pub base_delay: Duration,

    /// Upper bound for computed backoff delays.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0). Zero disables jitter.
    pub jitter_factor: f64,

    /// HTTP statuses treated as transient.
    pub retryable_status_codes: BTreeSet<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
        }
    }
}

impl RetryConfig {
    /// Default configuration with the given retry budget.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self { max_retries, ..Self::default() }
    }

    /// Replaces the retryable status set.
    pub fn retry_on(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = statuses.into_iter().collect();
        self
    }

    /// Sets the backoff base delay.
    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Total attempts allowed, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether `status` is configured as transient.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// Backoff before retry number `attempt_index + 1`, ignoring server
    /// hints.
    ///
    /// `attempt_index` is zero-based: the wait after the first failed
    /// attempt is `base_delay`.
    pub fn backoff_delay(&self, attempt_index: u32) -> Duration {
        let exponent = attempt_index.min(20);
        let multiplier = 2_u32.saturating_pow(exponent);
        let base_delay = self.base_delay.saturating_mul(multiplier);

        let capped_delay = std::cmp::min(base_delay, self.max_delay);

        let jittered_delay = apply_jitter(capped_delay, self.jitter_factor);

        std::cmp::min(jittered_delay, self.max_delay)
    }

    /// Wait before the next attempt, honouring a larger `Retry-After`.
    pub fn delay_for(&self, attempt_index: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.backoff_delay(attempt_index);
        match retry_after {
            Some(hint) => std::cmp::max(backoff, hint),
            None => backoff,
        }
    }
}

/// Result of a single attempt, as seen by the retry loop.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    /// The attempt produced a value.
    Success(T),
    /// The attempt failed transiently and may be repeated.
    RetryableFailure {
        /// Error observed on this attempt
        error: CryptoPayError,
        /// Server-provided minimum wait
        retry_after: Option<Duration>,
    },
    /// The attempt failed permanently.
    FatalFailure(CryptoPayError),
}

impl<T> AttemptOutcome<T> {
    /// Transient failure without a server hint.
    pub fn retryable(error: impl Into<CryptoPayError>) -> Self {
        Self::RetryableFailure { error: error.into(), retry_after: None }
    }

    /// Permanent failure.
    pub fn fatal(error: impl Into<CryptoPayError>) -> Self {
        Self::FatalFailure(error.into())
    }

    /// Whether the attempt succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Applies jitter to a duration to spread out retries from many clients.
///
/// Randomizes the delay by ±jitter_factor. A factor of 0.25 turns a 10s delay
/// into something between 7.5s and 12.5s.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}

/// Longest server-requested wait honoured before retrying.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Parses a `Retry-After` header value.
///
/// Accepts delta-seconds (fractional values allowed) or an HTTP date.
/// Unparseable, negative or past values yield `None` and are ignored. Hints
/// beyond `MAX_RETRY_AFTER` are clamped to it.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    let hint = if let Ok(seconds) = value.parse::<f64>() {
        if !seconds.is_finite() || seconds < 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    } else {
        let retry_time = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
        retry_time.signed_duration_since(now).to_std().ok()?
    };

    Some(hint.min(MAX_RETRY_AFTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_single_attempt_policy() {
        let config = RetryConfig::default();

        assert_eq!(config.max_retries, 0);
        assert_eq!(config.max_attempts(), 1);
        assert_eq!(config.base_delay, Duration::from_millis(500));
        for status in [429, 500, 502, 503, 504] {
            assert!(config.is_retryable_status(status));
        }
        assert!(!config.is_retryable_status(400));
        assert!(!config.is_retryable_status(501));
    }

    #[test]
    fn exponential_backoff_without_jitter() {
        let config = RetryConfig::with_max_retries(5);

        let delays: Vec<_> = (0..4).map(|attempt| config.backoff_delay(attempt)).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ]
        );
    }

    #[test]
    fn max_delay_enforced() {
        let config = RetryConfig { max_delay: Duration::from_secs(60), ..RetryConfig::default() };

        assert_eq!(config.backoff_delay(30), Duration::from_secs(60));
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = RetryConfig {
            base_delay: Duration::from_secs(10),
            jitter_factor: 0.5,
            max_delay: Duration::from_secs(60),
            ..RetryConfig::default()
        };

        for _ in 0..100 {
            let delay = config.backoff_delay(0);
            assert!(delay >= Duration::from_secs(5), "delay too small: {delay:?}");
            assert!(delay <= Duration::from_secs(15), "delay too large: {delay:?}");
        }
    }

    #[test]
    fn retry_after_only_extends_delay() {
        let config = RetryConfig::with_max_retries(3);

        assert_eq!(config.delay_for(0, Some(Duration::from_secs(3))), Duration::from_secs(3));
        assert_eq!(config.delay_for(2, Some(Duration::from_millis(10))), Duration::from_secs(2));
        assert_eq!(config.delay_for(1, None), Duration::from_secs(1));
    }

    #[test]
    fn zero_base_delay_means_no_wait() {
        let config = RetryConfig::with_max_retries(3).base_delay(Duration::ZERO);
        assert_eq!(config.delay_for(2, None), Duration::ZERO);
    }

    #[test]
    fn parses_retry_after_seconds_and_dates() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2015 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(parse_retry_after("120", now), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after("1.5", now), Some(Duration::from_millis(1500)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:30 GMT", now),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn invalid_retry_after_is_ignored() {
        let now = Utc::now();

        assert_eq!(parse_retry_after("soon", now), None);
        assert_eq!(parse_retry_after("-5", now), None);
        assert_eq!(parse_retry_after("NaN", now), None);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now), None);
    }

    #[test]
    fn oversized_retry_after_is_clamped() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2015 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(parse_retry_after("1e30", now), Some(MAX_RETRY_AFTER));
        assert_eq!(parse_retry_after("1e20", now), Some(MAX_RETRY_AFTER));
        assert_eq!(parse_retry_after("86400", now), Some(MAX_RETRY_AFTER));
        assert_eq!(parse_retry_after("inf", now), None);
        assert_eq!(
            parse_retry_after("Fri, 31 Dec 9999 23:59:59 GMT", now),
            Some(MAX_RETRY_AFTER)
        );
    }
}
