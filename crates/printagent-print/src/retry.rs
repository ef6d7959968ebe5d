// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry policy: error classification and exponential backoff.
//
// Transport hiccups (timeouts, refused connections, a busy spooler, a
// failing print command) are retried; configuration problems are not,
// because the next attempt would fail the same way.

use std::time::Duration;

use printagent_core::AgentConfig;
use printagent_core::error::AgentError;
use printagent_core::types::ErrorClass;
use tracing::{debug, info, warn};

/// Retry settings, taken from [`AgentConfig`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts (claims) before a transiently failing job is given up.
    pub max_retries: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl From<&AgentConfig> for RetryPolicy {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.backoff_base,
            max_delay: config.backoff_ceiling,
        }
    }
}

/// What the dispatcher should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then put the job back in the queue.
    RetryAfter(Duration),
    /// Do not retry: the error is permanent.
    GiveUp(ErrorClass),
    /// Transient, but the job has used all of its attempts.
    Exhausted,
}

/// Classify an `AgentError` for retry decisions.
pub fn classify_error(err: &AgentError) -> ErrorClass {
    match err {
        AgentError::Network(_) | AgentError::Command(_) | AgentError::Spooler(_) => {
            ErrorClass::Transient
        }
        AgentError::Database(_) | AgentError::Detection(_) => ErrorClass::Transient,

        AgentError::PrinterNotFound(_)
        | AgentError::UnsupportedPrinter(_)
        | AgentError::InvalidPrinterConfig(_)
        | AgentError::InvalidPayload(_)
        | AgentError::IntegrityMismatch { .. } => ErrorClass::Permanent,

        // Not produced by backends; treated as configuration faults if they
        // ever reach the dispatcher.
        AgentError::AlreadyExists(_)
        | AgentError::NotFound(_)
        | AgentError::InvalidTransition { .. }
        | AgentError::QueueFull(_)
        | AgentError::Validation(_)
        | AgentError::Config(_)
        | AgentError::Serialization(_) => ErrorClass::Permanent,

        AgentError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::InvalidInput | std::io::ErrorKind::Unsupported => {
                ErrorClass::Permanent
            }
            _ => ErrorClass::Transient,
        },
    }
}

/// Decide what to do after attempt number `attempts` (1-based) failed.
pub fn should_retry(err: &AgentError, attempts: u32, policy: &RetryPolicy) -> RetryDecision {
    match classify_error(err) {
        ErrorClass::Permanent => {
            info!("permanent error, not retrying");
            RetryDecision::GiveUp(ErrorClass::Permanent)
        }
        ErrorClass::Transient if attempts >= policy.max_retries => {
            warn!(attempts, max = policy.max_retries, "retry limit exhausted");
            RetryDecision::Exhausted
        }
        ErrorClass::Transient => {
            let delay = backoff_delay(attempts, policy);
            debug!(attempts, delay_ms = delay.as_millis() as u64, "scheduling retry");
            RetryDecision::RetryAfter(delay)
        }
    }
}

/// `min(base * 2^(attempts-1), max_delay)`.
pub fn backoff_delay(attempts: u32, policy: &RetryPolicy) -> Duration {
    let exponent = attempts.saturating_sub(1).min(31);
    policy
        .base_delay
        .checked_mul(1u32 << exponent)
        .map_or(policy.max_delay, |d| d.min(policy.max_delay))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }

    #[test]
    fn transport_errors_are_transient() {
        for err in [
            AgentError::Network("connection refused".into()),
            AgentError::Command("exit status 1".into()),
            AgentError::Spooler("printer offline".into()),
        ] {
            assert_eq!(classify_error(&err), ErrorClass::Transient, "{err}");
        }
    }

    #[test]
    fn configuration_errors_are_permanent() {
        for err in [
            AgentError::PrinterNotFound("ghost".into()),
            AgentError::UnsupportedPrinter("printer type has no automatic transport".into()),
            AgentError::InvalidPrinterConfig("empty argv".into()),
            AgentError::InvalidPayload("empty payload".into()),
        ] {
            assert_eq!(classify_error(&err), ErrorClass::Permanent, "{err}");
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let p = policy();
        let delays: Vec<u64> = (1..=7).map(|n| backoff_delay(n, &p).as_secs()).collect();
        assert_eq!(delays, [2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(backoff_delay(200, &p), Duration::from_secs(60));
    }

    #[test]
    fn retry_respects_max() {
        let p = RetryPolicy {
            max_retries: 3,
            ..policy()
        };
        let err = AgentError::Network("timed out".into());
        assert_eq!(
            should_retry(&err, 1, &p),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(should_retry(&err, 3, &p), RetryDecision::Exhausted);
    }

    #[test]
    fn permanent_error_never_retries() {
        let err = AgentError::PrinterNotFound("ghost".into());
        assert_eq!(
            should_retry(&err, 1, &policy()),
            RetryDecision::GiveUp(ErrorClass::Permanent)
        );
    }
}
