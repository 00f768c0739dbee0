//! Retry policies, backoff schedule, and canned log messages shared by the
//! HTTP client so each upstream service reports retries consistently.
//!
//! Sourcify's 404 is final, while Etherscan retries 404 alongside 429 and
//! 5xx. Each service gets its own [`RetryPolicy`].

use std::time::Duration;

const STATUS_OK: u16 = 200;

/// How a response status is handled by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Transient,
    Terminal,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub service: &'static str,
    /// Returned immediately, checked before `transient_statuses`.
    pub terminal_statuses: &'static [u16],
    pub transient_statuses: &'static [u16],
    pub messages: RetryMessages,
}

impl RetryPolicy {
    pub fn classify(&self, status: u16) -> StatusClass {
        if status == STATUS_OK {
            StatusClass::Success
        } else if self.terminal_statuses.contains(&status) {
            StatusClass::Terminal
        } else if self.transient_statuses.contains(&status) {
            StatusClass::Transient
        } else {
            StatusClass::Terminal
        }
    }
}

/// Logging labels describing how a service reports retries and exhaustion.
#[derive(Debug, Clone, Copy)]
pub struct RetryMessages {
    pub retry_status: &'static str,
    pub retry_transport: &'static str,
    pub exhausted_status: &'static str,
    pub exhausted_transport: &'static str,
    pub terminal: &'static str,
}

pub const SOURCIFY_RETRY: RetryPolicy = RetryPolicy {
    service: "sourcify",
    terminal_statuses: &[404],
    transient_statuses: &[429, 500, 502, 503, 504],
    messages: RetryMessages {
        retry_status: "sourcify returned a transient status; retrying",
        retry_transport: "sourcify request failed; retrying",
        exhausted_status: "sourcify kept returning a transient status; giving up",
        exhausted_transport: "sourcify request exhausted retries",
        terminal: "sourcify returned a terminal status",
    },
};

pub const ETHERSCAN_RETRY: RetryPolicy = RetryPolicy {
    service: "etherscan",
    terminal_statuses: &[],
    transient_statuses: &[404, 429, 500, 502, 503, 504],
    messages: RetryMessages {
        retry_status: "etherscan returned a transient status; retrying",
        retry_transport: "etherscan request failed; retrying",
        exhausted_status: "etherscan kept returning a transient status; giving up",
        exhausted_transport: "etherscan request exhausted retries",
        terminal: "etherscan returned a terminal status",
    },
};

/// `base * 2^attempt` for a 0-indexed attempt, saturating instead of
/// overflowing.
pub(crate) fn backoff_delay(base: Duration, attempt: usize) -> Duration {
    let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
    let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    base.saturating_mul(multiplier)
}

/// Context passed through one `get_json` call so every log line carries the
/// service name and the policy's message templates.
#[derive(Clone, Copy)]
pub(crate) struct RetryContext<'a> {
    policy: &'a RetryPolicy,
}

impl<'a> RetryContext<'a> {
    pub(crate) fn new(policy: &'a RetryPolicy) -> Self {
        Self { policy }
    }

    pub(crate) fn log_success(&self, attempt: usize) {
        tracing::debug!(
            service = self.policy.service,
            attempt,
            "request completed successfully"
        );
    }

    pub(crate) fn log_terminal(&self, attempt: usize, status: u16) {
        tracing::debug!(
            service = self.policy.service,
            attempt,
            status,
            "{}",
            self.policy.messages.terminal
        );
    }

    pub(crate) fn log_retry_status(&self, attempt: usize, status: u16, backoff: Duration) {
        tracing::warn!(
            service = self.policy.service,
            attempt,
            status,
            backoff_ms = Self::duration_to_millis(backoff),
            "{}",
            self.policy.messages.retry_status
        );
    }

    pub(crate) fn log_retry_transport(
        &self,
        attempt: usize,
        err: &reqwest::Error,
        backoff: Duration,
    ) {
        tracing::warn!(
            service = self.policy.service,
            attempt,
            backoff_ms = Self::duration_to_millis(backoff),
            timeout = err.is_timeout(),
            error = %err,
            "{}",
            self.policy.messages.retry_transport
        );
    }

    pub(crate) fn log_exhausted_status(&self, attempt: usize, status: u16) {
        tracing::error!(
            service = self.policy.service,
            attempt,
            status,
            "{}",
            self.policy.messages.exhausted_status
        );
    }

    pub(crate) fn log_exhausted_transport(&self, attempt: usize, err: &reqwest::Error) {
        tracing::error!(
            service = self.policy.service,
            attempt,
            timeout = err.is_timeout(),
            error = %err,
            "{}",
            self.policy.messages.exhausted_transport
        );
    }

    fn duration_to_millis(backoff: Duration) -> u64 {
        backoff.as_millis().min(u128::from(u64::MAX)) as u64
    }
}
