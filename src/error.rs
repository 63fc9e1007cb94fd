use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the `Page` capability.
///
/// A timeout means an expected element never showed up within its bounded
/// wait; anything else the browser reports is lumped into `Browser`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("timed out after {timeout:?} waiting for {what}")]
    TimedOut { what: String, timeout: Duration },

    #[error("browser error: {0}")]
    Browser(String),
}

impl PageError {
    pub fn timed_out(what: impl Into<String>, timeout: Duration) -> Self {
        Self::TimedOut {
            what: what.into(),
            timeout,
        }
    }

    pub fn browser(err: impl ToString) -> Self {
        Self::Browser(err.to_string())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}
