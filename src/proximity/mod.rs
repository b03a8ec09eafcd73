//! Contactless card reads through the companion's reader
//!
//! A read is one `begin_read` request followed by paced status checks until
//! the reader reports a card, reports a timeout, or the attempt budget runs
//! out. See [`ProximityReadController`].

mod controller;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

pub use controller::ProximityReadController;

use crate::companion::{CompanionClient, PollReply};
use crate::config::ProximityConfig;
use crate::{Error, Result};

/// A card reader that can be told to read and then polled
#[async_trait]
pub trait ProximityDevice: Send + Sync {
    /// Arm the reader for `timeout_secs`
    ///
    /// # Errors
    ///
    /// Returns error if the reader refused or could not be reached
    async fn begin_read(&self, timeout_secs: u32) -> Result<()>;

    /// One status check
    ///
    /// # Errors
    ///
    /// Returns error for failures that should end the read
    async fn check(&self) -> Result<PollReply>;
}

#[async_trait]
impl ProximityDevice for CompanionClient {
    async fn begin_read(&self, timeout_secs: u32) -> Result<()> {
        self.start_read(timeout_secs).await
    }

    async fn check(&self) -> Result<PollReply> {
        self.check_read().await
    }
}

/// Status check pacing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&ProximityConfig::default())
    }
}

impl From<&ProximityConfig> for PollPolicy {
    fn from(config: &ProximityConfig) -> Self {
        Self {
            interval: config.poll_interval,
            max_attempts: config.max_attempts,
        }
    }
}

impl PollPolicy {
    /// Checks allowed for a read of `timeout_secs`
    ///
    /// `ceil(timeout / interval)`, at least one and at most `max_attempts`.
    #[must_use]
    pub fn attempts_for(&self, timeout_secs: u32) -> u32 {
        let interval_ms = self.interval.as_millis().max(1);
        let timeout_ms = u128::from(timeout_secs) * 1000;
        let attempts = u32::try_from(timeout_ms.div_ceil(interval_ms)).unwrap_or(u32::MAX);
        attempts.clamp(1, self.max_attempts.max(1))
    }
}

/// Where a read stands
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReadState {
    #[default]
    Idle,
    /// Asking the reader to arm
    Started,
    /// Waiting on status check `attempt`
    Polling { attempt: u32 },
    /// Card identifier (IDm)
    Success(String),
    Timeout,
    Error(String),
}

impl ReadState {
    /// A read is underway
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Started | Self::Polling { .. })
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Timeout | Self::Error(_))
    }

    /// The card identifier, or the reason there is none
    ///
    /// # Errors
    ///
    /// `ReadTimeout` on timeout, `ReadError` on failure or if the read never
    /// finished
    pub fn into_result(self) -> Result<String> {
        match self {
            Self::Success(idm) => Ok(idm),
            Self::Timeout => Err(Error::ReadTimeout),
            Self::Error(reason) => Err(Error::ReadError(reason)),
            Self::Idle | Self::Started | Self::Polling { .. } => {
                Err(Error::ReadError("read cancelled".to_string()))
            }
        }
    }
}

impl fmt::Display for ReadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Started => write!(f, "started"),
            Self::Polling { attempt } => write!(f, "polling ({attempt})"),
            Self::Success(idm) => write!(f, "success ({idm})"),
            Self::Timeout => write!(f, "timeout"),
            Self::Error(reason) => write!(f, "error ({reason})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_budget() {
        let policy = PollPolicy::default();
        assert_eq!(policy.attempts_for(1), 2);
        assert_eq!(policy.attempts_for(30), 60);
        assert_eq!(policy.attempts_for(120), 60);
    }

    #[test]
    fn test_attempt_budget_rounds_up() {
        let policy = PollPolicy {
            interval: Duration::from_millis(700),
            max_attempts: 100,
        };
        assert_eq!(policy.attempts_for(1), 2);
        assert_eq!(policy.attempts_for(7), 10);
    }

    #[test]
    fn test_attempt_budget_at_least_one() {
        let policy = PollPolicy {
            interval: Duration::from_secs(5),
            max_attempts: 0,
        };
        assert_eq!(policy.attempts_for(1), 1);
    }

    #[test]
    fn test_into_result() {
        assert_eq!(
            ReadState::Success("04AB".to_string()).into_result().unwrap(),
            "04AB"
        );
        assert!(matches!(
            ReadState::Timeout.into_result(),
            Err(Error::ReadTimeout)
        ));
        assert!(matches!(
            ReadState::Polling { attempt: 3 }.into_result(),
            Err(Error::ReadError(_))
        ));
    }
}
