// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::SystemTime;

use crate::errors::FailureKind;

/// Health of one subscription. Only the controller mutates it; callers get
/// snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionHealth {
    /// consecutive channel failures since the last success or reset
    retry_count: u32,

    /// consecutive failed session checks since the last success or reset
    auth_retry_count: u32,

    last_error: Option<String>,

    circuit_breaker_open: bool,

    last_successful_connection: Option<SystemTime>,
}

impl ConnectionHealth {
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn auth_retry_count(&self) -> u32 {
        self.auth_retry_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn circuit_breaker_open(&self) -> bool {
        self.circuit_breaker_open
    }

    pub fn last_successful_connection(&self) -> Option<SystemTime> {
        self.last_successful_connection
    }

    pub(crate) fn record_success(&mut self, at: SystemTime) {
        self.retry_count = 0;
        self.auth_retry_count = 0;
        self.last_error = None;
        self.last_successful_connection = Some(at);
    }

    pub(crate) fn record_auth_success(&mut self) {
        self.auth_retry_count = 0;
    }

    /// Returns the number of consecutive auth failures, this one included.
    pub(crate) fn record_auth_failure(&mut self) -> u32 {
        self.auth_retry_count += 1;
        self.last_error = Some(FailureKind::AuthNotReady.to_string());
        self.auth_retry_count
    }

    /// Returns the number of consecutive channel failures, this one included.
    pub(crate) fn record_channel_failure(&mut self, reason: &str) -> u32 {
        self.retry_count += 1;
        self.last_error = Some(FailureKind::ChannelError(reason.to_string()).to_string());
        self.retry_count
    }

    pub(crate) fn open_circuit(&mut self) {
        self.circuit_breaker_open = true;
        self.last_error = Some(FailureKind::CircuitOpen.to_string());
    }

    /// Clears counters, breaker and error. The last success is kept.
    pub(crate) fn reset_circuit(&mut self) {
        self.retry_count = 0;
        self.auth_retry_count = 0;
        self.circuit_breaker_open = false;
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_accumulate_until_success() {
        let mut health = ConnectionHealth::default();

        assert_eq!(health.record_channel_failure("timeout"), 1);
        assert_eq!(health.record_channel_failure("timeout"), 2);
        assert_eq!(health.record_auth_failure(), 1);
        assert_eq!(health.last_error(), Some("auth not ready"));

        let now = SystemTime::now();
        health.record_success(now);

        assert_eq!(health.retry_count(), 0);
        assert_eq!(health.auth_retry_count(), 0);
        assert_eq!(health.last_error(), None);
        assert_eq!(health.last_successful_connection(), Some(now));
    }

    #[test]
    fn test_circuit_open_and_reset() {
        let mut health = ConnectionHealth::default();
        health.record_success(SystemTime::UNIX_EPOCH);
        for _ in 0..5 {
            health.record_channel_failure("boom");
        }
        assert_eq!(health.last_error(), Some("channel error: boom"));

        health.open_circuit();
        assert!(health.circuit_breaker_open());
        assert_eq!(health.retry_count(), 5);
        assert_eq!(health.last_error(), Some("max retries reached"));

        health.reset_circuit();
        assert!(!health.circuit_breaker_open());
        assert_eq!(health.retry_count(), 0);
        assert_eq!(health.last_error(), None);
        assert_eq!(
            health.last_successful_connection(),
            Some(SystemTime::UNIX_EPOCH)
        );
    }
}
