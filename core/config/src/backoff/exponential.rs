// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use crate::backoff::default_max_attempts;
use crate::component::configuration::{Configuration, ConfigurationError};

use super::Strategy;
use duration_string::DurationString;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_retry::strategy::{ExponentialBackoff, jitter};

/// Exponential backoff: attempt `n` (1-based) waits `factor * base^n`
/// milliseconds, capped at `max_delay`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(default)]
pub struct Config {
    base: u64,
    factor: u64,
    #[schemars(with = "String")]
    max_delay: DurationString,
    #[serde(default = "default_max_attempts")]
    max_attempts: usize,
    #[serde(default)]
    jitter: bool,
}

impl Config {
    pub fn new(
        base: u64,
        factor: u64,
        max_delay: Duration,
        max_attempts: usize,
        jitter: bool,
    ) -> Self {
        Config {
            base,
            factor,
            max_delay: max_delay.into(),
            max_attempts,
            jitter,
        }
    }

    /// Doubling schedule without jitter: `first`, 2x `first`, 4x `first`...
    /// stopping after `max_attempts` delays. Delays are whole milliseconds,
    /// so `first` is rounded down to an even number of them.
    pub fn doubling(first: Duration, max_attempts: usize) -> Self {
        let factor = u64::try_from(first.as_millis() / 2).unwrap_or(u64::MAX);
        let max_delay = first
            .checked_mul(1u32 << max_attempts.min(31) as u32)
            .unwrap_or(Duration::MAX);

        Config::new(2, factor, max_delay, max_attempts, false)
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn factor(&self) -> u64 {
        self.factor
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay.into()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base: 2,
            factor: 500,
            max_delay: Duration::from_secs(30).into(),
            max_attempts: default_max_attempts(),
            jitter: false,
        }
    }
}

impl Configuration for Config {
    type Error = ConfigurationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.base == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "base",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.factor == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "factor",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

impl Strategy for Config {
    fn get_strategy(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        let ret = ExponentialBackoff::from_millis(self.base)
            .factor(self.factor)
            .max_delay(self.max_delay.into())
            .take(self.max_attempts);
        let jitter_flag = self.jitter;

        Box::new(ret.map(move |d| if jitter_flag { jitter(d) } else { d }))
    }
}
