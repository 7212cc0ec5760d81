// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use super::Strategy;
use crate::component::configuration::{Configuration, ConfigurationError};
use duration_string::DurationString;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_retry::strategy::FixedInterval;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(default)]
pub struct Config {
    #[schemars(with = "String")]
    interval: DurationString,
}

impl Config {
    pub fn new(interval: Duration) -> Self {
        Config {
            interval: interval.into(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval.into()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interval: Duration::from_millis(1000).into(),
        }
    }
}

impl Configuration for Config {
    type Error = ConfigurationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.interval().is_zero() {
            return Err(ConfigurationError::InvalidValue {
                field: "interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Strategy for Config {
    fn get_strategy(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        Box::new(FixedInterval::new(self.interval.into()))
    }
}
