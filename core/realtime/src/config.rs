// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

use homesync_config::backoff::{exponential, fixedinterval};
use homesync_config::component::configuration::{Configuration, ConfigurationError};

use crate::backend::ChannelTarget;
use crate::errors::RealtimeError;

/// Callback run once per delivered change event.
pub type OnChange = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
}

impl FilterOp {
    fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::In => "in",
        }
    }
}

impl FromStr for FilterOp {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(FilterOp::Eq),
            "neq" => Ok(FilterOp::Neq),
            "lt" => Ok(FilterOp::Lt),
            "lte" => Ok(FilterOp::Lte),
            "gt" => Ok(FilterOp::Gt),
            "gte" => Ok(FilterOp::Gte),
            "in" => Ok(FilterOp::In),
            other => Err(RealtimeError::InvalidFilter(format!(
                "unknown operator {}",
                other
            ))),
        }
    }
}

/// Row predicate restricting the change events delivered on a channel,
/// written `column=op.value` (e.g. `agent_id=eq.42`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeFilter {
    column: String,
    op: FilterOp,
    value: String,
}

impl ChangeFilter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<String>) -> Self {
        ChangeFilter {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(column, FilterOp::Eq, value)
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn op(&self) -> FilterOp {
        self.op
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for ChangeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}.{}", self.column, self.op.as_str(), self.value)
    }
}

impl FromStr for ChangeFilter {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, rest) = s
            .split_once('=')
            .ok_or_else(|| RealtimeError::InvalidFilter(format!("missing '=' in {}", s)))?;
        let (op, value) = rest
            .split_once('.')
            .ok_or_else(|| RealtimeError::InvalidFilter(format!("missing operator in {}", s)))?;

        if column.is_empty() {
            return Err(RealtimeError::InvalidFilter(format!("empty column in {}", s)));
        }

        Ok(ChangeFilter::new(column, op.parse()?, value))
    }
}

/// Caller supplied description of one live subscription.
#[derive(Clone)]
pub struct SubscriptionConfig {
    /// logical channel name, unique per independent subscription
    resource_name: String,

    /// backend collection to watch
    table: String,

    filter: Option<ChangeFilter>,

    /// when false no channel is opened and any open one is torn down
    enabled: bool,

    on_change: OnChange,
}

/// The fields whose change restarts the subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SubscriptionKey<'a> {
    resource_name: &'a str,
    table: &'a str,
    filter: Option<&'a ChangeFilter>,
    enabled: bool,
}

impl SubscriptionConfig {
    pub fn new<F>(resource_name: impl Into<String>, table: impl Into<String>, on_change: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        SubscriptionConfig {
            resource_name: resource_name.into(),
            table: table.into(),
            filter: None,
            enabled: true,
            on_change: Arc::new(on_change),
        }
    }

    pub fn with_filter(self, filter: ChangeFilter) -> Self {
        SubscriptionConfig {
            filter: Some(filter),
            ..self
        }
    }

    pub fn with_enabled(self, enabled: bool) -> Self {
        SubscriptionConfig { enabled, ..self }
    }

    pub fn with_on_change<F>(self, on_change: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        SubscriptionConfig {
            on_change: Arc::new(on_change),
            ..self
        }
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn filter(&self) -> Option<&ChangeFilter> {
        self.filter.as_ref()
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn notify_change(&self) {
        (self.on_change)()
    }

    pub(crate) fn key(&self) -> SubscriptionKey<'_> {
        SubscriptionKey {
            resource_name: &self.resource_name,
            table: &self.table,
            filter: self.filter.as_ref(),
            enabled: self.enabled,
        }
    }

    pub(crate) fn target(&self) -> ChannelTarget {
        ChannelTarget {
            table: self.table.clone(),
            filter: self.filter.clone(),
        }
    }
}

impl fmt::Debug for SubscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionConfig")
            .field("resource_name", &self.resource_name)
            .field("table", &self.table)
            .field("filter", &self.filter)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl Configuration for SubscriptionConfig {
    type Error = ConfigurationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.resource_name.is_empty() {
            return Err(ConfigurationError::MissingField("resource_name"));
        }
        if self.table.is_empty() {
            return Err(ConfigurationError::MissingField("table"));
        }
        if self.filter.as_ref().is_some_and(|f| f.column.is_empty()) {
            return Err(ConfigurationError::InvalidValue {
                field: "filter",
                reason: "empty column".to_string(),
            });
        }
        Ok(())
    }
}

/// Retry and circuit breaker tuning of a controller.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ControllerSettings {
    /// consecutive channel failures before the circuit opens
    #[serde(default = "default_max_channel_retries")]
    max_channel_retries: u32,

    /// consecutive auth failures before the circuit opens
    #[serde(default = "default_max_auth_retries")]
    max_auth_retries: u32,

    /// first channel retry delay, doubled on every further failure
    #[serde(
        default = "default_base_retry_delay",
        deserialize_with = "deserialize_duration"
    )]
    base_retry_delay: Duration,

    /// flat delay between auth checks
    #[serde(
        default = "default_auth_retry_delay",
        deserialize_with = "deserialize_duration"
    )]
    auth_retry_delay: Duration,

    /// how long the circuit stays open before counters reset
    #[serde(
        default = "default_circuit_cooldown",
        deserialize_with = "deserialize_duration"
    )]
    circuit_cooldown: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings {
            max_channel_retries: default_max_channel_retries(),
            max_auth_retries: default_max_auth_retries(),
            base_retry_delay: default_base_retry_delay(),
            auth_retry_delay: default_auth_retry_delay(),
            circuit_cooldown: default_circuit_cooldown(),
        }
    }
}

fn default_max_channel_retries() -> u32 {
    5
}

fn default_max_auth_retries() -> u32 {
    3
}

fn default_base_retry_delay() -> Duration {
    Duration::from_millis(1000)
}

fn default_auth_retry_delay() -> Duration {
    Duration::from_millis(2000)
}

fn default_circuit_cooldown() -> Duration {
    Duration::from_millis(30000)
}

impl ControllerSettings {
    pub fn new() -> Self {
        ControllerSettings::default()
    }

    pub fn with_max_channel_retries(self, max_channel_retries: u32) -> Self {
        ControllerSettings {
            max_channel_retries,
            ..self
        }
    }

    pub fn with_max_auth_retries(self, max_auth_retries: u32) -> Self {
        ControllerSettings {
            max_auth_retries,
            ..self
        }
    }

    pub fn with_base_retry_delay(self, base_retry_delay: Duration) -> Self {
        ControllerSettings {
            base_retry_delay,
            ..self
        }
    }

    pub fn with_auth_retry_delay(self, auth_retry_delay: Duration) -> Self {
        ControllerSettings {
            auth_retry_delay,
            ..self
        }
    }

    pub fn with_circuit_cooldown(self, circuit_cooldown: Duration) -> Self {
        ControllerSettings {
            circuit_cooldown,
            ..self
        }
    }

    pub fn max_channel_retries(&self) -> u32 {
        self.max_channel_retries
    }

    pub fn max_auth_retries(&self) -> u32 {
        self.max_auth_retries
    }

    pub fn base_retry_delay(&self) -> Duration {
        self.base_retry_delay
    }

    pub fn auth_retry_delay(&self) -> Duration {
        self.auth_retry_delay
    }

    pub fn circuit_cooldown(&self) -> Duration {
        self.circuit_cooldown
    }

    /// Channel retry schedule: base, 2x base, 4x base, ... in whole
    /// milliseconds, with base rounded down to an even count.
    pub fn channel_backoff(&self) -> exponential::Config {
        exponential::Config::doubling(self.base_retry_delay, self.max_channel_retries as usize)
    }

    pub fn auth_backoff(&self) -> fixedinterval::Config {
        fixedinterval::Config::new(self.auth_retry_delay)
    }
}

/// Shortest channel retry base that still yields non-zero delays.
const MIN_BASE_RETRY_DELAY: Duration = Duration::from_millis(2);

impl Configuration for ControllerSettings {
    type Error = ConfigurationError;

    fn validate(&self) -> Result<(), Self::Error> {
        let positive = |field: &'static str, ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(ConfigurationError::InvalidValue {
                    field,
                    reason: "must be greater than zero".to_string(),
                })
            }
        };

        positive("max_channel_retries", self.max_channel_retries > 0)?;
        positive("max_auth_retries", self.max_auth_retries > 0)?;
        if self.base_retry_delay < MIN_BASE_RETRY_DELAY {
            return Err(ConfigurationError::InvalidValue {
                field: "base_retry_delay",
                reason: format!("must be at least {}ms", MIN_BASE_RETRY_DELAY.as_millis()),
            });
        }
        positive("auth_retry_delay", !self.auth_retry_delay.is_zero())?;
        positive("circuit_cooldown", !self.circuit_cooldown.is_zero())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use homesync_config::backoff::Strategy;

    use super::*;

    #[test]
    fn test_filter_round_trip_text() {
        let filter: ChangeFilter = "agent_id=eq.42".parse().unwrap();
        assert_eq!(filter, ChangeFilter::eq("agent_id", "42"));
        assert_eq!(filter.to_string(), "agent_id=eq.42");

        let filter: ChangeFilter = "price=gte.100.5".parse().unwrap();
        assert_eq!(filter.op(), FilterOp::Gte);
        assert_eq!(filter.value(), "100.5");
    }

    #[test]
    fn test_filter_rejects_malformed() {
        assert!("agent_id".parse::<ChangeFilter>().is_err());
        assert!("agent_id=42".parse::<ChangeFilter>().is_err());
        assert!("agent_id=like.4%".parse::<ChangeFilter>().is_err());
        assert!("=eq.4".parse::<ChangeFilter>().is_err());
    }

    #[test]
    fn test_subscription_validation() {
        let config = SubscriptionConfig::new("orders_42", "offers", || {});
        assert!(config.validate().is_ok());

        let config = SubscriptionConfig::new("", "offers", || {});
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::MissingField("resource_name"))
        );

        let config = SubscriptionConfig::new("tours", "", || {});
        assert_eq!(config.validate(), Err(ConfigurationError::MissingField("table")));
    }

    #[test]
    fn test_key_ignores_callback() {
        let a = SubscriptionConfig::new("tours", "tours", || {});
        let b = a.clone().with_on_change(|| {});
        assert_eq!(a.key(), b.key());

        let c = a.clone().with_filter(ChangeFilter::eq("agent_id", "1"));
        assert_ne!(a.key(), c.key());

        let d = a.clone().with_enabled(false);
        assert_ne!(a.key(), d.key());
    }

    #[test]
    fn test_default_settings() {
        let settings = ControllerSettings::default();
        assert!(settings.validate().is_ok());

        let delays: Vec<u128> = settings
            .channel_backoff()
            .get_strategy()
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);

        assert_eq!(
            settings.auth_backoff().delay_for_attempt(2),
            Some(Duration::from_millis(2000))
        );
        assert_eq!(settings.circuit_cooldown(), Duration::from_secs(30));
    }

    #[test]
    fn test_settings_validation() {
        let settings = ControllerSettings::new().with_max_auth_retries(0);
        assert!(settings.validate().is_err());

        let settings = ControllerSettings::new().with_circuit_cooldown(Duration::ZERO);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_base_retry_delay_below_two_millis_rejected() {
        for delay in [Duration::from_micros(500), Duration::from_millis(1)] {
            let settings = ControllerSettings::new().with_base_retry_delay(delay);
            assert!(matches!(
                settings.validate(),
                Err(ConfigurationError::InvalidValue {
                    field: "base_retry_delay",
                    ..
                })
            ));
        }

        let settings = ControllerSettings::new().with_base_retry_delay(Duration::from_millis(2));
        assert!(settings.validate().is_ok());

        let delays: Vec<u128> = settings
            .channel_backoff()
            .get_strategy()
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32]);
    }
}
