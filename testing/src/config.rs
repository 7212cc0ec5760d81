// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;
use thiserror::Error;

use homesync_realtime::{ChangeFilter, ControllerSettings, RealtimeError, SubscriptionConfig};
use homesync_tracing::TracingConfiguration;

#[derive(Error, Debug)]
pub enum SoakError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error(transparent)]
    Realtime(#[from] RealtimeError),
}

/// Fault injection knobs of the flaky backend.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// chance that a freshly opened channel reports an error instead of
    /// subscribing
    #[serde(default = "default_open_failure_probability")]
    pub open_failure_probability: f64,

    /// chance, per tick, that a live channel breaks
    #[serde(default = "default_fault_probability")]
    pub fault_probability: f64,

    #[serde(default = "default_tick", deserialize_with = "deserialize_duration")]
    pub tick: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            open_failure_probability: default_open_failure_probability(),
            fault_probability: default_fault_probability(),
            tick: default_tick(),
        }
    }
}

fn default_open_failure_probability() -> f64 {
    0.2
}

fn default_fault_probability() -> f64 {
    0.05
}

fn default_tick() -> Duration {
    Duration::from_millis(500)
}

/// Session the harness signs in with. When a token is given sessions are
/// checked by decoding it as a JWT.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_identity")]
    pub identity: String,

    #[serde(default)]
    pub token: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            identity: default_identity(),
            token: None,
        }
    }
}

fn default_identity() -> String {
    "soak".to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SubscriptionEntry {
    pub resource_name: String,
    pub table: String,

    /// filter in `column=op.value` form
    #[serde(default)]
    pub filter: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl SubscriptionEntry {
    pub fn to_config<F>(&self, on_change: F) -> Result<SubscriptionConfig, RealtimeError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let config = SubscriptionConfig::new(&self.resource_name, &self.table, on_change)
            .with_enabled(self.enabled);

        match &self.filter {
            Some(filter) => Ok(config.with_filter(filter.parse::<ChangeFilter>()?)),
            None => Ok(config),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SoakConfig {
    #[serde(default)]
    pub tracing: TracingConfiguration,

    #[serde(default)]
    pub settings: ControllerSettings,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub session: SessionConfig,

    pub subscriptions: Vec<SubscriptionEntry>,
}

pub fn load_config(path: impl AsRef<Path>) -> Result<SoakConfig, SoakError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_bundled_config() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/soak.yaml");
        let config = load_config(path).unwrap();

        assert_eq!(config.subscriptions.len(), 3);
        assert_eq!(config.settings.circuit_cooldown(), Duration::from_secs(5));
        assert_eq!(config.backend.tick, Duration::from_millis(250));
        assert_eq!(config.session.identity, "soak-user");
        assert_eq!(config.session.token, None);

        let offers = config.subscriptions[0].to_config(|| {}).unwrap();
        assert_eq!(
            offers.filter().map(|f| f.to_string()),
            Some("agent_id=eq.42".to_string())
        );
        assert!(!config.subscriptions[2].to_config(|| {}).unwrap().enabled());
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: SoakConfig =
            serde_yaml::from_str("subscriptions:\n  - resource_name: a\n    table: t\n").unwrap();

        assert_eq!(config.settings, ControllerSettings::default());
        assert_eq!(config.backend, BackendConfig::default());
        assert!(config.subscriptions[0].enabled);
    }

    #[test]
    fn test_bad_filter_is_reported() {
        let entry = SubscriptionEntry {
            resource_name: "a".to_string(),
            table: "t".to_string(),
            filter: Some("agent_id".to_string()),
            enabled: true,
        };

        assert!(matches!(
            entry.to_config(|| {}),
            Err(RealtimeError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_config("/does/not/exist.yaml"),
            Err(SoakError::Io(_))
        ));
    }
}
