// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::time::Duration;

use serde::Deserialize;

use homesync_config::backoff::{Strategy, exponential, fixedinterval};
use homesync_config::component::configuration::Configuration;

static TEST_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests");

#[derive(Debug, Deserialize)]
struct BackoffFile {
    exponential: exponential::Config,
    fixed: fixedinterval::Config,
}

#[test]
fn test_load_backoff_from_yaml() {
    let contents = fs::read_to_string(format!("{}/testdata/backoff.yaml", TEST_PATH)).unwrap();
    let config: BackoffFile = serde_yaml::from_str(&contents).unwrap();

    assert!(config.exponential.validate().is_ok());
    assert!(config.fixed.validate().is_ok());

    let delays: Vec<u128> = config
        .exponential
        .get_strategy()
        .map(|d| d.as_millis())
        .collect();
    assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);

    assert_eq!(config.fixed.interval(), Duration::from_secs(2));
}

#[test]
fn test_missing_fields_use_defaults() {
    let config: fixedinterval::Config = serde_yaml::from_str("{}").unwrap();
    assert_eq!(config, fixedinterval::Config::default());

    let config: exponential::Config = serde_yaml::from_str("factor: 250").unwrap();
    assert_eq!(config.base(), 2);
    assert_eq!(config.factor(), 250);
    assert!(!config.jitter());
    assert_eq!(config.delay_for_attempt(0), Some(Duration::from_millis(500)));
}
