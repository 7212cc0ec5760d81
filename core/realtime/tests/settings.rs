// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use homesync_config::backoff::Strategy;
use homesync_config::component::configuration::Configuration;
use homesync_realtime::ControllerSettings;

static TEST_DATA_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/testdata");

#[test]
fn test_load_settings_from_yaml() {
    let raw = std::fs::read_to_string(format!("{}/settings.yaml", TEST_DATA_PATH))
        .expect("failed to read settings fixture");
    let settings: ControllerSettings = serde_yaml::from_str(&raw).unwrap();

    assert!(settings.validate().is_ok());
    assert_eq!(settings.max_channel_retries(), 4);
    assert_eq!(settings.max_auth_retries(), 2);
    assert_eq!(settings.base_retry_delay(), Duration::from_millis(500));
    assert_eq!(settings.auth_retry_delay(), Duration::from_secs(1));
    assert_eq!(settings.circuit_cooldown(), Duration::from_secs(60));

    let delays: Vec<Duration> = settings.channel_backoff().get_strategy().collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(500),
            Duration::from_millis(1000),
            Duration::from_millis(2000),
            Duration::from_millis(4000),
        ]
    );
}

#[test]
fn test_missing_fields_take_defaults() {
    let settings: ControllerSettings = serde_yaml::from_str("max_channel_retries: 7").unwrap();

    assert_eq!(settings.max_channel_retries(), 7);
    assert_eq!(settings, ControllerSettings::new().with_max_channel_retries(7));
}
