// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use homesync_config::component::configuration::ConfigurationError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RealtimeError {
    #[error("channel open failed: {0}")]
    ChannelOpen(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

/// Failures absorbed by the controller. They never reach the caller as
/// errors, only as the text of `ConnectionHealth::last_error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    #[error("auth not ready")]
    AuthNotReady,
    #[error("channel error: {0}")]
    ChannelError(String),
    #[error("max retries reached")]
    CircuitOpen,
}
