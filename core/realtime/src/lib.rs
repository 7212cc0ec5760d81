// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod backend;
pub mod config;
pub mod controller;
pub mod errors;
pub mod health;
pub mod testutils;
pub mod timer;

pub use backend::{ChannelSink, ChannelStatus, ChannelTarget, RealtimeBackend};
pub use config::{ChangeFilter, ControllerSettings, FilterOp, SubscriptionConfig};
pub use controller::{ControllerHandle, ControllerState, ControllerStatus, SubscriptionController};
pub use errors::{FailureKind, RealtimeError};
pub use health::ConnectionHealth;
pub use timer::TimerKind;
