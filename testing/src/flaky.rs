// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Backend that fails at random, for soaking controllers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tracing::debug;

use homesync_realtime::{ChannelSink, ChannelStatus, ChannelTarget, RealtimeBackend, RealtimeError};

#[derive(Debug)]
pub struct FlakyChannel {
    id: u64,
}

pub struct FlakyBackend {
    open_failure_probability: f64,
    next_id: AtomicU64,
    opens: AtomicUsize,
    channels: Mutex<HashMap<u64, (String, ChannelSink)>>,
}

impl FlakyBackend {
    pub fn new(open_failure_probability: f64) -> Self {
        FlakyBackend {
            open_failure_probability: open_failure_probability.clamp(0.0, 1.0),
            next_id: AtomicU64::new(0),
            opens: AtomicUsize::new(0),
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }

    pub fn live_channels(&self) -> usize {
        self.channels.lock().len()
    }

    /// Deliver one change event on every open channel.
    pub fn broadcast_change(&self) -> usize {
        let sinks: Vec<ChannelSink> = self
            .channels
            .lock()
            .values()
            .map(|(_, sink)| sink.clone())
            .collect();

        sinks.iter().for_each(|sink| sink.notify_change());
        sinks.len()
    }

    /// Break every open channel with the given probability. Returns the
    /// number of channels hit.
    pub fn inject_faults(&self, probability: f64) -> usize {
        let probability = probability.clamp(0.0, 1.0);
        let victims: Vec<(String, ChannelSink)> = {
            let mut rng = rand::rng();
            self.channels
                .lock()
                .values()
                .filter(|_| rng.random_bool(probability))
                .cloned()
                .collect()
        };

        for (resource_name, sink) in &victims {
            debug!(resource = %resource_name, "injecting channel fault");
            sink.report_status(ChannelStatus::ChannelError("injected fault".to_string()));
        }
        victims.len()
    }
}

#[async_trait]
impl RealtimeBackend for FlakyBackend {
    type Channel = FlakyChannel;

    async fn open_channel(
        &self,
        resource_name: &str,
        target: &ChannelTarget,
        sink: ChannelSink,
    ) -> Result<FlakyChannel, RealtimeError> {
        self.opens.fetch_add(1, Ordering::Relaxed);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let fail = rand::rng().random_bool(self.open_failure_probability);

        self.channels
            .lock()
            .insert(id, (resource_name.to_string(), sink.clone()));

        debug!(resource = %resource_name, table = %target.table, %id, %fail, "channel opened");
        if fail {
            sink.report_status(ChannelStatus::ChannelError("injected open failure".to_string()));
        } else {
            sink.report_status(ChannelStatus::Subscribed);
        }

        Ok(FlakyChannel { id })
    }

    async fn close_channel(&self, channel: FlakyChannel) {
        self.channels.lock().remove(&channel.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use homesync_realtime::testutils::ScriptedValidator;
    use homesync_realtime::{SubscriptionConfig, SubscriptionController};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reliable_backend_subscribes() {
        let backend = Arc::new(FlakyBackend::new(0.0));
        let validator = Arc::new(ScriptedValidator::new(true));

        let handle = SubscriptionController::new(backend.clone(), validator)
            .configure(SubscriptionConfig::new("tours", "tours", || {}))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(handle.is_ready());
        assert_eq!(backend.live_channels(), 1);
        assert_eq!(backend.broadcast_change(), 1);

        assert_eq!(backend.inject_faults(1.0), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_ready());
        assert_eq!(handle.connection_health().retry_count(), 1);

        handle.shutdown().await;
        assert_eq!(backend.live_channels(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_backend_trips_circuit() {
        let backend = Arc::new(FlakyBackend::new(1.0));
        let validator = Arc::new(ScriptedValidator::new(true));

        let handle = SubscriptionController::new(backend.clone(), validator)
            .configure(SubscriptionConfig::new("tours", "tours", || {}))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert!(handle.connection_health().circuit_breaker_open());
        assert_eq!(backend.open_count(), 5);
        assert_eq!(backend.live_channels(), 0);
    }
}
