// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! In-memory backend and session validator driven by scripts, for tests and
//! local tooling.

// Standard library imports
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

// Third-party crates
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use homesync_auth::traits::{Identity, SessionStatus, SessionValidator};

// Local crate
use crate::backend::{ChannelSink, ChannelStatus, ChannelTarget, RealtimeBackend};
use crate::errors::RealtimeError;

/// What the mock does on the next `open_channel` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// open, then report this status right away
    Status(ChannelStatus),
    /// open and stay quiet until told otherwise
    Silent,
    /// fail the open call itself
    FailOpen(String),
}

impl From<ChannelStatus> for MockResponse {
    fn from(status: ChannelStatus) -> Self {
        MockResponse::Status(status)
    }
}

#[derive(Debug, Clone)]
pub struct OpenRecord {
    pub resource_name: String,
    pub target: ChannelTarget,
    pub at: Instant,
}

#[derive(Debug)]
pub struct MockChannel {
    id: u64,
    resource_name: String,
}

impl MockChannel {
    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }
}

#[derive(Default)]
struct MockState {
    script: VecDeque<MockResponse>,
    opens: Vec<OpenRecord>,
    live: HashMap<u64, (String, ChannelSink)>,
    next_id: u64,
    closed: usize,
    max_concurrent: HashMap<String, usize>,
}

pub struct MockBackend {
    default_response: MockResponse,
    open_latency: Duration,
    state: Mutex<MockState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        MockBackend::new()
    }
}

impl MockBackend {
    /// Every open succeeds and reports `Subscribed` unless scripted otherwise.
    pub fn new() -> Self {
        MockBackend {
            default_response: MockResponse::Status(ChannelStatus::Subscribed),
            open_latency: Duration::ZERO,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_default(self, default_response: impl Into<MockResponse>) -> Self {
        MockBackend {
            default_response: default_response.into(),
            ..self
        }
    }

    /// Every open call takes `open_latency` before the channel exists.
    pub fn with_open_latency(self, open_latency: Duration) -> Self {
        MockBackend {
            open_latency,
            ..self
        }
    }

    /// Responses consumed in order by the next opens; the default applies
    /// once the script is exhausted.
    pub fn with_script<I, R>(self, script: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<MockResponse>,
    {
        self.state
            .lock()
            .script
            .extend(script.into_iter().map(Into::into));
        self
    }

    pub fn push_response(&self, response: impl Into<MockResponse>) {
        self.state.lock().script.push_back(response.into());
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        self.state.lock().opens.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens.len()
    }

    pub fn closed_count(&self) -> usize {
        self.state.lock().closed
    }

    pub fn currently_open(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Highest number of simultaneously open channels seen for `resource_name`.
    pub fn max_concurrent(&self, resource_name: &str) -> usize {
        self.state
            .lock()
            .max_concurrent
            .get(resource_name)
            .copied()
            .unwrap_or(0)
    }

    /// Deliver a change event on every open channel of `resource_name`.
    /// Returns how many channels got it.
    pub fn emit_change(&self, resource_name: &str) -> usize {
        let sinks = self.sinks_for(resource_name);
        sinks.iter().for_each(|sink| sink.notify_change());
        sinks.len()
    }

    pub fn emit_status(&self, resource_name: &str, status: ChannelStatus) -> usize {
        let sinks = self.sinks_for(resource_name);
        for sink in &sinks {
            sink.report_status(status.clone());
        }
        sinks.len()
    }

    fn sinks_for(&self, resource_name: &str) -> Vec<ChannelSink> {
        // clone out so sinks run without the lock held
        self.state
            .lock()
            .live
            .values()
            .filter(|(name, _)| name == resource_name)
            .map(|(_, sink)| sink.clone())
            .collect()
    }
}

#[async_trait]
impl RealtimeBackend for MockBackend {
    type Channel = MockChannel;

    async fn open_channel(
        &self,
        resource_name: &str,
        target: &ChannelTarget,
        sink: ChannelSink,
    ) -> Result<MockChannel, RealtimeError> {
        let response = {
            let mut state = self.state.lock();
            state.opens.push(OpenRecord {
                resource_name: resource_name.to_string(),
                target: target.clone(),
                at: Instant::now(),
            });

            state
                .script
                .pop_front()
                .unwrap_or_else(|| self.default_response.clone())
        };

        if !self.open_latency.is_zero() {
            tokio::time::sleep(self.open_latency).await;
        }

        if let MockResponse::FailOpen(reason) = &response {
            return Err(RealtimeError::ChannelOpen(reason.clone()));
        }

        let channel = {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = state.next_id;
            state
                .live
                .insert(id, (resource_name.to_string(), sink.clone()));

            let open_now = state
                .live
                .values()
                .filter(|(name, _)| name == resource_name)
                .count();
            let max = state
                .max_concurrent
                .entry(resource_name.to_string())
                .or_default();
            *max = (*max).max(open_now);

            MockChannel {
                id,
                resource_name: resource_name.to_string(),
            }
        };

        if let MockResponse::Status(status) = response {
            sink.report_status(status);
        }

        Ok(channel)
    }

    async fn close_channel(&self, channel: MockChannel) {
        let mut state = self.state.lock();
        if state.live.remove(&channel.id).is_some() {
            state.closed += 1;
        }
    }
}

/// Session validator answering from a script of verdicts.
pub struct ScriptedValidator {
    default_valid: bool,
    latency: Duration,
    script: Mutex<VecDeque<bool>>,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedValidator {
    pub fn new(default_valid: bool) -> Self {
        ScriptedValidator {
            default_valid,
            latency: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(self, script: impl IntoIterator<Item = bool>) -> Self {
        self.script.lock().extend(script);
        self
    }

    /// Delay every answer by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        ScriptedValidator { latency, ..self }
    }

    pub fn calls(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl SessionValidator for ScriptedValidator {
    async fn validate(&self) -> SessionStatus {
        self.calls.lock().push(Instant::now());
        let valid = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(self.default_valid);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if valid {
            SessionStatus::valid(Identity::new("test-user"))
        } else {
            SessionStatus::invalid()
        }
    }
}
