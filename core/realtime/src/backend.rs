// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

// Standard library imports
use std::fmt;
use std::sync::Arc;

// Third-party crates
use async_trait::async_trait;

// Local crate
use crate::config::ChangeFilter;
use crate::errors::RealtimeError;

/// What a channel watches on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    pub table: String,
    pub filter: Option<ChangeFilter>,
}

/// Status reported by the backend for an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError(String),
    Closed,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Subscribed => write!(f, "SUBSCRIBED"),
            ChannelStatus::ChannelError(reason) => write!(f, "CHANNEL_ERROR ({})", reason),
            ChannelStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SinkMessage {
    Change,
    Status(ChannelStatus),
}

/// Notification emitted by a channel, tagged with the setup generation the
/// channel was opened for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SinkEvent {
    pub(crate) generation: u64,
    pub(crate) message: SinkMessage,
}

/// Handed to the backend when a channel is opened. The backend calls it for
/// every change event and every status transition of that channel.
#[derive(Clone)]
pub struct ChannelSink {
    generation: u64,
    emit: Arc<dyn Fn(SinkEvent) + Send + Sync>,
}

impl ChannelSink {
    pub(crate) fn new(generation: u64, emit: Arc<dyn Fn(SinkEvent) + Send + Sync>) -> Self {
        ChannelSink { generation, emit }
    }

    /// Signal that watched data changed.
    pub fn notify_change(&self) {
        (self.emit)(SinkEvent {
            generation: self.generation,
            message: SinkMessage::Change,
        });
    }

    pub fn report_status(&self, status: ChannelStatus) {
        (self.emit)(SinkEvent {
            generation: self.generation,
            message: SinkMessage::Status(status),
        });
    }
}

impl fmt::Debug for ChannelSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSink")
            .field("generation", &self.generation)
            .finish()
    }
}

/// Realtime side of the backend: opens and closes named change channels.
#[async_trait]
pub trait RealtimeBackend: Send + Sync + 'static {
    /// Handle of an open channel, given back to `close_channel`.
    type Channel: Send + 'static;

    /// Open a channel named `resource_name` on `target`. Status transitions
    /// and change events must be reported through `sink`, possibly before
    /// this call returns.
    async fn open_channel(
        &self,
        resource_name: &str,
        target: &ChannelTarget,
        sink: ChannelSink,
    ) -> Result<Self::Channel, RealtimeError>;

    /// Close a channel. Must tolerate channels that already failed or closed.
    async fn close_channel(&self, channel: Self::Channel);
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn test_sink_tags_generation() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink = ChannelSink::new(7, Arc::new(move |e| seen_clone.lock().push(e)));

        sink.report_status(ChannelStatus::Subscribed);
        sink.clone().notify_change();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|e| e.generation == 7));
        assert_eq!(
            seen[0].message,
            SinkMessage::Status(ChannelStatus::Subscribed)
        );
        assert_eq!(seen[1].message, SinkMessage::Change);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ChannelStatus::Subscribed.to_string(), "SUBSCRIBED");
        assert_eq!(
            ChannelStatus::ChannelError("timeout".to_string()).to_string(),
            "CHANNEL_ERROR (timeout)"
        );
    }
}
