// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of one live subscription.
//!
//! Every controller runs as its own task which exclusively owns the health
//! record, the open channel and the single pending timer. Callers hold a
//! [`ControllerHandle`]: commands go in through a queue, state comes out
//! through a `watch` snapshot.
//!
//! Session checks and channel opens run as separate tasks and report back
//! tagged with the setup generation they were started for. Tearing the
//! channel down bumps the generation, so completions and channel events
//! that belong to a superseded setup are discarded.

// Standard library imports
use std::sync::Arc;
use std::time::{Duration, SystemTime};

// Third-party crates
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use homesync_auth::traits::{SessionStatus, SessionValidator};
use homesync_config::backoff::{Strategy, exponential, fixedinterval};
use homesync_config::component::configuration::Configuration;

// Local crate
use crate::backend::{ChannelSink, ChannelStatus, RealtimeBackend, SinkEvent, SinkMessage};
use crate::config::{ControllerSettings, SubscriptionConfig};
use crate::errors::RealtimeError;
use crate::health::ConnectionHealth;
use crate::timer::{TimerKind, TimerSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    ValidatingAuth,
    Opening,
    Subscribed,
    RetryWait,
    CircuitOpen,
    Closed,
}

/// Snapshot published after every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerStatus {
    pub state: ControllerState,
    pub is_ready: bool,
    pub health: ConnectionHealth,
    pub pending_timer: Option<TimerKind>,
    /// bumped every time the channel is torn down
    pub generation: u64,
}

impl ControllerStatus {
    fn initial() -> Self {
        ControllerStatus {
            state: ControllerState::Idle,
            is_ready: false,
            health: ConnectionHealth::default(),
            pending_timer: None,
            generation: 0,
        }
    }
}

#[derive(Debug)]
enum Command {
    Retry,
    Cleanup,
    Reconfigure(SubscriptionConfig),
}

/// A command plus the signal sent once its effect is published.
type Request = (Command, oneshot::Sender<()>);

enum Event<C> {
    AuthChecked {
        generation: u64,
        status: SessionStatus,
    },
    ChannelOpened {
        generation: u64,
        result: Result<C, RealtimeError>,
    },
    Channel(SinkEvent),
    TimerFired {
        seq: u64,
    },
}

/// Entry point: binds a backend and a session validator, then spawns one
/// controller per [`configure`](SubscriptionController::configure) call.
pub struct SubscriptionController<B, V> {
    backend: Arc<B>,
    validator: Arc<V>,
    settings: ControllerSettings,
}

impl<B, V> SubscriptionController<B, V>
where
    B: RealtimeBackend,
    V: SessionValidator + 'static,
{
    pub fn new(backend: Arc<B>, validator: Arc<V>) -> Self {
        SubscriptionController {
            backend,
            validator,
            settings: ControllerSettings::default(),
        }
    }

    pub fn with_settings(self, settings: ControllerSettings) -> Self {
        SubscriptionController { settings, ..self }
    }

    /// Start a controller for `config`. Must be called from within a tokio
    /// runtime. Fails only if the configuration itself is invalid.
    pub fn configure(&self, config: SubscriptionConfig) -> Result<ControllerHandle, RealtimeError> {
        self.settings.validate()?;
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ControllerStatus::initial());
        let shutdown = CancellationToken::new();
        let resource_name = config.resource_name().to_string();

        let task = ControllerTask {
            backend: self.backend.clone(),
            validator: self.validator.clone(),
            channel_backoff: self.settings.channel_backoff(),
            auth_backoff: self.settings.auth_backoff(),
            settings: self.settings.clone(),
            config,
            health: ConnectionHealth::default(),
            state: ControllerState::Idle,
            is_ready: false,
            generation: 0,
            channel: None,
            timer: TimerSlot::default(),
            events: events_tx,
            status: status_tx,
        };

        let join_handle = tokio::spawn(task.run(commands_rx, events_rx, shutdown.clone()));

        Ok(ControllerHandle {
            resource_name,
            commands: commands_tx,
            status: status_rx,
            shutdown,
            join_handle: Some(join_handle),
        })
    }
}

/// Caller side of a running controller. Dropping it stops the controller
/// and closes its channel.
#[derive(Debug)]
pub struct ControllerHandle {
    resource_name: String,
    commands: mpsc::UnboundedSender<Request>,
    status: watch::Receiver<ControllerStatus>,
    shutdown: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl ControllerHandle {
    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    /// True while the channel is subscribed. False means data may be stale.
    pub fn is_ready(&self) -> bool {
        self.status.borrow().is_ready
    }

    pub fn connection_health(&self) -> ConnectionHealth {
        self.status.borrow().health.clone()
    }

    pub fn state(&self) -> ControllerState {
        self.status.borrow().state
    }

    pub fn status(&self) -> ControllerStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every published transition.
    pub fn watch_status(&self) -> watch::Receiver<ControllerStatus> {
        self.status.clone()
    }

    /// Reset counters and the circuit breaker and set up again right away,
    /// even while a cooldown is running. Returns once the reset is visible
    /// through the status accessors.
    pub async fn retry(&self) {
        self.send(Command::Retry).await;
    }

    /// Cancel the pending timer and close the channel. Idempotent. Returns
    /// once the channel is closed and the snapshot shows it.
    pub async fn cleanup(&self) {
        self.send(Command::Cleanup).await;
    }

    /// Apply a new configuration. A change of resource, table, filter or
    /// enabled flag restarts the subscription with fresh health; otherwise
    /// only the change callback is swapped.
    pub async fn reconfigure(&self, config: SubscriptionConfig) -> Result<(), RealtimeError> {
        config.validate()?;
        self.send(Command::Reconfigure(config)).await;
        Ok(())
    }

    /// Stop the controller and wait until its channel is closed.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(join_handle) = self.join_handle.take() {
            if let Err(e) = join_handle.await {
                warn!(resource = %self.resource_name, error = %e, "controller task failed");
            }
        }
    }

    async fn send(&self, command: Command) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send((command, ack_tx)).is_err() {
            debug!(resource = %self.resource_name, "controller stopped, command ignored");
            return;
        }

        if ack_rx.await.is_err() {
            debug!(resource = %self.resource_name, "controller stopped before applying command");
        }
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct ControllerTask<B, V>
where
    B: RealtimeBackend,
{
    backend: Arc<B>,
    validator: Arc<V>,
    settings: ControllerSettings,
    channel_backoff: exponential::Config,
    auth_backoff: fixedinterval::Config,
    config: SubscriptionConfig,
    health: ConnectionHealth,
    state: ControllerState,
    is_ready: bool,

    /// current setup generation
    generation: u64,

    channel: Option<B::Channel>,

    /// retry, auth retry and cooldown share this single slot
    timer: TimerSlot,

    events: mpsc::UnboundedSender<Event<B::Channel>>,
    status: watch::Sender<ControllerStatus>,
}

impl<B, V> ControllerTask<B, V>
where
    B: RealtimeBackend,
    V: SessionValidator + 'static,
{
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Request>,
        mut events: mpsc::UnboundedReceiver<Event<B::Channel>>,
        shutdown: CancellationToken,
    ) {
        debug!(resource = %self.config.resource_name(), "controller started");

        self.setup().await;
        self.publish();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                request = commands.recv() => match request {
                    Some((command, ack)) => {
                        self.on_command(command).await;
                        self.publish();
                        let _ = ack.send(());
                    }
                    None => break,
                },
                Some(event) = events.recv() => self.on_event(event).await,
            }
            self.publish();
        }

        self.cleanup().await;
        self.state = ControllerState::Idle;
        self.publish();

        // opens that completed while tearing down are still queued
        events.close();
        while let Some(event) = events.recv().await {
            if let Event::ChannelOpened {
                result: Ok(channel),
                ..
            } = event
            {
                debug!(resource = %self.config.resource_name(), "closing channel opened during shutdown");
                self.backend.close_channel(channel).await;
            }
        }

        debug!(resource = %self.config.resource_name(), "controller stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Retry => {
                info!(resource = %self.config.resource_name(), "manual retry");
                self.health.reset_circuit();
                self.setup().await;
            }
            Command::Cleanup => {
                self.cleanup().await;
                self.state = ControllerState::Idle;
            }
            Command::Reconfigure(config) => {
                if config.key() == self.config.key() {
                    debug!(resource = %config.resource_name(), "change callback replaced");
                    self.config = config;
                    return;
                }

                info!(
                    from = %self.config.resource_name(),
                    to = %config.resource_name(),
                    enabled = config.enabled(),
                    "subscription reconfigured"
                );
                self.config = config;
                self.health = ConnectionHealth::default();
                self.setup().await;
            }
        }
    }

    async fn on_event(&mut self, event: Event<B::Channel>) {
        match event {
            Event::AuthChecked { generation, status } => {
                self.on_auth_checked(generation, status).await
            }
            Event::ChannelOpened { generation, result } => {
                self.on_channel_opened(generation, result).await
            }
            Event::Channel(SinkEvent {
                generation,
                message,
            }) => {
                if generation != self.generation {
                    trace!(%generation, current = %self.generation, "stale channel event dropped");
                    return;
                }
                match message {
                    SinkMessage::Change => self.config.notify_change(),
                    SinkMessage::Status(status) => self.on_channel_status(status).await,
                }
            }
            Event::TimerFired { seq } => self.on_timer_fired(seq).await,
        }
    }

    /// Tear down whatever is running, then validate the session unless the
    /// subscription is disabled. Suppressed while the circuit is open so
    /// the cooldown keeps running.
    async fn setup(&mut self) {
        if self.health.circuit_breaker_open() {
            debug!(resource = %self.config.resource_name(), "circuit open, setup suppressed");
            return;
        }

        self.cleanup().await;

        if !self.config.enabled() {
            debug!(resource = %self.config.resource_name(), "subscription disabled");
            self.state = ControllerState::Idle;
            return;
        }

        self.state = ControllerState::ValidatingAuth;

        let generation = self.generation;
        let validator = self.validator.clone();
        let events = self.events.clone();

        debug!(resource = %self.config.resource_name(), %generation, "validating session");
        tokio::spawn(async move {
            let status = validator.validate().await;
            let _ = events.send(Event::AuthChecked { generation, status });
        });
    }

    async fn cleanup(&mut self) {
        self.timer.cancel();
        self.generation += 1;
        self.is_ready = false;
        self.close_channel().await;
    }

    async fn close_channel(&mut self) {
        if let Some(channel) = self.channel.take() {
            debug!(resource = %self.config.resource_name(), "closing channel");
            self.backend.close_channel(channel).await;
        }
    }

    async fn on_auth_checked(&mut self, generation: u64, status: SessionStatus) {
        if generation != self.generation {
            debug!(
                resource = %self.config.resource_name(),
                %generation,
                current = %self.generation,
                "stale session check discarded"
            );
            return;
        }

        if status.is_valid {
            debug!(
                resource = %self.config.resource_name(),
                identity = ?status.identity.as_ref().map(|i| i.as_str()),
                "session valid"
            );
            self.health.record_auth_success();
            self.close_channel().await;
            self.open_channel();
            return;
        }

        let failures = self.health.record_auth_failure();
        if failures < self.settings.max_auth_retries() {
            let delay = self
                .auth_backoff
                .delay_for_attempt(failures as usize - 1)
                .unwrap_or_else(|| self.auth_backoff.interval());
            warn!(
                resource = %self.config.resource_name(),
                %failures,
                delay_ms = delay.as_millis() as u64,
                "session not ready, retrying"
            );
            self.schedule(TimerKind::AuthRetry, delay);
        } else {
            warn!(resource = %self.config.resource_name(), %failures, "session never became ready");
            self.open_circuit().await;
        }
    }

    fn open_channel(&mut self) {
        self.state = ControllerState::Opening;

        let generation = self.generation;
        let backend = self.backend.clone();
        let resource_name = self.config.resource_name().to_string();
        let target = self.config.target();
        let events = self.events.clone();

        let sink_events = self.events.clone();
        let sink = ChannelSink::new(
            generation,
            Arc::new(move |event| {
                let _ = sink_events.send(Event::Channel(event));
            }),
        );

        debug!(resource = %resource_name, %generation, "opening channel");
        tokio::spawn(async move {
            let result = backend.open_channel(&resource_name, &target, sink).await;
            if let Err(mpsc::error::SendError(Event::ChannelOpened {
                result: Ok(channel),
                ..
            })) = events.send(Event::ChannelOpened { generation, result })
            {
                // nobody left to own it
                backend.close_channel(channel).await;
            }
        });
    }

    async fn on_channel_opened(&mut self, generation: u64, result: Result<B::Channel, RealtimeError>) {
        let current = generation == self.generation;
        match result {
            Ok(channel) if current => {
                self.close_channel().await;
                self.channel = Some(channel);
            }
            Ok(channel) => {
                debug!(
                    resource = %self.config.resource_name(),
                    %generation,
                    "channel opened for a superseded setup, closing it"
                );
                self.backend.close_channel(channel).await;
            }
            Err(e) if current && self.state == ControllerState::Opening => {
                self.on_channel_error(&e.to_string()).await;
            }
            Err(e) => {
                debug!(resource = %self.config.resource_name(), error = %e, "stale open failure ignored");
            }
        }
    }

    async fn on_channel_status(&mut self, status: ChannelStatus) {
        use ControllerState::*;

        match (status, self.state) {
            (ChannelStatus::Subscribed, Opening | Subscribed | RetryWait) => {
                self.timer.cancel();
                self.health.record_success(SystemTime::now());
                self.is_ready = true;
                self.state = Subscribed;
                info!(resource = %self.config.resource_name(), "subscribed");
            }
            (ChannelStatus::ChannelError(reason), Opening | Subscribed) => {
                self.on_channel_error(&reason).await;
            }
            (ChannelStatus::Closed, Opening | Subscribed) => {
                self.is_ready = false;
                self.state = Closed;
                info!(resource = %self.config.resource_name(), "channel closed");
            }
            (status, state) => {
                debug!(resource = %self.config.resource_name(), %status, ?state, "status ignored");
            }
        }
    }

    /// Counts the failure before comparing with the limit, so the failure
    /// that reaches `max_channel_retries` opens the circuit and the last
    /// delay of the channel schedule is never waited.
    async fn on_channel_error(&mut self, reason: &str) {
        self.is_ready = false;

        let failures = self.health.record_channel_failure(reason);
        if failures < self.settings.max_channel_retries() {
            let delay = self
                .channel_backoff
                .delay_for_attempt(failures as usize - 1)
                .unwrap_or_else(|| self.channel_backoff.max_delay());
            warn!(
                resource = %self.config.resource_name(),
                %reason,
                retry_count = %failures,
                delay_ms = delay.as_millis() as u64,
                "channel error, retrying"
            );
            self.schedule(TimerKind::ChannelRetry, delay);
            self.state = ControllerState::RetryWait;
        } else {
            warn!(
                resource = %self.config.resource_name(),
                %reason,
                retry_count = %failures,
                "channel error, retries exhausted"
            );
            self.open_circuit().await;
        }
    }

    async fn open_circuit(&mut self) {
        self.timer.cancel();
        self.generation += 1;
        self.is_ready = false;
        self.close_channel().await;

        self.health.open_circuit();
        self.state = ControllerState::CircuitOpen;

        let cooldown = self.settings.circuit_cooldown();
        warn!(
            resource = %self.config.resource_name(),
            cooldown_ms = cooldown.as_millis() as u64,
            "circuit breaker open"
        );
        self.schedule(TimerKind::Cooldown, cooldown);
    }

    async fn on_timer_fired(&mut self, seq: u64) {
        let Some(kind) = self.timer.take_fired(seq) else {
            trace!(%seq, "stale timer ignored");
            return;
        };

        match kind {
            TimerKind::ChannelRetry | TimerKind::AuthRetry => self.setup().await,
            TimerKind::Cooldown => {
                self.health.reset_circuit();
                info!(resource = %self.config.resource_name(), "circuit breaker reset");
                if self.config.enabled() {
                    self.setup().await;
                } else {
                    self.state = ControllerState::Idle;
                }
            }
        }
    }

    fn schedule(&mut self, kind: TimerKind, delay: Duration) {
        let events = self.events.clone();
        self.timer.schedule(kind, delay, move |_, seq| {
            let _ = events.send(Event::TimerFired { seq });
        });
    }

    fn publish(&self) {
        let next = ControllerStatus {
            state: self.state,
            is_ready: self.is_ready,
            health: self.health.clone(),
            pending_timer: self.timer.pending(),
            generation: self.generation,
        };

        self.status.send_if_modified(|current| {
            if *current != next {
                *current = next;
                true
            } else {
                false
            }
        });
    }
}
