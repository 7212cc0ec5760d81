// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

// Third-party crates
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// What a pending timer will do when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// re-run setup after a channel failure
    ChannelRetry,
    /// re-run setup after a failed session check
    AuthRetry,
    /// close the circuit breaker
    Cooldown,
}

#[derive(Debug)]
struct PendingTimer {
    kind: TimerKind,
    seq: u64,
    cancellation_token: CancellationToken,
}

/// A single one-shot timer slot. Arming it cancels whatever was pending, so
/// at most one timer is ever outstanding.
#[derive(Debug, Default)]
pub(crate) struct TimerSlot {
    pending: Option<PendingTimer>,
    last_seq: u64,
}

impl TimerSlot {
    /// Arm the slot. `on_fire` runs on expiry with the sequence number of
    /// this arming, unless the slot is cancelled or re-armed first.
    pub(crate) fn schedule<F>(&mut self, kind: TimerKind, duration: Duration, on_fire: F)
    where
        F: FnOnce(TimerKind, u64) + Send + 'static,
    {
        self.cancel();

        self.last_seq += 1;
        let seq = self.last_seq;
        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();

        trace!(?kind, %seq, next_ms = duration.as_millis() as u64, "timer armed");
        tokio::spawn(async move {
            let timer = time::sleep(duration);
            tokio::pin!(timer);

            tokio::select! {
                _ = timer.as_mut() => {
                    trace!(?kind, %seq, "timer fired");
                    on_fire(kind, seq);
                },
                _ = token.cancelled() => {
                    trace!(?kind, %seq, "timer cancelled");
                },
            }
        });

        self.pending = Some(PendingTimer {
            kind,
            seq,
            cancellation_token,
        });
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(timer) = self.pending.take() {
            timer.cancellation_token.cancel();
        }
    }

    /// Claim the pending timer if `seq` is the current arming. A stale `seq`
    /// (the slot was cancelled or re-armed meanwhile) yields None.
    pub(crate) fn take_fired(&mut self, seq: u64) -> Option<TimerKind> {
        match &self.pending {
            Some(timer) if timer.seq == seq => self.pending.take().map(|t| t.kind),
            _ => None,
        }
    }

    pub(crate) fn pending(&self) -> Option<TimerKind> {
        self.pending.as_ref().map(|t| t.kind)
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

// tests
#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use tracing_test::traced_test;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let mut slot = TimerSlot::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let start = time::Instant::now();
        slot.schedule(TimerKind::ChannelRetry, Duration::from_millis(4000), move |k, s| {
            let _ = tx.send((k, s));
        });
        assert_eq!(slot.pending(), Some(TimerKind::ChannelRetry));

        let (kind, seq) = rx.recv().await.unwrap();
        assert_eq!(kind, TimerKind::ChannelRetry);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(4000));
        assert!(elapsed < Duration::from_millis(4010));

        assert_eq!(slot.take_fired(seq), Some(TimerKind::ChannelRetry));
        assert_eq!(slot.pending(), None);
        assert_eq!(slot.take_fired(seq), None);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_rearm_cancels_previous() {
        let mut slot = TimerSlot::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let tx_first = tx.clone();
        slot.schedule(TimerKind::AuthRetry, Duration::from_millis(100), move |k, s| {
            let _ = tx_first.send((k, s));
        });
        slot.schedule(TimerKind::Cooldown, Duration::from_millis(300), move |k, s| {
            let _ = tx.send((k, s));
        });

        let (kind, seq) = rx.recv().await.unwrap();
        assert_eq!(kind, TimerKind::Cooldown);
        assert_eq!(slot.take_fired(seq), Some(TimerKind::Cooldown));

        // the first arming never fired
        assert!(rx.recv().await.is_none());
        assert!(logs_contain("timer cancelled kind=AuthRetry"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let mut slot = TimerSlot::default();
        let (tx, mut rx) = mpsc::unbounded_channel::<(TimerKind, u64)>();

        slot.schedule(TimerKind::ChannelRetry, Duration::from_millis(100), move |k, s| {
            let _ = tx.send((k, s));
        });
        slot.cancel();
        slot.cancel();

        assert_eq!(slot.pending(), None);
        time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
    }
}
