// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod exponential;
pub mod fixedinterval;

use std::time::Duration;

pub trait Strategy {
    fn get_strategy(&self) -> Box<dyn Iterator<Item = Duration> + Send>;

    /// Delay to wait before retry number `attempt` (0-based), or None once
    /// the strategy is exhausted.
    fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        self.get_strategy().nth(attempt)
    }
}

pub(crate) fn default_max_attempts() -> usize {
    usize::MAX
}
