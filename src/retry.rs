// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Bounded retry with exponential backoff.
//!
//! Only the compare-and-swap balance step is retried. Every other engine
//! step surfaces its failure to the caller immediately.

use std::thread;
use std::time::Duration;
use tracing::debug;

/// Outcome of a single optimistic attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt<T> {
    Done(T),
    /// Lost a race; worth another try.
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff: Duration,
}

impl RetryPolicy {
    /// Builds a policy; `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before attempt `attempt + 1`, doubling from the base.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1 << exponent)
    }

    /// Runs `step` until it completes, errors, or attempts run out.
    ///
    /// Returns `Ok(None)` when every attempt ended in [`Attempt::Conflict`].
    pub fn run<T, E>(
        &self,
        mut step: impl FnMut() -> Result<Attempt<T>, E>,
    ) -> Result<Option<T>, E> {
        for attempt in 1..=self.max_attempts {
            match step()? {
                Attempt::Done(value) => return Ok(Some(value)),
                Attempt::Conflict if attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    debug!(attempt, ?delay, "optimistic update conflicted, retrying");
                    thread::sleep(delay);
                }
                Attempt::Conflict => {
                    debug!(attempt, "optimistic update conflicted, giving up");
                }
            }
        }
        Ok(None)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(5))
    }
}
