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

//! Engine tuning.

use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Timing and retry limits for balance mutations.
///
/// Durations are expressed in milliseconds so the struct deserializes from
/// flat config sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ceiling on the total wait for all locks of one operation.
    pub lock_timeout_ms: u64,
    /// Attempts per compare-and-swap balance update.
    pub max_attempts: u32,
    /// Delay after the first conflict; doubled for each further attempt.
    pub base_backoff_ms: u64,
}

impl EngineConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_backoff_ms))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 3_000,
            max_attempts: 3,
            base_backoff_ms: 5,
        }
    }
}
