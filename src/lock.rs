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

//! Per-account mutual exclusion.
//!
//! Every balance mutation runs inside a [`LockScope`] covering all accounts
//! it touches. Scopes acquire their account locks in ascending [`AccountId`]
//! order, so two transfers over the same pair in opposite directions can
//! never wait on each other in a cycle. Waiting is bounded: a scope that
//! cannot be completed before its deadline releases whatever it already
//! holds and reports [`LockTimeout`].

use crate::base::AccountId;
use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Lock wait exceeded its ceiling.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("timed out after {0:?} waiting for account lock")]
pub struct LockTimeout(pub Duration);

/// Process-wide registry of account locks.
#[derive(Debug, Default)]
pub struct AccountLocks {
    slots: DashMap<AccountId, Arc<Mutex<()>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks every account in `accounts`, waiting at most `timeout` in total.
    ///
    /// Duplicate IDs are collapsed, so a scope over `[a, a]` locks `a` once.
    ///
    /// # Errors
    ///
    /// Returns [`LockTimeout`] if the scope could not be completed in time.
    /// Locks taken before the deadline are released before returning.
    pub fn acquire(&self, accounts: &[AccountId], timeout: Duration) -> Result<LockScope, LockTimeout> {
        let deadline = Instant::now() + timeout;
        let mut ordered = accounts.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for account in &ordered {
            // Clone the slot out so the shard lock is released before blocking.
            let slot = Arc::clone(self.slots.entry(*account).or_default().value());
            let remaining = deadline.saturating_duration_since(Instant::now());
            match slot.try_lock_arc_for(remaining) {
                Some(guard) => guards.push(guard),
                None => {
                    debug!(account = %account, ?timeout, "account lock wait timed out");
                    return Err(LockTimeout(timeout));
                }
            }
        }

        debug!(accounts = ?ordered, "account locks acquired");
        Ok(LockScope {
            accounts: ordered,
            _guards: guards,
        })
    }

    /// Drops the lock slot of a deleted account.
    pub fn forget(&self, account: AccountId) {
        self.slots.remove(&account);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Held account locks; released when dropped.
pub struct LockScope {
    accounts: Vec<AccountId>,
    _guards: Vec<ArcMutexGuard<RawMutex, ()>>,
}

impl LockScope {
    /// Accounts covered by this scope, in acquisition order.
    pub fn accounts(&self) -> &[AccountId] {
        &self.accounts
    }

    pub fn covers(&self, account: AccountId) -> bool {
        self.accounts.binary_search(&account).is_ok()
    }
}

impl std::fmt::Debug for LockScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockScope")
            .field("accounts", &self.accounts)
            .finish()
    }
}
