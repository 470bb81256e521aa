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

//! Thread-safe transfer log with deduplication.
//!
//! Provides the transfer table of [`InMemoryLedger`](crate::InMemoryLedger):
//! transfer ID uniqueness plus chronological retrieval per account.

use crate::base::{AccountId, TransferId};
use crate::error::StoreError;
use crate::transfer::Transfer;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// A thread-safe transfer log with duplicate detection.
///
/// Records are immutable once pushed; the only removal path is
/// [`TransferLog::purge_account`], used by cascading account deletion.
#[derive(Debug, Default)]
pub struct TransferLog {
    transfers: DashMap<TransferId, Arc<Transfer>>,
}

impl TransferLog {
    /// Creates a new empty transfer log.
    pub fn new() -> Self {
        Self {
            transfers: DashMap::new(),
        }
    }

    /// Appends a transfer record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if a transfer with the same ID was
    /// already recorded; IDs are never reused so this indicates a caller bug.
    pub fn push(&self, transfer: Transfer) -> Result<(), StoreError> {
        // Entry API gives an atomic check-and-insert.
        match self.transfers.entry(transfer.id) {
            Entry::Occupied(_) => Err(StoreError::Unavailable(format!(
                "duplicate transfer id {}",
                transfer.id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(transfer));
                Ok(())
            }
        }
    }

    /// Transfers sent or received by `account`, oldest first.
    pub fn for_account(&self, account: AccountId) -> Vec<Arc<Transfer>> {
        let mut matching: Vec<_> = self
            .transfers
            .iter()
            .filter(|entry| entry.value().involves(account))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        matching.sort_by_key(|transfer| (transfer.created_at, transfer.id));
        matching
    }

    /// Removes every transfer referencing `account`, returning how many were dropped.
    pub fn purge_account(&self, account: AccountId) -> usize {
        let before = self.transfers.len();
        self.transfers.retain(|_, transfer| !transfer.involves(account));
        before - self.transfers.len()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Amount;
    use crate::transfer::Originator;

    fn transfer(from: AccountId, to: AccountId) -> Transfer {
        Transfer::new(
            Originator::Account(from),
            to,
            Amount::parse("1").unwrap(),
            None,
        )
    }

    #[test]
    fn push_rejects_duplicate_ids() {
        let log = TransferLog::new();
        let record = transfer(AccountId::new(), AccountId::new());
        log.push(record.clone()).unwrap();
        assert!(log.push(record).is_err());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn for_account_returns_sent_and_received_in_order() {
        let log = TransferLog::new();
        let a = AccountId::new();
        let b = AccountId::new();
        let c = AccountId::new();
        let first = transfer(a, b);
        let second = transfer(c, a);
        let unrelated = transfer(b, c);
        log.push(first.clone()).unwrap();
        log.push(second.clone()).unwrap();
        log.push(unrelated).unwrap();

        let history: Vec<_> = log.for_account(a).iter().map(|t| t.id).collect();
        assert_eq!(history, vec![first.id, second.id]);
    }

    #[test]
    fn purge_removes_only_referencing_records() {
        let log = TransferLog::new();
        let a = AccountId::new();
        let b = AccountId::new();
        let c = AccountId::new();
        log.push(transfer(a, b)).unwrap();
        log.push(transfer(b, a)).unwrap();
        log.push(transfer(b, c)).unwrap();

        assert_eq!(log.purge_account(a), 2);
        assert_eq!(log.len(), 1);
        assert!(log.for_account(a).is_empty());
    }
}
