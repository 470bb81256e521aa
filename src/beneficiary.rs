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

//! Beneficiary index.
//!
//! Remembers who a user has sent money to before. The index is derived from
//! transfers and maintained best-effort, so losing a link never affects
//! balances.

use crate::base::UserId;
use crate::error::StoreError;
use crate::store::LedgerStore;
use crate::transfer::BeneficiaryLink;

#[derive(Debug, Clone)]
pub struct BeneficiaryIndex<S> {
    store: S,
}

impl<S: LedgerStore> BeneficiaryIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Records that `owner` has sent to `beneficiary`, if not already known.
    ///
    /// Returns `true` if a new link was created. Racing inserts of the same
    /// pair both succeed; only one row is kept.
    pub fn ensure_link(&self, owner: UserId, beneficiary: UserId) -> Result<bool, StoreError> {
        if owner == beneficiary {
            return Ok(false);
        }
        self.store
            .insert_beneficiary_link_if_absent(BeneficiaryLink::new(owner, beneficiary))
    }

    /// Links created by `owner`, oldest first.
    pub fn list(&self, owner: UserId) -> Result<Vec<BeneficiaryLink>, StoreError> {
        self.store.beneficiary_links(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLedger;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn ensure_link_is_idempotent() {
        let index = BeneficiaryIndex::new(InMemoryLedger::new());
        assert!(index.ensure_link(UserId(1), UserId(2)).unwrap());
        assert!(!index.ensure_link(UserId(1), UserId(2)).unwrap());
        assert_eq!(index.list(UserId(1)).unwrap().len(), 1);
    }

    #[test]
    fn links_are_directional() {
        let index = BeneficiaryIndex::new(InMemoryLedger::new());
        index.ensure_link(UserId(1), UserId(2)).unwrap();
        assert!(index.list(UserId(2)).unwrap().is_empty());
        assert!(index.ensure_link(UserId(2), UserId(1)).unwrap());
    }

    #[test]
    fn self_link_is_ignored() {
        let index = BeneficiaryIndex::new(InMemoryLedger::new());
        assert!(!index.ensure_link(UserId(1), UserId(1)).unwrap());
        assert!(index.list(UserId(1)).unwrap().is_empty());
    }

    #[test]
    fn racing_inserts_keep_one_link() {
        let index = Arc::new(BeneficiaryIndex::new(Arc::new(InMemoryLedger::new())));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let index = Arc::clone(&index);
                thread::spawn(move || index.ensure_link(UserId(1), UserId(2)).unwrap())
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|created| *created)
            .count();
        assert_eq!(created, 1);
        assert_eq!(index.list(UserId(1)).unwrap().len(), 1);
    }
}
