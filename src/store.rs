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

//! Ledger persistence.
//!
//! [`LedgerStore`] is the contract the engine needs from durable storage:
//! point reads, single-row compare-and-swap on balances, and inserts. It
//! deliberately offers no multi-row transaction; the engine layers ordered
//! locking and CAS retries on top to keep transfers correct.
//!
//! [`InMemoryLedger`] is the bundled implementation backed by [`DashMap`].

use crate::account::Account;
use crate::base::{AccountId, AccountNumber, UserId};
use crate::error::StoreError;
use crate::transfer::{BeneficiaryLink, Transfer};
use crate::transfer_log::TransferLog;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Result of a conditional balance update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Stored balance matched the expected value and was replaced.
    Applied,
    /// Stored balance differed from the expected value; nothing was written.
    Conflict,
}

/// Durable storage for accounts, transfers and beneficiary links.
///
/// Every method is individually atomic. Nothing spans multiple calls.
pub trait LedgerStore: Send + Sync {
    fn read_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    fn find_by_number(&self, number: &AccountNumber) -> Result<Option<Account>, StoreError>;

    fn find_by_owner(&self, owner: UserId) -> Result<Option<Account>, StoreError>;

    /// Inserts a new account.
    ///
    /// Fails with [`StoreError::DuplicateAccountNumber`] or
    /// [`StoreError::DuplicateOwner`] on a uniqueness violation.
    fn insert_account(&self, account: Account) -> Result<(), StoreError>;

    /// Sets the balance to `new` only if it currently equals `expected`.
    fn conditional_update_balance(
        &self,
        id: AccountId,
        expected: Decimal,
        new: Decimal,
    ) -> Result<CasOutcome, StoreError>;

    fn insert_transfer(&self, transfer: &Transfer) -> Result<(), StoreError>;

    /// Inserts the link unless the `(owner, beneficiary)` pair already exists.
    ///
    /// Returns whether a row was inserted. An existing pair is not an error.
    fn insert_beneficiary_link_if_absent(&self, link: BeneficiaryLink) -> Result<bool, StoreError>;

    fn beneficiary_links(&self, owner: UserId) -> Result<Vec<BeneficiaryLink>, StoreError>;

    /// Transfers sent or received by the account, oldest first.
    fn transfers_for(&self, account: AccountId) -> Result<Vec<Transfer>, StoreError>;

    /// Removes the account together with every transfer referencing it and
    /// every beneficiary link referencing its owner.
    fn delete_account(&self, id: AccountId) -> Result<(), StoreError>;

    fn accounts(&self) -> Result<Vec<Account>, StoreError>;
}

impl<S: LedgerStore + ?Sized> LedgerStore for Arc<S> {
    fn read_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        (**self).read_account(id)
    }

    fn find_by_number(&self, number: &AccountNumber) -> Result<Option<Account>, StoreError> {
        (**self).find_by_number(number)
    }

    fn find_by_owner(&self, owner: UserId) -> Result<Option<Account>, StoreError> {
        (**self).find_by_owner(owner)
    }

    fn insert_account(&self, account: Account) -> Result<(), StoreError> {
        (**self).insert_account(account)
    }

    fn conditional_update_balance(
        &self,
        id: AccountId,
        expected: Decimal,
        new: Decimal,
    ) -> Result<CasOutcome, StoreError> {
        (**self).conditional_update_balance(id, expected, new)
    }

    fn insert_transfer(&self, transfer: &Transfer) -> Result<(), StoreError> {
        (**self).insert_transfer(transfer)
    }

    fn insert_beneficiary_link_if_absent(&self, link: BeneficiaryLink) -> Result<bool, StoreError> {
        (**self).insert_beneficiary_link_if_absent(link)
    }

    fn beneficiary_links(&self, owner: UserId) -> Result<Vec<BeneficiaryLink>, StoreError> {
        (**self).beneficiary_links(owner)
    }

    fn transfers_for(&self, account: AccountId) -> Result<Vec<Transfer>, StoreError> {
        (**self).transfers_for(account)
    }

    fn delete_account(&self, id: AccountId) -> Result<(), StoreError> {
        (**self).delete_account(id)
    }

    fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        (**self).accounts()
    }
}

/// In-process [`LedgerStore`].
///
/// Each map entry is guarded by its DashMap shard, which gives the
/// single-row atomicity the trait promises and nothing more.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    accounts: DashMap<AccountId, Account>,
    by_number: DashMap<AccountNumber, AccountId>,
    by_owner: DashMap<UserId, AccountId>,
    transfers: TransferLog,
    beneficiaries: DashMap<(UserId, UserId), BeneficiaryLink>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all balances, or `None` if it exceeds the decimal range.
    pub fn total_balance(&self) -> Option<Decimal> {
        self.accounts
            .iter()
            .try_fold(Decimal::ZERO, |total, entry| total.checked_add(entry.balance()))
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.len()
    }

    pub fn beneficiary_count(&self) -> usize {
        self.beneficiaries.len()
    }

    fn resolve(&self, id: Option<AccountId>) -> Option<Account> {
        id.and_then(|id| self.accounts.get(&id).map(|entry| entry.value().clone()))
    }
}

impl LedgerStore for InMemoryLedger {
    fn read_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.resolve(Some(id)))
    }

    fn find_by_number(&self, number: &AccountNumber) -> Result<Option<Account>, StoreError> {
        let id = self.by_number.get(number).map(|entry| *entry.value());
        Ok(self.resolve(id))
    }

    fn find_by_owner(&self, owner: UserId) -> Result<Option<Account>, StoreError> {
        let id = self.by_owner.get(&owner).map(|entry| *entry.value());
        Ok(self.resolve(id))
    }

    fn insert_account(&self, account: Account) -> Result<(), StoreError> {
        let id = account.id();
        match self.by_number.entry(account.number().clone()) {
            Entry::Occupied(_) => return Err(StoreError::DuplicateAccountNumber),
            Entry::Vacant(entry) => {
                entry.insert(id);
            }
        }
        match self.by_owner.entry(account.owner()) {
            Entry::Occupied(_) => {
                self.by_number.remove(account.number());
                return Err(StoreError::DuplicateOwner);
            }
            Entry::Vacant(entry) => {
                entry.insert(id);
            }
        }
        self.accounts.insert(id, account);
        Ok(())
    }

    fn conditional_update_balance(
        &self,
        id: AccountId,
        expected: Decimal,
        new: Decimal,
    ) -> Result<CasOutcome, StoreError> {
        if new < Decimal::ZERO {
            return Err(StoreError::Unavailable(format!(
                "refusing negative balance {new} for account {id}"
            )));
        }
        let mut account = self
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::AccountNotFound)?;
        if account.balance() != expected {
            return Ok(CasOutcome::Conflict);
        }
        account.set_balance(new);
        Ok(CasOutcome::Applied)
    }

    fn insert_transfer(&self, transfer: &Transfer) -> Result<(), StoreError> {
        self.transfers.push(transfer.clone())
    }

    fn insert_beneficiary_link_if_absent(&self, link: BeneficiaryLink) -> Result<bool, StoreError> {
        match self.beneficiaries.entry((link.owner, link.beneficiary)) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(link);
                Ok(true)
            }
        }
    }

    fn beneficiary_links(&self, owner: UserId) -> Result<Vec<BeneficiaryLink>, StoreError> {
        let mut links: Vec<_> = self
            .beneficiaries
            .iter()
            .filter(|entry| entry.owner == owner)
            .map(|entry| entry.value().clone())
            .collect();
        links.sort_by_key(|link| link.created_at);
        Ok(links)
    }

    fn transfers_for(&self, account: AccountId) -> Result<Vec<Transfer>, StoreError> {
        Ok(self
            .transfers
            .for_account(account)
            .into_iter()
            .map(|transfer| (*transfer).clone())
            .collect())
    }

    fn delete_account(&self, id: AccountId) -> Result<(), StoreError> {
        let (_, account) = self
            .accounts
            .remove(&id)
            .ok_or(StoreError::AccountNotFound)?;
        self.by_number.remove(account.number());
        self.by_owner.remove(&account.owner());
        self.transfers.purge_account(id);
        self.beneficiaries
            .retain(|_, link| !link.involves(account.owner()));
        Ok(())
    }

    fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        let mut accounts: Vec<_> = self
            .accounts
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        accounts.sort_by(|a, b| a.number().as_str().cmp(b.number().as_str()));
        Ok(accounts)
    }
}
