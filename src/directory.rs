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

//! Account directory.
//!
//! Resolves external account numbers and owners to account snapshots, and
//! opens new accounts with a unique random account number.

use crate::account::Account;
use crate::base::{AccountId, AccountNumber, UserId};
use crate::error::{AccountError, StoreError};
use crate::store::LedgerStore;
use rand::Rng;
use tracing::{debug, info};

/// Read access to accounts plus account opening.
#[derive(Debug, Clone)]
pub struct AccountDirectory<S> {
    store: S,
}

impl<S: LedgerStore> AccountDirectory<S> {
    /// Number-collision retries before giving up on opening an account.
    const MAX_NUMBER_ATTEMPTS: usize = 8;

    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn lookup(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.store.read_account(id)
    }

    pub fn lookup_by_number(&self, number: &AccountNumber) -> Result<Option<Account>, StoreError> {
        self.store.find_by_number(number)
    }

    pub fn lookup_by_owner(&self, owner: UserId) -> Result<Option<Account>, StoreError> {
        self.store.find_by_owner(owner)
    }

    /// All accounts ordered by account number.
    pub fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.store.accounts()
    }

    /// Opens the single account of `owner` with a zero balance.
    ///
    /// # Errors
    ///
    /// - [`AccountError::OwnerAlreadyHasAccount`] - `owner` already has an account.
    /// - [`AccountError::NumberSpaceExhausted`] - every generated number collided.
    pub fn open_account(&self, owner: UserId) -> Result<Account, AccountError> {
        self.open_account_with(owner, &mut rand::thread_rng())
    }

    fn open_account_with<R: Rng>(&self, owner: UserId, rng: &mut R) -> Result<Account, AccountError> {
        if self.store.find_by_owner(owner)?.is_some() {
            return Err(AccountError::OwnerAlreadyHasAccount);
        }

        for _ in 0..Self::MAX_NUMBER_ATTEMPTS {
            let value = rng.gen_range(AccountNumber::MIN..=AccountNumber::MAX);
            let Some(number) = AccountNumber::from_value(value) else {
                continue;
            };
            let account = Account::new(owner, number);
            match self.store.insert_account(account.clone()) {
                Ok(()) => {
                    info!(owner = %owner, account = %account.number(), "account opened");
                    return Ok(account);
                }
                Err(StoreError::DuplicateAccountNumber) => {
                    debug!(account = %account.number(), "account number collision");
                }
                Err(StoreError::DuplicateOwner) => {
                    return Err(AccountError::OwnerAlreadyHasAccount);
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(AccountError::NumberSpaceExhausted)
    }
}
