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

//! Transfer engine.
//!
//! The [`Engine`] moves funds between accounts held in a [`LedgerStore`] that
//! only guarantees single-row atomicity. Correctness comes from two layers:
//!
//! - **Ordered locking**: every mutation holds a [`LockScope`] over all the
//!   accounts it touches, acquired in ascending account-ID order with a
//!   bounded wait.
//! - **Compare-and-swap**: every balance write is conditional on the balance
//!   read just before it, retried with exponential backoff on conflict.
//!
//! # Transfer Steps
//!
//! 1. Validate the amount, resolve sender and recipient, reject self-transfers.
//! 2. Lock both accounts; re-read the sender and re-check funds.
//! 3. Debit the sender, then credit the recipient.
//! 4. Record the [`Transfer`].
//! 5. Link the recipient as a beneficiary of the sender (best-effort).
//! 6. Release the locks.
//!
//! A failure after step 3 began is either compensated (credit failed, debit
//! reversed) or reported as [`TransferError::TransferRecordingFailed`] for
//! manual reconciliation. Every other error leaves the ledger untouched.

use crate::account::Account;
use crate::base::{AccountId, AccountNumber, UserId};
use crate::beneficiary::BeneficiaryIndex;
use crate::config::EngineConfig;
use crate::directory::AccountDirectory;
use crate::error::{AccountError, Reconciliation, StoreError, TransferError};
use crate::lock::{AccountLocks, LockScope};
use crate::money::Amount;
use crate::retry::{Attempt, RetryPolicy};
use crate::session::Caller;
use crate::store::{CasOutcome, InMemoryLedger, LedgerStore};
use crate::transfer::{Originator, Transfer};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Funds-movement engine over a [`LedgerStore`].
///
/// # Invariants
///
/// - Transfers conserve the sum of all balances; admin credits raise it by
///   exactly the credited amount.
/// - No balance is ever written below zero.
/// - Two operations touching a common account never interleave their
///   read-check-write sequences.
pub struct Engine<S = Arc<InMemoryLedger>> {
    store: S,
    directory: AccountDirectory<S>,
    beneficiaries: BeneficiaryIndex<S>,
    locks: AccountLocks,
    config: EngineConfig,
    retry: RetryPolicy,
}

impl Engine {
    /// Creates an engine over a fresh in-memory ledger with default limits.
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryLedger::new()), EngineConfig::default())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: LedgerStore + Clone> Engine<S> {
    pub fn with_store(store: S, config: EngineConfig) -> Self {
        Self {
            directory: AccountDirectory::new(store.clone()),
            beneficiaries: BeneficiaryIndex::new(store.clone()),
            store,
            locks: AccountLocks::new(),
            retry: config.retry_policy(),
            config,
        }
    }
}

impl<S: LedgerStore> Engine<S> {
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn directory(&self) -> &AccountDirectory<S> {
        &self.directory
    }

    pub fn beneficiaries(&self) -> &BeneficiaryIndex<S> {
        &self.beneficiaries
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Moves `amount` from the account of `sender` to the account numbered
    /// `recipient`.
    ///
    /// # Errors
    ///
    /// - [`TransferError::InvalidAmount`] - amount is malformed, not positive, or
    ///   would push the receiving balance out of range.
    /// - [`TransferError::SenderNotFound`] - `sender` has no account.
    /// - [`TransferError::RecipientNotFound`] - no account has that number.
    /// - [`TransferError::SelfTransferNotAllowed`] - sender and recipient coincide.
    /// - [`TransferError::InsufficientFunds`] - sender balance is below `amount`.
    /// - [`TransferError::Timeout`] - account locks were not acquired in time.
    /// - [`TransferError::ConcurrentModification`] - balance kept changing underneath.
    /// - [`TransferError::TransferRecordingFailed`] - balances moved but could not
    ///   be recorded or restored; needs manual reconciliation.
    pub fn transfer(
        &self,
        sender: UserId,
        recipient: &str,
        amount: &str,
        note: Option<&str>,
    ) -> Result<Transfer, TransferError> {
        let result = self.try_transfer(sender, recipient, amount, note);
        if let Err(e) = &result {
            if !matches!(e, TransferError::TransferRecordingFailed(_)) {
                warn!(sender = %sender, recipient, amount, reason = %e, "transfer rejected");
            }
        }
        result
    }

    fn try_transfer(
        &self,
        sender: UserId,
        recipient: &str,
        amount: &str,
        note: Option<&str>,
    ) -> Result<Transfer, TransferError> {
        let amount = Amount::parse(amount)?;
        let from = self
            .directory
            .lookup_by_owner(sender)?
            .ok_or(TransferError::SenderNotFound)?;
        let number = AccountNumber::parse(recipient).ok_or(TransferError::RecipientNotFound)?;
        let to = self
            .directory
            .lookup_by_number(&number)?
            .ok_or(TransferError::RecipientNotFound)?;
        if from.id() == to.id() {
            return Err(TransferError::SelfTransferNotAllowed);
        }
        // Early rejection on possibly stale snapshots; re-checked under lock.
        from.debited(amount)?;
        to.credited(amount)?;

        let scope = self
            .locks
            .acquire(&[from.id(), to.id()], self.config.lock_timeout())?;

        self.update_balance(&scope, from.id(), TransferError::SenderNotFound, |account| {
            account.debited(amount)
        })?;

        if let Err(e) = self.update_balance(&scope, to.id(), TransferError::RecipientNotFound, |account| {
            account.credited(amount)
        }) {
            return Err(self.reverse_debit(&scope, &from, &to, amount, e));
        }

        let transfer = Transfer::new(
            Originator::Account(from.id()),
            to.id(),
            amount,
            normalize_note(note),
        );
        if let Err(e) = self.store.insert_transfer(&transfer) {
            return Err(recording_failed(
                Reconciliation {
                    originator: transfer.originator,
                    recipient: to.id(),
                    amount,
                    debited: true,
                    credited: true,
                },
                &e,
            ));
        }

        if let Err(e) = self.beneficiaries.ensure_link(from.owner(), to.owner()) {
            warn!(
                owner = %from.owner(),
                beneficiary = %to.owner(),
                reason = %e,
                "beneficiary link not recorded"
            );
        }
        drop(scope);

        info!(
            transfer = %transfer.id,
            sender = %from.number(),
            recipient = %to.number(),
            amount = %amount,
            "transfer applied"
        );
        Ok(transfer)
    }

    /// Issues `amount` of new funds into `target`. Admin only.
    ///
    /// The recorded [`Transfer`] carries [`Originator::Issuance`] naming the
    /// admin, so injected money stays traceable. No beneficiary link is made.
    ///
    /// # Errors
    ///
    /// - [`TransferError::Unauthorized`] - caller is not an admin.
    /// - [`TransferError::InvalidAmount`] - amount is malformed, not positive, or
    ///   would push the receiving balance out of range.
    /// - [`TransferError::AccountNotFound`] - `target` does not exist.
    /// - [`TransferError::Timeout`] / [`TransferError::ConcurrentModification`].
    /// - [`TransferError::TransferRecordingFailed`] - credited but not recorded.
    pub fn credit_account(
        &self,
        caller: &Caller,
        target: AccountId,
        amount: &str,
        memo: Option<&str>,
    ) -> Result<Transfer, TransferError> {
        let result = self.try_credit(caller, target, amount, memo);
        if let Err(e) = &result {
            if !matches!(e, TransferError::TransferRecordingFailed(_)) {
                warn!(admin = %caller.user_id, account = %target, amount, reason = %e, "credit rejected");
            }
        }
        result
    }

    fn try_credit(
        &self,
        caller: &Caller,
        target: AccountId,
        amount: &str,
        memo: Option<&str>,
    ) -> Result<Transfer, TransferError> {
        if !caller.is_admin() {
            return Err(TransferError::Unauthorized);
        }
        let amount = Amount::parse(amount)?;
        let account = self
            .directory
            .lookup(target)?
            .ok_or(TransferError::AccountNotFound)?;
        account.credited(amount)?;

        let scope = self
            .locks
            .acquire(&[account.id()], self.config.lock_timeout())?;
        self.update_balance(&scope, account.id(), TransferError::AccountNotFound, |account| {
            account.credited(amount)
        })?;

        let originator = Originator::Issuance {
            admin: caller.user_id,
        };
        let transfer = Transfer::new(originator, account.id(), amount, normalize_note(memo));
        if let Err(e) = self.store.insert_transfer(&transfer) {
            return Err(recording_failed(
                Reconciliation {
                    originator,
                    recipient: account.id(),
                    amount,
                    debited: false,
                    credited: true,
                },
                &e,
            ));
        }
        drop(scope);

        info!(
            transfer = %transfer.id,
            admin = %caller.user_id,
            account = %account.number(),
            amount = %amount,
            "account credited"
        );
        Ok(transfer)
    }

    /// Deletes an account and everything referencing it.
    ///
    /// Holds the account lock so no transfer is mid-flight on it.
    pub fn close_account(&self, account: AccountId) -> Result<(), AccountError> {
        let scope = self.locks.acquire(&[account], self.config.lock_timeout())?;
        self.store.delete_account(account)?;
        drop(scope);
        self.locks.forget(account);
        info!(account = %account, "account closed");
        Ok(())
    }

    /// Transfers sent or received by `account`, oldest first.
    pub fn history(&self, account: AccountId) -> Result<Vec<Transfer>, StoreError> {
        self.store.transfers_for(account)
    }

    /// Applies a read-compute-CAS update to one locked account, retrying on conflict.
    ///
    /// `missing` is returned if the account no longer exists.
    fn update_balance<F>(
        &self,
        scope: &LockScope,
        id: AccountId,
        missing: TransferError,
        next: F,
    ) -> Result<(), TransferError>
    where
        F: Fn(&Account) -> Result<Decimal, TransferError>,
    {
        debug_assert!(scope.covers(id), "balance update outside lock scope");
        let applied = self.retry.run(|| -> Result<Attempt<()>, TransferError> {
            let current = self
                .store
                .read_account(id)?
                .ok_or_else(|| missing.clone())?;
            let balance = next(&current)?;
            match self
                .store
                .conditional_update_balance(id, current.balance(), balance)
            {
                Ok(CasOutcome::Applied) => Ok(Attempt::Done(())),
                Ok(CasOutcome::Conflict) => {
                    debug!(account = %id, expected = %current.balance(), "balance changed since read");
                    Ok(Attempt::Conflict)
                }
                Err(StoreError::AccountNotFound) => Err(missing.clone()),
                Err(e) => Err(e.into()),
            }
        })?;
        applied.ok_or(TransferError::ConcurrentModification)
    }

    /// Restores a sender debit after the matching credit failed.
    ///
    /// Returns the error to report: the credit failure if the reversal
    /// succeeded, otherwise a reconciliation error.
    fn reverse_debit(
        &self,
        scope: &LockScope,
        from: &Account,
        to: &Account,
        amount: Amount,
        cause: TransferError,
    ) -> TransferError {
        match self.update_balance(scope, from.id(), TransferError::SenderNotFound, |account| {
            account.credited(amount)
        }) {
            Ok(()) => {
                warn!(
                    sender = %from.number(),
                    recipient = %to.number(),
                    amount = %amount,
                    reason = %cause,
                    "credit failed, debit reversed"
                );
                cause
            }
            Err(e) => recording_failed(
                Reconciliation {
                    originator: Originator::Account(from.id()),
                    recipient: to.id(),
                    amount,
                    debited: true,
                    credited: false,
                },
                &e,
            ),
        }
    }
}

/// Reports a ledger/balance mismatch on the alerting path.
fn recording_failed(reconciliation: Reconciliation, cause: &dyn std::fmt::Display) -> TransferError {
    error!(
        originator = %reconciliation.originator,
        recipient = %reconciliation.recipient,
        amount = %reconciliation.amount,
        debited = reconciliation.debited,
        credited = reconciliation.credited,
        reason = %cause,
        "ledger needs manual reconciliation"
    );
    TransferError::TransferRecordingFailed(reconciliation)
}

fn normalize_note(note: Option<&str>) -> Option<String> {
    note.map(str::trim)
        .filter(|note| !note.is_empty())
        .map(str::to_string)
}
