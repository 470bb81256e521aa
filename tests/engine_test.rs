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

//! Engine public API integration tests.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use trustfund::{
    Account, AccountId, AccountNumber, BeneficiaryLink, Caller, CasOutcome, Engine, EngineConfig,
    InMemoryLedger, LedgerStore, Originator, StoreError, Transfer, TransferError, UserId,
};

const ADMIN: UserId = UserId(1000);

fn admin() -> Caller {
    Caller::admin(ADMIN)
}

/// Opens an account for `owner` and funds it through an admin credit.
fn open_with_balance<S: LedgerStore>(engine: &Engine<S>, owner: u64, balance: &str) -> Account {
    let account = engine.directory().open_account(UserId(owner)).unwrap();
    if balance != "0" {
        engine
            .credit_account(&admin(), account.id(), balance, None)
            .unwrap();
    }
    account
}

fn balance_of<S: LedgerStore>(engine: &Engine<S>, account: &Account) -> Decimal {
    engine
        .directory()
        .lookup(account.id())
        .unwrap()
        .unwrap()
        .balance()
}

fn sent_transfers<S: LedgerStore>(engine: &Engine<S>, account: &Account) -> Vec<Transfer> {
    engine
        .history(account.id())
        .unwrap()
        .into_iter()
        .filter(|t| t.originator == Originator::Account(account.id()))
        .collect()
}

// === Scenarios ===

#[test]
fn transfer_scenario_rent() {
    let engine = Engine::new();
    let a = open_with_balance(&engine, 1, "50.00");
    let b = open_with_balance(&engine, 2, "10.00");

    let transfer = engine
        .transfer(UserId(1), b.number().as_str(), "20.00", Some("rent"))
        .unwrap();

    assert_eq!(balance_of(&engine, &a), dec!(30.00));
    assert_eq!(balance_of(&engine, &b), dec!(30.00));
    assert_eq!(transfer.amount.value(), dec!(20.00));
    assert_eq!(transfer.recipient, b.id());
    assert_eq!(sent_transfers(&engine, &a), vec![transfer]);

    let links = engine.beneficiaries().list(UserId(1)).unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].beneficiary, UserId(2));
}

#[test]
fn insufficient_funds_changes_nothing() {
    let engine = Engine::new();
    let a = open_with_balance(&engine, 1, "5.00");
    let b = open_with_balance(&engine, 2, "0");

    let result = engine.transfer(UserId(1), b.number().as_str(), "20.00", None);

    assert_eq!(result, Err(TransferError::InsufficientFunds));
    assert_eq!(balance_of(&engine, &a), dec!(5.00));
    assert_eq!(balance_of(&engine, &b), Decimal::ZERO);
    assert!(sent_transfers(&engine, &a).is_empty());
    assert!(engine.beneficiaries().list(UserId(1)).unwrap().is_empty());
}

#[test]
fn admin_credit_scenario_bonus() {
    let engine = Engine::new();
    let c = open_with_balance(&engine, 3, "7.00");
    let total_before = engine.store().total_balance().unwrap();

    let transfer = engine
        .credit_account(&admin(), c.id(), "100.00", Some("bonus"))
        .unwrap();

    assert_eq!(balance_of(&engine, &c), dec!(107.00));
    assert_eq!(
        engine.store().total_balance().unwrap() - total_before,
        dec!(100.00)
    );
    assert_eq!(transfer.originator, Originator::Issuance { admin: ADMIN });
    assert_eq!(transfer.note.as_deref(), Some("bonus"));
    assert_eq!(engine.store().beneficiary_count(), 0);
}

// === Validation ===

#[test]
fn invalid_amounts_are_rejected() {
    let engine = Engine::new();
    open_with_balance(&engine, 1, "50");
    let b = open_with_balance(&engine, 2, "0");

    for amount in ["0", "0.00", "-5", "abc", "", "1.001"] {
        assert_eq!(
            engine.transfer(UserId(1), b.number().as_str(), amount, None),
            Err(TransferError::InvalidAmount),
            "amount {amount:?}"
        );
    }
    assert_eq!(engine.store().transfer_count(), 1);
}

#[test]
fn sender_without_account_is_rejected() {
    let engine = Engine::new();
    let b = open_with_balance(&engine, 2, "0");
    assert_eq!(
        engine.transfer(UserId(9), b.number().as_str(), "1", None),
        Err(TransferError::SenderNotFound)
    );
}

#[test]
fn unknown_recipient_is_rejected() {
    let engine = Engine::new();
    let a = open_with_balance(&engine, 1, "50");
    let unused = if a.number().as_str() == "1234567890" {
        "1234567891"
    } else {
        "1234567890"
    };

    assert_eq!(
        engine.transfer(UserId(1), unused, "1", None),
        Err(TransferError::RecipientNotFound)
    );
    assert_eq!(
        engine.transfer(UserId(1), "not-a-number", "1", None),
        Err(TransferError::RecipientNotFound)
    );
    assert_eq!(balance_of(&engine, &a), dec!(50));
}

#[test]
fn self_transfer_is_rejected_regardless_of_balance() {
    let engine = Engine::new();
    let rich = open_with_balance(&engine, 1, "500");
    let poor = open_with_balance(&engine, 2, "0");

    assert_eq!(
        engine.transfer(UserId(1), rich.number().as_str(), "10", None),
        Err(TransferError::SelfTransferNotAllowed)
    );
    assert_eq!(
        engine.transfer(UserId(2), poor.number().as_str(), "10", None),
        Err(TransferError::SelfTransferNotAllowed)
    );
    assert_eq!(balance_of(&engine, &rich), dec!(500));
}

#[test]
fn non_admin_cannot_credit() {
    let engine = Engine::new();
    let a = open_with_balance(&engine, 1, "0");
    assert_eq!(
        engine.credit_account(&Caller::user(UserId(1)), a.id(), "100", None),
        Err(TransferError::Unauthorized)
    );
    assert_eq!(balance_of(&engine, &a), Decimal::ZERO);
}

#[test]
fn transfer_into_full_account_leaves_ledger_unchanged() {
    let engine = Engine::new();
    let a = open_with_balance(&engine, 1, "10");
    let b = open_with_balance(&engine, 2, &Decimal::MAX.to_string());

    assert_eq!(
        engine.transfer(UserId(1), b.number().as_str(), "5", None),
        Err(TransferError::InvalidAmount)
    );
    assert_eq!(balance_of(&engine, &a), dec!(10));
    assert_eq!(balance_of(&engine, &b), Decimal::MAX);
    assert!(sent_transfers(&engine, &a).is_empty());
    assert!(engine.beneficiaries().list(UserId(1)).unwrap().is_empty());
}

#[test]
fn credit_into_full_account_is_rejected() {
    let engine = Engine::new();
    let b = open_with_balance(&engine, 2, &Decimal::MAX.to_string());
    let recorded = engine.store().transfer_count();

    assert_eq!(
        engine.credit_account(&admin(), b.id(), "1", None),
        Err(TransferError::InvalidAmount)
    );
    assert_eq!(balance_of(&engine, &b), Decimal::MAX);
    assert_eq!(engine.store().transfer_count(), recorded);
}

// === Beneficiaries ===

#[test]
fn repeated_transfers_link_beneficiary_once() {
    let engine = Engine::new();
    open_with_balance(&engine, 1, "50");
    let b = open_with_balance(&engine, 2, "0");

    engine
        .transfer(UserId(1), b.number().as_str(), "5", None)
        .unwrap();
    engine
        .transfer(UserId(1), b.number().as_str(), "5", None)
        .unwrap();

    assert_eq!(engine.beneficiaries().list(UserId(1)).unwrap().len(), 1);
    assert!(engine.beneficiaries().list(UserId(2)).unwrap().is_empty());
}

// === Conservation ===

#[test]
fn transfers_conserve_total_balance() {
    let engine = Engine::new();
    let accounts: Vec<_> = (1..=4)
        .map(|owner| open_with_balance(&engine, owner, "100"))
        .collect();
    let total = engine.store().total_balance().unwrap();

    let moves = [(1, 2, "30"), (2, 3, "55.5"), (3, 1, "0.25"), (4, 1, "100"), (1, 4, "12")];
    for (from, to, amount) in moves {
        let recipient = &accounts[to - 1];
        engine
            .transfer(UserId(from as u64), recipient.number().as_str(), amount, None)
            .unwrap();
    }

    assert_eq!(engine.store().total_balance(), Some(total));
    assert!(accounts.iter().all(|a| balance_of(&engine, a) >= Decimal::ZERO));
}

// === Fault Injection ===

/// Wraps [`InMemoryLedger`] and injects failures into selected calls.
#[derive(Default)]
struct FaultyLedger {
    inner: InMemoryLedger,
    fail_transfer_insert: AtomicBool,
    fail_link_insert: AtomicBool,
    /// Accounts whose conditional updates always conflict.
    contended: parking_lot::Mutex<HashSet<AccountId>>,
    /// Number of upcoming conditional updates that conflict.
    transient_conflicts: AtomicU32,
    /// After this many applied updates, every further update conflicts.
    applied_budget: parking_lot::Mutex<Option<u32>>,
    /// Account whose balance jumps to `Decimal::MAX` right after it is
    /// looked up by number, as if credited concurrently.
    fill_after_lookup: parking_lot::Mutex<Option<AccountId>>,
}

impl FaultyLedger {
    fn contend(&self, account: AccountId) {
        self.contended.lock().insert(account);
    }
}

impl LedgerStore for FaultyLedger {
    fn read_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.inner.read_account(id)
    }

    fn find_by_number(&self, number: &AccountNumber) -> Result<Option<Account>, StoreError> {
        let found = self.inner.find_by_number(number)?;
        if let Some(account) = &found {
            if *self.fill_after_lookup.lock() == Some(account.id()) {
                self.inner
                    .conditional_update_balance(account.id(), account.balance(), Decimal::MAX)?;
            }
        }
        Ok(found)
    }

    fn find_by_owner(&self, owner: UserId) -> Result<Option<Account>, StoreError> {
        self.inner.find_by_owner(owner)
    }

    fn insert_account(&self, account: Account) -> Result<(), StoreError> {
        self.inner.insert_account(account)
    }

    fn conditional_update_balance(
        &self,
        id: AccountId,
        expected: Decimal,
        new: Decimal,
    ) -> Result<CasOutcome, StoreError> {
        if self.contended.lock().contains(&id) {
            return Ok(CasOutcome::Conflict);
        }
        if self
            .transient_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(CasOutcome::Conflict);
        }
        let mut budget = self.applied_budget.lock();
        match budget.as_mut() {
            Some(0) => return Ok(CasOutcome::Conflict),
            Some(n) => *n -= 1,
            None => {}
        }
        self.inner.conditional_update_balance(id, expected, new)
    }

    fn insert_transfer(&self, transfer: &Transfer) -> Result<(), StoreError> {
        if self.fail_transfer_insert.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("transfers table offline".into()));
        }
        self.inner.insert_transfer(transfer)
    }

    fn insert_beneficiary_link_if_absent(&self, link: BeneficiaryLink) -> Result<bool, StoreError> {
        if self.fail_link_insert.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("beneficiaries table offline".into()));
        }
        self.inner.insert_beneficiary_link_if_absent(link)
    }

    fn beneficiary_links(&self, owner: UserId) -> Result<Vec<BeneficiaryLink>, StoreError> {
        self.inner.beneficiary_links(owner)
    }

    fn transfers_for(&self, account: AccountId) -> Result<Vec<Transfer>, StoreError> {
        self.inner.transfers_for(account)
    }

    fn delete_account(&self, id: AccountId) -> Result<(), StoreError> {
        self.inner.delete_account(id)
    }

    fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.inner.accounts()
    }
}

fn faulty_engine() -> Engine<Arc<FaultyLedger>> {
    let config = EngineConfig {
        base_backoff_ms: 1,
        ..EngineConfig::default()
    };
    Engine::with_store(Arc::new(FaultyLedger::default()), config)
}

#[test]
fn recording_failure_reports_reconciliation() {
    let engine = faulty_engine();
    let a = open_with_balance(&engine, 1, "50");
    let b = open_with_balance(&engine, 2, "10");
    engine.store().fail_transfer_insert.store(true, Ordering::SeqCst);

    let result = engine.transfer(UserId(1), b.number().as_str(), "20", None);

    let Err(TransferError::TransferRecordingFailed(reconciliation)) = result else {
        panic!("expected recording failure, got {result:?}");
    };
    assert!(reconciliation.debited);
    assert!(reconciliation.credited);
    assert_eq!(reconciliation.originator, Originator::Account(a.id()));
    assert_eq!(reconciliation.recipient, b.id());
    // Balances moved; only the ledger entry is missing.
    assert_eq!(balance_of(&engine, &a), dec!(30));
    assert_eq!(balance_of(&engine, &b), dec!(30));
    assert!(sent_transfers(&engine, &a).is_empty());
}

#[test]
fn persistent_sender_conflict_exhausts_retries() {
    let engine = faulty_engine();
    let a = open_with_balance(&engine, 1, "50");
    let b = open_with_balance(&engine, 2, "10");
    engine.store().contend(a.id());

    assert_eq!(
        engine.transfer(UserId(1), b.number().as_str(), "20", None),
        Err(TransferError::ConcurrentModification)
    );
    assert_eq!(balance_of(&engine, &a), dec!(50));
    assert_eq!(balance_of(&engine, &b), dec!(10));
}

#[test]
fn recipient_conflict_reverses_debit() {
    let engine = faulty_engine();
    let a = open_with_balance(&engine, 1, "50");
    let b = open_with_balance(&engine, 2, "10");
    engine.store().contend(b.id());

    assert_eq!(
        engine.transfer(UserId(1), b.number().as_str(), "20", None),
        Err(TransferError::ConcurrentModification)
    );
    assert_eq!(balance_of(&engine, &a), dec!(50));
    assert_eq!(balance_of(&engine, &b), dec!(10));
    assert!(sent_transfers(&engine, &a).is_empty());
}

#[test]
fn failed_reversal_reports_reconciliation() {
    let engine = faulty_engine();
    let a = open_with_balance(&engine, 1, "50");
    let b = open_with_balance(&engine, 2, "10");
    // Debit applies, then the credit and its reversal both conflict.
    *engine.store().applied_budget.lock() = Some(1);

    let result = engine.transfer(UserId(1), b.number().as_str(), "20", None);

    let Err(TransferError::TransferRecordingFailed(reconciliation)) = result else {
        panic!("expected recording failure, got {result:?}");
    };
    assert!(reconciliation.debited);
    assert!(!reconciliation.credited);
    assert_eq!(balance_of(&engine, &a), dec!(30));
    assert_eq!(balance_of(&engine, &b), dec!(10));
}

#[test]
fn transient_conflicts_are_retried() {
    let engine = faulty_engine();
    let a = open_with_balance(&engine, 1, "50");
    let b = open_with_balance(&engine, 2, "10");
    engine.store().transient_conflicts.store(2, Ordering::SeqCst);

    engine
        .transfer(UserId(1), b.number().as_str(), "20", None)
        .unwrap();

    assert_eq!(balance_of(&engine, &a), dec!(30));
    assert_eq!(balance_of(&engine, &b), dec!(30));
}

#[test]
fn beneficiary_failure_does_not_fail_transfer() {
    let engine = faulty_engine();
    let a = open_with_balance(&engine, 1, "50");
    let b = open_with_balance(&engine, 2, "0");
    engine.store().fail_link_insert.store(true, Ordering::SeqCst);

    engine
        .transfer(UserId(1), b.number().as_str(), "20", None)
        .unwrap();

    assert_eq!(balance_of(&engine, &a), dec!(30));
    assert_eq!(sent_transfers(&engine, &a).len(), 1);
    assert!(engine.beneficiaries().list(UserId(1)).unwrap().is_empty());
}

#[test]
fn credit_recording_failure_reports_reconciliation() {
    let engine = faulty_engine();
    let c = open_with_balance(&engine, 3, "0");
    engine.store().fail_transfer_insert.store(true, Ordering::SeqCst);

    let result = engine.credit_account(&admin(), c.id(), "100", Some("bonus"));

    let Err(TransferError::TransferRecordingFailed(reconciliation)) = result else {
        panic!("expected recording failure, got {result:?}");
    };
    assert!(!reconciliation.debited);
    assert!(reconciliation.credited);
    assert_eq!(reconciliation.originator, Originator::Issuance { admin: ADMIN });
    assert_eq!(balance_of(&engine, &c), dec!(100));
}

#[test]
fn contended_credit_exhausts_retries() {
    let engine = faulty_engine();
    let c = open_with_balance(&engine, 3, "0");
    engine.store().contend(c.id());

    assert_eq!(
        engine.credit_account(&admin(), c.id(), "100", None),
        Err(TransferError::ConcurrentModification)
    );
    assert_eq!(balance_of(&engine, &c), Decimal::ZERO);
}

#[test]
fn recipient_overflow_under_lock_reverses_debit() {
    let engine = faulty_engine();
    let a = open_with_balance(&engine, 1, "50");
    let b = open_with_balance(&engine, 2, "10");
    *engine.store().fill_after_lookup.lock() = Some(b.id());

    assert_eq!(
        engine.transfer(UserId(1), b.number().as_str(), "20", None),
        Err(TransferError::InvalidAmount)
    );
    assert_eq!(balance_of(&engine, &a), dec!(50));
    assert_eq!(balance_of(&engine, &b), Decimal::MAX);
    assert!(sent_transfers(&engine, &a).is_empty());
}
