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

//! Account records.
//!
//! An [`Account`] is a point-in-time snapshot read from the
//! [`LedgerStore`](crate::LedgerStore). Balance changes are never applied to a
//! snapshot in place: the engine computes the next balance with
//! [`Account::debited`] or [`Account::credited`] and writes it back through a
//! conditional update keyed on [`Account::balance`].
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use trustfund::{Account, AccountNumber, Amount, UserId};
//!
//! let number = AccountNumber::parse("1234567890").unwrap();
//! let account = Account::new(UserId(1), number);
//! assert_eq!(account.balance(), dec!(0));
//! assert_eq!(account.credited(Amount::parse("5").unwrap()), Ok(dec!(5)));
//! ```

use crate::TransferError;
use crate::base::{AccountId, AccountNumber, UserId};
use crate::money::Amount;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Ledger account snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    id: AccountId,
    number: AccountNumber,
    owner: UserId,
    balance: Decimal,
}

impl Account {
    const DECIMAL_PRECISION: u32 = 2;

    /// Creates a fresh account with zero balance.
    pub fn new(owner: UserId, number: AccountNumber) -> Self {
        Self {
            id: AccountId::new(),
            number,
            owner,
            balance: Decimal::ZERO,
        }
    }

    /// Rebuilds a snapshot from stored fields.
    pub fn from_parts(id: AccountId, number: AccountNumber, owner: UserId, balance: Decimal) -> Self {
        debug_assert!(
            balance >= Decimal::ZERO,
            "Invariant violated: stored balance is negative: {balance}"
        );
        Self {
            id,
            number,
            owner,
            balance,
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn number(&self) -> &AccountNumber {
        &self.number
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub(crate) fn set_balance(&mut self, balance: Decimal) {
        debug_assert!(
            balance >= Decimal::ZERO,
            "Invariant violated: balance went negative: {balance}"
        );
        self.balance = balance;
    }

    /// Balance after removing `amount`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InsufficientFunds`] if the result would be negative.
    pub fn debited(&self, amount: Amount) -> Result<Decimal, TransferError> {
        if self.balance < amount.value() {
            return Err(TransferError::InsufficientFunds);
        }
        let next = self.balance - amount.value();
        debug_assert!(next >= Decimal::ZERO);
        Ok(next)
    }

    /// Balance after adding `amount`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidAmount`] if the result is not representable.
    pub fn credited(&self, amount: Amount) -> Result<Decimal, TransferError> {
        self.balance
            .checked_add(amount.value())
            .ok_or(TransferError::InvalidAmount)
    }
}

impl Serialize for Account {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Account", 3)?;
        state.serialize_field("owner", &self.owner)?;
        state.serialize_field("account", &self.number)?;
        state.serialize_field(
            "balance",
            &self.balance.round_dp(Account::DECIMAL_PRECISION),
        )?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn account_with_balance(balance: Decimal) -> Account {
        Account::from_parts(
            AccountId::new(),
            AccountNumber::parse("1234567890").unwrap(),
            UserId(1),
            balance,
        )
    }

    fn amount(raw: &str) -> Amount {
        Amount::parse(raw).unwrap()
    }

    #[test]
    fn new_account_starts_empty() {
        let account = Account::new(UserId(9), AccountNumber::parse("1111111111").unwrap());
        assert_eq!(account.balance(), Decimal::ZERO);
        assert_eq!(account.owner(), UserId(9));
    }

    #[test]
    fn debit_reduces_balance() {
        let account = account_with_balance(dec!(50.00));
        assert_eq!(account.debited(amount("20")).unwrap(), dec!(30.00));
    }

    #[test]
    fn debit_of_full_balance_reaches_zero() {
        let account = account_with_balance(dec!(50.00));
        assert_eq!(account.debited(amount("50")).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn debit_beyond_balance_is_rejected() {
        let account = account_with_balance(dec!(5.00));
        assert_eq!(
            account.debited(amount("20")),
            Err(TransferError::InsufficientFunds)
        );
    }

    #[test]
    fn credit_adds_to_balance() {
        let account = account_with_balance(dec!(10.00));
        assert_eq!(account.credited(amount("20")), Ok(dec!(30.00)));
    }

    #[test]
    fn credit_past_decimal_range_is_rejected() {
        let account = account_with_balance(Decimal::MAX);
        assert_eq!(
            account.credited(amount("1")),
            Err(TransferError::InvalidAmount)
        );
    }

    // === Serialization Tests ===

    #[test]
    fn serializer_rounds_to_two_decimal_places() {
        let account = account_with_balance(dec!(123.456789));
        let json = serde_json::to_string(&account).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["balance"].as_str().unwrap(), "123.46");
        assert_eq!(parsed["account"].as_str().unwrap(), "1234567890");
        assert_eq!(parsed["owner"], 1);
    }

    #[test]
    fn serializer_uses_bankers_rounding() {
        // 0.125 rounds to 0.12 (half to even)
        let account = account_with_balance(dec!(0.125));
        let json = serde_json::to_string(&account).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["balance"].as_str().unwrap(), "0.12");
    }

    #[test]
    fn serializer_precision_constant_is_two() {
        assert_eq!(Account::DECIMAL_PRECISION, 2);
    }
}
