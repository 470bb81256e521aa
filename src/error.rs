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

//! Error types for ledger operations.

use crate::base::AccountId;
use crate::lock::LockTimeout;
use crate::money::Amount;
use crate::transfer::Originator;
use std::fmt;
use thiserror::Error;

/// Failures reported by a [`LedgerStore`](crate::LedgerStore) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend could not be reached or rejected the operation
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),

    /// Account number collides with an existing account
    #[error("account number already assigned")]
    DuplicateAccountNumber,

    /// Owner already has an account
    #[error("owner already has an account")]
    DuplicateOwner,

    /// Referenced account does not exist
    #[error("account not found")]
    AccountNotFound,
}

/// Which balance steps of a funds movement were durably applied when it failed.
///
/// Attached to [`TransferError::TransferRecordingFailed`] so an operator can
/// reconcile the ledger by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub originator: Originator,
    pub recipient: AccountId,
    pub amount: Amount,
    /// Sender balance was debited (always `false` for issuance).
    pub debited: bool,
    /// Recipient balance was credited.
    pub credited: bool,
}

impl fmt::Display for Reconciliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} amount {} (debited: {}, credited: {})",
            self.originator, self.recipient, self.amount, self.debited, self.credited
        )
    }
}

/// Transfer and admin-credit errors.
///
/// Every variant except [`TransferError::TransferRecordingFailed`] guarantees
/// the ledger was left unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Amount is missing, malformed, zero, negative, or overflows the receiving balance
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Authenticated caller has no account
    #[error("sender account not found")]
    SenderNotFound,

    /// Recipient account number does not resolve
    #[error("recipient account not found")]
    RecipientNotFound,

    /// Target account of an admin credit does not exist
    #[error("account not found")]
    AccountNotFound,

    /// Sender and recipient are the same account
    #[error("cannot transfer to your own account")]
    SelfTransferNotAllowed,

    /// Sender balance is below the requested amount
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Conditional balance update kept conflicting until retries ran out
    #[error("concurrent modification (retries exhausted)")]
    ConcurrentModification,

    /// Balances moved but the ledger entry is missing
    #[error("transfer recording failed: {0}")]
    TransferRecordingFailed(Reconciliation),

    /// Account lock could not be acquired in time
    #[error("timed out waiting for account lock")]
    Timeout,

    /// Caller lacks the admin role
    #[error("unauthorized")]
    Unauthorized,

    /// Store failed before any balance was mutated
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransferError {
    /// Human-readable message safe to show to the end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidAmount => "Please enter a valid amount.",
            Self::SenderNotFound => "Your account could not be found. Please sign in again.",
            Self::RecipientNotFound => "No account exists with that account number.",
            Self::AccountNotFound => "The selected account does not exist.",
            Self::SelfTransferNotAllowed => "You cannot send money to your own account.",
            Self::InsufficientFunds => "Insufficient balance for this transfer.",
            Self::ConcurrentModification => {
                "Your balance changed while processing. Please try again."
            }
            Self::TransferRecordingFailed(_) => {
                "Something went wrong with this transfer. Please contact support."
            }
            Self::Timeout => "The service is busy. Please try again in a moment.",
            Self::Unauthorized => "You are not allowed to perform this action.",
            Self::Store(_) => "The service is temporarily unavailable. Please try again.",
        }
    }

    /// Whether the caller may safely resubmit the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification | Self::Timeout | Self::Store(StoreError::Unavailable(_))
        )
    }
}

impl From<LockTimeout> for TransferError {
    fn from(_: LockTimeout) -> Self {
        Self::Timeout
    }
}

/// Errors raised while opening or closing accounts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    /// Owner already has an account
    #[error("user already has an account")]
    OwnerAlreadyHasAccount,

    /// Repeated account-number collisions
    #[error("could not allocate a unique account number")]
    NumberSpaceExhausted,

    /// Lock on the account could not be acquired in time
    #[error("timed out waiting for account lock")]
    Timeout,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<LockTimeout> for AccountError {
    fn from(_: LockTimeout) -> Self {
        Self::Timeout
    }
}

/// Errors raised by the user registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UserError {
    /// Email is already registered
    #[error("user with this email already exists")]
    DuplicateEmail,

    /// Profile field failed validation
    #[error("invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },

    /// Referenced user does not exist
    #[error("user not found")]
    UserNotFound,

    /// Token is unknown, expired, already used, or of the wrong purpose
    #[error("invalid or expired token")]
    InvalidToken,

    /// Notification could not be delivered where delivery is the point
    #[error("notification failed: {0}")]
    NotificationFailed(String),

    /// Caller lacks the admin role
    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Account(#[from] AccountError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconciliation() -> Reconciliation {
        Reconciliation {
            originator: Originator::Account(AccountId::new()),
            recipient: AccountId::new(),
            amount: Amount::parse("20").unwrap(),
            debited: true,
            credited: true,
        }
    }

    #[test]
    fn error_display_messages() {
        assert_eq!(
            TransferError::InvalidAmount.to_string(),
            "invalid amount (must be positive)"
        );
        assert_eq!(
            TransferError::RecipientNotFound.to_string(),
            "recipient account not found"
        );
        assert_eq!(
            TransferError::SelfTransferNotAllowed.to_string(),
            "cannot transfer to your own account"
        );
        assert_eq!(TransferError::InsufficientFunds.to_string(), "insufficient funds");
        assert_eq!(
            TransferError::Timeout.to_string(),
            "timed out waiting for account lock"
        );
        assert_eq!(
            TransferError::Store(StoreError::Unavailable("down".into())).to_string(),
            "ledger store unavailable: down"
        );
    }

    #[test]
    fn user_messages_are_distinct() {
        let errors = [
            TransferError::InvalidAmount,
            TransferError::SenderNotFound,
            TransferError::RecipientNotFound,
            TransferError::AccountNotFound,
            TransferError::SelfTransferNotAllowed,
            TransferError::InsufficientFunds,
            TransferError::ConcurrentModification,
            TransferError::TransferRecordingFailed(reconciliation()),
            TransferError::Timeout,
            TransferError::Unauthorized,
            TransferError::Store(StoreError::Unavailable("down".into())),
        ];
        let messages: std::collections::HashSet<_> =
            errors.iter().map(TransferError::user_message).collect();
        assert_eq!(messages.len(), errors.len());
    }

    #[test]
    fn recording_failure_hides_internal_state() {
        let error = TransferError::TransferRecordingFailed(reconciliation());
        assert!(error.user_message().contains("contact support"));
        assert!(!error.user_message().contains("debited"));
        assert!(error.to_string().contains("debited: true"));
    }

    #[test]
    fn retryable_errors() {
        assert!(TransferError::Timeout.is_retryable());
        assert!(TransferError::ConcurrentModification.is_retryable());
        assert!(!TransferError::InsufficientFunds.is_retryable());
        assert!(!TransferError::TransferRecordingFailed(reconciliation()).is_retryable());
    }
}
