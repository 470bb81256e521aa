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

//! Ledger records produced by the transfer engine.
//!
//! A [`Transfer`] is written only after both balance mutations it describes
//! were durably applied, so it always represents a completed movement. There
//! is no pending state.

use crate::base::{AccountId, TransferId, UserId};
use crate::money::Amount;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Where the funds of a transfer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Originator {
    /// Debited from another account.
    Account(AccountId),
    /// New funds issued by an administrator.
    Issuance { admin: UserId },
}

impl Originator {
    pub fn account(&self) -> Option<AccountId> {
        match self {
            Self::Account(id) => Some(*id),
            Self::Issuance { .. } => None,
        }
    }
}

impl fmt::Display for Originator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account(id) => write!(f, "{id}"),
            Self::Issuance { admin } => write!(f, "issuance(admin {admin})"),
        }
    }
}

/// Immutable record of a completed balance movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transfer {
    pub id: TransferId,
    pub originator: Originator,
    pub recipient: AccountId,
    pub amount: Amount,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    /// Stamps a new record with a fresh ID and the current time.
    pub fn new(
        originator: Originator,
        recipient: AccountId,
        amount: Amount,
        note: Option<String>,
    ) -> Self {
        Self {
            id: TransferId::new(),
            originator,
            recipient,
            amount,
            note,
            created_at: Utc::now(),
        }
    }

    /// Returns `true` if the account sent or received this transfer.
    pub fn involves(&self, account: AccountId) -> bool {
        self.recipient == account || self.originator.account() == Some(account)
    }
}

/// "`owner` has previously sent money to `beneficiary`".
///
/// Derived from transfers for display purposes only; never ledger truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BeneficiaryLink {
    pub owner: UserId,
    pub beneficiary: UserId,
    pub created_at: DateTime<Utc>,
}

impl BeneficiaryLink {
    pub fn new(owner: UserId, beneficiary: UserId) -> Self {
        Self {
            owner,
            beneficiary,
            created_at: Utc::now(),
        }
    }

    pub fn involves(&self, user: UserId) -> bool {
        self.owner == user || self.beneficiary == user
    }
}
