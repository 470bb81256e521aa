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

//! Monetary amounts.
//!
//! Balances are plain [`Decimal`] values (zero is a valid balance). Amounts
//! moved by a transfer or credit are wrapped in [`Amount`], which can only be
//! constructed from a strictly positive value with at most two fractional
//! digits.

use crate::TransferError;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// A strictly positive monetary amount in currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

impl Amount {
    /// Fractional digits accepted for a monetary amount.
    pub const SCALE: u32 = 2;

    /// Validates a decimal value as a transferable amount.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidAmount`] if the value is zero, negative,
    /// or carries more than [`Amount::SCALE`] significant fractional digits.
    pub fn new(value: Decimal) -> Result<Self, TransferError> {
        if value <= Decimal::ZERO || value.normalize().scale() > Self::SCALE {
            return Err(TransferError::InvalidAmount);
        }
        Ok(Self(value))
    }

    /// Parses user input such as `"20"` or `" 20.50 "`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidAmount`] if the input is not a decimal
    /// number or fails [`Amount::new`] validation.
    pub fn parse(raw: &str) -> Result<Self, TransferError> {
        let raw = raw.trim();
        if !is_plain_decimal(raw) {
            return Err(TransferError::InvalidAmount);
        }
        let value = Decimal::from_str(raw).map_err(|_| TransferError::InvalidAmount)?;
        Self::new(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

/// Optional sign, digits, optional `.` and digits. No separators or exponents.
fn is_plain_decimal(raw: &str) -> bool {
    let unsigned = raw.strip_prefix(['+', '-']).unwrap_or(raw);
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    !(whole.is_empty() && fraction.is_empty())
        && whole.bytes().all(|b| b.is_ascii_digit())
        && fraction.bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Amount {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
