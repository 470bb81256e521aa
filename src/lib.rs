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

//! # Trustfund
//!
//! This library provides the balance-transfer core of a peer-to-peer payments
//! application: accounts addressed by ten-digit account numbers, transfers
//! between them, admin-issued credits, and the beneficiary list derived from
//! past transfers.
//!
//! ## Core Components
//!
//! - [`Engine`]: Transfer engine and admin credit path
//! - [`LedgerStore`]: Storage contract with single-row compare-and-swap; [`InMemoryLedger`] implements it
//! - [`AccountDirectory`]: Account lookup by ID, number or owner; account opening
//! - [`AccountLocks`]: Ordered, time-bounded per-account locking
//! - [`UserRegistry`]: Sign-up, email verification, password reset, profile updates
//! - [`TransferError`]: Error taxonomy for transfers and credits
//!
//! ## Example
//!
//! ```
//! use trustfund::{Caller, Engine, UserId};
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::new();
//! let alice = engine.directory().open_account(UserId(1)).unwrap();
//! let bob = engine.directory().open_account(UserId(2)).unwrap();
//!
//! // Fund Alice, then send money to Bob by account number
//! engine.credit_account(&Caller::admin(UserId(99)), alice.id(), "50.00", None).unwrap();
//! engine.transfer(UserId(1), bob.number().as_str(), "20.00", Some("rent")).unwrap();
//!
//! let bob = engine.directory().lookup(bob.id()).unwrap().unwrap();
//! assert_eq!(bob.balance(), dec!(20.00));
//! ```
//!
//! ## Thread Safety
//!
//! The engine is `Sync`; share it behind an [`Arc`](std::sync::Arc) across
//! request handlers. Operations on disjoint accounts run in parallel, while
//! operations sharing an account are serialized by the account locks.

pub mod account;
mod base;
mod beneficiary;
pub mod config;
mod directory;
mod engine;
pub mod error;
mod lock;
mod money;
pub mod notify;
mod retry;
mod session;
mod store;
mod tokens;
mod transfer;
mod transfer_log;
pub mod users;

pub use account::Account;
pub use base::{AccountId, AccountNumber, TransferId, UserId};
pub use beneficiary::BeneficiaryIndex;
pub use config::EngineConfig;
pub use directory::AccountDirectory;
pub use engine::Engine;
pub use error::{AccountError, Reconciliation, StoreError, TransferError, UserError};
pub use lock::{AccountLocks, LockScope, LockTimeout};
pub use money::Amount;
pub use notify::{LogNotifier, Notifier, NotifyError, Template};
pub use retry::{Attempt, RetryPolicy};
pub use session::{Caller, Role};
pub use store::{CasOutcome, InMemoryLedger, LedgerStore};
pub use tokens::{TokenPurpose, TokenService};
pub use transfer::{BeneficiaryLink, Originator, Transfer};
pub use transfer_log::TransferLog;
pub use users::{ProfileUpdate, User, UserRegistry};
