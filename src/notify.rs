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

//! Outbound notifications.

use thiserror::Error;
use tracing::info;

/// Kind of message to render and send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    EmailVerification,
    PasswordReset,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivery channel for user-facing messages.
pub trait Notifier: Send + Sync {
    /// Sends `template` to `address`; `payload` carries the token or link.
    fn send(&self, address: &str, template: Template, payload: &str) -> Result<(), NotifyError>;
}

/// Notifier that only emits a tracing event. Payloads are not logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, address: &str, template: Template, _payload: &str) -> Result<(), NotifyError> {
        info!(to = address, ?template, "notification dispatched");
        Ok(())
    }
}
