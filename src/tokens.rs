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

//! Single-use, time-bounded tokens for email verification and password reset.

use crate::base::UserId;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use std::fmt;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenPurpose {
    EmailVerification,
    PasswordReset,
}

impl TokenPurpose {
    /// How long a freshly issued token stays valid.
    pub fn ttl(&self) -> TimeDelta {
        match self {
            Self::EmailVerification => TimeDelta::hours(24),
            Self::PasswordReset => TimeDelta::hours(1),
        }
    }
}

impl fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmailVerification => f.write_str("email verification"),
            Self::PasswordReset => f.write_str("password reset"),
        }
    }
}

#[derive(Debug, Clone)]
struct IssuedToken {
    user: UserId,
    purpose: TokenPurpose,
    expires_at: DateTime<Utc>,
}

/// In-process token table.
#[derive(Debug, Default)]
pub struct TokenService {
    tokens: DashMap<String, IssuedToken>,
}

impl TokenService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a token, invalidating any earlier token of the same purpose for `user`.
    pub fn issue(&self, user: UserId, purpose: TokenPurpose) -> String {
        self.issue_at(user, purpose, Utc::now())
    }

    /// Consumes `token` and returns its user if it is live and of `purpose`.
    ///
    /// A token of another purpose is left untouched. An expired token is
    /// consumed and rejected.
    pub fn verify(&self, token: &str, purpose: TokenPurpose) -> Option<UserId> {
        self.verify_at(token, purpose, Utc::now())
    }

    /// Drops every token issued to `user`.
    pub fn revoke_user(&self, user: UserId) {
        self.tokens.retain(|_, issued| issued.user != user);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn issue_at(&self, user: UserId, purpose: TokenPurpose, now: DateTime<Utc>) -> String {
        self.tokens
            .retain(|_, issued| !(issued.user == user && issued.purpose == purpose));
        let token = Ulid::new().to_string();
        self.tokens.insert(
            token.clone(),
            IssuedToken {
                user,
                purpose,
                expires_at: now + purpose.ttl(),
            },
        );
        token
    }

    fn verify_at(&self, token: &str, purpose: TokenPurpose, now: DateTime<Utc>) -> Option<UserId> {
        let (_, issued) = self
            .tokens
            .remove_if(token, |_, issued| issued.purpose == purpose)?;
        (issued.expires_at > now).then_some(issued.user)
    }
}
