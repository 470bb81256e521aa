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

//! User registry.
//!
//! Sign-up opens the user's account in the same operation, so every user
//! has exactly one account from the moment they exist. Email verification
//! and password reset go through the [`TokenService`]; messages go out
//! through a [`Notifier`].

use crate::account::Account;
use crate::base::UserId;
use crate::engine::Engine;
use crate::error::UserError;
use crate::notify::{Notifier, Template};
use crate::session::{Caller, Role};
use crate::store::LedgerStore;
use crate::tokens::{TokenPurpose, TokenService};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Registered user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub role: Role,
    pub email_verified: bool,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Partial profile update. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
}

impl ProfileUpdate {
    /// Validates and normalizes every present field.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::InvalidField`] naming the first offending field.
    pub fn validated(self) -> Result<Self, UserError> {
        Ok(Self {
            username: self.username.map(|v| validate_username(&v)).transpose()?,
            first_name: self
                .first_name
                .map(|v| validate_name("first name", &v))
                .transpose()?,
            last_name: self
                .last_name
                .map(|v| validate_name("last name", &v))
                .transpose()?,
            phone_number: self.phone_number.map(|v| validate_phone(&v)).transpose()?,
            email: self.email.map(|v| validate_email(&v)).transpose()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn invalid(field: &'static str, reason: &'static str) -> UserError {
    UserError::InvalidField { field, reason }
}

fn validate_email(raw: &str) -> Result<String, UserError> {
    let email = raw.trim().to_lowercase();
    let Some((local, domain)) = email.split_once('@') else {
        return Err(invalid("email", "must contain @"));
    };
    if local.is_empty() || !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(invalid("email", "malformed address"));
    }
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return Err(invalid("email", "malformed address"));
    }
    Ok(email)
}

fn validate_username(raw: &str) -> Result<String, UserError> {
    let username = raw.trim();
    if !(3..=32).contains(&username.len()) {
        return Err(invalid("username", "must be 3 to 32 characters"));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(invalid("username", "only letters, digits and underscores"));
    }
    Ok(username.to_string())
}

fn validate_name(field: &'static str, raw: &str) -> Result<String, UserError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(invalid(field, "must not be blank"));
    }
    if name.chars().count() > 64 {
        return Err(invalid(field, "must be at most 64 characters"));
    }
    Ok(name.to_string())
}

/// Accepts E.164-style numbers: optional `+`, 7 to 15 digits, spaces and dashes ignored.
fn validate_phone(raw: &str) -> Result<String, UserError> {
    let trimmed = raw.trim();
    let (plus, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", trimmed),
    };
    let digits: String = rest.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) || !(7..=15).contains(&digits.len()) {
        return Err(invalid("phone number", "must be 7 to 15 digits"));
    }
    Ok(format!("{plus}{digits}"))
}

/// Users, their verification state, and the link to their ledger account.
pub struct UserRegistry<S, N> {
    engine: Arc<Engine<S>>,
    notifier: N,
    tokens: TokenService,
    users: DashMap<UserId, User>,
    emails: DashMap<String, UserId>,
    next_id: AtomicU64,
}

impl<S: LedgerStore, N: Notifier> UserRegistry<S, N> {
    pub fn new(engine: Arc<Engine<S>>, notifier: N) -> Self {
        Self {
            engine,
            notifier,
            tokens: TokenService::new(),
            users: DashMap::new(),
            emails: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn engine(&self) -> &Arc<Engine<S>> {
        &self.engine
    }

    pub fn get(&self, id: UserId) -> Option<User> {
        self.users.get(&id).map(|user| user.value().clone())
    }

    pub fn find_by_email(&self, email: &str) -> Option<User> {
        let id = *self.emails.get(&email.trim().to_lowercase())?.value();
        self.get(id)
    }

    /// Registers a user and opens their account.
    ///
    /// A verification notification is sent; failing to send it is logged and
    /// does not fail sign-up.
    ///
    /// # Errors
    ///
    /// - [`UserError::InvalidField`] - malformed email.
    /// - [`UserError::DuplicateEmail`] - email already registered.
    /// - [`UserError::Account`] - the account could not be opened; the user is
    ///   not kept.
    pub fn sign_up(&self, email: &str, role: Role) -> Result<(User, Account), UserError> {
        let email = validate_email(email)?;
        let id = UserId(self.next_id.fetch_add(1, Ordering::Relaxed));
        match self.emails.entry(email.clone()) {
            Entry::Occupied(_) => return Err(UserError::DuplicateEmail),
            Entry::Vacant(entry) => {
                entry.insert(id);
            }
        }

        let user = User {
            id,
            email: email.clone(),
            role,
            email_verified: false,
            username: None,
            first_name: None,
            last_name: None,
            phone_number: None,
            created_at: Utc::now(),
        };
        self.users.insert(id, user.clone());

        let account = match self.engine.directory().open_account(id) {
            Ok(account) => account,
            Err(e) => {
                self.users.remove(&id);
                self.emails.remove(&email);
                warn!(user = %id, reason = %e, "sign-up rolled back");
                return Err(e.into());
            }
        };

        self.send_verification(id, &email);
        info!(user = %id, account = %account.number(), "user signed up");
        Ok((user, account))
    }

    /// Consumes an email-verification token and marks its user verified.
    pub fn verify_email(&self, token: &str) -> Result<UserId, UserError> {
        let id = self
            .tokens
            .verify(token, TokenPurpose::EmailVerification)
            .ok_or(UserError::InvalidToken)?;
        let mut user = self.users.get_mut(&id).ok_or(UserError::UserNotFound)?;
        user.email_verified = true;
        info!(user = %id, "email verified");
        Ok(id)
    }

    /// Issues a password-reset token and mails it.
    ///
    /// Unlike other notifications, a delivery failure fails the request:
    /// sending the message is the whole point.
    pub fn request_password_reset(&self, email: &str) -> Result<(), UserError> {
        let user = self.find_by_email(email).ok_or(UserError::UserNotFound)?;
        let token = self.tokens.issue(user.id, TokenPurpose::PasswordReset);
        self.notifier
            .send(&user.email, Template::PasswordReset, &token)
            .map_err(|e| UserError::NotificationFailed(e.to_string()))?;
        info!(user = %user.id, "password reset requested");
        Ok(())
    }

    /// Consumes a password-reset token, returning the user it was issued to.
    pub fn redeem_password_reset(&self, token: &str) -> Result<UserId, UserError> {
        let id = self
            .tokens
            .verify(token, TokenPurpose::PasswordReset)
            .ok_or(UserError::InvalidToken)?;
        if !self.users.contains_key(&id) {
            return Err(UserError::UserNotFound);
        }
        Ok(id)
    }

    /// Applies a validated partial update to the profile of `id`.
    ///
    /// Changing the email clears verification and sends a new verification
    /// message. Validation is all-or-nothing.
    pub fn update_profile(&self, id: UserId, update: ProfileUpdate) -> Result<User, UserError> {
        let update = update.validated()?;

        // New email is reserved only while the user row is held.
        let (updated, new_email) = {
            let mut user = self.users.get_mut(&id).ok_or(UserError::UserNotFound)?;
            let new_email = match update.email {
                Some(email) if email != user.email => {
                    match self.emails.entry(email.clone()) {
                        Entry::Occupied(_) => return Err(UserError::DuplicateEmail),
                        Entry::Vacant(entry) => {
                            entry.insert(id);
                        }
                    }
                    Some(email)
                }
                _ => None,
            };

            if let Some(username) = update.username {
                user.username = Some(username);
            }
            if let Some(first_name) = update.first_name {
                user.first_name = Some(first_name);
            }
            if let Some(last_name) = update.last_name {
                user.last_name = Some(last_name);
            }
            if let Some(phone_number) = update.phone_number {
                user.phone_number = Some(phone_number);
            }
            if let Some(email) = &new_email {
                let old = std::mem::replace(&mut user.email, email.clone());
                user.email_verified = false;
                self.emails.remove(&old);
            }
            (user.clone(), new_email)
        };

        if let Some(email) = &new_email {
            self.send_verification(id, email);
        }
        info!(user = %id, email_changed = new_email.is_some(), "profile updated");
        Ok(updated)
    }

    /// Deletes a user, their account, and everything referencing it. Admin only.
    pub fn delete_user(&self, caller: &Caller, id: UserId) -> Result<(), UserError> {
        if !caller.is_admin() {
            return Err(UserError::Unauthorized);
        }
        let user = self.get(id).ok_or(UserError::UserNotFound)?;
        let account = self
            .engine
            .directory()
            .lookup_by_owner(id)
            .map_err(|e| UserError::Account(e.into()))?;
        if let Some(account) = account {
            self.engine.close_account(account.id())?;
        }
        self.users.remove(&id);
        self.emails.remove(&user.email);
        self.tokens.revoke_user(id);
        info!(user = %id, admin = %caller.user_id, "user deleted");
        Ok(())
    }

    fn send_verification(&self, id: UserId, email: &str) {
        let token = self.tokens.issue(id, TokenPurpose::EmailVerification);
        if let Err(e) = self.notifier.send(email, Template::EmailVerification, &token) {
            warn!(user = %id, reason = %e, "verification email not sent");
        }
    }
}
