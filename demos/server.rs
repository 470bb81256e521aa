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

//! REST API server for the transfer engine.
//!
//! Run with: `cargo run --example server`
//!
//! The caller identity comes from the `x-user-id` and `x-role` headers, which
//! stand in for whatever session layer fronts the service.
//!
//! ## Endpoints
//!
//! - `POST /accounts` - Open the caller's account
//! - `POST /transfers` - Send money to an account number
//! - `POST /admin/credits` - Credit an account (admin only)
//! - `GET /accounts/{number}` - Get an account by account number
//! - `GET /accounts/{number}/transfers` - Transfer history of an account
//!
//! ## Example Usage
//!
//! ```bash
//! # Open accounts for users 1 and 2
//! curl -X POST http://localhost:3000/accounts -H "x-user-id: 1"
//! curl -X POST http://localhost:3000/accounts -H "x-user-id: 2"
//!
//! # Credit user 1 as an admin
//! curl -X POST http://localhost:3000/admin/credits \
//!   -H "x-user-id: 99" -H "x-role: ADMIN" -H "Content-Type: application/json" \
//!   -d '{"account": "<number of user 1>", "amount": "50.00", "memo": "bonus"}'
//!
//! # Transfer
//! curl -X POST http://localhost:3000/transfers \
//!   -H "x-user-id: 1" -H "Content-Type: application/json" \
//!   -d '{"recipient": "<number of user 2>", "amount": "20.00", "note": "rent"}'
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use trustfund::{
    Account, AccountError, AccountId, AccountNumber, Caller, Engine, Originator, Role,
    StoreError, Transfer, TransferError, UserId,
};

// === DTOs ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub recipient: String,
    pub amount: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditRequest {
    pub account: String,
    pub amount: String,
    #[serde(default)]
    pub memo: Option<String>,
}

/// Response body for account information.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub owner: u64,
    pub account: String,
    pub balance: Decimal,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            owner: account.owner().0,
            account: account.number().to_string(),
            balance: account.balance(),
        }
    }
}

/// Response body for a recorded transfer.
///
/// `sender` is the sending account number; admin credits carry `issued_by`
/// instead.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransferResponse {
    pub id: String,
    pub sender: Option<String>,
    pub issued_by: Option<u64>,
    pub recipient: Option<String>,
    pub amount: Decimal,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TransferResponse {
    /// Resolves account IDs to the account numbers clients know.
    fn describe(engine: &Engine, transfer: Transfer) -> Result<Self, AppError> {
        let number = |id: AccountId| -> Result<Option<String>, AppError> {
            Ok(engine
                .directory()
                .lookup(id)?
                .map(|account| account.number().to_string()))
        };
        let (sender, issued_by) = match transfer.originator {
            Originator::Account(id) => (number(id)?, None),
            Originator::Issuance { admin } => (None, Some(admin.0)),
        };
        Ok(Self {
            id: transfer.id.to_string(),
            sender,
            issued_by,
            recipient: number(transfer.recipient)?,
            amount: transfer.amount.value(),
            note: transfer.note,
            created_at: transfer.created_at,
        })
    }
}

/// Response body for errors.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state containing the transfer engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// === Error Handling ===

/// Wrapper for converting engine errors into HTTP responses.
pub enum AppError {
    Transfer(TransferError),
    Account(AccountError),
    Unauthenticated,
    NotFound,
}

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        AppError::Transfer(err)
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        AppError::Account(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Transfer(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Transfer(err) => {
                let (status, code) = match err {
                    TransferError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
                    TransferError::SenderNotFound => (StatusCode::NOT_FOUND, "SENDER_NOT_FOUND"),
                    TransferError::RecipientNotFound => {
                        (StatusCode::NOT_FOUND, "RECIPIENT_NOT_FOUND")
                    }
                    TransferError::AccountNotFound => (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND"),
                    TransferError::SelfTransferNotAllowed => {
                        (StatusCode::BAD_REQUEST, "SELF_TRANSFER_NOT_ALLOWED")
                    }
                    TransferError::InsufficientFunds => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_FUNDS")
                    }
                    TransferError::ConcurrentModification => {
                        (StatusCode::CONFLICT, "CONCURRENT_MODIFICATION")
                    }
                    TransferError::TransferRecordingFailed(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "TRANSFER_RECORDING_FAILED")
                    }
                    TransferError::Timeout => (StatusCode::SERVICE_UNAVAILABLE, "TIMEOUT"),
                    TransferError::Unauthorized => (StatusCode::FORBIDDEN, "UNAUTHORIZED"),
                    TransferError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE"),
                };
                (status, code, err.user_message().to_string())
            }
            AppError::Account(AccountError::OwnerAlreadyHasAccount) => (
                StatusCode::CONFLICT,
                "ACCOUNT_EXISTS",
                "You already have an account.".to_string(),
            ),
            AppError::Account(err) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "ACCOUNT_UNAVAILABLE",
                err.to_string(),
            ),
            AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                "Please sign in.".to_string(),
            ),
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                "ACCOUNT_NOT_FOUND",
                "Account not found".to_string(),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

/// Builds the caller context from the session headers.
fn caller(headers: &HeaderMap) -> Result<Caller, AppError> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .ok_or(AppError::Unauthenticated)?;
    let role = match headers.get("x-role").and_then(|value| value.to_str().ok()) {
        Some(role) if role.eq_ignore_ascii_case("admin") => Role::Admin,
        _ => Role::User,
    };
    Ok(Caller {
        user_id: UserId(user_id),
        role,
    })
}

/// Runs a blocking engine call off the async workers; lock waits can last seconds.
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap_or_else(|_| {
        Err(StoreError::Unavailable("worker panicked".into()).into())
    })
}

// === Handlers ===

/// POST /accounts - Open the caller's account.
async fn open_account(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<AccountResponse>), AppError> {
    let caller = caller(&headers)?;
    let account = state.engine.directory().open_account(caller.user_id)?;
    Ok((StatusCode::CREATED, Json(account.into())))
}

/// POST /transfers - Send money.
async fn create_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TransferRequest>,
) -> Result<(StatusCode, Json<TransferResponse>), AppError> {
    let caller = caller(&headers)?;
    let transfer = blocking(move || {
        let transfer = state.engine.transfer(
            caller.user_id,
            &request.recipient,
            &request.amount,
            request.note.as_deref(),
        )?;
        TransferResponse::describe(&state.engine, transfer)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(transfer)))
}

/// POST /admin/credits - Credit an account.
async fn create_credit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreditRequest>,
) -> Result<(StatusCode, Json<TransferResponse>), AppError> {
    let caller = caller(&headers)?;
    if !caller.is_admin() {
        return Err(TransferError::Unauthorized.into());
    }
    let transfer = blocking(move || {
        let number = AccountNumber::parse(&request.account).ok_or(TransferError::AccountNotFound)?;
        let account = state
            .engine
            .directory()
            .lookup_by_number(&number)?
            .ok_or(TransferError::AccountNotFound)?;
        let transfer = state.engine.credit_account(
            &caller,
            account.id(),
            &request.amount,
            request.memo.as_deref(),
        )?;
        TransferResponse::describe(&state.engine, transfer)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(transfer)))
}

fn find_account(state: &AppState, number: &str) -> Result<Account, AppError> {
    let number = AccountNumber::parse(number).ok_or(AppError::NotFound)?;
    state
        .engine
        .directory()
        .lookup_by_number(&number)?
        .ok_or(AppError::NotFound)
}

/// GET /accounts/{number} - Get an account.
async fn get_account(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> Result<Json<AccountResponse>, AppError> {
    Ok(Json(find_account(&state, &number)?.into()))
}

/// GET /accounts/{number}/transfers - Transfer history.
async fn list_transfers(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> Result<Json<Vec<TransferResponse>>, AppError> {
    let account = find_account(&state, &number)?;
    let history = state
        .engine
        .history(account.id())?
        .into_iter()
        .map(|transfer| TransferResponse::describe(&state.engine, transfer))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(history))
}

// === Router ===

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/accounts", post(open_account))
        .route("/accounts/{number}", get(get_account))
        .route("/accounts/{number}/transfers", get(list_transfers))
        .route("/transfers", post(create_transfer))
        .route("/admin/credits", post(create_credit))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let state = AppState {
        engine: Arc::new(Engine::new()),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000")
        .await
        .expect("failed to bind 127.0.0.1:3000");
    info!("Trustfund API server running on http://127.0.0.1:3000");

    axum::serve(listener, app).await.expect("server error");
}
