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

use clap::Parser;
use csv::{Position, ReaderBuilder, StringRecord, Trim, Writer};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;
use trustfund::{Caller, Engine, EngineConfig, InMemoryLedger, TransferError, UserId};

/// Trustfund - Replay a ledger script
///
/// Reads account operations from a CSV file, applies them to an in-memory
/// ledger, and writes the final account states to stdout.
#[derive(Parser, Debug)]
#[command(name = "trustfund")]
#[command(about = "Replays open/credit/transfer scripts against an in-memory ledger", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: type,user,target,amount,note
    /// Example: cargo run -- script.csv > accounts.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// User ID recorded as the issuer of `credit` operations
    #[arg(long, default_value_t = 0)]
    admin_id: u64,

    /// Maximum total wait for account locks, in milliseconds
    #[arg(long, default_value_t = EngineConfig::default().lock_timeout_ms)]
    lock_timeout_ms: u64,

    /// Attempts per conditional balance update
    #[arg(long, default_value_t = EngineConfig::default().max_attempts)]
    max_attempts: u32,

    /// Backoff after the first balance conflict, in milliseconds
    #[arg(long, default_value_t = EngineConfig::default().base_backoff_ms)]
    base_backoff_ms: u64,
}

impl Args {
    fn config(&self) -> EngineConfig {
        EngineConfig {
            lock_timeout_ms: self.lock_timeout_ms,
            max_attempts: self.max_attempts,
            base_backoff_ms: self.base_backoff_ms,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            error!(path = %args.input.display(), "cannot open script: {e}");
            process::exit(1);
        }
    };

    let engine = Engine::with_store(Arc::new(InMemoryLedger::new()), args.config());
    let admin = Caller::admin(UserId(args.admin_id));
    match replay(&engine, &admin, BufReader::new(file)) {
        Ok(skipped) if !skipped.is_empty() => {
            warn!(count = skipped.len(), lines = ?skipped, "some operations were skipped");
        }
        Ok(_) => {}
        Err(e) => {
            error!("cannot read script: {e}");
            process::exit(1);
        }
    }

    if let Err(e) = write_accounts(&engine, std::io::stdout()) {
        error!("cannot write output: {e}");
        process::exit(1);
    }
}

/// Raw CSV record matching the script format.
///
/// Fields: `type, user, target, amount, note`
#[derive(Debug, Deserialize)]
struct ScriptRecord {
    #[serde(rename = "type")]
    op: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    user: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    target: Option<u64>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    note: Option<String>,
}

/// A parsed script operation. Users are referenced by ID; the replayer
/// resolves account numbers itself since they are assigned at random.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    Open { user: UserId },
    Credit { user: UserId, amount: String, note: Option<String> },
    Transfer { from: UserId, to: UserId, amount: String, note: Option<String> },
}

impl ScriptRecord {
    /// Returns `None` for unknown operation types or missing required fields.
    fn into_operation(self) -> Option<Operation> {
        let amount = self.amount.unwrap_or_default();
        match self.op.to_lowercase().as_str() {
            "open" => Some(Operation::Open {
                user: UserId(self.user?),
            }),
            "credit" => Some(Operation::Credit {
                user: UserId(self.target.or(self.user)?),
                amount,
                note: self.note,
            }),
            "transfer" => Some(Operation::Transfer {
                from: UserId(self.user?),
                to: UserId(self.target?),
                amount,
                note: self.note,
            }),
            _ => None,
        }
    }
}

/// Applies every operation of a script, skipping rows that fail.
///
/// Returns the file line numbers of skipped rows.
///
/// # Errors
///
/// Returns a CSV error only if the underlying reader fails. Rejected
/// operations are logged and do not stop the replay.
fn replay<R: Read>(engine: &Engine, admin: &Caller, reader: R) -> Result<Vec<u64>, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);
    let headers = rdr.headers()?.clone();

    let mut record = StringRecord::new();
    let mut skipped = Vec::new();
    loop {
        match rdr.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) if e.is_io_error() => return Err(e),
            Err(e) => {
                let line = e.position().map_or(0, Position::line);
                warn!(line, "skipping unreadable row: {e}");
                skipped.push(line);
                continue;
            }
        }
        let line = record.position().map_or(0, Position::line);

        let operation = match record.deserialize::<ScriptRecord>(Some(&headers)) {
            Ok(parsed) => parsed.into_operation(),
            Err(e) => {
                warn!(line, "skipping malformed row: {e}");
                skipped.push(line);
                continue;
            }
        };
        let Some(operation) = operation else {
            warn!(line, "skipping invalid operation");
            skipped.push(line);
            continue;
        };
        if let Err(e) = apply(engine, admin, &operation) {
            warn!(line, ?operation, "operation failed: {e}");
            skipped.push(line);
        }
    }

    Ok(skipped)
}

fn apply(engine: &Engine, admin: &Caller, operation: &Operation) -> Result<(), Box<dyn std::error::Error>> {
    match operation {
        Operation::Open { user } => {
            engine.directory().open_account(*user)?;
        }
        Operation::Credit { user, amount, note } => {
            let account = engine
                .directory()
                .lookup_by_owner(*user)?
                .ok_or(TransferError::AccountNotFound)?;
            engine.credit_account(admin, account.id(), amount, note.as_deref())?;
        }
        Operation::Transfer {
            from,
            to,
            amount,
            note,
        } => {
            let recipient = engine
                .directory()
                .lookup_by_owner(*to)?
                .ok_or(TransferError::RecipientNotFound)?;
            engine.transfer(*from, recipient.number().as_str(), amount, note.as_deref())?;
        }
    }
    Ok(())
}

/// Write account states to a CSV writer
///
/// # CSV Format
///
/// Columns: `owner, account, balance`
///
/// ```csv
/// owner,account,balance
/// 1,4821937710,30.00
/// 2,1093384521,30.00
/// ```
fn write_accounts<W: Write>(engine: &Engine, writer: W) -> Result<(), Box<dyn std::error::Error>> {
    let mut wtr = Writer::from_writer(writer);
    for account in engine.directory().accounts()? {
        wtr.serialize(&account)?;
    }
    wtr.flush()?;
    Ok(())
}
