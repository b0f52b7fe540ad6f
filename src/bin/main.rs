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
use csv::{ReaderBuilder, Trim, Writer};
use payfill_rs::{Engine, OrderStatus, SenderInfo, TransactionSnapshot, TxCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;

/// Payfill - Replay payment notification CSV files
///
/// Reads payment notifications from a CSV file, reconciles paid amounts
/// against expected ones and outputs the resulting transaction states to
/// stdout.
#[derive(Parser, Debug)]
#[command(name = "payfill-rs")]
#[command(about = "A reconciliation engine that replays payment notification CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with payment notifications
    ///
    /// Expected format: tx_code,expected,paid,sender,phone
    /// Example: cargo run -- payments.csv > transactions.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

fn main() {
    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let engine = match process_payments(BufReader::new(file)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error processing payments: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_transactions(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `tx_code, expected, paid, sender, phone`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    tx_code: String,
    expected: Decimal,
    #[serde(deserialize_with = "csv::invalid_option")]
    paid: Option<Decimal>,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    phone: String,
}

/// One output row per transaction.
#[derive(Debug, Serialize)]
struct OutputRecord {
    tx_code: String,
    status: OrderStatus,
    expected: Decimal,
    paid: Decimal,
    remaining: Decimal,
    locked: bool,
}

impl From<TransactionSnapshot> for OutputRecord {
    fn from(snapshot: TransactionSnapshot) -> Self {
        Self {
            tx_code: snapshot.tx_code.0,
            status: snapshot.status,
            expected: snapshot.amount_expected,
            paid: snapshot.amount_paid,
            remaining: snapshot.remaining_amount,
            locked: snapshot.is_locked,
        }
    }
}

/// Process payment notifications from a CSV reader.
///
/// This function uses streaming parsing to handle arbitrarily large CSV
/// files without loading the entire file into memory. Malformed rows,
/// replayed payment codes and rejected amounts are skipped.
///
/// # CSV Format
///
/// Expected columns: `tx_code, expected, paid, sender, phone`
/// - `tx_code`: Unique payment code from the notification
/// - `expected`: Expected payment amount (decimal)
/// - `paid`: Amount actually received (optional; empty means not yet paid)
/// - `sender`: Sender name (optional)
/// - `phone`: Sender phone number (optional)
///
/// # Example
///
/// ```csv
/// tx_code,expected,paid,sender,phone
/// QJL7XK2M9P,3000.00,3000.00,JOHN DOE,255700000001
/// RKM8YN3Q1T,1500.00,500.00,JANE ROE,255700000002
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
/// Individual rejected notifications are logged in debug mode but don't
/// stop processing.
pub fn process_payments<R: Read>(reader: R) -> Result<Engine, csv::Error> {
    let engine = Engine::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true) // Allow missing paid/sender/phone fields
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        match result {
            Ok(record) => {
                let code = TxCode::new(record.tx_code);
                let sender = SenderInfo {
                    name: record.sender,
                    phone: record.phone,
                };

                let created = match engine.create_transaction(code.clone(), record.expected, sender)
                {
                    Ok(snapshot) => snapshot,
                    Err(_e) => {
                        #[cfg(debug_assertions)]
                        eprintln!("Skipping notification {}: {}", code, _e);
                        continue;
                    }
                };

                if let Some(paid) = record.paid {
                    if let Err(_e) = engine.record_payment(created.id, paid) {
                        #[cfg(debug_assertions)]
                        eprintln!("Skipping payment for {}: {}", code, _e);
                    }
                }
            }
            Err(_e) => {
                // Skip malformed rows
                #[cfg(debug_assertions)]
                eprintln!("Skipping malformed row: {}", _e);
                continue;
            }
        }
    }

    Ok(engine)
}

/// Write transaction states to a CSV writer.
///
/// Outputs all transactions in creation order.
///
/// # CSV Format
///
/// Columns: `tx_code, status, expected, paid, remaining, locked`
///
/// # Example
///
/// ```csv
/// tx_code,status,expected,paid,remaining,locked
/// QJL7XK2M9P,FULFILLED,3000.00,3000.00,0.00,true
/// RKM8YN3Q1T,PARTIALLY_FULFILLED,1500.00,500.00,1000.00,false
/// ```
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_transactions<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for snapshot in engine.transactions() {
        wtr.serialize(OutputRecord::from(snapshot))?;
    }

    wtr.flush()?;
    Ok(())
}
