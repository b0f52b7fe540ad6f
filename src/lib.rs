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

//! # Payfill
//!
//! This library provides a payment reconciliation and fulfillment engine:
//! incoming payment notifications become transaction records, operators
//! reconcile amounts against them, and issuance sessions stage product
//! scans that commit atomically against transaction and inventory state.
//!
//! ## Core Components
//!
//! - [`Engine`]: Central facade managing transactions, sessions and inventory
//! - [`Transaction`]: A payment record with its amount ledger and status machine
//! - [`IssuanceSession`]: Per-operator staging area for scanned products
//! - [`Inventory`]: Product store with all-or-nothing stock commits
//! - [`Notifier`]: Synchronous lifecycle event fan-out
//! - [`EngineError`]: Error taxonomy for every rejected operation
//!
//! ## Example
//!
//! ```
//! use payfill_rs::{Engine, OrderStatus, SenderInfo, TxCode};
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::new();
//!
//! // A payment notification arrives.
//! let tx = engine
//!     .create_transaction(TxCode::new("QJL7XK2M9P"), dec!(3000.00), SenderInfo::default())
//!     .unwrap();
//! assert_eq!(tx.status, OrderStatus::NotProcessed);
//!
//! // A partial manual payment entry marks partial fulfillment.
//! let tx = engine.record_payment(tx.id, dec!(1000.00)).unwrap();
//! assert_eq!(tx.status, OrderStatus::PartiallyFulfilled);
//! assert_eq!(tx.remaining_amount, dec!(2000.00));
//! ```
//!
//! ## Thread Safety
//!
//! Every component is safe to share across threads. Each transaction and
//! session serializes its own mutations behind a mutex while unrelated
//! records proceed in parallel; registries use lock-free concurrent maps.

mod base;
mod engine;
pub mod error;
mod inventory;
mod ledger;
mod notifier;
pub mod session;
mod transaction;
mod tx_log;

pub use base::{OperatorId, ProductCode, SessionId, TransactionId, TxCode};
pub use engine::{CompletionReport, Engine};
pub use error::EngineError;
pub use inventory::{Inventory, Product, ProductRef, StockMovement};
pub use ledger::{AMOUNT_SCALE, remaining_amount, rescale};
pub use notifier::{EventKind, Notifier, Subscription, TransactionEvent};
pub use session::{IssuanceSession, LineItem, SessionSnapshot, SessionStatus};
pub use transaction::{OrderStatus, SenderInfo, Transaction, TransactionSnapshot};
