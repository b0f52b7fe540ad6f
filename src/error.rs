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

//! Error types for transaction and issuance processing.

use crate::transaction::OrderStatus;
use rust_decimal::Decimal;
use thiserror::Error;

/// Engine processing errors.
///
/// Every variant is recoverable and surfaced synchronously to the caller.
/// The engine guarantees that on any error the stored state is unchanged:
/// validation fully precedes mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Attempted mutation on a FULFILLED or CANCELLED transaction
    #[error("transaction is locked and cannot be modified")]
    TransactionLocked,

    /// Requested status jump is not in the transition table
    #[error("cannot transition from {from:?} to {to:?}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    /// Amount is negative, or paid would exceed expected on a direct update
    #[error("invalid amount (must satisfy 0 <= paid <= expected)")]
    InvalidAmount,

    /// Adding the line item would push fulfillment above the expected amount
    #[error("insufficient amount: requested {requested} exceeds remaining {remaining}")]
    InsufficientAmount { requested: Decimal, remaining: Decimal },

    /// Requested quantity exceeds current available stock
    #[error("insufficient stock: available {available}, requested {requested}")]
    InsufficientStock { available: i64, requested: i64 },

    /// Quantity is zero or negative
    #[error("invalid quantity (must be positive)")]
    InvalidQuantity,

    /// Product reference could not be resolved (unknown or inactive)
    #[error("product not found or inactive")]
    ProductNotFound,

    /// Another issuance session is already active for this operator or
    /// for the target transaction
    #[error("another issuance session is already active")]
    SessionConflict,

    /// Completing a session with zero line items
    #[error("cannot complete an empty issuance session")]
    EmptySession,

    /// Operation on a session that is already completed or cancelled
    #[error("issuance session is already closed")]
    SessionAlreadyClosed,

    /// A transaction with this payment code already exists
    #[error("duplicate transaction code")]
    DuplicateTransaction,

    /// Referenced transaction ID does not exist
    #[error("transaction not found")]
    TransactionNotFound,

    /// Referenced session ID does not exist
    #[error("issuance session not found")]
    SessionNotFound,
}
