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

//! Transaction records and their status state machine.
//!
//! Implemented State Machine
//!
//  NotProcessed ──► Processing ──► PartiallyFulfilled ──► Fulfilled (locked)
//       │               │                 │
//       └───────────────┴─────────────────┴──► Cancelled (locked)
//
//! Once a transaction reaches `Fulfilled` or `Cancelled` it is locked:
//! every field except `notes` becomes permanently immutable. The lock is
//! what prevents an already-used payment from fulfilling a second order.

use crate::base::{TransactionId, TxCode};
use crate::error::EngineError;
use crate::ledger;
use crate::session::LineItem;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Fulfillment status of a payment transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Payment received, no fulfillment started yet.
    NotProcessed,
    /// An operator is working the order.
    Processing,
    /// Part of the expected amount has been matched to goods.
    PartiallyFulfilled,
    /// Fully matched. Terminal, locked.
    Fulfilled,
    /// Abandoned or refunded. Terminal, locked.
    Cancelled,
}

impl OrderStatus {
    /// Locked statuses permit no further mutation except notes.
    #[inline]
    pub fn is_locked(self) -> bool {
        matches!(self, OrderStatus::Fulfilled | OrderStatus::Cancelled)
    }

    /// Whether an explicit status change from `self` to `target` is legal.
    ///
    /// `target == self` is a permitted no-op. Locked states allow nothing.
    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        if self == target {
            return true;
        }
        match self {
            OrderStatus::NotProcessed => {
                matches!(target, OrderStatus::Processing | OrderStatus::Cancelled)
            }
            OrderStatus::Processing => matches!(
                target,
                OrderStatus::PartiallyFulfilled | OrderStatus::Fulfilled | OrderStatus::Cancelled
            ),
            OrderStatus::PartiallyFulfilled => {
                matches!(target, OrderStatus::Fulfilled | OrderStatus::Cancelled)
            }
            OrderStatus::Fulfilled | OrderStatus::Cancelled => false,
        }
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::NotProcessed
    }
}

/// Sender details carried over from the payment notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    pub name: String,
    pub phone: String,
}

#[derive(Debug)]
struct TransactionData {
    id: TransactionId,
    tx_code: TxCode,
    amount_expected: Decimal,
    amount_paid: Decimal,
    amount_fulfilled: Decimal,
    total_cost: Decimal,
    total_pv: Decimal,
    status: OrderStatus,
    notes: String,
    sender: SenderInfo,
    /// Committed fulfillment audit trail, append-only.
    line_items: Vec<LineItem>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionData {
    fn new(id: TransactionId, tx_code: TxCode, amount_expected: Decimal, sender: SenderInfo) -> Self {
        let now = Utc::now();
        Self {
            id,
            tx_code,
            amount_expected: ledger::rescale(amount_expected),
            amount_paid: Decimal::ZERO,
            amount_fulfilled: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            total_pv: Decimal::ZERO,
            status: OrderStatus::NotProcessed,
            notes: String::new(),
            sender,
            line_items: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn remaining_amount(&self) -> Decimal {
        ledger::remaining_amount(self.amount_expected, self.amount_paid)
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.amount_paid >= Decimal::ZERO && self.amount_paid <= self.amount_expected,
            "Invariant violated: amount_paid {} out of [0, {}]",
            self.amount_paid,
            self.amount_expected
        );
        debug_assert!(
            self.amount_fulfilled >= Decimal::ZERO,
            "Invariant violated: amount_fulfilled went negative: {}",
            self.amount_fulfilled
        );
    }

    /// Explicit operator-requested status change, validated against the
    /// transition table.
    fn change_status(&mut self, target: OrderStatus) -> Result<(), EngineError> {
        if self.status.is_locked() {
            return Err(EngineError::TransactionLocked);
        }
        if !self.status.can_transition_to(target) {
            return Err(EngineError::InvalidStatusTransition {
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Sets the paid amount directly (manual payment entry), deriving the
    /// implied status through the amount ledger.
    fn set_amount_paid(&mut self, paid: Decimal) -> Result<(), EngineError> {
        if self.status.is_locked() {
            return Err(EngineError::TransactionLocked);
        }
        let paid = ledger::rescale(paid);
        // Monotone while unlocked: payments are never un-received.
        if paid < self.amount_paid {
            return Err(EngineError::InvalidAmount);
        }
        ledger::validate_amounts(self.amount_expected, paid)?;
        self.amount_paid = paid;
        self.status = ledger::derive_status(self.status, self.amount_expected, self.amount_paid);
        self.updated_at = Utc::now();
        self.assert_invariants();
        Ok(())
    }

    /// Validation half of a fulfillment commit: lock and amount bounds.
    fn validate_fulfillment(&self, total: Decimal) -> Result<(), EngineError> {
        if self.status.is_locked() {
            return Err(EngineError::TransactionLocked);
        }
        let new_paid = self.amount_paid + total;
        if new_paid > self.amount_expected {
            return Err(EngineError::InsufficientAmount {
                requested: total,
                remaining: self.remaining_amount(),
            });
        }
        ledger::validate_amounts(self.amount_expected, new_paid)
    }

    /// Mutation half of a fulfillment commit. Callers must have run
    /// [`Self::validate_fulfillment`] under the same lock.
    fn apply_fulfillment_unchecked(
        &mut self,
        total: Decimal,
        cost: Decimal,
        pv: Decimal,
        items: &[LineItem],
    ) {
        self.amount_paid += total;
        self.amount_fulfilled += total;
        self.total_cost += cost;
        self.total_pv += pv;
        self.line_items.extend_from_slice(items);
        self.status = ledger::derive_status(self.status, self.amount_expected, self.amount_paid);
        self.updated_at = Utc::now();
        self.assert_invariants();
    }

    /// Notes are audit metadata: editable even on locked records.
    fn set_notes(&mut self, notes: String) {
        self.notes = notes;
        self.updated_at = Utc::now();
    }

    fn append_note(&mut self, note: &str) {
        if self.notes.is_empty() {
            self.notes = note.to_string();
        } else {
            self.notes.push('\n');
            self.notes.push_str(note);
        }
        self.updated_at = Utc::now();
    }
}

/// A recorded payment transaction awaiting fulfillment.
///
/// Interior state sits behind a [`Mutex`], so every validate-then-write
/// sequence is serialized per transaction. Two concurrent completions
/// against the same record cannot both observe it unlocked.
#[derive(Debug)]
pub struct Transaction {
    inner: Mutex<TransactionData>,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        tx_code: TxCode,
        amount_expected: Decimal,
        sender: SenderInfo,
    ) -> Self {
        Self {
            inner: Mutex::new(TransactionData::new(id, tx_code, amount_expected, sender)),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.inner.lock().id
    }

    pub fn tx_code(&self) -> TxCode {
        self.inner.lock().tx_code.clone()
    }

    pub fn status(&self) -> OrderStatus {
        self.inner.lock().status
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock().status.is_locked()
    }

    pub fn amount_expected(&self) -> Decimal {
        self.inner.lock().amount_expected
    }

    pub fn amount_paid(&self) -> Decimal {
        self.inner.lock().amount_paid
    }

    pub fn amount_fulfilled(&self) -> Decimal {
        self.inner.lock().amount_fulfilled
    }

    pub fn remaining_amount(&self) -> Decimal {
        self.inner.lock().remaining_amount()
    }

    /// Consistent point-in-time snapshot, taken under the record lock.
    pub fn snapshot(&self) -> TransactionSnapshot {
        let data = self.inner.lock();
        TransactionSnapshot::from_data(&data)
    }

    pub(crate) fn change_status(
        &self,
        target: OrderStatus,
    ) -> Result<TransactionSnapshot, EngineError> {
        let mut data = self.inner.lock();
        data.change_status(target)?;
        Ok(TransactionSnapshot::from_data(&data))
    }

    pub(crate) fn set_amount_paid(
        &self,
        paid: Decimal,
    ) -> Result<TransactionSnapshot, EngineError> {
        let mut data = self.inner.lock();
        data.set_amount_paid(paid)?;
        Ok(TransactionSnapshot::from_data(&data))
    }

    /// Commits a completed issuance session into the record: increments
    /// paid/fulfilled totals, appends the audit line items and derives the
    /// new status. All validation happens before any field changes.
    pub(crate) fn apply_fulfillment(
        &self,
        total: Decimal,
        cost: Decimal,
        pv: Decimal,
        items: &[LineItem],
    ) -> Result<TransactionSnapshot, EngineError> {
        self.apply_fulfillment_with(total, cost, pv, items, || Ok(()))
            .map(|((), snapshot)| snapshot)
    }

    /// Like [`Self::apply_fulfillment`], but runs `commit` between the
    /// validation and the mutation while holding the record lock. The engine
    /// uses this to decrement stock: if the stock commit fails, the record
    /// is untouched; once it succeeds, the record mutation cannot fail.
    pub(crate) fn apply_fulfillment_with<T>(
        &self,
        total: Decimal,
        cost: Decimal,
        pv: Decimal,
        items: &[LineItem],
        commit: impl FnOnce() -> Result<T, EngineError>,
    ) -> Result<(T, TransactionSnapshot), EngineError> {
        let mut data = self.inner.lock();
        data.validate_fulfillment(total)?;
        let out = commit()?;
        data.apply_fulfillment_unchecked(total, cost, pv, items);
        Ok((out, TransactionSnapshot::from_data(&data)))
    }

    /// Validates (without applying) that a fulfillment of `total` fits the
    /// record. Used for early feedback while a session stages line items.
    pub(crate) fn check_fulfillment(&self, total: Decimal) -> Result<(), EngineError> {
        self.inner.lock().validate_fulfillment(total)
    }

    pub(crate) fn set_notes(&self, notes: String) -> TransactionSnapshot {
        let mut data = self.inner.lock();
        data.set_notes(notes);
        TransactionSnapshot::from_data(&data)
    }

    pub(crate) fn append_note(&self, note: &str) -> TransactionSnapshot {
        let mut data = self.inner.lock();
        data.append_note(note);
        TransactionSnapshot::from_data(&data)
    }
}

/// Serializable point-in-time view of a transaction: the wire shape
/// published to event subscribers and returned by the engine API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionSnapshot {
    pub id: TransactionId,
    pub tx_code: TxCode,
    pub amount_expected: Decimal,
    pub amount_paid: Decimal,
    pub amount_fulfilled: Decimal,
    pub total_cost: Decimal,
    pub total_pv: Decimal,
    pub remaining_amount: Decimal,
    pub is_locked: bool,
    pub status: OrderStatus,
    pub notes: String,
    pub sender: SenderInfo,
    pub line_items: Vec<LineItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionSnapshot {
    fn from_data(data: &TransactionData) -> Self {
        Self {
            id: data.id,
            tx_code: data.tx_code.clone(),
            amount_expected: data.amount_expected,
            amount_paid: data.amount_paid,
            amount_fulfilled: data.amount_fulfilled,
            total_cost: data.total_cost,
            total_pv: data.total_pv,
            remaining_amount: data.remaining_amount(),
            is_locked: data.status.is_locked(),
            status: data.status,
            notes: data.notes.clone(),
            sender: data.sender.clone(),
            line_items: data.line_items.clone(),
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }
}
