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

//! Reconciliation and fulfillment engine.
//!
//! The [`Engine`] is the central component: it owns the transaction records,
//! the payment-code dedup log, the operator-keyed session registry and the
//! inventory handle, and it publishes a lifecycle event after every
//! observable state change.
//!
//! # Concurrency
//!
//! Transaction records live in a [`DashMap`] and each record keeps its state
//! behind its own mutex, so mutations are serialized per transaction while
//! different transactions proceed in parallel. Locks are always taken in
//! session → transaction → inventory order.
//!
//! # Invariants
//!
//! - Payment codes are globally unique; a replayed notification is rejected.
//! - `0 <= amount_paid <= amount_expected` on every record at all times.
//! - A FULFILLED or CANCELLED record never changes again (except notes).
//! - Each operator has at most one active session; each transaction has at
//!   most one active session across all operators.
//! - Stock commits are all-or-nothing per session completion.

use crate::base::{OperatorId, SessionId, TransactionId, TxCode};
use crate::error::EngineError;
use crate::inventory::{Inventory, ProductRef, StockMovement};
use crate::notifier::{EventKind, Notifier, Subscription, TransactionEvent};
use crate::session::{LineItem, SessionRegistry, SessionSnapshot};
use crate::transaction::{OrderStatus, SenderInfo, Transaction, TransactionSnapshot};
use crate::tx_log::TxCodeLog;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of completing an issuance session: the closed session, the
/// updated transaction and the stock movements applied for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionReport {
    pub session: SessionSnapshot,
    pub transaction: TransactionSnapshot,
    pub stock_movements: Vec<StockMovement>,
    pub performed_by: String,
}

/// Central engine managing transactions, issuance sessions and inventory.
pub struct Engine {
    /// Transaction records indexed by internal ID.
    transactions: DashMap<TransactionId, Arc<Transaction>>,
    /// Payment-code dedup log.
    tx_log: TxCodeLog,
    /// Operator-keyed issuance sessions.
    sessions: SessionRegistry,
    /// Product store; injectable so several engines can share one.
    inventory: Arc<Inventory>,
    /// Lifecycle event fan-out.
    notifier: Notifier,
    next_transaction_id: AtomicU64,
    next_session_id: AtomicU64,
}

impl Engine {
    /// Creates an engine with its own empty inventory.
    pub fn new() -> Self {
        Self::with_inventory(Arc::new(Inventory::new()))
    }

    /// Creates an engine over an existing inventory.
    pub fn with_inventory(inventory: Arc<Inventory>) -> Self {
        Engine {
            transactions: DashMap::new(),
            tx_log: TxCodeLog::new(),
            sessions: SessionRegistry::new(),
            inventory,
            notifier: Notifier::new(),
            next_transaction_id: AtomicU64::new(1),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Registers a lifecycle event subscriber.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TransactionEvent) + Send + Sync + 'static,
    {
        self.notifier.subscribe(callback)
    }

    // === Transaction lifecycle ===

    /// Records an incoming payment notification as a new transaction in
    /// `NOT_PROCESSED` state and publishes `transaction.created`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::DuplicateTransaction`] - payment code already seen.
    /// - [`EngineError::InvalidAmount`] - negative expected amount.
    pub fn create_transaction(
        &self,
        tx_code: TxCode,
        amount_expected: Decimal,
        sender: SenderInfo,
    ) -> Result<TransactionSnapshot, EngineError> {
        if amount_expected < Decimal::ZERO {
            return Err(EngineError::InvalidAmount);
        }

        let id = TransactionId(self.next_transaction_id.fetch_add(1, Ordering::Relaxed));
        // Register the code first: the atomic check-and-insert is what
        // rejects a replayed notification.
        self.tx_log.register(tx_code.clone(), id)?;

        let transaction = Arc::new(Transaction::new(id, tx_code, amount_expected, sender));
        let snapshot = transaction.snapshot();
        self.transactions.insert(id, transaction);

        tracing::debug!(tx_code = %snapshot.tx_code, %id, "transaction created");
        self.notifier.publish(EventKind::Created, snapshot.clone());
        Ok(snapshot)
    }

    /// Snapshot of a transaction by internal ID.
    pub fn get(&self, id: TransactionId) -> Result<TransactionSnapshot, EngineError> {
        Ok(self.transaction(id)?.snapshot())
    }

    /// Snapshot of a transaction by payment code.
    pub fn get_by_code(&self, code: &TxCode) -> Result<TransactionSnapshot, EngineError> {
        let id = self.tx_log.resolve(code).ok_or(EngineError::TransactionNotFound)?;
        self.get(id)
    }

    /// Snapshots of all transactions, ordered by internal ID.
    pub fn transactions(&self) -> Vec<TransactionSnapshot> {
        let mut all: Vec<TransactionSnapshot> =
            self.transactions.iter().map(|entry| entry.value().snapshot()).collect();
        all.sort_by_key(|snapshot| snapshot.id.0);
        all
    }

    /// Explicit operator-requested status change, validated against the
    /// transition table. Publishes `transaction.updated` on success.
    pub fn change_status(
        &self,
        id: TransactionId,
        target: OrderStatus,
    ) -> Result<TransactionSnapshot, EngineError> {
        let snapshot = self.transaction(id)?.change_status(target)?;
        tracing::debug!(tx_code = %snapshot.tx_code, status = ?snapshot.status, "status changed");
        self.notifier.publish(EventKind::Updated, snapshot.clone());
        Ok(snapshot)
    }

    /// Records a payment amount against the transaction (manual payment
    /// entry). The status is derived through the amount ledger: a full
    /// payment fulfills and locks, a partial one marks partial fulfillment.
    pub fn record_payment(
        &self,
        id: TransactionId,
        amount_paid: Decimal,
    ) -> Result<TransactionSnapshot, EngineError> {
        let snapshot = self.transaction(id)?.set_amount_paid(amount_paid)?;
        tracing::debug!(
            tx_code = %snapshot.tx_code,
            amount_paid = %snapshot.amount_paid,
            status = ?snapshot.status,
            "payment recorded"
        );
        self.notifier.publish(EventKind::Updated, snapshot.clone());
        Ok(snapshot)
    }

    /// Replaces the notes text. Notes are audit metadata and stay editable
    /// on locked transactions.
    pub fn update_notes(
        &self,
        id: TransactionId,
        notes: impl Into<String>,
    ) -> Result<TransactionSnapshot, EngineError> {
        let snapshot = self.transaction(id)?.set_notes(notes.into());
        self.notifier.publish(EventKind::Updated, snapshot.clone());
        Ok(snapshot)
    }

    // === Issuance sessions ===

    /// Activates an issuance session binding `operator` to the transaction.
    ///
    /// A `NOT_PROCESSED` transaction moves to `PROCESSING` as a side effect
    /// (publishing `transaction.updated`).
    ///
    /// # Errors
    ///
    /// - [`EngineError::TransactionLocked`] - target is FULFILLED/CANCELLED.
    /// - [`EngineError::SessionConflict`] - operator already has an active
    ///   session, or another session is active on this transaction.
    pub fn activate_session(
        &self,
        transaction_id: TransactionId,
        operator: OperatorId,
    ) -> Result<SessionSnapshot, EngineError> {
        let transaction = self.transaction(transaction_id)?;
        if transaction.is_locked() {
            return Err(EngineError::TransactionLocked);
        }

        let id = SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed));
        let session = self.sessions.activate(id, transaction_id, operator)?;

        // The record may have been locked between the check and the claim;
        // re-check now that the transaction slot is ours.
        if transaction.is_locked() {
            session.cancel(None).ok();
            self.sessions.release(&session);
            return Err(EngineError::TransactionLocked);
        }

        if transaction.status() == OrderStatus::NotProcessed {
            if let Ok(snapshot) = transaction.change_status(OrderStatus::Processing) {
                self.notifier.publish(EventKind::Updated, snapshot);
            }
        }

        let snapshot = session.snapshot();
        tracing::debug!(session = %snapshot.id, tx = %transaction_id, "issuance activated");
        Ok(snapshot)
    }

    /// Adds a scanned product to the session.
    ///
    /// The stock check here is advisory (early feedback for the operator);
    /// the authoritative check runs again at completion. The amount check is
    /// binding: a line that would push committed + staged fulfillment above
    /// `amount_expected` is rejected whole.
    pub fn add_line_item(
        &self,
        session_id: SessionId,
        product_ref: &ProductRef,
        quantity: i64,
    ) -> Result<(LineItem, SessionSnapshot), EngineError> {
        if quantity <= 0 {
            return Err(EngineError::InvalidQuantity);
        }

        let session = self.sessions.get(session_id)?;
        let transaction = self.transaction(session.transaction_id())?;

        let product = self.inventory.resolve(product_ref)?;
        self.inventory.reserve_check(&product.code, quantity)?;

        let item = LineItem::from_product(&product, quantity, session.operator().as_str());
        let line = item.clone();
        let snapshot =
            session.add_item_with(item, |staged_total| transaction.check_fulfillment(staged_total))?;

        tracing::debug!(
            session = %session_id,
            product = %line.product_code,
            quantity,
            staged_total = %snapshot.amount_fulfilled,
            "line item added"
        );
        Ok((line, snapshot))
    }

    /// Completes the session: decrements stock for every line item
    /// (all-or-nothing, re-validated against current stock), commits the
    /// staged totals into the transaction and closes the session.
    /// Irreversible. Publishes `transaction.updated`.
    pub fn complete_session(
        &self,
        session_id: SessionId,
        performed_by: &str,
    ) -> Result<CompletionReport, EngineError> {
        let session = self.sessions.get(session_id)?;
        let transaction = self.transaction(session.transaction_id())?;
        let inventory = Arc::clone(&self.inventory);

        let ((movements, tx_snapshot), session_snapshot) = session.complete_with(|data| {
            let (total, cost, pv) = data.totals();
            let items = data.line_items();
            // The transaction lock is held across the stock commit: a
            // failing commit leaves the record untouched, and once stock
            // moved the record mutation cannot fail anymore.
            transaction.apply_fulfillment_with(total, cost, pv, items, || {
                inventory.commit(items)
            })
        })?;

        self.sessions.release(&session);
        tracing::debug!(
            session = %session_id,
            tx_code = %tx_snapshot.tx_code,
            amount_fulfilled = %tx_snapshot.amount_fulfilled,
            status = ?tx_snapshot.status,
            "issuance completed"
        );
        self.notifier.publish(EventKind::Updated, tx_snapshot.clone());

        Ok(CompletionReport {
            session: session_snapshot,
            transaction: tx_snapshot,
            stock_movements: movements,
            performed_by: performed_by.to_string(),
        })
    }

    /// Cancels the session, discarding its line items. Stock and transaction
    /// totals are untouched; when a reason is given it is appended to the
    /// transaction notes (notes edits are lock-exempt).
    ///
    /// Idempotent on an already-cancelled session; cancelling a completed
    /// session fails with [`EngineError::SessionAlreadyClosed`].
    pub fn cancel_session(
        &self,
        session_id: SessionId,
        reason: Option<&str>,
    ) -> Result<SessionSnapshot, EngineError> {
        let session = self.sessions.get(session_id)?;
        let (changed, snapshot) = session.cancel(reason.map(str::to_string))?;
        if !changed {
            return Ok(snapshot);
        }

        self.sessions.release(&session);
        tracing::debug!(session = %session_id, "issuance cancelled");

        if let Some(reason) = reason {
            if let Ok(transaction) = self.transaction(snapshot.transaction_id) {
                let tx_snapshot =
                    transaction.append_note(&format!("[Issuance cancelled: {reason}]"));
                self.notifier.publish(EventKind::Updated, tx_snapshot);
            }
        }
        Ok(snapshot)
    }

    /// The operator's active session, if any. No side effects.
    pub fn current_session(&self, operator: &OperatorId) -> Option<SessionSnapshot> {
        self.sessions.current(operator).map(|session| session.snapshot())
    }

    fn transaction(&self, id: TransactionId) -> Result<Arc<Transaction>, EngineError> {
        self.transactions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EngineError::TransactionNotFound)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
