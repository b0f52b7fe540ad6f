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

//! Issuance sessions: transient staging areas for scanning products
//! against one transaction before committing the fulfillment atomically.
//!
//! A session follows a small state machine:
//! - `Active` → `Completed` (via complete)
//! - `Active` → `Cancelled` (via cancel)
//!
//! Both end states are terminal. Cancelling an already-cancelled session is
//! an idempotent no-op; any other operation on a closed session fails with
//! [`EngineError::SessionAlreadyClosed`].
//!
//! The registry keys active sessions by operator, so different operators can
//! run concurrent sessions while each transaction still has at most one.

use crate::base::{OperatorId, ProductCode, SessionId, TransactionId};
use crate::error::EngineError;
use crate::inventory::Product;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle state of an issuance session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    #[inline]
    pub fn is_closed(self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

/// One scanned product entry within a fulfillment.
///
/// Price, cost and PV are snapshots captured at scan time; the line is
/// never mutated afterwards. Cancelled sessions drop their lines wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_code: ProductCode,
    pub product_name: String,
    pub sku: String,
    pub sku_name: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub unit_cost: Decimal,
    pub unit_pv: Decimal,
    pub line_total: Decimal,
    pub line_cost: Decimal,
    pub line_pv: Decimal,
    pub scanned_at: DateTime<Utc>,
    pub scanned_by: String,
}

impl LineItem {
    /// Builds a line item from a product snapshot, freezing price/cost/PV.
    pub(crate) fn from_product(product: &Product, quantity: i64, scanned_by: &str) -> Self {
        let qty = Decimal::from(quantity);
        Self {
            product_code: product.code.clone(),
            product_name: product.name.clone(),
            sku: product.sku.clone(),
            sku_name: product.sku_name.clone(),
            quantity,
            unit_price: product.unit_price,
            unit_cost: product.unit_cost,
            unit_pv: product.unit_pv,
            line_total: product.unit_price * qty,
            line_cost: product.unit_cost * qty,
            line_pv: product.unit_pv * qty,
            scanned_at: Utc::now(),
            scanned_by: scanned_by.to_string(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct SessionData {
    id: SessionId,
    transaction_id: TransactionId,
    operator: OperatorId,
    status: SessionStatus,
    line_items: Vec<LineItem>,
    amount_fulfilled: Decimal,
    total_cost: Decimal,
    total_pv: Decimal,
    activated_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
}

impl SessionData {
    fn add_item(&mut self, item: LineItem) -> Result<(), EngineError> {
        if self.status.is_closed() {
            return Err(EngineError::SessionAlreadyClosed);
        }
        self.amount_fulfilled += item.line_total;
        self.total_cost += item.line_cost;
        self.total_pv += item.line_pv;
        self.line_items.push(item);
        Ok(())
    }

    fn mark_completed(&mut self) -> Result<(), EngineError> {
        if self.status.is_closed() {
            return Err(EngineError::SessionAlreadyClosed);
        }
        self.status = SessionStatus::Completed;
        self.closed_at = Some(Utc::now());
        Ok(())
    }

    /// Cancel is idempotent on an already-cancelled session; completing
    /// and then cancelling is an error.
    fn mark_cancelled(&mut self, reason: Option<String>) -> Result<bool, EngineError> {
        match self.status {
            SessionStatus::Cancelled => Ok(false),
            SessionStatus::Completed => Err(EngineError::SessionAlreadyClosed),
            SessionStatus::Active => {
                self.status = SessionStatus::Cancelled;
                self.cancel_reason = reason;
                self.line_items.clear();
                self.amount_fulfilled = Decimal::ZERO;
                self.total_cost = Decimal::ZERO;
                self.total_pv = Decimal::ZERO;
                self.closed_at = Some(Utc::now());
                Ok(true)
            }
        }
    }
}

/// A scanning session staging line items against one transaction.
///
/// Interior state sits behind a [`Mutex`] so concurrent reads (the scanner
/// UI polling `current`) see consistent totals while items are added.
#[derive(Debug)]
pub struct IssuanceSession {
    inner: Mutex<SessionData>,
}

impl IssuanceSession {
    pub(crate) fn new(id: SessionId, transaction_id: TransactionId, operator: OperatorId) -> Self {
        Self {
            inner: Mutex::new(SessionData {
                id,
                transaction_id,
                operator,
                status: SessionStatus::Active,
                line_items: Vec::new(),
                amount_fulfilled: Decimal::ZERO,
                total_cost: Decimal::ZERO,
                total_pv: Decimal::ZERO,
                activated_at: Utc::now(),
                closed_at: None,
                cancel_reason: None,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.lock().id
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.inner.lock().transaction_id
    }

    pub fn operator(&self) -> OperatorId {
        self.inner.lock().operator.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status
    }

    pub fn staged_total(&self) -> Decimal {
        self.inner.lock().amount_fulfilled
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let data = self.inner.lock();
        SessionSnapshot::from_data(&data)
    }

    pub(crate) fn add_item(&self, item: LineItem) -> Result<SessionSnapshot, EngineError> {
        self.add_item_with(item, |_| Ok(()))
    }

    /// Adds a line item after running `check` against the staged total the
    /// session would have with the item included. Both run under the session
    /// lock, so concurrent adds cannot slip past the amount bound together.
    pub(crate) fn add_item_with(
        &self,
        item: LineItem,
        check: impl FnOnce(Decimal) -> Result<(), EngineError>,
    ) -> Result<SessionSnapshot, EngineError> {
        let mut data = self.inner.lock();
        if data.status.is_closed() {
            return Err(EngineError::SessionAlreadyClosed);
        }
        check(data.amount_fulfilled + item.line_total)?;
        data.add_item(item)?;
        Ok(SessionSnapshot::from_data(&data))
    }

    /// Runs `commit` while holding the session lock, then marks the session
    /// completed. `commit` receives the staged items and totals; if it fails
    /// the session stays active and untouched.
    pub(crate) fn complete_with<T>(
        &self,
        commit: impl FnOnce(&SessionData) -> Result<T, EngineError>,
    ) -> Result<(T, SessionSnapshot), EngineError> {
        let mut data = self.inner.lock();
        if data.status.is_closed() {
            return Err(EngineError::SessionAlreadyClosed);
        }
        if data.line_items.is_empty() {
            return Err(EngineError::EmptySession);
        }
        let out = commit(&data)?;
        data.mark_completed()?;
        Ok((out, SessionSnapshot::from_data(&data)))
    }

    /// Returns `(changed, snapshot)`: `changed` is false when the session
    /// was already cancelled (idempotent path).
    pub(crate) fn cancel(
        &self,
        reason: Option<String>,
    ) -> Result<(bool, SessionSnapshot), EngineError> {
        let mut data = self.inner.lock();
        let changed = data.mark_cancelled(reason)?;
        Ok((changed, SessionSnapshot::from_data(&data)))
    }
}

impl SessionData {
    pub(crate) fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub(crate) fn totals(&self) -> (Decimal, Decimal, Decimal) {
        (self.amount_fulfilled, self.total_cost, self.total_pv)
    }
}

/// Serializable point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub transaction_id: TransactionId,
    pub operator: OperatorId,
    pub status: SessionStatus,
    pub line_items: Vec<LineItem>,
    pub amount_fulfilled: Decimal,
    pub total_cost: Decimal,
    pub total_pv: Decimal,
    pub activated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
}

impl SessionSnapshot {
    fn from_data(data: &SessionData) -> Self {
        Self {
            id: data.id,
            transaction_id: data.transaction_id,
            operator: data.operator.clone(),
            status: data.status,
            line_items: data.line_items.clone(),
            amount_fulfilled: data.amount_fulfilled,
            total_cost: data.total_cost,
            total_pv: data.total_pv,
            activated_at: data.activated_at,
            closed_at: data.closed_at,
            cancel_reason: data.cancel_reason.clone(),
        }
    }
}

/// Registry of issuance sessions, keyed by operator.
///
/// Holds two claim maps alongside the session store: one active slot per
/// operator and one per transaction. Claims are taken through the DashMap
/// entry API so two racing activations cannot both win.
#[derive(Debug, Default)]
pub(crate) struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<IssuanceSession>>,
    active_by_operator: DashMap<OperatorId, SessionId>,
    active_by_transaction: DashMap<TransactionId, SessionId>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Claims the operator and transaction slots and registers a new active
    /// session. Either slot being taken fails with `SessionConflict` and
    /// leaves the registry unchanged.
    pub(crate) fn activate(
        &self,
        id: SessionId,
        transaction_id: TransactionId,
        operator: OperatorId,
    ) -> Result<Arc<IssuanceSession>, EngineError> {
        match self.active_by_operator.entry(operator.clone()) {
            Entry::Occupied(_) => return Err(EngineError::SessionConflict),
            Entry::Vacant(slot) => {
                match self.active_by_transaction.entry(transaction_id) {
                    Entry::Occupied(_) => {
                        // Transaction already claimed by another operator.
                        return Err(EngineError::SessionConflict);
                    }
                    Entry::Vacant(tx_slot) => {
                        tx_slot.insert(id);
                    }
                }
                slot.insert(id);
            }
        }

        let session = Arc::new(IssuanceSession::new(id, transaction_id, operator));
        self.sessions.insert(id, Arc::clone(&session));
        Ok(session)
    }

    pub(crate) fn get(&self, id: SessionId) -> Result<Arc<IssuanceSession>, EngineError> {
        self.sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EngineError::SessionNotFound)
    }

    /// Active session for the operator, if any.
    pub(crate) fn current(&self, operator: &OperatorId) -> Option<Arc<IssuanceSession>> {
        let id = *self.active_by_operator.get(operator)?;
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Releases the operator and transaction claims after a session closed.
    /// Closed sessions stay in the store so terminal-state queries (and the
    /// idempotent cancel path) keep working.
    pub(crate) fn release(&self, session: &IssuanceSession) {
        let id = session.id();
        self.active_by_operator
            .remove_if(&session.operator(), |_, active| *active == id);
        self.active_by_transaction
            .remove_if(&session.transaction_id(), |_, active| *active == id);
    }
}
