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

//! Best-effort fan-out of transaction lifecycle events.
//!
//! Subscribers are invoked synchronously before the mutating engine call
//! returns, so in-process listeners get at-least-once delivery and always
//! observe a consistent post-state. A failing subscriber is isolated: it
//! cannot block other subscribers and never rolls back the state change
//! that was already committed.

use crate::transaction::TransactionSnapshot;
use dashmap::DashMap;
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Event kind, encoded as the dotted wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    #[serde(rename = "transaction.created")]
    Created,
    #[serde(rename = "transaction.updated")]
    Updated,
}

/// Envelope handed to each subscriber.
///
/// Serializes to `{"type": "transaction.created" | "transaction.updated",
/// "transaction": {...}}` for the push-delivery collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub transaction: TransactionSnapshot,
}

type Callback = Arc<dyn Fn(&TransactionEvent) + Send + Sync>;

/// Handle returned by [`Notifier::subscribe`].
///
/// Unsubscribing is explicit; dropping the handle leaves the subscription
/// in place.
pub struct Subscription {
    id: u64,
    subscribers: Arc<DashMap<u64, Callback>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.subscribers.remove(&self.id);
    }
}

/// Dynamic subscriber registry with synchronous fan-out.
#[derive(Default)]
pub struct Notifier {
    subscribers: Arc<DashMap<u64, Callback>>,
    next_id: AtomicU64,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber and returns its unsubscribe handle.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TransactionEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, Arc::new(callback));
        Subscription {
            id,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Delivers the event to every subscriber.
    ///
    /// Callbacks run outside the registry's shard locks, so a subscriber may
    /// itself subscribe or unsubscribe. Panics are caught and logged; the
    /// remaining subscribers still receive the event.
    pub fn publish(&self, kind: EventKind, transaction: TransactionSnapshot) {
        let event = TransactionEvent { kind, transaction };
        let callbacks: Vec<Callback> = self
            .subscribers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                tracing::warn!(
                    tx_code = %event.transaction.tx_code,
                    "event subscriber panicked; continuing fan-out"
                );
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{TransactionId, TxCode};
    use crate::transaction::{SenderInfo, Transaction};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    fn snapshot() -> TransactionSnapshot {
        Transaction::new(
            TransactionId(1),
            TxCode::new("QJL7XK2M9P"),
            dec!(100.00),
            SenderInfo::default(),
        )
        .snapshot()
    }

    #[test]
    fn subscriber_receives_event() {
        let notifier = Notifier::new();
        let received: Arc<Mutex<Vec<TransactionEvent>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&received);
        let _sub = notifier.subscribe(move |event| sink.lock().push(event.clone()));

        notifier.publish(EventKind::Created, snapshot());

        let events = received.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Created);
        assert_eq!(events[0].transaction.tx_code, TxCode::new("QJL7XK2M9P"));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let notifier = Notifier::new();
        let received = Arc::new(Mutex::new(0usize));

        let sink = Arc::clone(&received);
        let sub = notifier.subscribe(move |_| *sink.lock() += 1);

        notifier.publish(EventKind::Created, snapshot());
        sub.unsubscribe();
        notifier.publish(EventKind::Updated, snapshot());

        assert_eq!(*received.lock(), 1);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let notifier = Notifier::new();
        let received = Arc::new(Mutex::new(0usize));

        let _bad = notifier.subscribe(|_| panic!("subscriber exploded"));
        let sink = Arc::clone(&received);
        let _good = notifier.subscribe(move |_| *sink.lock() += 1);

        notifier.publish(EventKind::Updated, snapshot());
        assert_eq!(*received.lock(), 1);
    }

    #[test]
    fn event_wire_shape() {
        let event = TransactionEvent {
            kind: EventKind::Created,
            transaction: snapshot(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "transaction.created");
        assert_eq!(json["transaction"]["tx_code"], "QJL7XK2M9P");
        assert_eq!(json["transaction"]["status"], "NOT_PROCESSED");
    }
}
