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

//! Engine public API integration tests: full reconciliation and
//! issuance flows from payment notification to fulfillment.

use payfill_rs::{
    Engine, EngineError, OperatorId, OrderStatus, Product, ProductCode, ProductRef, SenderInfo,
    SessionStatus, TransactionSnapshot, TxCode,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn product(code: &str, price: Decimal, stock: i64) -> Product {
    Product::new(
        ProductCode::new(code),
        code,
        code,
        "unit",
        price,
        price * dec!(0.70),
        dec!(10.00),
        stock,
    )
}

fn seeded_engine() -> Engine {
    let engine = Engine::new();
    engine.inventory().upsert(product("AP004E", dec!(2970.00), 50));
    engine.inventory().upsert(product("CF001", dec!(1500.00), 5));
    engine
}

fn notify(engine: &Engine, code: &str, expected: Decimal) -> TransactionSnapshot {
    engine
        .create_transaction(
            TxCode::new(code),
            expected,
            SenderInfo {
                name: "JOHN DOE".to_string(),
                phone: "255700000001".to_string(),
            },
        )
        .unwrap()
}

fn code_ref(code: &str) -> ProductRef {
    ProductRef::Code(ProductCode::new(code))
}

#[test]
fn notification_creates_not_processed_transaction() {
    let engine = seeded_engine();
    let tx = notify(&engine, "QJL7XK2M9P", dec!(3000.00));

    assert_eq!(tx.status, OrderStatus::NotProcessed);
    assert_eq!(tx.amount_expected, dec!(3000.00));
    assert_eq!(tx.remaining_amount, dec!(3000.00));
    assert_eq!(tx.sender.name, "JOHN DOE");
}

#[test]
fn replayed_notification_rejected() {
    let engine = seeded_engine();
    notify(&engine, "QJL7XK2M9P", dec!(3000.00));

    let result = engine.create_transaction(
        TxCode::new("QJL7XK2M9P"),
        dec!(3000.00),
        SenderInfo::default(),
    );
    assert_eq!(result, Err(EngineError::DuplicateTransaction));
    assert_eq!(engine.transactions().len(), 1);
}

#[test]
fn exact_issuance_fulfills_and_locks() {
    let engine = seeded_engine();
    let tx = notify(&engine, "TX1", dec!(5940.00));

    let session = engine
        .activate_session(tx.id, OperatorId::new("op-1"))
        .unwrap();
    engine
        .add_line_item(session.id, &code_ref("AP004E"), 2)
        .unwrap();

    let report = engine.complete_session(session.id, "op-1").unwrap();

    assert_eq!(report.transaction.status, OrderStatus::Fulfilled);
    assert!(report.transaction.is_locked);
    assert_eq!(report.transaction.amount_fulfilled, dec!(5940.00));
    assert_eq!(report.transaction.remaining_amount, dec!(0.00));
    assert_eq!(report.session.status, SessionStatus::Completed);
    assert_eq!(report.performed_by, "op-1");

    // Stock decremented by the committed quantity.
    assert_eq!(
        engine.inventory().available(&ProductCode::new("AP004E")),
        Some(48)
    );
    assert_eq!(report.stock_movements.len(), 1);
    assert_eq!(report.stock_movements[0].quantity_change, -2);
}

#[test]
fn partial_issuance_leaves_remainder_open() {
    let engine = seeded_engine();
    let tx = notify(&engine, "TX1", dec!(5000.00));

    let session = engine
        .activate_session(tx.id, OperatorId::new("op-1"))
        .unwrap();
    engine
        .add_line_item(session.id, &code_ref("AP004E"), 1)
        .unwrap();
    let report = engine.complete_session(session.id, "op-1").unwrap();

    assert_eq!(report.transaction.status, OrderStatus::PartiallyFulfilled);
    assert!(!report.transaction.is_locked);
    assert_eq!(report.transaction.remaining_amount, dec!(2030.00));

    // Remainder can be fulfilled by a second session.
    let second = engine
        .activate_session(tx.id, OperatorId::new("op-1"))
        .unwrap();
    engine
        .add_line_item(second.id, &code_ref("CF001"), 1)
        .unwrap();
    let report = engine.complete_session(second.id, "op-1").unwrap();
    assert_eq!(report.transaction.remaining_amount, dec!(530.00));
    assert_eq!(report.transaction.line_items.len(), 2);
}

#[test]
fn line_over_remaining_amount_rejected_whole() {
    let engine = seeded_engine();
    let tx = notify(&engine, "TX1", dec!(3000.00));

    let session = engine
        .activate_session(tx.id, OperatorId::new("op-1"))
        .unwrap();

    // 2 x 2970.00 exceeds expected; the whole line must be refused.
    let result = engine.add_line_item(session.id, &code_ref("AP004E"), 2);
    assert!(matches!(
        result,
        Err(EngineError::InsufficientAmount { .. })
    ));

    // The session stays usable for a line that fits.
    let (_, snapshot) = engine
        .add_line_item(session.id, &code_ref("CF001"), 2)
        .unwrap();
    assert_eq!(snapshot.amount_fulfilled, dec!(3000.00));
}

#[test]
fn insufficient_stock_rejected_at_scan() {
    let engine = seeded_engine();
    let tx = notify(&engine, "TX1", dec!(100000.00));

    let session = engine
        .activate_session(tx.id, OperatorId::new("op-1"))
        .unwrap();

    // Only 5 units of CF001 in stock.
    let result = engine.add_line_item(session.id, &code_ref("CF001"), 6);
    assert_eq!(
        result,
        Err(EngineError::InsufficientStock {
            available: 5,
            requested: 6
        })
    );
}

#[test]
fn stock_commit_is_all_or_nothing() {
    let engine = seeded_engine();
    let tx = notify(&engine, "TX1", dec!(100000.00));

    let session = engine
        .activate_session(tx.id, OperatorId::new("op-1"))
        .unwrap();
    engine
        .add_line_item(session.id, &code_ref("AP004E"), 1)
        .unwrap();
    engine
        .add_line_item(session.id, &code_ref("CF001"), 5)
        .unwrap();

    // Drain CF001 behind the session's back.
    let other = notify(&engine, "TX2", dec!(100000.00));
    let drain = engine
        .activate_session(other.id, OperatorId::new("op-2"))
        .unwrap();
    engine
        .add_line_item(drain.id, &code_ref("CF001"), 3)
        .unwrap();
    engine.complete_session(drain.id, "op-2").unwrap();

    // Completion now fails; neither product may lose stock.
    let result = engine.complete_session(session.id, "op-1");
    assert!(matches!(
        result,
        Err(EngineError::InsufficientStock { .. })
    ));
    assert_eq!(
        engine.inventory().available(&ProductCode::new("AP004E")),
        Some(50)
    );
    assert_eq!(
        engine.inventory().available(&ProductCode::new("CF001")),
        Some(2)
    );

    // Transaction untouched and the session still active.
    assert_eq!(engine.get(tx.id).unwrap().amount_fulfilled, Decimal::ZERO);
    let current = engine.current_session(&OperatorId::new("op-1")).unwrap();
    assert_eq!(current.status, SessionStatus::Active);
}

#[test]
fn cancel_discards_staged_work() {
    let engine = seeded_engine();
    let tx = notify(&engine, "TX1", dec!(5000.00));

    let session = engine
        .activate_session(tx.id, OperatorId::new("op-1"))
        .unwrap();
    engine
        .add_line_item(session.id, &code_ref("AP004E"), 1)
        .unwrap();

    let snapshot = engine.cancel_session(session.id, Some("wrong order")).unwrap();
    assert_eq!(snapshot.status, SessionStatus::Cancelled);
    assert!(snapshot.line_items.is_empty());

    // Stock and transaction untouched; the cancel reason lands in notes.
    assert_eq!(
        engine.inventory().available(&ProductCode::new("AP004E")),
        Some(50)
    );
    let tx = engine.get(tx.id).unwrap();
    assert_eq!(tx.amount_fulfilled, Decimal::ZERO);
    assert!(tx.notes.contains("wrong order"));

    // The operator is free for a new session.
    engine
        .activate_session(tx.id, OperatorId::new("op-1"))
        .unwrap();
}

#[test]
fn cancel_is_idempotent() {
    let engine = seeded_engine();
    let tx = notify(&engine, "TX1", dec!(5000.00));
    let session = engine
        .activate_session(tx.id, OperatorId::new("op-1"))
        .unwrap();

    let first = engine.cancel_session(session.id, None).unwrap();
    let second = engine.cancel_session(session.id, None).unwrap();
    assert_eq!(first.status, second.status);
}

#[test]
fn completed_session_rejects_further_operations() {
    let engine = seeded_engine();
    let tx = notify(&engine, "TX1", dec!(5940.00));
    let session = engine
        .activate_session(tx.id, OperatorId::new("op-1"))
        .unwrap();
    engine
        .add_line_item(session.id, &code_ref("AP004E"), 2)
        .unwrap();
    engine.complete_session(session.id, "op-1").unwrap();

    assert_eq!(
        engine.add_line_item(session.id, &code_ref("CF001"), 1),
        Err(EngineError::SessionAlreadyClosed)
    );
    assert!(matches!(
        engine.complete_session(session.id, "op-1"),
        Err(EngineError::SessionAlreadyClosed)
    ));
    assert_eq!(
        engine.cancel_session(session.id, None),
        Err(EngineError::SessionAlreadyClosed)
    );
}

#[test]
fn empty_session_cannot_complete() {
    let engine = seeded_engine();
    let tx = notify(&engine, "TX1", dec!(5000.00));
    let session = engine
        .activate_session(tx.id, OperatorId::new("op-1"))
        .unwrap();

    let result = engine.complete_session(session.id, "op-1");
    assert!(matches!(result, Err(EngineError::EmptySession)));
}

#[test]
fn operator_limited_to_one_active_session() {
    let engine = seeded_engine();
    let first = notify(&engine, "TX1", dec!(5000.00));
    let second = notify(&engine, "TX2", dec!(5000.00));

    engine
        .activate_session(first.id, OperatorId::new("op-1"))
        .unwrap();
    let result = engine.activate_session(second.id, OperatorId::new("op-1"));
    assert_eq!(result, Err(EngineError::SessionConflict));
}

#[test]
fn transaction_limited_to_one_active_session() {
    let engine = seeded_engine();
    let tx = notify(&engine, "TX1", dec!(5000.00));

    engine
        .activate_session(tx.id, OperatorId::new("op-1"))
        .unwrap();
    let result = engine.activate_session(tx.id, OperatorId::new("op-2"));
    assert_eq!(result, Err(EngineError::SessionConflict));
}

#[test]
fn locked_transaction_cannot_be_worked() {
    let engine = seeded_engine();
    let tx = notify(&engine, "TX1", dec!(1000.00));
    engine.record_payment(tx.id, dec!(1000.00)).unwrap();

    assert_eq!(
        engine.activate_session(tx.id, OperatorId::new("op-1")),
        Err(EngineError::TransactionLocked)
    );
    assert_eq!(
        engine.record_payment(tx.id, dec!(1000.00)),
        Err(EngineError::TransactionLocked)
    );
    assert_eq!(
        engine.change_status(tx.id, OrderStatus::Cancelled),
        Err(EngineError::TransactionLocked)
    );
}

#[test]
fn cancelled_transaction_cannot_be_reopened() {
    let engine = seeded_engine();
    let tx = notify(&engine, "TX1", dec!(1000.00));
    engine.change_status(tx.id, OrderStatus::Cancelled).unwrap();

    assert_eq!(
        engine.change_status(tx.id, OrderStatus::Processing),
        Err(EngineError::TransactionLocked)
    );
    assert_eq!(
        engine.activate_session(tx.id, OperatorId::new("op-1")),
        Err(EngineError::TransactionLocked)
    );
}

#[test]
fn notes_stay_editable_after_lock() {
    let engine = seeded_engine();
    let tx = notify(&engine, "TX1", dec!(1000.00));
    engine.record_payment(tx.id, dec!(1000.00)).unwrap();

    let snapshot = engine.update_notes(tx.id, "receipt emailed").unwrap();
    assert_eq!(snapshot.notes, "receipt emailed");
    assert!(snapshot.is_locked);
}

#[test]
fn current_session_tracks_lifecycle() {
    let engine = seeded_engine();
    let op = OperatorId::new("op-1");
    assert!(engine.current_session(&op).is_none());

    let tx = notify(&engine, "TX1", dec!(5940.00));
    let session = engine.activate_session(tx.id, op.clone()).unwrap();
    assert_eq!(engine.current_session(&op).unwrap().id, session.id);

    engine
        .add_line_item(session.id, &code_ref("AP004E"), 2)
        .unwrap();
    engine.complete_session(session.id, "op-1").unwrap();
    assert!(engine.current_session(&op).is_none());
}

#[test]
fn events_fire_for_every_state_change() {
    use parking_lot::Mutex;
    use std::sync::Arc;

    let engine = seeded_engine();
    let log: Arc<Mutex<Vec<(payfill_rs::EventKind, OrderStatus)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let _sub = engine.subscribe(move |event| {
        sink.lock().push((event.kind, event.transaction.status));
    });

    let tx = notify(&engine, "TX1", dec!(5940.00));
    let session = engine
        .activate_session(tx.id, OperatorId::new("op-1"))
        .unwrap();
    engine
        .add_line_item(session.id, &code_ref("AP004E"), 2)
        .unwrap();
    engine.complete_session(session.id, "op-1").unwrap();

    let events = log.lock();
    assert_eq!(
        events[0],
        (payfill_rs::EventKind::Created, OrderStatus::NotProcessed)
    );
    // Activation publishes the NOT_PROCESSED -> PROCESSING move.
    assert_eq!(
        events[1],
        (payfill_rs::EventKind::Updated, OrderStatus::Processing)
    );
    assert_eq!(
        events.last().unwrap(),
        &(payfill_rs::EventKind::Updated, OrderStatus::Fulfilled)
    );
}

#[test]
fn manual_payment_drives_derived_status() {
    let engine = seeded_engine();
    let tx = notify(&engine, "TX1", dec!(3000.00));

    let tx = engine.record_payment(tx.id, dec!(1000.00)).unwrap();
    assert_eq!(tx.status, OrderStatus::PartiallyFulfilled);

    let tx = engine.record_payment(tx.id, dec!(3000.00)).unwrap();
    assert_eq!(tx.status, OrderStatus::Fulfilled);
    assert!(tx.is_locked);
}

#[test]
fn zero_expected_amount_never_autofulfills() {
    let engine = seeded_engine();
    let tx = notify(&engine, "TX0", dec!(0.00));

    assert_eq!(tx.status, OrderStatus::NotProcessed);
    let tx = engine.record_payment(tx.id, dec!(0.00)).unwrap();
    assert_eq!(tx.status, OrderStatus::NotProcessed);
    assert!(!tx.is_locked);
}
