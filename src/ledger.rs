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

//! Amount ledger: pure decimal arithmetic over expected vs. paid amounts.
//!
//! All monetary values are exact decimals held at a fixed scale of 2
//! fractional digits. The functions here carry no state; the state machine
//! and the engine call them before committing any mutation.

use crate::error::EngineError;
use crate::transaction::OrderStatus;
use rust_decimal::Decimal;

/// Fixed scale for all persisted monetary amounts.
pub const AMOUNT_SCALE: u32 = 2;

/// Rescales an amount to [`AMOUNT_SCALE`] fractional digits.
///
/// Uses the default banker's rounding of [`Decimal::round_dp`].
#[inline]
pub fn rescale(amount: Decimal) -> Decimal {
    amount.round_dp(AMOUNT_SCALE)
}

/// Returns the unfulfilled portion of the expected amount, never negative.
#[inline]
pub fn remaining_amount(expected: Decimal, paid: Decimal) -> Decimal {
    (expected - paid).max(Decimal::ZERO)
}

/// Validates the amount-bound invariant `0 <= paid <= expected`.
///
/// Callers run this before persisting any amount change; a failure must
/// reject the entire mutation.
pub fn validate_amounts(expected: Decimal, paid: Decimal) -> Result<(), EngineError> {
    if expected < Decimal::ZERO || paid < Decimal::ZERO || paid > expected {
        return Err(EngineError::InvalidAmount);
    }
    Ok(())
}

/// Derives the status implied by the paid amount.
///
/// - `paid >= expected` with `expected > 0` implies `Fulfilled`
/// - `0 < paid < expected` implies `PartiallyFulfilled`
/// - otherwise the current status is kept
///
/// The derivation only fires from unlocked states; it never downgrades a
/// locked status. Unlike operator-requested status changes, a derived
/// transition may skip intermediate states (a partial payment can move a
/// `NotProcessed` record straight to `PartiallyFulfilled`).
pub fn derive_status(current: OrderStatus, expected: Decimal, paid: Decimal) -> OrderStatus {
    if current.is_locked() {
        return current;
    }
    if paid >= expected && expected > Decimal::ZERO {
        OrderStatus::Fulfilled
    } else if paid > Decimal::ZERO && paid < expected {
        OrderStatus::PartiallyFulfilled
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn remaining_is_difference() {
        assert_eq!(remaining_amount(dec!(5000.00), dec!(3000.00)), dec!(2000.00));
    }

    #[test]
    fn remaining_never_negative() {
        assert_eq!(remaining_amount(dec!(100.00), dec!(150.00)), dec!(0.00));
    }

    #[test]
    fn rescale_to_two_digits() {
        assert_eq!(rescale(dec!(10.005)), dec!(10.00));
        assert_eq!(rescale(dec!(10.015)), dec!(10.02));
        assert_eq!(rescale(dec!(10.1)), dec!(10.1));
    }

    #[test]
    fn validate_rejects_overpayment() {
        assert_eq!(
            validate_amounts(dec!(100.00), dec!(100.01)),
            Err(EngineError::InvalidAmount)
        );
    }

    #[test]
    fn validate_rejects_negative() {
        assert_eq!(
            validate_amounts(dec!(-1.00), dec!(0.00)),
            Err(EngineError::InvalidAmount)
        );
        assert_eq!(
            validate_amounts(dec!(100.00), dec!(-1.00)),
            Err(EngineError::InvalidAmount)
        );
    }

    #[test]
    fn validate_accepts_bounds() {
        assert_eq!(validate_amounts(dec!(100.00), dec!(0.00)), Ok(()));
        assert_eq!(validate_amounts(dec!(100.00), dec!(100.00)), Ok(()));
    }

    #[test]
    fn derive_full_payment_fulfills() {
        let status = derive_status(OrderStatus::Processing, dec!(5000.00), dec!(5000.00));
        assert_eq!(status, OrderStatus::Fulfilled);
    }

    #[test]
    fn derive_partial_payment_partially_fulfills() {
        let status = derive_status(OrderStatus::Processing, dec!(5000.00), dec!(3000.00));
        assert_eq!(status, OrderStatus::PartiallyFulfilled);
    }

    #[test]
    fn derive_zero_payment_keeps_status() {
        let status = derive_status(OrderStatus::NotProcessed, dec!(5000.00), dec!(0.00));
        assert_eq!(status, OrderStatus::NotProcessed);
    }

    #[test]
    fn derive_skips_intermediate_states() {
        // A partial payment can land before any operator touches the record.
        let status = derive_status(OrderStatus::NotProcessed, dec!(5000.00), dec!(1000.00));
        assert_eq!(status, OrderStatus::PartiallyFulfilled);
    }

    #[test]
    fn derive_never_downgrades_locked() {
        assert_eq!(
            derive_status(OrderStatus::Cancelled, dec!(100.00), dec!(100.00)),
            OrderStatus::Cancelled
        );
        assert_eq!(
            derive_status(OrderStatus::Fulfilled, dec!(100.00), dec!(50.00)),
            OrderStatus::Fulfilled
        );
    }

    #[test]
    fn derive_zero_expected_never_fulfills() {
        // A zero-expected record has nothing to fulfill.
        assert_eq!(
            derive_status(OrderStatus::NotProcessed, dec!(0.00), dec!(0.00)),
            OrderStatus::NotProcessed
        );
    }
}
