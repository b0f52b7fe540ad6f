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

//! Thread-safe payment-code log with deduplication.
//!
//! Payment codes arrive from the notification parser and must be unique;
//! the same SMS delivered twice must not create two transactions. The log
//! also preserves ingestion order for audit replay.

use crate::base::{TransactionId, TxCode};
use crate::error::EngineError;
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Payment-code index with duplicate detection.
///
/// Combines a [`DashMap`] for O(1) duplicate checking with a [`SegQueue`]
/// preserving ingestion order. All operations are safe for concurrent use.
#[derive(Debug, Default)]
pub struct TxCodeLog {
    /// Codes mapped to their transaction for O(1) duplicate detection.
    codes: DashMap<TxCode, TransactionId>,

    /// Codes in FIFO ingestion order.
    order: SegQueue<TxCode>,
}

impl TxCodeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a payment code.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateTransaction`] if the code is already
    /// registered. The check-and-insert is atomic via the entry API.
    pub fn register(&self, code: TxCode, id: TransactionId) -> Result<(), EngineError> {
        match self.codes.entry(code.clone()) {
            Entry::Occupied(_) => Err(EngineError::DuplicateTransaction),
            Entry::Vacant(entry) => {
                entry.insert(id);
                self.order.push(code);
                Ok(())
            }
        }
    }

    /// Looks up the transaction registered for a payment code.
    pub fn resolve(&self, code: &TxCode) -> Option<TransactionId> {
        self.codes.get(code).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}
