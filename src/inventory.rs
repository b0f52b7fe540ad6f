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

//! In-memory inventory with all-or-nothing stock commits.
//!
//! Adds give early advisory feedback via [`Inventory::reserve_check`], but
//! the authoritative check happens again inside [`Inventory::commit`]: stock
//! may have moved between scan time and completion time, and a batch must
//! either decrement every line or none.

use crate::base::ProductCode;
use crate::error::EngineError;
use crate::session::LineItem;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How a scan payload identifies a product: barcode labels carry either
/// the product code or the SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductRef {
    Code(ProductCode),
    Sku(String),
}

/// A stocked product. Referenced by the engine, owned by the inventory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub code: ProductCode,
    pub name: String,
    pub sku: String,
    pub sku_name: String,
    pub unit_price: Decimal,
    pub unit_cost: Decimal,
    /// Point value, the loyalty/commission unit tracked per product.
    pub unit_pv: Decimal,
    pub quantity: i64,
    pub reorder_level: i64,
    pub is_active: bool,
}

impl Product {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        code: ProductCode,
        name: &str,
        sku: &str,
        sku_name: &str,
        unit_price: Decimal,
        unit_cost: Decimal,
        unit_pv: Decimal,
        quantity: i64,
    ) -> Self {
        Self {
            code,
            name: name.to_string(),
            sku: sku.to_string(),
            sku_name: sku_name.to_string(),
            unit_price,
            unit_cost,
            unit_pv,
            quantity,
            reorder_level: 10,
            is_active: true,
        }
    }

    pub fn needs_reorder(&self) -> bool {
        self.quantity <= self.reorder_level
    }
}

/// Record of one applied stock decrement, kept for the completion report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockMovement {
    pub product_code: ProductCode,
    pub product_name: String,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub quantity_change: i64,
}

/// Product store with a serialized commit path.
///
/// Lookups and advisory checks go straight to the sharded map; batch
/// commits serialize on `commit_lock` so validate-all-then-apply-all runs
/// without another commit interleaving.
#[derive(Debug, Default)]
pub struct Inventory {
    products: DashMap<ProductCode, Product>,
    commit_lock: Mutex<()>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a product definition.
    pub fn upsert(&self, product: Product) {
        self.products.insert(product.code.clone(), product);
    }

    /// Adds stock (goods received). Unknown codes fail with `ProductNotFound`.
    pub fn restock(&self, code: &ProductCode, quantity: i64) -> Result<i64, EngineError> {
        if quantity <= 0 {
            return Err(EngineError::InvalidQuantity);
        }
        let mut product = self.products.get_mut(code).ok_or(EngineError::ProductNotFound)?;
        product.quantity += quantity;
        Ok(product.quantity)
    }

    /// Resolves an active product by code, returning a snapshot copy.
    /// Inactive products are treated as absent.
    pub fn get(&self, code: &ProductCode) -> Result<Product, EngineError> {
        self.products
            .get(code)
            .filter(|p| p.is_active)
            .map(|p| p.clone())
            .ok_or(EngineError::ProductNotFound)
    }

    /// Resolves an active product by SKU. Barcode payloads may carry either
    /// the product code or the SKU.
    pub fn get_by_sku(&self, sku: &str) -> Result<Product, EngineError> {
        self.products
            .iter()
            .find(|p| p.is_active && p.sku == sku)
            .map(|p| p.clone())
            .ok_or(EngineError::ProductNotFound)
    }

    /// Resolves either kind of product reference.
    pub fn resolve(&self, product_ref: &ProductRef) -> Result<Product, EngineError> {
        match product_ref {
            ProductRef::Code(code) => self.get(code),
            ProductRef::Sku(sku) => self.get_by_sku(sku),
        }
    }

    /// Advisory stock check used at scan time for early feedback.
    /// The authoritative check happens again in [`Inventory::commit`].
    pub fn reserve_check(&self, code: &ProductCode, quantity: i64) -> Result<(), EngineError> {
        if quantity <= 0 {
            return Err(EngineError::InvalidQuantity);
        }
        let product = self.get(code)?;
        if product.quantity < quantity {
            return Err(EngineError::InsufficientStock {
                available: product.quantity,
                requested: quantity,
            });
        }
        Ok(())
    }

    /// Applies stock decrements for all line items or none.
    ///
    /// Quantities per product are aggregated first (the same product can be
    /// scanned on several lines), every aggregate is validated against the
    /// current stock, and only then are the decrements applied. Any failure
    /// aborts before the first write, so stock is left unchanged.
    pub fn commit(&self, items: &[LineItem]) -> Result<Vec<StockMovement>, EngineError> {
        let _guard = self.commit_lock.lock();

        let mut required: Vec<(ProductCode, i64)> = Vec::new();
        for item in items {
            match required.iter_mut().find(|(code, _)| *code == item.product_code) {
                Some((_, qty)) => *qty += item.quantity,
                None => required.push((item.product_code.clone(), item.quantity)),
            }
        }

        // Validate everything before touching anything.
        for (code, qty) in &required {
            let product = self.get(code)?;
            if product.quantity < *qty {
                return Err(EngineError::InsufficientStock {
                    available: product.quantity,
                    requested: *qty,
                });
            }
        }

        let mut movements = Vec::with_capacity(required.len());
        for (code, qty) in &required {
            let mut product = self
                .products
                .get_mut(code)
                .ok_or(EngineError::ProductNotFound)?;
            let before = product.quantity;
            product.quantity -= *qty;
            movements.push(StockMovement {
                product_code: code.clone(),
                product_name: product.name.clone(),
                quantity_before: before,
                quantity_after: product.quantity,
                quantity_change: -*qty,
            });
        }
        Ok(movements)
    }

    /// Current stock level, mainly for tests and reports.
    pub fn available(&self, code: &ProductCode) -> Option<i64> {
        self.products.get(code).map(|p| p.quantity)
    }
}
