//! Catalog product record.

use chrono::{DateTime, Utc};
use common::{ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::{DomainError, Money};

/// A product in the catalog.
///
/// `stock` is unsigned, so it can never go negative; checkout only ever
/// changes it through the store's conditional decrement and restore pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub stock: u32,
    /// The seller or admin that created the product.
    pub owner: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Creates a new product with a fresh id.
    pub fn new(
        name: impl Into<String>,
        price: Money,
        stock: u32,
        owner: UserId,
    ) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::EmptyName);
        }
        if price.is_negative() {
            return Err(DomainError::NegativePrice(price));
        }

        let now = Utc::now();
        Ok(Self {
            id: ProductId::new(),
            name,
            price,
            stock,
            owner,
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns true if the current stock covers `quantity`.
    pub fn has_stock_for(&self, quantity: u32) -> bool {
        self.stock >= quantity
    }
}
