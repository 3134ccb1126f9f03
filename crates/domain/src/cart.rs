//! Per-user shopping cart.

use chrono::{DateTime, Utc};
use common::{ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::DomainError;

/// A single product entry in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// A user's cart. There is at most one per user.
///
/// Lines keep insertion order and a product appears at most once;
/// adding it again increments the existing line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub user_id: UserId,
    lines: Vec<CartLine>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Creates an empty cart for a user.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            lines: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Rebuilds a cart from stored lines, merging any duplicate products.
    pub fn from_lines(
        user_id: UserId,
        lines: impl IntoIterator<Item = CartLine>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let mut cart = Self::new(user_id);
        for line in lines {
            cart.add(line.product_id, line.quantity)?;
        }
        cart.updated_at = updated_at;
        Ok(cart)
    }

    /// Returns the lines in insertion order.
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Returns true if the cart has no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Returns the quantity held for a product, if any.
    pub fn quantity_of(&self, product_id: ProductId) -> Option<u32> {
        self.lines
            .iter()
            .find(|line| line.product_id == product_id)
            .map(|line| line.quantity)
    }

    /// Adds `quantity` units of a product.
    pub fn add(&mut self, product_id: ProductId, quantity: u32) -> Result<(), DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity {
                product_id,
                quantity: 0,
            });
        }

        match self
            .lines
            .iter_mut()
            .find(|line| line.product_id == product_id)
        {
            Some(line) => {
                line.quantity = line
                    .quantity
                    .checked_add(quantity)
                    .ok_or(DomainError::QuantityOverflow { product_id })?;
            }
            None => self.lines.push(CartLine {
                product_id,
                quantity,
            }),
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Removes a product. Returns true if a line was removed.
    pub fn remove(&mut self, product_id: ProductId) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| line.product_id != product_id);
        let removed = self.lines.len() != before;
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Replaces the lines with an empty collection.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.updated_at = Utc::now();
    }
}
