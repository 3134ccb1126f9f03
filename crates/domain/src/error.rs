//! Domain error types.

use common::ProductId;
use thiserror::Error;

use crate::Money;

/// Errors raised when a data contract invariant would be violated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// Quantities on carts and orders must be at least 1.
    #[error("Invalid quantity {quantity} for product {product_id} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: i64 },

    /// Prices are never negative.
    #[error("Invalid price: {0} (must not be negative)")]
    NegativePrice(Money),

    /// A line or order total does not fit in the money representation.
    #[error("Order total is out of range")]
    TotalOverflow,

    /// Adding units would push a quantity past its maximum.
    #[error("Quantity for product {product_id} would overflow")]
    QuantityOverflow { product_id: ProductId },

    /// Product names are required.
    #[error("Product name must not be empty")]
    EmptyName,
}
