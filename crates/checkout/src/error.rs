//! Checkout error types.

use domain::{DomainError, ProductId};
use store::StoreError;
use thiserror::Error;

/// Errors surfaced by the checkout core and its cart operations.
///
/// Validation errors are raised before any side effect. `StockConflict`,
/// `LedgerWriteFailed` and `Timeout` are raised only after the decrements
/// applied in the same call have been compensated.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The principal is inactive or lacks the required role.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Cart-mode checkout with no lines.
    #[error("Cart is empty")]
    EmptyCart,

    /// A requested quantity is zero, negative or out of range.
    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: ProductId, quantity: i64 },

    /// The request breaks a domain invariant, e.g. an order total or cart
    /// quantity out of range.
    #[error("Invalid request: {0}")]
    Invalid(#[from] DomainError),

    /// The user has no cart to modify.
    #[error("Cart not found")]
    CartNotFound,

    /// A requested product does not exist.
    #[error("Product {0} not found")]
    ProductNotFound(ProductId),

    /// Stock does not cover a requested quantity.
    #[error("Insufficient stock for product {product_id}. Available: {available}")]
    InsufficientStock { product_id: ProductId, available: u32 },

    /// Stock was exhausted concurrently between validation and the write.
    #[error("Stock for product {product_id} changed during checkout; please retry")]
    StockConflict { product_id: ProductId },

    /// The order could not be recorded.
    #[error("Order could not be recorded: {0}")]
    LedgerWriteFailed(String),

    /// The checkout did not finish within its deadline.
    #[error("Checkout timed out; please retry")]
    Timeout,

    /// A store read failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckoutError {
    /// Returns a stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CheckoutError::Forbidden(_) => "forbidden",
            CheckoutError::EmptyCart => "empty_cart",
            CheckoutError::InvalidQuantity { .. } => "invalid_quantity",
            CheckoutError::Invalid(_) => "invalid",
            CheckoutError::CartNotFound => "cart_not_found",
            CheckoutError::ProductNotFound(_) => "product_not_found",
            CheckoutError::InsufficientStock { .. } => "insufficient_stock",
            CheckoutError::StockConflict { .. } => "stock_conflict",
            CheckoutError::LedgerWriteFailed(_) => "ledger_write_failed",
            CheckoutError::Timeout => "timeout",
            CheckoutError::Store(_) => "store_error",
            CheckoutError::Internal(_) => "internal",
        }
    }
}
