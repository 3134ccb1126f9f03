//! Checkout request contract.

use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::Money;

/// One line of an explicit checkout request, already validated for shape.
///
/// `quantity` is signed here so non-positive values reach the engine and
/// are reported as invalid rather than failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutLine {
    pub product_id: ProductId,
    pub quantity: i64,
    /// Unit price as claimed by the client. Advisory only.
    pub claimed_unit_price: Option<Money>,
}

impl CheckoutLine {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
            claimed_unit_price: None,
        }
    }

    pub fn with_claimed_price(mut self, price: Money) -> Self {
        self.claimed_unit_price = Some(price);
        self
    }
}

/// What to check out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckoutRequest {
    /// Derive the lines from the principal's cart. Prices come from the catalog.
    FromCart { shipping_address: Option<String> },

    /// Client-supplied lines. Claimed prices and totals are never trusted;
    /// the catalog price is recorded on the order.
    Explicit {
        lines: Vec<CheckoutLine>,
        claimed_total: Option<Money>,
        shipping_address: Option<String>,
    },
}

impl CheckoutRequest {
    /// Cart mode without a shipping address.
    pub fn from_cart() -> Self {
        CheckoutRequest::FromCart {
            shipping_address: None,
        }
    }

    /// Explicit mode without a claimed total or shipping address.
    pub fn explicit(lines: Vec<CheckoutLine>) -> Self {
        CheckoutRequest::Explicit {
            lines,
            claimed_total: None,
            shipping_address: None,
        }
    }

    pub fn is_cart_mode(&self) -> bool {
        matches!(self, CheckoutRequest::FromCart { .. })
    }

    pub fn shipping_address(&self) -> Option<&str> {
        match self {
            CheckoutRequest::FromCart { shipping_address }
            | CheckoutRequest::Explicit {
                shipping_address, ..
            } => shipping_address.as_deref(),
        }
    }
}
