//! Placed orders and their snapshot lines.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::{DomainError, Money};

/// A snapshot of one purchased product, captured when the order is placed.
///
/// Later catalog edits never change the name or price recorded here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
}

impl OrderLine {
    /// Returns `unit_price * quantity`.
    pub fn line_total(&self) -> Result<Money, DomainError> {
        self.unit_price
            .checked_multiply(self.quantity)
            .ok_or(DomainError::TotalOverflow)
    }
}

/// Order status. `Placed` is terminal; there is no cancellation flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    #[default]
    Placed,
}

impl OrderStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Placed => "Placed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Placed" => Ok(OrderStatus::Placed),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// A finalized order. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    lines: Vec<OrderLine>,
    total_amount: Money,
    status: OrderStatus,
    shipping_address: Option<String>,
    created_at: DateTime<Utc>,
}

impl Order {
    /// Places a new order. The total is always derived from the lines.
    ///
    /// Fails if any line total or the order total overflows.
    pub fn place(
        user_id: UserId,
        lines: Vec<OrderLine>,
        shipping_address: Option<String>,
    ) -> Result<Self, DomainError> {
        let total_amount = total_of(&lines)?;
        Ok(Self {
            id: OrderId::new(),
            user_id,
            lines,
            total_amount,
            status: OrderStatus::Placed,
            shipping_address,
            created_at: Utc::now(),
        })
    }

    /// Rebuilds an order read back from storage.
    pub fn restore(
        id: OrderId,
        user_id: UserId,
        lines: Vec<OrderLine>,
        status: OrderStatus,
        shipping_address: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let total_amount = total_of(&lines)?;
        Ok(Self {
            id,
            user_id,
            lines,
            total_amount,
            status,
            shipping_address,
            created_at,
        })
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn shipping_address(&self) -> Option<&str> {
        self.shipping_address.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

fn total_of(lines: &[OrderLine]) -> Result<Money, DomainError> {
    let line_totals = lines
        .iter()
        .map(OrderLine::line_total)
        .collect::<Result<Vec<_>, _>>()?;
    Money::checked_sum(line_totals).ok_or(DomainError::TotalOverflow)
}
