//! Shared types for the checkout system.

mod types;

pub use types::{OrderId, ProductId, UserId};
