//! Domain layer for the checkout system.
//!
//! This crate holds the invariant-bearing data contracts shared by the
//! stores, the checkout engine and the HTTP surface:
//! - `Money` for prices and totals
//! - `Product` with its stock counter
//! - `Cart` and its insertion-ordered lines
//! - `Order` with snapshot `OrderLine`s
//! - `Principal` for the authenticated caller
//! - `CheckoutRequest` distinguishing cart mode from explicit mode

pub mod cart;
pub mod error;
pub mod money;
pub mod order;
pub mod principal;
pub mod product;
pub mod request;

pub use cart::{Cart, CartLine};
pub use common::{OrderId, ProductId, UserId};
pub use error::DomainError;
pub use money::Money;
pub use order::{Order, OrderLine, OrderStatus};
pub use principal::{Principal, Role};
pub use product::Product;
pub use request::{CheckoutLine, CheckoutRequest};
