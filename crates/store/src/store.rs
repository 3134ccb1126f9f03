use async_trait::async_trait;
use domain::{Cart, Order, Principal, Product, ProductId, UserId};

use crate::Result;

/// Outcome of a conditional stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// Stock covered the quantity and was decremented. Carries the new stock.
    Applied { remaining: u32 },
    /// Stock was below the quantity at the moment of the write; nothing changed.
    Rejected { available: u32 },
    /// No product with that id exists.
    Missing,
}

impl DecrementOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, DecrementOutcome::Applied { .. })
    }
}

/// Holds product records and their stock counters.
///
/// Stock is only ever mutated through [`try_decrement_stock`] and
/// [`increment_stock`]; neither overwrites the whole record.
///
/// [`try_decrement_stock`]: CatalogStore::try_decrement_stock
/// [`increment_stock`]: CatalogStore::increment_stock
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Reads a product by id. Returns None if it doesn't exist.
    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>>;

    /// Inserts a new product record.
    async fn insert_product(&self, product: Product) -> Result<()>;

    /// Decrements stock by `quantity` only if current stock is at least `quantity`.
    ///
    /// The check and the write happen as one indivisible step in the store.
    async fn try_decrement_stock(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<DecrementOutcome>;

    /// Adds `quantity` back to a product's stock.
    ///
    /// Returns false if the product no longer exists.
    async fn increment_stock(&self, product_id: ProductId, quantity: u32) -> Result<bool>;
}

/// Holds one mutable cart per user.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Reads the user's cart. Returns None if no cart was ever created.
    async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>>;

    /// Adds `quantity` units of a product, creating the cart on first use.
    async fn add_to_cart(&self, user_id: UserId, product_id: ProductId, quantity: u32)
    -> Result<Cart>;

    /// Removes a product from the cart. Returns None if the user has no cart.
    async fn remove_from_cart(&self, user_id: UserId, product_id: ProductId)
    -> Result<Option<Cart>>;

    /// Replaces the cart's lines with an empty collection. No-op without a cart.
    async fn clear_cart(&self, user_id: UserId) -> Result<()>;
}

/// Append-only store of finalized orders.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Inserts an order with all its lines, or nothing at all.
    async fn insert_order(&self, order: &Order) -> Result<()>;

    /// Returns a user's orders, oldest first.
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Returns every order, oldest first.
    async fn all_orders(&self) -> Result<Vec<Order>>;
}

/// Resolves a bearer token to the principal it was issued for.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn principal_for_token(&self, token: &str) -> Result<Option<Principal>>;
}
