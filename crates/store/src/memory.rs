use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use domain::{Cart, DomainError, Order, Principal, Product, ProductId, UserId};
use tokio::sync::RwLock;

use crate::{
    Result, StoreError,
    store::{CartStore, CatalogStore, DecrementOutcome, OrderLedger, PrincipalDirectory},
};

#[derive(Debug, Default)]
struct InMemoryState {
    products: HashMap<ProductId, Product>,
    carts: HashMap<UserId, Cart>,
    orders: Vec<Order>,
    principals: HashMap<String, Principal>,
}

#[derive(Debug, Default)]
struct FailureFlags {
    fail_on_insert_order: AtomicBool,
    fail_on_clear_cart: AtomicBool,
    fail_on_increment: AtomicBool,
}

/// In-memory store implementation for testing.
///
/// Implements every store trait over one shared state, so the same
/// instance can be handed to the engine as catalog, cart store and ledger.
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<InMemoryState>>,
    flags: Arc<FailureFlags>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a bearer token for a principal.
    pub async fn register_principal(&self, token: impl Into<String>, principal: Principal) {
        self.state
            .write()
            .await
            .principals
            .insert(token.into(), principal);
    }

    /// Returns the current stock of a product.
    pub async fn product_stock(&self, product_id: ProductId) -> Option<u32> {
        self.state
            .read()
            .await
            .products
            .get(&product_id)
            .map(|p| p.stock)
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Configures the store to fail every `insert_order` call.
    pub fn set_fail_on_insert_order(&self, fail: bool) {
        self.flags.fail_on_insert_order.store(fail, Ordering::SeqCst);
    }

    /// Configures the store to fail every `clear_cart` call.
    pub fn set_fail_on_clear_cart(&self, fail: bool) {
        self.flags.fail_on_clear_cart.store(fail, Ordering::SeqCst);
    }

    /// Configures the store to fail every `increment_stock` call.
    pub fn set_fail_on_increment(&self, fail: bool) {
        self.flags.fail_on_increment.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&product_id).cloned())
    }

    async fn insert_product(&self, product: Product) -> Result<()> {
        self.state
            .write()
            .await
            .products
            .insert(product.id, product);
        Ok(())
    }

    async fn try_decrement_stock(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<DecrementOutcome> {
        // Check and write under the same write guard.
        let mut state = self.state.write().await;
        let Some(product) = state.products.get_mut(&product_id) else {
            return Ok(DecrementOutcome::Missing);
        };

        if product.stock < quantity {
            return Ok(DecrementOutcome::Rejected {
                available: product.stock,
            });
        }

        product.stock -= quantity;
        product.updated_at = Utc::now();
        Ok(DecrementOutcome::Applied {
            remaining: product.stock,
        })
    }

    async fn increment_stock(&self, product_id: ProductId, quantity: u32) -> Result<bool> {
        if self.flags.fail_on_increment.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("catalog write refused".to_string()));
        }

        let mut state = self.state.write().await;
        match state.products.get_mut(&product_id) {
            Some(product) => {
                product.stock = product
                    .stock
                    .checked_add(quantity)
                    .ok_or(DomainError::QuantityOverflow { product_id })?;
                product.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        Ok(self.state.read().await.carts.get(&user_id).cloned())
    }

    async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart> {
        let mut state = self.state.write().await;
        let cart = state
            .carts
            .entry(user_id)
            .or_insert_with(|| Cart::new(user_id));
        cart.add(product_id, quantity)?;
        Ok(cart.clone())
    }

    async fn remove_from_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<Cart>> {
        let mut state = self.state.write().await;
        Ok(state.carts.get_mut(&user_id).map(|cart| {
            cart.remove(product_id);
            cart.clone()
        }))
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<()> {
        if self.flags.fail_on_clear_cart.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("cart write refused".to_string()));
        }

        if let Some(cart) = self.state.write().await.carts.get_mut(&user_id) {
            cart.clear();
        }
        Ok(())
    }
}

#[async_trait]
impl OrderLedger for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        if self.flags.fail_on_insert_order.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("order ledger unavailable".to_string()));
        }

        self.state.write().await.orders.push(order.clone());
        Ok(())
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .iter()
            .filter(|o| o.user_id() == user_id)
            .cloned()
            .collect())
    }

    async fn all_orders(&self) -> Result<Vec<Order>> {
        Ok(self.state.read().await.orders.clone())
    }
}

#[async_trait]
impl PrincipalDirectory for InMemoryStore {
    async fn principal_for_token(&self, token: &str) -> Result<Option<Principal>> {
        Ok(self.state.read().await.principals.get(token).copied())
    }
}
