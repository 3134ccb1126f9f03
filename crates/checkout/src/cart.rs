//! Cart operations for an authenticated principal.

use domain::{Cart, Principal, ProductId};
use store::{CartStore, CatalogStore, StoreError};

use crate::engine::ensure_active;
use crate::error::CheckoutError;

/// Reads and edits the principal's cart.
///
/// Never touches stock; stock is only checked and reserved at checkout.
#[derive(Debug, Clone)]
pub struct CartService<C, K> {
    catalog: C,
    carts: K,
}

impl<C, K> CartService<C, K>
where
    C: CatalogStore,
    K: CartStore,
{
    pub fn new(catalog: C, carts: K) -> Self {
        Self { catalog, carts }
    }

    /// Returns the principal's cart, or an empty one if none exists yet.
    #[tracing::instrument(skip(self), fields(user_id = %principal.user_id))]
    pub async fn get_cart(&self, principal: &Principal) -> Result<Cart, CheckoutError> {
        ensure_active(principal)?;
        Ok(self
            .carts
            .get_cart(principal.user_id)
            .await?
            .unwrap_or_else(|| Cart::new(principal.user_id)))
    }

    /// Adds units of an existing product, incrementing the line if present.
    #[tracing::instrument(skip(self), fields(user_id = %principal.user_id))]
    pub async fn add_item(
        &self,
        principal: &Principal,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<Cart, CheckoutError> {
        ensure_active(principal)?;

        let quantity = u32::try_from(quantity)
            .ok()
            .filter(|q| *q > 0)
            .ok_or(CheckoutError::InvalidQuantity {
                product_id,
                quantity,
            })?;

        if self.catalog.get_product(product_id).await?.is_none() {
            return Err(CheckoutError::ProductNotFound(product_id));
        }

        let cart = self
            .carts
            .add_to_cart(principal.user_id, product_id, quantity)
            .await
            .map_err(|e| match e {
                StoreError::Invalid(e) => CheckoutError::Invalid(e),
                other => other.into(),
            })?;
        tracing::debug!(lines = cart.lines().len(), "cart updated");
        Ok(cart)
    }

    /// Removes a product from the cart. Fails with `CartNotFound` when the
    /// principal has no cart.
    #[tracing::instrument(skip(self), fields(user_id = %principal.user_id))]
    pub async fn remove_item(
        &self,
        principal: &Principal,
        product_id: ProductId,
    ) -> Result<Cart, CheckoutError> {
        ensure_active(principal)?;
        self.carts
            .remove_from_cart(principal.user_id, product_id)
            .await?
            .ok_or(CheckoutError::CartNotFound)
    }
}
