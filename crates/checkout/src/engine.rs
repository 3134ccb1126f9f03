//! Checkout engine: turns a cart or explicit line list into a placed order.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use domain::{CheckoutRequest, Money, Order, OrderLine, Principal, Product, ProductId};
use store::{CartStore, CatalogStore, OrderLedger};
use futures_util::FutureExt;
use tokio::time::Instant;
use tracing::Instrument;

use crate::adjuster::{AdjustError, AppliedSet, Decrement, InventoryAdjuster};
use crate::error::CheckoutError;

/// Tunables for the checkout transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutSettings {
    /// Upper bound on one checkout call. Checked between store writes.
    pub timeout: Duration,
    /// Attempts per stock restore during compensation.
    pub compensation_attempts: u32,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            compensation_attempts: 3,
        }
    }
}

/// A requested line after merging, before it is checked against the catalog.
#[derive(Debug, Clone, Copy)]
struct RequestedLine {
    product_id: ProductId,
    quantity: u32,
    claimed_unit_price: Option<Money>,
}

/// A requested line paired with the catalog record read during validation.
#[derive(Debug)]
struct ResolvedLine {
    product: Product,
    quantity: u32,
    claimed_unit_price: Option<Money>,
}

/// Orchestrates a checkout as one logical transaction.
///
/// Stores are injected once at construction. Each call owns its own
/// [`AppliedSet`]; nothing is shared between calls.
#[derive(Debug, Clone)]
pub struct CheckoutEngine<C, K, L> {
    catalog: C,
    carts: K,
    ledger: L,
    adjuster: InventoryAdjuster<C>,
    settings: CheckoutSettings,
}

impl<C, K, L> CheckoutEngine<C, K, L>
where
    C: CatalogStore + Clone + 'static,
    K: CartStore + Clone + 'static,
    L: OrderLedger + Clone + 'static,
{
    /// Creates a new engine over the given stores.
    pub fn new(catalog: C, carts: K, ledger: L, settings: CheckoutSettings) -> Self {
        let adjuster = InventoryAdjuster::new(catalog.clone(), settings.compensation_attempts);
        Self {
            catalog,
            carts,
            ledger,
            adjuster,
            settings,
        }
    }

    /// Checks out for `principal` and returns the persisted order.
    ///
    /// The transaction runs on its own task, so dropping the returned future
    /// does not abandon decrements that were already applied.
    #[tracing::instrument(skip(self, request), fields(user_id = %principal.user_id, cart_mode = request.is_cart_mode()))]
    pub async fn checkout(
        &self,
        principal: &Principal,
        request: CheckoutRequest,
    ) -> Result<Order, CheckoutError> {
        metrics::counter!("checkout_total").increment(1);
        let start = std::time::Instant::now();

        let result = match ensure_active(principal) {
            Ok(()) => {
                let engine = self.clone();
                let principal = *principal;
                tokio::spawn(
                    async move { engine.run_checkout(principal, request).await }
                        .instrument(tracing::Span::current()),
                )
                .await
                .unwrap_or_else(|e| Err(CheckoutError::Internal(format!("checkout task failed: {e}"))))
            }
            Err(e) => Err(e),
        };

        metrics::histogram!("checkout_duration_seconds").record(start.elapsed().as_secs_f64());
        match &result {
            Ok(order) => {
                metrics::counter!("checkout_completed_total").increment(1);
                tracing::info!(
                    order_id = %order.id(),
                    total = %order.total_amount(),
                    lines = order.lines().len(),
                    "checkout completed"
                );
            }
            Err(e) => {
                metrics::counter!("checkout_failed_total", "kind" => e.kind()).increment(1);
                tracing::info!(kind = e.kind(), error = %e, "checkout failed");
            }
        }

        result
    }

    async fn run_checkout(
        &self,
        principal: Principal,
        request: CheckoutRequest,
    ) -> Result<Order, CheckoutError> {
        let deadline = Instant::now() + self.settings.timeout;
        let user_id = principal.user_id;
        let shipping_address = request.shipping_address().map(str::to_owned);

        // Validation: reads only, no side effects.
        let (requested, claimed_total) = match request {
            CheckoutRequest::FromCart { .. } => (self.lines_from_cart(principal).await?, None),
            CheckoutRequest::Explicit {
                lines,
                claimed_total,
                ..
            } => (merge_explicit_lines(&lines)?, claimed_total),
        };
        let resolved = self.resolve(&requested).await?;

        let order_lines = resolved
            .iter()
            .map(|line| OrderLine {
                product_id: line.product.id,
                name: line.product.name.clone(),
                unit_price: line.product.price,
                quantity: line.quantity,
            })
            .collect();
        let order = Order::place(user_id, order_lines, shipping_address)?;
        warn_on_price_claims(&resolved, claimed_total, order.total_amount());

        if Instant::now() >= deadline {
            return Err(CheckoutError::Timeout);
        }

        // Mutation: every failure from here on is compensated, panics included.
        let mut applied = AppliedSet::new();
        let committed = AssertUnwindSafe(self.commit(&order, deadline, &mut applied))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                metrics::counter!("checkout_panics_total").increment(1);
                tracing::error!(
                    order_id = %order.id(),
                    panic = panic_message(&*payload),
                    "checkout panicked after stock was taken"
                );
                Err(CheckoutError::Internal("checkout aborted unexpectedly".to_string()))
            });

        if let Err(e) = committed {
            self.rollback(&mut applied).await;
            return Err(e);
        }

        // Best effort: the order is already durable.
        if let Err(e) = self.carts.clear_cart(user_id).await {
            metrics::counter!("checkout_cart_clear_failures_total").increment(1);
            tracing::warn!(order_id = %order.id(), error = %e, "cart clear failed after checkout");
        }

        Ok(order)
    }

    /// Takes the stock for every line, then records the order.
    ///
    /// Each decrement lands in `applied` as soon as it succeeds; the caller
    /// compensates on any error.
    async fn commit(
        &self,
        order: &Order,
        deadline: Instant,
        applied: &mut AppliedSet,
    ) -> Result<(), CheckoutError> {
        let decrements: Vec<Decrement> = order
            .lines()
            .iter()
            .map(|line| Decrement {
                product_id: line.product_id,
                quantity: line.quantity,
            })
            .collect();

        self.adjuster
            .apply_decrements_until(&decrements, applied, Some(deadline))
            .await
            .map_err(|e| match e {
                AdjustError::Rejected { product_id, .. } => CheckoutError::StockConflict { product_id },
                AdjustError::Missing(product_id) => CheckoutError::ProductNotFound(product_id),
                AdjustError::DeadlineExceeded { .. } => CheckoutError::Timeout,
                AdjustError::Store(e) => CheckoutError::Store(e),
            })?;

        if Instant::now() >= deadline {
            return Err(CheckoutError::Timeout);
        }

        self.ledger.insert_order(order).await.map_err(|e| {
            tracing::error!(order_id = %order.id(), error = %e, "order insert failed");
            CheckoutError::LedgerWriteFailed(e.to_string())
        })
    }

    async fn lines_from_cart(&self, principal: Principal) -> Result<Vec<RequestedLine>, CheckoutError> {
        let cart = self.carts.get_cart(principal.user_id).await?;
        let lines: Vec<RequestedLine> = cart
            .iter()
            .flat_map(|cart| cart.lines())
            .map(|line| RequestedLine {
                product_id: line.product_id,
                quantity: line.quantity,
                claimed_unit_price: None,
            })
            .collect();

        if lines.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        Ok(lines)
    }

    /// Reads every product and checks stock for all lines before anything is mutated.
    async fn resolve(&self, requested: &[RequestedLine]) -> Result<Vec<ResolvedLine>, CheckoutError> {
        let mut resolved = Vec::with_capacity(requested.len());

        for line in requested {
            let product = self
                .catalog
                .get_product(line.product_id)
                .await?
                .ok_or(CheckoutError::ProductNotFound(line.product_id))?;

            if !product.has_stock_for(line.quantity) {
                return Err(CheckoutError::InsufficientStock {
                    product_id: product.id,
                    available: product.stock,
                });
            }

            resolved.push(ResolvedLine {
                product,
                quantity: line.quantity,
                claimed_unit_price: line.claimed_unit_price,
            });
        }

        Ok(resolved)
    }

    async fn rollback(&self, applied: &mut AppliedSet) {
        if applied.is_empty() {
            return;
        }
        if let Err(e) = self.adjuster.compensate(applied).await {
            metrics::counter!("checkout_compensation_failures_total").increment(1);
            tracing::error!(
                unrestored = e.unrestored.len(),
                error = %e,
                "checkout compensation incomplete"
            );
        }
    }

    /// Returns the principal's own orders, oldest first.
    #[tracing::instrument(skip(self), fields(user_id = %principal.user_id))]
    pub async fn orders_for(&self, principal: &Principal) -> Result<Vec<Order>, CheckoutError> {
        ensure_active(principal)?;
        Ok(self.ledger.orders_for_user(principal.user_id).await?)
    }

    /// Returns every order. Admin only.
    #[tracing::instrument(skip(self), fields(user_id = %principal.user_id))]
    pub async fn all_orders(&self, principal: &Principal) -> Result<Vec<Order>, CheckoutError> {
        ensure_active(principal)?;
        if !principal.is_admin() {
            return Err(CheckoutError::Forbidden("admin role required".to_string()));
        }
        Ok(self.ledger.all_orders().await?)
    }
}

pub(crate) fn ensure_active(principal: &Principal) -> Result<(), CheckoutError> {
    if principal.is_active {
        Ok(())
    } else {
        Err(CheckoutError::Forbidden("account is inactive".to_string()))
    }
}

/// Validates quantities and merges repeated products into their first position.
fn merge_explicit_lines(
    lines: &[domain::CheckoutLine],
) -> Result<Vec<RequestedLine>, CheckoutError> {
    if lines.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }

    let mut merged: Vec<RequestedLine> = Vec::with_capacity(lines.len());
    for line in lines {
        let invalid = || CheckoutError::InvalidQuantity {
            product_id: line.product_id,
            quantity: line.quantity,
        };
        if line.quantity <= 0 {
            return Err(invalid());
        }
        let quantity = u32::try_from(line.quantity).map_err(|_| invalid())?;

        match merged.iter_mut().find(|m| m.product_id == line.product_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.checked_add(quantity).ok_or_else(invalid)?;
                if existing.claimed_unit_price.is_none() {
                    existing.claimed_unit_price = line.claimed_unit_price;
                }
            }
            None => merged.push(RequestedLine {
                product_id: line.product_id,
                quantity,
                claimed_unit_price: line.claimed_unit_price,
            }),
        }
    }

    Ok(merged)
}

/// Client prices are advisory. Disagreements are recorded, never applied.
fn warn_on_price_claims(resolved: &[ResolvedLine], claimed_total: Option<Money>, actual: Money) {
    for line in resolved {
        if let Some(claimed) = line.claimed_unit_price {
            if claimed != line.product.price {
                metrics::counter!("checkout_price_mismatch_total").increment(1);
                tracing::warn!(
                    product_id = %line.product.id,
                    %claimed,
                    actual = %line.product.price,
                    "claimed unit price differs from catalog"
                );
            }
        }
    }

    if let Some(claimed) = claimed_total {
        if claimed != actual {
            metrics::counter!("checkout_price_mismatch_total").increment(1);
            tracing::warn!(%claimed, %actual, "claimed total differs from catalog total");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domain::{CheckoutLine, UserId};
    use store::{DecrementOutcome, InMemoryStore};

    type Engine = CheckoutEngine<InMemoryStore, InMemoryStore, InMemoryStore>;

    fn engine(store: &InMemoryStore) -> Engine {
        CheckoutEngine::new(store.clone(), store.clone(), store.clone(), CheckoutSettings::default())
    }

    async fn seed(store: &InMemoryStore, name: &str, price_cents: i64, stock: u32) -> ProductId {
        let product = Product::new(name, Money::from_cents(price_cents), stock, UserId::new()).unwrap();
        let id = product.id;
        store.insert_product(product).await.unwrap();
        id
    }

    fn explicit(lines: &[(ProductId, i64)]) -> CheckoutRequest {
        CheckoutRequest::explicit(
            lines
                .iter()
                .map(|(id, qty)| CheckoutLine::new(*id, *qty))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_cart_checkout_places_order_and_clears_cart() {
        let store = InMemoryStore::new();
        let engine = engine(&store);
        let principal = Principal::user(UserId::new());
        let p1 = seed(&store, "Widget", 1000, 5).await;
        let p2 = seed(&store, "Gadget", 2500, 5).await;

        store.add_to_cart(principal.user_id, p1, 2).await.unwrap();
        store.add_to_cart(principal.user_id, p2, 1).await.unwrap();

        let order = engine.checkout(&principal, CheckoutRequest::from_cart()).await.unwrap();

        assert_eq!(order.total_amount(), Money::from_cents(4500));
        assert_eq!(order.lines()[0].name, "Widget");
        assert_eq!(order.lines()[1].product_id, p2);
        assert_eq!(store.product_stock(p1).await, Some(3));
        assert_eq!(store.product_stock(p2).await, Some(4));
        assert!(store.get_cart(principal.user_id).await.unwrap().unwrap().is_empty());
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected() {
        let store = InMemoryStore::new();
        let engine = engine(&store);
        let principal = Principal::user(UserId::new());

        let err = engine.checkout(&principal, CheckoutRequest::from_cart()).await.unwrap_err();
        assert!(matches!(err, CheckoutError::EmptyCart));

        // A cart that exists but was emptied behaves the same.
        let p1 = seed(&store, "Widget", 100, 1).await;
        store.add_to_cart(principal.user_id, p1, 1).await.unwrap();
        store.clear_cart(principal.user_id).await.unwrap();
        let err = engine.checkout(&principal, CheckoutRequest::from_cart()).await.unwrap_err();
        assert!(matches!(err, CheckoutError::EmptyCart));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_explicit_empty_lines_are_rejected() {
        let store = InMemoryStore::new();
        let err = engine(&store)
            .checkout(&Principal::user(UserId::new()), CheckoutRequest::explicit(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::EmptyCart));
    }

    #[tokio::test]
    async fn test_non_positive_quantity_is_rejected() {
        let store = InMemoryStore::new();
        let engine = engine(&store);
        let p1 = seed(&store, "Widget", 100, 5).await;

        for qty in [0, -3] {
            let err = engine
                .checkout(&Principal::user(UserId::new()), explicit(&[(p1, qty)]))
                .await
                .unwrap_err();
            assert!(matches!(err, CheckoutError::InvalidQuantity { quantity, .. } if quantity == qty));
        }
        assert_eq!(store.product_stock(p1).await, Some(5));
    }

    #[tokio::test]
    async fn test_unknown_product_is_rejected_without_side_effects() {
        let store = InMemoryStore::new();
        let engine = engine(&store);
        let p1 = seed(&store, "Widget", 100, 5).await;
        let ghost = ProductId::new();

        let err = engine
            .checkout(&Principal::user(UserId::new()), explicit(&[(p1, 1), (ghost, 1)]))
            .await
            .unwrap_err();

        assert!(matches!(err, CheckoutError::ProductNotFound(id) if id == ghost));
        assert_eq!(store.product_stock(p1).await, Some(5));
    }

    #[tokio::test]
    async fn test_out_of_stock_line_leaves_other_lines_untouched() {
        let store = InMemoryStore::new();
        let engine = engine(&store);
        let principal = Principal::user(UserId::new());
        let p1 = seed(&store, "Widget", 100, 5).await;
        let p2 = seed(&store, "Gadget", 100, 0).await;

        store.add_to_cart(principal.user_id, p1, 1).await.unwrap();
        store.add_to_cart(principal.user_id, p2, 1).await.unwrap();

        let err = engine.checkout(&principal, CheckoutRequest::from_cart()).await.unwrap_err();

        assert!(matches!(
            err,
            CheckoutError::InsufficientStock { product_id, available: 0 } if product_id == p2
        ));
        assert_eq!(store.product_stock(p1).await, Some(5));
        assert_eq!(store.order_count().await, 0);
        assert_eq!(store.get_cart(principal.user_id).await.unwrap().unwrap().lines().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_lines_are_merged_for_the_stock_check() {
        let store = InMemoryStore::new();
        let engine = engine(&store);
        let p1 = seed(&store, "Widget", 100, 3).await;

        let err = engine
            .checkout(&Principal::user(UserId::new()), explicit(&[(p1, 2), (p1, 2)]))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::InsufficientStock { available: 3, .. }));

        let order = engine
            .checkout(&Principal::user(UserId::new()), explicit(&[(p1, 1), (p1, 2)]))
            .await
            .unwrap();
        assert_eq!(order.lines().len(), 1);
        assert_eq!(order.lines()[0].quantity, 3);
        assert_eq!(store.product_stock(p1).await, Some(0));
    }

    #[tokio::test]
    async fn test_claimed_prices_are_ignored() {
        let store = InMemoryStore::new();
        let engine = engine(&store);
        let p1 = seed(&store, "Widget", 1000, 5).await;

        let request = CheckoutRequest::Explicit {
            lines: vec![CheckoutLine::new(p1, 2).with_claimed_price(Money::from_cents(1))],
            claimed_total: Some(Money::from_cents(2)),
            shipping_address: Some("1 Main St".to_string()),
        };
        let order = engine.checkout(&Principal::user(UserId::new()), request).await.unwrap();

        assert_eq!(order.lines()[0].unit_price, Money::from_cents(1000));
        assert_eq!(order.total_amount(), Money::from_cents(2000));
        assert_eq!(order.shipping_address(), Some("1 Main St"));
    }

    #[tokio::test]
    async fn test_explicit_checkout_also_clears_existing_cart() {
        let store = InMemoryStore::new();
        let engine = engine(&store);
        let principal = Principal::user(UserId::new());
        let p1 = seed(&store, "Widget", 100, 5).await;

        store.add_to_cart(principal.user_id, p1, 1).await.unwrap();
        engine.checkout(&principal, explicit(&[(p1, 2)])).await.unwrap();

        assert!(store.get_cart(principal.user_id).await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ledger_failure_restores_stock() {
        let store = InMemoryStore::new();
        let engine = engine(&store);
        let principal = Principal::user(UserId::new());
        let p1 = seed(&store, "Widget", 100, 5).await;
        let p2 = seed(&store, "Gadget", 100, 5).await;
        store.add_to_cart(principal.user_id, p1, 2).await.unwrap();
        store.add_to_cart(principal.user_id, p2, 3).await.unwrap();

        store.set_fail_on_insert_order(true);
        let err = engine.checkout(&principal, CheckoutRequest::from_cart()).await.unwrap_err();

        assert!(matches!(err, CheckoutError::LedgerWriteFailed(_)));
        assert_eq!(store.product_stock(p1).await, Some(5));
        assert_eq!(store.product_stock(p2).await, Some(5));
        assert_eq!(store.order_count().await, 0);
        // cart untouched
        assert_eq!(store.get_cart(principal.user_id).await.unwrap().unwrap().lines().len(), 2);
    }

    #[tokio::test]
    async fn test_cart_clear_failure_keeps_the_order() {
        let store = InMemoryStore::new();
        let engine = engine(&store);
        let principal = Principal::user(UserId::new());
        let p1 = seed(&store, "Widget", 100, 5).await;
        store.add_to_cart(principal.user_id, p1, 1).await.unwrap();

        store.set_fail_on_clear_cart(true);
        let order = engine.checkout(&principal, CheckoutRequest::from_cart()).await.unwrap();

        assert_eq!(store.order_count().await, 1);
        assert_eq!(store.product_stock(p1).await, Some(4));
        assert_eq!(order.lines().len(), 1);
        assert!(!store.get_cart(principal.user_id).await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_principal_is_forbidden() {
        let store = InMemoryStore::new();
        let engine = engine(&store);
        let p1 = seed(&store, "Widget", 100, 5).await;
        let principal = Principal {
            is_active: false,
            ..Principal::user(UserId::new())
        };

        let err = engine.checkout(&principal, explicit(&[(p1, 1)])).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Forbidden(_)));
        assert!(matches!(
            engine.orders_for(&principal).await,
            Err(CheckoutError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_order_queries() {
        let store = InMemoryStore::new();
        let engine = engine(&store);
        let alice = Principal::user(UserId::new());
        let bob = Principal::user(UserId::new());
        let admin = Principal::admin(UserId::new());
        let p1 = seed(&store, "Widget", 100, 10).await;

        let first = engine.checkout(&alice, explicit(&[(p1, 1)])).await.unwrap();
        let second = engine.checkout(&alice, explicit(&[(p1, 2)])).await.unwrap();
        engine.checkout(&bob, explicit(&[(p1, 1)])).await.unwrap();

        let mine: Vec<_> = engine
            .orders_for(&alice)
            .await
            .unwrap()
            .iter()
            .map(Order::id)
            .collect();
        assert_eq!(mine, vec![first.id(), second.id()]);

        assert!(matches!(
            engine.all_orders(&alice).await,
            Err(CheckoutError::Forbidden(_))
        ));
        assert_eq!(engine.all_orders(&admin).await.unwrap().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checkouts_never_oversell() {
        let store = InMemoryStore::new();
        let engine = engine(&store);
        let p1 = seed(&store, "Widget", 100, 2).await;

        let a = engine.clone();
        let b = engine.clone();
        let (ra, rb) = tokio::join!(
            async move { a.checkout(&Principal::user(UserId::new()), explicit(&[(p1, 2)])).await },
            async move { b.checkout(&Principal::user(UserId::new()), explicit(&[(p1, 2)])).await },
        );

        let results = [ra, rb];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(
                err,
                CheckoutError::InsufficientStock { .. } | CheckoutError::StockConflict { .. }
            ));
        }
        assert_eq!(store.product_stock(p1).await, Some(0));
        assert_eq!(store.order_count().await, 1);
    }

    /// Simulates another buyer taking the last units of `contested` right after it is read.
    #[derive(Clone)]
    struct RacingCatalog {
        inner: InMemoryStore,
        contested: ProductId,
    }

    #[async_trait]
    impl CatalogStore for RacingCatalog {
        async fn get_product(&self, product_id: ProductId) -> store::Result<Option<Product>> {
            let product = self.inner.get_product(product_id).await?;
            if product_id == self.contested {
                if let Some(p) = &product {
                    self.inner.try_decrement_stock(product_id, p.stock).await?;
                }
            }
            Ok(product)
        }

        async fn insert_product(&self, product: Product) -> store::Result<()> {
            self.inner.insert_product(product).await
        }

        async fn try_decrement_stock(
            &self,
            product_id: ProductId,
            quantity: u32,
        ) -> store::Result<DecrementOutcome> {
            self.inner.try_decrement_stock(product_id, quantity).await
        }

        async fn increment_stock(&self, product_id: ProductId, quantity: u32) -> store::Result<bool> {
            self.inner.increment_stock(product_id, quantity).await
        }
    }

    #[tokio::test]
    async fn test_stock_conflict_compensates_earlier_lines() {
        let store = InMemoryStore::new();
        let p1 = seed(&store, "Widget", 100, 5).await;
        let p2 = seed(&store, "Gadget", 100, 5).await;
        let catalog = RacingCatalog {
            inner: store.clone(),
            contested: p2,
        };
        let engine = CheckoutEngine::new(catalog, store.clone(), store.clone(), CheckoutSettings::default());

        let err = engine
            .checkout(&Principal::user(UserId::new()), explicit(&[(p1, 2), (p2, 1)]))
            .await
            .unwrap_err();

        assert!(matches!(err, CheckoutError::StockConflict { product_id } if product_id == p2));
        assert_eq!(store.product_stock(p1).await, Some(5));
        assert_eq!(store.product_stock(p2).await, Some(0));
        assert_eq!(store.order_count().await, 0);
    }

    /// Each decrement takes `delay` to complete.
    #[derive(Clone)]
    struct SlowCatalog {
        inner: InMemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl CatalogStore for SlowCatalog {
        async fn get_product(&self, product_id: ProductId) -> store::Result<Option<Product>> {
            self.inner.get_product(product_id).await
        }

        async fn insert_product(&self, product: Product) -> store::Result<()> {
            self.inner.insert_product(product).await
        }

        async fn try_decrement_stock(
            &self,
            product_id: ProductId,
            quantity: u32,
        ) -> store::Result<DecrementOutcome> {
            tokio::time::sleep(self.delay).await;
            self.inner.try_decrement_stock(product_id, quantity).await
        }

        async fn increment_stock(&self, product_id: ProductId, quantity: u32) -> store::Result<bool> {
            self.inner.increment_stock(product_id, quantity).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_compensates_applied_decrements() {
        let store = InMemoryStore::new();
        let p1 = seed(&store, "A", 100, 5).await;
        let p2 = seed(&store, "B", 100, 5).await;
        let p3 = seed(&store, "C", 100, 5).await;
        let catalog = SlowCatalog {
            inner: store.clone(),
            delay: Duration::from_millis(50),
        };
        let settings = CheckoutSettings {
            timeout: Duration::from_millis(70),
            compensation_attempts: 3,
        };
        let engine = CheckoutEngine::new(catalog, store.clone(), store.clone(), settings);

        let err = engine
            .checkout(&Principal::user(UserId::new()), explicit(&[(p1, 1), (p2, 1), (p3, 1)]))
            .await
            .unwrap_err();

        assert!(matches!(err, CheckoutError::Timeout));
        for id in [p1, p2, p3] {
            assert_eq!(store.product_stock(id).await, Some(5));
        }
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_store_error_during_compensation_still_reports_original_error() {
        let store = InMemoryStore::new();
        let settings = CheckoutSettings {
            compensation_attempts: 1,
            ..CheckoutSettings::default()
        };
        let engine = CheckoutEngine::new(store.clone(), store.clone(), store.clone(), settings);
        let p1 = seed(&store, "Widget", 100, 5).await;

        store.set_fail_on_insert_order(true);
        store.set_fail_on_increment(true);
        let err = engine
            .checkout(&Principal::user(UserId::new()), explicit(&[(p1, 2)]))
            .await
            .unwrap_err();

        assert!(matches!(err, CheckoutError::LedgerWriteFailed(_)));
        assert_eq!(store.product_stock(p1).await, Some(3));
    }

    #[tokio::test]
    async fn test_overflowing_total_is_rejected_before_stock_is_taken() {
        let store = InMemoryStore::new();
        let engine = engine(&store);
        let p1 = seed(&store, "Bullion", 5_000_000_000, 2_000_000_000).await;

        let err = engine
            .checkout(&Principal::user(UserId::new()), explicit(&[(p1, 2_000_000_000)]))
            .await
            .unwrap_err();

        assert!(matches!(err, CheckoutError::Invalid(domain::DomainError::TotalOverflow)));
        assert_eq!(store.product_stock(p1).await, Some(2_000_000_000));
        assert_eq!(store.order_count().await, 0);
    }

    /// Panics while recording, after every decrement has been applied.
    #[derive(Clone)]
    struct PanickingLedger;

    #[async_trait]
    impl OrderLedger for PanickingLedger {
        async fn insert_order(&self, _order: &Order) -> store::Result<()> {
            panic!("ledger blew up");
        }

        async fn orders_for_user(&self, _user_id: UserId) -> store::Result<Vec<Order>> {
            Ok(vec![])
        }

        async fn all_orders(&self) -> store::Result<Vec<Order>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_panic_after_decrements_restores_stock() {
        let store = InMemoryStore::new();
        let p1 = seed(&store, "Widget", 100, 5).await;
        let p2 = seed(&store, "Gadget", 100, 5).await;
        let engine = CheckoutEngine::new(
            store.clone(),
            store.clone(),
            PanickingLedger,
            CheckoutSettings::default(),
        );

        let err = engine
            .checkout(&Principal::user(UserId::new()), explicit(&[(p1, 2), (p2, 3)]))
            .await
            .unwrap_err();

        assert!(matches!(err, CheckoutError::Internal(_)));
        assert_eq!(store.product_stock(p1).await, Some(5));
        assert_eq!(store.product_stock(p2).await, Some(5));
    }

    #[test]
    fn test_merge_keeps_first_position_and_claim() {
        let p1 = ProductId::new();
        let p2 = ProductId::new();
        let lines = vec![
            CheckoutLine::new(p1, 1),
            CheckoutLine::new(p2, 1).with_claimed_price(Money::from_cents(7)),
            CheckoutLine::new(p1, 4).with_claimed_price(Money::from_cents(9)),
        ];

        let merged = merge_explicit_lines(&lines).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].product_id, p1);
        assert_eq!(merged[0].quantity, 5);
        assert_eq!(merged[0].claimed_unit_price, Some(Money::from_cents(9)));
        assert_eq!(merged[1].claimed_unit_price, Some(Money::from_cents(7)));
    }

    #[test]
    fn test_merge_rejects_overflowing_quantity() {
        let p1 = ProductId::new();
        let lines = vec![
            CheckoutLine::new(p1, i64::from(u32::MAX)),
            CheckoutLine::new(p1, 1),
        ];
        assert!(matches!(
            merge_explicit_lines(&lines),
            Err(CheckoutError::InvalidQuantity { .. })
        ));

        let too_big = vec![CheckoutLine::new(p1, i64::from(u32::MAX) + 1)];
        assert!(matches!(
            merge_explicit_lines(&too_big),
            Err(CheckoutError::InvalidQuantity { .. })
        ));
    }
}
