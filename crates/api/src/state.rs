//! Shared application state.

use checkout::{CartService, CheckoutEngine, CheckoutSettings};
use store::{CartStore, CatalogStore, OrderLedger, PrincipalDirectory};

/// A backend that provides every store the API needs.
pub trait CommerceStore:
    CatalogStore + CartStore + OrderLedger + PrincipalDirectory + Clone + 'static
{
}

impl<T> CommerceStore for T where
    T: CatalogStore + CartStore + OrderLedger + PrincipalDirectory + Clone + 'static
{
}

/// Shared application state accessible from all handlers.
pub struct AppState<S: CommerceStore> {
    pub engine: CheckoutEngine<S, S, S>,
    pub carts: CartService<S, S>,
    pub principals: S,
}

impl<S: CommerceStore> AppState<S> {
    /// Wires every service to the same backend.
    pub fn new(store: S, settings: CheckoutSettings) -> Self {
        Self {
            engine: CheckoutEngine::new(store.clone(), store.clone(), store.clone(), settings),
            carts: CartService::new(store.clone(), store.clone()),
            principals: store,
        }
    }
}
