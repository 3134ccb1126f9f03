//! HTTP API server for checkout, carts and order history.
//!
//! Routes live under `/api/v1`, with `/health` and `/metrics` at the root.
//! Requests authenticate with a bearer token; handlers delegate to the
//! checkout engine and cart service in [`AppState`].

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::{AppState, CommerceStore};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: CommerceStore>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    let v1 = Router::new()
        .route("/orders/checkout", post(routes::orders::checkout::<S>))
        .route("/orders/my-orders", get(routes::orders::my_orders::<S>))
        .route("/orders/all", get(routes::orders::all::<S>))
        .route("/cart", get(routes::cart::get::<S>))
        .route("/cart/add", post(routes::cart::add::<S>))
        .route("/cart/remove/{product_id}", delete(routes::cart::remove::<S>));

    Router::new()
        .route("/health", get(routes::health::check))
        .nest("/api/v1", v1)
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
