//! Cart endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use domain::{Cart, CartLine};
use serde::{Deserialize, Serialize};

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::routes::orders::parse_product_id;
use crate::state::{AppState, CommerceStore};

#[derive(Debug, Deserialize)]
pub struct AddToCartBody {
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CartResponse {
    pub user_id: String,
    pub items: Vec<CartLineResponse>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CartLineResponse {
    pub product_id: String,
    pub quantity: u32,
}

impl From<&CartLine> for CartLineResponse {
    fn from(line: &CartLine) -> Self {
        Self {
            product_id: line.product_id.to_string(),
            quantity: line.quantity,
        }
    }
}

impl From<&Cart> for CartResponse {
    fn from(cart: &Cart) -> Self {
        Self {
            user_id: cart.user_id.to_string(),
            items: cart.lines().iter().map(CartLineResponse::from).collect(),
            updated_at: cart.updated_at,
        }
    }
}

/// GET /cart: the caller's cart; empty if none was created yet.
#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn get<S: CommerceStore>(
    State(state): State<Arc<AppState<S>>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.carts.get_cart(&user).await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// POST /cart/add: add units of a product, incrementing an existing line.
#[tracing::instrument(skip(state, body), fields(user_id = %user.user_id))]
pub async fn add<S: CommerceStore>(
    State(state): State<Arc<AppState<S>>>,
    AuthenticatedUser(user): AuthenticatedUser,
    body: Result<Json<AddToCartBody>, JsonRejection>,
) -> Result<Json<CartResponse>, ApiError> {
    let Json(body) = body?;
    let product_id = parse_product_id(&body.product_id)?;
    let cart = state.carts.add_item(&user, product_id, body.quantity).await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// DELETE /cart/remove/{product_id}: drop a product from the cart.
#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn remove<S: CommerceStore>(
    State(state): State<Arc<AppState<S>>>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(product_id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    let product_id = parse_product_id(&product_id)?;
    let cart = state.carts.remove_item(&user, product_id).await?;
    Ok(Json(CartResponse::from(&cart)))
}
