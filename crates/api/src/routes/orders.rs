//! Checkout and order history endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use domain::{CheckoutLine, CheckoutRequest, Money, Order, OrderLine, ProductId};
use serde::{Deserialize, Serialize};

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::state::{AppState, CommerceStore};

// -- Request types --

/// Body of `POST /orders/checkout`. An empty body, or one without `items`,
/// checks out the caller's cart.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    pub items: Option<Vec<CheckoutItemBody>>,
    pub total_amount: Option<i64>,
    pub shipping_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutItemBody {
    pub product: String,
    pub quantity: i64,
    /// Claimed unit price in cents. Never trusted.
    pub price: Option<i64>,
}

impl CheckoutBody {
    fn parse(bytes: &[u8]) -> Result<Self, ApiError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(bytes)
            .map_err(|e| ApiError::BadRequest(format!("Invalid checkout body: {e}")))
    }

    fn into_request(self) -> Result<CheckoutRequest, ApiError> {
        let Some(items) = self.items else {
            return Ok(CheckoutRequest::FromCart {
                shipping_address: self.shipping_address,
            });
        };

        if items.is_empty() {
            return Err(ApiError::BadRequest("items must not be empty".to_string()));
        }

        let lines = items
            .into_iter()
            .map(|item| {
                let product_id = parse_product_id(&item.product)?;
                let line = CheckoutLine::new(product_id, item.quantity);
                Ok(match item.price {
                    Some(cents) => line.with_claimed_price(Money::from_cents(cents)),
                    None => line,
                })
            })
            .collect::<Result<Vec<_>, ApiError>>()?;

        Ok(CheckoutRequest::Explicit {
            lines,
            claimed_total: self.total_amount.map(Money::from_cents),
            shipping_address: self.shipping_address,
        })
    }
}

// -- Response types --

/// The one external representation of an order. Identities are strings.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub items: Vec<OrderLineResponse>,
    pub total_amount_cents: i64,
    pub status: String,
    pub shipping_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderLineResponse {
    pub product_id: String,
    pub name: String,
    pub price_cents: i64,
    pub quantity: u32,
}

impl From<&OrderLine> for OrderLineResponse {
    fn from(line: &OrderLine) -> Self {
        Self {
            product_id: line.product_id.to_string(),
            name: line.name.clone(),
            price_cents: line.unit_price.cents(),
            quantity: line.quantity,
        }
    }
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            user_id: order.user_id().to_string(),
            items: order.lines().iter().map(OrderLineResponse::from).collect(),
            total_amount_cents: order.total_amount().cents(),
            status: order.status().to_string(),
            shipping_address: order.shipping_address().map(str::to_owned),
            created_at: order.created_at(),
        }
    }
}

// -- Handlers --

/// POST /orders/checkout: place an order from the cart or an explicit item list.
#[tracing::instrument(skip(state, body), fields(user_id = %user.user_id))]
pub async fn checkout<S: CommerceStore>(
    State(state): State<Arc<AppState<S>>>,
    AuthenticatedUser(user): AuthenticatedUser,
    body: Bytes,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let request = CheckoutBody::parse(&body)?.into_request()?;
    let order = state.engine.checkout(&user, request).await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders/my-orders: the caller's orders, oldest first.
#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn my_orders<S: CommerceStore>(
    State(state): State<Arc<AppState<S>>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.engine.orders_for(&user).await?;
    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

/// GET /orders/all: every order. Admin only.
#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn all<S: CommerceStore>(
    State(state): State<Arc<AppState<S>>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.engine.all_orders(&user).await?;
    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

pub(crate) fn parse_product_id(id: &str) -> Result<ProductId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid product id {id:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_and_empty_object_mean_cart_mode() {
        for raw in ["", "  \n", "{}"] {
            let request = CheckoutBody::parse(raw.as_bytes()).unwrap().into_request().unwrap();
            assert!(request.is_cart_mode(), "{raw:?}");
        }
    }

    #[test]
    fn test_explicit_body_maps_claims() {
        let id = ProductId::new();
        let raw = format!(
            r#"{{"items":[{{"product":"{id}","quantity":2,"price":150}}],"totalAmount":300,"shippingAddress":"1 Main St"}}"#
        );

        let request = CheckoutBody::parse(raw.as_bytes()).unwrap().into_request().unwrap();
        let CheckoutRequest::Explicit {
            lines,
            claimed_total,
            shipping_address,
        } = request
        else {
            panic!("expected explicit mode");
        };
        assert_eq!(lines, vec![CheckoutLine::new(id, 2).with_claimed_price(Money::from_cents(150))]);
        assert_eq!(claimed_total, Some(Money::from_cents(300)));
        assert_eq!(shipping_address.as_deref(), Some("1 Main St"));
    }

    #[test]
    fn test_rejects_malformed_input() {
        let empty_items = CheckoutBody::parse(br#"{"items":[]}"#).unwrap().into_request();
        assert!(matches!(empty_items, Err(ApiError::BadRequest(_))));

        let bad_id = CheckoutBody::parse(br#"{"items":[{"product":"nope","quantity":1}]}"#)
            .unwrap()
            .into_request();
        assert!(matches!(bad_id, Err(ApiError::BadRequest(_))));

        assert!(matches!(CheckoutBody::parse(b"{not json"), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_order_response_renders_ids_as_strings() {
        let product_id = ProductId::new();
        let order = Order::place(
            domain::UserId::new(),
            vec![OrderLine {
                product_id,
                name: "Widget".to_string(),
                unit_price: Money::from_cents(1000),
                quantity: 2,
            }],
            None,
        )
        .unwrap();

        let json = serde_json::to_value(OrderResponse::from(&order)).unwrap();
        assert_eq!(json["id"], order.id().to_string());
        assert_eq!(json["items"][0]["product_id"], product_id.to_string());
        assert_eq!(json["total_amount_cents"], 2000);
        assert_eq!(json["status"], "Placed");
    }
}
