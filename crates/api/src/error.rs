//! API error types with HTTP response mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;

/// API-level error type that maps to HTTP responses.
///
/// Every error renders as `{"error": {"kind": ..., "message": ...}}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed input rejected before reaching the checkout core.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or unknown bearer token.
    #[error("{0}")]
    Unauthorized(String),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Checkout(err) => checkout_status(err),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Checkout(err) => err.kind(),
        }
    }
}

fn checkout_status(err: &CheckoutError) -> StatusCode {
    match err {
        CheckoutError::Forbidden(_) => StatusCode::FORBIDDEN,
        CheckoutError::EmptyCart
        | CheckoutError::InvalidQuantity { .. }
        | CheckoutError::Invalid(_)
        | CheckoutError::InsufficientStock { .. } => StatusCode::BAD_REQUEST,
        CheckoutError::CartNotFound | CheckoutError::ProductNotFound(_) => StatusCode::NOT_FOUND,
        CheckoutError::StockConflict { .. } => StatusCode::CONFLICT,
        CheckoutError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
        CheckoutError::LedgerWriteFailed(_)
        | CheckoutError::Store(_)
        | CheckoutError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        });
        (status, axum::Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use domain::{DomainError, ProductId};

    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CheckoutError::EmptyCart, StatusCode::BAD_REQUEST),
            (
                CheckoutError::InsufficientStock {
                    product_id: ProductId::new(),
                    available: 0,
                },
                StatusCode::BAD_REQUEST,
            ),
            (CheckoutError::ProductNotFound(ProductId::new()), StatusCode::NOT_FOUND),
            (
                CheckoutError::StockConflict {
                    product_id: ProductId::new(),
                },
                StatusCode::CONFLICT,
            ),
            (
                CheckoutError::Invalid(DomainError::TotalOverflow),
                StatusCode::BAD_REQUEST,
            ),
            (CheckoutError::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (CheckoutError::Timeout, StatusCode::SERVICE_UNAVAILABLE),
            (
                CheckoutError::LedgerWriteFailed("down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_kind_passes_through() {
        assert_eq!(ApiError::from(CheckoutError::EmptyCart).kind(), "empty_cart");
        assert_eq!(ApiError::BadRequest("x".into()).kind(), "bad_request");
    }
}
