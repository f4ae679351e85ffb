use crate::engine::ExchangeError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Everything a handler can fail with, mapped onto HTTP.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Exchange(err) => match err {
                ExchangeError::Validation(_)
                | ExchangeError::InsufficientMargin { .. }
                | ExchangeError::NoLiquidity { .. } => StatusCode::BAD_REQUEST,
                ExchangeError::NotFound(_) => StatusCode::NOT_FOUND,
                ExchangeError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
                ExchangeError::Ledger(_) | ExchangeError::PriceSource(_) => StatusCode::BAD_GATEWAY,
                ExchangeError::Store(_) | ExchangeError::Order(_) | ExchangeError::Book(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Exchange(err) => match err {
                ExchangeError::Validation(_) => "VALIDATION_ERROR",
                ExchangeError::InsufficientMargin { .. } => "INSUFFICIENT_MARGIN",
                ExchangeError::NotFound(_) => "NOT_FOUND",
                ExchangeError::NoLiquidity { .. } => "NO_LIQUIDITY",
                ExchangeError::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
                ExchangeError::Ledger(_) => "LEDGER_ERROR",
                ExchangeError::PriceSource(_) => "PRICE_SOURCE_ERROR",
                ExchangeError::Store(_) => "STORE_ERROR",
                ExchangeError::Order(_) | ExchangeError::Book(_) => "INTERNAL_ERROR",
            },
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Timeout => "TIMEOUT",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // internal details stay in the logs
        let message = if status.is_server_error() && status != StatusCode::GATEWAY_TIMEOUT {
            tracing::error!(error = %self, "request failed");
            status
                .canonical_reason()
                .unwrap_or("Internal server error")
                .to_string()
        } else {
            self.to_string()
        };

        let mut error = json!({
            "code": self.code(),
            "message": message,
        });
        if let ApiError::Exchange(ExchangeError::InsufficientMargin { required, available }) = &self {
            error["required"] = json!(required.value());
            error["available"] = json!(available.value());
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}
