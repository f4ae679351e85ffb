//! REST boundary.
//!
//! Thin axum layer over [`Exchange`]: parses and validates bodies, reads the
//! caller id, runs the engine call on the blocking pool with a timeout, and
//! maps errors onto HTTP statuses.

pub mod dto;
mod error;
mod handlers;

pub use error::ApiError;
pub use handlers::USER_HEADER;

use crate::engine::Exchange;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub exchange: Arc<Exchange>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(exchange: Arc<Exchange>, request_timeout: Duration) -> Self {
        Self {
            exchange,
            request_timeout,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/orders", post(handlers::place_order).get(handlers::list_orders))
        .route("/orders/:order_id", get(handlers::get_order).delete(handlers::cancel_order))
        .route("/orderbook/:skin_id", get(handlers::order_book))
        .route("/instruments", get(handlers::list_instruments))
        .route("/positions", get(handlers::list_positions))
        .route("/positions/:skin_id/close-order", post(handlers::close_position))
        .route("/risk/health", get(handlers::system_health))
        .route("/risk/liquidations", post(handlers::run_liquidations))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
