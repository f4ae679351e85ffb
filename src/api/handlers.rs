use super::dto::{ClosePositionBody, LiquidationSweepBody, PlaceOrderBody, PlaceOrderResponse};
use super::error::ApiError;
use super::AppState;
use crate::book::BookSnapshot;
use crate::engine::{
    CloseRequest, Exchange, ExchangeError, InstrumentSummary, LiquidationReport, NotFound, OrderDetail, PositionView,
};
use crate::order::Order;
use crate::risk::SystemHealth;
use crate::types::{InstrumentId, OrderId, UserId};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};

/// Caller identity, set by the authenticating proxy in front of this service.
pub const USER_HEADER: &str = "x-user-id";

fn caller(headers: &HeaderMap) -> Result<UserId, ApiError> {
    let raw = headers
        .get(USER_HEADER)
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_HEADER} header")))?;
    raw.to_str()
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(UserId)
        .ok_or_else(|| ApiError::Unauthorized(format!("invalid {USER_HEADER} header")))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Engine calls may block on the ledger, store or price source, so they run
/// on the blocking pool under the request budget.
async fn run_blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Exchange) -> Result<T, ExchangeError> + Send + 'static,
{
    let exchange = state.exchange.clone();
    let task = tokio::task::spawn_blocking(move || f(&exchange));
    match tokio::time::timeout(state.request_timeout, task).await {
        Err(_) => Err(ApiError::Timeout),
        Ok(Err(join_err)) => Err(ApiError::Internal(join_err.to_string())),
        Ok(Ok(result)) => result.map_err(ApiError::from),
    }
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn place_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PlaceOrderBody>, JsonRejection>,
) -> Result<(StatusCode, Json<PlaceOrderResponse>), ApiError> {
    let user_id = caller(&headers)?;
    let request = body(payload)?.into_request(user_id);
    let result = run_blocking(&state, move |exchange| exchange.place_order(request)).await?;
    Ok((StatusCode::CREATED, Json(result.into())))
}

pub async fn list_orders(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Vec<Order>>, ApiError> {
    let user_id = caller(&headers)?;
    let orders = run_blocking(&state, move |exchange| exchange.user_orders(user_id)).await?;
    Ok(Json(orders))
}

pub async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<u64>,
) -> Result<Json<OrderDetail>, ApiError> {
    let user_id = caller(&headers)?;
    let detail = run_blocking(&state, move |exchange| exchange.get_order(OrderId(order_id), user_id)).await?;
    Ok(Json(detail))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<u64>,
) -> Result<Json<Order>, ApiError> {
    let user_id = caller(&headers)?;
    let order_id = OrderId(order_id);
    let cancelled = run_blocking(&state, move |exchange| exchange.cancel_order(order_id, user_id)).await?;
    cancelled
        .map(Json)
        .ok_or_else(|| ApiError::Exchange(NotFound::Order(order_id).into()))
}

pub async fn order_book(State(state): State<AppState>, Path(skin_id): Path<u64>) -> Result<Json<BookSnapshot>, ApiError> {
    let snapshot = run_blocking(&state, move |exchange| exchange.order_book(InstrumentId(skin_id))).await?;
    Ok(Json(snapshot))
}

pub async fn list_instruments(State(state): State<AppState>) -> Result<Json<Vec<InstrumentSummary>>, ApiError> {
    let instruments = run_blocking(&state, |exchange| Ok(exchange.instruments())).await?;
    Ok(Json(instruments))
}

pub async fn close_position(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(skin_id): Path<u64>,
    payload: Result<Json<ClosePositionBody>, JsonRejection>,
) -> Result<Json<PlaceOrderResponse>, ApiError> {
    let user_id = caller(&headers)?;
    let close = body(payload)?;
    let request = CloseRequest {
        order_type: close.order_type,
        price: close.price,
    };
    let result = run_blocking(&state, move |exchange| {
        exchange.close_position(user_id, InstrumentId(skin_id), request)
    })
    .await?;
    Ok(Json(result.into()))
}

pub async fn list_positions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<PositionView>>, ApiError> {
    let user_id = caller(&headers)?;
    let positions = run_blocking(&state, move |exchange| exchange.user_positions(user_id)).await?;
    Ok(Json(positions))
}

pub async fn system_health(State(state): State<AppState>) -> Result<Json<SystemHealth>, ApiError> {
    let health = run_blocking(&state, |exchange| exchange.system_health()).await?;
    Ok(Json(health))
}

pub async fn run_liquidations(
    State(state): State<AppState>,
    payload: Result<Json<LiquidationSweepBody>, JsonRejection>,
) -> Result<Json<LiquidationReport>, ApiError> {
    let sweep = body(payload)?;
    let instrument_id = sweep.skin_id.map(InstrumentId);
    let report = run_blocking(&state, move |exchange| exchange.run_liquidations(instrument_id)).await?;
    Ok(Json(report))
}
