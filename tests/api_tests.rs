//! HTTP surface tests. requests go straight into the router via `oneshot`.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use skins_core::api::{self, AppState, USER_HEADER};
use skins_core::*;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app() -> Router {
    let config = ExchangeConfig::development();
    let ledger = Arc::new(InMemoryLedger::new());
    for account in &config.demo_accounts {
        ledger.credit(account.user_id, Quote::new(account.balance));
    }
    let prices = Arc::new(StaticPriceSource::new());
    for seed in &config.instruments {
        prices.set_price(seed.id, Price::new_unchecked(seed.reference_price));
    }
    let seeds = config.instruments.clone();
    let exchange = Arc::new(Exchange::new(config, Arc::new(MemoryStore::new()), ledger, prices));
    for seed in seeds {
        exchange.register_instrument(seed.id, seed.name);
    }
    api::router(AppState::new(exchange, Duration::from_secs(5)))
}

async fn send(app: &Router, method: &str, uri: &str, user: Option<u64>, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        request = request.header(USER_HEADER, user.to_string());
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

fn limit_body(side: &str, position_type: &str, price: &str, quantity: u64) -> Value {
    json!({
        "skinId": 1,
        "side": side,
        "orderType": "LIMIT",
        "positionType": position_type,
        "price": price,
        "quantity": quantity,
    })
}

fn market_body(side: &str, position_type: &str, quantity: u64) -> Value {
    json!({
        "skinId": 1,
        "side": side,
        "orderType": "MARKET",
        "positionType": position_type,
        "quantity": quantity,
    })
}

#[tokio::test]
async fn health_is_open() {
    let app = app();
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".to_string()));
}

#[tokio::test]
async fn missing_or_bad_user_header_is_unauthorized() {
    let app = app();
    let (status, body) = send(&app, "POST", "/orders", None, Some(market_body("BUY", "LONG", 1))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let request = Request::builder()
        .uri("/positions")
        .header(USER_HEADER, "alice")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() {
    let app = app();
    let mut body = market_body("BUY", "LONG", 1);
    body["leverage"] = json!(10);
    let (status, response) = send(&app, "POST", "/orders", Some(1), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"]["code"], "BAD_REQUEST");

    let (status, _) = send(&app, "POST", "/orders", Some(1), Some(market_body("HOLD", "LONG", 1))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, response) = send(&app, "POST", "/orders", Some(1), Some(limit_body("BUY", "LONG", "0", 1))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn order_lifecycle_over_http() {
    let app = app();

    let (status, placed) = send(&app, "POST", "/orders", Some(1), Some(limit_body("BUY", "LONG", "85", 10))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(placed["order"]["status"], "PENDING");
    assert_eq!(placed["matchResult"]["fills"], json!([]));
    let order_id = placed["order"]["id"].as_u64().unwrap();

    let (status, book) = send(&app, "GET", "/orderbook/1", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(book["bids"].as_array().unwrap().len(), 1);

    let (status, filled) = send(&app, "POST", "/orders", Some(2), Some(market_body("SELL", "SHORT", 4))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(filled["order"]["status"], "FILLED");
    assert_eq!(filled["matchResult"]["fills"].as_array().unwrap().len(), 1);
    assert_eq!(filled["positions"].as_array().unwrap().len(), 2);

    let uri = format!("/orders/{order_id}");
    let (status, detail) = send(&app, "GET", &uri, Some(1), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["order"]["status"], "PARTIAL");
    assert_eq!(detail["fills"].as_array().unwrap().len(), 1);

    // someone else's order does not exist for them
    let (status, _) = send(&app, "GET", &uri, Some(2), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, cancelled) = send(&app, "DELETE", &uri, Some(1), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "CANCELLED");

    let (status, body) = send(&app, "DELETE", &uri, Some(1), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, orders) = send(&app, "GET", "/orders", Some(1), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(orders.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn engine_rejections_map_to_error_codes() {
    let app = app();

    let (status, body) = send(&app, "POST", "/orders", Some(1), Some(market_body("BUY", "LONG", 1))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "NO_LIQUIDITY");

    // 10000 @ 85 needs 170000 of margin
    let (status, body) = send(&app, "POST", "/orders", Some(1), Some(limit_body("BUY", "LONG", "85", 10000))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_MARGIN");
    assert!(body["error"]["required"].is_string() || body["error"]["required"].is_number());
    assert!(body["error"]["available"].is_string() || body["error"]["available"].is_number());

    let (status, _) = send(&app, "GET", "/orderbook/42", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "POST", "/positions/1/close-order", Some(3), Some(json!({"orderType": "MARKET"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn positions_close_and_risk_endpoints() {
    let app = app();
    send(&app, "POST", "/orders", Some(1), Some(limit_body("BUY", "LONG", "85", 10))).await;
    send(&app, "POST", "/orders", Some(2), Some(market_body("SELL", "SHORT", 10))).await;

    let (status, positions) = send(&app, "GET", "/positions", Some(1), None).await;
    assert_eq!(status, StatusCode::OK);
    let positions = positions.as_array().unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0]["position"]["positionType"], "LONG");
    assert_eq!(positions[0]["risk"]["tier"], "SAFE");

    let (status, health) = send(&app, "GET", "/risk/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["openPositions"], 2);

    let (status, report) = send(&app, "POST", "/risk/liquidations", None, Some(json!({ "skinId": 1 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["evaluated"], 2);
    assert_eq!(report["liquidated"], json!([]));

    // user 3 bids so user 1 can close into it
    send(&app, "POST", "/orders", Some(3), Some(limit_body("BUY", "LONG", "86", 10))).await;
    let (status, closed) = send(&app, "POST", "/positions/1/close-order", Some(1), Some(json!({"orderType": "MARKET"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(closed["order"]["side"], "SELL");
    assert_eq!(closed["matchResult"]["status"], "FILLED");

    let (_, positions) = send(&app, "GET", "/positions", Some(1), None).await;
    assert_eq!(positions, json!([]));

    let (status, instruments) = send(&app, "GET", "/instruments", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(instruments.as_array().unwrap().len(), 3);
    assert_eq!(instruments[0]["tradeCount"], 2);
}
