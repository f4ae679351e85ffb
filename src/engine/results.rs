// 8.0.2: requests, result types and errors for exchange operations.

use crate::book::BookError;
use crate::instrument::Instrument;
use crate::ledger::LedgerError;
use crate::order::{Fill, Order, OrderError, OrderStatus, OrderType, TimeInForce};
use crate::position::Position;
use crate::price_source::PriceError;
use crate::risk::PositionRisk;
use crate::store::StoreError;
use crate::types::{InstrumentId, OrderId, PositionId, PositionType, Price, Quote, Side, UserId};
use rust_decimal::Decimal;
use serde::Serialize;

/// Raw order parameters. validated by the engine before anything is touched.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub user_id: UserId,
    pub instrument_id: InstrumentId,
    pub side: Side,
    pub order_type: OrderType,
    pub position_type: PositionType,
    /// Required for LIMIT, ignored for MARKET.
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    /// Defaults to GTC for LIMIT. MARKET orders are always IOC.
    pub time_in_force: Option<TimeInForce>,
}

impl OrderRequest {
    pub fn limit(
        user_id: UserId,
        instrument_id: InstrumentId,
        side: Side,
        position_type: PositionType,
        price: Decimal,
        quantity: Decimal,
    ) -> Self {
        Self {
            user_id,
            instrument_id,
            side,
            order_type: OrderType::Limit,
            position_type,
            price: Some(price),
            quantity,
            time_in_force: None,
        }
    }

    pub fn market(
        user_id: UserId,
        instrument_id: InstrumentId,
        side: Side,
        position_type: PositionType,
        quantity: Decimal,
    ) -> Self {
        Self {
            user_id,
            instrument_id,
            side,
            order_type: OrderType::Market,
            position_type,
            price: None,
            quantity,
            time_in_force: None,
        }
    }

    pub fn with_time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = Some(time_in_force);
        self
    }

    /// BUY+LONG and SELL+SHORT add exposure; the other pairings close it.
    pub fn opens_exposure(&self) -> bool {
        self.side.exposure() == self.position_type
    }
}

/// How to close an open position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloseRequest {
    pub order_type: OrderType,
    pub price: Option<Decimal>,
}

impl CloseRequest {
    pub fn market() -> Self {
        Self {
            order_type: OrderType::Market,
            price: None,
        }
    }

    pub fn limit(price: Decimal) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderResult {
    pub order: Order,
    pub fills: Vec<Fill>,
    pub remaining_quantity: Decimal,
    pub status: OrderStatus,
    /// Every position this execution touched, both counterparties.
    pub positions: Vec<Position>,
}

impl PlaceOrderResult {
    pub fn filled_quantity(&self) -> Decimal {
        self.fills.iter().map(|f| f.quantity).sum()
    }

    /// Size-weighted fill price, if anything filled.
    pub fn average_price(&self) -> Option<Price> {
        let filled = self.filled_quantity();
        if filled.is_zero() {
            return None;
        }
        let notional: Decimal = self.fills.iter().map(|f| f.price.value() * f.quantity).sum();
        Price::new(notional / filled)
    }
}

/// Order joined with its fills.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub order: Order,
    pub fills: Vec<Fill>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentSummary {
    pub instrument: Instrument,
    pub reference_price: Option<Price>,
    pub last_trade_price: Option<Price>,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub volume: Decimal,
    pub trade_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidationResult {
    pub position_id: PositionId,
    pub user_id: UserId,
    pub instrument_id: InstrumentId,
    pub margin_ratio: Decimal,
    pub reference_price: Price,
    pub execution: PlaceOrderResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidationFailure {
    pub position_id: PositionId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidationReport {
    pub evaluated: usize,
    pub liquidated: Vec<LiquidationResult>,
    pub failed: Vec<LiquidationFailure>,
}

/// Open position with its live risk figures.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionView {
    pub position: Position,
    pub risk: PositionRisk,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),

    #[error("Limit orders require a price")]
    MissingLimitPrice,

    #[error("Limit price must be positive, got {0}")]
    InvalidLimitPrice(Decimal),

    #[error("{user_id} has no open {position_type} position in {instrument_id} to close")]
    NoPositionToClose {
        user_id: UserId,
        instrument_id: InstrumentId,
        position_type: PositionType,
    },

    /// `available` is the open size less close orders already resting.
    #[error("Close quantity {quantity} exceeds closable size {available}")]
    CloseExceedsPosition { quantity: Decimal, available: Decimal },

    #[error("Position {position_id} is not liquidatable at margin ratio {margin_ratio}")]
    NotLiquidatable {
        position_id: PositionId,
        margin_ratio: Decimal,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotFound {
    #[error("Instrument {0} not found")]
    Instrument(InstrumentId),

    #[error("Order {0} not found")]
    Order(OrderId),

    #[error("Position {0} not found")]
    Position(PositionId),

    #[error("{user_id} has no open position in {instrument_id}")]
    OpenPosition {
        user_id: UserId,
        instrument_id: InstrumentId,
    },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExchangeError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Insufficient margin: required {required}, available {available}")]
    InsufficientMargin { required: Quote, available: Quote },

    #[error(transparent)]
    NotFound(#[from] NotFound),

    #[error("No liquidity to match against in {instrument_id}")]
    NoLiquidity { instrument_id: InstrumentId },

    #[error("Order {order_id} changed concurrently")]
    ConcurrencyConflict { order_id: OrderId },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Price source error: {0}")]
    PriceSource(#[from] PriceError),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Book error: {0}")]
    Book(#[from] BookError),
}

impl From<StoreError> for ExchangeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(order_id) => ExchangeError::ConcurrencyConflict { order_id },
            other => ExchangeError::Store(other),
        }
    }
}
