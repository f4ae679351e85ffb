// request and response bodies. requests reject unknown fields so a typo never
// silently turns into a default.

use crate::engine::{OrderRequest, PlaceOrderResult};
use crate::order::{Fill, Order, OrderStatus, OrderType, TimeInForce};
use crate::position::Position;
use crate::types::{InstrumentId, PositionType, Side, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlaceOrderBody {
    pub skin_id: u64,
    pub side: Side,
    pub order_type: OrderType,
    pub position_type: PositionType,
    #[serde(default)]
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    #[serde(default)]
    pub time_in_force: Option<TimeInForce>,
}

impl PlaceOrderBody {
    pub fn into_request(self, user_id: UserId) -> OrderRequest {
        OrderRequest {
            user_id,
            instrument_id: InstrumentId(self.skin_id),
            side: self.side,
            order_type: self.order_type,
            position_type: self.position_type,
            price: self.price,
            quantity: self.quantity,
            time_in_force: self.time_in_force,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClosePositionBody {
    pub order_type: OrderType,
    #[serde(default)]
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub fills: Vec<Fill>,
    pub remaining_quantity: Decimal,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderResponse {
    pub order: Order,
    pub match_result: MatchResult,
    pub positions: Vec<Position>,
}

impl From<PlaceOrderResult> for PlaceOrderResponse {
    fn from(result: PlaceOrderResult) -> Self {
        Self {
            order: result.order,
            match_result: MatchResult {
                fills: result.fills,
                remaining_quantity: result.remaining_quantity,
                status: result.status,
            },
            positions: result.positions,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LiquidationSweepBody {
    #[serde(default)]
    pub skin_id: Option<u64>,
}
