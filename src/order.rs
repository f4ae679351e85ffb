//! Orders and fills.
//!
//! An order is created once, then mutated only by fills or cancellation.
//! Status only moves forward: PENDING -> PARTIAL -> FILLED, or to CANCELLED.
//! FILLED and CANCELLED are terminal.

use crate::types::{FillId, InstrumentId, OrderId, PositionType, Price, Quote, Side, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order time in force options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good till cancelled. Unmatched remainder rests on the book.
    #[default]
    GTC,
    /// Immediate or cancel. Unmatched remainder is discarded.
    IOC,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Executes against resting liquidity without a price limit.
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Partial,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Order {order_id} is {status:?} and can no longer change")]
    Terminal { order_id: OrderId, status: OrderStatus },

    #[error("Fill of {quantity} exceeds remaining {remaining} on order {order_id}")]
    OverFill {
        order_id: OrderId,
        quantity: Decimal,
        remaining: Decimal,
    },

    #[error("Fill quantity must be positive, got {0}")]
    NonPositiveFill(Decimal),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub instrument_id: InstrumentId,
    pub side: Side,
    pub order_type: OrderType,
    /// Exposure the order targets. independent of side: BUY opens LONG or closes SHORT.
    pub position_type: PositionType,
    pub price: Option<Price>,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub status: OrderStatus,
    pub time_in_force: TimeInForce,
    pub created_at: Timestamp,
    pub filled_at: Option<Timestamp>,
    pub cancelled_at: Option<Timestamp>,
}

impl Order {
    pub fn new_limit(
        id: OrderId,
        user_id: UserId,
        instrument_id: InstrumentId,
        side: Side,
        position_type: PositionType,
        price: Price,
        quantity: Decimal,
        time_in_force: TimeInForce,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            user_id,
            instrument_id,
            side,
            order_type: OrderType::Limit,
            position_type,
            price: Some(price),
            quantity,
            filled_quantity: Decimal::ZERO,
            status: OrderStatus::Pending,
            time_in_force,
            created_at: timestamp,
            filled_at: None,
            cancelled_at: None,
        }
    }

    pub fn new_market(
        id: OrderId,
        user_id: UserId,
        instrument_id: InstrumentId,
        side: Side,
        position_type: PositionType,
        quantity: Decimal,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            user_id,
            instrument_id,
            side,
            order_type: OrderType::Market,
            position_type,
            price: None,
            quantity,
            filled_quantity: Decimal::ZERO,
            status: OrderStatus::Pending,
            time_in_force: TimeInForce::IOC,
            created_at: timestamp,
            filled_at: None,
            cancelled_at: None,
        }
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    pub fn is_filled(&self) -> bool {
        self.remaining_quantity().is_zero()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when the order's side adds exposure in its own position direction
    /// (BUY+LONG, SELL+SHORT). Such orders must pass the margin check.
    pub fn opens_exposure(&self) -> bool {
        self.side.exposure() == self.position_type
    }

    /// Only GTC limit orders may rest on the book.
    pub fn can_rest(&self) -> bool {
        self.order_type == OrderType::Limit && self.time_in_force == TimeInForce::GTC
    }

    pub fn apply_fill(&mut self, quantity: Decimal, timestamp: Timestamp) -> Result<(), OrderError> {
        if self.is_terminal() {
            return Err(OrderError::Terminal {
                order_id: self.id,
                status: self.status,
            });
        }
        if quantity <= Decimal::ZERO {
            return Err(OrderError::NonPositiveFill(quantity));
        }
        let remaining = self.remaining_quantity();
        if quantity > remaining {
            return Err(OrderError::OverFill {
                order_id: self.id,
                quantity,
                remaining,
            });
        }

        self.filled_quantity += quantity;
        if self.is_filled() {
            self.status = OrderStatus::Filled;
            self.filled_at = Some(timestamp);
        } else {
            self.status = OrderStatus::Partial;
        }
        Ok(())
    }

    /// Cancel whatever is left. returns the discarded quantity.
    pub fn cancel(&mut self, timestamp: Timestamp) -> Result<Decimal, OrderError> {
        if self.is_terminal() {
            return Err(OrderError::Terminal {
                order_id: self.id,
                status: self.status,
            });
        }
        let discarded = self.remaining_quantity();
        self.status = OrderStatus::Cancelled;
        self.cancelled_at = Some(timestamp);
        Ok(discarded)
    }
}

/// One match between a buy and a sell order. immutable once committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub id: FillId,
    pub instrument_id: InstrumentId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buy_user_id: UserId,
    pub sell_user_id: UserId,
    /// Always the resting (maker) order's price.
    pub price: Price,
    pub quantity: Decimal,
    pub maker_order_id: OrderId,
    pub taker_side: Side,
    pub created_at: Timestamp,
}

impl Fill {
    pub fn notional(&self) -> Quote {
        Quote::new(self.price.value() * self.quantity)
    }

    pub fn user_on(&self, side: Side) -> UserId {
        match side {
            Side::Buy => self.buy_user_id,
            Side::Sell => self.sell_user_id,
        }
    }

    pub fn order_on(&self, side: Side) -> OrderId {
        match side {
            Side::Buy => self.buy_order_id,
            Side::Sell => self.sell_order_id,
        }
    }

    pub fn involves(&self, order_id: OrderId) -> bool {
        self.buy_order_id == order_id || self.sell_order_id == order_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limit_buy(quantity: Decimal) -> Order {
        Order::new_limit(
            OrderId(1),
            UserId(1),
            InstrumentId(1),
            Side::Buy,
            PositionType::Long,
            Price::new_unchecked(dec!(85)),
            quantity,
            TimeInForce::GTC,
            Timestamp::from_millis(0),
        )
    }

    #[test]
    fn partial_then_full_fill() {
        let mut order = limit_buy(dec!(10));
        assert_eq!(order.status, OrderStatus::Pending);

        order.apply_fill(dec!(4), Timestamp::from_millis(1)).unwrap();
        assert_eq!(order.status, OrderStatus::Partial);
        assert_eq!(order.remaining_quantity(), dec!(6));
        assert!(order.filled_at.is_none());

        order.apply_fill(dec!(6), Timestamp::from_millis(2)).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.remaining_quantity(), dec!(0));
        assert_eq!(order.filled_at, Some(Timestamp::from_millis(2)));
    }

    #[test]
    fn overfill_rejected_without_mutation() {
        let mut order = limit_buy(dec!(5));
        let err = order.apply_fill(dec!(6), Timestamp::from_millis(1)).unwrap_err();
        assert!(matches!(err, OrderError::OverFill { .. }));
        assert_eq!(order.filled_quantity, dec!(0));
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn terminal_orders_never_reopen() {
        let mut order = limit_buy(dec!(5));
        order.apply_fill(dec!(5), Timestamp::from_millis(1)).unwrap();
        assert!(matches!(
            order.cancel(Timestamp::from_millis(2)),
            Err(OrderError::Terminal { .. })
        ));

        let mut cancelled = limit_buy(dec!(5));
        assert_eq!(cancelled.cancel(Timestamp::from_millis(1)).unwrap(), dec!(5));
        assert!(matches!(
            cancelled.apply_fill(dec!(1), Timestamp::from_millis(2)),
            Err(OrderError::Terminal { .. })
        ));
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
    }

    #[test]
    fn exposure_intent() {
        let open_long = limit_buy(dec!(1));
        assert!(open_long.opens_exposure());

        let mut close_short = limit_buy(dec!(1));
        close_short.position_type = PositionType::Short;
        assert!(!close_short.opens_exposure());
    }

    #[test]
    fn market_orders_never_rest() {
        let order = Order::new_market(
            OrderId(2),
            UserId(1),
            InstrumentId(1),
            Side::Sell,
            PositionType::Short,
            dec!(3),
            Timestamp::from_millis(0),
        );
        assert!(!order.can_rest());
        assert_eq!(order.time_in_force, TimeInForce::IOC);
        assert!(order.price.is_none());
    }

    #[test]
    fn order_serializes_camel_case() {
        let order = limit_buy(dec!(2));
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["orderType"], "LIMIT");
        assert_eq!(json["positionType"], "LONG");
        assert_eq!(json["timeInForce"], "GTC");
        assert_eq!(json["status"], "PENDING");
    }
}
