// 4.0: position tracking. LONG pnl = (exit - entry) * size, SHORT pnl = (entry - exit) * size.
// 4.1 open/increase/reduce transitions at the bottom. positions are closed, never deleted.

use crate::margin::{released_margin, required_margin};
use crate::types::{InstrumentId, PositionId, PositionType, Price, Quote, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: PositionId,
    pub user_id: UserId,
    pub instrument_id: InstrumentId,
    pub position_type: PositionType,
    /// Size-weighted average across opening fills.
    pub entry_price: Price,
    pub size: Decimal,
    /// Locked collateral. entry_price × size × margin_rate while open.
    pub margin: Quote,
    pub realized_pnl: Quote,
    pub commission_paid: Quote,
    closed_size: Decimal,
    closed_notional: Decimal,
    /// Size-weighted average of closing fills. set only once fully closed.
    pub exit_price: Option<Price>,
    pub opened_at: Timestamp,
    pub updated_at: Timestamp,
    pub closed_at: Option<Timestamp>,
}

impl Position {
    pub fn open(
        id: PositionId,
        user_id: UserId,
        instrument_id: InstrumentId,
        position_type: PositionType,
        price: Price,
        size: Decimal,
        margin_rate: Decimal,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            user_id,
            instrument_id,
            position_type,
            entry_price: price,
            size,
            margin: required_margin(price, size, margin_rate),
            realized_pnl: Quote::zero(),
            commission_paid: Quote::zero(),
            closed_size: Decimal::ZERO,
            closed_notional: Decimal::ZERO,
            exit_price: None,
            opened_at: timestamp,
            updated_at: timestamp,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    pub fn entry_notional(&self) -> Quote {
        Quote::new(self.entry_price.value() * self.size)
    }

    pub fn notional(&self, price: Price) -> Quote {
        Quote::new(price.value() * self.size)
    }

    // 4.2: paper gains/losses against the live reference price
    pub fn unrealized_pnl(&self, reference_price: Price) -> Quote {
        calculate_pnl(self.position_type, self.entry_price, reference_price, self.size)
    }

    pub fn record_commission(&mut self, amount: Quote) {
        self.commission_paid = self.commission_paid.add(amount);
    }

    /// Realized pnl net of every commission this position paid.
    pub fn net_realized_pnl(&self) -> Quote {
        self.realized_pnl.sub(self.commission_paid)
    }
}

// 4.3: the pnl formula. authoritative for both realized and unrealized
pub fn calculate_pnl(position_type: PositionType, entry: Price, exit: Price, size: Decimal) -> Quote {
    let pnl = match position_type {
        PositionType::Long => (exit.value() - entry.value()) * size,
        PositionType::Short => (entry.value() - exit.value()) * size,
    };
    Quote::new(pnl)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    pub position: Position,
    pub realized_pnl: Quote,
    pub margin_locked: Quote,
    pub margin_released: Quote,
}

// 4.4: adds to an open position. entry becomes the size-weighted average
pub fn increase_position(
    position: &Position,
    price: Price,
    quantity: Decimal,
    margin_rate: Decimal,
    timestamp: Timestamp,
) -> PositionUpdate {
    debug_assert!(position.is_open(), "cannot increase a closed position");

    let new_size = position.size + quantity;
    let weighted = position.entry_price.value() * position.size + price.value() * quantity;
    let new_entry = Price::new_unchecked(weighted / new_size);
    let locked = required_margin(price, quantity, margin_rate);

    let mut next = position.clone();
    next.size = new_size;
    next.entry_price = new_entry;
    next.margin = position.margin.add(locked);
    next.updated_at = timestamp;

    PositionUpdate {
        position: next,
        realized_pnl: Quote::zero(),
        margin_locked: locked,
        margin_released: Quote::zero(),
    }
}

// 4.5: closes up to `quantity` units. caller handles any flip remainder
pub fn reduce_position(
    position: &Position,
    price: Price,
    quantity: Decimal,
    timestamp: Timestamp,
) -> PositionUpdate {
    debug_assert!(quantity > Decimal::ZERO, "reduce amount must be positive");
    debug_assert!(position.is_open(), "cannot reduce a closed position");

    let closed = quantity.min(position.size);
    let realized = calculate_pnl(position.position_type, position.entry_price, price, closed);
    let released = released_margin(position.margin, closed, position.size);

    let mut next = position.clone();
    next.size = position.size - closed;
    next.margin = position.margin.sub(released);
    next.realized_pnl = position.realized_pnl.add(realized);
    next.closed_size += closed;
    next.closed_notional += closed * price.value();
    next.updated_at = timestamp;

    if next.size.is_zero() {
        next.margin = Quote::zero();
        next.exit_price = Price::new(next.closed_notional / next.closed_size);
        next.closed_at = Some(timestamp);
    }

    PositionUpdate {
        position: next,
        realized_pnl: realized,
        margin_locked: Quote::zero(),
        margin_released: released,
    }
}
