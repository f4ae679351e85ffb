// 11.0: every state change produces an event. used for the audit trail and for
// notifying external systems. the EventPayload enum lists all event types.

use crate::order::{OrderType, TimeInForce};
use crate::types::{FillId, InstrumentId, OrderId, PositionId, PositionType, Price, Quote, Side, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    // Order events
    OrderPlaced(OrderPlacedEvent),
    OrderCancelled(OrderCancelledEvent),
    OrderRejected(OrderRejectedEvent),

    // Trade events
    Fill(FillEvent),

    // Position events
    PositionOpened(PositionEvent),
    PositionUpdated(PositionEvent),
    PositionClosed(PositionEvent),

    // Risk events
    Liquidation(LiquidationEvent),
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::OrderPlaced(_) => "OrderPlaced",
            EventPayload::OrderCancelled(_) => "OrderCancelled",
            EventPayload::OrderRejected(_) => "OrderRejected",
            EventPayload::Fill(_) => "Fill",
            EventPayload::PositionOpened(_) => "PositionOpened",
            EventPayload::PositionUpdated(_) => "PositionUpdated",
            EventPayload::PositionClosed(_) => "PositionClosed",
            EventPayload::Liquidation(_) => "Liquidation",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedEvent {
    pub instrument_id: InstrumentId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub side: Side,
    pub order_type: OrderType,
    pub position_type: PositionType,
    pub time_in_force: TimeInForce,
    pub quantity: Decimal,
    pub price: Option<Price>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledEvent {
    pub instrument_id: InstrumentId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub discarded_quantity: Decimal,
    pub reason: CancelReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    UserRequested,
    /// IOC or MARKET remainder dropped after matching.
    UnfilledRemainder,
    /// Close order left without the position it was closing.
    PositionClosed,
    /// Close order replaced by a whole-position close.
    Superseded,
    /// Maker the ledger could not lock margin for when it was hit.
    InsufficientCollateral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRejectedEvent {
    pub instrument_id: InstrumentId,
    pub user_id: UserId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    pub fill_id: FillId,
    pub instrument_id: InstrumentId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub maker_order_id: OrderId,
    pub price: Price,
    pub quantity: Decimal,
    /// Charged to each side.
    pub commission: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionEvent {
    pub position_id: PositionId,
    pub user_id: UserId,
    pub instrument_id: InstrumentId,
    pub position_type: PositionType,
    pub fill_id: FillId,
    pub quantity: Decimal,
    pub price: Price,
    pub size_after: Decimal,
    pub realized_pnl: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub position_id: PositionId,
    pub user_id: UserId,
    pub instrument_id: InstrumentId,
    pub margin_ratio: Decimal,
    pub reference_price: Price,
    pub closed_quantity: Decimal,
    pub order_id: OrderId,
}

/// Append-only log with bounded retention. oldest events drop first.
#[derive(Debug)]
pub struct EventLog {
    events: VecDeque<Event>,
    next_id: u64,
    max_events: usize,
}

impl EventLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::new(),
            next_id: 1,
            max_events,
        }
    }

    pub fn emit(&mut self, timestamp: Timestamp, payload: EventPayload) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.events.push_back(Event::new(id, timestamp, payload));

        while self.events.len() > self.max_events {
            self.events.pop_front();
        }
        id
    }

    pub fn recent(&self, count: usize) -> Vec<Event> {
        let start = self.events.len().saturating_sub(count);
        self.events.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total ever emitted, including those already dropped.
    pub fn emitted(&self) -> u64 {
        self.next_id - 1
    }
}
