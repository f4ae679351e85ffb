// 2.0: per-instrument central limit order book.
// bids sorted price descending, asks price ascending, both FIFO inside a price level.
// the book only ever holds live GTC limit orders with remaining quantity.

use crate::order::{Order, OrderType};
use crate::types::{InstrumentId, OrderId, Price, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookError {
    #[error("Order {0} cannot rest on the book: only live limit orders rest")]
    NotRestable(OrderId),

    #[error("Order {0} is already on the book")]
    Duplicate(OrderId),

    #[error("Order {order_id} belongs to {actual}, not this book ({expected})")]
    WrongInstrument {
        order_id: OrderId,
        expected: InstrumentId,
        actual: InstrumentId,
    },

    #[error("Order {0} is not on the book")]
    Missing(OrderId),
}

/// Priority key. `sequence` is arrival order into this book, so FIFO within a
/// level holds even when order ids were handed out in a different order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OrderKey {
    side: Side,
    price: Price,
    sequence: u64,
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderKey {
    // keys of different sides never share a map
    fn cmp(&self, other: &Self) -> Ordering {
        let by_price = match self.side {
            Side::Buy => other.price.cmp(&self.price),
            Side::Sell => self.price.cmp(&other.price),
        };
        by_price.then(self.sequence.cmp(&other.sequence))
    }
}

/// Aggregated depth at one price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthLevel {
    pub price: Price,
    pub quantity: Decimal,
    pub order_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSnapshot {
    pub instrument_id: InstrumentId,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub spread: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct OrderBook {
    pub instrument_id: InstrumentId,
    bids: BTreeMap<OrderKey, Order>,
    asks: BTreeMap<OrderKey, Order>,
    order_index: HashMap<OrderId, OrderKey>,
    next_sequence: u64,
}

impl OrderBook {
    pub fn new(instrument_id: InstrumentId) -> Self {
        Self {
            instrument_id,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            order_index: HashMap::new(),
            next_sequence: 0,
        }
    }

    fn side_map(&self, side: Side) -> &BTreeMap<OrderKey, Order> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_map_mut(&mut self, side: Side) -> &mut BTreeMap<OrderKey, Order> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.keys().next().map(|k| k.price)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.keys().next().map(|k| k.price)
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.value() - bid.value()),
            _ => None,
        }
    }

    pub fn mid_price(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Price::new((bid.value() + ask.value()) / Decimal::TWO),
            _ => None,
        }
    }

    /// Resting orders on one side, best first.
    pub fn orders(&self, side: Side) -> impl Iterator<Item = &Order> {
        self.side_map(side).values()
    }

    pub fn has_liquidity(&self, side: Side) -> bool {
        !self.side_map(side).is_empty()
    }

    pub fn insert(&mut self, order: Order) -> Result<(), BookError> {
        if order.instrument_id != self.instrument_id {
            return Err(BookError::WrongInstrument {
                order_id: order.id,
                expected: self.instrument_id,
                actual: order.instrument_id,
            });
        }
        let price = match (order.order_type, order.price) {
            (OrderType::Limit, Some(price)) => price,
            _ => return Err(BookError::NotRestable(order.id)),
        };
        if order.is_terminal() || order.remaining_quantity() <= Decimal::ZERO {
            return Err(BookError::NotRestable(order.id));
        }
        if self.order_index.contains_key(&order.id) {
            return Err(BookError::Duplicate(order.id));
        }

        let key = OrderKey {
            side: order.side,
            price,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.order_index.insert(order.id, key);
        self.side_map_mut(order.side).insert(key, order);
        Ok(())
    }

    pub fn remove(&mut self, order_id: OrderId) -> Option<Order> {
        let key = self.order_index.remove(&order_id)?;
        self.side_map_mut(key.side).remove(&key)
    }

    pub fn get(&self, order_id: OrderId) -> Option<&Order> {
        let key = self.order_index.get(&order_id)?;
        self.side_map(key.side).get(key)
    }

    pub fn contains(&self, order_id: OrderId) -> bool {
        self.order_index.contains_key(&order_id)
    }

    /// Replace a resting order with its post-fill state, keeping its queue
    /// position. a fully filled or terminal order leaves the book.
    pub fn sync_resting(&mut self, updated: &Order) -> Result<(), BookError> {
        let key = *self
            .order_index
            .get(&updated.id)
            .ok_or(BookError::Missing(updated.id))?;

        if updated.is_terminal() || updated.is_filled() {
            self.remove(updated.id);
            return Ok(());
        }

        let slot = self
            .side_map_mut(key.side)
            .get_mut(&key)
            .ok_or(BookError::Missing(updated.id))?;
        *slot = updated.clone();
        Ok(())
    }

    /// Top `max_levels` levels on one side with aggregated quantity.
    pub fn levels(&self, side: Side, max_levels: usize) -> Vec<DepthLevel> {
        let mut levels: Vec<DepthLevel> = Vec::new();

        for (key, order) in self.side_map(side) {
            let same_level = levels.last().is_some_and(|l| l.price == key.price);
            if !same_level {
                if levels.len() >= max_levels {
                    break;
                }
                levels.push(DepthLevel {
                    price: key.price,
                    quantity: Decimal::ZERO,
                    order_count: 0,
                });
            }
            if let Some(level) = levels.last_mut() {
                level.quantity += order.remaining_quantity();
                level.order_count += 1;
            }
        }

        levels
    }

    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        BookSnapshot {
            instrument_id: self.instrument_id,
            bids: self.levels(Side::Buy, depth),
            asks: self.levels(Side::Sell, depth),
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
            spread: self.spread(),
        }
    }

    pub fn order_count(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}
