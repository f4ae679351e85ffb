//! Persistence boundary.
//!
//! The engine reads orders, fills and positions through `OrderStore` and
//! `PositionStore`, and writes them only through `Repository::commit`, one
//! `StoreTx` per executed order. Orders own their fills by id. Positions are
//! looked up by id or by `(user, instrument)`; nothing stores back-pointers.

use crate::order::{Fill, Order};
use crate::position::Position;
use crate::types::{FillId, InstrumentId, OrderId, PositionId, UserId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A write would re-open or rewrite a terminal order.
    #[error("Conflicting write for order {0}")]
    Conflict(OrderId),

    #[error("User {user_id} already has an open position {existing} in {instrument_id}")]
    DuplicateOpenPosition {
        user_id: UserId,
        instrument_id: InstrumentId,
        existing: PositionId,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Writes produced by one order execution. all upserts.
#[derive(Debug, Clone, Default)]
pub struct StoreTx {
    pub orders: Vec<Order>,
    pub fills: Vec<Fill>,
    pub positions: Vec<Position>,
}

impl StoreTx {
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty() && self.fills.is_empty() && self.positions.is_empty()
    }
}

pub trait OrderStore: Send + Sync {
    fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError>;
    fn fills_for_order(&self, order_id: OrderId) -> Result<Vec<Fill>, StoreError>;
    fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError>;
}

pub trait PositionStore: Send + Sync {
    fn position(&self, position_id: PositionId) -> Result<Option<Position>, StoreError>;
    fn open_position(&self, user_id: UserId, instrument_id: InstrumentId) -> Result<Option<Position>, StoreError>;
    /// All open positions, optionally limited to one instrument.
    fn open_positions(&self, instrument_id: Option<InstrumentId>) -> Result<Vec<Position>, StoreError>;
    fn positions_for_user(&self, user_id: UserId) -> Result<Vec<Position>, StoreError>;
}

pub trait Repository: OrderStore + PositionStore {
    fn next_order_id(&self) -> OrderId;
    fn next_fill_id(&self) -> FillId;
    fn next_position_id(&self) -> PositionId;

    /// Applies every write in `tx` or none of them.
    fn commit(&self, tx: StoreTx) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    fills: HashMap<FillId, Fill>,
    fills_by_order: HashMap<OrderId, Vec<FillId>>,
    positions: HashMap<PositionId, Position>,
    open_index: HashMap<(UserId, InstrumentId), PositionId>,
}

impl Tables {
    fn check(&self, tx: &StoreTx) -> Result<(), StoreError> {
        for order in &tx.orders {
            if let Some(stored) = self.orders.get(&order.id) {
                let reopened = stored.is_terminal() && stored != order;
                if reopened || order.filled_quantity < stored.filled_quantity {
                    return Err(StoreError::Conflict(order.id));
                }
            }
        }

        // a position closing in this tx frees its slot for one opened in the same tx
        let closing: Vec<PositionId> = tx
            .positions
            .iter()
            .filter(|p| !p.is_open())
            .map(|p| p.id)
            .collect();
        for position in tx.positions.iter().filter(|p| p.is_open()) {
            let key = (position.user_id, position.instrument_id);
            if let Some(&existing) = self.open_index.get(&key) {
                if existing != position.id && !closing.contains(&existing) {
                    return Err(StoreError::DuplicateOpenPosition {
                        user_id: position.user_id,
                        instrument_id: position.instrument_id,
                        existing,
                    });
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, tx: StoreTx) {
        for order in tx.orders {
            self.orders.insert(order.id, order);
        }

        for fill in tx.fills {
            if self.fills.contains_key(&fill.id) {
                continue;
            }
            for order_id in [fill.buy_order_id, fill.sell_order_id] {
                self.fills_by_order.entry(order_id).or_default().push(fill.id);
            }
            self.fills.insert(fill.id, fill);
        }

        // closes first so a flip can take the slot
        let (closed, open): (Vec<Position>, Vec<Position>) = tx.positions.into_iter().partition(|p| !p.is_open());
        for position in closed {
            let key = (position.user_id, position.instrument_id);
            if self.open_index.get(&key) == Some(&position.id) {
                self.open_index.remove(&key);
            }
            self.positions.insert(position.id, position);
        }
        for position in open {
            self.open_index
                .insert((position.user_id, position.instrument_id), position.id);
            self.positions.insert(position.id, position);
        }
    }
}

/// In-memory arena keyed by generated ids.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    order_seq: AtomicU64,
    fill_seq: AtomicU64,
    position_seq: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            order_seq: AtomicU64::new(1),
            fill_seq: AtomicU64::new(1),
            position_seq: AtomicU64::new(1),
        }
    }

    pub fn order_count(&self) -> usize {
        self.tables.read().orders.len()
    }

    pub fn fill_count(&self) -> usize {
        self.tables.read().fills.len()
    }

    pub fn all_fills(&self) -> Vec<Fill> {
        let mut fills: Vec<Fill> = self.tables.read().fills.values().cloned().collect();
        fills.sort_by_key(|f| f.id);
        fills
    }

    pub fn all_positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.tables.read().positions.values().cloned().collect();
        positions.sort_by_key(|p| p.id);
        positions
    }
}

impl OrderStore for MemoryStore {
    fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.tables.read().orders.get(&order_id).cloned())
    }

    fn fills_for_order(&self, order_id: OrderId) -> Result<Vec<Fill>, StoreError> {
        let tables = self.tables.read();
        let fills = tables
            .fills_by_order
            .get(&order_id)
            .map(|ids| ids.iter().filter_map(|id| tables.fills.get(id).cloned()).collect())
            .unwrap_or_default();
        Ok(fills)
    }

    fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .tables
            .read()
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }
}

impl PositionStore for MemoryStore {
    fn position(&self, position_id: PositionId) -> Result<Option<Position>, StoreError> {
        Ok(self.tables.read().positions.get(&position_id).cloned())
    }

    fn open_position(&self, user_id: UserId, instrument_id: InstrumentId) -> Result<Option<Position>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .open_index
            .get(&(user_id, instrument_id))
            .and_then(|id| tables.positions.get(id))
            .cloned())
    }

    fn open_positions(&self, instrument_id: Option<InstrumentId>) -> Result<Vec<Position>, StoreError> {
        let tables = self.tables.read();
        let mut positions: Vec<Position> = tables
            .open_index
            .iter()
            .filter(|((_, instrument), _)| instrument_id.map_or(true, |id| id == *instrument))
            .filter_map(|(_, id)| tables.positions.get(id).cloned())
            .collect();
        positions.sort_by_key(|p| p.id);
        Ok(positions)
    }

    fn positions_for_user(&self, user_id: UserId) -> Result<Vec<Position>, StoreError> {
        let mut positions: Vec<Position> = self
            .tables
            .read()
            .positions
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        positions.sort_by_key(|p| p.id);
        Ok(positions)
    }
}

impl Repository for MemoryStore {
    fn next_order_id(&self) -> OrderId {
        OrderId(self.order_seq.fetch_add(1, Ordering::Relaxed))
    }

    fn next_fill_id(&self) -> FillId {
        FillId(self.fill_seq.fetch_add(1, Ordering::Relaxed))
    }

    fn next_position_id(&self) -> PositionId {
        PositionId(self.position_seq.fetch_add(1, Ordering::Relaxed))
    }

    fn commit(&self, tx: StoreTx) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        tables.check(&tx)?;
        tables.apply(tx);
        Ok(())
    }
}
