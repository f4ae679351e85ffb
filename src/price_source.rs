// 6.0: reference prices come from outside the engine (marketplace aggregation).
// the engine only asks for the current price of one instrument.

use crate::types::{InstrumentId, Price};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceError {
    #[error("No reference price for {0}")]
    Unavailable(InstrumentId),

    #[error("Price source failed: {0}")]
    Source(String),
}

pub trait PriceSource: Send + Sync {
    fn reference_price(&self, instrument_id: InstrumentId) -> Result<Price, PriceError>;
}

/// Price table set by hand. used by tests and the demo server.
#[derive(Debug, Default)]
pub struct StaticPriceSource {
    prices: RwLock<HashMap<InstrumentId, Price>>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prices(prices: impl IntoIterator<Item = (InstrumentId, Price)>) -> Self {
        Self {
            prices: RwLock::new(prices.into_iter().collect()),
        }
    }

    pub fn set_price(&self, instrument_id: InstrumentId, price: Price) {
        self.prices.write().insert(instrument_id, price);
    }
}

impl PriceSource for StaticPriceSource {
    fn reference_price(&self, instrument_id: InstrumentId) -> Result<Price, PriceError> {
        self.prices
            .read()
            .get(&instrument_id)
            .copied()
            .ok_or(PriceError::Unavailable(instrument_id))
    }
}
