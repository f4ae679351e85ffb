//! Instrument configuration and runtime state.
//!
//! An instrument is one tradable skin with its own order book. Reference
//! prices come from an external price source and are not stored here.

use crate::book::OrderBook;
use crate::engine::ValidationError;
use crate::types::{InstrumentId, Price, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MARGIN_RATE: Decimal = dec!(0.20);
pub const DEFAULT_COMMISSION_RATE: Decimal = dec!(0.0002);

/// Static instrument configuration (immutable after registration)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub id: InstrumentId,
    /// Display name, e.g. "AK-47 | Redline (Field-Tested)"
    pub name: String,
    pub margin_rate: Decimal,
    pub commission_rate: Decimal,
}

impl Instrument {
    pub fn new(id: InstrumentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            margin_rate: DEFAULT_MARGIN_RATE,
            commission_rate: DEFAULT_COMMISSION_RATE,
        }
    }

    pub fn with_rates(mut self, margin_rate: Decimal, commission_rate: Decimal) -> Self {
        self.margin_rate = margin_rate;
        self.commission_rate = commission_rate;
        self
    }

    pub fn validate_quantity(&self, quantity: Decimal) -> Result<(), ValidationError> {
        if quantity <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveQuantity(quantity));
        }
        Ok(())
    }

    pub fn validate_price(&self, price: Option<Decimal>) -> Result<Price, ValidationError> {
        let value = price.ok_or(ValidationError::MissingLimitPrice)?;
        Price::new(value).ok_or(ValidationError::InvalidLimitPrice(value))
    }
}

/// Runtime state guarded by the instrument's lock.
#[derive(Debug, Clone)]
pub struct InstrumentState {
    pub instrument: Instrument,
    pub book: OrderBook,
    pub last_trade_price: Option<Price>,
    /// Traded notional since registration
    pub volume: Decimal,
    pub trade_count: u64,
    pub last_updated: Timestamp,
}

impl InstrumentState {
    pub fn new(instrument: Instrument, timestamp: Timestamp) -> Self {
        let book = OrderBook::new(instrument.id);
        Self {
            instrument,
            book,
            last_trade_price: None,
            volume: Decimal::ZERO,
            trade_count: 0,
            last_updated: timestamp,
        }
    }

    pub fn record_trade(&mut self, price: Price, quantity: Decimal, timestamp: Timestamp) {
        self.last_trade_price = Some(price);
        self.volume += quantity * price.value();
        self.trade_count += 1;
        self.last_updated = timestamp;
    }
}
