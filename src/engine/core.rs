// 8.1 engine/core.rs: the Exchange struct, instrument registry, book snapshots, events.

use super::results::{ExchangeError, InstrumentSummary, NotFound};
use crate::book::BookSnapshot;
use crate::config::ExchangeConfig;
use crate::events::{Event, EventLog, EventPayload};
use crate::instrument::{Instrument, InstrumentState};
use crate::ledger::AccountLedger;
use crate::price_source::PriceSource;
use crate::store::Repository;
use crate::types::{InstrumentId, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub(super) type InstrumentSlot = Arc<Mutex<InstrumentState>>;

/** 8.1: main exchange struct. shared behind an Arc by every request handler */
pub struct Exchange {
    pub(super) config: ExchangeConfig,
    pub(super) store: Arc<dyn Repository>,
    pub(super) ledger: Arc<dyn AccountLedger>,
    pub(super) prices: Arc<dyn PriceSource>,
    pub(super) instruments: RwLock<HashMap<InstrumentId, InstrumentSlot>>,
    pub(super) events: Mutex<EventLog>,
}

impl Exchange {
    pub fn new(
        config: ExchangeConfig,
        store: Arc<dyn Repository>,
        ledger: Arc<dyn AccountLedger>,
        prices: Arc<dyn PriceSource>,
    ) -> Self {
        let events = Mutex::new(EventLog::new(config.max_events));
        Self {
            config,
            store,
            ledger,
            prices,
            instruments: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Registers an instrument with the configured rates. re-registering an
    /// id keeps the existing book.
    pub fn register_instrument(&self, id: InstrumentId, name: impl Into<String>) -> InstrumentId {
        let instrument =
            Instrument::new(id, name).with_rates(self.config.margin_rate, self.config.commission_rate);
        self.add_instrument(instrument)
    }

    pub fn add_instrument(&self, instrument: Instrument) -> InstrumentId {
        let id = instrument.id;
        let mut instruments = self.instruments.write();
        instruments.entry(id).or_insert_with(|| {
            info!(instrument = %id, name = %instrument.name, "instrument registered");
            Arc::new(Mutex::new(InstrumentState::new(instrument, Timestamp::now())))
        });
        id
    }

    pub(super) fn slot(&self, instrument_id: InstrumentId) -> Result<InstrumentSlot, ExchangeError> {
        self.instruments
            .read()
            .get(&instrument_id)
            .cloned()
            .ok_or(ExchangeError::NotFound(NotFound::Instrument(instrument_id)))
    }

    pub fn instrument(&self, instrument_id: InstrumentId) -> Result<Instrument, ExchangeError> {
        Ok(self.slot(instrument_id)?.lock().instrument.clone())
    }

    pub fn instruments(&self) -> Vec<InstrumentSummary> {
        let slots: Vec<InstrumentSlot> = self.instruments.read().values().cloned().collect();
        let mut summaries: Vec<InstrumentSummary> = slots
            .iter()
            .map(|slot| {
                let state = slot.lock();
                InstrumentSummary {
                    instrument: state.instrument.clone(),
                    reference_price: self.prices.reference_price(state.instrument.id).ok(),
                    last_trade_price: state.last_trade_price,
                    best_bid: state.book.best_bid(),
                    best_ask: state.book.best_ask(),
                    volume: state.volume,
                    trade_count: state.trade_count,
                }
            })
            .collect();
        summaries.sort_by_key(|s| s.instrument.id);
        summaries
    }

    /// Depth snapshot with the configured number of levels.
    pub fn order_book(&self, instrument_id: InstrumentId) -> Result<BookSnapshot, ExchangeError> {
        self.order_book_depth(instrument_id, self.config.book_depth)
    }

    pub fn order_book_depth(&self, instrument_id: InstrumentId, depth: usize) -> Result<BookSnapshot, ExchangeError> {
        let slot = self.slot(instrument_id)?;
        let state = slot.lock();
        Ok(state.book.snapshot(depth))
    }

    pub fn recent_events(&self, count: usize) -> Vec<Event> {
        self.events.lock().recent(count)
    }

    pub(super) fn emit_event(&self, timestamp: Timestamp, payload: EventPayload) {
        self.events.lock().emit(timestamp, payload);
    }

    pub(super) fn emit_events(&self, timestamp: Timestamp, payloads: impl IntoIterator<Item = EventPayload>) {
        let mut events = self.events.lock();
        for payload in payloads {
            events.emit(timestamp, payload);
        }
    }
}
