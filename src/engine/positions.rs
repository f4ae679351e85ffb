//! Position queries, closing, and risk evaluation.

use super::core::Exchange;
use super::results::{CloseRequest, ExchangeError, NotFound, OrderRequest, PlaceOrderResult, PositionView};
use crate::events::CancelReason;
use crate::order::OrderType;
use crate::position::Position;
use crate::price_source::PriceError;
use crate::risk::{aggregate_health, evaluate_position, PositionRisk, SystemHealth};
use crate::types::{InstrumentId, OrderId, PositionId, Price, Timestamp, UserId};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Result of evaluating open positions against reference prices.
#[derive(Debug, Default)]
pub(super) struct RiskPass {
    pub risks: Vec<PositionRisk>,
    /// Positions skipped because their instrument had no reference price.
    pub unpriced: Vec<(PositionId, PriceError)>,
}

impl Exchange {
    /// Closes the caller's whole open position in `instrument_id` through
    /// the matching engine. A MARKET close with nothing on the other side
    /// fails with `NoLiquidity`; a LIMIT close rests like any other order.
    ///
    /// Close orders the caller already has resting against the position are
    /// cancelled first, so the book never holds more closing quantity than
    /// the position can absorb.
    pub fn close_position(
        &self,
        user_id: UserId,
        instrument_id: InstrumentId,
        close: CloseRequest,
    ) -> Result<PlaceOrderResult, ExchangeError> {
        let slot = self.slot(instrument_id)?;
        let position = self
            .store
            .open_position(user_id, instrument_id)?
            .ok_or(NotFound::OpenPosition { user_id, instrument_id })?;

        let instrument = slot.lock().instrument.clone();
        let limit = match close.order_type {
            OrderType::Limit => Some(instrument.validate_price(close.price)?),
            OrderType::Market => None,
        };

        let request = OrderRequest {
            user_id,
            instrument_id,
            side: position.position_type.closing_side(),
            order_type: close.order_type,
            position_type: position.position_type,
            price: close.price,
            quantity: position.size,
            time_in_force: None,
        };

        info!(
            position = %position.id,
            user = %user_id,
            size = %position.size,
            order_type = ?close.order_type,
            "closing position"
        );

        let mut state = slot.lock();
        let resting: Vec<OrderId> = state
            .book
            .orders(request.side)
            .filter(|o| o.user_id == user_id && o.position_type == position.position_type)
            .map(|o| o.id)
            .collect();
        if !resting.is_empty() {
            debug!(position = %position.id, orders = resting.len(), "superseding resting close orders");
            self.cancel_resting(&mut state, &resting, CancelReason::Superseded, Timestamp::now())?;
        }
        self.execute(&mut state, &request, limit)
    }

    pub fn position(&self, position_id: PositionId) -> Result<Position, ExchangeError> {
        Ok(self
            .store
            .position(position_id)?
            .ok_or(NotFound::Position(position_id))?)
    }

    /// Every position the user ever held, open and closed.
    pub fn position_history(&self, user_id: UserId) -> Result<Vec<Position>, ExchangeError> {
        Ok(self.store.positions_for_user(user_id)?)
    }

    /// The user's open positions with live risk figures.
    pub fn user_positions(&self, user_id: UserId) -> Result<Vec<PositionView>, ExchangeError> {
        let open: Vec<Position> = self
            .store
            .positions_for_user(user_id)?
            .into_iter()
            .filter(Position::is_open)
            .collect();

        let mut prices = PriceCache::default();
        open.into_iter()
            .map(|position| -> Result<PositionView, ExchangeError> {
                let reference = prices.get(self, position.instrument_id)?;
                let risk = evaluate_position(&position, reference, &self.config.risk);
                Ok(PositionView { position, risk })
            })
            .collect()
    }

    /// Risk for every priced open position, optionally limited to one
    /// instrument. positions whose reference price is unavailable are left out.
    pub fn position_risks(&self, instrument_id: Option<InstrumentId>) -> Result<Vec<PositionRisk>, ExchangeError> {
        Ok(self.evaluate_risks(instrument_id)?.risks)
    }

    /// A failed price lookup only drops that instrument's positions from the
    /// pass; every other instrument is still evaluated.
    pub(super) fn evaluate_risks(&self, instrument_id: Option<InstrumentId>) -> Result<RiskPass, ExchangeError> {
        let mut prices = PriceCache::default();
        let mut pass = RiskPass::default();
        for position in self.store.open_positions(instrument_id)? {
            match prices.get(self, position.instrument_id) {
                Ok(reference) => pass
                    .risks
                    .push(evaluate_position(&position, reference, &self.config.risk)),
                Err(err) => pass.unpriced.push((position.id, err)),
            }
        }
        if !pass.unpriced.is_empty() {
            warn!(positions = pass.unpriced.len(), "risk pass skipped positions without a reference price");
        }
        Ok(pass)
    }

    /// Dashboard feed: tier counts, totals and leverage across all instruments.
    pub fn system_health(&self) -> Result<SystemHealth, ExchangeError> {
        let pass = self.evaluate_risks(None)?;
        let mut health = aggregate_health(&pass.risks);
        health.unpriced = pass.unpriced.into_iter().map(|(id, _)| id).collect();
        Ok(health)
    }
}

// one price lookup per instrument per evaluation pass
#[derive(Default)]
struct PriceCache {
    prices: HashMap<InstrumentId, Price>,
}

impl PriceCache {
    fn get(&mut self, exchange: &Exchange, instrument_id: InstrumentId) -> Result<Price, PriceError> {
        if let Some(price) = self.prices.get(&instrument_id) {
            return Ok(*price);
        }
        let price = exchange.prices.reference_price(instrument_id)?;
        self.prices.insert(instrument_id, price);
        Ok(price)
    }
}
