//! Forced liquidation.
//!
//! A position whose margin ratio is at or below the liquidation threshold is
//! closed with a synthesized MARKET order, exactly like a user market close.
//! If the book cannot absorb all of it the remainder stays open and is picked
//! up by the next pass.

use super::core::Exchange;
use super::results::{
    CloseRequest, ExchangeError, LiquidationFailure, LiquidationReport, LiquidationResult, NotFound, ValidationError,
};
use crate::events::{EventPayload, LiquidationEvent};
use crate::risk::{evaluate_position, RiskTier};
use crate::types::{InstrumentId, PositionId, Timestamp};
use tracing::{info, warn};

impl Exchange {
    pub fn liquidate_position(&self, position_id: PositionId) -> Result<LiquidationResult, ExchangeError> {
        let position = self
            .store
            .position(position_id)?
            .filter(|p| p.is_open())
            .ok_or(NotFound::Position(position_id))?;

        let reference = self.prices.reference_price(position.instrument_id)?;
        let risk = evaluate_position(&position, reference, &self.config.risk);
        if risk.tier != RiskTier::Liquidation {
            return Err(ValidationError::NotLiquidatable {
                position_id,
                margin_ratio: risk.margin_ratio,
            }
            .into());
        }

        warn!(
            position = %position_id,
            user = %position.user_id,
            instrument = %position.instrument_id,
            margin_ratio = %risk.margin_ratio,
            reference = %reference,
            "liquidating position"
        );

        let execution = self.close_position(position.user_id, position.instrument_id, CloseRequest::market())?;

        self.emit_event(
            Timestamp::now(),
            EventPayload::Liquidation(LiquidationEvent {
                position_id,
                user_id: position.user_id,
                instrument_id: position.instrument_id,
                margin_ratio: risk.margin_ratio,
                reference_price: reference,
                closed_quantity: execution.order.filled_quantity,
                order_id: execution.order.id,
            }),
        );

        Ok(LiquidationResult {
            position_id,
            user_id: position.user_id,
            instrument_id: position.instrument_id,
            margin_ratio: risk.margin_ratio,
            reference_price: reference,
            execution,
        })
    }

    /// One pass over open positions. each liquidation stands alone, so one
    /// failure does not stop the rest. positions that could not be priced
    /// are reported as failed and retried on the next pass.
    pub fn run_liquidations(&self, instrument_id: Option<InstrumentId>) -> Result<LiquidationReport, ExchangeError> {
        let pass = self.evaluate_risks(instrument_id)?;
        let mut report = LiquidationReport {
            evaluated: pass.risks.len(),
            ..LiquidationReport::default()
        };
        report.failed.extend(pass.unpriced.into_iter().map(|(position_id, err)| LiquidationFailure {
            position_id,
            reason: err.to_string(),
        }));

        for risk in pass.risks.iter().filter(|r| r.tier == RiskTier::Liquidation) {
            match self.liquidate_position(risk.position_id) {
                Ok(result) => report.liquidated.push(result),
                Err(err) => {
                    warn!(position = %risk.position_id, error = %err, "liquidation failed");
                    report.failed.push(LiquidationFailure {
                        position_id: risk.position_id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if !report.liquidated.is_empty() || !report.failed.is_empty() {
            info!(
                evaluated = report.evaluated,
                liquidated = report.liquidated.len(),
                failed = report.failed.len(),
                "liquidation pass finished"
            );
        }
        Ok(report)
    }
}
