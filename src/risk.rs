//! Risk monitor.
//!
//! Evaluates open positions against the live reference price:
//! unrealized P&L, margin ratio `(margin + upnl) / (entry × size)`, the
//! liquidation price, and a risk tier. `aggregate_health` rolls everything
//! up for the operations dashboard.

use crate::position::Position;
use crate::types::{InstrumentId, PositionId, PositionType, Price, Quote, UserId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Tier boundaries on margin ratio. each bound is the inclusive top of the
/// tier below it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskParams {
    pub liquidation_threshold: Decimal,
    pub danger_threshold: Decimal,
    pub warning_threshold: Decimal,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            liquidation_threshold: dec!(0.10),
            danger_threshold: dec!(0.12),
            warning_threshold: dec!(0.15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Safe,
    Warning,
    Danger,
    Liquidation,
}

impl RiskParams {
    pub fn classify(&self, margin_ratio: Decimal) -> RiskTier {
        if margin_ratio <= self.liquidation_threshold {
            RiskTier::Liquidation
        } else if margin_ratio <= self.danger_threshold {
            RiskTier::Danger
        } else if margin_ratio <= self.warning_threshold {
            RiskTier::Warning
        } else {
            RiskTier::Safe
        }
    }
}

/// `(margin + unrealized) / (entry × size)`. zero for an empty position.
pub fn margin_ratio(position: &Position, reference_price: Price) -> Decimal {
    let entry_notional = position.entry_notional().value();
    if entry_notional.is_zero() {
        return Decimal::ZERO;
    }
    let equity = position.margin.add(position.unrealized_pnl(reference_price));
    equity.value() / entry_notional
}

/// Reference price at which the margin ratio equals `threshold`.
///
/// LONG: `entry + (threshold × entry × size − margin) / size`
/// SHORT: `entry − (threshold × entry × size − margin) / size`
///
/// `None` when the position is empty or the price would be non-positive
/// (a short that cannot be liquidated by a falling price, for instance).
pub fn liquidation_price(position: &Position, threshold: Decimal) -> Option<Price> {
    if position.size.is_zero() {
        return None;
    }
    let entry = position.entry_price.value();
    let shift = (threshold * entry * position.size - position.margin.value()) / position.size;
    let price = match position.position_type {
        PositionType::Long => entry + shift,
        PositionType::Short => entry - shift,
    };
    Price::new(price)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub position_id: PositionId,
    pub user_id: UserId,
    pub instrument_id: InstrumentId,
    pub position_type: PositionType,
    pub size: Decimal,
    pub entry_price: Price,
    pub reference_price: Price,
    pub margin: Quote,
    pub notional: Quote,
    pub unrealized_pnl: Quote,
    pub margin_ratio: Decimal,
    pub liquidation_price: Option<Price>,
    pub tier: RiskTier,
}

pub fn evaluate_position(position: &Position, reference_price: Price, params: &RiskParams) -> PositionRisk {
    let ratio = margin_ratio(position, reference_price);
    PositionRisk {
        position_id: position.id,
        user_id: position.user_id,
        instrument_id: position.instrument_id,
        position_type: position.position_type,
        size: position.size,
        entry_price: position.entry_price,
        reference_price,
        margin: position.margin,
        notional: position.notional(reference_price),
        unrealized_pnl: position.unrealized_pnl(reference_price),
        margin_ratio: ratio,
        liquidation_price: liquidation_price(position, params.liquidation_threshold),
        tier: params.classify(ratio),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierCounts {
    pub safe: usize,
    pub warning: usize,
    pub danger: usize,
    pub liquidation: usize,
}

impl TierCounts {
    fn bump(&mut self, tier: RiskTier) {
        match tier {
            RiskTier::Safe => self.safe += 1,
            RiskTier::Warning => self.warning += 1,
            RiskTier::Danger => self.danger += 1,
            RiskTier::Liquidation => self.liquidation += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.safe + self.warning + self.danger + self.liquidation
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    pub open_positions: usize,
    pub tiers: TierCounts,
    pub total_margin: Quote,
    pub total_unrealized_pnl: Quote,
    pub total_notional: Quote,
    /// Σ notional at reference price over Σ margin. zero with nothing open.
    pub system_leverage: Decimal,
    pub at_risk: Vec<PositionId>,
    /// Open positions left out because their reference price was unavailable.
    pub unpriced: Vec<PositionId>,
}

pub fn aggregate_health<'a>(risks: impl IntoIterator<Item = &'a PositionRisk>) -> SystemHealth {
    let mut tiers = TierCounts::default();
    let mut total_margin = Quote::zero();
    let mut total_unrealized_pnl = Quote::zero();
    let mut total_notional = Quote::zero();
    let mut at_risk = Vec::new();

    for risk in risks {
        tiers.bump(risk.tier);
        total_margin = total_margin.add(risk.margin);
        total_unrealized_pnl = total_unrealized_pnl.add(risk.unrealized_pnl);
        total_notional = total_notional.add(risk.notional);
        if matches!(risk.tier, RiskTier::Danger | RiskTier::Liquidation) {
            at_risk.push(risk.position_id);
        }
    }

    let system_leverage = if total_margin.is_zero() {
        Decimal::ZERO
    } else {
        total_notional.value() / total_margin.value()
    };

    SystemHealth {
        open_positions: tiers.total(),
        tiers,
        total_margin,
        total_unrealized_pnl,
        total_notional,
        system_leverage,
        at_risk,
        unpriced: Vec::new(),
    }
}
