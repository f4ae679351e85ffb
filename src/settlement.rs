//! Fill settlement.
//!
//! Turns the fills of one order execution into position changes for both
//! counterparties and a single ledger batch. Nothing here touches the book,
//! the store or the ledger; the engine applies the result as one unit.
//!
//! Per fill leg (buyer and seller handled the same way):
//! - commission `price × qty × rate` is debited from the user and credited to
//!   the house account
//! - no open position: open one in the leg's direction and lock margin
//! - same direction: increase size, average the entry, lock margin
//! - opposite direction: reduce, releasing margin pro rata and settling P&L.
//!   quantity beyond the open size flips into a new opposite position

use crate::ledger::{BatchId, LedgerBatch, LedgerReason};
use crate::margin::commission;
use crate::order::Fill;
use crate::position::{increase_position, reduce_position, Position};
use crate::types::{FillId, InstrumentId, PositionId, PositionType, Price, Quote, Side, Timestamp, UserId};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettlementRates {
    pub margin_rate: Decimal,
    pub commission_rate: Decimal,
    pub house_account: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionChange {
    Opened,
    Increased,
    Reduced,
    Closed,
}

/// What one fill leg did to one position. feeds the event log.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionEffect {
    pub fill_id: FillId,
    pub position_id: PositionId,
    pub user_id: UserId,
    pub instrument_id: InstrumentId,
    pub position_type: PositionType,
    pub change: PositionChange,
    pub quantity: Decimal,
    pub price: Price,
    pub size_after: Decimal,
    pub realized_pnl: Quote,
    pub commission: Quote,
}

#[derive(Debug, Clone)]
pub struct Settlement {
    /// Final state of every position touched, ordered by id.
    pub positions: Vec<Position>,
    pub batch: LedgerBatch,
    pub effects: Vec<PositionEffect>,
    pub total_commission: Quote,
    pub total_realized_pnl: Quote,
}

impl Settlement {
    pub fn position_for(&self, user_id: UserId) -> Option<&Position> {
        self.positions.iter().rev().find(|p| p.user_id == user_id)
    }
}

struct Settler<F> {
    rates: SettlementRates,
    open: HashMap<UserId, Position>,
    touched: BTreeMap<PositionId, Position>,
    batch: LedgerBatch,
    effects: Vec<PositionEffect>,
    total_commission: Quote,
    total_realized_pnl: Quote,
    next_position_id: F,
}

impl<F: FnMut() -> PositionId> Settler<F> {
    fn settle_leg(&mut self, fill: &Fill, side: Side) {
        let user_id = fill.user_on(side);
        let exposure = side.exposure();
        let price = fill.price;
        let quantity = fill.quantity;
        let timestamp = fill.created_at;

        let fee = commission(price, quantity, self.rates.commission_rate);
        self.batch.push(user_id, fee.negate(), LedgerReason::Commission);
        self.batch
            .push(self.rates.house_account, fee, LedgerReason::CommissionIncome);
        self.total_commission = self.total_commission.add(fee);

        match self.open.remove(&user_id) {
            None => self.open_new(fill, user_id, exposure, quantity, fee),
            Some(position) if position.position_type == exposure => {
                let update = increase_position(&position, price, quantity, self.rates.margin_rate, timestamp);
                let mut next = update.position;
                next.record_commission(fee);
                self.batch
                    .push(user_id, update.margin_locked.negate(), LedgerReason::MarginLock);
                self.effect(fill, &next, PositionChange::Increased, quantity, Quote::zero(), fee);
                self.keep(next);
            }
            Some(position) => {
                let closing = quantity.min(position.size);
                let close_fee = commission(price, closing, self.rates.commission_rate);
                let update = reduce_position(&position, price, closing, timestamp);
                let mut next = update.position;
                next.record_commission(close_fee);

                self.batch
                    .push(user_id, update.margin_released, LedgerReason::MarginRelease);
                self.batch
                    .push(user_id, update.realized_pnl, LedgerReason::PnlSettlement);
                self.total_realized_pnl = self.total_realized_pnl.add(update.realized_pnl);

                let change = if next.is_open() {
                    PositionChange::Reduced
                } else {
                    PositionChange::Closed
                };
                self.effect(fill, &next, change, closing, update.realized_pnl, close_fee);
                self.keep(next);

                let remainder = quantity - closing;
                if remainder > Decimal::ZERO {
                    self.open_new(fill, user_id, exposure, remainder, fee.sub(close_fee));
                }
            }
        }
    }

    fn open_new(&mut self, fill: &Fill, user_id: UserId, position_type: PositionType, quantity: Decimal, fee: Quote) {
        let mut position = Position::open(
            (self.next_position_id)(),
            user_id,
            fill.instrument_id,
            position_type,
            fill.price,
            quantity,
            self.rates.margin_rate,
            fill.created_at,
        );
        position.record_commission(fee);
        self.batch
            .push(user_id, position.margin.negate(), LedgerReason::MarginLock);
        self.effect(fill, &position, PositionChange::Opened, quantity, Quote::zero(), fee);
        self.keep(position);
    }

    fn keep(&mut self, position: Position) {
        if position.is_open() {
            self.open.insert(position.user_id, position.clone());
        }
        self.touched.insert(position.id, position);
    }

    fn effect(
        &mut self,
        fill: &Fill,
        position: &Position,
        change: PositionChange,
        quantity: Decimal,
        realized_pnl: Quote,
        commission: Quote,
    ) {
        self.effects.push(PositionEffect {
            fill_id: fill.id,
            position_id: position.id,
            user_id: position.user_id,
            instrument_id: position.instrument_id,
            position_type: position.position_type,
            change,
            quantity,
            price: fill.price,
            size_after: position.size,
            realized_pnl,
            commission,
        });
    }
}

/// Settles `fills` in order. `open_positions` holds each participant's open
/// position in the instrument, if any.
pub fn settle_fills(
    fills: &[Fill],
    open_positions: HashMap<UserId, Position>,
    rates: SettlementRates,
    batch_id: BatchId,
    next_position_id: impl FnMut() -> PositionId,
) -> Settlement {
    let mut settler = Settler {
        rates,
        open: open_positions,
        touched: BTreeMap::new(),
        batch: LedgerBatch::new(batch_id),
        effects: Vec::new(),
        total_commission: Quote::zero(),
        total_realized_pnl: Quote::zero(),
        next_position_id,
    };

    for fill in fills {
        settler.settle_leg(fill, Side::Buy);
        settler.settle_leg(fill, Side::Sell);
    }

    Settlement {
        positions: settler.touched.into_values().collect(),
        batch: settler.batch,
        effects: settler.effects,
        total_commission: settler.total_commission,
        total_realized_pnl: settler.total_realized_pnl,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderId;
    use rust_decimal_macros::dec;

    const LONG_USER: UserId = UserId(1);
    const SHORT_USER: UserId = UserId(2);
    const HOUSE: UserId = UserId(0);

    fn rates() -> SettlementRates {
        SettlementRates {
            margin_rate: dec!(0.20),
            commission_rate: dec!(0.0002),
            house_account: HOUSE,
        }
    }

    fn fill(id: u64, buyer: UserId, seller: UserId, price: Decimal, quantity: Decimal) -> Fill {
        Fill {
            id: FillId(id),
            instrument_id: InstrumentId(1),
            buy_order_id: OrderId(id * 10),
            sell_order_id: OrderId(id * 10 + 1),
            buy_user_id: buyer,
            sell_user_id: seller,
            price: Price::new_unchecked(price),
            quantity,
            maker_order_id: OrderId(id * 10 + 1),
            taker_side: Side::Buy,
            created_at: Timestamp::from_millis(id as i64),
        }
    }

    fn ids() -> impl FnMut() -> PositionId {
        let mut next = 0;
        move || {
            next += 1;
            PositionId(next)
        }
    }

    fn open_map(settlement: &Settlement) -> HashMap<UserId, Position> {
        settlement
            .positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| (p.user_id, p.clone()))
            .collect()
    }

    #[test]
    fn opening_fill_locks_margin_and_charges_both_sides() {
        let s = settle_fills(
            &[fill(1, LONG_USER, SHORT_USER, dec!(85), dec!(50))],
            HashMap::new(),
            rates(),
            BatchId(1),
            ids(),
        );

        assert_eq!(s.positions.len(), 2);
        for position in &s.positions {
            assert_eq!(position.margin.value(), dec!(850));
            assert_eq!(position.commission_paid.value(), dec!(0.85));
        }
        assert_eq!(s.batch.net_for(LONG_USER).value(), dec!(-850.85));
        assert_eq!(s.batch.net_for(SHORT_USER).value(), dec!(-850.85));
        assert_eq!(s.batch.net_for(HOUSE).value(), dec!(1.70));
        assert_eq!(s.total_commission.value(), dec!(1.70));
    }

    #[test]
    fn round_trip_is_zero_sum_before_commission() {
        let opened = settle_fills(
            &[fill(1, LONG_USER, SHORT_USER, dec!(85), dec!(100))],
            HashMap::new(),
            rates(),
            BatchId(1),
            ids(),
        );
        // long sells to the short to close both at 90
        let closed = settle_fills(
            &[fill(2, SHORT_USER, LONG_USER, dec!(90), dec!(100))],
            open_map(&opened),
            rates(),
            BatchId(2),
            ids(),
        );

        assert_eq!(closed.total_realized_pnl.value(), dec!(0));
        assert!(closed.positions.iter().all(|p| !p.is_open()));

        let long = closed.position_for(LONG_USER).unwrap();
        let short = closed.position_for(SHORT_USER).unwrap();
        assert_eq!(long.realized_pnl.value(), dec!(500));
        assert_eq!(short.realized_pnl.value(), dec!(-500));
        assert_eq!(long.net_realized_pnl().value(), dec!(496.50));
        assert_eq!(short.net_realized_pnl().value(), dec!(-503.50));
        assert_eq!(long.exit_price.unwrap().value(), dec!(90));

        // 1700 margin back plus pnl minus the closing fee
        assert_eq!(closed.batch.net_for(LONG_USER).value(), dec!(2198.20));
        assert_eq!(closed.batch.net_for(SHORT_USER).value(), dec!(1198.20));
    }

    #[test]
    fn partial_close_keeps_position_open() {
        let opened = settle_fills(
            &[fill(1, LONG_USER, SHORT_USER, dec!(85), dec!(100))],
            HashMap::new(),
            rates(),
            BatchId(1),
            ids(),
        );
        let third = UserId(3);
        let reduced = settle_fills(
            &[fill(2, third, LONG_USER, dec!(90), dec!(40))],
            open_map(&opened),
            rates(),
            BatchId(2),
            ids(),
        );

        let long = reduced.position_for(LONG_USER).unwrap();
        assert!(long.is_open());
        assert_eq!(long.size, dec!(60));
        assert_eq!(long.margin.value(), dec!(1020));
        assert_eq!(reduced.batch.total(LedgerReason::MarginRelease).value(), dec!(680));
        assert_eq!(reduced.batch.total(LedgerReason::PnlSettlement).value(), dec!(200));
        assert_eq!(reduced.effects[1].change, PositionChange::Reduced);
    }

    #[test]
    fn over_close_flips_direction() {
        let opened = settle_fills(
            &[fill(1, LONG_USER, SHORT_USER, dec!(85), dec!(10))],
            HashMap::new(),
            rates(),
            BatchId(1),
            ids(),
        );
        let third = UserId(3);
        let mut next = 10;
        let flipped = settle_fills(
            &[fill(2, third, LONG_USER, dec!(80), dec!(15))],
            open_map(&opened),
            rates(),
            BatchId(2),
            move || {
                next += 1;
                PositionId(next)
            },
        );

        let mine: Vec<&Position> = flipped.positions.iter().filter(|p| p.user_id == LONG_USER).collect();
        assert_eq!(mine.len(), 2);
        assert!(!mine[0].is_open());
        assert_eq!(mine[0].realized_pnl.value(), dec!(-50));
        assert!(mine[1].is_open());
        assert_eq!(mine[1].position_type, PositionType::Short);
        assert_eq!(mine[1].size, dec!(5));
        assert_eq!(mine[1].margin.value(), dec!(80));
        // fee split between the closing and the opening part
        assert_eq!(
            mine[0].commission_paid.add(mine[1].commission_paid).value(),
            dec!(0.1700) + dec!(0.24)
        );
    }

    #[test]
    fn same_direction_fills_accumulate() {
        let s = settle_fills(
            &[
                fill(1, LONG_USER, SHORT_USER, dec!(80), dec!(10)),
                fill(2, LONG_USER, SHORT_USER, dec!(90), dec!(10)),
            ],
            HashMap::new(),
            rates(),
            BatchId(1),
            ids(),
        );
        assert_eq!(s.positions.len(), 2);
        let long = s.position_for(LONG_USER).unwrap();
        assert_eq!(long.size, dec!(20));
        assert_eq!(long.entry_price.value(), dec!(85));
        assert_eq!(long.margin.value(), dec!(340));
    }
}
