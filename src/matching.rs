//! Price-time matching.
//!
//! Matching is split in two. `plan_matches` walks the opposite side of the
//! book without touching it and returns what would trade. The engine settles
//! the plan and only then writes the maker updates back with
//! `OrderBook::sync_resting`. A plan that fails to settle leaves the book as
//! it was.

use crate::book::OrderBook;
use crate::order::Order;
use crate::position::Position;
use crate::types::{OrderId, Price, Side, UserId};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

/// One maker the taker would trade against.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedFill {
    pub maker_order_id: OrderId,
    pub maker_user_id: UserId,
    /// Maker's resting price. the taker never sets execution price.
    pub price: Price,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct MatchPlan {
    pub fills: Vec<PlannedFill>,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    /// Resting orders passed over because they belong to the taker.
    pub self_trades_skipped: usize,
}

impl MatchPlan {
    pub fn is_empty(&self) -> bool {
        self.fills.is_empty()
    }
}

/// Whether a taker would accept a maker's price. market orders accept any.
pub fn crosses(taker_side: Side, limit: Option<Price>, maker_price: Price) -> bool {
    match (taker_side, limit) {
        (_, None) => true,
        (Side::Buy, Some(limit)) => limit >= maker_price,
        (Side::Sell, Some(limit)) => limit <= maker_price,
    }
}

pub fn plan_matches(book: &OrderBook, taker: &Order) -> MatchPlan {
    let mut remaining = taker.remaining_quantity();
    let mut plan = MatchPlan::default();

    for resting in book.orders(taker.side.opposite()) {
        if remaining <= Decimal::ZERO {
            break;
        }

        // book never holds market orders
        let Some(maker_price) = resting.price else {
            continue;
        };

        if !crosses(taker.side, taker.price, maker_price) {
            break;
        }

        if resting.user_id == taker.user_id {
            plan.self_trades_skipped += 1;
            continue;
        }

        let quantity = remaining.min(resting.remaining_quantity());
        if quantity <= Decimal::ZERO {
            continue;
        }

        debug!(
            taker = %taker.id,
            maker = %resting.id,
            price = %maker_price,
            %quantity,
            "matched"
        );

        plan.fills.push(PlannedFill {
            maker_order_id: resting.id,
            maker_user_id: resting.user_id,
            price: maker_price,
            quantity,
        });
        remaining -= quantity;
    }

    plan.filled_quantity = taker.remaining_quantity() - remaining;
    plan.remaining_quantity = remaining;
    plan
}

/// Resting close orders in `plan` whose remaining quantity is no longer
/// covered by their owner's open position of that type.
///
/// `open` holds the current open position of every maker in the plan.
/// Makers are walked in plan order and each fill moves its owner's net size,
/// so two close orders from one user cannot both claim the same position.
/// Filling an unbacked close order would open exposure in the opposite
/// direction that never passed a margin check.
pub fn unbacked_close_orders(book: &OrderBook, plan: &MatchPlan, open: &HashMap<UserId, Position>) -> Vec<OrderId> {
    let mut net: HashMap<UserId, Decimal> = HashMap::new();
    let mut unbacked = Vec::new();

    for planned in &plan.fills {
        let Some(maker) = book.get(planned.maker_order_id) else {
            continue;
        };
        let signed = net.entry(maker.user_id).or_insert_with(|| {
            open.get(&maker.user_id)
                .map(|p| p.position_type.sign() * p.size)
                .unwrap_or_default()
        });

        if !maker.opens_exposure() {
            let closable = *signed * maker.position_type.sign();
            if maker.remaining_quantity() > closable {
                unbacked.push(maker.id);
                continue;
            }
        }
        *signed += maker.side.exposure().sign() * planned.quantity;
    }
    unbacked
}
