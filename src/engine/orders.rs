//! Order placement, execution and cancellation.
//!
//! Execution runs entirely under the instrument lock, in a fixed order:
//! plan the matches against the untouched book, settle the fills, apply the
//! ledger batch, commit orders, fills and positions to the store, and only
//! then write the result back into the book. A failure at any step before the
//! book write leaves the book, the store and the ledger as they were.
//!
//! Two kinds of resting order are pulled from the book during planning
//! instead of failing the taker: close orders no longer backed by an open
//! position, and makers the ledger refuses to lock margin for. Both are
//! cancelled on their own and the match is planned again without them.

use super::core::Exchange;
use super::results::{ExchangeError, NotFound, OrderDetail, OrderRequest, PlaceOrderResult, ValidationError};
use crate::events::{
    CancelReason, EventPayload, FillEvent, OrderCancelledEvent, OrderPlacedEvent, OrderRejectedEvent, PositionEvent,
};
use crate::instrument::{Instrument, InstrumentState};
use crate::ledger::{BatchId, LedgerError};
use crate::margin::{commission, has_sufficient_margin, required_margin};
use crate::matching::{plan_matches, unbacked_close_orders, MatchPlan};
use crate::order::{Fill, Order, OrderType};
use crate::position::Position;
use crate::settlement::{settle_fills, PositionChange, Settlement, SettlementRates};
use crate::store::StoreTx;
use crate::types::{OrderId, Price, Side, Timestamp, UserId};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// One settled attempt at executing the taker.
struct Execution {
    taker: Order,
    makers: Vec<Order>,
    fills: Vec<Fill>,
    settlement: Settlement,
}

impl Exchange {
    /// Validates, margin-checks and executes an order.
    pub fn place_order(&self, request: OrderRequest) -> Result<PlaceOrderResult, ExchangeError> {
        let result = self.try_place_order(&request);
        if let Err(err) = &result {
            warn!(
                user = %request.user_id,
                instrument = %request.instrument_id,
                side = %request.side,
                error = %err,
                "order rejected"
            );
            self.emit_event(
                Timestamp::now(),
                EventPayload::OrderRejected(OrderRejectedEvent {
                    instrument_id: request.instrument_id,
                    user_id: request.user_id,
                    reason: err.to_string(),
                }),
            );
        }
        result
    }

    fn try_place_order(&self, request: &OrderRequest) -> Result<PlaceOrderResult, ExchangeError> {
        let slot = self.slot(request.instrument_id)?;
        let instrument = slot.lock().instrument.clone();

        // 8.2: shape checks never touch book or ledger
        let limit = validate_request(&instrument, request)?;

        if request.opens_exposure() {
            self.check_margin(&instrument, request, limit)?;
        }

        let mut state = slot.lock();
        self.execute(&mut state, request, limit)
    }

    /// Balance must cover `price × qty × margin_rate` plus the commission on
    /// the same notional. MARKET orders are priced at the reference price.
    fn check_margin(
        &self,
        instrument: &Instrument,
        request: &OrderRequest,
        limit: Option<Price>,
    ) -> Result<(), ExchangeError> {
        let price = match limit {
            Some(price) => price,
            None => self.prices.reference_price(instrument.id)?,
        };
        let required = required_margin(price, request.quantity, instrument.margin_rate)
            .add(commission(price, request.quantity, instrument.commission_rate));
        let available = self.ledger.balance(request.user_id)?;

        if !has_sufficient_margin(available, required) {
            return Err(ExchangeError::InsufficientMargin { required, available });
        }
        Ok(())
    }

    /// Closing intent needs an open position of that type covering the order
    /// plus every close order the user already has resting against it.
    /// checked under the lock so concurrent closes see each other.
    fn check_close_intent(&self, state: &InstrumentState, request: &OrderRequest) -> Result<(), ExchangeError> {
        let open = self.store.open_position(request.user_id, state.instrument.id)?;
        match open {
            Some(position) if position.position_type == request.position_type => {
                let resting: Decimal = state
                    .book
                    .orders(request.side)
                    .filter(|o| o.user_id == request.user_id && o.position_type == request.position_type)
                    .map(Order::remaining_quantity)
                    .sum();
                let available = position.size - resting;
                if request.quantity > available {
                    return Err(ValidationError::CloseExceedsPosition {
                        quantity: request.quantity,
                        available,
                    }
                    .into());
                }
                Ok(())
            }
            _ => Err(ValidationError::NoPositionToClose {
                user_id: request.user_id,
                instrument_id: state.instrument.id,
                position_type: request.position_type,
            }
            .into()),
        }
    }

    // 8.3: runs with the instrument lock held
    pub(super) fn execute(
        &self,
        state: &mut InstrumentState,
        request: &OrderRequest,
        limit: Option<Price>,
    ) -> Result<PlaceOrderResult, ExchangeError> {
        let instrument_id = state.instrument.id;

        if !request.opens_exposure() {
            self.check_close_intent(state, request)?;
        }

        let now = Timestamp::now();
        let order_id = self.store.next_order_id();
        let taker = match limit {
            Some(price) => Order::new_limit(
                order_id,
                request.user_id,
                instrument_id,
                request.side,
                request.position_type,
                price,
                request.quantity,
                request.time_in_force.unwrap_or_default(),
                now,
            ),
            None => Order::new_market(
                order_id,
                request.user_id,
                instrument_id,
                request.side,
                request.position_type,
                request.quantity,
                now,
            ),
        };

        // every pass that does not settle cancels at least one resting order,
        // so this ends once the book runs out
        let Execution {
            mut taker,
            makers,
            fills,
            settlement,
        } = loop {
            let plan = plan_matches(&state.book, &taker);
            let open_positions = self.participant_positions(state, &taker, &plan)?;

            let unbacked = unbacked_close_orders(&state.book, &plan, &open_positions);
            if !unbacked.is_empty() {
                self.cancel_resting(state, &unbacked, CancelReason::PositionClosed, now)?;
                continue;
            }

            if taker.order_type == OrderType::Market && plan.is_empty() {
                return Err(ExchangeError::NoLiquidity { instrument_id });
            }
            debug!(
                order = %order_id,
                fills = plan.fills.len(),
                filled = %plan.filled_quantity,
                self_trades_skipped = plan.self_trades_skipped,
                "match planned"
            );

            let execution = self.settle_plan(state, taker.clone(), &plan, open_positions, now)?;

            // 8.3.4: ledger first, then store. store failure compensates the ledger
            match self.apply_ledger(&execution.settlement) {
                Ok(()) => break execution,
                Err(LedgerError::InsufficientFunds {
                    user_id,
                    required,
                    available,
                }) if user_id == taker.user_id => {
                    // the taker's own collateral ran out between the check and the lock
                    warn!(user = %user_id, %required, %available, "margin lock refused by ledger");
                    return Err(ExchangeError::InsufficientMargin { required, available });
                }
                Err(LedgerError::InsufficientFunds { user_id, .. })
                    if execution.makers.iter().any(|m| m.user_id == user_id) =>
                {
                    let underfunded: Vec<OrderId> = plan
                        .fills
                        .iter()
                        .filter(|f| f.maker_user_id == user_id)
                        .map(|f| f.maker_order_id)
                        .collect();
                    warn!(user = %user_id, orders = underfunded.len(), "maker cannot cover margin, pulling its orders");
                    self.cancel_resting(state, &underfunded, CancelReason::InsufficientCollateral, now)?;
                }
                Err(err) => return Err(err.into()),
            }
        };

        // 8.3.2: IOC and MARKET remainders never rest
        let mut discarded = Decimal::ZERO;
        if !taker.is_filled() && !taker.can_rest() {
            discarded = taker.cancel(now)?;
        }

        let mut orders = makers.clone();
        orders.push(taker.clone());
        let tx = StoreTx {
            orders,
            fills: fills.clone(),
            positions: settlement.positions.clone(),
        };
        if let Err(err) = self.store.commit(tx) {
            warn!(order = %order_id, error = %err, "store commit failed, reversing ledger batch");
            if !settlement.batch.is_empty() {
                if let Err(reverse_err) = self.ledger.reverse_batch(settlement.batch.id) {
                    error!(order = %order_id, error = %reverse_err, "ledger reversal failed");
                }
            }
            return Err(err.into());
        }

        // 8.3.5: committed. now the book
        for maker in &makers {
            state.book.sync_resting(maker)?;
        }
        if taker.can_rest() && !taker.is_terminal() {
            state.book.insert(taker.clone())?;
        }
        for fill in &fills {
            state.record_trade(fill.price, fill.quantity, now);
        }

        info!(
            order = %order_id,
            user = %taker.user_id,
            instrument = %instrument_id,
            side = %taker.side,
            status = ?taker.status,
            filled = %taker.filled_quantity,
            fills = fills.len(),
            "order executed"
        );

        let commission_rate = state.instrument.commission_rate;
        self.emit_execution_events(&taker, &fills, &settlement, discarded, commission_rate, now);

        Ok(PlaceOrderResult {
            remaining_quantity: taker.remaining_quantity(),
            status: taker.status,
            order: taker,
            fills,
            positions: settlement.positions,
        })
    }

    /// Current open positions of the taker and every maker in `plan`.
    fn participant_positions(
        &self,
        state: &InstrumentState,
        taker: &Order,
        plan: &MatchPlan,
    ) -> Result<HashMap<UserId, Position>, ExchangeError> {
        let mut open = HashMap::new();
        let participants = std::iter::once(taker.user_id).chain(plan.fills.iter().map(|f| f.maker_user_id));
        for user_id in participants {
            if open.contains_key(&user_id) {
                continue;
            }
            if let Some(position) = self.store.open_position(user_id, state.instrument.id)? {
                open.insert(user_id, position);
            }
        }
        Ok(open)
    }

    /// 8.3.1 and 8.3.3: applies the plan to copies of the taker and makers and
    /// settles the resulting fills. the book is not written here.
    fn settle_plan(
        &self,
        state: &InstrumentState,
        mut taker: Order,
        plan: &MatchPlan,
        open_positions: HashMap<UserId, Position>,
        now: Timestamp,
    ) -> Result<Execution, ExchangeError> {
        let instrument_id = state.instrument.id;
        let mut fills = Vec::with_capacity(plan.fills.len());
        let mut makers: Vec<Order> = Vec::with_capacity(plan.fills.len());
        for planned in &plan.fills {
            let mut maker = state
                .book
                .get(planned.maker_order_id)
                .cloned()
                .ok_or(ExchangeError::ConcurrencyConflict {
                    order_id: planned.maker_order_id,
                })?;
            maker.apply_fill(planned.quantity, now)?;
            taker.apply_fill(planned.quantity, now)?;

            let (buy, sell) = match taker.side {
                Side::Buy => (&taker, &maker),
                Side::Sell => (&maker, &taker),
            };
            fills.push(Fill {
                id: self.store.next_fill_id(),
                instrument_id,
                buy_order_id: buy.id,
                sell_order_id: sell.id,
                buy_user_id: buy.user_id,
                sell_user_id: sell.user_id,
                price: planned.price,
                quantity: planned.quantity,
                maker_order_id: maker.id,
                taker_side: taker.side,
                created_at: now,
            });
            makers.push(maker);
        }

        let rates = SettlementRates {
            margin_rate: state.instrument.margin_rate,
            commission_rate: state.instrument.commission_rate,
            house_account: self.config.house_account,
        };
        let store = &self.store;
        let settlement = settle_fills(&fills, open_positions, rates, BatchId::from(taker.id), || {
            store.next_position_id()
        });

        Ok(Execution {
            taker,
            makers,
            fills,
            settlement,
        })
    }

    fn apply_ledger(&self, settlement: &Settlement) -> Result<(), LedgerError> {
        if settlement.batch.is_empty() {
            return Ok(());
        }
        self.ledger.apply_batch(&settlement.batch).map_err(|err| {
            warn!(batch = settlement.batch.id.0, error = %err, "ledger rejected settlement batch");
            err
        })
    }

    /// Cancels resting orders on their owners' behalf and takes them off the
    /// book. ids no longer on the book are skipped.
    pub(super) fn cancel_resting(
        &self,
        state: &mut InstrumentState,
        order_ids: &[OrderId],
        reason: CancelReason,
        now: Timestamp,
    ) -> Result<Vec<Order>, ExchangeError> {
        let mut cancelled = Vec::with_capacity(order_ids.len());
        let mut payloads = Vec::with_capacity(order_ids.len());
        for order_id in order_ids {
            let Some(mut order) = state.book.get(*order_id).cloned() else {
                continue;
            };
            let discarded = order.cancel(now)?;
            payloads.push(EventPayload::OrderCancelled(OrderCancelledEvent {
                instrument_id: order.instrument_id,
                order_id: order.id,
                user_id: order.user_id,
                discarded_quantity: discarded,
                reason,
            }));
            cancelled.push(order);
        }
        if cancelled.is_empty() {
            return Ok(cancelled);
        }

        self.store.commit(StoreTx {
            orders: cancelled.clone(),
            ..StoreTx::default()
        })?;
        for order in &cancelled {
            state.book.remove(order.id);
            info!(order = %order.id, user = %order.user_id, ?reason, "order cancelled");
        }
        self.emit_events(now, payloads);
        Ok(cancelled)
    }

    fn emit_execution_events(
        &self,
        taker: &Order,
        fills: &[Fill],
        settlement: &Settlement,
        discarded: Decimal,
        commission_rate: Decimal,
        now: Timestamp,
    ) {
        let mut payloads = vec![EventPayload::OrderPlaced(OrderPlacedEvent {
            instrument_id: taker.instrument_id,
            order_id: taker.id,
            user_id: taker.user_id,
            side: taker.side,
            order_type: taker.order_type,
            position_type: taker.position_type,
            time_in_force: taker.time_in_force,
            quantity: taker.quantity,
            price: taker.price,
        })];

        for fill in fills {
            payloads.push(EventPayload::Fill(FillEvent {
                fill_id: fill.id,
                instrument_id: fill.instrument_id,
                buy_order_id: fill.buy_order_id,
                sell_order_id: fill.sell_order_id,
                maker_order_id: fill.maker_order_id,
                price: fill.price,
                quantity: fill.quantity,
                commission: commission(fill.price, fill.quantity, commission_rate),
            }));
        }

        for effect in &settlement.effects {
            let event = PositionEvent {
                position_id: effect.position_id,
                user_id: effect.user_id,
                instrument_id: effect.instrument_id,
                position_type: effect.position_type,
                fill_id: effect.fill_id,
                quantity: effect.quantity,
                price: effect.price,
                size_after: effect.size_after,
                realized_pnl: effect.realized_pnl,
            };
            match effect.change {
                PositionChange::Opened => {
                    info!(position = %effect.position_id, user = %effect.user_id, kind = %effect.position_type, "position opened");
                    payloads.push(EventPayload::PositionOpened(event));
                }
                PositionChange::Closed => {
                    info!(position = %effect.position_id, user = %effect.user_id, pnl = %effect.realized_pnl, "position closed");
                    payloads.push(EventPayload::PositionClosed(event));
                }
                PositionChange::Increased | PositionChange::Reduced => {
                    payloads.push(EventPayload::PositionUpdated(event));
                }
            }
        }

        if taker.cancelled_at.is_some() {
            payloads.push(EventPayload::OrderCancelled(OrderCancelledEvent {
                instrument_id: taker.instrument_id,
                order_id: taker.id,
                user_id: taker.user_id,
                discarded_quantity: discarded,
                reason: CancelReason::UnfilledRemainder,
            }));
        }

        self.emit_events(now, payloads);
    }

    /// Cancels a resting order owned by `user_id`.
    ///
    /// `None` when the order does not exist, belongs to someone else, or is
    /// already FILLED or CANCELLED. The book is re-checked under the lock, so
    /// an order that filled while the request was in flight also yields
    /// `None` and is never both matched and cancelled.
    pub fn cancel_order(&self, order_id: OrderId, user_id: UserId) -> Result<Option<Order>, ExchangeError> {
        let Some(stored) = self.store.order(order_id)? else {
            return Ok(None);
        };
        if stored.user_id != user_id || stored.is_terminal() {
            debug!(order = %order_id, user = %user_id, "cancel ignored");
            return Ok(None);
        }

        let slot = self.slot(stored.instrument_id)?;
        let mut state = slot.lock();

        if !state.book.contains(order_id) {
            debug!(order = %order_id, "cancel lost the race to a fill");
            return Ok(None);
        }
        let cancelled = self.cancel_resting(&mut state, &[order_id], CancelReason::UserRequested, Timestamp::now())?;
        Ok(cancelled.into_iter().next())
    }

    /// Order with its fills. only visible to its owner.
    pub fn get_order(&self, order_id: OrderId, user_id: UserId) -> Result<OrderDetail, ExchangeError> {
        let order = self
            .store
            .order(order_id)?
            .filter(|o| o.user_id == user_id)
            .ok_or(NotFound::Order(order_id))?;
        let fills = self.store.fills_for_order(order_id)?;
        Ok(OrderDetail { order, fills })
    }

    pub fn user_orders(&self, user_id: UserId) -> Result<Vec<Order>, ExchangeError> {
        Ok(self.store.orders_for_user(user_id)?)
    }
}

/// Returns the limit price for LIMIT orders, `None` for MARKET.
fn validate_request(instrument: &Instrument, request: &OrderRequest) -> Result<Option<Price>, ValidationError> {
    instrument.validate_quantity(request.quantity)?;
    match request.order_type {
        OrderType::Limit => instrument.validate_price(request.price).map(Some),
        OrderType::Market => Ok(None),
    }
}
