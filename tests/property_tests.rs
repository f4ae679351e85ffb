//! Property-based tests.
//!
//! Random order flow against a single instrument, and the P&L and risk math
//! on random inputs. Invariants must hold after every step.

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use skins_core::margin::{commission, required_margin};
use skins_core::position::calculate_pnl;
use skins_core::risk::{liquidation_price, margin_ratio};
use skins_core::*;
use std::sync::Arc;

const SKIN: InstrumentId = InstrumentId(1);
const USERS: u64 = 4;

// Strategies for generating test data
fn price_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000i64).prop_map(|x| Decimal::new(x, 2)) // 0.01 to 10,000
}

fn size_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..100_000i64).prop_map(|x| Decimal::new(x, 2)) // 0.01 to 1,000
}

#[derive(Debug, Clone)]
enum Action {
    Limit {
        user: u64,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    },
    Market {
        user: u64,
        side: Side,
        quantity: Decimal,
    },
    Close {
        user: u64,
    },
    Cancel {
        user: u64,
        nth: usize,
    },
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Buy), Just(Side::Sell)]
}

fn action_strategy() -> impl Strategy<Value = Action> {
    let user = 1..=USERS;
    let price = (95i64..=105i64).prop_map(Decimal::from);
    let quantity = (1i64..=10i64).prop_map(Decimal::from);
    prop_oneof![
        4 => (user.clone(), side_strategy(), price, quantity.clone())
            .prop_map(|(user, side, price, quantity)| Action::Limit { user, side, price, quantity }),
        2 => (user.clone(), side_strategy(), quantity)
            .prop_map(|(user, side, quantity)| Action::Market { user, side, quantity }),
        1 => user.clone().prop_map(|user| Action::Close { user }),
        1 => (user, 0usize..4).prop_map(|(user, nth)| Action::Cancel { user, nth }),
    ]
}

fn apply(exchange: &Exchange, action: &Action) {
    // rejections are part of the flow; only the invariants matter
    let _ = match *action {
        Action::Limit {
            user,
            side,
            price,
            quantity,
        } => exchange
            .place_order(OrderRequest::limit(UserId(user), SKIN, side, side.exposure(), price, quantity))
            .map(|_| ()),
        Action::Market { user, side, quantity } => exchange
            .place_order(OrderRequest::market(UserId(user), SKIN, side, side.exposure(), quantity))
            .map(|_| ()),
        Action::Close { user } => exchange
            .close_position(UserId(user), SKIN, CloseRequest::market())
            .map(|_| ()),
        Action::Cancel { user, nth } => {
            let open: Vec<Order> = exchange
                .user_orders(UserId(user))
                .unwrap()
                .into_iter()
                .filter(|o| !o.is_terminal())
                .collect();
            match open.get(nth) {
                Some(order) => exchange.cancel_order(order.id, UserId(user)).map(|_| ()),
                None => Ok(()),
            }
        }
    };
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Random order flow never creates money, never trades a user with
    /// themselves and keeps open interest balanced.
    #[test]
    fn order_flow_preserves_invariants(actions in prop::collection::vec(action_strategy(), 1..60)) {
        let ledger = Arc::new(InMemoryLedger::new());
        for user in 1..=USERS {
            ledger.credit(UserId(user), Quote::new(dec!(50000)));
        }
        let prices = Arc::new(StaticPriceSource::with_prices([(SKIN, Price::new_unchecked(dec!(100)))]));
        let store = Arc::new(MemoryStore::new());
        let exchange = Exchange::new(ExchangeConfig::default(), store.clone(), ledger.clone(), prices);
        exchange.register_instrument(SKIN, "M4A4 | Howl (Minimal Wear)");
        let initial = ledger.total_balance();

        for action in &actions {
            apply(&exchange, action);

            prop_assert_eq!(ledger.total_balance(), initial);

            for fill in store.all_fills() {
                prop_assert_ne!(fill.buy_user_id, fill.sell_user_id, "self trade after {:?}", action);
            }

            let open = store.open_positions(Some(SKIN)).unwrap();
            let net: Decimal = open.iter().map(|p| p.position_type.sign() * p.size).sum();
            prop_assert_eq!(net, Decimal::ZERO);
            for position in &open {
                prop_assert!(position.size > Decimal::ZERO);
                prop_assert!(position.margin.value() > Decimal::ZERO);
            }
        }

        for user in 1..=USERS {
            for order in exchange.user_orders(UserId(user)).unwrap() {
                prop_assert!(order.filled_quantity <= order.quantity);
                let fills = exchange.get_order(order.id, UserId(user)).unwrap().fills;
                let filled: Decimal = fills.iter().map(|f| f.quantity).sum();
                prop_assert_eq!(filled, order.filled_quantity);
            }
        }
    }

    /// LONG and SHORT P&L on the same prices are mirror images.
    #[test]
    fn pnl_is_zero_sum(entry in price_strategy(), exit in price_strategy(), size in size_strategy()) {
        let entry = Price::new_unchecked(entry);
        let exit = Price::new_unchecked(exit);
        let long = calculate_pnl(PositionType::Long, entry, exit, size);
        let short = calculate_pnl(PositionType::Short, entry, exit, size);
        prop_assert_eq!(long.add(short).value(), Decimal::ZERO);
        if exit > entry {
            prop_assert!(long.value() > Decimal::ZERO);
        }
    }

    /// Margin is 20% of notional and commission is 0.02% of it.
    #[test]
    fn margin_and_commission_scale_with_notional(price in price_strategy(), size in size_strategy()) {
        let price = Price::new_unchecked(price);
        let notional = price.value() * size;
        prop_assert_eq!(required_margin(price, size, dec!(0.20)).value(), notional * dec!(0.20));
        prop_assert_eq!(commission(price, size, dec!(0.0002)).value(), notional * dec!(0.0002));
    }

    /// At the liquidation price the margin ratio is the liquidation threshold.
    #[test]
    fn liquidation_price_hits_threshold(entry in 1_000i64..100_000i64, size in size_strategy(), long in any::<bool>()) {
        let entry = Price::new_unchecked(Decimal::new(entry, 2));
        let kind = if long { PositionType::Long } else { PositionType::Short };
        let position = Position::open(
            PositionId(1),
            UserId(1),
            SKIN,
            kind,
            entry,
            size,
            dec!(0.20),
            Timestamp::from_millis(0),
        );

        let threshold = dec!(0.10);
        let liquidation = liquidation_price(&position, threshold).unwrap();
        let ratio = margin_ratio(&position, liquidation);
        prop_assert!((ratio - threshold).abs() < dec!(0.000001));

        // a fresh position starts at the 20% margin rate
        prop_assert_eq!(margin_ratio(&position, entry), dec!(0.20));
    }
}
