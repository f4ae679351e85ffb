//! Concurrent placement and cancellation against shared instruments.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use skins_core::*;
use std::sync::Arc;

const TRADERS: u64 = 8;
const ORDERS_PER_TRADER: u64 = 40;

fn exchange_with(instruments: &[InstrumentId]) -> (Arc<Exchange>, Arc<InMemoryLedger>, Arc<MemoryStore>) {
    let ledger = Arc::new(InMemoryLedger::new());
    for user in 1..=TRADERS {
        ledger.credit(UserId(user), Quote::new(dec!(1000000)));
    }
    let prices = Arc::new(StaticPriceSource::new());
    let store = Arc::new(MemoryStore::new());
    for id in instruments {
        prices.set_price(*id, Price::new_unchecked(dec!(100)));
    }
    let exchange = Arc::new(Exchange::new(
        ExchangeConfig::default(),
        store.clone(),
        ledger.clone(),
        prices,
    ));
    for id in instruments {
        exchange.register_instrument(*id, format!("skin {}", id.0));
    }
    (exchange, ledger, store)
}

fn assert_consistent(exchange: &Exchange, ledger: &InMemoryLedger, store: &MemoryStore, initial: Decimal) {
    assert_eq!(ledger.total_balance().value(), initial);

    for fill in store.all_fills() {
        assert!(fill.quantity > Decimal::ZERO);
        assert_ne!(fill.buy_user_id, fill.sell_user_id);
    }

    for summary in exchange.instruments() {
        let id = summary.instrument.id;
        if let (Some(bid), Some(ask)) = (summary.best_bid, summary.best_ask) {
            assert!(bid < ask, "book crossed on {id}");
        }

        let open = store.open_positions(Some(id)).unwrap();
        let long: Decimal = open
            .iter()
            .filter(|p| p.position_type == PositionType::Long)
            .map(|p| p.size)
            .sum();
        let short: Decimal = open
            .iter()
            .filter(|p| p.position_type == PositionType::Short)
            .map(|p| p.size)
            .sum();
        assert_eq!(long, short, "open interest out of balance on {id}");
    }

    for user in 1..=TRADERS {
        for order in exchange.user_orders(UserId(user)).unwrap() {
            assert!(order.filled_quantity <= order.quantity);
        }
    }
}

#[test]
fn parallel_traders_keep_books_and_balances_consistent() {
    let instruments = [InstrumentId(1), InstrumentId(2)];
    let (exchange, ledger, store) = exchange_with(&instruments);
    let initial = ledger.total_balance().value();

    std::thread::scope(|scope| {
        for trader in 1..=TRADERS {
            let exchange = exchange.clone();
            scope.spawn(move || {
                let user = UserId(trader);
                for n in 0..ORDERS_PER_TRADER {
                    let instrument = instruments[(n % 2) as usize];
                    // buyers bid at or above 100, sellers offer at or below, so most orders cross
                    let offset = Decimal::from((trader + n) % 3);
                    let (side, kind, price) = if trader % 2 == 0 {
                        (Side::Buy, PositionType::Long, dec!(100) + offset)
                    } else {
                        (Side::Sell, PositionType::Short, dec!(100) - offset)
                    };
                    let request = if n % 5 == 0 {
                        OrderRequest::market(user, instrument, side, kind, dec!(1))
                    } else {
                        OrderRequest::limit(user, instrument, side, kind, price, dec!(1))
                    };
                    // market orders may find nothing to hit
                    let _ = exchange.place_order(request);
                }
            });
        }
    });

    assert!(store.fill_count() > 0);
    assert_consistent(&exchange, &ledger, &store, initial);
}

#[test]
fn cancel_racing_a_fill_never_does_both() {
    for _ in 0..20 {
        let instruments = [InstrumentId(1)];
        let (exchange, ledger, store) = exchange_with(&instruments);
        let initial = ledger.total_balance().value();

        let maker = exchange
            .place_order(OrderRequest::limit(
                UserId(1),
                InstrumentId(1),
                Side::Sell,
                PositionType::Short,
                dec!(100),
                dec!(5),
            ))
            .unwrap()
            .order;

        let (cancelled, taken) = std::thread::scope(|scope| {
            let cancel = scope.spawn(|| exchange.cancel_order(maker.id, UserId(1)).unwrap());
            let take = scope.spawn(|| {
                exchange.place_order(OrderRequest::market(
                    UserId(2),
                    InstrumentId(1),
                    Side::Buy,
                    PositionType::Long,
                    dec!(5),
                ))
            });
            (cancel.join().unwrap(), take.join().unwrap())
        });

        match (cancelled, taken) {
            (Some(order), Err(ExchangeError::NoLiquidity { .. })) => {
                assert_eq!(order.status, OrderStatus::Cancelled);
                assert_eq!(store.fill_count(), 0);
            }
            (None, Ok(result)) => {
                assert_eq!(result.status, OrderStatus::Filled);
                let stored = exchange.get_order(maker.id, UserId(1)).unwrap().order;
                assert_eq!(stored.status, OrderStatus::Filled);
            }
            (cancelled, taken) => panic!("cancel {cancelled:?} and take {taken:?} both won"),
        }

        assert!(exchange.order_book(InstrumentId(1)).unwrap().asks.is_empty());
        assert_consistent(&exchange, &ledger, &store, initial);
    }
}

#[test]
fn concurrent_closes_of_one_position_close_it_once() {
    let instruments = [InstrumentId(1)];
    let (exchange, ledger, store) = exchange_with(&instruments);
    let initial = ledger.total_balance().value();
    let skin = InstrumentId(1);

    exchange
        .place_order(OrderRequest::limit(UserId(1), skin, Side::Buy, PositionType::Long, dec!(100), dec!(10)))
        .unwrap();
    exchange
        .place_order(OrderRequest::market(UserId(2), skin, Side::Sell, PositionType::Short, dec!(10)))
        .unwrap();
    // plenty of bids to close into
    exchange
        .place_order(OrderRequest::limit(UserId(3), skin, Side::Buy, PositionType::Long, dec!(99), dec!(50)))
        .unwrap();

    let outcomes: Vec<Result<PlaceOrderResult, ExchangeError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| exchange.close_position(UserId(1), skin, CloseRequest::market())))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let closed = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(closed, 1);
    for failed in outcomes.iter().filter_map(|o| o.as_ref().err()) {
        assert!(matches!(
            failed,
            ExchangeError::NotFound(NotFound::OpenPosition { .. })
                | ExchangeError::Validation(ValidationError::NoPositionToClose { .. })
        ));
    }
    assert!(store.open_position(UserId(1), skin).unwrap().is_none());
    assert_consistent(&exchange, &ledger, &store, initial);
}
