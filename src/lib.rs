// skins-core: leveraged trading engine for in-game skins.
// LONG/SHORT positions with fixed 5x leverage, matched on a central limit order book.
// balances live in an external ledger; reference prices come from outside too.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: ids, Side, PositionType, Price, Quote, Timestamp
//   2.x  book.rs: price-time priority order book
//        order.rs, matching.rs: order lifecycle and match planning
//   3.x  margin.rs: 20% margin and commission math
//   4.x  position.rs: position struct, PnL, increase/reduce/flip
//        settlement.rs: fills -> position changes + one ledger batch
//   5.x  ledger.rs: AccountLedger boundary and the in-memory ledger
//   6.x  price_source.rs: reference price boundary
//        risk.rs: margin ratio, tiers, liquidation price, system health
//   7.x  config.rs: rates, risk thresholds, server, env presets
//   8.x  engine/: the Exchange: orders, positions, liquidations
//        store.rs: order/fill/position persistence boundary
//   11.x events.rs: state transition events for audit
//        api/: axum REST layer

// core trading modules
pub mod book;
pub mod engine;
pub mod instrument;
pub mod margin;
pub mod matching;
pub mod order;
pub mod position;
pub mod settlement;
pub mod types;

// risk
pub mod risk;

// boundaries and integration
pub mod api;
pub mod config;
pub mod events;
pub mod ledger;
pub mod price_source;
pub mod store;

// re exports for convenience
pub use book::{BookSnapshot, OrderBook};
pub use config::{ConfigError, Environment, ExchangeConfig};
pub use engine::*;
pub use events::{Event, EventPayload};
pub use instrument::Instrument;
pub use ledger::{AccountLedger, InMemoryLedger, LedgerError};
pub use order::{Fill, Order, OrderStatus, OrderType, TimeInForce};
pub use position::Position;
pub use price_source::{PriceError, PriceSource, StaticPriceSource};
pub use risk::{PositionRisk, RiskParams, RiskTier, SystemHealth};
pub use store::{MemoryStore, OrderStore, PositionStore, Repository, StoreError};
pub use types::*;
