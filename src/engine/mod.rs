// 8.0: exchange engine. coordinates validation, matching, settlement, the
// ledger and the store for every order, plus risk and forced liquidation.
// one lock per instrument; different instruments never contend.

mod core;
mod liquidations;
mod orders;
mod positions;
mod results;

pub use core::Exchange;
pub use results::{
    CloseRequest, ExchangeError, InstrumentSummary, LiquidationFailure, LiquidationReport, LiquidationResult,
    NotFound, OrderDetail, OrderRequest, PlaceOrderResult, PositionView, ValidationError,
};
