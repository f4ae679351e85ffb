//! Margin and commission math.
//!
//! Margin is a flat fraction of entry notional (20% by default). It is locked
//! when exposure opens and released pro rata as the position closes.
//! Commission is charged on every fill, to each side, at fill price.

use crate::types::{Price, Quote};
use rust_decimal::Decimal;

pub fn notional(price: Price, quantity: Decimal) -> Quote {
    Quote::new(price.value() * quantity)
}

/// `price × quantity × margin_rate`
pub fn required_margin(price: Price, quantity: Decimal, margin_rate: Decimal) -> Quote {
    Quote::new(price.value() * quantity * margin_rate)
}

/// `price × quantity × commission_rate`, charged to each side of a fill.
pub fn commission(price: Price, quantity: Decimal, commission_rate: Decimal) -> Quote {
    Quote::new(price.value() * quantity * commission_rate)
}

/// Share of `margin` released when `closed` of `size` units close.
/// closing everything releases all of it, with no rounding residue.
pub fn released_margin(margin: Quote, closed: Decimal, size: Decimal) -> Quote {
    if size.is_zero() || closed >= size {
        return margin;
    }
    Quote::new(margin.value() * closed / size)
}

/// Pre-trade check for orders that open exposure.
pub fn has_sufficient_margin(available: Quote, required: Quote) -> bool {
    available.value() >= required.value()
}
