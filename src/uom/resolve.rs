// src/uom/resolve.rs

//! Conversion and pricing resolver.
//!
//! Divides the invoice's unit price by the evidenced pack quantity to get a
//! per-base-unit price, in exact decimal arithmetic, and cross-checks the
//! line against its own printed total. Measurable units never resolve: there
//! is no density or size table here and never will be.

use std::str::FromStr;

use bigdecimal::rounding::RoundingMode;
use bigdecimal::{BigDecimal, ToPrimitive};

use crate::models::RawLineItem;

use super::units::UnitClass;
use super::{EngineParams, PackCandidate};

/// Price per base unit plus the cross-check verdict.
///
/// `(None, false)` when there is nothing to compute: no candidate, or a
/// measurable unit. When arithmetic succeeds the price is returned even if
/// the cross-check failed — the caller publishes it alongside the flag so a
/// reviewer sees what the conversion would have been.
pub fn resolve(
    raw: &RawLineItem,
    candidate: Option<&PackCandidate>,
    unit_class: UnitClass,
    params: &EngineParams,
) -> (Option<f64>, bool) {
    if unit_class == UnitClass::MeasurablePhysical {
        return (None, false);
    }
    let Some(candidate) = candidate else {
        return (None, false);
    };
    if candidate.quantity_per_pack == 0 {
        return (None, false);
    }
    let Some(unit_price) = decimal(raw.unit_price) else {
        return (None, false);
    };
    let pack = BigDecimal::from(candidate.quantity_per_pack);
    let price_per_base =
        (&unit_price / &pack).with_scale_round(params.currency_scale, RoundingMode::HalfUp);
    let safe = cross_check(raw, &unit_price, params.price_tolerance);
    (price_per_base.to_f64(), safe)
}

/// The line must agree with its own printed total: extension_price vs
/// unit_price x quantity, within a relative tolerance. A computable price
/// that contradicts the invoice's arithmetic is untrustworthy.
fn cross_check(raw: &RawLineItem, unit_price: &BigDecimal, tolerance: f64) -> bool {
    let Some(extension) = raw.extension_price else {
        return true;
    };
    let (Some(ext), Some(qty), Some(tol)) = (
        decimal(extension),
        decimal(raw.quantity),
        decimal(tolerance),
    ) else {
        return false;
    };
    let expected = unit_price * &qty;
    let diff = (&ext - &expected).abs();
    let ext_abs = ext.abs();
    let expected_abs = expected.abs();
    let bound = if ext_abs > expected_abs { ext_abs } else { expected_abs };
    diff <= &bound * &tol
}

/// Floats come in from JSON; go through their decimal rendering so currency
/// rounds on the digits the invoice shows, not on binary representation
/// noise. NaN and infinities fail the parse and resolve to nothing.
fn decimal(value: f64) -> Option<BigDecimal> {
    BigDecimal::from_str(&format!("{value:.10}")).ok()
}
