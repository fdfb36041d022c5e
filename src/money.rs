//! Fixed-scale decimal arithmetic for money, quantities and percentages.
//!
//! Scale conventions (matching the store's column definitions):
//! - asset quantities and prices: 8 decimal places
//! - USD-denominated balances:    2 decimal places
//! - percentages and confidence:  4 decimal places
//!
//! Division rounds with banker's rounding at the operand scale. Conversions
//! from floating point are not offered; `to_broadcast_f64` exists only for
//! outbound event payloads.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{EngineError, EngineResult};

pub const USD_SCALE: u32 = 2;
pub const QTY_SCALE: u32 = 8;
pub const PCT_SCALE: u32 = 4;

/// Round to USD balance scale.
pub fn usd(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(USD_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Round to asset quantity / price scale.
pub fn qty(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(QTY_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Round to percentage / confidence scale.
pub fn pct(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PCT_SCALE, RoundingStrategy::MidpointNearestEven)
}

fn checked_div(num: Decimal, den: Decimal, scale: u32) -> EngineResult<Decimal> {
    if den.is_zero() {
        return Err(EngineError::Validation(format!(
            "division by zero ({num} / 0)"
        )));
    }
    num.checked_div(den)
        .map(|d| d.round_dp_with_strategy(scale, RoundingStrategy::MidpointNearestEven))
        .ok_or_else(|| EngineError::Fatal(format!("decimal overflow in {num} / {den}")))
}

pub fn div_usd(num: Decimal, den: Decimal) -> EngineResult<Decimal> {
    checked_div(num, den, USD_SCALE)
}

pub fn div_qty(num: Decimal, den: Decimal) -> EngineResult<Decimal> {
    checked_div(num, den, QTY_SCALE)
}

pub fn div_pct(num: Decimal, den: Decimal) -> EngineResult<Decimal> {
    checked_div(num, den, PCT_SCALE)
}

/// Multiplication with overflow promoted to a fatal error.
pub fn mul(a: Decimal, b: Decimal) -> EngineResult<Decimal> {
    a.checked_mul(b)
        .ok_or_else(|| EngineError::Fatal(format!("decimal overflow in {a} * {b}")))
}

/// Mean at the given scale; zero when the slice is empty.
pub fn mean(values: &[Decimal], scale: u32) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    let sum: Decimal = values.iter().copied().sum();
    let n = Decimal::from(values.len() as i64);
    sum.checked_div(n)
        .map(|d| d.round_dp_with_strategy(scale, RoundingStrategy::MidpointNearestEven))
        .unwrap_or(Decimal::ZERO)
}

/// Lossy conversion for outbound broadcast payloads only. Never feed the
/// result back into anything that persists.
pub fn to_broadcast_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Parse a decimal carried inside a JSON number without a float round-trip.
pub fn from_json_number(n: &serde_json::Number) -> Option<Decimal> {
    n.to_string().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn division_uses_bankers_rounding() {
        // 0.125 at scale 2 rounds to the even neighbour 0.12
        assert_eq!(div_usd(d("1"), d("8")).unwrap(), d("0.12"));
        assert_eq!(div_usd(d("3"), d("8")).unwrap(), d("0.38"));
    }

    #[test]
    fn division_by_zero_is_rejected() {
        assert!(div_qty(d("1"), Decimal::ZERO).is_err());
    }

    #[test]
    fn mean_of_empty_is_zero() {
        assert_eq!(mean(&[], PCT_SCALE), Decimal::ZERO);
    }

    #[test]
    fn mean_rounds_at_scale() {
        let vals = [d("0.5"), d("0.8"), d("0.7")];
        assert_eq!(mean(&vals, PCT_SCALE), d("0.6667"));
    }

    #[test]
    fn json_number_round_trip_is_exact() {
        let n: serde_json::Number = serde_json::from_str("50000.12345678").unwrap();
        assert_eq!(from_json_number(&n).unwrap(), d("50000.12345678"));
    }
}
