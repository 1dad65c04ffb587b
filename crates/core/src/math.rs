//! Rounding helpers for monetary amounts.
//!
//! All sizing outputs are floored so a computed quantity never exceeds what
//! the exact value would allow. Rounding is applied only at the final output
//! of a computation, never on intermediates.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::constants::{CHAIN_SCALE, SIZING_SCALE};

/// Floor a sizing output to [`SIZING_SCALE`] fractional digits.
pub fn floor_sized(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(SIZING_SCALE, RoundingStrategy::ToNegativeInfinity)
}

/// Floor an on-chain transfer amount to [`CHAIN_SCALE`] fractional digits.
pub fn floor_chain(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(CHAIN_SCALE, RoundingStrategy::ToNegativeInfinity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn floor_never_rounds_up() {
        assert_eq!(floor_sized(dec!(1.2345678)), dec!(1.234567));
        assert_eq!(floor_sized(dec!(1.9999999)), dec!(1.999999));
        assert_eq!(floor_sized(dec!(-0.0000001)), dec!(-0.000001));
        assert_eq!(floor_sized(dec!(5)), dec!(5));
    }

    #[test]
    fn floored_value_has_bounded_scale() {
        let v = floor_sized(dec!(0.123456789123));
        assert!(v.scale() <= SIZING_SCALE);
        assert!(v <= dec!(0.123456789123));
        assert_eq!(floor_chain(dec!(0.123456789123)).scale(), CHAIN_SCALE);
    }
}
