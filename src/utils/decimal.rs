//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Days used to annualize funding.
const DAYS_PER_YEAR: Decimal = dec!(365);

/// Round to tick size (e.g., 0.01 for most prices).
pub fn round_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size <= Decimal::ZERO {
        return value;
    }
    (value / tick_size).round() * tick_size
}

/// Round toward zero to a multiple of the lot size.
///
/// Never rounds up, and is idempotent on lot-aligned input.
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size <= Decimal::ZERO {
        return value;
    }
    ((value / lot_size).trunc() * lot_size).normalize()
}

/// Number of fractional digits a price with this tick size carries.
///
/// `0.01 -> 2`, `0.1 -> 1`, `0.5 -> 1`, `1 -> 0`, `10 -> 0`.
pub fn precision_of(step: Decimal) -> u32 {
    step.normalize().scale()
}

/// Annualized percentage yield of a per-period funding rate.
///
/// `apy = rate * periods_per_day * 365 * 100`
pub fn annualize_rate(rate: Decimal, periods_per_day: u32) -> Decimal {
    rate * Decimal::from(periods_per_day) * DAYS_PER_YEAR * dec!(100)
}

/// Apply a percentage offset: `value * (1 + pct)`.
pub fn offset_by_pct(value: Decimal, pct: Decimal) -> Decimal {
    value * (Decimal::ONE + pct)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_tick() {
        assert_eq!(round_to_tick(dec!(50123.456), dec!(0.01)), dec!(50123.46));
        assert_eq!(round_to_tick(dec!(50123.456), dec!(0.10)), dec!(50123.50));
        assert_eq!(round_to_tick(dec!(50123.456), dec!(1.00)), dec!(50123.00));
    }

    #[test]
    fn test_round_down_to_lot() {
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.001)), dec!(1.567));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.01)), dec!(1.56));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.1)), dec!(1.5));
        assert_eq!(round_down_to_lot(dec!(0.0099), dec!(0.01)), Decimal::ZERO);
    }

    #[test]
    fn test_round_down_is_idempotent_and_never_rounds_up() {
        for (value, lot) in [
            (dec!(0.08), dec!(0.001)),
            (dec!(12.3456), dec!(0.05)),
            (dec!(7), dec!(1)),
            (dec!(0.0119999), dec!(0.01)),
        ] {
            let once = round_down_to_lot(value, lot);
            assert!(once <= value);
            assert_eq!(round_down_to_lot(once, lot), once);
        }
    }

    #[test]
    fn test_round_down_truncates_toward_zero() {
        assert_eq!(round_down_to_lot(dec!(-1.567), dec!(0.01)), dec!(-1.56));
    }

    #[test]
    fn test_precision_of() {
        assert_eq!(precision_of(dec!(0.01)), 2);
        assert_eq!(precision_of(dec!(0.0010)), 3);
        assert_eq!(precision_of(dec!(0.5)), 1);
        assert_eq!(precision_of(dec!(1)), 0);
        assert_eq!(precision_of(dec!(10)), 0);
    }

    #[test]
    fn test_annualize_rate() {
        // 0.01% every 4h: 0.0001 * 6 * 365 * 100 = 21.9%
        assert_eq!(annualize_rate(dec!(0.0001), 6), dec!(21.9));
        // 0.01% hourly: 87.6%
        assert_eq!(annualize_rate(dec!(0.0001), 24), dec!(87.6));
        assert_eq!(annualize_rate(dec!(-0.0001), 24), dec!(-87.6));
    }

    #[test]
    fn test_offset_by_pct() {
        assert_eq!(offset_by_pct(dec!(100), dec!(0.05)), dec!(105));
        assert_eq!(offset_by_pct(dec!(100), dec!(-0.05)), dec!(95));
    }
}
