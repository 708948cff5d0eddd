//! Fixed-point money arithmetic.
//!
//! Every balance and amount in the ledger is a `rust_decimal::Decimal`
//! quantized to eight decimal places. All derived amounts (commission,
//! payouts) pass through [`quantize`] before they are persisted so that
//! database values and in-memory values always agree digit for digit.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{LedgerError, LedgerResult};

/// Decimal places carried by every monetary value.
pub const SCALE: u32 = 8;

/// Rounds a decimal to the ledger scale, half away from zero.
///
/// The result always carries exactly [`SCALE`] fractional digits so that
/// formatted values match what `NUMERIC(30,8)` columns read back.
pub fn quantize(value: Decimal) -> Decimal {
    let mut quantized =
        value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
    quantized.rescale(SCALE);
    quantized
}

/// Validates an externally supplied amount.
///
/// Amounts must be strictly positive and must not carry more precision than
/// the ledger scale; anything else is a caller bug or a malformed payload.
pub fn validate_amount(amount: Decimal) -> LedgerResult<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::validation(format!(
            "amount must be positive, got {amount}"
        )));
    }
    let normalized = amount.normalize();
    if normalized.scale() > SCALE {
        return Err(LedgerError::validation(format!(
            "amount {amount} exceeds scale {SCALE}"
        )));
    }
    Ok(quantize(amount))
}

/// Applies a percentage to an amount and quantizes the result.
pub fn percentage_of(amount: Decimal, percent: Decimal) -> Decimal {
    quantize(amount * percent / Decimal::ONE_HUNDRED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quantize_pads_to_eight_places() {
        assert_eq!(quantize(dec!(1.9)).to_string(), "1.90000000");
        assert_eq!(quantize(dec!(0.1)).to_string(), "0.10000000");
    }

    #[test]
    fn quantize_rounds_half_away_from_zero() {
        assert_eq!(quantize(dec!(0.000000005)).to_string(), "0.00000001");
        assert_eq!(quantize(dec!(0.000000004)).to_string(), "0.00000000");
    }

    #[test]
    fn validate_amount_rejects_non_positive() {
        assert!(validate_amount(dec!(0)).is_err());
        assert!(validate_amount(dec!(-1.5)).is_err());
    }

    #[test]
    fn validate_amount_rejects_excess_precision() {
        assert!(validate_amount(dec!(0.123456789)).is_err());
    }

    #[test]
    fn validate_amount_normalizes_scale() {
        let amount = validate_amount(dec!(12.5)).unwrap();
        assert_eq!(amount.to_string(), "12.50000000");
    }

    #[test]
    fn percentage_of_matches_settlement_vectors() {
        // 5% commission on a 2.0 pool
        assert_eq!(percentage_of(dec!(2.0), dec!(5)).to_string(), "0.10000000");
        // 50% of a 2.85 distributable pool
        assert_eq!(
            percentage_of(dec!(2.85), dec!(50)).to_string(),
            "1.42500000"
        );
    }
}
