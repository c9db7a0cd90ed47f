//! Monetary amounts at the ledger's currency precision.

use rust_decimal::Decimal;
use serde::Serialize;

use walletd_core::{LedgerError, LedgerResult};

/// Number of fractional digits the single ledger currency carries.
pub const CURRENCY_SCALE: u32 = 2;

pub(crate) const AMOUNT_NOT_POSITIVE: &str = "Amount must be greater than 0";
pub(crate) const AMOUNT_TOO_LARGE: &str = "Amount exceeds the maximum supported value";

/// Largest amount or balance the ledger holds: `99999999999999999.99`, the
/// ceiling of a `NUMERIC(19, 2)` column.
pub fn max_money() -> Decimal {
    Decimal::from_i128_with_scale(9_999_999_999_999_999_999, CURRENCY_SCALE)
}

/// A strictly positive amount with at most [`CURRENCY_SCALE`] fractional digits.
///
/// Amounts are never rounded: a value carrying more precision than the
/// currency allows is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> LedgerResult<Self> {
        if value <= Decimal::ZERO {
            return Err(LedgerError::invalid(AMOUNT_NOT_POSITIVE));
        }

        if value > max_money() {
            return Err(LedgerError::invalid(AMOUNT_TOO_LARGE));
        }

        let mut normalized = value.normalize();
        if normalized.scale() > CURRENCY_SCALE {
            return Err(LedgerError::invalid(format!(
                "Amount supports at most {CURRENCY_SCALE} decimal places"
            )));
        }
        // rescale gives up silently when the mantissa cannot grow.
        normalized.rescale(CURRENCY_SCALE);
        if normalized.scale() != CURRENCY_SCALE {
            return Err(LedgerError::invalid(AMOUNT_TOO_LARGE));
        }

        Ok(Self(normalized))
    }

    /// Validate an amount that may be absent from the request.
    pub fn from_optional(value: Option<Decimal>) -> LedgerResult<Self> {
        match value {
            Some(v) => Self::new(v),
            None => Err(LedgerError::invalid(AMOUNT_NOT_POSITIVE)),
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl core::fmt::Display for Amount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Zero at currency scale (renders as `0.00`).
pub(crate) fn zero() -> Decimal {
    Decimal::new(0, CURRENCY_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rejects_zero_and_negative() {
        for v in [dec!(0), dec!(-5.00), dec!(-0.01)] {
            let err = Amount::new(v).unwrap_err();
            assert_eq!(err, LedgerError::invalid(AMOUNT_NOT_POSITIVE));
        }
    }

    #[test]
    fn rejects_missing() {
        assert!(matches!(
            Amount::from_optional(None),
            Err(LedgerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn rejects_sub_cent_precision() {
        let err = Amount::new(dec!(0.001)).unwrap_err();
        assert!(err.message().contains("decimal places"));
    }

    #[test]
    fn trailing_zeros_are_not_extra_precision() {
        let amount = Amount::new(dec!(10.5000)).unwrap();
        assert_eq!(amount.value(), dec!(10.50));
        assert_eq!(amount.to_string(), "10.50");
    }

    #[test]
    fn rejects_amounts_above_the_column_ceiling() {
        assert_eq!(Amount::new(max_money()).unwrap().value(), max_money());
        assert_eq!(max_money().to_string(), "99999999999999999.99");

        for v in [dec!(100000000000000000.00), dec!(79228162514264337593543950000)] {
            let err = Amount::new(v).unwrap_err();
            assert_eq!(err, LedgerError::invalid(AMOUNT_TOO_LARGE));
        }
    }

    #[test]
    fn integral_amounts_render_at_currency_scale() {
        assert_eq!(Amount::new(dec!(30)).unwrap().to_string(), "30.00");
        assert_eq!(zero().to_string(), "0.00");
    }
}
