//! Conversion engine: cross-rate multiplication plus a percentage fee.
//!
//! All arithmetic is `BigDecimal`; floats never touch money. The fee is
//! taken from the gross converted amount before any rounding, and the
//! presented figures are rounded half-up to four decimal places.

use std::str::FromStr;

use bigdecimal::{BigDecimal, RoundingMode, Zero};

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::rates::table::RateTable;

/// Decimal places in presented amounts.
const SCALE: i64 = 4;

/// Result of a single conversion, all figures rounded for presentation.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub from: String,
    pub to: String,
    pub amount: BigDecimal,
    /// Cross rate used (units of `to` per unit of `from`)
    pub rate: BigDecimal,
    /// Amount * rate, before the fee
    pub gross: BigDecimal,
    /// Commission charged, in `to` units
    pub fee: BigDecimal,
    /// What the user receives: gross - fee
    pub result: BigDecimal,
    /// Commission percent that was applied
    pub commission_percent: BigDecimal,
}

/// Commission percent from configuration, falling back to 2 on garbage.
pub fn commission_percent() -> BigDecimal {
    match BigDecimal::from_str(&config::fees::COMMISSION_PERCENT) {
        Ok(p) if p >= BigDecimal::zero() => p,
        _ => {
            log::warn!(
                "Invalid COMMISSION_PERCENT {:?}, using default 2",
                &*config::fees::COMMISSION_PERCENT
            );
            BigDecimal::from(2)
        }
    }
}

/// Parses a user-supplied amount; accepts a decimal comma.
pub fn parse_amount(text: &str) -> AppResult<BigDecimal> {
    let amount = BigDecimal::from_str(&text.trim().replace(',', "."))
        .map_err(|_| AppError::Validation(format!("not a number: {:?}", text.trim())))?;
    if amount <= BigDecimal::zero() {
        return Err(AppError::Validation("amount must be positive".to_string()));
    }
    Ok(amount)
}

/// Converts `amount` of `from` into `to` using the given table and fee.
pub fn convert(
    table: &RateTable,
    from: &str,
    to: &str,
    amount: &BigDecimal,
    commission_percent: &BigDecimal,
) -> AppResult<Conversion> {
    if amount <= &BigDecimal::zero() {
        return Err(AppError::Validation("amount must be positive".to_string()));
    }

    let rate = table.cross_rate(from, to)?;
    let gross = amount * &rate;
    let fee = &gross * commission_percent / BigDecimal::from(100);
    let result = &gross - &fee;

    let from_code = from.trim().to_uppercase();
    let to_code = to.trim().to_uppercase();

    Ok(Conversion {
        from: from_code,
        to: to_code,
        amount: amount.clone(),
        rate: rate.with_scale_round(SCALE, RoundingMode::HalfUp),
        gross: gross.with_scale_round(SCALE, RoundingMode::HalfUp),
        fee: fee.with_scale_round(SCALE, RoundingMode::HalfUp),
        result: result.with_scale_round(SCALE, RoundingMode::HalfUp),
        commission_percent: commission_percent.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::table::test_support::sample_table;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_usd_to_rub_with_two_percent_fee() {
        let table = sample_table();
        let c = convert(&table, "USD", "RUB", &dec("100"), &dec("2")).unwrap();
        // 100 USD * 90.50 = 9050 RUB gross, 2% fee = 181
        assert_eq!(c.gross, dec("9050.0000"));
        assert_eq!(c.fee, dec("181.0000"));
        assert_eq!(c.result, dec("8869.0000"));
        assert_eq!(c.rate, dec("90.5000"));
    }

    #[test]
    fn test_rub_to_usd_divides() {
        let table = sample_table();
        let c = convert(&table, "RUB", "USD", &dec("9050"), &dec("0")).unwrap();
        assert_eq!(c.result, dec("100.0000"));
    }

    #[test]
    fn test_cross_currency_goes_through_base() {
        let table = sample_table();
        // USD->EUR = 90.50 / 98.00
        let c = convert(&table, "USD", "EUR", &dec("98"), &dec("0")).unwrap();
        assert_eq!(c.result, dec("90.5000"));
    }

    #[test]
    fn test_same_currency_keeps_fee() {
        let table = sample_table();
        let c = convert(&table, "USD", "usd", &dec("50"), &dec("2")).unwrap();
        assert_eq!(c.rate, dec("1.0000"));
        assert_eq!(c.fee, dec("1.0000"));
        assert_eq!(c.result, dec("49.0000"));
    }

    #[test]
    fn test_nominal_currency_conversion() {
        let table = sample_table();
        // 1 CZK = 3.9 RUB
        let c = convert(&table, "CZK", "RUB", &dec("10"), &dec("0")).unwrap();
        assert_eq!(c.result, dec("39.0000"));
    }

    #[test]
    fn test_unknown_currency() {
        let table = sample_table();
        let err = convert(&table, "USD", "XYZ", &dec("1"), &dec("2")).unwrap_err();
        assert!(matches!(err, AppError::UnknownCurrency(_)));
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let table = sample_table();
        assert!(convert(&table, "USD", "RUB", &dec("0"), &dec("2")).is_err());
        assert!(convert(&table, "USD", "RUB", &dec("-5"), &dec("2")).is_err());
    }

    #[test]
    fn test_parse_amount_accepts_decimal_comma() {
        assert_eq!(parse_amount("12,5").unwrap(), dec("12.5"));
        assert_eq!(parse_amount(" 100 ").unwrap(), dec("100"));
    }

    #[test]
    fn test_parse_amount_rejects_garbage_and_negatives() {
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount("-1").is_err());
        assert!(parse_amount("0").is_err());
        assert!(parse_amount("").is_err());
    }

    #[test]
    fn test_fee_computed_before_rounding() {
        let table = sample_table();
        // 0.01 USD * 90.50 = 0.905 gross; 2% fee = 0.0181 exactly
        let c = convert(&table, "USD", "RUB", &dec("0.01"), &dec("2")).unwrap();
        assert_eq!(c.fee, dec("0.0181"));
        assert_eq!(c.result, dec("0.8869"));
    }
}
