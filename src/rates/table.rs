//! Parsed daily rate table and cross-rate math.
//!
//! The central-bank feed quotes every currency against the ruble, so the
//! table carries a synthetic RUB entry (nominal 1, value 1) and all cross
//! rates go through the base: rate(from→to) = per_unit(from) / per_unit(to).

use std::collections::BTreeMap;

use bigdecimal::{BigDecimal, One, Zero};
use chrono::NaiveDate;

use crate::core::error::{AppError, AppResult};

/// Currency code of the feed's base currency.
pub const BASE_CODE: &str = "RUB";

/// One quoted currency from the daily feed.
#[derive(Debug, Clone)]
pub struct Currency {
    /// ISO 4217 letter code, uppercase ("USD")
    pub char_code: String,
    /// Human-readable name from the feed
    pub name: String,
    /// How many units the quoted value is for (10 for CZK, 10000 for VND, ...)
    pub nominal: u32,
    /// Value of `nominal` units in the base currency
    pub value: BigDecimal,
}

impl Currency {
    /// Value of a single unit in the base currency.
    pub fn per_unit(&self) -> BigDecimal {
        &self.value / BigDecimal::from(self.nominal)
    }
}

/// A full daily rate table keyed by uppercase currency code.
#[derive(Debug, Clone)]
pub struct RateTable {
    /// Date the feed was published for
    pub date: NaiveDate,
    currencies: BTreeMap<String, Currency>,
}

impl RateTable {
    /// Builds a table from feed entries, adding the synthetic base entry.
    ///
    /// Rejects an empty list and any entry that would poison cross-rate
    /// division later (zero value or zero nominal).
    pub fn new(date: NaiveDate, entries: Vec<Currency>) -> AppResult<Self> {
        if entries.is_empty() {
            return Err(AppError::Feed("feed contained no currencies".to_string()));
        }

        let mut currencies = BTreeMap::new();
        for entry in entries {
            if entry.nominal == 0 {
                return Err(AppError::Feed(format!("{}: zero nominal", entry.char_code)));
            }
            if entry.value <= BigDecimal::zero() {
                return Err(AppError::Feed(format!("{}: non-positive value", entry.char_code)));
            }
            currencies.insert(entry.char_code.to_uppercase(), entry);
        }

        currencies.insert(
            BASE_CODE.to_string(),
            Currency {
                char_code: BASE_CODE.to_string(),
                name: "Российский рубль".to_string(),
                nominal: 1,
                value: BigDecimal::one(),
            },
        );

        Ok(Self { date, currencies })
    }

    /// Looks up a currency by code, case-insensitively.
    pub fn get(&self, code: &str) -> Option<&Currency> {
        self.currencies.get(&code.trim().to_uppercase())
    }

    /// Cross rate between two currencies via the base.
    pub fn cross_rate(&self, from: &str, to: &str) -> AppResult<BigDecimal> {
        let from_cur = self
            .get(from)
            .ok_or_else(|| AppError::UnknownCurrency(from.trim().to_uppercase()))?;
        let to_cur = self
            .get(to)
            .ok_or_else(|| AppError::UnknownCurrency(to.trim().to_uppercase()))?;
        Ok(from_cur.per_unit() / to_cur.per_unit())
    }

    /// Number of currencies, including the base.
    pub fn len(&self) -> usize {
        self.currencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.currencies.is_empty()
    }

    /// All currencies in code order.
    pub fn iter(&self) -> impl Iterator<Item = &Currency> {
        self.currencies.values()
    }

    /// One page of the currency list plus the total page count.
    ///
    /// `page` is clamped to the last page, so a pager that raced a table
    /// refresh still renders something sensible.
    pub fn page(&self, page: usize, per_page: usize) -> (Vec<&Currency>, usize, usize) {
        let total = self.currencies.len();
        let per_page = per_page.max(1);
        let total_pages = total.div_ceil(per_page).max(1);
        let current = page.min(total_pages - 1);
        let items = self
            .currencies
            .values()
            .skip(current * per_page)
            .take(per_page)
            .collect();
        (items, current, total_pages)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::str::FromStr;

    /// A small table used across the rates/convert/web tests.
    pub fn sample_table() -> RateTable {
        let entries = vec![
            Currency {
                char_code: "USD".to_string(),
                name: "Доллар США".to_string(),
                nominal: 1,
                value: BigDecimal::from_str("90.50").unwrap(),
            },
            Currency {
                char_code: "EUR".to_string(),
                name: "Евро".to_string(),
                nominal: 1,
                value: BigDecimal::from_str("98.00").unwrap(),
            },
            Currency {
                char_code: "CZK".to_string(),
                name: "Чешских крон".to_string(),
                nominal: 10,
                value: BigDecimal::from_str("39.00").unwrap(),
            },
        ];
        RateTable::new(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(), entries).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::sample_table;
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let table = sample_table();
        assert!(table.get("usd").is_some());
        assert!(table.get(" USD ").is_some());
        assert!(table.get("XXX").is_none());
    }

    #[test]
    fn test_base_entry_is_synthesized() {
        let table = sample_table();
        let rub = table.get("RUB").unwrap();
        assert_eq!(rub.nominal, 1);
        assert_eq!(rub.per_unit(), BigDecimal::one());
    }

    #[test]
    fn test_cross_rate_to_base() {
        let table = sample_table();
        let rate = table.cross_rate("USD", "RUB").unwrap();
        assert_eq!(rate, BigDecimal::from_str("90.50").unwrap());
    }

    #[test]
    fn test_cross_rate_respects_nominal() {
        let table = sample_table();
        // 10 CZK = 39 RUB, so 1 CZK = 3.9 RUB
        let rate = table.cross_rate("CZK", "RUB").unwrap();
        assert_eq!(rate, BigDecimal::from_str("3.9").unwrap());
    }

    #[test]
    fn test_cross_rate_same_currency_is_one() {
        let table = sample_table();
        let rate = table.cross_rate("EUR", "EUR").unwrap();
        assert_eq!(rate, BigDecimal::one());
    }

    #[test]
    fn test_cross_rate_unknown_currency() {
        let table = sample_table();
        let err = table.cross_rate("USD", "XYZ").unwrap_err();
        assert!(matches!(err, AppError::UnknownCurrency(code) if code == "XYZ"));
    }

    #[test]
    fn test_empty_feed_rejected() {
        let err = RateTable::new(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(), Vec::new()).unwrap_err();
        assert!(matches!(err, AppError::Feed(_)));
    }

    #[test]
    fn test_zero_value_rejected() {
        let entries = vec![Currency {
            char_code: "BAD".to_string(),
            name: "Bad".to_string(),
            nominal: 1,
            value: BigDecimal::zero(),
        }];
        let err = RateTable::new(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(), entries).unwrap_err();
        assert!(matches!(err, AppError::Feed(_)));
    }

    #[test]
    fn test_paging_clamps_page() {
        let table = sample_table(); // 4 currencies including RUB
        let (items, current, total_pages) = table.page(0, 3);
        assert_eq!(items.len(), 3);
        assert_eq!(current, 0);
        assert_eq!(total_pages, 2);

        // Way past the end clamps to the last page
        let (items, current, _) = table.page(99, 3);
        assert_eq!(current, 1);
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_iteration_is_sorted_by_code() {
        let table = sample_table();
        let codes: Vec<&str> = table.iter().map(|c| c.char_code.as_str()).collect();
        assert_eq!(codes, vec!["CZK", "EUR", "RUB", "USD"]);
    }
}
