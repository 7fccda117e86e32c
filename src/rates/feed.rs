//! Fetching and parsing the central-bank daily feed.
//!
//! The feed is the CBR `XML_daily.asp` document:
//!
//! ```xml
//! <ValCurs Date="02.03.2026" name="Foreign Currency Market">
//!   <Valute ID="R01235">
//!     <NumCode>840</NumCode>
//!     <CharCode>USD</CharCode>
//!     <Nominal>1</Nominal>
//!     <Name>Доллар США</Name>
//!     <Value>90,5012</Value>
//!   </Valute>
//!   ...
//! </ValCurs>
//! ```
//!
//! Values use a decimal comma. A malformed `<Valute>` is skipped with a
//! warning; an entirely empty document is an error.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;

use crate::core::error::{AppError, AppResult};
use crate::core::{config, metrics};
use crate::rates::table::{Currency, RateTable};

/// Date format used by the feed, both in the `Date` attribute and in the
/// `date_req` query parameter.
const FEED_DATE_FORMAT: &str = "%d.%m.%Y";

/// Parses a feed document into a [`RateTable`].
pub fn parse_rate_table(xml: &str) -> AppResult<RateTable> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| AppError::Feed(format!("invalid XML: {}", e)))?;

    let root = doc.root_element();
    if root.tag_name().name() != "ValCurs" {
        return Err(AppError::Feed(format!(
            "unexpected root element <{}>",
            root.tag_name().name()
        )));
    }

    let date_attr = root
        .attribute("Date")
        .ok_or_else(|| AppError::Feed("missing Date attribute".to_string()))?;
    let date = NaiveDate::parse_from_str(date_attr, FEED_DATE_FORMAT)
        .map_err(|e| AppError::Feed(format!("bad feed date {:?}: {}", date_attr, e)))?;

    let mut entries = Vec::new();
    for valute in root.children().filter(|n| n.has_tag_name("Valute")) {
        match parse_valute(&valute) {
            Ok(currency) => entries.push(currency),
            Err(e) => log::warn!("Skipping malformed feed entry: {}", e),
        }
    }

    RateTable::new(date, entries)
}

fn parse_valute(node: &roxmltree::Node) -> AppResult<Currency> {
    let child_text = |name: &str| -> AppResult<String> {
        node.children()
            .find(|n| n.has_tag_name(name))
            .and_then(|n| n.text())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Feed(format!("missing <{}>", name)))
    };

    let char_code = child_text("CharCode")?.to_uppercase();
    let name = child_text("Name")?;
    let nominal: u32 = child_text("Nominal")?
        .parse()
        .map_err(|e| AppError::Feed(format!("{}: bad nominal: {}", char_code, e)))?;
    let value = parse_decimal_comma(&child_text("Value")?)
        .map_err(|e| AppError::Feed(format!("{}: bad value: {}", char_code, e)))?;

    Ok(Currency {
        char_code,
        name,
        nominal,
        value,
    })
}

/// Parses a number that may use a decimal comma ("90,5012").
pub fn parse_decimal_comma(text: &str) -> Result<BigDecimal, bigdecimal::ParseBigDecimalError> {
    BigDecimal::from_str(&text.trim().replace(',', "."))
}

/// Fetches and parses the daily feed.
///
/// `date` requests a specific archive day; `None` fetches the current table.
pub async fn fetch_rate_table(url: &str, date: Option<NaiveDate>) -> AppResult<RateTable> {
    metrics::RATE_FETCHES_TOTAL.inc();

    let result = fetch_inner(url, date).await;
    if result.is_err() {
        metrics::RATE_FETCH_FAILURES_TOTAL.inc();
    }
    result
}

async fn fetch_inner(url: &str, date: Option<NaiveDate>) -> AppResult<RateTable> {
    let client = reqwest::Client::builder()
        .timeout(config::rates::fetch_timeout())
        .build()?;

    let mut request = client.get(url);
    if let Some(date) = date {
        // The archive endpoint takes dd/mm/yyyy
        request = request.query(&[("date_req", date.format("%d/%m/%Y").to_string())]);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(AppError::HttpStatus(response.status()));
    }

    // .text() respects the charset header; the feed is windows-1251.
    let body = response.text().await?;
    let table = parse_rate_table(&body)?;
    log::info!("Fetched rate table for {} ({} currencies)", table.date, table.len());
    Ok(table)
}
