//! Message rendering for the bot: rate lists, conversion results,
//! history pages. All output is MarkdownV2.

use chrono::{NaiveDate, NaiveDateTime};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::convert::Conversion;
use crate::core::config;
use crate::rates::table::{Currency, RateTable};
use crate::storage::db::ConversionRecord;

/// Characters MarkdownV2 requires to be escaped. Backslash goes first so
/// already-escaped text is not double-escaped into garbage.
const MARKDOWN_SPECIALS: &str = "\\_*[]()~`>#+-=|{}.!";

/// Escapes text for safe interpolation into a MarkdownV2 message.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if MARKDOWN_SPECIALS.contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Formats an SQLite timestamp (YYYY-MM-DD HH:MM:SS) for display.
fn format_timestamp(raw: &str) -> String {
    match NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        Ok(dt) => dt.format("%d.%m.%Y %H:%M").to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Navigation row for a paginated view: ⬅️ page-counter ➡️.
///
/// The counter button points at the current page, so tapping it is a no-op
/// the callback handler answers without redrawing.
fn nav_row(callback_prefix: &str, current: usize, total_pages: usize) -> Vec<InlineKeyboardButton> {
    let mut row = Vec::new();
    if current > 0 {
        row.push(InlineKeyboardButton::callback(
            "⬅️".to_string(),
            format!("{}:page:{}", callback_prefix, current - 1),
        ));
    }
    if total_pages > 1 {
        row.push(InlineKeyboardButton::callback(
            format!("{}/{}", current + 1, total_pages),
            format!("{}:page:{}", callback_prefix, current),
        ));
    }
    if current + 1 < total_pages {
        row.push(InlineKeyboardButton::callback(
            "➡️".to_string(),
            format!("{}:page:{}", callback_prefix, current + 1),
        ));
    }
    row
}

/// One page of the rate table with a pager keyboard.
pub fn rates_view(table: &RateTable, page: usize) -> (String, InlineKeyboardMarkup) {
    let (items, current, total_pages) =
        table.page(page, config::pagination::ITEMS_PER_PAGE);

    let mut text = format!(
        "💱 *Курсы валют на {}*\n_Страница {} из {}_\n\n",
        escape_markdown(&table.date.format("%d.%m.%Y").to_string()),
        current + 1,
        total_pages
    );
    for currency in items {
        text.push_str(&format!(
            "`{}` — {} ₽ за {} {}\n{}\n\n",
            currency.char_code,
            escape_markdown(&currency.value.to_string()),
            currency.nominal,
            currency.char_code,
            escape_markdown(&currency.name),
        ));
    }

    let mut rows = Vec::new();
    let nav = nav_row("rates", current, total_pages);
    if !nav.is_empty() {
        rows.push(nav);
    }
    (text, InlineKeyboardMarkup::new(rows))
}

/// Detailed view of a single currency.
pub fn rate_detail_view(currency: &Currency, date: NaiveDate) -> String {
    format!(
        "💱 *{}*\n{}\n\n{} {} \\= {} ₽\nНа {}",
        currency.char_code,
        escape_markdown(&currency.name),
        currency.nominal,
        currency.char_code,
        escape_markdown(&currency.value.to_string()),
        escape_markdown(&date.format("%d.%m.%Y").to_string()),
    )
}

/// Result of a conversion, fee spelled out.
pub fn conversion_view(conversion: &Conversion, date: NaiveDate) -> String {
    format!(
        "💱 *{} {} → {}*\n\n\
         Курс: {}\n\
         Сумма: {} {}\n\
         Комиссия \\({}%\\): {} {}\n\
         *Итого: {} {}*\n\n\
         _Курс ЦБ на {}_",
        escape_markdown(&conversion.amount.to_string()),
        conversion.from,
        conversion.to,
        escape_markdown(&conversion.rate.to_string()),
        escape_markdown(&conversion.gross.to_string()),
        conversion.to,
        escape_markdown(&conversion.commission_percent.to_string()),
        escape_markdown(&conversion.fee.to_string()),
        conversion.to,
        escape_markdown(&conversion.result.to_string()),
        conversion.to,
        escape_markdown(&date.format("%d.%m.%Y").to_string()),
    )
}

/// One page of conversion history with a pager keyboard.
///
/// `total` is the full history size; entries are the current page only.
pub fn history_view(
    entries: &[ConversionRecord],
    page: usize,
    total: i64,
) -> (String, InlineKeyboardMarkup) {
    let per_page = config::pagination::ITEMS_PER_PAGE;
    let total_pages = (total as usize).div_ceil(per_page).max(1);
    let current = page.min(total_pages - 1);

    let mut text = format!(
        "📒 *История конвертаций*\n_Страница {} из {}_\n\n",
        current + 1,
        total_pages
    );
    for (idx, entry) in entries.iter().enumerate() {
        text.push_str(&format!(
            "*{}*\\. {} {} → {} {}\n📅 {}\n\n",
            current * per_page + idx + 1,
            escape_markdown(&entry.amount),
            entry.from_code,
            escape_markdown(&entry.result),
            entry.to_code,
            escape_markdown(&format_timestamp(&entry.created_at)),
        ));
    }

    let mut rows = Vec::new();
    let nav = nav_row("history", current, total_pages);
    if !nav.is_empty() {
        rows.push(nav);
    }
    (text, InlineKeyboardMarkup::new(rows))
}
