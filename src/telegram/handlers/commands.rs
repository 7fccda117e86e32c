//! Command handlers: /start, /register, /rates, /rate, /convert,
//! /history, /cancel, /help.

use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, ParseMode};
use teloxide::utils::command::BotCommands;

use super::types::{HandlerDeps, HandlerError};
use crate::core::config;
use crate::storage::db;
use crate::telegram::bot::Command;
use crate::telegram::dialogue::DialogueState;
use crate::telegram::views;

pub async fn handle_start_command(
    bot: &Bot,
    msg: &Message,
    _deps: &HandlerDeps,
) -> Result<(), HandlerError> {
    bot.send_message(
        msg.chat.id,
        "Привет! Я конвертирую валюты по курсу ЦБ.\n\n\
         /rates — курсы на сегодня\n\
         /rate USD — курс одной валюты\n\
         /convert — пошаговая конвертация\n\
         /register — подтвердить email (нужно для конвертаций)\n\
         /history — история конвертаций\n\n\
         Можно и одной строкой: «USD RUB 100».",
    )
    .await?;
    Ok(())
}

pub async fn handle_register_command(
    bot: &Bot,
    msg: &Message,
    deps: &HandlerDeps,
) -> Result<(), HandlerError> {
    let chat_id = msg.chat.id;

    let conn = db::get_connection(&deps.db_pool)?;
    let prompt = match db::get_user(&conn, chat_id.0)? {
        Some(user) if user.is_verified() => format!(
            "Сейчас привязан {}. Отправь новый email, чтобы заменить его, или /cancel.",
            user.email.as_deref().unwrap_or("email")
        ),
        _ => "Отправь свой email — я пришлю на него код подтверждения.".to_string(),
    };

    deps.dialogues.set(chat_id, DialogueState::RegisterAwaitingEmail);
    bot.send_message(chat_id, prompt).await?;
    Ok(())
}

pub async fn handle_rates_command(
    bot: &Bot,
    msg: &Message,
    deps: &HandlerDeps,
) -> Result<(), HandlerError> {
    match build_rates_page(deps, 0).await {
        Ok((text, keyboard)) => {
            bot.send_message(msg.chat.id, text)
                .parse_mode(ParseMode::MarkdownV2)
                .reply_markup(keyboard)
                .await?;
        }
        Err(e) => {
            log::error!("Failed to build rates page: {}", e);
            bot.send_message(msg.chat.id, "Курсы сейчас недоступны, попробуй позже.")
                .await?;
        }
    }
    Ok(())
}

pub async fn handle_rate_command(
    bot: &Bot,
    msg: &Message,
    deps: &HandlerDeps,
    code: &str,
) -> Result<(), HandlerError> {
    let code = code.trim();
    if code.is_empty() {
        bot.send_message(msg.chat.id, "Укажи код валюты: /rate USD").await?;
        return Ok(());
    }

    let table = match deps.rates.get_or_refresh().await {
        Ok(t) => t,
        Err(e) => {
            log::error!("Failed to get rate table: {}", e);
            bot.send_message(msg.chat.id, "Курсы сейчас недоступны, попробуй позже.")
                .await?;
            return Ok(());
        }
    };

    match table.get(code) {
        Some(currency) => {
            bot.send_message(msg.chat.id, views::rate_detail_view(currency, table.date))
                .parse_mode(ParseMode::MarkdownV2)
                .await?;
        }
        None => {
            bot.send_message(
                msg.chat.id,
                format!("Не знаю валюту «{}». Список кодов: /rates", code.to_uppercase()),
            )
            .await?;
        }
    }
    Ok(())
}

pub async fn handle_convert_command(
    bot: &Bot,
    msg: &Message,
    deps: &HandlerDeps,
) -> Result<(), HandlerError> {
    let chat_id = msg.chat.id;

    let conn = db::get_connection(&deps.db_pool)?;
    let verified = db::get_user(&conn, chat_id.0)?.is_some_and(|u| u.is_verified());
    if !verified {
        bot.send_message(
            chat_id,
            "Для конвертаций нужен подтверждённый email. Начни с /register.",
        )
        .await?;
        return Ok(());
    }

    deps.dialogues.set(chat_id, DialogueState::ConvertAwaitingSource);
    bot.send_message(chat_id, "Из какой валюты конвертируем? Например: USD")
        .await?;
    Ok(())
}

pub async fn handle_history_command(
    bot: &Bot,
    msg: &Message,
    deps: &HandlerDeps,
) -> Result<(), HandlerError> {
    match build_history_page(deps, msg.chat.id.0, 0)? {
        Some((text, keyboard)) => {
            bot.send_message(msg.chat.id, text)
                .parse_mode(ParseMode::MarkdownV2)
                .reply_markup(keyboard)
                .await?;
        }
        None => {
            bot.send_message(
                msg.chat.id,
                "История пуста. Попробуй /convert или отправь «USD RUB 100».",
            )
            .await?;
        }
    }
    Ok(())
}

pub async fn handle_cancel_command(
    bot: &Bot,
    msg: &Message,
    deps: &HandlerDeps,
) -> Result<(), HandlerError> {
    deps.dialogues.clear(msg.chat.id);
    bot.send_message(msg.chat.id, "Ок, отменил. Чем ещё помочь?").await?;
    Ok(())
}

pub async fn handle_help_command(bot: &Bot, msg: &Message) -> Result<(), HandlerError> {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

/// Renders one page of the rate list. Shared by the /rates command and
/// the pager callback.
pub async fn build_rates_page(
    deps: &HandlerDeps,
    page: usize,
) -> Result<(String, InlineKeyboardMarkup), HandlerError> {
    let table = deps.rates.get_or_refresh().await?;
    Ok(views::rates_view(&table, page))
}

/// Renders one page of the user's history, or `None` when it is empty.
pub fn build_history_page(
    deps: &HandlerDeps,
    user_id: i64,
    page: usize,
) -> Result<Option<(String, InlineKeyboardMarkup)>, HandlerError> {
    let conn = db::get_connection(&deps.db_pool)?;
    let total = db::count_conversions(&conn, user_id)?;
    if total == 0 {
        return Ok(None);
    }

    let per_page = config::pagination::ITEMS_PER_PAGE;
    let total_pages = (total as usize).div_ceil(per_page).max(1);
    let page = page.min(total_pages - 1);

    let entries = db::get_conversion_history(
        &conn,
        user_id,
        per_page as u32,
        (page * per_page) as u32,
    )?;
    Ok(Some(views::history_view(&entries, page, total)))
}
