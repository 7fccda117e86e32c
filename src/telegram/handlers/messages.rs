//! Free-form message handling: dialogue steps and one-shot conversions.

use once_cell::sync::Lazy;
use regex::Regex;
use teloxide::prelude::*;
use teloxide::types::ParseMode;

use super::types::{HandlerDeps, HandlerError};
use crate::convert;
use crate::core::metrics;
use crate::email;
use crate::storage::db::{self, VerificationOutcome};
use crate::telegram::dialogue::DialogueState;
use crate::telegram::views;

/// One-shot conversion request: "USD RUB 100" or "usd rub 12,5".
static ONE_SHOT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z]{3})\s+([A-Za-z]{3})\s+([0-9]+(?:[.,][0-9]+)?)$")
        .unwrap_or_else(|e| panic!("invalid one-shot regex: {}", e))
});

/// Routes a non-command text message through the chat's dialogue state.
pub async fn handle_message(bot: Bot, msg: Message, deps: HandlerDeps) -> Result<(), HandlerError> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let chat_id = msg.chat.id;
    let text = text.trim();

    metrics::MESSAGES_TOTAL.inc();
    let username = msg.from.as_ref().and_then(|u| u.username.as_deref());
    deps.track_request(chat_id.0, username, text);

    match deps.dialogues.take(chat_id) {
        DialogueState::RegisterAwaitingEmail => {
            handle_email_step(&bot, chat_id, &deps, text).await?;
        }
        DialogueState::RegisterAwaitingCode { email } => {
            handle_code_step(&bot, chat_id, &deps, &email, text).await?;
        }
        DialogueState::ConvertAwaitingSource => {
            handle_source_step(&bot, chat_id, &deps, text).await?;
        }
        DialogueState::ConvertAwaitingTarget { from } => {
            handle_target_step(&bot, chat_id, &deps, &from, text).await?;
        }
        DialogueState::ConvertAwaitingAmount { from, to } => {
            handle_amount_step(&bot, chat_id, &deps, &from, &to, text).await?;
        }
        DialogueState::Idle => {
            if let Some(caps) = ONE_SHOT_RE.captures(text) {
                run_conversion(&bot, chat_id, &deps, &caps[1], &caps[2], &caps[3]).await?;
            } else {
                bot.send_message(
                    chat_id,
                    "Не понял. Отправь «USD RUB 100» для конвертации или посмотри /help.",
                )
                .await?;
            }
        }
    }
    Ok(())
}

async fn handle_email_step(
    bot: &Bot,
    chat_id: ChatId,
    deps: &HandlerDeps,
    text: &str,
) -> Result<(), HandlerError> {
    if !email::looks_like_email(text) {
        deps.dialogues.set(chat_id, DialogueState::RegisterAwaitingEmail);
        bot.send_message(chat_id, "Это не похоже на email. Попробуй ещё раз или /cancel.")
            .await?;
        return Ok(());
    }

    let address = text.to_string();
    let code = email::generate_code();
    {
        let conn = db::get_connection(&deps.db_pool)?;
        db::set_user_email(&conn, chat_id.0, &address)?;
        db::save_verification_code(&conn, chat_id.0, &code)?;
    }

    if let Err(e) = deps.mailer.send_verification_code(&address, &code).await {
        log::error!("Failed to send verification code to {}: {}", address, e);
        deps.dialogues.set(chat_id, DialogueState::RegisterAwaitingEmail);
        bot.send_message(
            chat_id,
            "Не получилось отправить письмо. Проверь адрес и попробуй ещё раз.",
        )
        .await?;
        return Ok(());
    }

    deps.dialogues
        .set(chat_id, DialogueState::RegisterAwaitingCode { email: address.clone() });
    bot.send_message(
        chat_id,
        format!("Отправил код на {}. Пришли его сюда — код действует 15 минут.", address),
    )
    .await?;
    Ok(())
}

async fn handle_code_step(
    bot: &Bot,
    chat_id: ChatId,
    deps: &HandlerDeps,
    address: &str,
    text: &str,
) -> Result<(), HandlerError> {
    let outcome = {
        let conn = db::get_connection(&deps.db_pool)?;
        db::check_verification_code(&conn, chat_id.0, text)?
    };

    match outcome {
        VerificationOutcome::Verified => {
            bot.send_message(
                chat_id,
                format!("✅ Email {} подтверждён. Теперь можно конвертировать: /convert", address),
            )
            .await?;
        }
        VerificationOutcome::WrongCode { remaining } => {
            deps.dialogues.set(
                chat_id,
                DialogueState::RegisterAwaitingCode {
                    email: address.to_string(),
                },
            );
            bot.send_message(
                chat_id,
                format!("Неверный код. Осталось попыток: {}.", remaining),
            )
            .await?;
        }
        VerificationOutcome::Expired => {
            bot.send_message(chat_id, "Код больше не действует. Начни заново: /register")
                .await?;
        }
        VerificationOutcome::NotFound => {
            bot.send_message(chat_id, "Не вижу активного кода. Начни с /register.")
                .await?;
        }
    }
    Ok(())
}

async fn handle_source_step(
    bot: &Bot,
    chat_id: ChatId,
    deps: &HandlerDeps,
    text: &str,
) -> Result<(), HandlerError> {
    let Some(code) = known_currency(deps, text).await? else {
        deps.dialogues.set(chat_id, DialogueState::ConvertAwaitingSource);
        bot.send_message(
            chat_id,
            format!("Не знаю валюту «{}». Список кодов: /rates", text.to_uppercase()),
        )
        .await?;
        return Ok(());
    };

    deps.dialogues
        .set(chat_id, DialogueState::ConvertAwaitingTarget { from: code.clone() });
    bot.send_message(chat_id, format!("{} — понял. В какую валюту?", code))
        .await?;
    Ok(())
}

async fn handle_target_step(
    bot: &Bot,
    chat_id: ChatId,
    deps: &HandlerDeps,
    from: &str,
    text: &str,
) -> Result<(), HandlerError> {
    let Some(code) = known_currency(deps, text).await? else {
        deps.dialogues.set(
            chat_id,
            DialogueState::ConvertAwaitingTarget {
                from: from.to_string(),
            },
        );
        bot.send_message(
            chat_id,
            format!("Не знаю валюту «{}». Список кодов: /rates", text.to_uppercase()),
        )
        .await?;
        return Ok(());
    };

    deps.dialogues.set(
        chat_id,
        DialogueState::ConvertAwaitingAmount {
            from: from.to_string(),
            to: code.clone(),
        },
    );
    bot.send_message(chat_id, format!("{} → {}. Сколько конвертируем?", from, code))
        .await?;
    Ok(())
}

async fn handle_amount_step(
    bot: &Bot,
    chat_id: ChatId,
    deps: &HandlerDeps,
    from: &str,
    to: &str,
    text: &str,
) -> Result<(), HandlerError> {
    if convert::parse_amount(text).is_err() {
        deps.dialogues.set(
            chat_id,
            DialogueState::ConvertAwaitingAmount {
                from: from.to_string(),
                to: to.to_string(),
            },
        );
        bot.send_message(chat_id, "Нужно положительное число, например 100 или 12,5.")
            .await?;
        return Ok(());
    }
    run_conversion(bot, chat_id, deps, from, to, text).await
}

/// Resolves a user-typed currency code against the current table.
async fn known_currency(deps: &HandlerDeps, text: &str) -> Result<Option<String>, HandlerError> {
    let table = deps.rates.get_or_refresh().await?;
    Ok(table.get(text).map(|c| c.char_code.clone()))
}

/// Performs a conversion end to end: verification check, cooldown, math,
/// history write, reply.
async fn run_conversion(
    bot: &Bot,
    chat_id: ChatId,
    deps: &HandlerDeps,
    from: &str,
    to: &str,
    amount_text: &str,
) -> Result<(), HandlerError> {
    let verified = {
        let conn = db::get_connection(&deps.db_pool)?;
        db::get_user(&conn, chat_id.0)?.is_some_and(|u| u.is_verified())
    };
    if !verified {
        bot.send_message(
            chat_id,
            "Для конвертаций нужен подтверждённый email. Начни с /register.",
        )
        .await?;
        return Ok(());
    }

    if deps.rate_limiter.is_rate_limited(chat_id).await {
        let wait = deps
            .rate_limiter
            .get_remaining_time(chat_id)
            .await
            .map(|d| d.as_secs().max(1))
            .unwrap_or(1);
        bot.send_message(chat_id, format!("Не так быстро — подожди {} сек.", wait))
            .await?;
        return Ok(());
    }

    let table = match deps.rates.get_or_refresh().await {
        Ok(t) => t,
        Err(e) => {
            log::error!("Failed to get rate table: {}", e);
            bot.send_message(chat_id, "Курсы сейчас недоступны, попробуй позже.")
                .await?;
            return Ok(());
        }
    };

    let amount = match convert::parse_amount(amount_text) {
        Ok(a) => a,
        Err(_) => {
            bot.send_message(chat_id, "Нужно положительное число, например 100 или 12,5.")
                .await?;
            return Ok(());
        }
    };

    let conversion = match convert::convert(&table, from, to, &amount, &convert::commission_percent()) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("Conversion {} {} -> {} failed: {}", amount_text, from, to, e);
            bot.send_message(chat_id, format!("Не получилось: {}", e)).await?;
            return Ok(());
        }
    };

    {
        let conn = db::get_connection(&deps.db_pool)?;
        db::save_conversion(
            &conn,
            chat_id.0,
            &conversion.from,
            &conversion.to,
            &conversion.amount.to_string(),
            &conversion.rate.to_string(),
            &conversion.fee.to_string(),
            &conversion.result.to_string(),
        )?;
    }
    deps.rate_limiter.update_rate_limit(chat_id).await;
    metrics::CONVERSIONS_TOTAL.inc();

    bot.send_message(chat_id, views::conversion_view(&conversion, table.date))
        .parse_mode(ParseMode::MarkdownV2)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot_regex() {
        assert!(ONE_SHOT_RE.is_match("USD RUB 100"));
        assert!(ONE_SHOT_RE.is_match("usd rub 12,5"));
        assert!(ONE_SHOT_RE.is_match("EUR  CZK   0.5"));
        assert!(!ONE_SHOT_RE.is_match("USD RUB"));
        assert!(!ONE_SHOT_RE.is_match("USD RUB ten"));
        assert!(!ONE_SHOT_RE.is_match("convert USD RUB 100"));
        assert!(!ONE_SHOT_RE.is_match("USDT RUB 100"));
    }

    #[test]
    fn test_one_shot_regex_captures() {
        let caps = ONE_SHOT_RE.captures("usd rub 12,5").unwrap();
        assert_eq!(&caps[1], "usd");
        assert_eq!(&caps[2], "rub");
        assert_eq!(&caps[3], "12,5");
    }
}
