//! Bot initialization and message routing utilities
//!
//! This module contains:
//! - Command enum definition
//! - Bot instance creation
//! - Message addressing logic (private chats, mentions, replies)

use reqwest::ClientBuilder;
use teloxide::prelude::*;
use teloxide::types::{ChatKind, Message, MessageEntityKind, UserId};
use teloxide::utils::command::BotCommands;

use crate::core::config;

/// Bot commands enum with descriptions
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Я умею:")]
pub enum Command {
    #[command(description = "приветствие и краткая справка")]
    Start,
    #[command(description = "привязать и подтвердить email")]
    Register,
    #[command(description = "курсы валют ЦБ на сегодня")]
    Rates,
    #[command(description = "курс одной валюты, например /rate USD")]
    Rate(String),
    #[command(description = "пошаговая конвертация валют")]
    Convert,
    #[command(description = "история конвертаций")]
    History,
    #[command(description = "отменить текущий диалог")]
    Cancel,
    #[command(description = "список команд")]
    Help,
}

/// Creates a Bot instance with custom or default API URL
pub fn create_bot() -> anyhow::Result<Bot> {
    // Check if local Bot API server is configured
    let bot = if let Ok(bot_api_url) = std::env::var("BOT_API_URL") {
        log::info!("Using custom Bot API URL: {}", bot_api_url);
        let url =
            url::Url::parse(&bot_api_url).map_err(|e| anyhow::anyhow!("Invalid BOT_API_URL: {}", e))?;
        Bot::from_env_with_client(ClientBuilder::new().timeout(config::network::timeout()).build()?)
            .set_api_url(url)
    } else {
        Bot::from_env_with_client(ClientBuilder::new().timeout(config::network::timeout()).build()?)
    };

    Ok(bot)
}

/// Registers the command list in the Telegram UI.
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    bot.set_my_commands(Command::bot_commands()).await?;
    Ok(())
}

/// Checks if a message is addressed to the bot.
///
/// Private chats always are; in groups the message must mention the bot
/// or reply to one of its messages.
pub fn is_message_addressed_to_bot(msg: &Message, bot_username: Option<&str>, bot_id: UserId) -> bool {
    if matches!(msg.chat.kind, ChatKind::Private(_)) {
        return true;
    }

    if let Some(reply_to) = msg.reply_to_message() {
        if reply_to.from.as_ref().is_some_and(|u| u.id == bot_id) {
            return true;
        }
    }

    let Some(username) = bot_username else {
        return false;
    };
    let Some(text) = msg.text() else {
        return false;
    };

    if let Some(entities) = msg.entities() {
        for entity in entities {
            if matches!(entity.kind, MessageEntityKind::Mention) {
                let Some(mention) = utf16_slice(text, entity.offset, entity.length) else {
                    continue;
                };
                let mention = mention.strip_prefix('@').unwrap_or(mention);
                if mention.eq_ignore_ascii_case(username) {
                    return true;
                }
            }
        }
    }

    text.contains(&format!("@{}", username))
}

/// Slices `text` by UTF-16 code-unit offsets, which is how Telegram
/// addresses entities. Indexing the Rust string with them directly would
/// split multi-byte characters whenever the text contains any.
fn utf16_slice(text: &str, offset: usize, length: usize) -> Option<&str> {
    let end_units = offset.checked_add(length)?;
    let mut start = None;
    let mut units = 0;
    for (byte_idx, c) in text.char_indices() {
        if units == offset {
            start = Some(byte_idx);
        }
        if units == end_units {
            return text.get(start?..byte_idx);
        }
        units += c.len_utf16();
    }
    if units == offset {
        start = Some(text.len());
    }
    if units == end_units {
        return text.get(start?..);
    }
    None
}
