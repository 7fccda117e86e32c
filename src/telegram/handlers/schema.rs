//! Dispatcher schema and handler chain builders

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::{MaybeInaccessibleMessage, Message, ParseMode};

use super::commands::{
    build_history_page, build_rates_page, handle_cancel_command, handle_convert_command,
    handle_help_command, handle_history_command, handle_rate_command, handle_rates_command,
    handle_register_command, handle_start_command,
};
use super::messages::handle_message;
use super::types::{HandlerDeps, HandlerError};
use crate::telegram::bot::{is_message_addressed_to_bot, Command};

/// Creates the main dispatcher schema for the Telegram bot.
///
/// The same handler tree is used in production and in tests.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    let deps_commands = deps.clone();
    let deps_messages = deps.clone();
    let deps_callback = deps;

    dptree::entry()
        .branch(command_handler(deps_commands))
        .branch(message_handler(deps_messages))
        .branch(callback_handler(deps_callback))
}

/// Handler for bot commands (/start, /register, /rates, ...)
fn command_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message().branch(dptree::entry().filter_command::<Command>().endpoint(
        move |bot: Bot, msg: Message, cmd: Command| {
            let deps = deps.clone();
            async move {
                log::info!("Received command: {:?} from chat {}", cmd, msg.chat.id);

                // Any command aborts a dialogue in progress
                deps.dialogues.clear(msg.chat.id);

                let username = msg.from.as_ref().and_then(|u| u.username.as_deref());
                deps.track_request(msg.chat.id.0, username, msg.text().unwrap_or_default());

                match cmd {
                    Command::Start => handle_start_command(&bot, &msg, &deps).await?,
                    Command::Register => handle_register_command(&bot, &msg, &deps).await?,
                    Command::Rates => handle_rates_command(&bot, &msg, &deps).await?,
                    Command::Rate(code) => handle_rate_command(&bot, &msg, &deps, &code).await?,
                    Command::Convert => handle_convert_command(&bot, &msg, &deps).await?,
                    Command::History => handle_history_command(&bot, &msg, &deps).await?,
                    Command::Cancel => handle_cancel_command(&bot, &msg, &deps).await?,
                    Command::Help => handle_help_command(&bot, &msg).await?,
                }
                Ok(())
            }
        },
    ))
}

/// Handler for regular messages (dialogue steps, one-shot conversions)
fn message_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    let bot_username = deps.bot_username.clone();
    let bot_id = deps.bot_id;

    Update::filter_message()
        .filter(move |msg: Message| is_message_addressed_to_bot(&msg, bot_username.as_deref(), bot_id))
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move {
                if let Err(e) = handle_message(bot, msg, deps).await {
                    log::error!("Error handling message: {:?}", e);
                }
                Ok(())
            }
        })
}

/// Handler for callback queries (pager buttons under rate and history lists)
fn callback_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_callback_query().endpoint(move |bot: Bot, q: CallbackQuery| {
        let deps = deps.clone();
        async move {
            let Some(data) = q.data.as_deref() else {
                bot.answer_callback_query(q.id).await?;
                return Ok(());
            };
            let Some(MaybeInaccessibleMessage::Regular(msg)) = q.message else {
                bot.answer_callback_query(q.id).await?;
                return Ok(());
            };

            // Callback data is "<view>:page:<n>"
            let mut parts = data.splitn(3, ':');
            let view = parts.next().unwrap_or_default();
            let action = parts.next().unwrap_or_default();
            let page: usize = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);

            if action != "page" {
                bot.answer_callback_query(q.id).await?;
                return Ok(());
            }

            let rendered = match view {
                "rates" => match build_rates_page(&deps, page).await {
                    Ok(page) => Some(page),
                    Err(e) => {
                        log::error!("Failed to render rates page {}: {}", page, e);
                        None
                    }
                },
                "history" => match build_history_page(&deps, msg.chat.id.0, page) {
                    Ok(page) => page,
                    Err(e) => {
                        log::error!("Failed to render history page {}: {}", page, e);
                        None
                    }
                },
                _ => None,
            };

            bot.answer_callback_query(q.id).await?;
            if let Some((text, keyboard)) = rendered {
                // Telegram rejects edits that change nothing; happens when
                // the no-op counter button is tapped. Ignore it.
                if let Err(e) = bot
                    .edit_message_text(msg.chat.id, msg.id, text)
                    .parse_mode(ParseMode::MarkdownV2)
                    .reply_markup(keyboard)
                    .await
                {
                    log::debug!("Pager edit skipped: {}", e);
                }
            }
            Ok(())
        }
    })
}
