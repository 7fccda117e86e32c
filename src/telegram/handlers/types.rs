//! Handler types and shared dependencies

use std::sync::Arc;

use teloxide::types::UserId;

use crate::core::rate_limiter::RateLimiter;
use crate::email::Mailer;
use crate::rates::RateCache;
use crate::storage::db::{self, DbPool};
use crate::telegram::dialogue::DialogueStore;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub db_pool: Arc<DbPool>,
    pub rates: Arc<RateCache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub mailer: Mailer,
    pub dialogues: Arc<DialogueStore>,
    pub bot_username: Option<String>,
    pub bot_id: UserId,
}

impl HandlerDeps {
    /// Fetches a connection, makes sure the sender exists as a user, and
    /// logs the raw request text. Failures are logged, not propagated: a
    /// broken audit trail must not break the bot.
    pub fn track_request(&self, chat_id: i64, username: Option<&str>, text: &str) {
        let conn = match crate::storage::db::get_connection(&self.db_pool) {
            Ok(c) => c,
            Err(e) => {
                log::error!("Failed to get DB connection: {}", e);
                return;
            }
        };
        if let Err(e) = db::create_user(&conn, chat_id, username) {
            log::error!("Failed to create user {}: {}", chat_id, e);
            return;
        }
        if let Err(e) = db::log_request(&conn, chat_id, text) {
            log::error!("Failed to log request: {}", e);
        }
    }
}
