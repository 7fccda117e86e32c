use std::collections::HashMap;
use std::sync::Arc;
use teloxide::types::ChatId;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::core::config;

/// Per-chat cooldown between conversions.
///
/// Keeps a timestamp of when each chat may convert again. Entries for idle
/// chats are dropped by a periodic cleanup task.
#[derive(Clone)]
pub struct RateLimiter {
    limits: Arc<Mutex<HashMap<ChatId, Instant>>>,
    cooldown: Duration,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_cooldown(config::cooldown::duration())
    }

    pub fn with_cooldown(cooldown: Duration) -> Self {
        Self {
            limits: Arc::new(Mutex::new(HashMap::new())),
            cooldown,
        }
    }

    /// Returns `true` if the chat must still wait before the next conversion.
    pub async fn is_rate_limited(&self, chat_id: ChatId) -> bool {
        let limits = self.limits.lock().await;
        if let Some(&until) = limits.get(&chat_id) {
            if Instant::now() < until {
                return true;
            }
        }
        false
    }

    /// Remaining wait time for the chat, if any.
    pub async fn get_remaining_time(&self, chat_id: ChatId) -> Option<Duration> {
        let limits = self.limits.lock().await;
        if let Some(&until) = limits.get(&chat_id) {
            let now = Instant::now();
            if now < until {
                return Some(until - now);
            }
        }
        None
    }

    /// Starts a new cooldown period for the chat. Call after a successful conversion.
    pub async fn update_rate_limit(&self, chat_id: ChatId) {
        let mut limits = self.limits.lock().await;
        limits.insert(chat_id, Instant::now() + self.cooldown);
    }

    /// Removes the cooldown for a chat.
    pub async fn remove_rate_limit(&self, chat_id: ChatId) {
        let mut limits = self.limits.lock().await;
        limits.remove(&chat_id);
    }

    /// Spawns a periodic task that drops expired entries.
    pub fn spawn_cleanup_task(self: Arc<Self>, every: Duration) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let now = Instant::now();
                let mut limits = self.limits.lock().await;
                limits.retain(|_, &mut until| until > now);
            }
        });
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
