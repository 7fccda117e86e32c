use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: kursobot.sqlite
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "kursobot.sqlite".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: kursobot.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "kursobot.log".to_string()));

/// Central-bank daily rates feed URL (CBR XML_daily format).
/// Read from RATES_FEED_URL environment variable.
/// Override in tests to point at a local mock server.
pub static RATES_FEED_URL: Lazy<String> = Lazy::new(|| {
    env::var("RATES_FEED_URL").unwrap_or_else(|_| "https://www.cbr.ru/scripts/XML_daily.asp".to_string())
});

/// HTTP API port
/// Read from WEB_PORT environment variable
/// Default: 3000
pub static WEB_PORT: Lazy<u16> = Lazy::new(|| {
    env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// Webhook URL for Telegram updates
/// Read from WEBHOOK_URL environment variable
pub static WEBHOOK_URL: Lazy<Option<String>> = Lazy::new(|| env::var("WEBHOOK_URL").ok());

/// SMTP configuration for verification emails
pub mod smtp {
    use super::*;

    /// SMTP relay host. Empty string means the mailer runs in no-op mode
    /// (codes are logged instead of sent) — useful for development.
    pub static HOST: Lazy<String> = Lazy::new(|| env::var("SMTP_HOST").unwrap_or_else(|_| String::new()));

    /// SMTP relay port
    pub static PORT: Lazy<u16> = Lazy::new(|| {
        env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(587)
    });

    pub static USERNAME: Lazy<Option<String>> = Lazy::new(|| env::var("SMTP_USERNAME").ok());
    pub static PASSWORD: Lazy<Option<String>> = Lazy::new(|| env::var("SMTP_PASSWORD").ok());

    /// From address for verification emails
    pub static FROM: Lazy<String> =
        Lazy::new(|| env::var("SMTP_FROM").unwrap_or_else(|_| "kursobot <noreply@kursobot.local>".to_string()));
}

/// Rates feed refresh configuration
pub mod rates {
    use super::Duration;

    /// Interval between background feed refreshes (in seconds)
    /// The CBR feed changes once per day; an hourly pull is already generous.
    pub const REFRESH_INTERVAL_SECS: u64 = 60 * 60;

    /// Age after which a cached table is considered stale (in seconds)
    pub const STALE_AFTER_SECS: u64 = 26 * 60 * 60;

    /// HTTP timeout for feed fetches (in seconds)
    pub const FETCH_TIMEOUT_SECS: u64 = 30;

    pub fn refresh_interval() -> Duration {
        Duration::from_secs(REFRESH_INTERVAL_SECS)
    }

    pub fn stale_after() -> Duration {
        Duration::from_secs(STALE_AFTER_SECS)
    }

    pub fn fetch_timeout() -> Duration {
        Duration::from_secs(FETCH_TIMEOUT_SECS)
    }
}

/// Conversion fee configuration
pub mod fees {
    use super::*;

    /// Commission applied to every conversion, in percent.
    /// Read from COMMISSION_PERCENT environment variable, default 2.
    pub static COMMISSION_PERCENT: Lazy<String> =
        Lazy::new(|| env::var("COMMISSION_PERCENT").unwrap_or_else(|_| "2".to_string()));
}

/// Email verification configuration
pub mod verification {
    /// Verification code lifetime (in minutes)
    pub const CODE_TTL_MINUTES: i64 = 15;

    /// Maximum wrong-code attempts before the code is invalidated
    pub const MAX_ATTEMPTS: u32 = 5;
}

/// Pagination for currency lists and history views
pub mod pagination {
    /// Entries per page in bot history and rate list views
    pub const ITEMS_PER_PAGE: usize = 5;

    /// Default page size for the HTTP API
    pub const DEFAULT_PER_PAGE: usize = 20;

    /// Hard cap on per_page from the HTTP API
    pub const MAX_PER_PAGE: usize = 100;
}

/// Per-chat cooldown between conversions
pub mod cooldown {
    use super::Duration;

    /// Seconds a chat must wait between two conversions
    pub const CONVERSION_COOLDOWN_SECS: u64 = 3;

    pub fn duration() -> Duration {
        Duration::from_secs(CONVERSION_COOLDOWN_SECS)
    }
}

/// Retry configuration for the dispatcher loop
pub mod retry {
    use super::Duration;

    /// Maximum number of retries for dispatcher reconnection
    pub const MAX_DISPATCHER_RETRIES: u32 = 5;

    /// Delay between dispatcher retry attempts (in seconds)
    pub const DISPATCHER_RETRY_DELAY_SECS: u64 = 5;

    /// Base for exponential backoff calculation
    pub const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

    pub fn dispatcher_delay() -> Duration {
        Duration::from_secs(DISPATCHER_RETRY_DELAY_SECS)
    }
}

/// Network configuration
pub mod network {
    use super::Duration;

    /// Timeout for Telegram Bot API requests (in seconds)
    pub const TELEGRAM_TIMEOUT_SECS: u64 = 60;

    pub fn timeout() -> Duration {
        Duration::from_secs(TELEGRAM_TIMEOUT_SECS)
    }
}
