//! Logging initialization and startup configuration diagnostics

use anyhow::Result;
use simplelog::{ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode, WriteLogger};
use std::fs::File;

use crate::core::config;

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;

    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Info, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs feed and SMTP configuration at application startup.
///
/// Email verification degrades to no-op mode without SMTP, so make the
/// operator aware of it before the first user hits /register.
pub fn log_startup_configuration() {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("Configuration check");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    log::info!("Rates feed URL: {}", &*config::RATES_FEED_URL);
    log::info!("Database path:  {}", &*config::DATABASE_PATH);
    log::info!("Web port:       {}", *config::WEB_PORT);
    log::info!("Commission:     {}%", &*config::fees::COMMISSION_PERCENT);

    let smtp_host = config::smtp::HOST.as_str();
    if smtp_host.is_empty() {
        log::warn!("SMTP_HOST not set - verification emails will be logged, not sent");
        log::warn!("Set SMTP_HOST / SMTP_PORT / SMTP_USERNAME / SMTP_PASSWORD / SMTP_FROM to enable delivery");
    } else {
        log::info!("SMTP relay:     {}:{}", smtp_host, *config::smtp::PORT);
        log::info!("SMTP from:      {}", &*config::smtp::FROM);
        if config::smtp::USERNAME.is_none() {
            log::warn!("SMTP_USERNAME not set - connecting without authentication");
        }
    }

    if config::BOT_TOKEN.is_empty() {
        log::error!("BOT_TOKEN is not set - the Telegram bot cannot start");
    }

    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
