use anyhow::Result;
use chrono::NaiveDate;
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use tokio::signal;
use tokio::time::sleep;

use kursobot::cli::{Cli, Commands};
use kursobot::core::{config, init_logger, log_startup_configuration, metrics, rate_limiter::RateLimiter};
use kursobot::email::Mailer;
use kursobot::rates::{feed, RateCache};
use kursobot::storage::create_pool;
use kursobot::telegram::{create_bot, schema, setup_bot_commands, DialogueStore, HandlerDeps};
use kursobot::web::{start_web_server, WebState};

/// Main entry point: parses CLI arguments and dispatches to a subcommand.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Global panic handler: log panics from spawned tasks instead of
    // dying silently
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    // Initialize logger (console + file)
    init_logger(&config::LOG_FILE_PATH)?;

    // Load environment variables from .env if present
    let _ = dotenv();

    match cli.command {
        Some(Commands::Run { webhook }) => {
            log::info!("Running bot (webhook: {})", webhook);
            run_bot(webhook).await
        }
        Some(Commands::FetchRates { date, verbose }) => run_fetch_rates(date, verbose).await,
        None => {
            log::info!("No command specified, running bot in default mode");
            run_bot(false).await
        }
    }
}

/// One-shot feed fetch; prints the table and exits.
async fn run_fetch_rates(date: Option<String>, verbose: bool) -> Result<()> {
    let date = match date {
        Some(raw) => Some(
            NaiveDate::parse_from_str(&raw, "%d.%m.%Y")
                .map_err(|e| anyhow::anyhow!("Invalid date {:?} (expected dd.mm.yyyy): {}", raw, e))?,
        ),
        None => None,
    };

    let table = feed::fetch_rate_table(&config::RATES_FEED_URL, date).await?;
    println!("Rate table for {} ({} currencies)", table.date, table.len());
    for currency in table.iter() {
        if verbose {
            println!(
                "{:<5} {:>12} / {:<6} (per unit: {})  {}",
                currency.char_code,
                currency.value.to_string(),
                currency.nominal,
                currency.per_unit().with_scale_round(6, bigdecimal::RoundingMode::HalfUp),
                currency.name
            );
        } else {
            println!(
                "{:<5} {:>12} / {:<6} {}",
                currency.char_code,
                currency.value.to_string(),
                currency.nominal,
                currency.name
            );
        }
    }
    Ok(())
}

/// Runs the bot, the HTTP API, and the background refresh tasks.
async fn run_bot(use_webhook: bool) -> Result<()> {
    log::info!("Starting bot...");

    // Initialize metrics registry
    metrics::init_metrics();

    // Log feed/SMTP configuration at startup
    log_startup_configuration();

    // Create bot instance
    let bot = create_bot()?;

    // Get bot information to check mentions.
    // Retry while the Bot API is still coming up.
    let bot_info = {
        let startup_max_retries = 60;
        let mut startup_retry = 0;
        loop {
            match bot.get_me().await {
                Ok(info) => break info,
                Err(e) => {
                    let err_str = e.to_string();
                    let is_retryable = err_str.contains("restart")
                        || err_str.contains("network")
                        || err_str.contains("connection")
                        || err_str.contains("timed out")
                        || err_str.contains("Connection refused");

                    startup_retry += 1;
                    if startup_retry >= startup_max_retries || !is_retryable {
                        return Err(anyhow::anyhow!(
                            "Failed to connect to Bot API after {} retries: {}",
                            startup_retry,
                            e
                        ));
                    }

                    log::warn!(
                        "Bot API not ready (attempt {}/{}): {}. Retrying in 5 seconds...",
                        startup_retry,
                        startup_max_retries,
                        err_str
                    );
                    sleep(Duration::from_secs(5)).await;
                }
            }
        }
    };
    let bot_username = bot_info.username.clone();
    let bot_id = bot_info.id;
    log::info!("Bot username: {:?}, Bot ID: {}", bot_username, bot_id);

    // Register the command list in the Telegram UI
    setup_bot_commands(&bot).await?;

    // Create database connection pool
    let db_pool = Arc::new(
        create_pool(&config::DATABASE_PATH)
            .map_err(|e| anyhow::anyhow!("Failed to create database pool: {}", e))?,
    );

    // Mailer (no-op mode when SMTP is not configured)
    let mailer = Mailer::from_config()?;

    // Rate cache: fill it now so the first user does not wait for a fetch,
    // then keep it fresh in the background
    let rates = Arc::new(RateCache::new(config::RATES_FEED_URL.clone()));
    match rates.refresh().await {
        Ok(table) => log::info!("Initial rate table loaded ({} currencies, {})", table.len(), table.date),
        Err(e) => log::warn!("Initial rates fetch failed: {}. Will retry in the background.", e),
    }
    Arc::clone(&rates).spawn_refresh_task(config::rates::refresh_interval());

    // Per-chat conversion cooldown with periodic cleanup of idle entries
    let rate_limiter = Arc::new(RateLimiter::new());
    Arc::clone(&rate_limiter).spawn_cleanup_task(Duration::from_secs(300));

    let dialogues = Arc::new(DialogueStore::new());

    // Start the HTTP API
    {
        let web_state = WebState {
            db: Arc::clone(&db_pool),
            rates: Arc::clone(&rates),
            mailer: mailer.clone(),
        };
        let web_port = *config::WEB_PORT;
        tokio::spawn(async move {
            if let Err(e) = start_web_server(web_port, web_state).await {
                log::error!("Web server error: {}", e);
            }
        });
    }

    // Create handler dependencies for the modular schema
    let handler_deps = HandlerDeps {
        db_pool: Arc::clone(&db_pool),
        rates: Arc::clone(&rates),
        rate_limiter: Arc::clone(&rate_limiter),
        mailer,
        dialogues,
        bot_username,
        bot_id,
    };

    // Create the dispatcher handler tree using the modular schema
    let handler = schema(handler_deps);

    let webhook_url = if use_webhook { config::WEBHOOK_URL.clone() } else { None };

    if let Some(url) = webhook_url {
        // Webhook mode
        log::info!("Starting bot in webhook mode at {}", url);

        // Delete existing webhook to ensure clean state
        let _ = bot.delete_webhook().await;
        bot.set_webhook(url::Url::parse(&url)?).await?;
        log::warn!("Webhook URL set to {}, but updates are still consumed via polling infrastructure.", url);
        log::warn!("Run without --webhook unless an update-receiving endpoint is deployed.");

        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Shutting down gracefully...");
                bot.delete_webhook().await?;
            },
        }
    } else {
        // Long polling mode (default)
        log::info!("Starting bot in long polling mode");

        let mut retry_count = 0;
        let max_retries = config::retry::MAX_DISPATCHER_RETRIES;

        // Run the dispatcher with retry logic
        loop {
            let bot_clone = bot.clone();
            let handler_clone = handler.clone();

            // Run the dispatcher in a separate task so a panic inside it
            // surfaces through the JoinHandle instead of killing the process
            let handle = tokio::spawn(async move {
                use teloxide::update_listeners::Polling;

                let listener = Polling::builder(bot_clone.clone()).drop_pending_updates().build();

                Dispatcher::builder(bot_clone, handler_clone)
                    .dependencies(DependencyMap::new())
                    .enable_ctrlc_handler()
                    .build()
                    .dispatch_with_listener(
                        listener,
                        LoggingErrorHandler::with_custom_text("An error from the update listener"),
                    )
                    .await
            });

            match handle.await {
                Ok(()) => {
                    log::info!("Dispatcher shutdown gracefully");
                    break;
                }
                Err(join_err) => {
                    if join_err.is_panic() {
                        log::error!("Dispatcher panicked: {}", join_err);

                        if retry_count < max_retries {
                            retry_count += 1;
                            log::info!(
                                "Retrying dispatcher connection after panic (attempt {}/{})...",
                                retry_count,
                                max_retries
                            );
                            exponential_backoff(retry_count).await;
                        } else {
                            log::error!("Max retries reached after panic. Exiting...");
                            break;
                        }
                    } else {
                        log::warn!("Dispatcher task was cancelled: {}", join_err);
                        break;
                    }
                }
            }

            if retry_count > 0 {
                sleep(config::retry::dispatcher_delay()).await;
            }
        }
    }

    Ok(())
}

/// Sleeps for base^retry_count seconds between dispatcher restarts.
async fn exponential_backoff(retry_count: u32) {
    let delay = config::retry::EXPONENTIAL_BACKOFF_BASE.saturating_pow(retry_count);
    log::info!("Waiting {}s before reconnecting...", delay);
    sleep(Duration::from_secs(delay)).await;
}
