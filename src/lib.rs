//! Kursobot - Telegram bot and HTTP API for currency exchange rates
//!
//! The bot converts amounts between currencies using the central bank's
//! daily feed, charges a configurable commission, and keeps a per-user
//! conversion history. Users confirm an email address before converting;
//! the same accounts and history are reachable over the HTTP API.
//!
//! # Module Structure
//!
//! - `core`: Core utilities, configuration, errors, and metrics
//! - `rates`: Feed fetching, rate table, and cross-rate math
//! - `convert`: Conversion engine with commission handling
//! - `storage`: Database operations (users, codes, history)
//! - `email`: Verification code delivery over SMTP
//! - `telegram`: Telegram bot integration and handlers
//! - `web`: HTTP API mirroring the bot's functionality

pub mod cli;
pub mod convert;
pub mod core;
pub mod email;
pub mod rates;
pub mod storage;
pub mod telegram;
pub mod web;

// Re-export commonly used types for convenience
pub use core::{config, AppError, AppResult};
pub use rates::{RateCache, RateTable};
pub use storage::{create_pool, get_connection, DbConnection, DbPool};
pub use telegram::{create_bot, schema, HandlerDeps};
