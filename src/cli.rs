use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kursobot")]
#[command(author, version, about = "Telegram bot and HTTP API for currency exchange rates", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bot and the HTTP API
    Run {
        /// Use webhook mode instead of long polling
        #[arg(long)]
        webhook: bool,
    },

    /// Fetch the rates feed once and print the table
    FetchRates {
        /// Archive date in dd.mm.yyyy format; defaults to the current table
        #[arg(short, long)]
        date: Option<String>,

        /// Also print the per-unit value of each currency
        #[arg(short, long)]
        verbose: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
