//! In-memory cache for the daily rate table.
//!
//! The feed publishes once a day, so one shared table behind a `RwLock`
//! is all the caching this service needs. A failed refresh keeps serving
//! the previous table; only a never-loaded cache is a hard error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::core::error::{AppError, AppResult};
use crate::core::{config, metrics};
use crate::rates::feed;
use crate::rates::table::RateTable;

struct CachedTable {
    table: Arc<RateTable>,
    fetched_at: Instant,
}

/// Shared rate-table cache with TTL-based refresh.
pub struct RateCache {
    inner: RwLock<Option<CachedTable>>,
    feed_url: String,
    stale_after: Duration,
}

impl RateCache {
    pub fn new(feed_url: impl Into<String>) -> Self {
        Self::with_ttl(feed_url, config::rates::stale_after())
    }

    pub fn with_ttl(feed_url: impl Into<String>, stale_after: Duration) -> Self {
        Self {
            inner: RwLock::new(None),
            feed_url: feed_url.into(),
            stale_after,
        }
    }

    /// Returns the cached table regardless of freshness, if one was ever loaded.
    pub async fn current(&self) -> Option<Arc<RateTable>> {
        let guard = self.inner.read().await;
        guard.as_ref().map(|c| Arc::clone(&c.table))
    }

    /// Fetches the feed and replaces the cached table.
    pub async fn refresh(&self) -> AppResult<Arc<RateTable>> {
        let table = Arc::new(feed::fetch_rate_table(&self.feed_url, None).await?);
        metrics::RATES_LOADED.set(table.len() as i64);

        let mut guard = self.inner.write().await;
        *guard = Some(CachedTable {
            table: Arc::clone(&table),
            fetched_at: Instant::now(),
        });
        Ok(table)
    }

    /// Returns a fresh table, refreshing if the cached one is stale or missing.
    ///
    /// When the refresh fails but a stale table exists, the stale table is
    /// returned and the failure is logged.
    pub async fn get_or_refresh(&self) -> AppResult<Arc<RateTable>> {
        {
            let guard = self.inner.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.fetched_at.elapsed() < self.stale_after {
                    return Ok(Arc::clone(&cached.table));
                }
            }
        }

        match self.refresh().await {
            Ok(table) => Ok(table),
            Err(e) => {
                if let Some(stale) = self.current().await {
                    log::error!("Rates refresh failed, serving stale table from {}: {}", stale.date, e);
                    Ok(stale)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Installs a table directly, bypassing the feed. Used by tests and by
    /// the one-shot CLI fetch path.
    pub async fn prime(&self, table: RateTable) {
        metrics::RATES_LOADED.set(table.len() as i64);
        let mut guard = self.inner.write().await;
        *guard = Some(CachedTable {
            table: Arc::new(table),
            fetched_at: Instant::now(),
        });
    }

    /// Spawns the periodic background refresh.
    pub fn spawn_refresh_task(self: Arc<Self>, every: Duration) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match self.refresh().await {
                    Ok(table) => log::info!("Rate table refreshed ({} currencies, {})", table.len(), table.date),
                    Err(e) => log::error!("Background rate refresh failed: {}", e),
                }
            }
        });
    }

    /// Hard error used by callers that need a table right now.
    pub fn no_table_error() -> AppError {
        AppError::Feed("rate table not loaded yet".to_string())
    }
}
