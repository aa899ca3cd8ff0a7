//! Retrying, single-flight scrape of one clamd instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::collector::parser::parse_snapshot;
use crate::collector::session;
use crate::config::ScrapeConfig;
use crate::error::ScrapeError;
use crate::model::StatisticsSnapshot;

/// Collects statistics from one clamd instance.
///
/// Scrapes are serialized: concurrent callers wait for each other and each
/// gets its own fresh snapshot. Every attempt opens a new connection, and a
/// new connection is only opened once the previous one is closed, even when
/// the scrape that owned it was cancelled.
pub struct ClamdCollector {
    config: ScrapeConfig,
    scrape_lock: Mutex<()>,
    /// Held by the live session until its connection is dropped.
    connection_slot: Arc<Mutex<()>>,
    attempts: AtomicU64,
}

impl ClamdCollector {
    pub fn new(config: ScrapeConfig) -> Self {
        Self {
            config,
            scrape_lock: Mutex::new(()),
            connection_slot: Arc::new(Mutex::new(())),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Total session attempts made since creation.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Scrapes clamd, retrying immediately up to the configured count.
    ///
    /// Returns `None` when every attempt failed; failures are logged, not
    /// returned.
    pub async fn scrape(&self) -> Option<StatisticsSnapshot> {
        let _guard = self.scrape_lock.lock().await;
        let address = self.config.address();
        let retries = self.config.retries();

        for attempt in 0..=retries {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            match self.scrape_once().await {
                Ok(snapshot) => {
                    debug!(
                        %address,
                        attempt = attempt + 1,
                        pools = snapshot.pools.len(),
                        "scraped clamd"
                    );
                    return Some(snapshot);
                }
                Err(e) => {
                    error!(
                        %address,
                        attempt = attempt + 1,
                        retries = retries - attempt,
                        error = %e,
                        "failed to scrape clamd"
                    );
                }
            }
        }

        None
    }

    async fn scrape_once(&self) -> Result<StatisticsSnapshot, ScrapeError> {
        let permit = self.connection_slot.clone().lock_owned().await;
        let slots =
            session::open_with_permit(self.config.address(), self.config.timeout(), permit).await?;
        parse_snapshot(&slots)
    }
}
