//! Watcher (daemon) use case: run the crawl controller on a fixed cycle.
//!
//! Each cycle is a full crawl with its own artifact and watermark advance. New
//! messages are picked up by polling rather than by subscribing to updates.

use crate::domain::DomainError;
use crate::usecases::crawl_controller::{CrawlController, CrawlStats};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Watcher service. Loop: crawl -> log summary -> sleep.
pub struct Watcher {
    controller: Arc<CrawlController>,
    cycle_sleep: Duration,
}

impl Watcher {
    pub fn new(controller: Arc<CrawlController>, cycle_sleep: Duration) -> Self {
        Self {
            controller,
            cycle_sleep,
        }
    }

    /// Run forever. A failed cycle is logged and the loop continues.
    pub async fn run_loop(&self) -> Result<(), DomainError> {
        self.run_cycles(None).await.map(|_| ())
    }

    /// Run `max_cycles` cycles (forever when `None`). Returns the stats of every successful cycle.
    pub async fn run_cycles(&self, max_cycles: Option<usize>) -> Result<Vec<CrawlStats>, DomainError> {
        info!(cycle_secs = self.cycle_sleep.as_secs(), "watcher started");
        let mut completed = Vec::new();
        let mut cycle = 0usize;
        loop {
            cycle += 1;
            match self.controller.run().await {
                Ok(stats) => {
                    info!(cycle, records = stats.records, errors = stats.errors, "cycle complete");
                    completed.push(stats);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(cycle, error = %e, "crawl cycle failed"),
            }
            if max_cycles.is_some_and(|max| cycle >= max) {
                return Ok(completed);
            }
            info!(cycle_secs = self.cycle_sleep.as_secs(), "sleeping until next cycle");
            tokio::time::sleep(self.cycle_sleep).await;
        }
    }
}
