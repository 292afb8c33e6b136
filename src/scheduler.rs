// Background catalog refresh scheduler: wakes on a fixed interval and
// refreshes sources whose last success has aged past the minimum interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogSource};
use crate::error::Result;

pub const DEFAULT_WAKE_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Wakes on a fixed interval and refreshes each configured source whose
/// last success is older than the minimum refresh interval. Refreshes run
/// sequentially, never concurrently, against the same `Catalog`.
pub struct RefreshScheduler {
    catalog: Arc<Catalog>,
    sources: Vec<Arc<dyn CatalogSource>>,
    wake_interval: Duration,
    min_interval: Duration,
    last_success: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RefreshScheduler {
    pub fn new(
        catalog: Arc<Catalog>,
        sources: Vec<Arc<dyn CatalogSource>>,
        wake_interval: Duration,
        min_interval: Duration,
    ) -> Self {
        Self {
            catalog,
            sources,
            wake_interval,
            min_interval,
            last_success: Mutex::new(HashMap::new()),
        }
    }

    /// Force a refresh of one named source, honoring `min_interval` unless
    /// `override_min_interval` is set.
    pub async fn force_refresh(&self, source_name: &str, override_min_interval: bool) -> Result<usize> {
        let Some(source) = self.sources.iter().find(|s| s.name() == source_name) else {
            return Err(crate::error::AggregatorError::DiscoveryFailed(format!(
                "unknown catalog source: {source_name}"
            )));
        };
        if !override_min_interval && !self.is_due(source_name).await {
            debug!(source = source_name, "refresh skipped, within minimum interval");
            return Ok(0);
        }
        self.refresh_one(source.as_ref()).await
    }

    async fn is_due(&self, source_name: &str) -> bool {
        let last_success = self.last_success.lock().await;
        match last_success.get(source_name) {
            Some(last) => Utc::now().signed_duration_since(*last).to_std().unwrap_or(Duration::ZERO) >= self.min_interval,
            None => true,
        }
    }

    async fn refresh_one(&self, source: &dyn CatalogSource) -> Result<usize> {
        let count = self.catalog.refresh(source).await?;
        let mut last_success = self.last_success.lock().await;
        last_success.insert(source.name().to_string(), Utc::now());
        info!(source = source.name(), entries = count, "catalog source refreshed");
        Ok(count)
    }

    async fn tick(&self) {
        for source in &self.sources {
            if !self.is_due(source.name()).await {
                continue;
            }
            if let Err(e) = self.refresh_one(source.as_ref()).await {
                warn!(source = source.name(), error = %e, "catalog refresh failed");
            }
        }
    }

    /// Spawn the long-lived wake loop. Dropping the returned handle does not
    /// stop the loop; abort it explicitly for a clean shutdown.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.wake_interval);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }
}
