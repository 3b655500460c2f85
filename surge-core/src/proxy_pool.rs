//! Upstream proxy registry with rotation and health bookkeeping
//!
//! Entries live in insertion order behind a single pool-wide lock, so a
//! selection's read of the oldest `last_used` and its stamp happen in one
//! critical section, as do the counter and running-mean updates.

use crate::error::{LoadError, LoadResult};
use crate::traits::HttpTransport;
use crate::types::{OutboundRequest, RotationStrategy, RATE_LIMIT_STATUS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Bookkeeping for one upstream proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyEntry {
    pub url: String,
    /// `None` sorts before any timestamp, i.e. never used
    pub last_used: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub fail_count: u64,
    pub last_status_code: u16,
    /// Running mean in seconds
    pub average_response_time: f64,
}

impl ProxyEntry {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            last_used: None,
            success_count: 0,
            fail_count: 0,
            last_status_code: 0,
            average_response_time: 0.0,
        }
    }

    fn record_success(&mut self, status_code: u16, elapsed: Duration) {
        let n = self.success_count as f64;
        self.average_response_time =
            (self.average_response_time * n + elapsed.as_secs_f64()) / (n + 1.0);
        self.success_count += 1;
        self.last_status_code = status_code;
    }

    fn record_failure(&mut self, status_code: u16) {
        self.fail_count += 1;
        self.last_status_code = status_code;
    }
}

/// Pool behaviour knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyPoolSettings {
    /// Target fetched through a proxy by `health_check`
    pub probe_url: String,
    /// `fail_count` at which a proxy counts as rate limited
    pub rate_limit_threshold: u64,
    pub rate_limit_status: u16,
}

impl Default for ProxyPoolSettings {
    fn default() -> Self {
        Self {
            probe_url: "http://example.com".to_string(),
            rate_limit_threshold: 3,
            rate_limit_status: RATE_LIMIT_STATUS,
        }
    }
}

/// Shared registry of upstream proxies
pub struct ProxyPool {
    entries: RwLock<Vec<ProxyEntry>>,
    transport: Arc<dyn HttpTransport>,
    settings: ProxyPoolSettings,
}

impl ProxyPool {
    /// Create an empty pool that probes through `transport`
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_settings(transport, ProxyPoolSettings::default())
    }

    pub fn with_settings(transport: Arc<dyn HttpTransport>, settings: ProxyPoolSettings) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &ProxyPoolSettings {
        &self.settings
    }

    /// Register a proxy (no-op if already present) and probe it.
    pub async fn add(&self, url: &str) -> LoadResult<()> {
        url::Url::parse(url).map_err(|e| LoadError::invalid_config("proxy_url", &e.to_string()))?;

        {
            let mut entries = self.entries.write().await;
            if !entries.iter().any(|e| e.url == url) {
                entries.push(ProxyEntry::new(url));
                info!("Added proxy {} ({} in pool)", url, entries.len());
            }
        }

        self.health_check(url).await
    }

    /// Drop a proxy. Returns whether it was present.
    pub async fn remove(&self, url: &str) -> bool {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.url != url);
        let removed = entries.len() != before;
        if removed {
            info!("Removed proxy {}", url);
        }
        removed
    }

    /// Probe the proxy and record the outcome. Probe failures are counted,
    /// never returned; only an unknown URL is an error.
    pub async fn health_check(&self, url: &str) -> LoadResult<()> {
        if !self.contains(url).await {
            return Err(LoadError::proxy_not_found(url));
        }

        let probe = OutboundRequest::new("GET", &self.settings.probe_url);
        let start = Instant::now();
        let result = self.transport.send(&probe, Some(url)).await;
        let elapsed = start.elapsed();

        let mut entries = self.entries.write().await;
        // The entry may have been removed while the probe was in flight
        let Some(entry) = entries.iter_mut().find(|e| e.url == url) else {
            debug!("Proxy {} removed during health check", url);
            return Ok(());
        };

        match result {
            Ok(response) => {
                debug!(
                    "Health check for {} returned {} in {:?}",
                    url, response.status_code, elapsed
                );
                entry.record_success(response.status_code, elapsed);
            }
            Err(e) => {
                warn!("Health check for {} failed: {}", url, e);
                entry.fail_count += 1;
            }
        }

        Ok(())
    }

    /// Pick the proxy for the next trial.
    pub async fn select_next(&self, strategy: RotationStrategy) -> LoadResult<String> {
        let mut entries = self.entries.write().await;
        if entries.is_empty() {
            return Err(LoadError::NoProxiesAvailable);
        }

        // min_by_key keeps the first of equal keys, which is insertion order
        let entry = match strategy {
            RotationStrategy::RoundRobin => {
                let entry = entries
                    .iter_mut()
                    .min_by_key(|e| e.last_used)
                    .ok_or(LoadError::NoProxiesAvailable)?;
                entry.last_used = Some(Utc::now());
                entry
            }
            RotationStrategy::LeastUsed => entries
                .iter_mut()
                .min_by_key(|e| e.success_count)
                .ok_or(LoadError::NoProxiesAvailable)?,
        };

        if entry.fail_count >= self.settings.rate_limit_threshold {
            warn!(
                "Selected proxy {} is rate limited ({} failures)",
                entry.url, entry.fail_count
            );
        }

        Ok(entry.url.clone())
    }

    /// Fold a response into the proxy's counters. The rate-limit status and
    /// status 0 (no response) count as failures and leave the mean untouched.
    pub async fn update_status(
        &self,
        url: &str,
        status_code: u16,
        elapsed: Duration,
    ) -> LoadResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.url == url)
            .ok_or_else(|| LoadError::proxy_not_found(url))?;

        if status_code == self.settings.rate_limit_status || status_code == 0 {
            entry.record_failure(status_code);
        } else {
            entry.record_success(status_code, elapsed);
        }

        Ok(())
    }

    /// Count a trial that got no response through this proxy
    pub async fn record_failure(&self, url: &str) -> LoadResult<()> {
        self.update_status(url, 0, Duration::ZERO).await
    }

    pub async fn is_rate_limited(&self, url: &str) -> LoadResult<bool> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .find(|e| e.url == url)
            .map(|e| e.fail_count >= self.settings.rate_limit_threshold)
            .ok_or_else(|| LoadError::proxy_not_found(url))
    }

    /// Snapshot of one entry
    pub async fn get(&self, url: &str) -> LoadResult<ProxyEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .find(|e| e.url == url)
            .cloned()
            .ok_or_else(|| LoadError::proxy_not_found(url))
    }

    /// Snapshot of all entries in insertion order
    pub async fn list(&self) -> Vec<ProxyEntry> {
        self.entries.read().await.clone()
    }

    pub async fn contains(&self, url: &str) -> bool {
        self.entries.read().await.iter().any(|e| e.url == url)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
