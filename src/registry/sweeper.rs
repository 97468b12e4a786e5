//! Expiry Sweeper
//!
//! Background task that periodically removes registrations older than the
//! configured TTL. The first sweep runs one full interval after start.

use super::code_registry::{CodeRegistry, RegistryConfig};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Periodic evictor for a [`CodeRegistry`]
#[derive(Debug, Clone)]
pub struct ExpirySweeper {
    registry: Arc<CodeRegistry>,
    ttl: Duration,
    interval: Duration,
}

impl ExpirySweeper {
    /// Create a sweeper using the TTL and interval from `config`
    pub fn new(registry: Arc<CodeRegistry>, config: &RegistryConfig) -> Self {
        Self {
            registry,
            ttl: config.ttl,
            interval: config.sweep_interval,
        }
    }

    /// Run a single sweep as of `now`; returns the number of evicted entries
    pub fn sweep_once(&self, now: DateTime<Utc>) -> usize {
        let evicted = self.registry.evict_expired(self.ttl, now);
        let remaining = self.registry.size();

        if evicted > 0 {
            info!("Sweep evicted {} expired codes ({} active)", evicted, remaining);
        } else {
            debug!("Sweep found nothing to evict ({} active)", remaining);
        }

        evicted
    }

    /// Sweep on every interval tick until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        // `interval_at` panics on a zero period; RegistryConfig::validate rejects it upstream.
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Expiry sweeper started (ttl {:?}, interval {:?})",
            self.ttl, self.interval
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Expiry sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.sweep_once(Utc::now());
                }
            }
        }
    }

    /// Spawn [`run`](Self::run) onto the current runtime
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
