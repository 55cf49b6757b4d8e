//! Periodic subscription billing.

use std::sync::Arc;
use std::time::Duration;

use rotur_shared::types::now_millis;
use rotur_store::{Store, SubscriptionStatus, SweepReport};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::info;

use crate::key_cache::KeyOwnershipCache;

/// Runs `Store::run_subscription_sweep` on a fixed interval and keeps the
/// outcome of the latest run for the admin view. Evicted holders are
/// dropped from the ownership cache.
#[derive(Clone)]
pub struct SubscriptionEngine {
    store: Store,
    key_cache: KeyOwnershipCache,
    interval: Duration,
    last_report: Arc<RwLock<Option<SweepReport>>>,
}

/// Debug snapshot served at `/admin/subscriptions`.
#[derive(Debug, Serialize)]
pub struct EngineStatus {
    pub interval_secs: u64,
    pub last_sweep: Option<SweepReport>,
    pub subscriptions: Vec<SubscriptionStatus>,
}

impl SubscriptionEngine {
    pub fn new(store: Store, key_cache: KeyOwnershipCache, interval: Duration) -> Self {
        Self {
            store,
            key_cache,
            interval,
            last_report: Arc::new(RwLock::new(None)),
        }
    }

    /// Run one sweep now and remember its report.
    pub async fn sweep(&self, now: i64) -> SweepReport {
        let report = self.store.run_subscription_sweep(now).await;
        for evicted in &report.evicted {
            self.key_cache.invalidate(&evicted.key, &evicted.user).await;
        }
        *self.last_report.write().await = Some(report.clone());
        report
    }

    /// Start the periodic task. The first sweep runs immediately.
    pub fn spawn(&self) -> JoinHandle<()> {
        let engine = self.clone();
        info!(interval_secs = engine.interval.as_secs(), "Starting subscription engine");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.sweep(now_millis()).await;
            }
        })
    }

    pub async fn last_report(&self) -> Option<SweepReport> {
        self.last_report.read().await.clone()
    }

    pub async fn status(&self, now: i64) -> EngineStatus {
        EngineStatus {
            interval_secs: self.interval.as_secs(),
            last_sweep: self.last_report().await,
            subscriptions: self.store.subscription_overview(now).await,
        }
    }
}
