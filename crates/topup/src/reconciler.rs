//! Background reconciliation of orphaned top-ups.
//!
//! An orphan is a pending request whose gateway charge was never issued,
//! usually because the gateway call failed during creation. Each cycle
//! retries the charge until `max_charge_attempts` is reached and cancels the
//! request after that.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use topup_store::{OrphanQuery, TopupStore};
use tracing::{info, warn};

use crate::error::Result;
use crate::service::TopupService;
use crate::settlement::SettlementProcessor;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How often the reconciler wakes up.
    pub interval: Duration,
    /// Minimum age before a charge-less pending request counts as orphaned.
    pub orphan_after: chrono::Duration,
    /// Charge attempts allowed before the request is cancelled.
    pub max_charge_attempts: i32,
    pub batch_size: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            orphan_after: chrono::Duration::minutes(5),
            max_charge_attempts: 3,
            batch_size: 50,
        }
    }
}

/// Counts of what a single reconciliation cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub charged: usize,
    pub cancelled: usize,
    pub failed: usize,
}

pub struct OrphanReconciler {
    store: Arc<dyn TopupStore>,
    service: TopupService,
    processor: SettlementProcessor,
    config: ReconcilerConfig,
}

impl OrphanReconciler {
    pub fn new(
        store: Arc<dyn TopupStore>,
        service: TopupService,
        processor: SettlementProcessor,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            service,
            processor,
            config,
        }
    }

    /// Runs cycles until `shutdown` turns true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            orphan_after_secs = self.config.orphan_after.num_seconds(),
            max_charge_attempts = self.config.max_charge_attempts,
            "orphan reconciler started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("orphan reconciler stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "orphan reconciliation cycle failed");
                    }
                }
            }
        }

        info!("orphan reconciler stopped");
    }

    /// Runs one reconciliation pass. Per-item failures are counted and
    /// logged; only failing to list orphans aborts the cycle.
    #[tracing::instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<ReconcileReport> {
        let cutoff = Utc::now() - self.config.orphan_after;
        let orphans = self
            .store
            .find_orphans(OrphanQuery::new(cutoff).limit(self.config.batch_size))
            .await?;

        let mut report = ReconcileReport {
            scanned: orphans.len(),
            ..Default::default()
        };

        for topup in orphans {
            if topup.charge_attempts < self.config.max_charge_attempts {
                match self.service.issue_charge(&topup).await {
                    Ok(_) => {
                        report.charged += 1;
                        info!(topup_id = %topup.id, "orphan charge issued");
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(topup_id = %topup.id, attempts = topup.charge_attempts + 1, error = %e, "orphan charge retry failed");
                    }
                }
            } else {
                match self.processor.cancel_orphan(topup.id).await {
                    Ok(true) => report.cancelled += 1,
                    Ok(false) => {}
                    Err(e) => {
                        report.failed += 1;
                        warn!(topup_id = %topup.id, error = %e, "failed to cancel orphan");
                    }
                }
            }
        }

        metrics::counter!("reconciler_cycles_total").increment(1);
        metrics::counter!("reconciler_charged_total").increment(report.charged as u64);
        metrics::counter!("reconciler_cancelled_total").increment(report.cancelled as u64);
        metrics::counter!("reconciler_failures_total").increment(report.failed as u64);

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway::InMemoryGateway;
    use topup_store::{InMemoryTopupStore, NewTopup, TopupId, TopupStatus};

    use crate::service::TopupConfig;

    struct Fixture {
        store: InMemoryTopupStore,
        gateway: InMemoryGateway,
        reconciler: OrphanReconciler,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryTopupStore::new();
        store.add_merchant("M1", "Konter Pak Eko", 0).await;
        store.add_supplier("S1", "Telkomsel", 100_000).await;
        let gateway = InMemoryGateway::new();

        let shared: Arc<dyn TopupStore> = Arc::new(store.clone());
        let service = TopupService::new(
            shared.clone(),
            Arc::new(gateway.clone()),
            TopupConfig::default(),
        );
        let processor = SettlementProcessor::new(shared.clone(), "server-key");
        let reconciler =
            OrphanReconciler::new(shared, service, processor, ReconcilerConfig::default());

        Fixture {
            store,
            gateway,
            reconciler,
        }
    }

    async fn old_orphan(store: &InMemoryTopupStore) -> TopupId {
        let topup = store
            .insert(NewTopup {
                merchant_id: "M1".into(),
                supplier_id: "S1".into(),
                item_name: "Pulsa 10K".to_string(),
                amount: 10_000,
            })
            .await
            .unwrap();
        store.backdate(topup.id, chrono::Duration::minutes(10)).await;
        topup.id
    }

    #[tokio::test]
    async fn test_young_requests_are_left_alone() {
        let f = fixture().await;
        f.store
            .insert(NewTopup {
                merchant_id: "M1".into(),
                supplier_id: "S1".into(),
                item_name: "Pulsa 10K".to_string(),
                amount: 10_000,
            })
            .await
            .unwrap();

        let report = f.reconciler.run_cycle().await.unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(f.gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_orphan_charge_is_retried() {
        let f = fixture().await;
        let id = old_orphan(&f.store).await;

        let report = f.reconciler.run_cycle().await.unwrap();
        assert_eq!(report.charged, 1);

        let stored = f.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, TopupStatus::Pending);
        assert!(stored.has_charge());
        assert_eq!(stored.charge_attempts, 1);

        let report = f.reconciler.run_cycle().await.unwrap();
        assert_eq!(report.scanned, 0);
    }

    #[tokio::test]
    async fn test_orphan_is_cancelled_after_max_attempts() {
        let f = fixture().await;
        f.gateway.set_fail_on_charge(true);
        let id = old_orphan(&f.store).await;

        for _ in 0..3 {
            let report = f.reconciler.run_cycle().await.unwrap();
            assert_eq!(report.failed, 1);
        }
        assert_eq!(f.gateway.call_count(), 3);

        let report = f.reconciler.run_cycle().await.unwrap();
        assert_eq!(report.cancelled, 1);
        assert_eq!(f.gateway.call_count(), 3);

        let stored = f.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, TopupStatus::Cancelled);
        assert_eq!(stored.charge_attempts, 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture().await;
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(f.reconciler.run(rx));
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reconciler did not stop")
            .unwrap();
    }
}
