//! Periodic re-evaluation of every crosswalk.
//!
//! The sweep is the safety net for TTL-based expiry: a driver whose
//! connection silently dies stops sending updates, and no client event
//! will ever trigger the pass that prunes it. Each tick simply requests
//! evaluation for every populated crosswalk; the lease keeps this from
//! ever stacking passes. Tick failures are logged and swallowed — the
//! loop must outlive any transient store outage.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::lease::{LeaseCoordinator, RequestOutcome};
use crate::registry::CrosswalkRegistry;
use crate::types::CrosswalkId;

/// Lease age past which the sweep starts warning about a possibly stuck
/// holder. Leases are never stolen; this only makes the condition visible.
const STALE_LEASE_WARN_AGE: Duration = Duration::from_secs(30);

/// Periodic sweep over all known crosswalks.
pub struct Sweeper {
    registry: CrosswalkRegistry,
    coordinator: Arc<LeaseCoordinator>,
    interval: Duration,
}

impl Sweeper {
    /// Create a sweeper ticking at `interval`.
    pub fn new(
        registry: CrosswalkRegistry,
        coordinator: Arc<LeaseCoordinator>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            coordinator,
            interval,
        }
    }

    /// Run until the token is cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "sweep loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("sweep loop stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(error) = self.tick().await {
                        warn!(%error, "sweep tick failed");
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<(), StoreError> {
        let ids = self.registry.list_ids().await?;
        for id in ids {
            // Empty documents have nothing to prune or alert on.
            match self.registry.get(id).await {
                Ok(Some(doc)) if !doc.is_empty() => {}
                Ok(_) => continue,
                Err(error) => {
                    warn!(crosswalk = %id, %error, "skipping unreadable crosswalk");
                    continue;
                }
            }

            match self.coordinator.request_evaluation(id).await {
                Ok(RequestOutcome::Scheduled) => {}
                Ok(RequestOutcome::Contended) => {
                    debug!(crosswalk = %id, "evaluation already in flight");
                    self.warn_if_stale(id).await;
                }
                Err(error) => {
                    warn!(crosswalk = %id, %error, "failed to request evaluation");
                }
            }
        }
        Ok(())
    }

    async fn warn_if_stale(&self, id: CrosswalkId) {
        match self.coordinator.lease_age_ms(id).await {
            Ok(Some(age_ms)) if age_ms > STALE_LEASE_WARN_AGE.as_millis() as u64 => {
                warn!(
                    crosswalk = %id,
                    age_ms,
                    "evaluation lease looks stuck; holder may have crashed"
                );
            }
            Ok(_) => {}
            Err(error) => debug!(crosswalk = %id, %error, "could not read lease age"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{EventSink, OutboundEvent};
    use crate::engine::EvalEngine;
    use crate::error::DispatchError;
    use crate::risk::RiskConfig;
    use crate::store::{Collection, DocumentStore, MemoryStore};
    use crate::types::SessionId;
    use async_trait::async_trait;

    struct NullSink;

    #[async_trait]
    impl EventSink for NullSink {
        async fn deliver(
            &self,
            _sid: &SessionId,
            _event: &OutboundEvent,
        ) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tick_skips_empty_documents() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let registry = CrosswalkRegistry::new(Arc::clone(&store));
        let engine = Arc::new(EvalEngine::new(
            Arc::clone(&store),
            Arc::new(NullSink),
            RiskConfig::default(),
        ));
        let coordinator = Arc::new(LeaseCoordinator::new(Arc::clone(&store), engine));

        // One empty and one populated crosswalk.
        store
            .create_if_absent(
                Collection::Crosswalks,
                "1",
                serde_json::json!({"peds": [], "drivers": {}, "last_broadcast": {}}),
            )
            .await
            .unwrap();
        registry
            .add_ped(CrosswalkId::new(2), &SessionId::from("p1"))
            .await
            .unwrap();

        let sweeper = Sweeper::new(registry, Arc::clone(&coordinator), Duration::from_secs(1));
        sweeper.tick().await.unwrap();

        // Give the scheduled pass time to finish and release its lease.
        for _ in 0..100 {
            if store.get(Collection::Leases, "2").await.unwrap().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // The empty crosswalk never got a lease at all; the populated one
        // has been evaluated and released.
        assert!(store.get(Collection::Leases, "1").await.unwrap().is_none());
        assert!(store.get(Collection::Leases, "2").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_stops_on_cancellation() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let registry = CrosswalkRegistry::new(Arc::clone(&store));
        let engine = Arc::new(EvalEngine::new(
            Arc::clone(&store),
            Arc::new(NullSink),
            RiskConfig::default(),
        ));
        let coordinator = Arc::new(LeaseCoordinator::new(Arc::clone(&store), engine));
        let sweeper = Sweeper::new(registry, coordinator, Duration::from_millis(10));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sweeper.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweep loop should stop promptly")
            .unwrap();
    }
}
