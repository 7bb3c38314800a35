//! Cluster-wide evaluation scheduling: at most one pass per crosswalk.
//!
//! Mutual exclusion is carried by an ephemeral lease document created with
//! atomic create-if-absent, not by in-process locking, so it holds across
//! any number of service instances sharing the store. Losing the race is
//! the expected second outcome, not an error: the in-flight pass re-reads
//! the document when it runs, and anything it misses is caught by the next
//! sweep tick.
//!
//! The lease must never outlive its pass. Release happens on the normal
//! path, on the error path, and — via the guard's `Drop` — when the owning
//! task is cancelled mid-pass.

use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use crate::engine::EvalEngine;
use crate::error::StoreError;
use crate::store::{Collection, DocumentStore};
use crate::types::{unix_millis, CrosswalkId};

/// Outcome of an evaluation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// This call won the lease; a pass is now in flight
    Scheduled,
    /// A pass is already in flight; it will observe the latest state
    Contended,
}

/// Schedules evaluation passes under per-crosswalk leases.
pub struct LeaseCoordinator {
    store: Arc<dyn DocumentStore>,
    engine: Arc<EvalEngine>,
}

impl LeaseCoordinator {
    /// Create a coordinator.
    pub fn new(store: Arc<dyn DocumentStore>, engine: Arc<EvalEngine>) -> Self {
        Self { store, engine }
    }

    /// Request an evaluation pass for a crosswalk.
    ///
    /// On winning the lease the pass runs on a background task; evaluation
    /// failures are logged and swallowed there (the next tick self-heals),
    /// with the lease released regardless. Only the lease acquisition
    /// itself can fail here.
    pub async fn request_evaluation(
        &self,
        id: CrosswalkId,
    ) -> Result<RequestOutcome, StoreError> {
        let key = id.to_string();
        let lease = json!({ "acquired_at": unix_millis() });

        if !self
            .store
            .create_if_absent(Collection::Leases, &key, lease)
            .await?
            .created()
        {
            return Ok(RequestOutcome::Contended);
        }

        let guard = LeaseGuard {
            store: Arc::clone(&self.store),
            key,
            released: false,
        };
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            if let Err(error) = engine.run_pass(id).await {
                warn!(crosswalk = %id, %error, "evaluation pass failed");
            }
            guard.release().await;
        });

        Ok(RequestOutcome::Scheduled)
    }

    /// Age of the lease currently held for a crosswalk, in milliseconds,
    /// or `None` when no lease exists. Lets the sweep surface leases that
    /// look stuck.
    pub async fn lease_age_ms(&self, id: CrosswalkId) -> Result<Option<u64>, StoreError> {
        let value = self
            .store
            .get(Collection::Leases, &id.to_string())
            .await?;
        Ok(value
            .and_then(|v| v.get("acquired_at").and_then(serde_json::Value::as_u64))
            .map(|acquired_at| unix_millis().saturating_sub(acquired_at)))
    }
}

/// Scoped lease ownership. `release` is the normal path; `Drop` covers a
/// task cancelled before it could run.
struct LeaseGuard {
    store: Arc<dyn DocumentStore>,
    key: String,
    released: bool,
}

impl LeaseGuard {
    async fn release(mut self) {
        self.released = true;
        if let Err(error) = self.store.delete(Collection::Leases, &self.key).await {
            warn!(key = %self.key, %error, "failed to release evaluation lease");
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(error) = store.delete(Collection::Leases, &key).await {
                    warn!(%key, %error, "failed to release lease after cancellation");
                }
            });
        } else {
            warn!(%key, "evaluation lease leaked: no runtime available for release");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{EventSink, OutboundEvent};
    use crate::error::DispatchError;
    use crate::risk::RiskConfig;
    use crate::store::{CreateOutcome, FieldPatch, MemoryStore};
    use crate::types::SessionId;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;

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

    /// Store whose `update` always fails, for exercising the error path.
    struct BrokenUpdateStore(MemoryStore);

    #[async_trait]
    impl DocumentStore for BrokenUpdateStore {
        async fn get(&self, c: Collection, k: &str) -> Result<Option<Value>, StoreError> {
            self.0.get(c, k).await
        }
        async fn create_if_absent(
            &self,
            c: Collection,
            k: &str,
            initial: Value,
        ) -> Result<CreateOutcome, StoreError> {
            self.0.create_if_absent(c, k, initial).await
        }
        async fn update(
            &self,
            _c: Collection,
            _k: &str,
            _patches: &[FieldPatch],
        ) -> Result<(), StoreError> {
            Err(StoreError::unavailable("update", "injected failure"))
        }
        async fn delete(&self, c: Collection, k: &str) -> Result<bool, StoreError> {
            self.0.delete(c, k).await
        }
        async fn list_keys(&self, c: Collection) -> Result<Vec<String>, StoreError> {
            self.0.list_keys(c).await
        }
    }

    fn coordinator(store: Arc<dyn DocumentStore>) -> LeaseCoordinator {
        let engine = Arc::new(EvalEngine::new(
            Arc::clone(&store),
            Arc::new(NullSink),
            RiskConfig::default(),
        ));
        LeaseCoordinator::new(store, engine)
    }

    async fn wait_for_release(store: &dyn DocumentStore, key: &str) {
        for _ in 0..100 {
            if store.get(Collection::Leases, key).await.unwrap().is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("lease '{key}' was not released");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_contended_while_lease_held() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let coordinator = coordinator(Arc::clone(&store));
        let id = CrosswalkId::new(1);

        // Simulate another instance holding the lease.
        store
            .create_if_absent(Collection::Leases, "1", json!({"acquired_at": unix_millis()}))
            .await
            .unwrap();

        let outcome = coordinator.request_evaluation(id).await.unwrap();
        assert_eq!(outcome, RequestOutcome::Contended);

        // Foreign lease untouched.
        assert!(store.get(Collection::Leases, "1").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lease_released_after_pass() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        store
            .create_if_absent(Collection::Crosswalks, "1", json!({"peds": ["p1"], "drivers": {}}))
            .await
            .unwrap();
        let coordinator = coordinator(Arc::clone(&store));

        let outcome = coordinator
            .request_evaluation(CrosswalkId::new(1))
            .await
            .unwrap();
        assert_eq!(outcome, RequestOutcome::Scheduled);

        wait_for_release(store.as_ref(), "1").await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lease_released_when_pass_fails() {
        let store: Arc<dyn DocumentStore> = Arc::new(BrokenUpdateStore(MemoryStore::new()));
        // A ped and a close driver force a state patch, which will hit the
        // injected update failure.
        store
            .create_if_absent(
                Collection::Crosswalks,
                "1",
                json!({
                    "peds": ["p1"],
                    "drivers": {"d1": {"distance": 10.0, "speed": 10.0, "ts": unix_millis()}},
                    "last_broadcast": {}
                }),
            )
            .await
            .unwrap();
        let coordinator = coordinator(Arc::clone(&store));

        let outcome = coordinator
            .request_evaluation(CrosswalkId::new(1))
            .await
            .unwrap();
        assert_eq!(outcome, RequestOutcome::Scheduled);

        wait_for_release(store.as_ref(), "1").await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lease_age_visible_while_held() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let coordinator = coordinator(Arc::clone(&store));
        let id = CrosswalkId::new(4);

        assert_eq!(coordinator.lease_age_ms(id).await.unwrap(), None);

        store
            .create_if_absent(
                Collection::Leases,
                "4",
                json!({"acquired_at": unix_millis() - 5_000}),
            )
            .await
            .unwrap();
        let age = coordinator.lease_age_ms(id).await.unwrap().unwrap();
        assert!(age >= 5_000);
    }
}
