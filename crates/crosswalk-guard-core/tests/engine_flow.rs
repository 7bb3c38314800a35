//! End-to-end engine flows against the in-process store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use crosswalk_guard_core::{
    unix_millis, Collection, CrosswalkId, CrosswalkRegistry, DispatchError, DocumentStore,
    EvalEngine, EventSink, LeaseCoordinator, MemoryStore, OutboundEvent, RequestOutcome,
    RiskConfig, SessionId,
};

/// Sink that records every delivery.
#[derive(Default)]
struct RecordingSink {
    deliveries: Mutex<Vec<(SessionId, OutboundEvent)>>,
}

impl RecordingSink {
    fn drain(&self) -> Vec<(SessionId, OutboundEvent)> {
        std::mem::take(&mut *self.deliveries.lock())
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn deliver(&self, sid: &SessionId, event: &OutboundEvent) -> Result<(), DispatchError> {
        self.deliveries.lock().push((sid.clone(), event.clone()));
        Ok(())
    }
}

struct Fixture {
    store: Arc<dyn DocumentStore>,
    registry: CrosswalkRegistry,
    engine: Arc<EvalEngine>,
    coordinator: Arc<LeaseCoordinator>,
    sink: Arc<RecordingSink>,
}

fn fixture() -> Fixture {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let registry = CrosswalkRegistry::new(Arc::clone(&store));
    let engine = Arc::new(EvalEngine::new(
        Arc::clone(&store),
        Arc::clone(&sink) as Arc<dyn EventSink>,
        RiskConfig::default(),
    ));
    let coordinator = Arc::new(LeaseCoordinator::new(Arc::clone(&store), Arc::clone(&engine)));
    Fixture {
        store,
        registry,
        engine,
        coordinator,
        sink,
    }
}

fn sid(s: &str) -> SessionId {
    SessionId::from(s)
}

fn count_events(deliveries: &[(SessionId, OutboundEvent)], recipient: &str, name: &str) -> usize {
    deliveries
        .iter()
        .filter(|(to, event)| {
            to.as_str() == recipient
                && matches!(
                    (event, name),
                    (OutboundEvent::Presence { .. }, "presence")
                        | (OutboundEvent::PedCritical { .. }, "ped_critical")
                        | (OutboundEvent::DriverCritical { .. }, "driver_critical")
                        | (OutboundEvent::AlertEnd { .. }, "alert_end")
                )
        })
        .count()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_approach_and_retreat_scenario() {
    let fx = fixture();
    let id = CrosswalkId::new(1);
    let (p1, d1) = (sid("p1"), sid("d1"));

    // Ped joins, driver joins far away at 10 m/s: inner ≈ 51.7, outer ≈ 129.
    fx.registry.add_ped(id, &p1).await.unwrap();
    fx.registry.add_driver(id, &d1, 200.0, Some(10.0)).await.unwrap();
    fx.engine.run_pass(id).await.unwrap();

    let deliveries = fx.sink.drain();
    assert_eq!(count_events(&deliveries, "d1", "driver_critical"), 0);
    assert_eq!(count_events(&deliveries, "p1", "ped_critical"), 0);
    assert_eq!(count_events(&deliveries, "p1", "presence"), 1);
    assert_eq!(count_events(&deliveries, "d1", "presence"), 1);

    // Driver closes to 40 m: both alerts fire.
    fx.registry.update_driver(id, &d1, 40.0, None).await.unwrap();
    fx.engine.run_pass(id).await.unwrap();

    let deliveries = fx.sink.drain();
    assert_eq!(count_events(&deliveries, "d1", "driver_critical"), 1);
    assert_eq!(count_events(&deliveries, "p1", "ped_critical"), 1);
    assert!(deliveries.iter().any(|(to, event)| {
        to == &p1
            && matches!(event, OutboundEvent::PedCritical { min_distance, .. } if *min_distance == 40.0)
    }));

    let doc = fx.registry.get(id).await.unwrap().unwrap();
    assert_eq!(doc.last_broadcast.ped_critical_min_distance, Some(40.0));
    assert_eq!(doc.last_broadcast.driver_critical_active.get(&d1), Some(&40.0));

    // Driver retreats to 200 m: both alerts end, exactly once each.
    fx.registry.update_driver(id, &d1, 200.0, None).await.unwrap();
    fx.engine.run_pass(id).await.unwrap();

    let deliveries = fx.sink.drain();
    assert_eq!(count_events(&deliveries, "d1", "alert_end"), 1);
    assert_eq!(count_events(&deliveries, "p1", "alert_end"), 1);
    assert_eq!(count_events(&deliveries, "d1", "driver_critical"), 0);

    let doc = fx.registry.get(id).await.unwrap().unwrap();
    assert!(doc.last_broadcast.ped_critical_min_distance.is_none());
    assert!(doc.last_broadcast.driver_critical_active.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_debounce_never_refires_within_delta() {
    let fx = fixture();
    let id = CrosswalkId::new(2);
    fx.registry.add_ped(id, &sid("p1")).await.unwrap();
    fx.registry.add_driver(id, &sid("d1"), 40.0, Some(10.0)).await.unwrap();
    fx.engine.run_pass(id).await.unwrap();
    fx.sink.drain();

    // Jitter within the 3 m debounce delta.
    for distance in [39.0, 41.0, 38.5] {
        fx.registry
            .update_driver(id, &sid("d1"), distance, None)
            .await
            .unwrap();
        fx.engine.run_pass(id).await.unwrap();
    }

    let deliveries = fx.sink.drain();
    assert_eq!(count_events(&deliveries, "d1", "driver_critical"), 0);
    assert_eq!(count_events(&deliveries, "p1", "ped_critical"), 0);
    // Presence still flows on every pass.
    assert_eq!(count_events(&deliveries, "p1", "presence"), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_no_ped_no_alerts() {
    let fx = fixture();
    let id = CrosswalkId::new(3);
    fx.registry.add_driver(id, &sid("d1"), 5.0, Some(15.0)).await.unwrap();
    fx.engine.run_pass(id).await.unwrap();

    let deliveries = fx.sink.drain();
    assert_eq!(count_events(&deliveries, "d1", "driver_critical"), 0);
    assert_eq!(count_events(&deliveries, "d1", "presence"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ttl_expiry_prunes_driver_and_ends_alert() {
    let fx = fixture();
    let id = CrosswalkId::new(4);
    let (p1, d1) = (sid("p1"), sid("d1"));

    fx.registry.add_ped(id, &p1).await.unwrap();

    // A driver that went silent 10 s ago while its alert was active.
    fx.store
        .update(
            Collection::Crosswalks,
            "4",
            &[
                crosswalk_guard_core::FieldPatch::set(
                    crosswalk_guard_core::FieldPath::new(["drivers", "d1"]),
                    json!({"distance": 40.0, "speed": 10.0, "ts": unix_millis() - 10_000}),
                ),
                crosswalk_guard_core::FieldPatch::set(
                    crosswalk_guard_core::FieldPath::new([
                        "last_broadcast",
                        "driver_critical_active",
                        "d1",
                    ]),
                    json!(40.0),
                ),
                crosswalk_guard_core::FieldPatch::set(
                    crosswalk_guard_core::FieldPath::new([
                        "last_broadcast",
                        "ped_critical_min_distance",
                    ]),
                    json!(40.0),
                ),
            ],
        )
        .await
        .unwrap();

    fx.engine.run_pass(id).await.unwrap();

    let doc = fx.registry.get(id).await.unwrap().unwrap();
    assert!(doc.drivers.is_empty());
    assert!(doc.last_broadcast.driver_critical_active.is_empty());
    assert!(doc.last_broadcast.ped_critical_min_distance.is_none());

    let deliveries = fx.sink.drain();
    assert_eq!(count_events(&deliveries, "p1", "alert_end"), 1);
    // The expired driver is gone and gets nothing.
    assert_eq!(count_events(&deliveries, "d1", "presence"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lease_serializes_passes_and_releases() {
    let fx = fixture();
    let id = CrosswalkId::new(5);
    fx.registry.add_ped(id, &sid("p1")).await.unwrap();

    // Hold the lease as a foreign instance: requests collapse to Contended.
    fx.store
        .create_if_absent(Collection::Leases, "5", json!({"acquired_at": unix_millis()}))
        .await
        .unwrap();
    assert_eq!(
        fx.coordinator.request_evaluation(id).await.unwrap(),
        RequestOutcome::Contended
    );
    assert_eq!(
        fx.coordinator.request_evaluation(id).await.unwrap(),
        RequestOutcome::Contended
    );
    fx.store.delete(Collection::Leases, "5").await.unwrap();

    // Once free, a request schedules a pass and the lease is gone after it.
    assert_eq!(
        fx.coordinator.request_evaluation(id).await.unwrap(),
        RequestOutcome::Scheduled
    );
    for _ in 0..100 {
        if fx
            .store
            .get(Collection::Leases, "5")
            .await
            .unwrap()
            .is_none()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(fx.store.get(Collection::Leases, "5").await.unwrap().is_none());
    assert_eq!(count_events(&fx.sink.drain(), "p1", "presence"), 1);
}
