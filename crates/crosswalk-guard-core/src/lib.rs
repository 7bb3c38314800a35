//! # crosswalk-guard-core
//!
//! Coordination engine for real-time proximity alerts between pedestrians
//! and vehicles sharing a crosswalk. Many independent crosswalk entities
//! exist concurrently; each accumulates presence and driver telemetry and
//! emits debounced safety alerts to the right recipients whenever the
//! computed risk crosses a threshold.
//!
//! ## Architecture
//!
//! ```text
//! client action ──► CrosswalkRegistry ──► LeaseCoordinator ──► EvalEngine
//!                        │                     │                  │
//!                        ▼                     ▼                  ▼
//!                  DocumentStore ◄──── evaluation lease     risk::evaluate
//!                        ▲                                        │
//!                        │                                        ▼
//!                     Sweeper ───────────────────────────► EventSink (push)
//! ```
//!
//! Mutations are applied immediately and unconditionally, then an
//! evaluation is *requested*; the lease guarantees at most one pass per
//! crosswalk is in flight cluster-wide, and the sweep re-requests
//! evaluation for every crosswalk on a fixed interval so TTL expiry and
//! alert-end transitions happen even when no client event arrives.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use crosswalk_guard_core::{
//!     CrosswalkId, CrosswalkRegistry, EvalEngine, EventSink, LeaseCoordinator,
//!     MemoryStore, RiskConfig, SessionId, Sweeper,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(sink: Arc<dyn EventSink>) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let config = RiskConfig::default().with_driver_presence_ttl(Duration::from_secs(3));
//! let registry = CrosswalkRegistry::new(store.clone());
//! let engine = Arc::new(EvalEngine::new(store.clone(), sink, config.clone()));
//! let coordinator = Arc::new(LeaseCoordinator::new(store.clone(), engine));
//!
//! registry.add_ped(CrosswalkId::new(1), &SessionId::from("p1")).await?;
//! coordinator.request_evaluation(CrosswalkId::new(1)).await?;
//!
//! let sweeper = Sweeper::new(registry, coordinator, config.sweep_interval);
//! tokio::spawn(sweeper.run(CancellationToken::new()));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod lease;
pub mod registry;
pub mod risk;
pub mod store;
pub mod sweep;
pub mod types;

pub use dispatch::{emit_to_sids, EventSink, OutboundEvent};
pub use engine::EvalEngine;
pub use error::{CoreError, CoreResult, DispatchError, StoreError};
pub use lease::{LeaseCoordinator, RequestOutcome};
pub use registry::CrosswalkRegistry;
pub use risk::{AlertThresholds, Evaluation, Notification, RiskConfig};
pub use store::{
    Collection, CreateOutcome, DocumentStore, FieldPatch, FieldPath, MemoryStore, PatchOp,
};
pub use sweep::Sweeper;
pub use types::{unix_millis, CrosswalkDoc, CrosswalkId, DriverTelemetry, Role, SessionId};
