//! Best-effort notification delivery.
//!
//! The engine only knows a push channel keyed by session id; the transport
//! behind [`EventSink`] is the server's concern. Delivery is at-least-once
//! or lossy: a failure for one recipient never aborts the rest, and there
//! is no retry and no ordering guarantee across recipients.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::types::{CrosswalkId, SessionId};

/// Events pushed to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Current population of a crosswalk, sent at the end of every
    /// evaluation pass
    Presence {
        /// The crosswalk
        crosswalk_id: CrosswalkId,
        /// Pedestrians present after pruning
        ped_count: usize,
        /// Drivers present after pruning
        driver_count: usize,
        /// Unix seconds
        ts: i64,
    },
    /// Aggregate pedestrian alert: some driver is inside its outer alert
    /// distance
    PedCritical {
        /// The crosswalk
        crosswalk_id: CrosswalkId,
        /// Minimum qualifying driver distance in meters
        min_distance: f64,
        /// Unix seconds
        ts: i64,
    },
    /// A driver crossed inside its inner alert distance with pedestrians
    /// present
    DriverCritical {
        /// The crosswalk
        crosswalk_id: CrosswalkId,
        /// Unix seconds
        ts: i64,
    },
    /// A previously active alert ended
    AlertEnd {
        /// The crosswalk
        crosswalk_id: CrosswalkId,
        /// Unix seconds
        ts: i64,
    },
}

/// Push channel keyed by session id.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event to one session.
    async fn deliver(&self, sid: &SessionId, event: &OutboundEvent) -> Result<(), DispatchError>;
}

/// Deliver an event to every sid independently, swallowing per-recipient
/// failures (a disconnected session is routine, not an error).
pub async fn emit_to_sids(sink: &dyn EventSink, sids: &[SessionId], event: &OutboundEvent) {
    for sid in sids {
        if let Err(error) = sink.deliver(sid, event).await {
            tracing::debug!(%sid, %error, "dropping notification for unreachable session");
        }
    }
}
