//! Wire protocol for the WebSocket gateway.
//!
//! All messages are JSON with an `event` tag and a `data` payload:
//!
//! ```json
//! {"event": "driver_update", "data": {"crosswalk_id": 1, "distance": 40.0}}
//! ```
//!
//! Inbound commands mirror the client actions; outbound messages carry the
//! engine's events plus the classifier replies. Classifier replies are
//! addressed by the `username` field rather than by synthesizing per-user
//! event names.

use serde::{Deserialize, Serialize};

use crosswalk_guard_core::{CrosswalkId, OutboundEvent};

/// Commands sent by connected clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Enter a crosswalk as a pedestrian
    PedEnter {
        /// Target crosswalk
        crosswalk_id: CrosswalkId,
    },
    /// Leave a crosswalk as a pedestrian
    PedLeave {
        /// Target crosswalk
        crosswalk_id: CrosswalkId,
    },
    /// Enter a crosswalk as a driver with initial telemetry
    DriverEnter {
        /// Target crosswalk
        crosswalk_id: CrosswalkId,
        /// Distance to the crosswalk in meters
        distance: f64,
        /// Speed in m/s, when available
        #[serde(default)]
        speed: Option<f64>,
    },
    /// Update driver telemetry
    DriverUpdate {
        /// Target crosswalk
        crosswalk_id: CrosswalkId,
        /// Distance to the crosswalk in meters
        distance: f64,
        /// Speed in m/s; omitted speed preserves the previous value
        #[serde(default)]
        speed: Option<f64>,
    },
    /// Leave a crosswalk as a driver
    DriverLeave {
        /// Target crosswalk
        crosswalk_id: CrosswalkId,
    },
    /// Ask the classifier whether the captured frame shows a crosswalk
    Predict {
        /// Caller-chosen correlation name echoed in the reply
        username: String,
        /// Frame as a browser data URL (or bare base64)
        #[serde(alias = "imageAsBase64")]
        image: String,
        /// Also archive the frame for training
        #[serde(default)]
        save: bool,
    },
}

/// Messages pushed to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current population of a crosswalk
    Presence {
        crosswalk_id: CrosswalkId,
        ped_count: usize,
        driver_count: usize,
        ts: i64,
    },
    /// Aggregate pedestrian alert
    PedCritical {
        crosswalk_id: CrosswalkId,
        min_distance: f64,
        ts: i64,
    },
    /// Driver-facing critical alert
    DriverCritical { crosswalk_id: CrosswalkId, ts: i64 },
    /// A previously active alert ended
    AlertEnd { crosswalk_id: CrosswalkId, ts: i64 },
    /// Classifier verdict for a predict command
    PredictResult { username: String, is_crosswalk: bool },
    /// Classifier failure for a predict command
    PredictError { username: String, message: String },
    /// A command failed server-side
    Error { message: String },
}

impl From<OutboundEvent> for ServerMessage {
    fn from(event: OutboundEvent) -> Self {
        match event {
            OutboundEvent::Presence {
                crosswalk_id,
                ped_count,
                driver_count,
                ts,
            } => Self::Presence {
                crosswalk_id,
                ped_count,
                driver_count,
                ts,
            },
            OutboundEvent::PedCritical {
                crosswalk_id,
                min_distance,
                ts,
            } => Self::PedCritical {
                crosswalk_id,
                min_distance,
                ts,
            },
            OutboundEvent::DriverCritical { crosswalk_id, ts } => {
                Self::DriverCritical { crosswalk_id, ts }
            }
            OutboundEvent::AlertEnd { crosswalk_id, ts } => Self::AlertEnd { crosswalk_id, ts },
        }
    }
}
