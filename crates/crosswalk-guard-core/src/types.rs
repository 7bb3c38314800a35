//! Domain types for crosswalk presence tracking.
//!
//! The [`CrosswalkDoc`] is the single source of truth for one physical
//! crossing: who is present, the latest driver telemetry, and the
//! hysteresis state of any active alerts. It is persisted as one JSON
//! document per crosswalk; the registry mutates it with partial-field
//! patches rather than whole-document writes so concurrent writers to
//! different subfields do not clobber each other.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of one physical crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CrosswalkId(u64);

impl CrosswalkId {
    /// Create an id from its numeric value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CrosswalkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CrosswalkId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}

impl From<u64> for CrosswalkId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Opaque identifier of one connected client session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session id.
    pub fn new(sid: impl Into<String>) -> Self {
        Self(sid.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(sid: &str) -> Self {
        Self(sid.to_owned())
    }
}

/// The role a session plays at a crossing.
///
/// A session id appears in at most one of `peds`/`drivers` for a given
/// crosswalk; the role is tracked per session and consulted only for
/// disconnect-time cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Pedestrian waiting at or crossing the crosswalk
    Ped,
    /// Driver approaching the crosswalk
    Driver,
}

/// Latest telemetry reported by one driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverTelemetry {
    /// Distance to the crosswalk in meters
    pub distance: f64,
    /// Speed in meters per second; absent until the client reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Unix milliseconds of the last update; drivers expire by TTL when
    /// updates stop arriving
    pub ts: u64,
}

/// Engine-internal hysteresis state, persisted alongside presence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LastBroadcast {
    /// Trigger distance of the active aggregate pedestrian alert, if any.
    /// Used for debounce comparison and for re-sending the alert to
    /// pedestrians joining while it is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ped_critical_min_distance: Option<f64>,
    /// Per-driver trigger distance while that driver's alert is armed
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub driver_critical_active: BTreeMap<SessionId, f64>,
}

/// One crosswalk document: presence, telemetry, and alert hysteresis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrosswalkDoc {
    /// Session ids of pedestrians currently present
    #[serde(default)]
    pub peds: BTreeSet<SessionId>,
    /// Driver telemetry keyed by session id
    #[serde(default)]
    pub drivers: BTreeMap<SessionId, DriverTelemetry>,
    /// Alert hysteresis state
    #[serde(default)]
    pub last_broadcast: LastBroadcast,
}

impl CrosswalkDoc {
    /// `true` when nobody is present. Empty documents are harmless and the
    /// sweep skips them.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peds.is_empty() && self.drivers.is_empty()
    }

    /// The skeleton written when a crosswalk is first joined.
    #[must_use]
    pub fn skeleton() -> serde_json::Value {
        serde_json::json!({ "peds": [], "drivers": {}, "last_broadcast": {} })
    }
}

/// Current wall-clock time in unix milliseconds.
#[must_use]
pub fn unix_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
