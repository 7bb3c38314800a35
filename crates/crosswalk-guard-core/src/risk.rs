//! Physics-based risk evaluation with debounced alert hysteresis.
//!
//! [`evaluate`] is a pure function from one crosswalk document to the
//! minimal state mutation plus the notifications to send. It never caches
//! anything across invocations: thresholds depend on each driver's current
//! reported speed and are recomputed every pass.
//!
//! Alert zones per driver:
//!
//! ```text
//!   reaction = speed * reaction_time
//!   braking  = speed^2 / (2 * average_deceleration)
//!   inner    = reaction + braking + safety_buffer     (driver-facing)
//!   outer    = inner * outer_factor                   (pedestrian-facing)
//! ```
//!
//! Drivers reporting no speed, or a speed below `min_alert_speed`, are
//! exempt from zone computation entirely: no alert, no contribution to the
//! aggregate, and no un-alert transition triggered by them alone.

use std::time::Duration;

use serde_json::json;

use crate::dispatch::OutboundEvent;
use crate::store::{FieldPatch, FieldPath};
use crate::types::{CrosswalkDoc, CrosswalkId, DriverTelemetry, SessionId};

/// Tuning knobs for the evaluator.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Driver reaction time in seconds
    pub reaction_time_s: f64,
    /// Average braking deceleration in m/s²
    pub average_deceleration: f64,
    /// Fixed safety margin added to the stopping distance, in meters
    pub safety_buffer_m: f64,
    /// Outer (pedestrian-facing) zone as a multiple of the inner zone
    pub outer_factor: f64,
    /// Drivers slower than this (m/s) are treated as stationary
    pub min_alert_speed: f64,
    /// Minimum distance change required to re-emit an active alert, in
    /// meters
    pub debounce_min_delta_m: f64,
    /// Drivers whose last update is older than this are pruned
    pub driver_presence_ttl: Duration,
    /// Interval of the periodic sweep over all crosswalks
    pub sweep_interval: Duration,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            reaction_time_s: 1.5,
            average_deceleration: 3.0,
            safety_buffer_m: 20.0,
            outer_factor: 2.5,
            min_alert_speed: 0.5,
            debounce_min_delta_m: 3.0,
            driver_presence_ttl: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl RiskConfig {
    /// Set the reaction time (clamped to be non-negative).
    #[must_use]
    pub fn with_reaction_time_s(mut self, seconds: f64) -> Self {
        self.reaction_time_s = seconds.max(0.0);
        self
    }

    /// Set the braking deceleration (clamped away from zero).
    #[must_use]
    pub fn with_average_deceleration(mut self, deceleration: f64) -> Self {
        self.average_deceleration = deceleration.max(0.1);
        self
    }

    /// Set the safety buffer (clamped to be non-negative).
    #[must_use]
    pub fn with_safety_buffer_m(mut self, meters: f64) -> Self {
        self.safety_buffer_m = meters.max(0.0);
        self
    }

    /// Set the outer zone factor (clamped to at least 1).
    #[must_use]
    pub fn with_outer_factor(mut self, factor: f64) -> Self {
        self.outer_factor = factor.max(1.0);
        self
    }

    /// Set the debounce delta (clamped to be non-negative).
    #[must_use]
    pub fn with_debounce_min_delta_m(mut self, meters: f64) -> Self {
        self.debounce_min_delta_m = meters.max(0.0);
        self
    }

    /// Set the driver presence TTL.
    #[must_use]
    pub fn with_driver_presence_ttl(mut self, ttl: Duration) -> Self {
        self.driver_presence_ttl = ttl;
        self
    }

    /// Set the sweep interval.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Alert thresholds for a driver moving at `speed` m/s.
    #[must_use]
    pub fn thresholds(&self, speed: f64) -> AlertThresholds {
        let reaction = speed * self.reaction_time_s;
        let braking = (speed * speed) / (2.0 * self.average_deceleration);
        let inner = reaction + braking + self.safety_buffer_m;
        AlertThresholds {
            inner,
            outer: inner * self.outer_factor,
        }
    }
}

/// Distance thresholds derived from one driver's speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    /// Driver-facing critical distance in meters
    pub inner: f64,
    /// Pedestrian-facing warning distance in meters
    pub outer: f64,
}

/// One notification to deliver: an event and its recipients.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Recipient session ids
    pub to: Vec<SessionId>,
    /// The event payload
    pub event: OutboundEvent,
}

/// Result of one evaluation: the state mutation to persist and the
/// notifications to dispatch afterwards.
#[derive(Debug, Default)]
pub struct Evaluation {
    /// Field-level patches, applied in a single update call
    pub patches: Vec<FieldPatch>,
    /// Notifications, dispatched only after the patches are persisted
    pub notifications: Vec<Notification>,
}

impl Evaluation {
    fn notify(&mut self, to: Vec<SessionId>, event: OutboundEvent) {
        // A transition with nobody to tell still mutates state; only the
        // notification is dropped.
        if !to.is_empty() {
            self.notifications.push(Notification { to, event });
        }
    }
}

/// Evaluate one crosswalk document.
///
/// `now_ms` is the wall-clock time of the pass in unix milliseconds; the
/// caller supplies it so the computation stays deterministic under test.
#[must_use]
pub fn evaluate(
    id: CrosswalkId,
    doc: &CrosswalkDoc,
    now_ms: u64,
    config: &RiskConfig,
) -> Evaluation {
    let mut eval = Evaluation::default();
    let ts = (now_ms / 1000) as i64;

    // TTL pruning: absence of a ping is the only expiry signal.
    let cutoff = now_ms.saturating_sub(config.driver_presence_ttl.as_millis() as u64);
    let mut live: Vec<(&SessionId, &DriverTelemetry)> = Vec::with_capacity(doc.drivers.len());
    for (sid, telemetry) in &doc.drivers {
        if telemetry.ts < cutoff {
            eval.patches
                .push(FieldPatch::remove(FieldPath::new(["drivers", sid.as_str()])));
            if doc.last_broadcast.driver_critical_active.contains_key(sid) {
                eval.patches.push(FieldPatch::remove(FieldPath::new([
                    "last_broadcast",
                    "driver_critical_active",
                    sid.as_str(),
                ])));
            }
        } else {
            live.push((sid, telemetry));
        }
    }

    let ped_count = doc.peds.len();
    let ped_sids: Vec<SessionId> = doc.peds.iter().cloned().collect();

    // Per-driver critical state machine.
    for (sid, telemetry) in &live {
        let Some(speed) = eligible_speed(telemetry, config) else {
            continue;
        };
        let armed = doc.last_broadcast.driver_critical_active.get(*sid).copied();
        let thresholds = config.thresholds(speed);
        let in_zone = telemetry.distance <= thresholds.inner && ped_count > 0;

        match (armed, in_zone) {
            (None, true) => {
                eval.patches.push(FieldPatch::set(
                    FieldPath::new(["last_broadcast", "driver_critical_active", sid.as_str()]),
                    json!(telemetry.distance),
                ));
                eval.notify(
                    vec![(*sid).clone()],
                    OutboundEvent::DriverCritical {
                        crosswalk_id: id,
                        ts,
                    },
                );
            }
            (Some(last), true) => {
                if (last - telemetry.distance).abs() >= config.debounce_min_delta_m {
                    eval.patches.push(FieldPatch::set(
                        FieldPath::new(["last_broadcast", "driver_critical_active", sid.as_str()]),
                        json!(telemetry.distance),
                    ));
                    eval.notify(
                        vec![(*sid).clone()],
                        OutboundEvent::DriverCritical {
                            crosswalk_id: id,
                            ts,
                        },
                    );
                }
            }
            (Some(_), false) => {
                eval.patches.push(FieldPatch::remove(FieldPath::new([
                    "last_broadcast",
                    "driver_critical_active",
                    sid.as_str(),
                ])));
                eval.notify(
                    vec![(*sid).clone()],
                    OutboundEvent::AlertEnd {
                        crosswalk_id: id,
                        ts,
                    },
                );
            }
            (None, false) => {}
        }
    }

    // Aggregate pedestrian state: minimum distance among drivers inside
    // their own outer zone.
    let mut qualifying_min: Option<f64> = None;
    if ped_count > 0 {
        for (_, telemetry) in &live {
            let Some(speed) = eligible_speed(telemetry, config) else {
                continue;
            };
            if telemetry.distance <= config.thresholds(speed).outer {
                qualifying_min =
                    Some(qualifying_min.map_or(telemetry.distance, |m| m.min(telemetry.distance)));
            }
        }
    }

    match (doc.last_broadcast.ped_critical_min_distance, qualifying_min) {
        (None, Some(min_distance)) => {
            eval.patches.push(FieldPatch::set(
                FieldPath::new(["last_broadcast", "ped_critical_min_distance"]),
                json!(min_distance),
            ));
            eval.notify(
                ped_sids.clone(),
                OutboundEvent::PedCritical {
                    crosswalk_id: id,
                    min_distance,
                    ts,
                },
            );
        }
        (Some(last), Some(min_distance)) => {
            if (last - min_distance).abs() >= config.debounce_min_delta_m {
                eval.patches.push(FieldPatch::set(
                    FieldPath::new(["last_broadcast", "ped_critical_min_distance"]),
                    json!(min_distance),
                ));
                eval.notify(
                    ped_sids.clone(),
                    OutboundEvent::PedCritical {
                        crosswalk_id: id,
                        min_distance,
                        ts,
                    },
                );
            }
        }
        (Some(_), None) => {
            eval.patches.push(FieldPatch::remove(FieldPath::new([
                "last_broadcast",
                "ped_critical_min_distance",
            ])));
            eval.notify(
                ped_sids.clone(),
                OutboundEvent::AlertEnd {
                    crosswalk_id: id,
                    ts,
                },
            );
        }
        (None, None) => {}
    }

    // Presence goes to everyone still present, every pass.
    let mut everyone = ped_sids;
    everyone.extend(live.iter().map(|(sid, _)| (*sid).clone()));
    eval.notify(
        everyone,
        OutboundEvent::Presence {
            crosswalk_id: id,
            ped_count,
            driver_count: live.len(),
            ts,
        },
    );

    eval
}

fn eligible_speed(telemetry: &DriverTelemetry, config: &RiskConfig) -> Option<f64> {
    telemetry.speed.filter(|speed| *speed >= config.min_alert_speed)
}
