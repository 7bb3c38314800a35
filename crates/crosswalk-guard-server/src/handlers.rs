//! Inbound command handling.
//!
//! Registry mutations are applied immediately and unconditionally, then an
//! evaluation is requested; they are never gated by the evaluation lease.
//! A store failure on the mutation path is reported back to the issuing
//! client, while evaluation-side failures are handled (and logged) inside
//! the engine.

use std::sync::Arc;

use tracing::{debug, warn};

use crosswalk_guard_core::{
    unix_millis, CrosswalkId, CrosswalkRegistry, LeaseCoordinator, Role, SessionId, StoreError,
};

use crate::classify::CrosswalkClassifier;
use crate::dto::{ClientCommand, ServerMessage};
use crate::hub::SessionHub;
use crate::media::{parse_data_url, CaptureStore};

/// Shared application state, cloned per connection.
#[derive(Clone)]
pub struct AppState {
    /// Connected sessions and push channel
    pub hub: SessionHub,
    /// Crosswalk document operations
    pub registry: CrosswalkRegistry,
    /// Evaluation scheduling
    pub coordinator: Arc<LeaseCoordinator>,
    /// Image classification oracle
    pub classifier: Arc<dyn CrosswalkClassifier>,
    /// Capture archive
    pub captures: Arc<dyn CaptureStore>,
}

/// Handle one client command.
pub async fn handle_command(state: &AppState, sid: &SessionId, command: ClientCommand) {
    match command {
        ClientCommand::PedEnter { crosswalk_id } => {
            state.hub.set_role(sid, Role::Ped);
            if let Err(error) = state.registry.add_ped(crosswalk_id, sid).await {
                return report_store_error(state, sid, "ped_enter", &error);
            }
            replay_active_ped_alert(state, sid, crosswalk_id).await;
            request_evaluation(state, sid, crosswalk_id).await;
        }
        ClientCommand::PedLeave { crosswalk_id } => {
            if let Err(error) = state.registry.remove_ped(crosswalk_id, sid).await {
                return report_store_error(state, sid, "ped_leave", &error);
            }
            request_evaluation(state, sid, crosswalk_id).await;
        }
        ClientCommand::DriverEnter {
            crosswalk_id,
            distance,
            speed,
        } => {
            state.hub.set_role(sid, Role::Driver);
            if let Err(error) = state
                .registry
                .add_driver(crosswalk_id, sid, distance, speed)
                .await
            {
                return report_store_error(state, sid, "driver_enter", &error);
            }
            request_evaluation(state, sid, crosswalk_id).await;
        }
        ClientCommand::DriverUpdate {
            crosswalk_id,
            distance,
            speed,
        } => {
            if let Err(error) = state
                .registry
                .update_driver(crosswalk_id, sid, distance, speed)
                .await
            {
                return report_store_error(state, sid, "driver_update", &error);
            }
            request_evaluation(state, sid, crosswalk_id).await;
        }
        ClientCommand::DriverLeave { crosswalk_id } => {
            if let Err(error) = state.registry.remove_driver(crosswalk_id, sid).await {
                return report_store_error(state, sid, "driver_leave", &error);
            }
            request_evaluation(state, sid, crosswalk_id).await;
        }
        ClientCommand::Predict {
            username,
            image,
            save,
        } => predict(state, sid, username, &image, save).await,
    }
}

/// Tear down a disconnected session: scan every crosswalk, remove the sid
/// according to the role it held, and request evaluation for each
/// crosswalk actually modified.
pub async fn disconnect(state: &AppState, sid: &SessionId) {
    let Some(role) = state.hub.remove(sid) else {
        debug!(%sid, "session disconnected without entering a crosswalk");
        return;
    };

    let ids = match state.registry.list_ids().await {
        Ok(ids) => ids,
        Err(error) => {
            warn!(%sid, %error, "disconnect cleanup could not enumerate crosswalks");
            return;
        }
    };

    let mut modified = Vec::new();
    for id in ids {
        let doc = match state.registry.get(id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => continue,
            Err(error) => {
                warn!(%sid, crosswalk = %id, %error, "disconnect cleanup skipping crosswalk");
                continue;
            }
        };

        let result = match role {
            Role::Ped if doc.peds.contains(sid) => state.registry.remove_ped(id, sid).await,
            Role::Driver if doc.drivers.contains_key(sid) => {
                state.registry.remove_driver(id, sid).await
            }
            _ => continue,
        };

        match result {
            Ok(()) => modified.push(id),
            Err(error) => warn!(%sid, crosswalk = %id, %error, "disconnect cleanup failed"),
        }
    }

    for id in modified {
        if let Err(error) = state.coordinator.request_evaluation(id).await {
            warn!(crosswalk = %id, %error, "could not request evaluation after disconnect");
        }
    }
}

/// A ped joining while the aggregate alert is active gets the alert
/// immediately, without waiting for the next evaluation pass.
async fn replay_active_ped_alert(state: &AppState, sid: &SessionId, id: CrosswalkId) {
    let min_distance = match state.registry.get(id).await {
        Ok(Some(doc)) => doc.last_broadcast.ped_critical_min_distance,
        Ok(None) => None,
        Err(error) => {
            warn!(crosswalk = %id, %error, "could not check for an active alert to replay");
            None
        }
    };
    if let Some(min_distance) = min_distance {
        send(
            state,
            sid,
            ServerMessage::PedCritical {
                crosswalk_id: id,
                min_distance,
                ts: (unix_millis() / 1000) as i64,
            },
        );
    }
}

async fn predict(state: &AppState, sid: &SessionId, username: String, image: &str, save: bool) {
    let capture = match parse_data_url(image) {
        Ok(capture) => capture,
        Err(error) => {
            send(
                state,
                sid,
                ServerMessage::PredictError {
                    username,
                    message: error.to_string(),
                },
            );
            return;
        }
    };

    match state.classifier.classify(&capture.bytes, &capture.mime).await {
        Ok(is_crosswalk) => {
            send(
                state,
                sid,
                ServerMessage::PredictResult {
                    username,
                    is_crosswalk,
                },
            );
            if save {
                // Fire-and-forget: archival must never delay the reply.
                let captures = Arc::clone(&state.captures);
                tokio::spawn(async move {
                    if let Err(error) = captures.store_capture(&capture, is_crosswalk).await {
                        warn!(%error, "failed to archive capture");
                    }
                });
            }
        }
        Err(error) => {
            send(
                state,
                sid,
                ServerMessage::PredictError {
                    username,
                    message: error.to_string(),
                },
            );
        }
    }
}

async fn request_evaluation(state: &AppState, sid: &SessionId, id: CrosswalkId) {
    if let Err(error) = state.coordinator.request_evaluation(id).await {
        report_store_error(state, sid, "request_evaluation", &error);
    }
}

fn report_store_error(state: &AppState, sid: &SessionId, action: &str, error: &StoreError) {
    warn!(%sid, action, %error, "client action failed");
    send(
        state,
        sid,
        ServerMessage::Error {
            message: format!("{action} failed: {error}"),
        },
    );
}

fn send(state: &AppState, sid: &SessionId, message: ServerMessage) {
    if let Err(error) = state.hub.send(sid, message) {
        debug!(%sid, %error, "dropping reply for unreachable session");
    }
}
