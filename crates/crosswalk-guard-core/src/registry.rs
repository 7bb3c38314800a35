//! Typed operations over crosswalk documents.
//!
//! All mutations are direct store writes with no caching; the document is
//! the single source of truth. Crosswalks are created implicitly on first
//! join and never deleted here. Because drivers are stored as a map keyed
//! by session id, concurrent writers to different drivers patch disjoint
//! subfields and cannot clobber each other.

use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use crate::error::StoreError;
use crate::store::{Collection, DocumentStore, FieldPatch, FieldPath};
use crate::types::{unix_millis, CrosswalkDoc, CrosswalkId, SessionId};

/// Registry of crosswalk presence and telemetry.
#[derive(Clone)]
pub struct CrosswalkRegistry {
    store: Arc<dyn DocumentStore>,
}

impl CrosswalkRegistry {
    /// Create a registry over the given store.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Add a pedestrian; creates the crosswalk when absent, no-op when the
    /// sid is already present.
    pub async fn add_ped(&self, id: CrosswalkId, sid: &SessionId) -> Result<(), StoreError> {
        self.ensure_exists(id).await?;
        self.store
            .update(
                Collection::Crosswalks,
                &id.to_string(),
                &[FieldPatch::array_union("peds", json!(sid))],
            )
            .await
    }

    /// Remove a pedestrian; no-op when the sid or crosswalk is absent.
    pub async fn remove_ped(&self, id: CrosswalkId, sid: &SessionId) -> Result<(), StoreError> {
        if self.get(id).await?.is_none() {
            return Ok(());
        }
        self.store
            .update(
                Collection::Crosswalks,
                &id.to_string(),
                &[FieldPatch::array_remove("peds", json!(sid))],
            )
            .await
    }

    /// Add or overwrite a driver entry, stamping the current time.
    pub async fn add_driver(
        &self,
        id: CrosswalkId,
        sid: &SessionId,
        distance: f64,
        speed: Option<f64>,
    ) -> Result<(), StoreError> {
        self.ensure_exists(id).await?;
        let mut entry = json!({ "distance": distance, "ts": unix_millis() });
        if let Some(speed) = speed {
            entry["speed"] = json!(speed);
        }
        self.store
            .update(
                Collection::Crosswalks,
                &id.to_string(),
                &[FieldPatch::set(
                    FieldPath::new(["drivers", sid.as_str()]),
                    entry,
                )],
            )
            .await
    }

    /// Update an existing driver's distance (and speed, when provided —
    /// an omitted speed preserves the stored one). No-op when the driver
    /// entry does not exist.
    pub async fn update_driver(
        &self,
        id: CrosswalkId,
        sid: &SessionId,
        distance: f64,
        speed: Option<f64>,
    ) -> Result<(), StoreError> {
        let Some(doc) = self.get(id).await? else {
            return Ok(());
        };
        if !doc.drivers.contains_key(sid) {
            return Ok(());
        }

        let mut patches = vec![
            FieldPatch::set(
                FieldPath::new(["drivers", sid.as_str(), "distance"]),
                json!(distance),
            ),
            FieldPatch::set(
                FieldPath::new(["drivers", sid.as_str(), "ts"]),
                json!(unix_millis()),
            ),
        ];
        if let Some(speed) = speed {
            patches.push(FieldPatch::set(
                FieldPath::new(["drivers", sid.as_str(), "speed"]),
                json!(speed),
            ));
        }
        self.store
            .update(Collection::Crosswalks, &id.to_string(), &patches)
            .await
    }

    /// Remove a driver entry together with its hysteresis state, so a
    /// future driver reusing the sid starts disarmed.
    pub async fn remove_driver(&self, id: CrosswalkId, sid: &SessionId) -> Result<(), StoreError> {
        if self.get(id).await?.is_none() {
            return Ok(());
        }
        self.store
            .update(
                Collection::Crosswalks,
                &id.to_string(),
                &[
                    FieldPatch::remove(FieldPath::new(["drivers", sid.as_str()])),
                    FieldPatch::remove(FieldPath::new([
                        "last_broadcast",
                        "driver_critical_active",
                        sid.as_str(),
                    ])),
                ],
            )
            .await
    }

    /// Fetch and decode a crosswalk document.
    pub async fn get(&self, id: CrosswalkId) -> Result<Option<CrosswalkDoc>, StoreError> {
        let key = id.to_string();
        match self.store.get(Collection::Crosswalks, &key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StoreError::serialization(key, e.to_string())),
            None => Ok(None),
        }
    }

    /// Enumerate all known crosswalk ids, skipping malformed keys.
    pub async fn list_ids(&self) -> Result<Vec<CrosswalkId>, StoreError> {
        let keys = self.store.list_keys(Collection::Crosswalks).await?;
        let mut ids = Vec::with_capacity(keys.len());
        for key in keys {
            match key.parse() {
                Ok(id) => ids.push(id),
                Err(_) => warn!(key, "skipping malformed crosswalk key"),
            }
        }
        Ok(ids)
    }

    async fn ensure_exists(&self, id: CrosswalkId) -> Result<(), StoreError> {
        // AlreadyExists is the common case after the first join.
        self.store
            .create_if_absent(
                Collection::Crosswalks,
                &id.to_string(),
                CrosswalkDoc::skeleton(),
            )
            .await
            .map(|_| ())
    }
}
