//! One evaluation pass: read fresh, evaluate, persist, then notify.
//!
//! The pass always re-reads the document from the store rather than using
//! a snapshot passed at scheduling time — a burst of mutations while a
//! pass is in flight is observed by the next pass, never lost to a stale
//! copy. Persistence strictly precedes dispatch so state durability never
//! depends on notification delivery.

use std::sync::Arc;

use tracing::debug;

use crate::dispatch::{emit_to_sids, EventSink};
use crate::error::{CoreError, StoreError};
use crate::risk::{self, RiskConfig};
use crate::store::{Collection, DocumentStore};
use crate::types::{unix_millis, CrosswalkDoc, CrosswalkId};

/// Runs evaluation passes against the store and the push channel.
pub struct EvalEngine {
    store: Arc<dyn DocumentStore>,
    sink: Arc<dyn EventSink>,
    config: RiskConfig,
}

impl EvalEngine {
    /// Create an engine.
    pub fn new(store: Arc<dyn DocumentStore>, sink: Arc<dyn EventSink>, config: RiskConfig) -> Self {
        Self {
            store,
            sink,
            config,
        }
    }

    /// The evaluator configuration.
    #[must_use]
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Run one pass for a crosswalk. A vanished document is a silent no-op.
    pub async fn run_pass(&self, id: CrosswalkId) -> Result<(), CoreError> {
        let key = id.to_string();
        let Some(value) = self.store.get(Collection::Crosswalks, &key).await? else {
            return Ok(());
        };
        let doc: CrosswalkDoc = serde_json::from_value(value)
            .map_err(|e| StoreError::serialization(key.clone(), e.to_string()))?;

        let evaluation = risk::evaluate(id, &doc, unix_millis(), &self.config);

        if !evaluation.patches.is_empty() {
            self.store
                .update(Collection::Crosswalks, &key, &evaluation.patches)
                .await?;
        }

        debug!(
            crosswalk = %id,
            patches = evaluation.patches.len(),
            notifications = evaluation.notifications.len(),
            "evaluation pass complete"
        );

        for notification in &evaluation.notifications {
            emit_to_sids(self.sink.as_ref(), &notification.to, &notification.event).await;
        }

        Ok(())
    }
}
