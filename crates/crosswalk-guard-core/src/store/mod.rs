//! Document store abstraction.
//!
//! Every shared mutable resource (crosswalk documents, evaluation leases)
//! lives behind [`DocumentStore`], so the engine is correct under any
//! number of concurrently running service instances as long as the backing
//! store provides atomic create-if-absent and field-level merges. The
//! in-process [`MemoryStore`] is the single-instance variant with identical
//! external semantics.
//!
//! Updates are expressed as [`FieldPatch`]es addressing nested subfields,
//! with a distinguished remove marker and array union/remove operations,
//! so one driver's entry can be rewritten without touching its siblings.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StoreError;

/// The document collections used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Per-crosswalk presence/telemetry/hysteresis documents
    Crosswalks,
    /// Ephemeral evaluation leases, one per in-flight pass
    Leases,
}

impl Collection {
    /// Storage-level name of the collection.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Crosswalks => "crosswalks",
            Self::Leases => "leases",
        }
    }
}

/// Path of a (possibly nested) document field.
///
/// Built either from explicit segments (safe for segments that may contain
/// dots, such as session ids) or parsed from a dotted string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Build a path from explicit segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The path segments, outermost first.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for FieldPath {
    fn from(dotted: &str) -> Self {
        Self(dotted.split('.').map(str::to_owned).collect())
    }
}

/// One field-level mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    /// Set the field to the given value, creating intermediate objects
    Set(Value),
    /// Remove the field; a no-op when the field (or any ancestor) is absent
    Remove,
    /// Append the value to the array field unless already present
    ArrayUnion(Value),
    /// Remove every occurrence of the value from the array field
    ArrayRemove(Value),
}

/// A [`PatchOp`] applied at a [`FieldPath`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPatch {
    /// Field addressed by the patch
    pub path: FieldPath,
    /// Mutation to apply
    pub op: PatchOp,
}

impl FieldPatch {
    /// Set `path` to `value`.
    pub fn set(path: impl Into<FieldPath>, value: Value) -> Self {
        Self {
            path: path.into(),
            op: PatchOp::Set(value),
        }
    }

    /// Remove the field at `path`.
    pub fn remove(path: impl Into<FieldPath>) -> Self {
        Self {
            path: path.into(),
            op: PatchOp::Remove,
        }
    }

    /// Add `value` to the array at `path` if absent.
    pub fn array_union(path: impl Into<FieldPath>, value: Value) -> Self {
        Self {
            path: path.into(),
            op: PatchOp::ArrayUnion(value),
        }
    }

    /// Remove all occurrences of `value` from the array at `path`.
    pub fn array_remove(path: impl Into<FieldPath>, value: Value) -> Self {
        Self {
            path: path.into(),
            op: PatchOp::ArrayRemove(value),
        }
    }
}

/// Outcome of an atomic create-if-absent.
///
/// Existing documents are a normal outcome, not an error; lease acquisition
/// relies on exactly this distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The document was created by this call
    Created,
    /// A document already existed under the key
    AlreadyExists,
}

impl CreateOutcome {
    /// `true` when this call created the document.
    #[must_use]
    pub const fn created(self) -> bool {
        matches!(self, Self::Created)
    }
}

/// Shared, multi-instance-visible key/value document store.
///
/// Implementations do not retry; failures surface as
/// [`StoreError::Unavailable`] and the caller decides whether the operation
/// is mutation-path (propagate) or evaluation-path (log and swallow).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document, `None` when absent.
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>, StoreError>;

    /// Atomically create the document unless one already exists.
    async fn create_if_absent(
        &self,
        collection: Collection,
        key: &str,
        initial: Value,
    ) -> Result<CreateOutcome, StoreError>;

    /// Merge field-level patches into the document, creating it when absent.
    async fn update(
        &self,
        collection: Collection,
        key: &str,
        patches: &[FieldPatch],
    ) -> Result<(), StoreError>;

    /// Delete a document; returns `false` when it was already absent.
    async fn delete(&self, collection: Collection, key: &str) -> Result<bool, StoreError>;

    /// Enumerate the keys of a collection.
    async fn list_keys(&self, collection: Collection) -> Result<Vec<String>, StoreError>;
}

/// Apply one patch to a document root.
///
/// Shared by store implementations so they agree on the merge semantics:
/// `Set` and the array ops create missing intermediate objects (replacing
/// non-object intermediates), `Remove` never creates anything.
pub fn apply_patch(root: &mut Value, patch: &FieldPatch) {
    let segments = patch.path.segments();
    let Some((last, ancestors)) = segments.split_last() else {
        return;
    };

    match &patch.op {
        PatchOp::Remove => {
            let mut current = &mut *root;
            for segment in ancestors {
                match current.get_mut(segment) {
                    Some(next) => current = next,
                    None => return,
                }
            }
            if let Some(map) = current.as_object_mut() {
                map.remove(last);
            }
        }
        op => {
            let target = descend_creating(root, ancestors);
            match op {
                PatchOp::Set(value) => {
                    target.insert(last.clone(), value.clone());
                }
                PatchOp::ArrayUnion(value) => {
                    let arr = array_entry(target, last);
                    if !arr.contains(value) {
                        arr.push(value.clone());
                    }
                }
                PatchOp::ArrayRemove(value) => {
                    let arr = array_entry(target, last);
                    arr.retain(|existing| existing != value);
                }
                PatchOp::Remove => unreachable!("handled above"),
            }
        }
    }
}

fn descend_creating<'a>(root: &'a mut Value, segments: &[String]) -> &'a mut Map<String, Value> {
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    let mut current = root;
    for segment in segments {
        let map = current.as_object_mut().expect("ensured object above");
        let next = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !next.is_object() {
            *next = Value::Object(Map::new());
        }
        current = next;
    }
    current.as_object_mut().expect("ensured object above")
}

fn array_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Vec<Value> {
    let entry = map
        .entry(key.to_owned())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !entry.is_array() {
        *entry = Value::Array(Vec::new());
    }
    entry.as_array_mut().expect("ensured array above")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_creates_intermediates() {
        let mut doc = json!({});
        apply_patch(
            &mut doc,
            &FieldPatch::set(FieldPath::new(["drivers", "d1", "distance"]), json!(40.0)),
        );
        assert_eq!(doc, json!({"drivers": {"d1": {"distance": 40.0}}}));
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut doc = json!({"a": {"b": 1}});
        apply_patch(&mut doc, &FieldPatch::remove("a.c"));
        apply_patch(&mut doc, &FieldPatch::remove("x.y.z"));
        assert_eq!(doc, json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_remove_subfield() {
        let mut doc = json!({"last_broadcast": {"driver_critical_active": {"d1": 5.0, "d2": 7.0}}});
        apply_patch(
            &mut doc,
            &FieldPatch::remove(FieldPath::new([
                "last_broadcast",
                "driver_critical_active",
                "d1",
            ])),
        );
        assert_eq!(
            doc,
            json!({"last_broadcast": {"driver_critical_active": {"d2": 7.0}}})
        );
    }

    #[test]
    fn test_array_union_is_idempotent() {
        let mut doc = json!({});
        apply_patch(&mut doc, &FieldPatch::array_union("peds", json!("p1")));
        apply_patch(&mut doc, &FieldPatch::array_union("peds", json!("p1")));
        apply_patch(&mut doc, &FieldPatch::array_union("peds", json!("p2")));
        assert_eq!(doc, json!({"peds": ["p1", "p2"]}));
    }

    #[test]
    fn test_array_remove_all_occurrences() {
        let mut doc = json!({"peds": ["p1", "p2", "p1"]});
        apply_patch(&mut doc, &FieldPatch::array_remove("peds", json!("p1")));
        assert_eq!(doc, json!({"peds": ["p2"]}));
    }

    #[test]
    fn test_dotted_path_parsing() {
        let path = FieldPath::from("a.b.c");
        assert_eq!(path.segments(), ["a", "b", "c"]);
    }
}
