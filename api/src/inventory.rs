//! Inventory holds the cluster-persisted record types for a release: which
//! resources belong to it and the bounded history of changes.
//!
//! The serialized field names are a compatibility contract; they must not
//! change across tool versions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::meta::{ModuleMetadata, ReleaseMetadata};
use crate::resource::Resource;

/// MAX_HISTORY is the default bound on retained change entries.
///
/// Secrets cap out at 1 MiB in etcd; ten change entries at a few KiB each
/// stay well below that.
pub const MAX_HISTORY: usize = 10;

/// Entry identifies one tracked resource.
///
/// An entry is unique within a change by (apiVersion, kind, namespace, name).
#[derive(Clone, Debug, Default, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Api_version of the tracked resource.
    pub api_version: String,
    /// Kind of the tracked resource.
    pub kind: String,
    /// Namespace of the tracked resource ("" for cluster-scoped).
    #[serde(default)]
    pub namespace: String,
    /// Name of the tracked resource.
    pub name: String,
    /// Component the resource belongs to.
    #[serde(default)]
    pub component: String,
    /// Transformer that produced the resource.
    #[serde(default)]
    pub transformer: String,
}

impl Entry {
    /// Key is the identity tuple entries are compared by.
    pub fn key(&self) -> (&str, &str, &str, &str) {
        (&self.api_version, &self.kind, &self.namespace, &self.name)
    }
}

impl From<&Resource> for Entry {
    fn from(r: &Resource) -> Self {
        Entry {
            api_version: r.api_version().to_string(),
            kind: r.kind().to_string(),
            namespace: r.namespace().to_string(),
            name: r.name().to_string(),
            component: r.component.clone(),
            transformer: r.transformer.clone(),
        }
    }
}

/// ChangeSource records where a change came from.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSource {
    /// Path of the module directory.
    pub path: String,
    /// Version of the module.
    pub version: String,
    /// Release_name the change was applied under.
    pub release_name: String,
}

/// ChangeEntry is one apply event.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ChangeEntry {
    /// Id is the content-and-source-derived short hex ID.
    pub id: String,
    /// Timestamp of the apply, RFC 3339.
    pub timestamp: String,
    /// Source of the change.
    pub source: ChangeSource,
    /// Values the module was rendered with.
    #[serde(default)]
    pub values: Value,
    /// Digest of the rendered manifest set.
    pub digest: String,
    /// Inventory tracked by this change.
    pub inventory: EntrySet,
}

/// EntrySet wraps the tracked entries of one change.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct EntrySet {
    /// Entries tracked by the change.
    #[serde(default)]
    pub entries: Vec<Entry>,
}

/// Inventory is the persisted body of the inventory Secret.
///
/// Invariants: `index[0]` is the most recent change; `index.len() <=`
/// the history bound; every id in `index` keys into `changes`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Inventory {
    /// Release the inventory belongs to.
    #[serde(rename = "ReleaseMetadata")]
    pub release: ReleaseMetadata,
    /// Module the release was created from.
    #[serde(rename = "ModuleMetadata")]
    pub module: ModuleMetadata,
    /// Index of change IDs, most recent first.
    #[serde(rename = "Index", default)]
    pub index: Vec<String>,
    /// Changes keyed by change ID.
    #[serde(rename = "Changes", default)]
    pub changes: BTreeMap<String, ChangeEntry>,
    /// Resource_version captured from the cluster on read.
    ///
    /// Set only by a read, never by construction; used for optimistic
    /// concurrency on write.
    #[serde(skip)]
    resource_version: Option<String>,
}

impl Inventory {
    /// Latest reports the most recent change, if any.
    pub fn latest(&self) -> Option<&ChangeEntry> {
        self.index.first().and_then(|id| self.changes.get(id))
    }

    /// Record inserts a change at the front of the index and prunes history
    /// beyond `max_history`.
    ///
    /// Re-recording the current change ID is idempotent: the entry's
    /// timestamp is refreshed and the ID moves to the front without growing
    /// the index.
    pub fn record(&mut self, change: ChangeEntry, max_history: usize) {
        let id = change.id.clone();
        self.index.retain(|i| *i != id);
        self.index.insert(0, id.clone());
        self.changes.insert(id, change);
        while self.index.len() > max_history {
            if let Some(old) = self.index.pop() {
                self.changes.remove(&old);
            }
        }
    }

    /// Resource_version reports the version captured by the last read.
    pub fn resource_version(&self) -> Option<&str> {
        self.resource_version.as_deref()
    }

    /// Set_resource_version records the version observed by a read.
    pub fn set_resource_version<S: ToString>(&mut self, rv: S) {
        self.resource_version = Some(rv.to_string());
    }
}

/// Stale_entries reports entries in `prev` that are absent from `current`,
/// keyed by (apiVersion, kind, namespace, name).
///
/// An entry whose (kind, namespace, name) appears in `current` under a
/// different component is excluded: that is a component rename, not a
/// deletion.
pub fn stale_entries(prev: &[Entry], current: &[Entry]) -> Vec<Entry> {
    prev.iter()
        .filter(|p| !current.iter().any(|c| c.key() == p.key()))
        .filter(|p| {
            !current.iter().any(|c| {
                c.kind == p.kind
                    && c.namespace == p.namespace
                    && c.name == p.name
                    && c.component != p.component
            })
        })
        .cloned()
        .collect()
}
