//! Diff compares rendered resources against live cluster state.
//!
//! Live objects are stripped of server-managed fields and then projected
//! onto the field-path tree of the rendered object: the rendered object is
//! the template for what this tool owns, which handles the zero state and
//! survives field additions and removals without a skip list.

use serde::Serialize;
use serde_json::Value;
use similar::TextDiff;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use render::{Pipeline, RenderRequest};

use crate::dynamic::DynamicApi;
use crate::inventory::{InventoryApi, canonical};
use crate::{Error, Result};

/// DiffClass classifies one resource's comparison.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffClass {
    /// Unchanged: projected live equals rendered.
    Unchanged,
    /// Modified: projected live differs from rendered.
    Modified,
    /// Added: rendered but not live.
    Added,
    /// Orphaned: tracked in inventory but no longer rendered.
    Orphaned,
}

/// DiffEntry is the comparison result for one resource.
#[derive(Clone, Debug, Serialize)]
pub struct DiffEntry {
    /// Resource display identifier.
    pub resource: String,
    /// Classification.
    pub class: DiffClass,
    /// Unified diff text for modified resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// DiffReport is the whole comparison.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DiffReport {
    /// Release name.
    pub release: String,
    /// Namespace compared against.
    pub namespace: String,
    /// Entries, in render order followed by orphans.
    pub entries: Vec<DiffEntry>,
}

impl DiffReport {
    /// Clean reports whether nothing differs.
    pub fn clean(&self) -> bool {
        self.entries.iter().all(|e| e.class == DiffClass::Unchanged)
    }

    /// Summary renders the one-line result.
    pub fn summary(&self) -> String {
        if self.clean() {
            return "No differences found".to_string();
        }
        let count = |class| self.entries.iter().filter(|e| e.class == class).count();
        format!(
            "{} modified, {} added, {} orphaned",
            count(DiffClass::Modified),
            count(DiffClass::Added),
            count(DiffClass::Orphaned),
        )
    }
}

/// Run renders the module and diffs it against live state.
///
/// Without an inventory every rendered resource is an addition and nothing
/// is orphaned.
#[instrument(skip_all, fields(release = req.release_name))]
pub async fn run(
    client: kube::Client,
    pipeline: &Pipeline,
    req: &RenderRequest,
    cancel: &CancellationToken,
) -> Result<DiffReport> {
    let result = pipeline.render(req, cancel).await?;
    if !result.ok() {
        return Err(Error::RenderFailed(
            result.errors.iter().map(|e| e.to_string()).collect(),
        ));
    }

    let mut report = DiffReport {
        release: result.release.name.clone(),
        namespace: result.release.namespace.clone(),
        ..Default::default()
    };

    let inventory_api = InventoryApi::new(client.clone(), &result.release.namespace);
    let inventory = inventory_api
        .read(&result.release.name, Some(&result.release.uuid))
        .await?;
    let dynamic = DynamicApi::new(client).await?;

    for resource in &result.resources {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let api = dynamic.api_for_resource(resource)?;
        let live = api.get_opt(resource.name()).await?;
        let entry = match live {
            None => DiffEntry {
                resource: resource.id(),
                class: DiffClass::Added,
                diff: None,
            },
            Some(obj) => {
                let mut live = serde_json::to_value(&obj)?;
                strip(&mut live);
                let mut projected = project(&live, &resource.object);
                prune_empty(&mut projected);
                let mut rendered = resource.object.clone();
                prune_empty(&mut rendered);
                if canonical(&projected) == canonical(&rendered) {
                    DiffEntry {
                        resource: resource.id(),
                        class: DiffClass::Unchanged,
                        diff: None,
                    }
                } else {
                    DiffEntry {
                        resource: resource.id(),
                        class: DiffClass::Modified,
                        diff: Some(unified(&projected, &rendered)?),
                    }
                }
            }
        };
        report.entries.push(entry);
    }

    // Entries tracked by the inventory but absent from the render are
    // orphan candidates; they will be pruned by the next apply. Live state
    // is discovered per entry: ones already gone from the cluster are
    // elided, not reported.
    if let Some(change) = inventory.as_ref().and_then(|inv| inv.latest()) {
        for entry in &change.inventory.entries {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let still_rendered = result.resources.iter().any(|r| {
                r.api_version() == entry.api_version
                    && r.kind() == entry.kind
                    && r.namespace() == entry.namespace
                    && r.name() == entry.name
            });
            if still_rendered {
                continue;
            }
            let live = match dynamic.api_for_entry(entry) {
                // The whole kind is gone (CRD deleted): nothing live.
                Err(Error::UnknownKind { .. }) => None,
                Err(err) => return Err(err),
                Ok(api) => api.get_opt(&entry.name).await?,
            };
            if live.is_some() {
                report.entries.push(DiffEntry {
                    resource: crate::apply::entry_id(entry),
                    class: DiffClass::Orphaned,
                    diff: None,
                });
            }
        }
    }

    debug!(summary = report.summary(), "diff complete");
    Ok(report)
}

/// Strip removes the server-managed fields a live object always carries.
pub fn strip(live: &mut Value) {
    if let Some(obj) = live.as_object_mut() {
        obj.remove("status");
        if let Some(meta) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
            for field in [
                "managedFields",
                "uid",
                "resourceVersion",
                "creationTimestamp",
                "generation",
            ] {
                meta.remove(field);
            }
        }
    }
}

/// Project restricts `live` to the field-path tree of `rendered`.
///
/// Maps recurse; lists of maps match elements on a `name` field with a
/// positional fallback; scalars are retained as-is. Keys present in live
/// but absent from rendered are dropped.
pub fn project(live: &Value, rendered: &Value) -> Value {
    match (live, rendered) {
        (Value::Object(l), Value::Object(r)) => {
            let mut out = serde_json::Map::new();
            for (k, rv) in r {
                if let Some(lv) = l.get(k) {
                    out.insert(k.clone(), project(lv, rv));
                }
            }
            Value::Object(out)
        }
        (Value::Array(l), Value::Array(r)) => {
            let mut out = Vec::new();
            for (i, rv) in r.iter().enumerate() {
                let matched = match rv.get("name").and_then(Value::as_str) {
                    Some(name) => l
                        .iter()
                        .find(|lv| lv.get("name").and_then(Value::as_str) == Some(name)),
                    None => l.get(i),
                };
                if let Some(lv) = matched {
                    out.push(project(lv, rv));
                }
            }
            Value::Array(out)
        }
        (lv, _) => lv.clone(),
    }
}

/// Prune_empty removes empty maps left behind by projection, so an
/// `annotations: {}` mismatch never shows as a difference.
pub fn prune_empty(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for v in map.values_mut() {
                prune_empty(v);
            }
            map.retain(|_, v| !v.as_object().is_some_and(|m| m.is_empty()));
        }
        Value::Array(items) => {
            for v in items {
                prune_empty(v);
            }
        }
        _ => {}
    }
}

// Unified renders a line diff of the two projected trees as YAML.
fn unified(live: &Value, rendered: &Value) -> Result<String> {
    let old = serde_yaml::to_string(&canonical(live))?;
    let new = serde_yaml::to_string(&canonical(rendered))?;
    let diff = TextDiff::from_lines(&old, &new);
    Ok(diff
        .unified_diff()
        .context_radius(3)
        .header("live", "rendered")
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strip_removes_server_fields() {
        let mut live = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "x",
                "uid": "123",
                "resourceVersion": "42",
                "creationTimestamp": "2026-01-01T00:00:00Z",
                "generation": 2,
                "managedFields": [{"manager": "opm"}],
                "labels": {"a": "b"},
            },
            "status": {"phase": "Bound"},
            "data": {"k": "v"},
        });
        strip(&mut live);
        assert!(live.get("status").is_none());
        let meta = live.pointer("/metadata").unwrap();
        assert!(meta.get("uid").is_none());
        assert!(meta.get("resourceVersion").is_none());
        assert!(meta.get("managedFields").is_none());
        assert_eq!(meta.pointer("/labels/a").unwrap(), "b");
    }

    #[test]
    fn project_drops_fields_not_rendered() {
        let rendered = json!({"spec": {"replicas": 1, "selector": {"app": "x"}}});
        let live = json!({
            "spec": {
                "replicas": 1,
                "selector": {"app": "x"},
                "progressDeadlineSeconds": 600,
                "strategy": {"type": "RollingUpdate"},
            },
            "extra": true,
        });
        let p = project(&live, &rendered);
        assert_eq!(p, json!({"spec": {"replicas": 1, "selector": {"app": "x"}}}));
    }

    #[test]
    fn project_matches_list_elements_by_name() {
        let rendered = json!({"containers": [{"name": "app", "image": "nginx:1"}]});
        let live = json!({"containers": [
            {"name": "sidecar", "image": "envoy"},
            {"name": "app", "image": "nginx:2", "imagePullPolicy": "Always"},
        ]});
        let p = project(&live, &rendered);
        assert_eq!(p, json!({"containers": [{"name": "app", "image": "nginx:2"}]}));
    }

    #[test]
    fn project_falls_back_to_position() {
        let rendered = json!({"args": ["a", "b"]});
        let live = json!({"args": ["a", "c", "d"]});
        let p = project(&live, &rendered);
        assert_eq!(p, json!({"args": ["a", "c"]}));
    }

    #[test]
    fn prune_empty_removes_empty_maps() {
        let mut v = json!({"metadata": {"annotations": {}, "labels": {"a": "b"}}, "spec": {}});
        prune_empty(&mut v);
        assert_eq!(v, json!({"metadata": {"labels": {"a": "b"}}}));
    }

    #[test]
    fn projection_eliminates_server_noise() {
        // A freshly applied object plus server noise projects to exactly
        // the rendered tree.
        let rendered = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "cfg", "namespace": "default", "labels": {"x": "y"}},
            "data": {"k": "v"},
        });
        let mut live = rendered.clone();
        live["metadata"]["uid"] = json!("u-1");
        live["metadata"]["resourceVersion"] = json!("7");
        live["metadata"]["creationTimestamp"] = json!("2026-01-01T00:00:00Z");
        live["metadata"]["managedFields"] = json!([{"manager": "opm"}]);
        live["metadata"]["annotations"] =
            json!({"kubectl.kubernetes.io/last-applied-configuration": "{}"});
        strip(&mut live);
        let mut projected = project(&live, &rendered);
        prune_empty(&mut projected);
        assert_eq!(canonical(&projected), canonical(&rendered));
    }

    #[test]
    fn summary_lines() {
        let mut report = DiffReport::default();
        report.entries.push(DiffEntry {
            resource: "v1/ConfigMap default/x".into(),
            class: DiffClass::Unchanged,
            diff: None,
        });
        assert_eq!(report.summary(), "No differences found");
        report.entries.push(DiffEntry {
            resource: "v1/Service default/y".into(),
            class: DiffClass::Modified,
            diff: Some(String::new()),
        });
        report.entries.push(DiffEntry {
            resource: "v1/Secret default/z".into(),
            class: DiffClass::Orphaned,
            diff: None,
        });
        assert_eq!(report.summary(), "1 modified, 0 added, 1 orphaned");
    }
}
