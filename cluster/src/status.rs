//! Status reads a release's health from its inventory: per-entry GET plus
//! per-kind readiness rules.

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::apply::entry_id;
use crate::dynamic::DynamicApi;
use crate::inventory::InventoryApi;
use crate::{Error, Result};

/// Health is the evaluated state of one tracked resource.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum Health {
    /// Ready per the kind's rule.
    Ready,
    /// Degraded with a reason.
    Degraded(String),
    /// Missing from the cluster.
    Missing,
}

/// EntryStatus pairs a tracked entry with its health.
#[derive(Clone, Debug, Serialize)]
pub struct EntryStatus {
    /// Resource display identifier.
    pub resource: String,
    /// Component the resource belongs to.
    pub component: String,
    /// Evaluated health.
    pub health: Health,
}

/// Aggregate is the whole-release health.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    /// Every entry is ready.
    Ready,
    /// At least one entry is degraded.
    Degraded,
    /// Entries are missing (and none degraded).
    Missing,
}

/// StatusReport is the health report for a release.
#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    /// Release name.
    pub release: String,
    /// Namespace read from.
    pub namespace: String,
    /// Per-entry health.
    pub entries: Vec<EntryStatus>,
    /// Whole-release health.
    pub aggregate: Aggregate,
}

/// Run evaluates the health of every entry tracked by the inventory.
#[instrument(skip(client, cancel))]
pub async fn run(
    client: kube::Client,
    release_name: &str,
    namespace: &str,
    uuid: Option<&Uuid>,
    cancel: &CancellationToken,
) -> Result<StatusReport> {
    let inventory_api = InventoryApi::new(client.clone(), namespace);
    let Some(inventory) = inventory_api.read(release_name, uuid).await? else {
        return Err(Error::ReleaseNotFound {
            name: release_name.to_string(),
            namespace: namespace.to_string(),
        });
    };

    let entries = inventory
        .latest()
        .map(|c| c.inventory.entries.clone())
        .unwrap_or_default();
    let dynamic = DynamicApi::new(client).await?;

    let mut out = Vec::new();
    for entry in &entries {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let health = match dynamic.api_for_entry(entry) {
            Err(Error::UnknownKind { .. }) => Health::Missing,
            Err(err) => return Err(err),
            Ok(api) => match api.get_opt(&entry.name).await? {
                None => Health::Missing,
                Some(obj) => evaluate(&entry.kind, &serde_json::to_value(&obj)?),
            },
        };
        out.push(EntryStatus {
            resource: entry_id(entry),
            component: entry.component.clone(),
            health,
        });
    }

    let aggregate = aggregate(&out);
    debug!(?aggregate, entries = out.len(), "status read");
    Ok(StatusReport {
        release: release_name.to_string(),
        namespace: namespace.to_string(),
        entries: out,
        aggregate,
    })
}

fn aggregate(entries: &[EntryStatus]) -> Aggregate {
    if entries.iter().all(|e| e.health == Health::Ready) {
        Aggregate::Ready
    } else if entries
        .iter()
        .any(|e| matches!(e.health, Health::Degraded(_)))
    {
        Aggregate::Degraded
    } else {
        Aggregate::Missing
    }
}

/// Evaluate applies the per-kind readiness rule to a live object.
pub fn evaluate(kind: &str, object: &Value) -> Health {
    match kind {
        "ConfigMap" | "Secret" | "ServiceAccount" | "Namespace" => Health::Ready,
        "Deployment" | "StatefulSet" => replica_health(object),
        // The replica rule, through the DaemonSet's own count fields: a
        // DaemonSet has no spec.replicas, the scheduler derives the
        // desired count.
        "DaemonSet" => {
            let desired = object
                .pointer("/status/desiredNumberScheduled")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let ready = object
                .pointer("/status/numberReady")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            if ready == desired {
                Health::Ready
            } else {
                Health::Degraded(format!("{ready}/{desired} ready"))
            }
        }
        "Pod" => pod_health(object),
        "Job" => {
            let succeeded = object
                .pointer("/status/succeeded")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            if succeeded > 0 {
                Health::Ready
            } else {
                Health::Degraded("no completions".to_string())
            }
        }
        _ => condition_health(object),
    }
}

// Replica_health: ready when status.readyReplicas matches spec.replicas.
fn replica_health(object: &Value) -> Health {
    let want = object
        .pointer("/spec/replicas")
        .and_then(Value::as_i64)
        .unwrap_or(1);
    let ready = object
        .pointer("/status/readyReplicas")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if ready == want {
        Health::Ready
    } else {
        Health::Degraded(format!("{ready}/{want} replicas ready"))
    }
}

// Pod_health: Running with every condition true.
fn pod_health(object: &Value) -> Health {
    let phase = object
        .pointer("/status/phase")
        .and_then(Value::as_str)
        .unwrap_or("Unknown");
    if phase != "Running" {
        return Health::Degraded(format!("phase {phase}"));
    }
    let all_true = object
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(|conds| {
            conds
                .iter()
                .all(|c| c.get("status").and_then(Value::as_str) == Some("True"))
        })
        .unwrap_or(false);
    if all_true {
        Health::Ready
    } else {
        Health::Degraded("conditions not all true".to_string())
    }
}

// Condition_health: unknown kinds are ready when a Ready or Available
// condition is true, or merely by existing when they have no conditions.
fn condition_health(object: &Value) -> Health {
    let Some(conds) = object.pointer("/status/conditions").and_then(Value::as_array) else {
        return Health::Ready;
    };
    let relevant = conds.iter().filter(|c| {
        matches!(
            c.get("type").and_then(Value::as_str),
            Some("Ready") | Some("Available")
        )
    });
    for c in relevant {
        if c.get("status").and_then(Value::as_str) != Some("True") {
            return Health::Degraded(format!(
                "condition {} is {}",
                c.get("type").and_then(Value::as_str).unwrap_or("?"),
                c.get("status").and_then(Value::as_str).unwrap_or("Unknown"),
            ));
        }
    }
    Health::Ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_kinds_always_ready() {
        assert_eq!(evaluate("ConfigMap", &json!({})), Health::Ready);
        assert_eq!(evaluate("Secret", &json!({})), Health::Ready);
    }

    #[test]
    fn deployment_readiness_tracks_replicas() {
        let ready = json!({"spec": {"replicas": 2}, "status": {"readyReplicas": 2}});
        assert_eq!(evaluate("Deployment", &ready), Health::Ready);
        let degraded = json!({"spec": {"replicas": 3}, "status": {"readyReplicas": 1}});
        assert!(matches!(evaluate("Deployment", &degraded), Health::Degraded(_)));
    }

    #[test]
    fn daemonset_readiness_tracks_scheduled_nodes() {
        let ready = json!({"status": {"desiredNumberScheduled": 3, "numberReady": 3}});
        assert_eq!(evaluate("DaemonSet", &ready), Health::Ready);
        let degraded = json!({"status": {"desiredNumberScheduled": 3, "numberReady": 1}});
        assert!(matches!(evaluate("DaemonSet", &degraded), Health::Degraded(_)));
    }

    #[test]
    fn pod_requires_running_and_conditions() {
        let running = json!({"status": {
            "phase": "Running",
            "conditions": [{"type": "Ready", "status": "True"}],
        }});
        assert_eq!(evaluate("Pod", &running), Health::Ready);
        let pending = json!({"status": {"phase": "Pending"}});
        assert!(matches!(evaluate("Pod", &pending), Health::Degraded(_)));
    }

    #[test]
    fn unknown_kind_uses_conditions() {
        let ok = json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}});
        assert_eq!(evaluate("Widget", &ok), Health::Ready);
        let bad = json!({"status": {"conditions": [{"type": "Ready", "status": "False"}]}});
        assert!(matches!(evaluate("Widget", &bad), Health::Degraded(_)));
        // No conditions at all: existing is enough.
        assert_eq!(evaluate("Widget", &json!({})), Health::Ready);
    }

    #[test]
    fn aggregate_rules() {
        let mk = |health| EntryStatus {
            resource: "r".into(),
            component: "c".into(),
            health,
        };
        assert_eq!(aggregate(&[mk(Health::Ready)]), Aggregate::Ready);
        assert_eq!(
            aggregate(&[mk(Health::Ready), mk(Health::Degraded("x".into()))]),
            Aggregate::Degraded
        );
        assert_eq!(
            aggregate(&[mk(Health::Ready), mk(Health::Missing)]),
            Aggregate::Missing
        );
    }
}
