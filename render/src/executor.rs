//! Executor runs each matched (component, transformer) pair in a private
//! evaluation context on a bounded worker pool.
//!
//! Expression environments are not shared between threads. The main thread
//! resolves every input into a plain value snapshot; each worker builds its
//! own environment, evaluates the transform, and decodes the output into
//! neutral value trees. Passing an environment-bound value across workers
//! is an invariant violation, so none ever leaves this module's job struct.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use api::{MatchPlan, RenderError, Resource};
use modlang::env;

use crate::provider::Provider;
use crate::release::ModuleRelease;
use crate::{Error, Result};

/// ExecutionOutcome is what the collector drains from the workers.
///
/// Errors are collected, not short-circuited: every worker runs even when
/// some fail.
#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    /// Resources produced by successful transforms, unordered.
    pub resources: Vec<Resource>,
    /// Errors from failed transforms.
    pub errors: Vec<RenderError>,
}

// Job is the cross-context transport: everything a worker needs, as plain
// data.
struct Job {
    component: String,
    transformer: String,
    template: String,
    snapshot: Value,
}

/// Execute runs every matched pair of `plan` through the worker pool.
///
/// Cancellation aborts workers that have not started and returns
/// [Error::Cancelled]; it never lands in the outcome's error list.
#[instrument(skip_all, fields(release = release.metadata.name))]
pub async fn execute(
    release: &ModuleRelease,
    plan: &MatchPlan,
    provider: &Provider,
    workers: usize,
    cancel: &CancellationToken,
) -> Result<ExecutionOutcome> {
    let jobs = build_jobs(release, plan, provider);
    let total = jobs.len();
    debug!(jobs = total, workers, "starting transformer execution");

    let sem = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();
    for job in jobs {
        let sem = sem.clone();
        let cancel = cancel.clone();
        set.spawn(async move {
            let _permit = sem.acquire_owned().await.expect("semaphore never closes");
            if cancel.is_cancelled() {
                return None;
            }
            let component = job.component.clone();
            let transformer = job.transformer.clone();
            let res = tokio::task::spawn_blocking(move || run_transform(job)).await;
            Some(match res {
                Ok(Ok(objects)) => Ok((component, transformer, objects)),
                Ok(Err(message)) => Err(RenderError::Transform {
                    component,
                    transformer,
                    message,
                }),
                Err(join) => Err(RenderError::Transform {
                    component,
                    transformer,
                    message: join.to_string(),
                }),
            })
        });
    }

    let mut outcome = ExecutionOutcome::default();
    while let Some(joined) = set.join_next().await {
        match joined? {
            None => {}
            Some(Ok((component, transformer, objects))) => {
                for object in objects {
                    let mut resource = Resource::new(object, &component, &transformer);
                    match finalize(&mut resource, release) {
                        Ok(()) => outcome.resources.push(resource),
                        Err(message) => outcome.errors.push(RenderError::Transform {
                            component: component.clone(),
                            transformer: transformer.clone(),
                            message,
                        }),
                    }
                }
            }
            Some(Err(err)) => outcome.errors.push(err),
        }
    }
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    debug!(
        resources = outcome.resources.len(),
        errors = outcome.errors.len(),
        "transformer execution finished"
    );
    Ok(outcome)
}

// Build_jobs unifies inputs in the main context and snapshots them for the
// workers.
fn build_jobs(release: &ModuleRelease, plan: &MatchPlan, provider: &Provider) -> Vec<Job> {
    let module_meta =
        serde_json::to_value(&release.module.metadata).expect("module metadata serializes");
    plan.matches
        .iter()
        .filter(|e| e.matched)
        .filter_map(|entry| {
            let component = release.components.get(&entry.component)?;
            let transformer = provider.transformers.iter().find(|t| t.fqn == entry.transformer)?;
            let mut comp_value = component.value.clone();
            if let Some(map) = comp_value.as_object_mut() {
                map.insert("name".to_string(), Value::String(component.name.clone()));
            }
            let snapshot = json!({
                "component": comp_value,
                "context": {
                    "name": release.metadata.name,
                    "namespace": release.metadata.namespace,
                    "module": module_meta,
                    "componentMetadata": {
                        "name": component.metadata.name,
                        "labels": component.metadata.labels,
                        "annotations": component.metadata.annotations,
                        "resources": component.resources.keys().collect::<Vec<_>>(),
                        "traits": component.trait_fqns(),
                    },
                    "labels": tracking_labels(release, &component.name),
                },
            });
            Some(Job {
                component: entry.component.clone(),
                transformer: entry.transformer.clone(),
                template: transformer.template.clone(),
                snapshot,
            })
        })
        .collect()
}

// Run_transform is the worker body: a private environment, one render, and
// shape detection on the decoded output.
fn run_transform(job: Job) -> std::result::Result<Vec<Value>, String> {
    let environment = env::template_environment();
    let text =
        env::render_str(&environment, &job.template, &job.snapshot).map_err(|e| e.to_string())?;
    trace!(transformer = job.transformer, "transform rendered");
    decode_output(&text)
}

// Decode_output accepts the three output shapes: a single resource, a map
// of name to resource, or a list of resources.
fn decode_output(text: &str) -> std::result::Result<Vec<Value>, String> {
    let mut out = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(doc).map_err(|e| format!("output is not valid YAML: {e}"))?;
        match value {
            Value::Null => {}
            Value::Object(ref map) if map.contains_key("apiVersion") => out.push(value),
            Value::Object(map) => {
                for (name, v) in map {
                    if !v.get("apiVersion").is_some_and(Value::is_string) {
                        return Err(format!("output entry {name:?} is not a resource"));
                    }
                    out.push(v);
                }
            }
            Value::Array(items) => {
                for (i, v) in items.into_iter().enumerate() {
                    if !v.get("apiVersion").is_some_and(Value::is_string) {
                        return Err(format!("output item {i} is not a resource"));
                    }
                    out.push(v);
                }
            }
            _ => return Err("output is not a resource, map, or list".to_string()),
        }
    }
    Ok(out)
}

// Finalize propagates tracking labels into the emitted resource and fills
// the namespace for namespaced kinds.
fn finalize(resource: &mut Resource, release: &ModuleRelease) -> std::result::Result<(), String> {
    let labels = tracking_labels(release, &resource.component);
    let object = &mut resource.object;
    let namespaced = !CLUSTER_SCOPED.contains(
        &object
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default(),
    );
    let meta = object
        .as_object_mut()
        .and_then(|m| {
            m.entry("metadata".to_string())
                .or_insert_with(|| json!({}))
                .as_object_mut()
        })
        .ok_or("resource metadata is not a mapping")?;
    let slot = meta
        .entry("labels".to_string())
        .or_insert_with(|| json!({}));
    if let Some(map) = slot.as_object_mut() {
        for (k, v) in labels {
            map.insert(k, Value::String(v));
        }
    }
    if namespaced && meta.get("namespace").is_none() {
        meta.insert(
            "namespace".to_string(),
            Value::String(release.metadata.namespace.clone()),
        );
    }
    Ok(())
}

// CLUSTER_SCOPED kinds never get a namespace filled in.
const CLUSTER_SCOPED: &[&str] = &[
    "APIService",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "IngressClass",
    "MutatingWebhookConfiguration",
    "Namespace",
    "PersistentVolume",
    "PriorityClass",
    "StorageClass",
    "ValidatingWebhookConfiguration",
];

/// Tracking_labels computes the labels every resource of a release carries.
pub fn tracking_labels(release: &ModuleRelease, component: &str) -> BTreeMap<String, String> {
    let module = &release.module.metadata;
    BTreeMap::from([
        (api::k8s_label("managed-by"), api::TOOL_NAME.to_string()),
        (api::release_label("name"), release.metadata.name.clone()),
        (
            api::release_label("namespace"),
            release.metadata.namespace.clone(),
        ),
        (api::release_label("uuid"), release.metadata.uuid.to_string()),
        (api::module_label("name"), module.name.clone()),
        (api::module_label("version"), module.version.clone()),
        (api::component_label("name"), component.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_single_resource() {
        let out = decode_output("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: x\n").unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["kind"], "ConfigMap");
    }

    #[test]
    fn decode_map_of_resources() {
        let out = decode_output(
            "a:\n  apiVersion: v1\n  kind: Secret\nb:\n  apiVersion: v1\n  kind: Secret\n",
        )
        .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn decode_list_of_resources() {
        let out =
            decode_output("- apiVersion: v1\n  kind: Secret\n- apiVersion: v1\n  kind: Secret\n")
                .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn decode_multi_document() {
        let out = decode_output(
            "apiVersion: v1\nkind: Secret\n---\napiVersion: v1\nkind: ConfigMap\n",
        )
        .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn decode_rejects_non_resources() {
        assert!(decode_output("just a string\n").is_err());
        assert!(decode_output("a:\n  kind: MissingApiVersion\n").is_err());
    }

    #[test]
    fn decode_skips_empty_documents() {
        let out = decode_output("---\napiVersion: v1\nkind: Secret\n---\n").unwrap();
        assert_eq!(out.len(), 1);
    }
}
