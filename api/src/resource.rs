//! Resource holds the rendered-resource wrapper, the transformer match plan,
//! and the aggregate render result.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::meta::{ModuleMetadata, ReleaseMetadata};
use crate::weights;

/// Resource is one rendered platform object, tagged with the component and
/// transformer that produced it.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Resource {
    /// Object is the free-form resource tree with apiVersion/kind/metadata.
    pub object: Value,
    /// Component that produced the object.
    pub component: String,
    /// Transformer that produced the object.
    pub transformer: String,
}

impl Resource {
    /// New wraps an object with its provenance.
    pub fn new<C: ToString, T: ToString>(object: Value, component: C, transformer: T) -> Self {
        Resource {
            object,
            component: component.to_string(),
            transformer: transformer.to_string(),
        }
    }

    fn str_at(&self, key: &str) -> &str {
        self.object.get(key).and_then(Value::as_str).unwrap_or("")
    }

    /// Api_version reports the object's apiVersion, or "" if missing.
    pub fn api_version(&self) -> &str {
        self.str_at("apiVersion")
    }

    /// Kind reports the object's kind, or "" if missing.
    pub fn kind(&self) -> &str {
        self.str_at("kind")
    }

    /// Group reports the API group, "" for the core group.
    pub fn group(&self) -> &str {
        match self.api_version().rsplit_once('/') {
            Some((g, _)) => g,
            None => "",
        }
    }

    /// Version reports the API version without the group.
    pub fn version(&self) -> &str {
        match self.api_version().rsplit_once('/') {
            Some((_, v)) => v,
            None => self.api_version(),
        }
    }

    /// Name reports metadata.name, or "" if missing.
    pub fn name(&self) -> &str {
        self.object
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Namespace reports metadata.namespace, or "" for cluster-scoped or
    /// unset objects.
    pub fn namespace(&self) -> &str {
        self.object
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Weight reports the ordering weight from the weight table.
    pub fn weight(&self) -> i32 {
        weights::weight_for_kind(self.kind(), self.group())
    }

    /// Sort_key is the 5-tuple resources are totally ordered by.
    pub fn sort_key(&self) -> (i32, String, String, String, String) {
        (
            self.weight(),
            self.group().to_string(),
            self.kind().to_string(),
            self.namespace().to_string(),
            self.name().to_string(),
        )
    }

    /// Id reports a display identifier like `apps/v1/Deployment ns/name`.
    pub fn id(&self) -> String {
        let ns = self.namespace();
        if ns.is_empty() {
            format!("{}/{} {}", self.api_version(), self.kind(), self.name())
        } else {
            format!("{}/{} {}/{}", self.api_version(), self.kind(), ns, self.name())
        }
    }
}

/// MatchEntry records one (component, transformer) pairing decision.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct MatchEntry {
    /// Component name.
    pub component: String,
    /// Transformer FQN.
    pub transformer: String,
    /// Matched reports whether the pair matched.
    pub matched: bool,
    /// Reason is a human-readable explanation of the decision.
    pub reason: String,
    /// Unhandled_traits are traits on the component not declared by any
    /// matched transformer.
    #[serde(default)]
    pub unhandled_traits: Vec<String>,
}

/// MatchPlan is the full matching decision for a render.
///
/// `matches` is ordered by (component name, transformer FQN) so the plan is
/// deterministic for identical inputs.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct MatchPlan {
    /// Matches in deterministic order.
    pub matches: Vec<MatchEntry>,
    /// Unmatched components.
    pub unmatched: BTreeSet<String>,
}

/// RenderError is an error collected during the render phase.
///
/// Render fails on end: every worker runs and all errors are returned
/// together in [RenderResult::errors].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RenderError {
    /// UnmatchedComponent means a component matched no transformer.
    #[error("component {component:?} matched no transformer; available: {available:?}")]
    UnmatchedComponent {
        /// Component that failed to match.
        component: String,
        /// Transformer FQNs that were considered.
        available: Vec<String>,
    },
    /// Transform means a worker failed to evaluate or decode a transformer.
    #[error("transformer {transformer:?} failed for component {component:?}: {message}")]
    Transform {
        /// Component being transformed.
        component: String,
        /// Transformer that failed.
        transformer: String,
        /// Failure detail.
        message: String,
    },
    /// UnhandledTrait is promoted from a warning in strict mode.
    #[error("component {component:?} declares trait {trait_fqn:?} handled by no matched transformer")]
    UnhandledTrait {
        /// Component declaring the trait.
        component: String,
        /// The undeclared trait.
        trait_fqn: String,
    },
}

/// RenderResult is the aggregate output of a render.
///
/// `resources` is totally ordered by (weight, group, kind, namespace, name).
/// Vectors are always materialized, never conceptually nil.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RenderResult {
    /// Resources in apply order.
    pub resources: Vec<Resource>,
    /// Module the render came from.
    pub module: ModuleMetadata,
    /// Release the render is for.
    pub release: ReleaseMetadata,
    /// Match_plan records every pairing decision.
    pub match_plan: MatchPlan,
    /// Errors collected across the whole pipeline.
    #[serde(serialize_with = "ser_errors")]
    pub errors: Vec<RenderError>,
    /// Warnings collected across the whole pipeline.
    pub warnings: Vec<String>,
    /// Values the module was unified with; recorded into change entries.
    pub values: Value,
}

fn ser_errors<S: serde::Serializer>(errs: &[RenderError], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(errs.iter().map(|e| e.to_string()))
}

impl RenderResult {
    /// Ok reports whether the render produced no errors.
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Sort orders `resources` by the 5-key total order.
    pub fn sort(&mut self) {
        self.resources.sort_by_key(Resource::sort_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn res(api_version: &str, kind: &str, ns: &str, name: &str) -> Resource {
        Resource::new(
            json!({
                "apiVersion": api_version,
                "kind": kind,
                "metadata": {"name": name, "namespace": ns},
            }),
            "c",
            "t",
        )
    }

    #[test]
    fn gvk_split() {
        let r = res("apps/v1", "Deployment", "default", "web");
        assert_eq!(r.group(), "apps");
        assert_eq!(r.version(), "v1");
        let core = res("v1", "ConfigMap", "default", "cfg");
        assert_eq!(core.group(), "");
        assert_eq!(core.version(), "v1");
    }

    #[test]
    fn total_order_is_stable() {
        let mut rr = RenderResult {
            resources: vec![
                res("apps/v1", "Deployment", "default", "web"),
                res("v1", "ConfigMap", "default", "cfg"),
                res("v1", "Namespace", "", "default"),
                res("v1", "Service", "default", "web"),
                res("v1", "ConfigMap", "default", "aaa"),
            ],
            ..Default::default()
        };
        rr.sort();
        let kinds: Vec<_> = rr.resources.iter().map(|r| (r.kind(), r.name())).collect();
        assert_eq!(
            kinds,
            vec![
                ("Namespace", "default"),
                ("ConfigMap", "aaa"),
                ("ConfigMap", "cfg"),
                ("Service", "web"),
                ("Deployment", "web"),
            ]
        );
        for w in rr.resources.windows(2) {
            assert!(w[0].sort_key() <= w[1].sort_key());
        }
    }

    #[test]
    fn display_id() {
        assert_eq!(
            res("apps/v1", "Deployment", "media", "jellyfin").id(),
            "apps/v1/Deployment media/jellyfin"
        );
        let mut r = res("v1", "Namespace", "", "media");
        r.object["metadata"].as_object_mut().unwrap().remove("namespace");
        assert_eq!(r.id(), "v1/Namespace media");
    }
}
