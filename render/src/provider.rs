//! Provider loads transformer collections and matches them against
//! components.
//!
//! Matching is O(components × transformers). A pair matches when the
//! component carries every required label with the exact value and declares
//! every required resource and trait. A component may match several
//! transformers; each produces its own resources.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{debug, instrument};

use api::{Component, MatchEntry, MatchPlan};

use crate::{Error, Result};

/// PROVIDER_FILE is the definition file of a provider directory.
pub const PROVIDER_FILE: &str = "provider.yaml";

/// LIST_OUTPUT_ANNOTATION documents multi-resource intent on a component.
///
/// Advisory only: the executor accepts every output shape regardless.
pub const LIST_OUTPUT_ANNOTATION: &str = "transformer.opmodel.dev/list-output";

/// TransformerMetadata names a transformer.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TransformerMetadata {
    /// Name of the transformer.
    pub name: String,
    /// Version of the transformer.
    #[serde(default)]
    pub version: String,
}

/// Transformer converts matching components into platform resources.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Transformer {
    /// FQN of the transformer.
    pub fqn: String,
    /// Metadata for the transformer.
    #[serde(default)]
    pub metadata: TransformerMetadata,
    /// Required_labels must all be present with exact values.
    #[serde(default)]
    pub required_labels: BTreeMap<String, String>,
    /// Required_resources must all be declared by the component.
    #[serde(default)]
    pub required_resources: BTreeSet<String>,
    /// Required_traits must all be declared by the component.
    #[serde(default)]
    pub required_traits: BTreeSet<String>,
    /// Handles lists traits the transformer takes care of beyond the
    /// required ones.
    #[serde(default)]
    pub handles: BTreeSet<String>,
    /// Template is the transform body evaluated per match.
    pub template: String,
}

impl Transformer {
    /// Declared_traits reports every trait the transformer handles.
    pub fn declared_traits(&self) -> BTreeSet<String> {
        self.required_traits.union(&self.handles).cloned().collect()
    }

    // Match_reason reports None on a match, or why the pair does not match.
    fn match_reason(&self, c: &Component) -> Option<String> {
        for (k, v) in &self.required_labels {
            match c.metadata.labels.get(k) {
                Some(have) if have == v => {}
                Some(have) => return Some(format!("label {k}={v} required, found {k}={have}")),
                None => return Some(format!("label {k}={v} required, not present")),
            }
        }
        for fqn in &self.required_resources {
            if !c.resources.contains_key(fqn) {
                return Some(format!("resource {fqn} required, not declared"));
            }
        }
        for fqn in &self.required_traits {
            if !c.traits.contains_key(fqn) {
                return Some(format!("trait {fqn} required, not declared"));
            }
        }
        None
    }
}

// The on-disk transformer declaration.
#[derive(Deserialize)]
struct TransformerDecl {
    fqn: String,
    #[serde(default)]
    metadata: TransformerMetadata,
    #[serde(default)]
    requires: RequiresDecl,
    #[serde(default)]
    handles: BTreeSet<String>,
    template: String,
}

#[derive(Default, Deserialize)]
struct RequiresDecl {
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    resources: BTreeSet<String>,
    #[serde(default)]
    traits: BTreeSet<String>,
}

impl From<TransformerDecl> for Transformer {
    fn from(d: TransformerDecl) -> Self {
        Transformer {
            fqn: d.fqn,
            metadata: d.metadata,
            required_labels: d.requires.labels,
            required_resources: d.requires.resources,
            required_traits: d.requires.traits,
            handles: d.handles,
            template: d.template,
        }
    }
}

/// Provider is a collection of transformers for one target platform.
#[derive(Clone, Debug, Default)]
pub struct Provider {
    /// Name of the provider.
    pub name: String,
    /// Version of the provider.
    pub version: String,
    /// Transformers, ordered by FQN.
    pub transformers: Vec<Transformer>,
}

impl Provider {
    /// Load reads a provider directory: `provider.yaml` plus
    /// `transformers/*.yaml`.
    #[instrument(skip_all, fields(path = %dir.as_ref().display()))]
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Provider> {
        let dir = dir.as_ref();
        let provider_file = dir.join(PROVIDER_FILE);
        let text = fs::read_to_string(&provider_file).map_err(|_| Error::Provider {
            path: dir.to_path_buf(),
            message: format!("missing {PROVIDER_FILE}"),
        })?;
        #[derive(Deserialize)]
        struct ProviderDecl {
            metadata: TransformerMetadata,
        }
        let decl: ProviderDecl = serde_yaml::from_str(&text).map_err(|e| Error::Provider {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut transformers = Vec::new();
        let tdir = dir.join("transformers");
        if tdir.is_dir() {
            let mut files: Vec<_> = fs::read_dir(&tdir)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|e| e == "yaml" || e == "yml"))
                .collect();
            files.sort();
            for file in files {
                let text = fs::read_to_string(&file)?;
                let decl: TransformerDecl =
                    serde_yaml::from_str(&text).map_err(|e| Error::Provider {
                        path: file.clone(),
                        message: e.to_string(),
                    })?;
                transformers.push(Transformer::from(decl));
            }
        }
        transformers.sort_by(|a, b| a.fqn.cmp(&b.fqn));
        debug!(provider = decl.metadata.name, count = transformers.len(), "provider loaded");

        Ok(Provider {
            name: decl.metadata.name,
            version: decl.metadata.version,
            transformers,
        })
    }

    /// Builtin is the kubernetes provider compiled into the binary.
    pub fn builtin() -> Provider {
        let sources = [
            include_str!("builtin/configmap.yaml"),
            include_str!("builtin/deployment.yaml"),
            include_str!("builtin/service.yaml"),
            include_str!("builtin/statefulset.yaml"),
            include_str!("builtin/volume_claim.yaml"),
        ];
        let mut transformers: Vec<Transformer> = sources
            .iter()
            .map(|s| {
                let decl: TransformerDecl =
                    serde_yaml::from_str(s).expect("builtin transformer is well-formed");
                Transformer::from(decl)
            })
            .collect();
        transformers.sort_by(|a, b| a.fqn.cmp(&b.fqn));
        Provider {
            name: "kubernetes".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            transformers,
        }
    }

    /// Transformer_fqns reports the FQNs of every transformer.
    pub fn transformer_fqns(&self) -> Vec<String> {
        self.transformers.iter().map(|t| t.fqn.clone()).collect()
    }

    /// Plan matches every component against every transformer.
    ///
    /// The result is ordered by (component name, transformer FQN) and is
    /// deterministic for identical inputs.
    pub fn plan(&self, components: &IndexMap<String, Component>) -> MatchPlan {
        let mut plan = MatchPlan::default();
        let mut names: Vec<&String> = components.keys().collect();
        names.sort();

        for name in names {
            let component = &components[name.as_str()];
            let mut entries = Vec::new();
            let mut declared = BTreeSet::new();
            for t in &self.transformers {
                match t.match_reason(component) {
                    None => {
                        declared.extend(t.declared_traits());
                        entries.push(MatchEntry {
                            component: name.to_string(),
                            transformer: t.fqn.clone(),
                            matched: true,
                            reason: match_note(component),
                            unhandled_traits: Vec::new(),
                        });
                    }
                    Some(reason) => entries.push(MatchEntry {
                        component: name.to_string(),
                        transformer: t.fqn.clone(),
                        matched: false,
                        reason,
                        unhandled_traits: Vec::new(),
                    }),
                }
            }
            let unhandled: Vec<String> = component
                .trait_fqns()
                .into_iter()
                .filter(|t| !declared.contains(t))
                .collect();
            let any_match = entries.iter().any(|e| e.matched);
            for e in &mut entries {
                if e.matched {
                    e.unhandled_traits = unhandled.clone();
                }
            }
            if !any_match {
                plan.unmatched.insert(name.to_string());
            }
            plan.matches.extend(entries);
        }
        plan
    }
}

fn match_note(component: &Component) -> String {
    if component
        .metadata
        .annotations
        .get(LIST_OUTPUT_ANNOTATION)
        .is_some_and(|v| v == "true")
    {
        "all requirements satisfied (list output declared)".to_string()
    } else {
        "all requirements satisfied".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::ComponentMetadata;
    use serde_json::json;

    fn component(name: &str, labels: &[(&str, &str)], resources: &[&str], traits: &[&str]) -> Component {
        Component {
            name: name.into(),
            metadata: ComponentMetadata {
                name: name.into(),
                labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                annotations: Default::default(),
            },
            resources: resources.iter().map(|r| (r.to_string(), json!({}))).collect(),
            traits: traits.iter().map(|t| (t.to_string(), json!({}))).collect(),
            ..Default::default()
        }
    }

    fn transformer(fqn: &str, labels: &[(&str, &str)], resources: &[&str], traits: &[&str]) -> Transformer {
        Transformer {
            fqn: fqn.into(),
            required_labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            required_resources: resources.iter().map(|s| s.to_string()).collect(),
            required_traits: traits.iter().map(|s| s.to_string()).collect(),
            template: "apiVersion: v1\nkind: ConfigMap\n".into(),
            ..Default::default()
        }
    }

    fn provider(transformers: Vec<Transformer>) -> Provider {
        let mut transformers = transformers;
        transformers.sort_by(|a, b| a.fqn.cmp(&b.fqn));
        Provider {
            name: "test".into(),
            version: "0".into(),
            transformers,
        }
    }

    #[test]
    fn all_requirements_must_hold() {
        let p = provider(vec![transformer(
            "t/deploy",
            &[("workload-type", "stateless")],
            &["r/container"],
            &[],
        )]);
        let mut components = IndexMap::new();
        components.insert(
            "app".to_string(),
            component("app", &[("workload-type", "stateless")], &["r/container"], &[]),
        );
        let plan = p.plan(&components);
        assert!(plan.unmatched.is_empty());
        assert!(plan.matches[0].matched);
    }

    #[test]
    fn wrong_label_value_is_a_miss() {
        let p = provider(vec![transformer("t/deploy", &[("workload-type", "stateless")], &[], &[])]);
        let mut components = IndexMap::new();
        components.insert(
            "app".to_string(),
            component("app", &[("workload-type", "stateful")], &[], &[]),
        );
        let plan = p.plan(&components);
        assert_eq!(plan.unmatched.len(), 1);
        assert!(plan.matches[0].reason.contains("workload-type"));
    }

    #[test]
    fn multiple_transformers_can_match() {
        let p = provider(vec![
            transformer("t/deploy", &[("workload-type", "stateless")], &[], &[]),
            transformer("t/service", &[], &[], &["tr/expose"]),
        ]);
        let mut components = IndexMap::new();
        components.insert(
            "app".to_string(),
            component("app", &[("workload-type", "stateless")], &[], &["tr/expose"]),
        );
        let plan = p.plan(&components);
        let matched: Vec<_> = plan.matches.iter().filter(|e| e.matched).collect();
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn unhandled_traits_reported_per_match() {
        let p = provider(vec![transformer("t/deploy", &[("workload-type", "stateless")], &[], &[])]);
        let mut components = IndexMap::new();
        components.insert(
            "app".to_string(),
            component("app", &[("workload-type", "stateless")], &[], &["tr/exotic"]),
        );
        let plan = p.plan(&components);
        let entry = plan.matches.iter().find(|e| e.matched).unwrap();
        assert_eq!(entry.unhandled_traits, vec!["tr/exotic"]);
    }

    #[test]
    fn plan_order_is_deterministic() {
        let p = provider(vec![
            transformer("t/b", &[], &[], &[]),
            transformer("t/a", &[], &[], &[]),
        ]);
        let mut components = IndexMap::new();
        components.insert("zeta".to_string(), component("zeta", &[], &[], &[]));
        components.insert("alpha".to_string(), component("alpha", &[], &[], &[]));
        let plan = p.plan(&components);
        let pairs: Vec<_> = plan
            .matches
            .iter()
            .map(|e| (e.component.as_str(), e.transformer.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("alpha", "t/a"), ("alpha", "t/b"), ("zeta", "t/a"), ("zeta", "t/b")]
        );
    }

    #[test]
    fn builtin_provider_parses() {
        let p = Provider::builtin();
        assert!(!p.transformers.is_empty());
        assert!(p.transformer_fqns().iter().all(|f| f.starts_with("opmodel.dev/")));
    }

    #[test]
    fn load_reads_provider_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROVIDER_FILE),
            "metadata:\n  name: custom\n  version: 1.2.3\n",
        )
        .unwrap();
        let tdir = dir.path().join("transformers");
        std::fs::create_dir(&tdir).unwrap();
        std::fs::write(
            tdir.join("b.yaml"),
            "fqn: x/t/b\ntemplate: |\n  apiVersion: v1\n  kind: ConfigMap\n",
        )
        .unwrap();
        std::fs::write(
            tdir.join("a.yaml"),
            "fqn: x/t/a\nrequires:\n  labels: {tier: web}\ntemplate: |\n  apiVersion: v1\n  kind: Secret\n",
        )
        .unwrap();

        let p = Provider::load(dir.path()).unwrap();
        assert_eq!(p.name, "custom");
        assert_eq!(p.version, "1.2.3");
        assert_eq!(p.transformer_fqns(), vec!["x/t/a", "x/t/b"]);
        assert_eq!(p.transformers[0].required_labels["tier"], "web");
    }

    #[test]
    fn load_without_definition_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Provider::load(dir.path()).unwrap_err();
        assert!(matches!(err, crate::Error::Provider { .. }));
    }
}
