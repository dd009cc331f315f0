//! Release builds a concrete [ModuleRelease] from a loaded module, a
//! release name and namespace, and an ordered list of value overlays.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use api::{Component, ComponentMetadata, ModuleMetadata, ReleaseMetadata, identity};
use modlang::{ValueSet, concrete, env};

use crate::loader::Module;
use crate::{Error, Result, ValidationIssue};

/// ModuleRelease is a module bound to a release identity with unified,
/// validated values and concrete components.
///
/// Component insertion order follows declaration order, so output is
/// deterministic.
#[derive(Clone, Debug)]
pub struct ModuleRelease {
    /// Api_version of the release record.
    pub api_version: String,
    /// Kind of the release record.
    pub kind: String,
    /// Metadata identifying the release.
    pub metadata: ReleaseMetadata,
    /// Module the release was built from.
    pub module: Module,
    /// Components, concrete and in declaration order.
    pub components: IndexMap<String, Component>,
    /// Values the module was unified with.
    pub values: Value,
}

impl ModuleRelease {
    /// Module_metadata borrows the module metadata.
    pub fn module_metadata(&self) -> &ModuleMetadata {
        &self.module.metadata
    }
}

/// Build constructs the release: inject the release-metadata overlay, unify
/// values, validate against the module schema, extract concrete components.
#[instrument(skip_all, fields(module = module.metadata.name, release = name))]
pub fn build(
    module: &Module,
    name: &str,
    namespace: Option<&str>,
    values_files: &[PathBuf],
) -> Result<ModuleRelease> {
    // An empty release name falls back to the module's own name.
    let name = if name.is_empty() { &module.metadata.name } else { name };
    let namespace = namespace
        .map(str::to_string)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            (!module.metadata.default_namespace.is_empty())
                .then(|| module.metadata.default_namespace.clone())
        })
        .unwrap_or_else(|| "default".to_string());

    let uuid = identity::release_uuid(&module.metadata.fqn, name, &namespace);
    let release_meta = ReleaseMetadata {
        name: name.to_string(),
        namespace: namespace.clone(),
        uuid,
        labels: module.metadata.labels.clone(),
        annotations: Default::default(),
        components: module.metadata.components.clone(),
    };

    // Unify module defaults with the explicit overlays, in order.
    let mut values = module.defaults.clone();
    for file in values_files {
        let text = std::fs::read_to_string(file)?;
        values.merge_file(file, &text)?;
    }

    if let Some(schema) = &module.schema {
        let violations = schema.validate(values.value());
        if !violations.is_empty() {
            let issues = violations
                .into_iter()
                .map(|v| {
                    let position = values.provenance().lookup(&v.path).cloned();
                    let rooted = modlang::Violation {
                        path: format!("values.{}", v.path),
                        kind: v.kind,
                    };
                    ValidationIssue {
                        position,
                        message: rooted.to_string(),
                        path: rooted.path,
                    }
                })
                .collect();
            return Err(Error::Validation(issues));
        }
    }

    // The release-metadata overlay is built as a typed value tree and
    // unified into the evaluation scope ahead of component extraction. It
    // is scope metadata, not user values: it never passes the schema gate.
    let mut scope = ValueSet::new();
    scope.merge_synthetic(&json!({"values": values.value()}), "values");
    scope.merge_synthetic(&release_overlay(module, &release_meta), "release-metadata");
    scope.merge_synthetic(
        &json!({"module": serde_json::to_value(&module.metadata)?}),
        "module-metadata",
    );

    let components = extract_components(module, scope.value())?;
    debug!(count = components.len(), "components extracted");

    Ok(ModuleRelease {
        api_version: format!("{}/v1", api::DOMAIN),
        kind: "ModuleRelease".to_string(),
        metadata: release_meta,
        module: module.clone(),
        components,
        values: values.into_value(),
    })
}

// Release_overlay is the typed overlay tree carrying release identity into
// the evaluation scope.
fn release_overlay(module: &Module, release: &ReleaseMetadata) -> Value {
    json!({
        "release": {
            "name": release.name,
            "namespace": release.namespace,
            "fqn": module.metadata.fqn,
            "version": module.metadata.version,
            "identity": release.uuid.to_string(),
            "labels": release.labels,
        },
    })
}

// Extract_components evaluates embedded expressions in the component
// declarations and gates on concreteness.
fn extract_components(module: &Module, scope: &Value) -> Result<IndexMap<String, Component>> {
    let mut out = IndexMap::new();
    let Some(decls) = module.components_decl.as_object() else {
        return Ok(out);
    };
    let eval = env::environment();
    for (name, decl) in decls {
        let mut value = env::render_embedded(&eval, decl, scope)?;
        // The contract maps are always materialized, possibly empty.
        if let Some(map) = value.as_object_mut() {
            for key in ["labels", "annotations", "resources", "traits"] {
                map.entry(key.to_string()).or_insert_with(|| json!({}));
            }
        }

        let paths = concrete::non_concrete_paths(&value);
        if !paths.is_empty() {
            return Err(Error::NotConcrete {
                component: name.clone(),
                paths,
            });
        }

        let labels = string_map(value.get("labels"));
        let annotations = string_map(value.get("annotations"));
        let component = Component {
            name: name.clone(),
            metadata: ComponentMetadata {
                name: name.clone(),
                labels,
                annotations,
            },
            resources: fqn_map(value.get("resources")),
            traits: fqn_map(value.get("traits")),
            blueprints: fqn_map(value.get("blueprints")),
            spec: value.get("spec").cloned().unwrap_or(Value::Null),
            value,
        };
        out.insert(name.clone(), component);
    }
    Ok(out)
}

fn string_map(v: Option<&Value>) -> std::collections::BTreeMap<String, String> {
    v.and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn fqn_map(v: Option<&Value>) -> IndexMap<String, Value> {
    v.and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}
