//! Meta holds module, release and component metadata types.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// ModuleMetadata is the evaluated metadata of a module.
///
/// Every scalar field is concrete after a successful load; `components`
/// lists the component names in declaration order.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMetadata {
    /// Name is the module's short name.
    pub name: String,
    /// Default_namespace is used when a release does not name one.
    #[serde(default)]
    pub default_namespace: String,
    /// FQN is the module's fully qualified name.
    pub fqn: String,
    /// Version is the module version.
    pub version: String,
    /// UUID identifies the module.
    pub uuid: Uuid,
    /// Labels declared on the module.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Components declared by the module, in declaration order.
    #[serde(default)]
    pub components: Vec<String>,
}

/// ReleaseMetadata identifies one deployed instance of a module.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseMetadata {
    /// Name of the release.
    pub name: String,
    /// Namespace the release lives in.
    pub namespace: String,
    /// UUID is deterministic for a (module FQN, name, namespace) triple.
    pub uuid: Uuid,
    /// Labels for the release.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations for the release.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Components included in the release, in declaration order.
    #[serde(default)]
    pub components: Vec<String>,
}

/// ComponentMetadata is the per-component slice of metadata a transformer
/// sees.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ComponentMetadata {
    /// Name of the component.
    pub name: String,
    /// Labels on the component, matched against transformer requirements.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations on the component.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Component is a named logical piece of a module.
///
/// `resources` and `traits` describe the component's contract to
/// transformers and are always materialized maps, possibly empty.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Component {
    /// Name of the component.
    pub name: String,
    /// Metadata for the component.
    pub metadata: ComponentMetadata,
    /// Resources declared by the component, keyed by FQN.
    #[serde(default)]
    pub resources: IndexMap<String, Value>,
    /// Traits declared by the component, keyed by FQN.
    #[serde(default)]
    pub traits: IndexMap<String, Value>,
    /// Blueprints declared by the component, keyed by FQN.
    #[serde(default)]
    pub blueprints: IndexMap<String, Value>,
    /// Spec is the component's own specification subtree.
    #[serde(default)]
    pub spec: Value,
    /// Value is the component's complete evaluated value.
    #[serde(default)]
    pub value: Value,
}

impl Component {
    /// Trait_fqns reports the FQNs of the component's declared traits.
    pub fn trait_fqns(&self) -> Vec<String> {
        self.traits.keys().cloned().collect()
    }
}
