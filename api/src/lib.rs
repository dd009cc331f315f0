#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]
//! Api contains the data model shared by the render pipeline and the cluster
//! orchestrators: module and release metadata, components, rendered
//! resources, the transformer match plan, the resource weight table, and the
//! inventory record types.

pub mod identity;
pub mod inventory;
pub mod meta;
pub mod resource;
pub mod weights;

pub use meta::{Component, ComponentMetadata, ModuleMetadata, ReleaseMetadata};
pub use resource::{MatchEntry, MatchPlan, RenderError, RenderResult, Resource};

/// TOOL_NAME is the name used for `app.kubernetes.io/managed-by` and as the
/// server-side-apply field manager.
pub const TOOL_NAME: &str = "opm";

/// DOMAIN is the label/annotation namespace owned by this tool.
pub const DOMAIN: &str = "opmodel.dev";

/// Keyify sanitizes the key for use in k8s metadata.
fn keyify<S: ToString, K: AsRef<str>>(space: S, key: K) -> String {
    let mut out = space.to_string();
    key.as_ref()
        .chars()
        .map(|c| match c {
            '_' | ' ' | '\t' | '\n' => '-',
            _ => c.to_ascii_lowercase(),
        })
        .for_each(|c| out.push(c));
    out
}

/// Opm_label returns the provided argument as a name in this tool's space,
/// suitable for use as an annotation or label.
pub fn opm_label<S: AsRef<str>>(s: S) -> String {
    keyify(format!("{DOMAIN}/"), s)
}

/// Release_label returns the provided argument as a name in the
/// module-release space, suitable for use as an annotation or label.
pub fn release_label<S: AsRef<str>>(s: S) -> String {
    keyify(format!("module-release.{DOMAIN}/"), s)
}

/// Module_label returns the provided argument as a name in the module space.
pub fn module_label<S: AsRef<str>>(s: S) -> String {
    keyify(format!("module.{DOMAIN}/"), s)
}

/// Component_label returns the provided argument as a name in the component
/// space.
pub fn component_label<S: AsRef<str>>(s: S) -> String {
    keyify(format!("component.{DOMAIN}/"), s)
}

/// K8s_label returns the provided argument as a name in the
/// "app.kubernetes.io" space.
pub fn k8s_label<S: AsRef<str>>(s: S) -> String {
    keyify("app.kubernetes.io/", s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_spaces() {
        assert_eq!(opm_label("component"), "opmodel.dev/component");
        assert_eq!(
            release_label("name"),
            "module-release.opmodel.dev/name"
        );
        assert_eq!(k8s_label("Managed By"), "app.kubernetes.io/managed-by");
    }
}
