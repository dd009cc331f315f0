//! Loader resolves a module directory and evaluates its definition.
//!
//! The loader only produces the module schema and its default values; value
//! overlays are merged by the release builder.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, instrument};

use api::{ModuleMetadata, identity};
use modlang::{Schema, ValueSet, value};

use crate::{Error, Result};

/// MODULE_FILE is the definition file every module directory carries.
pub const MODULE_FILE: &str = "module.yaml";

/// VALUES_FILE is the optional default-values file.
pub const VALUES_FILE: &str = "values.yaml";

/// Module is a loaded module definition.
///
/// Read-only after construction.
#[derive(Clone, Debug)]
pub struct Module {
    /// Path is the absolute, canonical module directory.
    pub path: PathBuf,
    /// Package is the directory's base name.
    pub package: String,
    /// Metadata evaluated from the definition. Every scalar is concrete.
    pub metadata: ModuleMetadata,
    /// Schema parsed from the `config` section, if declared.
    pub schema: Option<Schema>,
    /// Components_decl is the raw component declaration tree; it may still
    /// carry embedded expressions.
    pub components_decl: Value,
    /// Defaults are the module's own default values (schema defaults
    /// unified with `values.yaml`).
    pub defaults: ValueSet,
}

impl Module {
    /// Load resolves `path` and evaluates the module definition there.
    ///
    /// Fails with distinct errors for a missing path, a directory without a
    /// module definition, a compilation failure, and missing metadata.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Module> {
        let path = path.as_ref();
        let path = fs::canonicalize(path).map_err(|_| Error::Path(path.to_path_buf()))?;
        if !path.is_dir() {
            return Err(Error::Path(path));
        }
        let module_file = path.join(MODULE_FILE);
        if !module_file.is_file() {
            return Err(Error::NotAModule(path));
        }

        let text = fs::read_to_string(&module_file)?;
        let (doc, _) = value::parse_yaml(&module_file, &text)?;

        let metadata = extract_metadata(&doc)?;
        let schema = match doc.get("config") {
            Some(decl) => Some(Schema::parse(decl)?),
            None => None,
        };
        let components_decl = doc.get("components").cloned().unwrap_or(Value::Null);

        let mut defaults = ValueSet::new();
        if let Some(schema) = &schema {
            let d = schema.defaults();
            if !d.is_null() {
                defaults.merge_synthetic(&d, MODULE_FILE);
            }
        }
        let values_file = path.join(VALUES_FILE);
        if values_file.is_file() {
            let text = fs::read_to_string(&values_file)?;
            defaults.merge_file(&values_file, &text)?;
        }

        let package = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(module = metadata.name, version = metadata.version, "module loaded");

        Ok(Module {
            path,
            package,
            metadata,
            schema,
            components_decl,
            defaults,
        })
    }
}

// Extract_metadata pulls the concrete metadata out of the evaluated
// definition. Extraction works on the evaluated value tree, never on
// source syntax.
fn extract_metadata(doc: &Value) -> Result<ModuleMetadata> {
    let meta = doc
        .get("metadata")
        .and_then(Value::as_object)
        .ok_or(Error::MissingMetadata { field: "metadata" })?;
    let get = |field: &'static str| -> Result<String> {
        meta.get(field)
            .and_then(Value::as_str)
            .map(String::from)
            .filter(|s| !s.is_empty())
            .ok_or(Error::MissingMetadata { field })
    };

    let name = get("name")?;
    let fqn = get("fqn")?;
    let version = get("version")?;
    let default_namespace = meta
        .get("defaultNamespace")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let uuid = match meta.get("uuid").and_then(Value::as_str) {
        Some(s) => s.parse().map_err(|_| Error::MissingMetadata { field: "uuid" })?,
        None => identity::module_uuid(&fqn),
    };
    let labels = meta
        .get("labels")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();
    let components = doc
        .get("components")
        .and_then(Value::as_object)
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();

    Ok(ModuleMetadata {
        name,
        default_namespace,
        fqn,
        version,
        uuid,
        labels,
        components,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_module(dir: &Path, module_yaml: &str) {
        fs::write(dir.join(MODULE_FILE), module_yaml).unwrap();
    }

    const MODULE: &str = "\
apiVersion: opmodel.dev/v1
kind: Module
metadata:
  name: demo
  fqn: opmodel.dev/modules/demo
  version: 1.0.0
  defaultNamespace: demo
config:
  replicas: {type: int, default: 2}
components:
  app:
    labels: {workload-type: stateless}
    resources:
      opmodel.dev/resources/container:
        image: nginx
";

    #[test]
    fn load_extracts_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), MODULE);
        let m = Module::load(dir.path()).unwrap();
        assert_eq!(m.metadata.name, "demo");
        assert_eq!(m.metadata.default_namespace, "demo");
        assert_eq!(m.metadata.components, vec!["app"]);
        assert_eq!(m.metadata.uuid, identity::module_uuid("opmodel.dev/modules/demo"));
        assert_eq!(m.defaults.value()["replicas"], 2);
    }

    #[test]
    fn values_file_overrides_schema_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), MODULE);
        fs::write(dir.path().join(VALUES_FILE), "replicas: 5\n").unwrap();
        let m = Module::load(dir.path()).unwrap();
        assert_eq!(m.defaults.value()["replicas"], 5);
    }

    #[test]
    fn missing_path_is_distinct() {
        let err = Module::load("/definitely/not/here").unwrap_err();
        assert!(matches!(err, Error::Path(_)));
    }

    #[test]
    fn directory_without_definition_is_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let err = Module::load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::NotAModule(_)));
    }

    #[test]
    fn compile_error_is_distinct() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "metadata: [not: valid: yaml\n");
        let err = Module::load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
    }

    #[test]
    fn missing_metadata_is_named() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "metadata:\n  name: x\n  version: 1.0.0\n");
        let err = Module::load(dir.path()).unwrap_err();
        match err {
            Error::MissingMetadata { field } => assert_eq!(field, "fqn"),
            other => panic!("unexpected: {other}"),
        }
    }
}
