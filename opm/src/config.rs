//! Config loads the user configuration file.
//!
//! The load is two-phase: the registry is first extracted textually, so it
//! can be exported into the environment before the file is fully evaluated;
//! then the whole document is parsed and validated against its schema.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, bail};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use modlang::Schema;

/// CONFIG_ENV names the config-file override variable.
pub const CONFIG_ENV: &str = "OPM_CONFIG";

/// REGISTRY_ENV names the registry override variable.
pub const REGISTRY_ENV: &str = "OPM_REGISTRY";

/// UserConfig is the evaluated configuration file.
#[derive(Clone, Debug, Default)]
pub struct UserConfig {
    /// Registry root under which providers are resolved by name.
    pub registry: Option<String>,
    /// Provider name or path to use by default.
    pub provider: Option<String>,
    /// Namespace to use by default.
    pub namespace: Option<String>,
    /// Format to use by default.
    pub format: Option<String>,
    /// Providers expected to be resolvable; fail-fast when the registry is
    /// not.
    pub providers: Vec<String>,
}

/// Config_path resolves the configuration file location: `$OPM_CONFIG`,
/// then `~/.opm/config.yaml`.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(p));
    }
    dirs::home_dir().map(|h| h.join(".opm").join("config.yaml"))
}

// The schema the config file validates against.
fn schema() -> Schema {
    Schema::parse(&serde_json::json!({
        "registry": {"type": "string"},
        "provider": {"type": "string"},
        "namespace": {"type": "string"},
        "format": {"type": "string"},
        "providers": {"type": "list", "items": {"type": "string"}},
    }))
    .expect("config schema is well-formed")
}

/// Extract_registry pulls the registry out of the raw text without
/// evaluating the file.
pub fn extract_registry(text: &str) -> Option<String> {
    let re = Regex::new(r#"(?m)^registry:\s*"?([^"\s#]+)"?\s*(?:#.*)?$"#).expect("static regex");
    re.captures(text).map(|c| c[1].to_string())
}

/// Load reads and validates the configuration file.
///
/// A missing file is an empty configuration. Phase one exports the registry
/// into `$OPM_REGISTRY` (unless already set); phase two evaluates and
/// validates the document.
pub fn load(path: &Path) -> anyhow::Result<UserConfig> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Ok(UserConfig::default());
    };

    if std::env::var(REGISTRY_ENV).is_err() {
        if let Some(registry) = extract_registry(&text) {
            debug!(registry, "registry extracted from config");
            // Safety: single-threaded startup; the runtime is not built yet.
            unsafe { std::env::set_var(REGISTRY_ENV, &registry) };
        }
    }

    let doc: Value = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    if doc.is_null() {
        return Ok(UserConfig::default());
    }
    let violations = schema().validate(&doc);
    if !violations.is_empty() {
        let lines: Vec<String> = violations.iter().map(|v| format!("  {v}")).collect();
        bail!("invalid config {}:\n{}", path.display(), lines.join("\n"));
    }

    let get = |key: &str| doc.get(key).and_then(Value::as_str).map(String::from);
    let config = UserConfig {
        registry: get("registry"),
        provider: get("provider"),
        namespace: get("namespace"),
        format: get("format"),
        providers: doc
            .get("providers")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default(),
    };
    Ok(config)
}

/// Ensure_registry fails fast when providers are configured but no registry
/// is resolvable from any source.
pub fn ensure_registry(config: &UserConfig, registry_flag: Option<&str>) -> anyhow::Result<()> {
    if config.providers.is_empty() {
        return Ok(());
    }
    let resolvable = registry_flag.is_some()
        || std::env::var(REGISTRY_ENV).is_ok()
        || config.registry.is_some();
    if !resolvable {
        bail!(
            "config names providers ({}) but no registry is resolvable; \
             set `registry` in the config, {REGISTRY_ENV}, or --registry",
            config.providers.join(", "),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_extraction_without_evaluation() {
        let text = "provider: kubernetes\nregistry: /opt/opm/registry\n";
        assert_eq!(extract_registry(text), Some("/opt/opm/registry".into()));
        assert_eq!(extract_registry("provider: x\n"), None);
        // Quoted and commented forms.
        assert_eq!(
            extract_registry("registry: \"/srv/reg\"  # prod\n"),
            Some("/srv/reg".into())
        );
    }

    #[test]
    fn load_validates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "namespace: 42\n").unwrap();
        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("namespace"));
    }

    #[test]
    fn missing_file_is_empty_config() {
        let config = load(Path::new("/not/a/real/config.yaml")).unwrap();
        assert!(config.registry.is_none());
        assert!(config.providers.is_empty());
    }

    #[test]
    fn providers_without_registry_fail_fast() {
        let config = UserConfig {
            providers: vec!["kubernetes".into()],
            ..Default::default()
        };
        // No flag and no env (the env var may leak from other tests; guard).
        if std::env::var(REGISTRY_ENV).is_err() {
            assert!(ensure_registry(&config, None).is_err());
        }
        assert!(ensure_registry(&config, Some("/reg")).is_ok());
    }
}
