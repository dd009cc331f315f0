//! Scaffold writes starter files for `mod init` and `config init`.

use std::path::Path;

use anyhow::{Context as _, bail};

const MODULE_TEMPLATE: &str = r#"apiVersion: opmodel.dev/v1
kind: Module
metadata:
  name: my-app
  fqn: example.com/modules/my-app
  version: 0.1.0
config:
  image: {type: string, default: "nginx:1.27"}
  port: {type: int, default: 8080}
components:
  app:
    labels:
      workload-type: stateless
    resources:
      opmodel.dev/resources/container:
        image: "{{ values.image }}"
        ports:
          - containerPort: "{{ values.port }}"
    traits:
      opmodel.dev/traits/expose:
        port: "{{ values.port }}"
"#;

const VALUES_TEMPLATE: &str = r#"# Overrides for the module defaults declared in module.yaml.
#
# image: nginx:1.27
# port: 8080
"#;

const CONFIG_TEMPLATE: &str = r#"# opm user configuration.
#
# registry: /opt/opm/registry
# provider: kubernetes
# namespace: default
# format: text
"#;

/// Write_module scaffolds a module directory at `path`.
pub fn write_module(path: &Path) -> anyhow::Result<()> {
    if path.join("module.yaml").exists() {
        bail!("{} already holds a module", path.display());
    }
    std::fs::create_dir_all(path)
        .with_context(|| format!("creating {}", path.display()))?;
    std::fs::write(path.join("module.yaml"), MODULE_TEMPLATE)?;
    std::fs::write(path.join("values.yaml"), VALUES_TEMPLATE)?;
    Ok(())
}

/// Write_config scaffolds the user configuration file.
pub fn write_config(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, CONFIG_TEMPLATE)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaffolded_module_loads() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("my-app");
        write_module(&target).unwrap();
        let module = render::Module::load(&target).unwrap();
        assert_eq!(module.metadata.name, "my-app");
        assert!(module.schema.is_some());
    }

    #[test]
    fn init_into_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("fresh");
        write_module(&target).unwrap();
        assert!(write_module(&target).is_err());
    }
}
