//! Commands implements the subcommand bodies and the exit-code dispatch.

use std::path::PathBuf;

use clap::ArgMatches;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use cluster::{ApplyOptions, DeleteOptions, ErrorClass};
use render::{Pipeline, Provider, RenderOptions, RenderRequest};

use crate::config::UserConfig;
use crate::output::{self, Format};

/// Common is the resolved global argument set: flag > env (via clap) >
/// config file > hardcoded default.
#[derive(Clone, Debug, Default)]
pub struct Common {
    /// Module directory.
    pub module_path: PathBuf,
    /// Release name; empty falls back to the module name.
    pub release_name: String,
    /// Namespace override.
    pub namespace: Option<String>,
    /// Values overlays, in order.
    pub values: Vec<PathBuf>,
    /// Explicit kubeconfig path.
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context name.
    pub context: Option<String>,
    /// Provider name or directory.
    pub provider: Option<String>,
    /// Registry root for provider resolution.
    pub registry: Option<String>,
    /// Strict promotes unhandled-trait warnings to errors.
    pub strict: bool,
}

impl Common {
    /// From_matches folds the config file into the parsed flags.
    pub fn from_matches(m: &ArgMatches, config: &UserConfig) -> Common {
        let get = |id: &str| m.try_get_one::<String>(id).ok().flatten().cloned();
        Common {
            module_path: get("module").map(PathBuf::from).unwrap_or_else(|| ".".into()),
            release_name: get("name").unwrap_or_default(),
            namespace: get("namespace").or_else(|| config.namespace.clone()),
            values: m
                .try_get_many::<String>("values")
                .ok()
                .flatten()
                .map(|vs| vs.map(PathBuf::from).collect())
                .unwrap_or_default(),
            kubeconfig: get("kubeconfig").map(PathBuf::from),
            context: get("context"),
            provider: get("provider").or_else(|| config.provider.clone()),
            registry: get("registry").or_else(|| config.registry.clone()),
            strict: m.try_get_one::<bool>("strict").ok().flatten().copied().unwrap_or(false),
        }
    }

    /// Pipeline resolves the provider and builds the render pipeline.
    pub fn pipeline(&self) -> anyhow::Result<Pipeline> {
        let provider = self.resolve_provider()?;
        debug!(provider = provider.name, transformers = provider.transformers.len(), "provider ready");
        Ok(Pipeline::new(
            provider,
            RenderOptions {
                strict: self.strict,
                ..Default::default()
            },
        ))
    }

    // Resolve_provider: unset or "kubernetes" means the builtin; a
    // directory path loads directly; any other name resolves under the
    // registry root.
    fn resolve_provider(&self) -> anyhow::Result<Provider> {
        let Some(name) = self.provider.as_deref() else {
            return Ok(Provider::builtin());
        };
        if name == "kubernetes" || name == "builtin" {
            return Ok(Provider::builtin());
        }
        let as_path = PathBuf::from(name);
        if as_path.is_dir() {
            return Ok(Provider::load(&as_path)?);
        }
        let Some(registry) = self.registry.as_deref() else {
            anyhow::bail!(
                "provider {name:?} is not a directory and no registry is resolvable"
            );
        };
        Ok(Provider::load(PathBuf::from(registry).join(name))?)
    }

    /// Request builds the render request.
    pub fn request(&self) -> RenderRequest {
        RenderRequest {
            module_path: self.module_path.clone(),
            release_name: self.release_name.clone(),
            namespace: self.namespace.clone(),
            values_files: self.values.clone(),
        }
    }

    /// Connect builds the cluster client.
    pub async fn connect(&self) -> anyhow::Result<kube::Client> {
        Ok(cluster::client::connect(self.kubeconfig.as_deref(), self.context.as_deref()).await?)
    }

    /// Release_namespace is the namespace for inventory-only commands.
    pub fn release_namespace(&self) -> String {
        self.namespace.clone().unwrap_or_else(|| "default".to_string())
    }
}

/// Exit_code maps an error to the documented exit codes.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<cluster::Error>() {
        return match e.classify() {
            ErrorClass::Validation => 2,
            ErrorClass::Connectivity => 3,
            ErrorClass::Permission => 4,
            ErrorClass::NotFound => 5,
            ErrorClass::General => 1,
        };
    }
    if let Some(e) = err.downcast_ref::<render::Error>() {
        return match e {
            render::Error::Cancelled => 1,
            _ => 2,
        };
    }
    1
}

// Print render-phase errors and warnings for the text format.
fn print_render_problems(result: &api::RenderResult) {
    for w in &result.warnings {
        eprintln!("warning: {w}");
    }
    for e in &result.errors {
        eprintln!("error: {e}");
    }
}

/// Build renders and emits ordered YAML documents.
pub async fn build(
    common: &Common,
    out_file: Option<PathBuf>,
    cancel: &CancellationToken,
) -> anyhow::Result<i32> {
    let pipeline = common.pipeline()?;
    let result = pipeline.render(&common.request(), cancel).await?;
    if !result.ok() {
        match output::format() {
            Format::Json => output::envelope(
                "mod build",
                false,
                json!(null),
                &result.warnings,
                &result.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
            ),
            Format::Text => print_render_problems(&result),
        }
        return Ok(2);
    }
    let yaml = render::pipeline::to_yaml(&result)?;
    match out_file {
        Some(path) => std::fs::write(path, yaml)?,
        None => match output::format() {
            Format::Text => print!("{yaml}"),
            Format::Json => output::envelope(
                "mod build",
                true,
                json!({"resources": result.resources.iter().map(|r| &r.object).collect::<Vec<_>>()}),
                &result.warnings,
                &[],
            ),
        },
    }
    if output::format() == Format::Text {
        for w in &result.warnings {
            eprintln!("warning: {w}");
        }
    }
    Ok(0)
}

/// Vet renders without emitting manifests and reports per-resource
/// validity.
pub async fn vet(common: &Common, cancel: &CancellationToken) -> anyhow::Result<i32> {
    let pipeline = common.pipeline()?;
    let result = pipeline.render(&common.request(), cancel).await?;

    let mut findings = Vec::new();
    for r in &result.resources {
        let mut problems = Vec::new();
        if r.kind().is_empty() {
            problems.push("missing kind");
        }
        if r.api_version().is_empty() {
            problems.push("missing apiVersion");
        }
        if r.name().is_empty() {
            problems.push("missing metadata.name");
        }
        findings.push((r.id(), problems));
    }
    let invalid = findings.iter().filter(|(_, p)| !p.is_empty()).count();
    let success = result.ok() && invalid == 0;

    match output::format() {
        Format::Text => {
            for (id, problems) in &findings {
                if problems.is_empty() {
                    println!("valid    {id}");
                } else {
                    println!("invalid  {id}: {}", problems.join(", "));
                }
            }
            print_render_problems(&result);
        }
        Format::Json => output::envelope(
            "mod vet",
            success,
            json!({
                "resources": findings
                    .iter()
                    .map(|(id, problems)| json!({"resource": id, "problems": problems}))
                    .collect::<Vec<_>>(),
            }),
            &result.warnings,
            &result.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
        ),
    }
    Ok(if success { 0 } else { 2 })
}

/// Apply renders and reconciles against the cluster.
pub async fn apply(
    common: &Common,
    dry_run: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<i32> {
    let pipeline = common.pipeline()?;
    let client = common.connect().await?;
    let options = ApplyOptions {
        dry_run,
        ..Default::default()
    };
    let report = cluster::apply::run(client, &pipeline, &common.request(), &options, cancel).await?;

    match output::format() {
        Format::Text => {
            for outcome in &report.applied {
                println!("{:10} {}", format!("{:?}", outcome.action).to_lowercase(), outcome.resource);
            }
            for pruned in &report.pruned {
                println!("pruned     {pruned}");
            }
            for err in &report.errors {
                eprintln!("error: {err}");
            }
            if report.inventory_written {
                println!(
                    "release {:?} committed as change {}",
                    report.release,
                    report.change_id.as_deref().unwrap_or("?"),
                );
            }
        }
        Format::Json => output::envelope(
            "mod apply",
            report.ok(),
            serde_json::to_value(&report)?,
            &[],
            &report.errors,
        ),
    }
    Ok(if report.ok() { 0 } else { 2 })
}

/// Diff renders and compares against live state.
pub async fn diff(common: &Common, cancel: &CancellationToken) -> anyhow::Result<i32> {
    let pipeline = common.pipeline()?;
    let client = common.connect().await?;
    let report = cluster::diff::run(client, &pipeline, &common.request(), cancel).await?;

    match output::format() {
        Format::Text => {
            for entry in &report.entries {
                match entry.class {
                    cluster::DiffClass::Unchanged => {}
                    cluster::DiffClass::Added => println!("added: {}", entry.resource),
                    cluster::DiffClass::Orphaned => println!("orphaned: {}", entry.resource),
                    cluster::DiffClass::Modified => {
                        println!("modified: {}", entry.resource);
                        if let Some(diff) = &entry.diff {
                            print!("{diff}");
                        }
                    }
                }
            }
            println!("{}", report.summary());
        }
        Format::Json => output::envelope(
            "mod diff",
            true,
            serde_json::to_value(&report)?,
            &[],
            &[],
        ),
    }
    Ok(0)
}

/// Delete tears down a release from its inventory.
pub async fn delete(
    common: &Common,
    ignore_not_found: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<i32> {
    anyhow::ensure!(!common.release_name.is_empty(), "--name is required for delete");
    let client = common.connect().await?;
    let options = DeleteOptions { ignore_not_found };
    let report = cluster::delete::run(
        client,
        &common.release_name,
        &common.release_namespace(),
        None,
        &options,
        cancel,
    )
    .await?;

    match output::format() {
        Format::Text => {
            for deleted in &report.deleted {
                println!("deleted    {deleted}");
            }
            for err in &report.errors {
                eprintln!("error: {err}");
            }
            if report.inventory_deleted {
                println!("release {:?} deleted", report.release);
            }
        }
        Format::Json => output::envelope(
            "mod delete",
            report.ok(),
            serde_json::to_value(&report)?,
            &[],
            &report.errors,
        ),
    }
    Ok(if report.ok() { 0 } else { 2 })
}

/// Status reads per-entry health from the inventory.
pub async fn status(common: &Common, cancel: &CancellationToken) -> anyhow::Result<i32> {
    anyhow::ensure!(!common.release_name.is_empty(), "--name is required for status");
    let client = common.connect().await?;
    let report = cluster::status::run(
        client,
        &common.release_name,
        &common.release_namespace(),
        None,
        cancel,
    )
    .await?;

    match output::format() {
        Format::Text => {
            for entry in &report.entries {
                let state = match &entry.health {
                    cluster::Health::Ready => "ready".to_string(),
                    cluster::Health::Missing => "missing".to_string(),
                    cluster::Health::Degraded(reason) => format!("degraded ({reason})"),
                };
                println!("{state:24} {}", entry.resource);
            }
            println!("release {:?}: {:?}", report.release, report.aggregate);
        }
        Format::Json => output::envelope(
            "mod status",
            report.aggregate == cluster::status::Aggregate::Ready,
            serde_json::to_value(&report)?,
            &[],
            &[],
        ),
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_map_error_classes() {
        let not_found = anyhow::Error::new(cluster::Error::ReleaseNotFound {
            name: "x".into(),
            namespace: "default".into(),
        });
        assert_eq!(exit_code(&not_found), 5);

        let validation = anyhow::Error::new(cluster::Error::RenderFailed(vec!["bad".into()]));
        assert_eq!(exit_code(&validation), 2);

        let render_err = anyhow::Error::new(render::Error::MissingMetadata { field: "fqn" });
        assert_eq!(exit_code(&render_err), 2);

        let cancelled = anyhow::Error::new(render::Error::Cancelled);
        assert_eq!(exit_code(&cancelled), 1);

        let other = anyhow::anyhow!("boom");
        assert_eq!(exit_code(&other), 1);
    }
}
