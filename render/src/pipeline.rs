//! Pipeline composes the five render phases: load, build, match, transform,
//! aggregate.
//!
//! Every cluster-facing subsystem (apply, delete, diff, status) renders
//! through the same [Pipeline::render] contract. Identical inputs produce a
//! byte-identical [RenderResult].

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::thread;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use api::{RenderError, RenderResult};

use crate::executor;
use crate::loader::Module;
use crate::provider::Provider;
use crate::release;
use crate::{Error, Result};

/// RenderOptions tunes a pipeline.
#[derive(Clone, Debug)]
pub struct RenderOptions {
    /// Strict promotes unhandled-trait warnings to render errors.
    pub strict: bool,
    /// Workers bounds the transformer pool.
    pub workers: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            strict: false,
            workers: thread::available_parallelism().map(usize::from).unwrap_or(4).min(8),
        }
    }
}

/// RenderRequest names the inputs of one render.
#[derive(Clone, Debug)]
pub struct RenderRequest {
    /// Module_path is the module directory.
    pub module_path: PathBuf,
    /// Release_name for the render.
    pub release_name: String,
    /// Namespace override; falls back to the module default.
    pub namespace: Option<String>,
    /// Values_files are overlays, applied in order.
    pub values_files: Vec<PathBuf>,
}

/// Pipeline renders modules with one provider.
#[derive(Clone, Debug)]
pub struct Pipeline {
    /// Provider whose transformers are matched.
    pub provider: Provider,
    /// Options for the run.
    pub options: RenderOptions,
}

impl Pipeline {
    /// New builds a pipeline.
    pub fn new(provider: Provider, options: RenderOptions) -> Self {
        Pipeline { provider, options }
    }

    /// Render runs the full pipeline for `req`.
    ///
    /// Fatal problems (bad path, compile failure, schema violations,
    /// non-concrete components, cancellation) return `Err`; unmatched
    /// components and transform failures collect into the result's errors,
    /// after every worker has run.
    #[instrument(skip_all, fields(module = %req.module_path.display(), release = req.release_name))]
    pub async fn render(
        &self,
        req: &RenderRequest,
        cancel: &CancellationToken,
    ) -> Result<RenderResult> {
        let module = Module::load(&req.module_path)?;
        let release = release::build(
            &module,
            &req.release_name,
            req.namespace.as_deref(),
            &req.values_files,
        )?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let plan = self.provider.plan(&release.components);
        let mut errors: Vec<RenderError> = plan
            .unmatched
            .iter()
            .map(|component| RenderError::UnmatchedComponent {
                component: component.clone(),
                available: self.provider.transformer_fqns(),
            })
            .collect();

        let outcome = executor::execute(
            &release,
            &plan,
            &self.provider,
            self.options.workers,
            cancel,
        )
        .await?;
        errors.extend(outcome.errors);

        let mut warnings = Vec::new();
        let mut seen = BTreeSet::new();
        for entry in plan.matches.iter().filter(|e| e.matched) {
            for t in &entry.unhandled_traits {
                if seen.insert((entry.component.clone(), t.clone())) {
                    if self.options.strict {
                        errors.push(RenderError::UnhandledTrait {
                            component: entry.component.clone(),
                            trait_fqn: t.clone(),
                        });
                    } else {
                        warnings.push(format!(
                            "component {:?}: trait {t:?} is handled by no matched transformer",
                            entry.component,
                        ));
                    }
                }
            }
        }

        let mut result = RenderResult {
            resources: outcome.resources,
            module: release.module.metadata.clone(),
            release: release.metadata.clone(),
            match_plan: plan,
            errors,
            warnings,
            values: release.values.clone(),
        };
        result.sort();
        debug!(
            resources = result.resources.len(),
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "render complete"
        );
        Ok(result)
    }
}

/// To_yaml emits the ordered resources as YAML documents separated by `---`.
pub fn to_yaml(result: &RenderResult) -> Result<String> {
    let mut out = String::new();
    for (i, r) in result.resources.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        out.push_str(&serde_yaml::to_string(&r.object)?);
    }
    Ok(out)
}
