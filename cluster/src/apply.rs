//! Apply reconciles a rendered release against the cluster: ordered
//! server-side apply, a commit gate, create-then-prune, and the inventory
//! write last.
//!
//! Create-then-prune is load-bearing: new resources land before stale ones
//! go away, so the release never passes through a window with resources
//! missing.

use kube::api::{DynamicObject, Patch, PatchParams};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use api::inventory::{Entry, MAX_HISTORY, stale_entries};
use api::resource::Resource;
use render::{Pipeline, RenderRequest};

use crate::dynamic::DynamicApi;
use crate::inventory::{self, InventoryApi};
use crate::{Error, Result};

/// ApplyOptions tunes one apply invocation.
#[derive(Clone, Debug)]
pub struct ApplyOptions {
    /// Dry_run validates server-side without persisting, and skips the
    /// prune and inventory phases entirely.
    pub dry_run: bool,
    /// Max_history bounds the inventory change history.
    pub max_history: usize,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        ApplyOptions {
            dry_run: false,
            max_history: MAX_HISTORY,
        }
    }
}

/// ApplyAction says what the server did with one resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyAction {
    /// Created a new object.
    Created,
    /// Configured an existing object.
    Configured,
    /// Unchanged; the object already matched.
    Unchanged,
}

/// ResourceOutcome is the apply result for one resource.
#[derive(Clone, Debug, Serialize)]
pub struct ResourceOutcome {
    /// Resource display identifier.
    pub resource: String,
    /// What the server did.
    pub action: ApplyAction,
}

/// ApplyReport collects everything one apply did.
///
/// Per-resource failures land in `errors`; any error means the inventory
/// was not written and nothing was pruned.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ApplyReport {
    /// Release name.
    pub release: String,
    /// Namespace applied into.
    pub namespace: String,
    /// Applied resources, in apply order.
    pub applied: Vec<ResourceOutcome>,
    /// Pruned stale resources.
    pub pruned: Vec<String>,
    /// Per-resource and prune errors.
    pub errors: Vec<String>,
    /// Change_id recorded on success.
    pub change_id: Option<String>,
    /// Inventory_written reports whether the commit happened.
    pub inventory_written: bool,
}

impl ApplyReport {
    /// Ok reports whether the apply fully succeeded.
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run renders the module and reconciles the result.
///
/// Render errors are fatal for apply. If any resource fails to apply, the
/// inventory Secret is left byte-identical to before the invocation and no
/// resource is pruned; the next invocation re-applies and reconverges.
#[instrument(skip_all, fields(release = req.release_name))]
pub async fn run(
    client: kube::Client,
    pipeline: &Pipeline,
    req: &RenderRequest,
    opts: &ApplyOptions,
    cancel: &CancellationToken,
) -> Result<ApplyReport> {
    let result = pipeline.render(req, cancel).await?;
    if !result.ok() {
        return Err(Error::RenderFailed(
            result.errors.iter().map(|e| e.to_string()).collect(),
        ));
    }

    let mut report = ApplyReport {
        release: result.release.name.clone(),
        namespace: result.release.namespace.clone(),
        ..Default::default()
    };

    let inventory_api = InventoryApi::new(client.clone(), &result.release.namespace);
    let previous = match inventory_api
        .read(&result.release.name, Some(&result.release.uuid))
        .await?
    {
        Some(inv) => Some(inv),
        // The UUID-named Secret may predate a module FQN change; fall back
        // to discovery by release name.
        None => inventory_api.read(&result.release.name, None).await?,
    };

    let dynamic = DynamicApi::new(client).await?;
    for resource in &result.resources {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match apply_one(&dynamic, resource, opts.dry_run).await {
            Ok(action) => report.applied.push(ResourceOutcome {
                resource: resource.id(),
                action,
            }),
            Err(err) => {
                warn!(resource = resource.id(), error = %err, "apply failed");
                report.errors.push(format!("{}: {err}", resource.id()));
            }
        }
    }

    // Commit gate: nothing below runs unless every apply succeeded.
    if !report.errors.is_empty() {
        info!(errors = report.errors.len(), "apply incomplete, inventory untouched");
        return Ok(report);
    }

    let module_path = req.module_path.display().to_string();
    let change = inventory::new_change(
        &result,
        &module_path,
        k8s_openapi::jiff::Timestamp::now().to_string(),
    )?;
    report.change_id = Some(change.id.clone());

    if opts.dry_run {
        debug!("dry run, skipping prune and inventory write");
        return Ok(report);
    }

    let prev_entries: Vec<Entry> = previous
        .as_ref()
        .and_then(|inv| inv.latest())
        .map(|c| c.inventory.entries.clone())
        .unwrap_or_default();
    let mut stale = stale_entries(&prev_entries, &change.inventory.entries);
    // Delete stale resources most-dependent first.
    stale.sort_by_key(|e| {
        std::cmp::Reverse(api::weights::weight_for_kind(&e.kind, group_of(&e.api_version)))
    });
    for entry in &stale {
        match delete_entry(&dynamic, entry).await {
            Ok(()) => {
                debug!(kind = entry.kind, name = entry.name, "pruned");
                report.pruned.push(entry_id(entry));
            }
            Err(err) => report.errors.push(format!("prune {}: {err}", entry_id(entry))),
        }
    }
    if !report.errors.is_empty() {
        info!("prune incomplete, inventory untouched");
        return Ok(report);
    }

    let mut inventory = previous.unwrap_or_default();
    inventory.release = result.release.clone();
    inventory.module = result.module.clone();
    inventory.record(change, opts.max_history);
    inventory_api.write(&inventory).await?;
    report.inventory_written = true;
    info!(
        applied = report.applied.len(),
        pruned = report.pruned.len(),
        change = report.change_id.as_deref().unwrap_or(""),
        "apply committed"
    );
    Ok(report)
}

// Apply_one server-side applies a single resource and classifies the
// result.
async fn apply_one(dynamic: &DynamicApi, resource: &Resource, dry_run: bool) -> Result<ApplyAction> {
    let name = resource.name();
    if name.is_empty() {
        return Err(Error::MissingName(resource.id()));
    }
    let api = dynamic.api_for_resource(resource)?;
    let before = api.get_opt(name).await?;
    let rv_before = before.as_ref().and_then(|o| o.metadata.resource_version.clone());

    let obj: DynamicObject = serde_json::from_value(resource.object.clone())?;
    let mut params = PatchParams::apply(api::TOOL_NAME).force();
    params.dry_run = dry_run;
    let after = api.patch(name, &params, &Patch::Apply(&obj)).await?;

    Ok(match (rv_before, after.metadata.resource_version) {
        (None, _) => ApplyAction::Created,
        (Some(b), Some(a)) if b == a => ApplyAction::Unchanged,
        _ => ApplyAction::Configured,
    })
}

// Delete_entry removes a stale tracked resource; 404 counts as success.
pub(crate) async fn delete_entry(dynamic: &DynamicApi, entry: &Entry) -> Result<()> {
    let api = match dynamic.api_for_entry(entry) {
        Ok(api) => api,
        // The whole kind is gone (CRD deleted): nothing left to prune.
        Err(Error::UnknownKind { .. }) => return Ok(()),
        Err(err) => return Err(err),
    };
    match api.delete(&entry.name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn entry_id(entry: &Entry) -> String {
    if entry.namespace.is_empty() {
        format!("{}/{} {}", entry.api_version, entry.kind, entry.name)
    } else {
        format!(
            "{}/{} {}/{}",
            entry.api_version, entry.kind, entry.namespace, entry.name
        )
    }
}

pub(crate) fn group_of(api_version: &str) -> &str {
    match api_version.rsplit_once('/') {
        Some((g, _)) => g,
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_ids_show_scope() {
        let mut e = Entry {
            api_version: "apps/v1".into(),
            kind: "Deployment".into(),
            namespace: "media".into(),
            name: "jellyfin".into(),
            ..Default::default()
        };
        assert_eq!(entry_id(&e), "apps/v1/Deployment media/jellyfin");
        e.namespace.clear();
        assert_eq!(entry_id(&e), "apps/v1/Deployment jellyfin");
    }

    #[test]
    fn group_parsing() {
        assert_eq!(group_of("apps/v1"), "apps");
        assert_eq!(group_of("v1"), "");
        assert_eq!(group_of("networking.k8s.io/v1"), "networking.k8s.io");
    }

    #[test]
    fn stale_prune_order_is_reverse_weight() {
        let mk = |api_version: &str, kind: &str| Entry {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: "d".into(),
            name: "x".into(),
            ..Default::default()
        };
        let mut stale = vec![
            mk("v1", "Namespace"),
            mk("apps/v1", "Deployment"),
            mk("v1", "ConfigMap"),
        ];
        stale.sort_by_key(|e| {
            std::cmp::Reverse(api::weights::weight_for_kind(&e.kind, group_of(&e.api_version)))
        });
        let kinds: Vec<_> = stale.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Deployment", "ConfigMap", "Namespace"]);
    }
}
