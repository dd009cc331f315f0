//! Delete tears a release down from its inventory: no rendering, reverse
//! weight order, and the inventory Secret strictly last.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use api::inventory::Entry;

use crate::apply::{delete_entry, entry_id, group_of};
use crate::dynamic::DynamicApi;
use crate::inventory::InventoryApi;
use crate::{Error, Result};

/// DeleteOptions tunes one delete invocation.
#[derive(Clone, Debug, Default)]
pub struct DeleteOptions {
    /// Ignore_not_found suppresses the missing-release error.
    pub ignore_not_found: bool,
}

/// DeleteReport collects everything one delete did.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DeleteReport {
    /// Release name.
    pub release: String,
    /// Namespace searched.
    pub namespace: String,
    /// Found reports whether an inventory existed.
    pub found: bool,
    /// Deleted resources, in deletion order.
    pub deleted: Vec<String>,
    /// Per-resource errors.
    pub errors: Vec<String>,
    /// Inventory_deleted reports whether the Secret was removed.
    pub inventory_deleted: bool,
}

impl DeleteReport {
    /// Ok reports whether the delete fully succeeded.
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run deletes every resource tracked by the release's inventory.
///
/// Discovery is inventory-first: a direct GET when the UUID is known,
/// otherwise a label search restricted to inventory Secrets. Workload
/// resources are never label-scanned; that would pick up
/// controller-generated children. The inventory Secret is only removed once
/// every tracked entry is gone, so a partial failure leaves enough state
/// for a retry to finish.
#[instrument(skip(client, cancel))]
pub async fn run(
    client: kube::Client,
    release_name: &str,
    namespace: &str,
    uuid: Option<&Uuid>,
    opts: &DeleteOptions,
    cancel: &CancellationToken,
) -> Result<DeleteReport> {
    let mut report = DeleteReport {
        release: release_name.to_string(),
        namespace: namespace.to_string(),
        ..Default::default()
    };

    let inventory_api = InventoryApi::new(client.clone(), namespace);
    let Some(inventory) = inventory_api.read(release_name, uuid).await? else {
        if opts.ignore_not_found {
            debug!("no inventory, nothing to delete");
            return Ok(report);
        }
        return Err(Error::ReleaseNotFound {
            name: release_name.to_string(),
            namespace: namespace.to_string(),
        });
    };
    report.found = true;

    let mut entries: Vec<Entry> = inventory
        .latest()
        .map(|c| c.inventory.entries.clone())
        .unwrap_or_default();
    // Workloads go before the config and namespaces they depend on.
    entries.sort_by_key(|e| {
        std::cmp::Reverse(api::weights::weight_for_kind(&e.kind, group_of(&e.api_version)))
    });

    let dynamic = DynamicApi::new(client).await?;
    for entry in &entries {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match delete_entry(&dynamic, entry).await {
            Ok(()) => {
                debug!(kind = entry.kind, name = entry.name, "deleted");
                report.deleted.push(entry_id(entry));
            }
            Err(err) => report.errors.push(format!("{}: {err}", entry_id(entry))),
        }
    }

    if report.errors.is_empty() {
        inventory_api.delete(&inventory).await?;
        report.inventory_deleted = true;
        info!(deleted = report.deleted.len(), "release deleted");
    } else {
        info!(
            errors = report.errors.len(),
            "delete incomplete, inventory preserved for retry"
        );
    }
    Ok(report)
}
