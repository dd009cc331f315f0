//! Inventory computes manifest digests and change IDs, and persists the
//! inventory record as a typed Secret with optimistic concurrency.
//!
//! Secret name: `opm.<releaseName>.<releaseUUID>`. The label set carries
//! exactly the five discovery labels; module-level labels never leak onto
//! the Secret.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::ResourceExt;
use serde_json::Value;
use sha1::{Digest as _, Sha1};
use sha2::Sha256;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use api::inventory::{ChangeEntry, ChangeSource, Entry, EntrySet, Inventory};
use api::resource::{RenderResult, Resource};

use crate::{Error, Result};

/// DATA_KEY is the Secret data key holding the JSON body.
pub const DATA_KEY: &str = "inventory.json";

/// SECRET_TYPE marks the inventory Secret.
pub const SECRET_TYPE: &str = "opmodel.dev/inventory";

/// Secret_name reports the inventory Secret name for a release.
pub fn secret_name(release_name: &str, uuid: &Uuid) -> String {
    format!("{}.{release_name}.{uuid}", api::TOOL_NAME)
}

/// Secret_labels reports the exact label set of the inventory Secret.
pub fn secret_labels(release_name: &str, namespace: &str, uuid: &Uuid) -> BTreeMap<String, String> {
    BTreeMap::from([
        (api::k8s_label("managed-by"), api::TOOL_NAME.to_string()),
        (api::opm_label("component"), "inventory".to_string()),
        (api::release_label("name"), release_name.to_string()),
        (api::release_label("namespace"), namespace.to_string()),
        (api::release_label("uuid"), uuid.to_string()),
    ])
}

/// Canonical rebuilds a value with every map's keys sorted, so JSON
/// serialization is independent of authoring order.
pub fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), canonical(&map[k.as_str()]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        _ => value.clone(),
    }
}

/// Manifest_digest is the SHA-256 content hash of the sorted resource set.
pub fn manifest_digest(resources: &[Resource]) -> Result<String> {
    let objects: Vec<Value> = resources.iter().map(|r| canonical(&r.object)).collect();
    let bytes = serde_json::to_vec(&objects)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex(&hasher.finalize()))
}

/// Change_id derives the short hex ID of a change.
///
/// Path, version and values are all part of the preimage, so a no-op module
/// upgrade or an explicit-default values change still produces a distinct
/// change entry.
pub fn change_id(path: &str, version: &str, values: &Value, digest: &str) -> Result<String> {
    let values = serde_json::to_vec(&canonical(values))?;
    let mut hasher = Sha1::new();
    hasher.update(path.as_bytes());
    hasher.update(version.as_bytes());
    hasher.update(&values);
    hasher.update(digest.as_bytes());
    let mut id = hex(&hasher.finalize());
    id.truncate(8);
    Ok(id)
}

/// New_change builds the change entry for a successful render.
pub fn new_change(result: &RenderResult, module_path: &str, timestamp: String) -> Result<ChangeEntry> {
    let digest = manifest_digest(&result.resources)?;
    let id = change_id(module_path, &result.module.version, &result.values, &digest)?;
    Ok(ChangeEntry {
        id,
        timestamp,
        source: ChangeSource {
            path: module_path.to_string(),
            version: result.module.version.clone(),
            release_name: result.release.name.clone(),
        },
        values: result.values.clone(),
        digest,
        inventory: EntrySet {
            entries: result.resources.iter().map(Entry::from).collect(),
        },
    })
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// InventoryApi reads and writes the inventory Secret of a namespace.
pub struct InventoryApi {
    secrets: Api<Secret>,
    namespace: String,
}

impl InventoryApi {
    /// New scopes the API to `namespace`.
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        InventoryApi {
            secrets: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }

    /// Read resolves the inventory for a release.
    ///
    /// With a known UUID the Secret is fetched directly by name; otherwise
    /// discovery falls back to a label search restricted to inventory
    /// Secrets. A missing inventory is `Ok(None)`.
    #[instrument(skip(self))]
    pub async fn read(&self, release_name: &str, uuid: Option<&Uuid>) -> Result<Option<Inventory>> {
        let secret = match uuid {
            Some(uuid) => self.secrets.get_opt(&secret_name(release_name, uuid)).await?,
            None => {
                let selector = format!(
                    "{managed}={tool},{component}=inventory,{name}={release_name}",
                    managed = api::k8s_label("managed-by"),
                    tool = api::TOOL_NAME,
                    component = api::opm_label("component"),
                    name = api::release_label("name"),
                );
                let params = ListParams::default().labels(&selector);
                self.secrets.list(&params).await?.items.into_iter().next()
            }
        };
        let Some(secret) = secret else {
            return Ok(None);
        };
        let rv = secret.resource_version();
        let body = secret
            .data
            .as_ref()
            .and_then(|d| d.get(DATA_KEY))
            .map(|b| b.0.clone())
            .unwrap_or_default();
        let mut inventory: Inventory = serde_json::from_slice(&body)?;
        if let Some(rv) = rv {
            inventory.set_resource_version(rv);
        }
        trace!(changes = inventory.index.len(), "inventory read");
        Ok(Some(inventory))
    }

    /// Write persists the inventory as a full-body update.
    ///
    /// An existing Secret is replaced using the resourceVersion captured at
    /// read time; a concurrent writer surfaces as [Error::Conflict].
    #[instrument(skip_all, fields(release = inventory.release.name))]
    pub async fn write(&self, inventory: &Inventory) -> Result<()> {
        let name = secret_name(&inventory.release.name, &inventory.release.uuid);
        let secret = self.build_secret(inventory)?;
        let params = PostParams {
            dry_run: false,
            field_manager: Some(api::TOOL_NAME.to_string()),
        };
        let res = match inventory.resource_version() {
            Some(_) => self.secrets.replace(&name, &params, &secret).await,
            None => self.secrets.create(&params, &secret).await,
        };
        match res {
            Ok(_) => {
                debug!(name, "inventory written");
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 409 => Err(Error::Conflict {
                release: inventory.release.name.clone(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete removes the inventory Secret. Missing is success.
    #[instrument(skip_all, fields(release = inventory.release.name))]
    pub async fn delete(&self, inventory: &Inventory) -> Result<()> {
        let name = secret_name(&inventory.release.name, &inventory.release.uuid);
        match self.secrets.delete(&name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    // Build_secret assembles the typed Secret with the exact label
    // contract.
    fn build_secret(&self, inventory: &Inventory) -> Result<Secret> {
        let release = &inventory.release;
        let body = serde_json::to_vec(inventory)?;
        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(secret_name(&release.name, &release.uuid)),
                namespace: Some(self.namespace.clone()),
                labels: Some(secret_labels(&release.name, &release.namespace, &release.uuid)),
                resource_version: inventory.resource_version().map(String::from),
                ..Default::default()
            },
            type_: Some(SECRET_TYPE.to_string()),
            data: Some(BTreeMap::from([(DATA_KEY.to_string(), ByteString(body))])),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::ReleaseMetadata;
    use serde_json::json;

    fn resource(kind: &str, name: &str) -> Resource {
        Resource::new(
            json!({
                "apiVersion": "v1",
                "kind": kind,
                "metadata": {"name": name, "namespace": "default"},
            }),
            "c",
            "t",
        )
    }

    #[test]
    fn digest_is_idempotent() {
        let rs = vec![resource("ConfigMap", "a"), resource("Service", "b")];
        let d1 = manifest_digest(&rs).unwrap();
        let d2 = manifest_digest(&rs).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 64);
    }

    #[test]
    fn digest_ignores_key_order() {
        let a = vec![Resource::new(
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "x"}, "data": {"b": "2", "a": "1"}}),
            "c",
            "t",
        )];
        let b = vec![Resource::new(
            json!({"apiVersion": "v1", "kind": "ConfigMap", "data": {"a": "1", "b": "2"}, "metadata": {"name": "x"}}),
            "c",
            "t",
        )];
        assert_eq!(manifest_digest(&a).unwrap(), manifest_digest(&b).unwrap());
    }

    #[test]
    fn change_id_shape_and_sensitivity() {
        let values = json!({"replicas": 1});
        let id = change_id("/m", "1.0.0", &values, "d").unwrap();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        // Same content, different version: still a distinct change.
        let id2 = change_id("/m", "1.0.1", &values, "d").unwrap();
        assert_ne!(id, id2);
        // Different explicit values, same digest: distinct change.
        let id3 = change_id("/m", "1.0.0", &json!({"replicas": 2}), "d").unwrap();
        assert_ne!(id, id3);
    }

    #[test]
    fn secret_name_and_labels_contract() {
        let uuid = api::identity::release_uuid("f", "my-app", "default");
        assert_eq!(secret_name("my-app", &uuid), format!("opm.my-app.{uuid}"));
        let labels = secret_labels("my-app", "default", &uuid);
        assert_eq!(labels.len(), 5);
        assert_eq!(labels["app.kubernetes.io/managed-by"], "opm");
        assert_eq!(labels["opmodel.dev/component"], "inventory");
        assert_eq!(labels["module-release.opmodel.dev/name"], "my-app");
        assert_eq!(labels["module-release.opmodel.dev/namespace"], "default");
        assert_eq!(labels["module-release.opmodel.dev/uuid"], uuid.to_string());
    }

    #[test]
    fn body_round_trips_through_secret() {
        let uuid = api::identity::release_uuid("f", "r", "ns");
        let mut inventory = Inventory {
            release: ReleaseMetadata {
                name: "r".into(),
                namespace: "ns".into(),
                uuid,
                ..Default::default()
            },
            ..Default::default()
        };
        inventory.record(
            ChangeEntry {
                id: "abcd1234".into(),
                timestamp: "2026-01-01T00:00:00Z".into(),
                ..Default::default()
            },
            api::inventory::MAX_HISTORY,
        );

        let api_obj = InventoryApi {
            secrets: Api::namespaced(test_client(), "ns"),
            namespace: "ns".into(),
        };
        let secret = api_obj.build_secret(&inventory).unwrap();
        let body = &secret.data.unwrap()[DATA_KEY];
        let parsed: Inventory = serde_json::from_slice(&body.0).unwrap();
        assert_eq!(parsed.index, vec!["abcd1234"]);
        assert_eq!(parsed.release.name, "r");
        // The resourceVersion is only ever set by a read.
        assert!(parsed.resource_version().is_none());
    }

    // A client that never dials anything; only used to construct Api
    // handles in unit tests.
    fn test_client() -> kube::Client {
        let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        kube::Client::try_from(config).unwrap()
    }
}
