//! Dynamic resolves rendered resources and inventory entries to typed-erased
//! cluster APIs through discovery.

use kube::api::{Api, DynamicObject};
use kube::core::GroupVersionKind;
use kube::discovery::{ApiCapabilities, ApiResource, Discovery, Scope};
use tracing::instrument;

use api::inventory::Entry;
use api::resource::Resource;

use crate::{Error, Result};

/// DynamicApi is a client paired with a completed discovery run.
pub struct DynamicApi {
    client: kube::Client,
    discovery: Discovery,
}

impl DynamicApi {
    /// New runs discovery against the cluster.
    #[instrument(skip_all)]
    pub async fn new(client: kube::Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(DynamicApi { client, discovery })
    }

    /// Resolve maps (apiVersion, kind) to the served API resource.
    pub fn resolve(&self, api_version: &str, kind: &str) -> Result<(ApiResource, ApiCapabilities)> {
        let (group, version) = match api_version.rsplit_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };
        let gvk = GroupVersionKind {
            group,
            version,
            kind: kind.to_string(),
        };
        self.discovery.resolve_gvk(&gvk).ok_or_else(|| Error::UnknownKind {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        })
    }

    /// Api_for returns an API handle scoped per the kind's capabilities.
    pub fn api_for(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
    ) -> Result<Api<DynamicObject>> {
        let (ar, caps) = self.resolve(api_version, kind)?;
        Ok(if caps.scope == Scope::Namespaced {
            let ns = if namespace.is_empty() { "default" } else { namespace };
            Api::namespaced_with(self.client.clone(), ns, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        })
    }

    /// Api_for_resource resolves a rendered resource.
    pub fn api_for_resource(&self, r: &Resource) -> Result<Api<DynamicObject>> {
        self.api_for(r.api_version(), r.kind(), r.namespace())
    }

    /// Api_for_entry resolves an inventory entry.
    pub fn api_for_entry(&self, e: &Entry) -> Result<Api<DynamicObject>> {
        self.api_for(&e.api_version, &e.kind, &e.namespace)
    }

    /// Client borrows the underlying client.
    pub fn client(&self) -> &kube::Client {
        &self.client
    }
}
