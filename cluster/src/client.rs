//! Client bootstraps the kubernetes client from the usual configuration
//! sources.

use std::path::Path;

use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::{debug, instrument};

use crate::Result;

/// Connect builds a client.
///
/// An explicit kubeconfig path wins over the ambient environment; a context
/// name selects a context within whichever kubeconfig is used. With neither
/// set, configuration is inferred the standard way (in-cluster, then
/// `$KUBECONFIG`, then `~/.kube/config`).
#[instrument(skip_all)]
pub async fn connect(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<kube::Client> {
    let options = KubeConfigOptions {
        context: context.map(String::from),
        ..Default::default()
    };
    let config = match kubeconfig {
        Some(path) => {
            debug!(path = %path.display(), "using explicit kubeconfig");
            let kc = Kubeconfig::read_from(path)?;
            kube::Config::from_custom_kubeconfig(kc, &options).await?
        }
        None if context.is_some() => kube::Config::from_kubeconfig(&options).await?,
        None => kube::Config::infer().await?,
    };
    Ok(kube::client::ClientBuilder::try_from(config)?.build())
}
