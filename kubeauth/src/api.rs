//! Looking up `KubernetesCluster` resources in the central resource API.

use std::error::Error as StdError;
use std::path::PathBuf;

use kube::api::{ApiResource, DynamicObject};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Api;
use tracing::debug;

use crate::resolve::{ClusterIdentity, ClusterSource, KubernetesClusterStatus, LookupError};

pub const API_GROUP: &str = "infrastructure.nine.ch";
pub const API_VERSION: &str = "v1alpha1";

/// Kubeconfig context of the resource API unless told otherwise.
pub const DEFAULT_API_CLUSTER: &str = "nineapis.ch";

fn kubernetes_cluster_resource() -> ApiResource {
    ApiResource {
        group: API_GROUP.to_string(),
        version: API_VERSION.to_string(),
        api_version: format!("{API_GROUP}/{API_VERSION}"),
        kind: "KubernetesCluster".to_string(),
        plural: "kubernetesclusters".to_string(),
    }
}

fn upstream<E>(identity: &ClusterIdentity) -> impl FnOnce(E) -> LookupError + '_
where
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    move |e| LookupError::Upstream {
        identity: identity.clone(),
        source: e.into(),
    }
}

/// Reaches the resource API through a context of a kubeconfig file. The
/// client is only built when a lookup happens.
#[derive(Debug, Clone)]
pub struct KubeClusterSource {
    pub kubeconfig: PathBuf,
    pub context: String,
}

impl KubeClusterSource {
    pub fn new(kubeconfig: PathBuf, context: impl Into<String>) -> Self {
        Self {
            kubeconfig,
            context: context.into(),
        }
    }

    async fn client(&self) -> Result<kube::Client, Box<dyn StdError + Send + Sync>> {
        debug!(context = %self.context, path = %self.kubeconfig.display(), "connecting to resource API");
        let kubeconfig = Kubeconfig::read_from(&self.kubeconfig)?;
        let config = kube::Config::from_custom_kubeconfig(
            kubeconfig,
            &KubeConfigOptions {
                context: Some(self.context.clone()),
                ..Default::default()
            },
        )
        .await?;
        Ok(kube::Client::try_from(config)?)
    }

    async fn fetch(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<KubernetesClusterStatus, LookupError> {
        let client = self.client().await.map_err(upstream(identity))?;
        let api: Api<DynamicObject> =
            Api::namespaced_with(client, &identity.namespace, &kubernetes_cluster_resource());

        let cluster = match api.get(&identity.name).await {
            Ok(cluster) => cluster,
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                return Err(LookupError::NotFound(identity.clone()))
            }
            Err(e) => return Err(upstream(identity)(e)),
        };

        match cluster.data.get("status") {
            Some(status) if !status.is_null() => {
                serde_json::from_value(status.clone()).map_err(upstream(identity))
            }
            _ => Ok(KubernetesClusterStatus::default()),
        }
    }
}

impl ClusterSource for KubeClusterSource {
    fn get_cluster(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<KubernetesClusterStatus, LookupError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(upstream(identity))?;
        runtime.block_on(self.fetch(identity))
    }
}
