//! Read-only cache of the cluster objects the rotation pipeline consults
//!
//! [`KubeStore`] keeps reflector caches of the node's pods and pod statuses,
//! all secret provider classes, and the secrets labelled for driver use.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::{
    runtime::{
        reflector::{self, ObjectRef, Store},
        watcher, WatchStreamExt,
    },
    Api, Client, Resource,
};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::crd::{SecretProviderClass, SecretProviderClassPodStatus, NODE_NAME_LABEL};
use crate::error::{Error, Result};

/// Label marking secrets referenced by CSI volumes
pub const SECRET_USED_LABEL: &str = "secrets-store.csi.k8s.io/used";

/// Cache collaborator of the rotation pipeline
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List pod statuses scoped to the local node
    async fn list_local_statuses(&self) -> Result<Vec<Arc<SecretProviderClassPodStatus>>>;

    /// Get a pod status by queue key (`namespace/name`)
    async fn get_status(&self, key: &str) -> Result<Arc<SecretProviderClassPodStatus>>;

    /// Get a pod
    async fn get_pod(&self, name: &str, namespace: &str) -> Result<Arc<Pod>>;

    /// Get a secret provider class
    async fn get_claim(&self, name: &str, namespace: &str) -> Result<Arc<SecretProviderClass>>;

    /// Get a secret
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Arc<Secret>>;
}

/// Split a queue key into `(namespace, name)`
pub fn split_key(key: &str) -> Result<(&str, &str)> {
    match key.split_once('/') {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
            Ok((namespace, name))
        }
        None if !key.is_empty() => Ok(("", key)),
        _ => Err(Error::validation(format!("invalid queue key '{}'", key))),
    }
}

/// Reflector-backed [`ObjectStore`]
#[derive(Clone)]
pub struct KubeStore {
    pods: Store<Pod>,
    statuses: Store<SecretProviderClassPodStatus>,
    claims: Store<SecretProviderClass>,
    secrets: Store<Secret>,
}

impl KubeStore {
    /// Start the reflectors for `node_name` and wait for their initial lists
    pub async fn start(client: Client, node_name: &str) -> Result<Self> {
        let pods = spawn_reflector(
            Api::<Pod>::all(client.clone()),
            watcher::Config::default().fields(&format!("spec.nodeName={}", node_name)),
        );
        let statuses = spawn_reflector(
            Api::<SecretProviderClassPodStatus>::all(client.clone()),
            watcher::Config::default().labels(&format!("{}={}", NODE_NAME_LABEL, node_name)),
        );
        let claims = spawn_reflector(
            Api::<SecretProviderClass>::all(client.clone()),
            watcher::Config::default(),
        );
        let secrets = spawn_reflector(
            Api::<Secret>::all(client),
            watcher::Config::default().labels(&format!("{}=true", SECRET_USED_LABEL)),
        );

        for (kind, ready) in [
            ("pods", pods.wait_until_ready().await),
            ("secretproviderclasspodstatuses", statuses.wait_until_ready().await),
            ("secretproviderclasses", claims.wait_until_ready().await),
            ("secrets", secrets.wait_until_ready().await),
        ] {
            ready.map_err(|e| Error::config(format!("{} cache did not sync: {}", kind, e)))?;
        }
        info!(node = %node_name, "Informer caches synced");

        Ok(Self {
            pods,
            statuses,
            claims,
            secrets,
        })
    }
}

fn spawn_reflector<K>(api: Api<K>, config: watcher::Config) -> Store<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    let (reader, writer) = reflector::store();
    let stream = reflector::reflector(writer, watcher(api, config))
        .default_backoff()
        .applied_objects()
        .for_each(|res| async move {
            if let Err(e) = res {
                warn!(kind = %K::kind(&()), error = %e, "Watch stream error");
            }
        });
    tokio::spawn(stream);
    reader
}

fn lookup<K>(store: &Store<K>, kind: &'static str, name: &str, namespace: &str) -> Result<Arc<K>>
where
    K: Resource<DynamicType = ()> + Clone,
{
    let mut obj_ref = ObjectRef::<K>::new(name);
    if !namespace.is_empty() {
        obj_ref = obj_ref.within(namespace);
    }
    store
        .get(&obj_ref)
        .ok_or_else(|| Error::not_found(kind, format!("{}/{}", namespace, name)))
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn list_local_statuses(&self) -> Result<Vec<Arc<SecretProviderClassPodStatus>>> {
        Ok(self.statuses.state())
    }

    async fn get_status(&self, key: &str) -> Result<Arc<SecretProviderClassPodStatus>> {
        let (namespace, name) = split_key(key)?;
        lookup(&self.statuses, "SecretProviderClassPodStatus", name, namespace)
    }

    async fn get_pod(&self, name: &str, namespace: &str) -> Result<Arc<Pod>> {
        lookup(&self.pods, "Pod", name, namespace)
    }

    async fn get_claim(&self, name: &str, namespace: &str) -> Result<Arc<SecretProviderClass>> {
        lookup(&self.claims, "SecretProviderClass", name, namespace)
    }

    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Arc<Secret>> {
        lookup(&self.secrets, "Secret", name, namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_key_handles_namespaced_and_cluster_keys() {
        assert_eq!(split_key("apps/status-a").unwrap(), ("apps", "status-a"));
        assert_eq!(split_key("status-a").unwrap(), ("", "status-a"));
        assert!(split_key("").is_err());
        assert!(split_key("apps/").is_err());
    }
}
