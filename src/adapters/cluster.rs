//! Writes against the Kubernetes API server

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Patch, PatchParams, PostParams},
    Api, Client, ResourceExt,
};
use serde_json::{json, Map, Value};

use crate::crd::SecretProviderClassPodStatus;
use crate::error::{classify_kube_error, Error, Result};

/// Cluster-write collaborator of the rotation pipeline
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Read a secret live from the API server
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Secret>;

    /// Replace a pod status object
    ///
    /// The object's resourceVersion is sent along, so a stale write fails
    /// with a conflict.
    async fn update_status(&self, status: &SecretProviderClassPodStatus) -> Result<()>;

    /// Replace the data map of `secret` with `data`
    ///
    /// The patch is rejected if the secret changed since `secret` was read.
    async fn patch_secret(&self, secret: &Secret, data: &BTreeMap<String, Vec<u8>>) -> Result<()>;
}

/// Build the JSON merge patch that replaces a secret's data map
///
/// Keys present in the current data but absent from `data` are nulled so the
/// merge removes them, and the read resourceVersion is carried for
/// optimistic locking.
pub fn secret_data_patch(secret: &Secret, data: &BTreeMap<String, Vec<u8>>) -> Value {
    let mut patch_data = Map::new();
    if let Some(current) = &secret.data {
        for key in current.keys().filter(|k| !data.contains_key(*k)) {
            patch_data.insert(key.clone(), Value::Null);
        }
    }
    for (key, value) in data {
        patch_data.insert(
            key.clone(),
            Value::String(base64::engine::general_purpose::STANDARD.encode(value)),
        );
    }

    json!({
        "metadata": {
            "resourceVersion": secret.metadata.resource_version,
        },
        "data": patch_data,
    })
}

/// [`ClusterClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    field_manager: String,
}

impl KubeClusterClient {
    /// Create a client writing as `field_manager`
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Secret> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        secrets
            .get(name)
            .await
            .map_err(|e| classify_kube_error(e, "Secret", &format!("{}/{}", namespace, name)))
    }

    async fn update_status(&self, status: &SecretProviderClassPodStatus) -> Result<()> {
        let name = status.name_any();
        let namespace = status.namespace_or_default();
        let api: Api<SecretProviderClassPodStatus> =
            Api::namespaced(self.client.clone(), &namespace);

        let pp = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        api.replace(&name, &pp, status).await.map_err(|e| {
            classify_kube_error(
                e,
                "SecretProviderClassPodStatus",
                &format!("{}/{}", namespace, name),
            )
        })?;
        Ok(())
    }

    async fn patch_secret(&self, secret: &Secret, data: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        let name = secret.name_any();
        let namespace = secret
            .namespace()
            .ok_or_else(|| Error::validation(format!("secret {} has no namespace", name)))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);

        let patch = secret_data_patch(secret, data);
        api.patch(
            &name,
            &PatchParams::apply(&self.field_manager),
            &Patch::Merge(patch),
        )
        .await
        .map_err(|e| classify_kube_error(e, "Secret", &format!("{}/{}", namespace, name)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;

    #[test]
    fn patch_replaces_whole_data_map_with_resource_version() {
        let mut current = BTreeMap::new();
        current.insert("password".to_string(), ByteString(b"oldpass".to_vec()));
        current.insert("stale".to_string(), ByteString(b"x".to_vec()));
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("app-creds".to_string()),
                namespace: Some("default".to_string()),
                resource_version: Some("42".to_string()),
                ..Default::default()
            },
            data: Some(current),
            ..Default::default()
        };

        let mut data = BTreeMap::new();
        data.insert("password".to_string(), b"newpass".to_vec());

        let patch = secret_data_patch(&secret, &data);
        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert_eq!(patch["data"]["password"], "bmV3cGFzcw==");
        assert_eq!(patch["data"]["stale"], Value::Null);
    }
}
