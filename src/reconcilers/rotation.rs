//! Rotation pipeline for one pod status
//!
//! Resolves the pod, its secret provider class and the matching volume,
//! asks the provider to re-mount the latest content, records changed
//! versions and finally syncs the secrets the class declares. The pipeline
//! returns a [`RotationOutcome`]; publishing events and metrics is left to
//! the caller.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::core::v1::{ObjectReference, Pod, Volume};
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info};

use super::outcome::{RotationError, RotationEvent, RotationOutcome, SecretObjectError, Stage};
use super::{secret_patch, versions};
use crate::adapters::{
    credential_payload, pod_uid_from_target_path, read_mounted_files, secret_data, secret_type,
    validate_secret_object, volume_name_from_target_path, ClusterClient, EventKind, ObjectStore,
};
use crate::crd::{SecretObject, SecretProviderClass, SecretProviderClassPodStatus};
use crate::provider::{MountContentRequest, ProviderClientCache};
use crate::queue::{retry_with_backoff, Backoff};

/// Name of the CSI driver whose volumes are rotated
pub const CSI_DRIVER_NAME: &str = "secrets-store.csi.k8s.io";

/// Volume attribute naming the secret provider class
pub const SECRET_PROVIDER_CLASS_ATTRIBUTE: &str = "secretProviderClass";

/// Permission of files written into the mount
pub const FILE_PERMISSION: u32 = 0o644;

pub const POD_NAME_ATTRIBUTE: &str = "csi.storage.k8s.io/pod.name";
pub const POD_NAMESPACE_ATTRIBUTE: &str = "csi.storage.k8s.io/pod.namespace";
pub const POD_UID_ATTRIBUTE: &str = "csi.storage.k8s.io/pod.uid";
pub const SERVICE_ACCOUNT_ATTRIBUTE: &str = "csi.storage.k8s.io/serviceAccount.name";

pub const MOUNT_ROTATION_FAILED: &str = "MountRotationFailed";
pub const MOUNT_ROTATION_COMPLETE: &str = "MountRotationComplete";
pub const SECRET_ROTATION_FAILED: &str = "SecretRotationFailed";
pub const SECRET_ROTATION_COMPLETE: &str = "SecretRotationComplete";

/// Runs the rotation pipeline against injected collaborators
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    cluster: Arc<dyn ClusterClient>,
    providers: Arc<ProviderClientCache>,
    backoff: Backoff,
}

/// Progress of a single attempt
struct Attempt {
    stage: Stage,
    provider: Option<String>,
    requires_update: bool,
    pod: Option<ObjectReference>,
    events: Vec<RotationEvent>,
}

impl Attempt {
    fn event(&mut self, kind: EventKind, reason: &'static str, message: String) {
        self.events.push(RotationEvent {
            kind,
            reason,
            message,
        });
    }
}

/// Whether the pod is terminating or has finished
fn is_terminal(pod: &Pod) -> bool {
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    pod.metadata.deletion_timestamp.is_some() || matches!(phase, Some("Succeeded") | Some("Failed"))
}

/// Volume of `pod` mounting the class `class_name` through the driver
fn class_volume<'a>(pod: &'a Pod, class_name: &str) -> Option<&'a Volume> {
    pod.spec.as_ref()?.volumes.as_ref()?.iter().find(|v| {
        v.csi.as_ref().is_some_and(|csi| {
            csi.driver == CSI_DRIVER_NAME
                && csi
                    .volume_attributes
                    .as_ref()
                    .and_then(|attrs| attrs.get(SECRET_PROVIDER_CLASS_ATTRIBUTE))
                    .is_some_and(|name| name == class_name)
        })
    })
}

impl Reconciler {
    /// Create a reconciler with the default write backoff
    pub fn new(
        store: Arc<dyn ObjectStore>,
        cluster: Arc<dyn ClusterClient>,
        providers: Arc<ProviderClientCache>,
    ) -> Self {
        Self {
            store,
            cluster,
            providers,
            backoff: Backoff::default(),
        }
    }

    /// Override the backoff of status writes and secret patches
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Rotate the content of the mount described by `status`
    pub async fn reconcile(&self, status: &SecretProviderClassPodStatus) -> RotationOutcome {
        let started = Instant::now();
        let mut attempt = Attempt {
            stage: Stage::ResolvePod,
            provider: None,
            requires_update: false,
            pod: None,
            events: Vec::new(),
        };

        let result = self.rotate(status, &mut attempt).await;
        if let Err(e) = &result {
            error!(
                key = %status.key(),
                pod = %status.status.pod_name,
                class = %status.status.secret_provider_class_name,
                error = %e,
                "Failed to reconcile secret provider class for pod"
            );
        }

        RotationOutcome {
            key: status.key(),
            stage: attempt.stage,
            provider: attempt.provider,
            requires_update: attempt.requires_update,
            pod: attempt.pod,
            events: attempt.events,
            elapsed: started.elapsed(),
            result,
        }
    }

    async fn rotate(
        &self,
        status: &SecretProviderClassPodStatus,
        attempt: &mut Attempt,
    ) -> Result<(), RotationError> {
        let namespace = status.namespace_or_default();
        let pod_name = status.status.pod_name.as_str();
        let pod_key = format!("{}/{}", namespace, pod_name);
        let target_path = status.status.target_path.as_str();

        let pod = self
            .store
            .get_pod(pod_name, &namespace)
            .await
            .map_err(|source| RotationError::PodNotFound {
                pod: pod_key.clone(),
                source,
            })?;
        if is_terminal(&pod) {
            debug!(pod = %pod_key, "Pod is being terminated, skipping rotation");
            attempt.stage = Stage::Skipped;
            return Ok(());
        }
        attempt.pod = Some(pod.object_ref(&()));

        attempt.stage = Stage::ResolveClaim;
        let class_name = status.status.secret_provider_class_name.as_str();
        let class = self
            .store
            .get_claim(class_name, &namespace)
            .await
            .map_err(|source| RotationError::ClaimNotFound {
                class: format!("{}/{}", namespace, class_name),
                source,
            })?;
        attempt.provider = Some(class.spec.provider.clone());

        let volume = class_volume(&pod, class_name).ok_or_else(|| RotationError::VolumeNotFound {
            class: class_name.to_string(),
            pod: pod_key.clone(),
        })?;
        let pod_uid = pod.metadata.uid.as_deref().unwrap_or_default();
        if pod_uid_from_target_path(target_path).as_deref() != Some(pod_uid) {
            return Err(RotationError::UnexpectedTargetPath {
                pod: pod_key,
                target_path: target_path.to_string(),
                field: "UID",
            });
        }
        if volume_name_from_target_path(target_path).as_deref() != Some(volume.name.as_str()) {
            return Err(RotationError::UnexpectedTargetPath {
                pod: pod_key,
                target_path: target_path.to_string(),
                field: "volume name",
            });
        }

        attempt.stage = Stage::BuildRequest;
        let request = match self.mount_request(status, &pod, &class, volume).await {
            Ok(request) => request,
            Err(e) => {
                attempt.event(EventKind::Warning, MOUNT_ROTATION_FAILED, e.to_string());
                return Err(e);
            }
        };
        let old_versions = request.current_object_versions.clone();

        attempt.stage = Stage::ProviderMount;
        let provider = class.spec.provider.as_str();
        let client = match self.providers.get(provider) {
            Ok(client) => client,
            Err(source) => {
                attempt.event(
                    EventKind::Warning,
                    MOUNT_ROTATION_FAILED,
                    format!("failed to create provider client, err: {}", source),
                );
                return Err(RotationError::ProviderClientCreationFailed {
                    provider: provider.to_string(),
                    source,
                });
            }
        };
        let new_versions = match client.mount_content(request).await {
            Ok(versions) => versions,
            Err(source) => {
                attempt.event(
                    EventKind::Warning,
                    MOUNT_ROTATION_FAILED,
                    format!("provider mount err: {}", source),
                );
                return Err(RotationError::ProviderMountFailed {
                    pod: pod_key,
                    code: source.provider_code().map(str::to_string),
                    source,
                });
            }
        };

        attempt.requires_update = versions::requires_update(&old_versions, &new_versions);
        if attempt.requires_update {
            attempt.stage = Stage::PersistStatus;
            info!(key = %status.key(), provider = %provider, "Updating versions in pod status");

            let mut updated = status.clone();
            updated.status.objects = versions::to_objects(&new_versions);
            let written =
                retry_with_backoff(self.backoff, || self.cluster.update_status(&updated)).await;
            if let Err(source) = written {
                attempt.event(
                    EventKind::Warning,
                    MOUNT_ROTATION_FAILED,
                    format!(
                        "failed to update versions in pod status {}, err: {}",
                        status.key(),
                        source
                    ),
                );
                return Err(RotationError::StatusWriteFailed {
                    key: status.key(),
                    source,
                });
            }
            attempt.event(
                EventKind::Normal,
                MOUNT_ROTATION_COMPLETE,
                format!(
                    "successfully rotated mounted contents for spc {}/{}",
                    namespace, class_name
                ),
            );
        }

        if class.spec.secret_objects.is_empty() {
            debug!(class = %class_name, pod = %pod_key, "Class declares no secret objects");
            attempt.stage = Stage::Complete;
            return Ok(());
        }

        attempt.stage = Stage::SecretFanOut;
        let files = match read_mounted_files(Path::new(target_path)) {
            Ok(files) => files,
            Err(source) => {
                attempt.event(
                    EventKind::Warning,
                    SECRET_ROTATION_FAILED,
                    format!("failed to get mounted files, err: {}", source),
                );
                return Err(RotationError::MountedFilesUnreadable {
                    target_path: target_path.to_string(),
                    source,
                });
            }
        };

        let mut failures = Vec::new();
        for object in &class.spec.secret_objects {
            match self.sync_secret(object, &namespace, &files).await {
                Ok(()) => attempt.event(
                    EventKind::Normal,
                    SECRET_ROTATION_COMPLETE,
                    format!("successfully rotated K8s secret {}", object.secret_name.trim()),
                ),
                Err(e) => {
                    error!(secret = %e.secret(), namespace = %namespace, class = %class_name, error = %e, "Failed to rotate secret");
                    attempt.event(EventKind::Warning, SECRET_ROTATION_FAILED, e.to_string());
                    failures.push(e);
                }
            }
        }
        if !failures.is_empty() {
            return Err(RotationError::SecretRotationFailed { failures });
        }

        attempt.stage = Stage::Complete;
        Ok(())
    }

    /// Build the provider request mirroring the attributes of the initial mount
    async fn mount_request(
        &self,
        status: &SecretProviderClassPodStatus,
        pod: &Pod,
        class: &SecretProviderClass,
        volume: &Volume,
    ) -> Result<MountContentRequest, RotationError> {
        let namespace = status.namespace_or_default();

        let mut attributes = class.spec.parameters.clone();
        attributes.insert(POD_NAME_ATTRIBUTE.to_string(), pod.name_any());
        attributes.insert(POD_NAMESPACE_ATTRIBUTE.to_string(), namespace.clone());
        attributes.insert(
            POD_UID_ATTRIBUTE.to_string(),
            pod.metadata.uid.clone().unwrap_or_default(),
        );
        attributes.insert(
            SERVICE_ACCOUNT_ATTRIBUTE.to_string(),
            pod.spec
                .as_ref()
                .and_then(|s| s.service_account_name.clone())
                .unwrap_or_default(),
        );

        let secret_ref = volume
            .csi
            .as_ref()
            .and_then(|csi| csi.node_publish_secret_ref.as_ref())
            .map(|r| r.name.trim())
            .filter(|name| !name.is_empty());
        let credentials = match secret_ref {
            Some(name) => {
                let secret = self.store.get_secret(name, &namespace).await.map_err(|source| {
                    RotationError::CredentialSecretNotFound {
                        secret: format!("{}/{}", namespace, name),
                        source,
                    }
                })?;
                credential_payload(Some(&secret))
            }
            None => credential_payload(None),
        }
        .map_err(RotationError::Serialization)?;

        Ok(MountContentRequest {
            attributes: serde_json::to_string(&attributes)
                .map_err(|e| RotationError::Serialization(e.into()))?,
            secrets: credentials,
            target_path: status.status.target_path.clone(),
            permission: serde_json::to_string(&FILE_PERMISSION)
                .map_err(|e| RotationError::Serialization(e.into()))?,
            current_object_versions: versions::from_objects(status.objects()),
        })
    }

    /// Validate, extract and patch one declared secret
    async fn sync_secret(
        &self,
        object: &SecretObject,
        namespace: &str,
        files: &BTreeMap<String, Vec<u8>>,
    ) -> Result<(), SecretObjectError> {
        let secret = object.secret_name.trim().to_string();

        if let Err(source) = validate_secret_object(object) {
            return Err(SecretObjectError::Validation { secret, source });
        }

        let kind = secret_type(object.type_.trim());
        let data = match secret_data(&object.data, kind, files) {
            Ok(data) => data,
            Err(source) => return Err(SecretObjectError::Data { secret, source }),
        };

        let cluster = self.cluster.as_ref();
        match retry_with_backoff(self.backoff, || {
            secret_patch::patch_secret(cluster, &secret, namespace, &data)
        })
        .await
        {
            Ok(result) => {
                debug!(secret = %secret, namespace = %namespace, result = ?result, "Secret synced");
                Ok(())
            }
            Err(source) => Err(SecretObjectError::Patch { secret, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{CSIVolumeSource, PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn pod(volumes: Vec<Volume>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("app".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("uid-1".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                volumes: Some(volumes),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn csi_volume(name: &str, driver: &str, class: &str) -> Volume {
        let mut attrs = BTreeMap::new();
        attrs.insert(SECRET_PROVIDER_CLASS_ATTRIBUTE.to_string(), class.to_string());
        Volume {
            name: name.to_string(),
            csi: Some(CSIVolumeSource {
                driver: driver.to_string(),
                volume_attributes: Some(attrs),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn finished_or_deleted_pods_are_terminal() {
        let mut p = pod(vec![]);
        assert!(!is_terminal(&p));

        for phase in ["Succeeded", "Failed"] {
            p.status = Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            });
            assert!(is_terminal(&p));
        }

        p.status = None;
        p.metadata.deletion_timestamp = Some(Time(Default::default()));
        assert!(is_terminal(&p));
    }

    #[test]
    fn volume_must_match_driver_and_class() {
        let p = pod(vec![
            csi_volume("other-driver", "example.com/csi", "spc-1"),
            csi_volume("other-class", CSI_DRIVER_NAME, "spc-2"),
            csi_volume("secrets", CSI_DRIVER_NAME, "spc-1"),
        ]);
        assert_eq!(class_volume(&p, "spc-1").map(|v| v.name.as_str()), Some("secrets"));
        assert!(class_volume(&p, "spc-3").is_none());
    }

    #[test]
    fn file_permission_serializes_as_decimal() {
        assert_eq!(serde_json::to_string(&FILE_PERMISSION).unwrap(), "420");
    }
}
