//! Custom Resource Definitions for the rotation controller

mod secret_provider_class;
mod secret_provider_class_pod_status;

pub use secret_provider_class::*;
pub use secret_provider_class_pod_status::*;

use kube::CustomResourceExt;

use crate::error::Result;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>> {
    Ok(vec![
        serde_yaml::to_string(&SecretProviderClass::crd())?,
        serde_yaml::to_string(&SecretProviderClassPodStatus::crd()?)?,
    ])
}
