//! SecretProviderClass Custom Resource Definition

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// SecretProviderClass resource specification
///
/// Declares which provider serves a mount, the provider-specific parameters
/// passed on every mount request, and the Kubernetes secrets that mirror the
/// mounted files.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "secrets-store.csi.x-k8s.io",
    version = "v1",
    kind = "SecretProviderClass",
    plural = "secretproviderclasses",
    singular = "secretproviderclass",
    shortname = "spc",
    namespaced,
    printcolumn = r#"{"name": "Provider", "type": "string", "jsonPath": ".spec.provider"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SecretProviderClassSpec {
    /// Name of the provider plugin serving this class
    pub provider: String,

    /// Provider-specific parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,

    /// Kubernetes secrets synced from the mounted content
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_objects: Vec<SecretObject>,
}

/// A Kubernetes secret derived from mounted files
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretObject {
    /// Name of the Kubernetes secret
    pub secret_name: String,

    /// Kubernetes secret type (Opaque, kubernetes.io/tls, ...)
    #[serde(rename = "type")]
    pub type_: String,

    /// Labels applied to the secret on creation
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations applied to the secret on creation
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Data key extraction rules
    #[serde(default)]
    pub data: Vec<SecretObjectData>,
}

/// Maps a mounted object to a key of the secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretObjectData {
    /// Name of the mounted file
    pub object_name: String,

    /// Key in the secret's data map
    pub key: String,

    /// Encoding of the file content (utf-8, base64, hex). Defaults to raw bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}
