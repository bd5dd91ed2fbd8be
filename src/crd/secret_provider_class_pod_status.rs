//! SecretProviderClassPodStatus Custom Resource Definition
//!
//! The CSI driver writes these objects with everything under `status` and no
//! `spec`, and without a status subresource. The kube derive always requires
//! a `spec` on the wire, so the `Resource` impl and the CRD are written out by
//! hand here in the same shape the derive would generate.

use std::borrow::Cow;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::schema::StructuralSchemaRewriter;
use kube::core::NamespaceResourceScope;
use kube::Resource;
use schemars::JsonSchema;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

/// Label carrying the node a pod status belongs to
pub const NODE_NAME_LABEL: &str = "internal.secrets-store.csi.k8s.io/node-name";

const GROUP: &str = "secrets-store.csi.x-k8s.io";
const VERSION: &str = "v1";
const KIND: &str = "SecretProviderClassPodStatus";
const PLURAL: &str = "secretproviderclasspodstatuses";
const SINGULAR: &str = "secretproviderclasspodstatus";

/// Mount record for one pod and one mounted volume
#[derive(Clone, Debug, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretProviderClassPodStatus {
    #[schemars(skip)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub status: SecretProviderClassPodStatusStatus,
}

/// Pod, class and target path of the mount, plus the delivered object versions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretProviderClassPodStatusStatus {
    /// Name of the pod owning the mount
    #[serde(default)]
    pub pod_name: String,

    /// SecretProviderClass the mount references
    #[serde(default)]
    pub secret_provider_class_name: String,

    /// Whether the volume has been mounted
    #[serde(default)]
    pub mounted: bool,

    /// Kubelet target path of the mount
    #[serde(default)]
    pub target_path: String,

    /// Versions of the objects currently in the mount
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<SecretProviderClassObject>,
}

/// An object ID and the version delivered for it
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretProviderClassObject {
    /// Provider-scoped object identifier
    pub id: String,

    /// Provider-reported object version
    pub version: String,
}

impl Resource for SecretProviderClassPodStatus {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        KIND.into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        GROUP.into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        VERSION.into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        PLURAL.into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Serialize for SecretProviderClassPodStatus {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        let mut obj = ser.serialize_struct(KIND, 4)?;
        obj.serialize_field("apiVersion", &Self::api_version(&()))?;
        obj.serialize_field("kind", KIND)?;
        obj.serialize_field("metadata", &self.metadata)?;
        obj.serialize_field("status", &self.status)?;
        obj.end()
    }
}

impl SecretProviderClassPodStatus {
    /// Build a named status for the given mount
    pub fn new(name: &str, status: SecretProviderClassPodStatusStatus) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status,
        }
    }

    /// CustomResourceDefinition for this kind
    pub fn crd() -> Result<CustomResourceDefinition, serde_json::Error> {
        let gen = schemars::gen::SchemaSettings::openapi3()
            .with(|s| {
                s.inline_subschemas = true;
                s.meta_schema = None;
            })
            .with_visitor(StructuralSchemaRewriter)
            .into_generator();
        let schema = gen.into_root_schema_for::<Self>();

        serde_json::from_value(serde_json::json!({
            "metadata": { "name": format!("{}.{}", PLURAL, GROUP) },
            "spec": {
                "group": GROUP,
                "scope": "Namespaced",
                "names": {
                    "plural": PLURAL,
                    "singular": SINGULAR,
                    "kind": KIND,
                    "shortNames": ["spcps"]
                },
                "versions": [{
                    "name": VERSION,
                    "served": true,
                    "storage": true,
                    "schema": { "openAPIV3Schema": schema },
                    "additionalPrinterColumns": [
                        { "name": "Pod", "type": "string", "jsonPath": ".status.podName" },
                        { "name": "Class", "type": "string", "jsonPath": ".status.secretProviderClassName" },
                        { "name": "Mounted", "type": "boolean", "jsonPath": ".status.mounted" },
                        { "name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp" }
                    ]
                }]
            }
        }))
    }

    /// Queue key of this status (`namespace/name`)
    pub fn key(&self) -> String {
        let name = self.metadata.name.as_deref().unwrap_or_default();
        match self.metadata.namespace.as_deref() {
            Some(namespace) if !namespace.is_empty() => format!("{}/{}", namespace, name),
            _ => name.to_string(),
        }
    }

    /// Namespace of this status, which is also the pod's namespace
    pub fn namespace_or_default(&self) -> String {
        self.metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn objects(&self) -> &[SecretProviderClassObject] {
        &self.status.objects
    }
}
