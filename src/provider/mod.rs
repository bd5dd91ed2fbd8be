//! Provider plugins
//!
//! Providers are out-of-process plugins reached over a unix domain socket.
//! The rotation pipeline only needs their mount operation, expressed by
//! [`ProviderClient`]; [`ProviderClientCache`] hands out one client per
//! provider name for the lifetime of the process.

mod cache;
mod grpc;

pub use cache::ProviderClientCache;
pub use grpc::{v1alpha1, GrpcProviderClient, UnixSocketConnector};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Object ID to version, as exchanged with providers
pub type ObjectVersions = BTreeMap<String, String>;

/// A mount (or re-mount) request for one target path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountContentRequest {
    /// JSON-serialized class parameters plus pod identity attributes
    pub attributes: String,
    /// JSON-serialized provider credentials
    pub secrets: String,
    /// Kubelet target path of the mount
    pub target_path: String,
    /// JSON-serialized file permission
    pub permission: String,
    /// Versions currently recorded for the mount
    pub current_object_versions: ObjectVersions,
}

/// Client for one provider plugin
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Mount the latest content into the target path and report its versions
    async fn mount_content(&self, request: MountContentRequest) -> Result<ObjectVersions>;
}

/// Builds provider clients by provider name
pub trait ProviderConnector: Send + Sync {
    /// Create a client for `provider`
    fn connect(&self, provider: &str) -> Result<Arc<dyn ProviderClient>>;
}
