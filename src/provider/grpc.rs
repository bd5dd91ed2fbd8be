//! CSI driver provider gRPC client over unix domain sockets

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::debug;

use super::{MountContentRequest, ObjectVersions, ProviderClient, ProviderConnector};
use crate::adapters::{write_payloads, Payload};
use crate::error::{Error, Result};

const MOUNT_PATH: &str = "/v1alpha1.CSIDriverProvider/Mount";
const MAX_PROVIDER_NAME_LEN: usize = 30;

/// Messages of the `v1alpha1.CSIDriverProvider` service
pub mod v1alpha1 {
    /// Mount request sent to a provider
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct MountRequest {
        #[prost(string, tag = "1")]
        pub attributes: String,
        #[prost(string, tag = "2")]
        pub secrets: String,
        #[prost(string, tag = "3")]
        pub target_path: String,
        #[prost(string, tag = "4")]
        pub permission: String,
        #[prost(message, repeated, tag = "5")]
        pub current_object_version: Vec<ObjectVersion>,
    }

    /// Mount response returned by a provider
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct MountResponse {
        #[prost(message, repeated, tag = "1")]
        pub object_version: Vec<ObjectVersion>,
        #[prost(message, optional, tag = "2")]
        pub error: Option<Error>,
        #[prost(message, repeated, tag = "3")]
        pub files: Vec<File>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ObjectVersion {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(string, tag = "2")]
        pub version: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Error {
        #[prost(string, tag = "1")]
        pub code: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct File {
        #[prost(string, tag = "1")]
        pub path: String,
        #[prost(int32, tag = "2")]
        pub mode: i32,
        #[prost(bytes = "vec", tag = "3")]
        pub contents: Vec<u8>,
    }
}

/// Check a provider name before turning it into a socket path
pub fn validate_provider_name(provider: &str) -> Result<()> {
    let valid = !provider.is_empty()
        && provider.len() <= MAX_PROVIDER_NAME_LEN
        && provider
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(Error::validation(format!(
            "invalid provider name '{}': must be 1-{} characters of [a-zA-Z0-9_-]",
            provider, MAX_PROVIDER_NAME_LEN
        )));
    }
    Ok(())
}

/// Socket a provider listens on under `socket_dir`
pub fn provider_socket_path(socket_dir: &Path, provider: &str) -> PathBuf {
    socket_dir.join(format!("{}.sock", provider))
}

/// Provider client speaking gRPC over a unix socket
#[derive(Clone)]
pub struct GrpcProviderClient {
    provider: String,
    channel: Channel,
}

impl GrpcProviderClient {
    /// Create a client that connects to `socket_path` on first use
    pub fn connect_lazy(provider: &str, socket_path: PathBuf, timeout: Duration) -> Result<Self> {
        let channel = Endpoint::try_from("http://[::]:50051")?
            .timeout(timeout)
            .connect_with_connector_lazy(service_fn(move |_: Uri| {
                let socket_path = socket_path.clone();
                async move {
                    let stream = UnixStream::connect(socket_path).await?;
                    Ok::<_, std::io::Error>(TokioIo::new(stream))
                }
            }));

        Ok(Self {
            provider: provider.to_string(),
            channel,
        })
    }
}

/// Convert a provider response into recorded versions and payloads
fn into_versions(
    provider: &str,
    response: v1alpha1::MountResponse,
) -> Result<(ObjectVersions, Vec<Payload>)> {
    if let Some(err) = response.error.filter(|e| !e.code.is_empty()) {
        return Err(Error::ProviderMount {
            message: format!("provider {} failed to mount content", provider),
            code: err.code,
        });
    }

    let versions = response
        .object_version
        .into_iter()
        .map(|ov| (ov.id, ov.version))
        .collect();
    let payloads = response
        .files
        .into_iter()
        .map(|f| Payload {
            path: f.path,
            mode: f.mode as u32,
            contents: f.contents,
        })
        .collect();
    Ok((versions, payloads))
}

#[async_trait]
impl ProviderClient for GrpcProviderClient {
    async fn mount_content(&self, request: MountContentRequest) -> Result<ObjectVersions> {
        let target_path = request.target_path.clone();
        let message = v1alpha1::MountRequest {
            attributes: request.attributes,
            secrets: request.secrets,
            target_path: request.target_path,
            permission: request.permission,
            current_object_version: request
                .current_object_versions
                .into_iter()
                .map(|(id, version)| v1alpha1::ObjectVersion { id, version })
                .collect(),
        };

        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready().await.map_err(|e| {
            Error::provider(format!("provider {} is not ready: {}", self.provider, e))
        })?;
        let codec =
            tonic_prost::ProstCodec::<v1alpha1::MountRequest, v1alpha1::MountResponse>::default();
        let response = grpc
            .unary(
                tonic::Request::new(message),
                PathAndQuery::from_static(MOUNT_PATH),
                codec,
            )
            .await?
            .into_inner();

        let (versions, payloads) = into_versions(&self.provider, response)?;
        if !payloads.is_empty() {
            debug!(provider = %self.provider, files = payloads.len(), "Writing provider payloads");
            write_payloads(Path::new(&target_path), &payloads)?;
        }
        Ok(versions)
    }
}

/// Builds [`GrpcProviderClient`]s for providers under a socket directory
#[derive(Debug, Clone)]
pub struct UnixSocketConnector {
    socket_dir: PathBuf,
    timeout: Duration,
}

impl UnixSocketConnector {
    /// Create a connector for sockets in `socket_dir`
    pub fn new(socket_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            timeout,
        }
    }
}

impl ProviderConnector for UnixSocketConnector {
    fn connect(&self, provider: &str) -> Result<Arc<dyn ProviderClient>> {
        validate_provider_name(provider)?;
        let socket_path = provider_socket_path(&self.socket_dir, provider);
        if !socket_path.exists() {
            return Err(Error::provider(format!(
                "provider {} socket {:?} does not exist",
                provider, socket_path
            )));
        }
        let client = GrpcProviderClient::connect_lazy(provider, socket_path, self.timeout)?;
        Ok(Arc::new(client))
    }
}
