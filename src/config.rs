//! Process configuration
//!
//! Every flag can also be set through the environment, which is how the
//! controller is usually configured inside the driver daemonset.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use tracing::info;

use crate::controllers::ControllerSettings;
use crate::error::{Error, Result};
use crate::queue::RetryPolicy;

/// Default directory holding the provider sockets
pub const DEFAULT_PROVIDER_VOLUME: &str = "/var/run/secrets-store-csi-providers";

/// Rotation controller configuration
#[derive(Debug, Clone, Parser)]
#[command(
    name = "secrets-rotation-controller",
    version,
    about = "Rotates CSI-mounted secret content and synced Kubernetes secrets"
)]
pub struct Config {
    /// Seconds between two rotation passes
    #[arg(long, env = "ROTATION_POLL_INTERVAL", default_value_t = 120, value_name = "SECONDS")]
    pub rotation_poll_interval: u64,

    /// Directory containing the provider unix sockets
    #[arg(long, env = "PROVIDER_VOLUME", default_value = DEFAULT_PROVIDER_VOLUME)]
    pub provider_volume: PathBuf,

    /// Node whose pod statuses are rotated
    #[arg(long, env = "NODE_NAME")]
    pub node_name: String,

    /// Kubeconfig to use instead of the in-cluster configuration
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Number of concurrent rotation workers
    #[arg(long, env = "ROTATION_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Rate-limited retries for pod statuses missing from the cache
    #[arg(long, env = "ROTATION_MAX_REQUEUES", default_value_t = 5)]
    pub max_requeues: u32,

    /// Seconds before a failed rotation is retried
    #[arg(long, env = "ROTATION_REQUEUE_DELAY", default_value_t = 10, value_name = "SECONDS")]
    pub requeue_delay: u64,

    /// Seconds before a provider mount request times out
    #[arg(long, env = "PROVIDER_TIMEOUT", default_value_t = 30, value_name = "SECONDS")]
    pub provider_timeout: u64,

    /// Port of the metrics and health endpoints
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,
}

impl Config {
    /// Reject values the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            return Err(Error::config("node name must not be empty"));
        }
        if self.rotation_poll_interval == 0 {
            return Err(Error::config("rotation poll interval must be greater than zero"));
        }
        if self.workers == 0 {
            return Err(Error::config("at least one worker is required"));
        }
        if self.requeue_delay == 0 {
            return Err(Error::config("requeue delay must be greater than zero"));
        }
        if self.provider_timeout == 0 {
            return Err(Error::config("provider timeout must be greater than zero"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_poll_interval)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout)
    }

    /// Scheduling settings for the rotation controller
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            poll_interval: self.poll_interval(),
            workers: self.workers,
            retry: RetryPolicy {
                max_requeues: self.max_requeues,
                requeue_delay: Duration::from_secs(self.requeue_delay),
            },
        }
    }

    /// Build a Kubernetes client from the kubeconfig flag or the in-cluster environment
    pub async fn build_client(&self) -> Result<Client> {
        let config = match &self.kubeconfig {
            Some(path) => {
                info!(kubeconfig = %path.display(), "Using explicit kubeconfig");
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| Error::config(format!("failed to read kubeconfig: {}", e)))?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
            }
            None => kube::Config::incluster()
                .map_err(|e| Error::config(format!("failed to load in-cluster config: {}", e)))?,
        };
        Ok(Client::try_from(config)?)
    }
}
