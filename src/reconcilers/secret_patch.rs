//! Idempotent, optimistically locked secret data patch

use std::collections::BTreeMap;

use tracing::debug;

use crate::adapters::{data_fingerprint, secret_bytes, ClusterClient};
use crate::error::Result;

/// Result of a secret patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchResult {
    /// The secret already held the data, nothing was written
    Unchanged,
    /// The data map was replaced
    Patched,
}

/// Replace the data of secret `namespace/name` with `data`
///
/// The secret is read live. A missing secret is returned as an error: it is
/// (re)created by the pod status controller, not here. When the fingerprints of
/// the current and new data match no write is issued. Otherwise the full data
/// map is replaced under the resourceVersion that was read.
pub async fn patch_secret(
    cluster: &dyn ClusterClient,
    name: &str,
    namespace: &str,
    data: &BTreeMap<String, Vec<u8>>,
) -> Result<PatchResult> {
    let secret = cluster.get_secret(name, namespace).await?;

    if data_fingerprint(&secret_bytes(&secret)) == data_fingerprint(data) {
        debug!(secret = %name, namespace = %namespace, "Secret data unchanged, skipping patch");
        return Ok(PatchResult::Unchanged);
    }

    cluster.patch_secret(&secret, data).await?;
    Ok(PatchResult::Patched)
}
