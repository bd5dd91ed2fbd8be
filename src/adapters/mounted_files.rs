//! Mounted file management
//!
//! Parses kubelet target paths, reads the files a provider delivered into a
//! mount, and writes files returned by a provider into the mount.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

const PODS_DIR: &str = "pods";
const VOLUMES_DIR: &str = "volumes";
const CSI_PLUGIN_DIR: &str = "kubernetes.io~csi";
const MOUNT_DIR: &str = "mount";

/// A file delivered by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Path relative to the target path
    pub path: String,
    /// File mode bits
    pub mode: u32,
    /// File content
    pub contents: Vec<u8>,
}

/// Extract the pod UID from `.../pods/<uid>/volumes/kubernetes.io~csi/...`
pub fn pod_uid_from_target_path(target_path: &str) -> Option<String> {
    let parts = components(target_path);
    parts.windows(4).find_map(|w| {
        (w[0] == PODS_DIR && w[2] == VOLUMES_DIR && w[3] == CSI_PLUGIN_DIR)
            .then(|| w[1].to_string())
    })
}

/// Extract the volume name from `.../kubernetes.io~csi/<volume>/mount`
pub fn volume_name_from_target_path(target_path: &str) -> Option<String> {
    let parts = components(target_path);
    parts
        .windows(3)
        .find_map(|w| (w[0] == CSI_PLUGIN_DIR && w[2] == MOUNT_DIR).then(|| w[1].to_string()))
}

fn components(path: &str) -> Vec<&str> {
    path.split(['/', '\\']).filter(|p| !p.is_empty()).collect()
}

/// Read every file under the target path
///
/// Nested files are keyed by their `/`-joined relative path. Entries whose
/// name starts with `..` belong to the atomic writer and are skipped.
pub fn read_mounted_files(target_path: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();
    collect_files(target_path, "", &mut files)?;
    Ok(files)
}

fn collect_files(dir: &Path, prefix: &str, files: &mut BTreeMap<String, Vec<u8>>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("failed to list mounted files in {:?}: {}", dir, e),
        ))
    })?;

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("..") {
            continue;
        }
        let relative = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };

        // follows symlinks, so atomic-writer links resolve to their targets
        let metadata = fs::metadata(entry.path())?;
        if metadata.is_dir() {
            collect_files(&entry.path(), &relative, files)?;
        } else if metadata.is_file() {
            files.insert(relative, fs::read(entry.path())?);
        }
    }
    Ok(())
}

/// Validate provider-returned payload paths
///
/// Paths must be relative and must not escape the target directory.
pub fn validate_payloads(payloads: &[Payload]) -> Result<()> {
    for payload in payloads {
        let path = Path::new(&payload.path);
        if payload.path.is_empty() {
            return Err(Error::validation("payload path is empty"));
        }
        if path.is_absolute() {
            return Err(Error::validation(format!(
                "payload path {} must be relative",
                payload.path
            )));
        }
        if path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::validation(format!(
                "payload path {} must not contain '..'",
                payload.path
            )));
        }
    }
    Ok(())
}

/// Write provider payloads into the target path
///
/// Each file is written to a temporary sibling and renamed into place so
/// readers never observe partial content.
pub fn write_payloads(target_path: &Path, payloads: &[Payload]) -> Result<()> {
    validate_payloads(payloads)?;

    for payload in payloads {
        let path = target_path.join(&payload.path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = temp_path(&path);
        write_file(&tmp_path, &payload.contents, payload.mode)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to move {:?} into place: {}", path, e),
            ))
        })?;
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("..{}.tmp", name))
}

fn write_file(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content)?;
    file.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TARGET: &str =
        "/var/lib/kubelet/pods/7e4b1c2a-uid/volumes/kubernetes.io~csi/secrets-store-inline/mount";

    #[test]
    fn target_path_yields_pod_uid_and_volume() {
        assert_eq!(pod_uid_from_target_path(TARGET).as_deref(), Some("7e4b1c2a-uid"));
        assert_eq!(
            volume_name_from_target_path(TARGET).as_deref(),
            Some("secrets-store-inline")
        );
    }

    #[test]
    fn windows_separators_are_accepted() {
        let path = r"C:\var\lib\kubelet\pods\uid-1\volumes\kubernetes.io~csi\vol\mount";
        assert_eq!(pod_uid_from_target_path(path).as_deref(), Some("uid-1"));
        assert_eq!(volume_name_from_target_path(path).as_deref(), Some("vol"));
    }

    #[test]
    fn malformed_target_path_yields_nothing() {
        assert_eq!(pod_uid_from_target_path("/tmp/mount"), None);
        assert_eq!(volume_name_from_target_path("/tmp/kubernetes.io~csi/vol"), None);
    }

    #[test]
    fn read_mounted_files_walks_nested_dirs() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("db-pass"), "secret").unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("cert"), "pem").unwrap();
        fs::create_dir_all(dir.path().join("..2024_01_01")).unwrap();
        fs::write(dir.path().join("..2024_01_01").join("hidden"), "x").unwrap();

        let files = read_mounted_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files["db-pass"], b"secret");
        assert_eq!(files["nested/cert"], b"pem");
    }

    #[test]
    fn read_mounted_files_fails_for_missing_dir() {
        let dir = tempdir().unwrap();
        assert!(read_mounted_files(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn write_payloads_replaces_content() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("db-pass"), "old").unwrap();

        let payloads = vec![
            Payload {
                path: "db-pass".to_string(),
                mode: 0o644,
                contents: b"new".to_vec(),
            },
            Payload {
                path: "certs/tls.crt".to_string(),
                mode: 0o600,
                contents: b"pem".to_vec(),
            },
        ];
        write_payloads(dir.path(), &payloads).unwrap();

        assert_eq!(fs::read(dir.path().join("db-pass")).unwrap(), b"new");
        assert_eq!(fs::read(dir.path().join("certs/tls.crt")).unwrap(), b"pem");
        assert!(!dir.path().join("..db-pass.tmp").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join("certs/tls.crt"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn payload_paths_must_stay_inside_target() {
        let escaping = vec![Payload {
            path: "../outside".to_string(),
            mode: 0o644,
            contents: Vec::new(),
        }];
        assert!(validate_payloads(&escaping).is_err());

        let absolute = vec![Payload {
            path: "/etc/passwd".to_string(),
            mode: 0o644,
            contents: Vec::new(),
        }];
        assert!(validate_payloads(&absolute).is_err());
    }
}
