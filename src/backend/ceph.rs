//! CephFS endpoints
//!
//! Filesystems are attached with `mount -t ceph`, authenticating as
//! `client.<id>` with the secret stored in the keyring file.

use super::mount::MountRequest;
use crate::error::{FanCopyError, Result};
use std::path::PathBuf;

/// CephFS connection parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CephConfig {
    /// Monitor addresses
    pub monitors: Vec<String>,
    /// Client id (without the `client.` prefix)
    pub id: String,
    /// Keyring or secret file
    pub keyring: PathBuf,
    /// Directory inside the filesystem to mount
    pub root: String,
}

impl CephConfig {
    /// Build a config from a comma-separated monitor list
    pub fn new(monitors: &str, id: &str, keyring: &str, root: &str) -> Result<Self> {
        let monitors: Vec<String> = monitors.split(',').map(|m| m.trim().to_string()).collect();
        if monitors.iter().any(String::is_empty) {
            return Err(FanCopyError::config(format!(
                "empty monitor address in '{}'",
                monitors.join(",")
            )));
        }

        Ok(Self {
            monitors,
            id: id.to_string(),
            keyring: PathBuf::from(keyring),
            root: root.to_string(),
        })
    }

    /// Mount source, `mon1,mon2:/root`
    pub fn mount_source(&self) -> String {
        let root = if self.root.starts_with('/') {
            self.root.clone()
        } else {
            format!("/{}", self.root)
        };
        format!("{}:{}", self.monitors.join(","), root)
    }

    /// Request for the mount helper
    pub fn mount_request(&self) -> Result<MountRequest> {
        let keyring = self.keyring.to_str().ok_or_else(|| {
            FanCopyError::config(format!("keyring path {} is not UTF-8", self.keyring.display()))
        })?;

        Ok(MountRequest {
            fstype: "ceph",
            table_fstypes: &["ceph", "fuse.ceph-fuse"],
            source: self.mount_source(),
            options: vec![format!("name={}", self.id), format!("secretfile={}", keyring)],
        })
    }
}
