//! Storage backend module
//!
//! Every endpoint is reached through the [`Backend`] trait. The engine,
//! the tree walker and the tasks never see which filesystem family sits
//! behind a node; only [`Endpoint::mount`] dispatches on the variant.
//!
//! GlusterFS and CephFS volumes are attached with the system mount helpers
//! and served through a [`MountedTree`]; local directories use the same
//! tree rooted at `/` without mounting anything.

mod ceph;
mod gluster;
pub mod mount;
mod tree;

pub use ceph::*;
pub use gluster::*;
pub use mount::{MountOptions, MountSession, MountTable};
pub use tree::*;

use crate::error::Result;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Storage backend family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// GlusterFS volume
    Gluster,
    /// CephFS filesystem
    Ceph,
    /// Local directory tree
    Local,
}

impl BackendKind {
    /// URI tag selecting this backend
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Gluster => "glfs",
            Self::Ceph => "cfs",
            Self::Local => "file",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gluster => "GlusterFS",
            Self::Ceph => "CephFS",
            Self::Local => "local",
        };
        f.write_str(name)
    }
}

/// Kind of entry reported by a tree walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Directory
    Directory,
    /// Regular file
    File,
    /// Symbolic link (never followed)
    Symlink,
    /// Device, socket, fifo
    Other,
}

impl EntryKind {
    /// Classify a `std::fs::FileType`
    pub fn from_file_type(file_type: std::fs::FileType) -> Self {
        if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else if file_type.is_symlink() {
            Self::Symlink
        } else {
            Self::Other
        }
    }
}

/// One entry visited by [`Backend::walk_tree`]
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Backend path, always prefixed by the walk root
    pub path: String,
    /// Entry kind
    pub kind: EntryKind,
    /// Raw mode bits as reported by stat
    pub mode: u32,
    /// Depth below the walk root (children of the root are 1)
    pub depth: usize,
}

/// Counters from one tree walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    /// Entries handed to the visitor
    pub visited: u64,
    /// Entries skipped because they could not be read
    pub errors: u64,
}

/// Open file on a backend
pub trait FileHandle: Send {
    /// Read into `buf`; `Ok(0)` marks end of stream
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `buf`
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Release the handle
    fn close(self: Box<Self>) -> Result<()>;
}

/// Capability set shared by every storage backend
///
/// Implementations must tolerate concurrent use from many worker threads:
/// the engine shares one handle per node across all in-flight tasks.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Backend family
    fn kind(&self) -> BackendKind;

    /// Open an existing file read-only
    fn open(&self, path: &str) -> Result<Box<dyn FileHandle>>;

    /// Create or truncate a file for writing; the file ends up with `mode & 0o7777`
    fn create(&self, path: &str, mode: u32) -> Result<Box<dyn FileHandle>>;

    /// Create a directory, succeeding if it already exists as a directory
    fn mkdir_idempotent(&self, path: &str, mode: u32) -> Result<()>;

    /// Depth-first pre-order walk of everything below `root`
    ///
    /// Directories are visited before their children, siblings in name order.
    fn walk_tree(&self, root: &str, visitor: &mut dyn FnMut(&WalkEntry)) -> Result<WalkStats>;

    /// Detach from the backend; later calls are no-ops
    fn unmount(&self) -> Result<()>;
}

/// Parsed connection parameters of one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// GlusterFS volume
    Gluster(GlusterConfig),
    /// CephFS filesystem
    Ceph(CephConfig),
    /// Local directory
    Local,
}

impl Endpoint {
    /// Backend family of this endpoint
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Gluster(_) => BackendKind::Gluster,
            Self::Ceph(_) => BackendKind::Ceph,
            Self::Local => BackendKind::Local,
        }
    }

    /// Attach to the backend
    ///
    /// `label` names the node in logs, errors and private mount directories.
    pub fn mount(&self, label: &str, options: &MountOptions) -> Result<Arc<dyn Backend>> {
        let tree = match self {
            Self::Gluster(config) => {
                let session = MountSession::establish(&config.mount_request(), label, options)?;
                MountedTree::with_session(BackendKind::Gluster, session)
            }
            Self::Ceph(config) => {
                let session = MountSession::establish(&config.mount_request()?, label, options)?;
                MountedTree::with_session(BackendKind::Ceph, session)
            }
            Self::Local => MountedTree::new(BackendKind::Local, PathBuf::from("/")),
        };

        tracing::debug!("{} attached {} at {}", label, self.kind(), tree.mount_point().display());
        Ok(Arc::new(tree))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gluster(c) => write!(f, "glfs {}://{}:{}/{}", c.protocol, c.server, c.port, c.volume),
            Self::Ceph(c) => write!(f, "cfs {}@{}:{}", c.id, c.monitors.join(","), c.root),
            Self::Local => f.write_str("file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_tags() {
        assert_eq!(BackendKind::Gluster.tag(), "glfs");
        assert_eq!(BackendKind::Ceph.tag(), "cfs");
        assert_eq!(BackendKind::Local.tag(), "file");
        assert_eq!(BackendKind::Gluster.to_string(), "GlusterFS");
    }

    #[test]
    fn test_local_mount_is_rooted_at_slash() {
        let backend = Endpoint::Local.mount("src-0", &MountOptions::default()).unwrap();
        assert_eq!(backend.kind(), BackendKind::Local);
        backend.unmount().unwrap();
        backend.unmount().unwrap();
    }
}
