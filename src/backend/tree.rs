//! Directory-tree backend over a mount point
//!
//! Backend paths are resolved below the mount point; all I/O is plain
//! `std::fs` so one `MountedTree` can be shared by any number of threads.

use super::{Backend, BackendKind, EntryKind, FileHandle, MountSession, WalkEntry, WalkStats};
use crate::error::{FanCopyError, IoResultExt, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use walkdir::WalkDir;

/// Permission bits kept from a source mode
const PERMISSION_BITS: u32 = 0o7777;

/// Backend serving a directory tree under a mount point
#[derive(Debug)]
pub struct MountedTree {
    kind: BackendKind,
    mount_point: PathBuf,
    session: Mutex<Option<MountSession>>,
}

impl MountedTree {
    /// Serve the tree under `mount_point` without owning a mount
    pub fn new(kind: BackendKind, mount_point: PathBuf) -> Self {
        Self {
            kind,
            mount_point,
            session: Mutex::new(None),
        }
    }

    /// Serve the tree of an established mount; the mount is released on unmount
    pub fn with_session(kind: BackendKind, session: MountSession) -> Self {
        Self {
            kind,
            mount_point: session.mount_point().to_path_buf(),
            session: Mutex::new(Some(session)),
        }
    }

    /// Host directory the backend paths are resolved against
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Map a backend path to a host path
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(FanCopyError::InvalidPath(format!(
                "'{}' escapes the backend root",
                path
            )));
        }
        Ok(self.mount_point.join(relative))
    }
}

impl Backend for MountedTree {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn open(&self, path: &str) -> Result<Box<dyn FileHandle>> {
        let host = self.resolve(path)?;
        let file = File::open(&host).with_path(&host)?;
        Ok(Box::new(TreeFile { path: host, file }))
    }

    fn create(&self, path: &str, mode: u32) -> Result<Box<dyn FileHandle>> {
        let host = self.resolve(path)?;
        let perms = mode & PERMISSION_BITS;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(perms)
            .open(&host)
            .with_path(&host)?;

        // umask and a pre-existing file both leave other bits behind
        file.set_permissions(std::fs::Permissions::from_mode(perms))
            .with_path(&host)?;

        Ok(Box::new(TreeFile { path: host, file }))
    }

    fn mkdir_idempotent(&self, path: &str, mode: u32) -> Result<()> {
        let host = self.resolve(path)?;
        let perms = mode & PERMISSION_BITS;

        match std::fs::DirBuilder::new().mode(perms).create(&host) {
            Ok(()) => std::fs::set_permissions(&host, std::fs::Permissions::from_mode(perms))
                .with_path(&host),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let metadata = std::fs::metadata(&host).with_path(&host)?;
                if metadata.is_dir() {
                    Ok(())
                } else {
                    Err(FanCopyError::NotADirectory(host))
                }
            }
            Err(e) => Err(FanCopyError::io(host, e)),
        }
    }

    fn walk_tree(&self, root: &str, visitor: &mut dyn FnMut(&WalkEntry)) -> Result<WalkStats> {
        let host_root = self.resolve(root)?;

        let metadata = std::fs::metadata(&host_root).map_err(|e| FanCopyError::Walk {
            root: root.to_string(),
            message: e.to_string(),
        })?;
        if !metadata.is_dir() {
            return Err(FanCopyError::NotADirectory(host_root));
        }

        let separator = if root.ends_with('/') { "" } else { "/" };
        let mut stats = WalkStats::default();

        let walker = WalkDir::new(&host_root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for item in walker {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(FanCopyError::Walk {
                        root: root.to_string(),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry under {}: {}", root, e);
                    stats.errors += 1;
                    continue;
                }
            };

            let relative = match entry.path().strip_prefix(&host_root).ok().and_then(Path::to_str) {
                Some(relative) => relative,
                None => {
                    tracing::warn!("Skipping non UTF-8 path {}", entry.path().display());
                    stats.errors += 1;
                    continue;
                }
            };

            let mode = match entry.metadata() {
                Ok(metadata) => metadata.mode(),
                Err(e) => {
                    tracing::warn!("Cannot stat {}: {}", entry.path().display(), e);
                    stats.errors += 1;
                    continue;
                }
            };

            let visited = WalkEntry {
                path: format!("{}{}{}", root, separator, relative),
                kind: EntryKind::from_file_type(entry.file_type()),
                mode,
                depth: entry.depth(),
            };

            stats.visited += 1;
            visitor(&visited);
        }

        Ok(stats)
    }

    fn unmount(&self) -> Result<()> {
        let session = match self.session.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match session {
            Some(session) => session.release(),
            None => Ok(()),
        }
    }
}

/// File opened through a [`MountedTree`]
#[derive(Debug)]
struct TreeFile {
    path: PathBuf,
    file: File,
}

impl FileHandle for TreeFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.file.read(buf) {
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                other => return other.with_path(&self.path),
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write_all(buf).with_path(&self.path)
    }

    fn close(self: Box<Self>) -> Result<()> {
        drop(self.file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree(dir: &TempDir) -> MountedTree {
        MountedTree::new(BackendKind::Local, dir.path().to_path_buf())
    }

    fn collect(backend: &MountedTree, root: &str) -> Vec<WalkEntry> {
        let mut seen = Vec::new();
        backend.walk_tree(root, &mut |e| seen.push(e.clone())).unwrap();
        seen
    }

    #[test]
    fn test_resolve_rejects_parent_components() {
        let dir = TempDir::new().unwrap();
        let backend = tree(&dir);
        assert_eq!(backend.resolve("/a/b").unwrap(), dir.path().join("a/b"));
        assert!(backend.resolve("/a/../../etc").is_err());
    }

    #[test]
    fn test_walk_preorder_directories_first() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/a/deep")).unwrap();
        std::fs::write(dir.path().join("src/a/b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("src/a/deep/c.txt"), b"c").unwrap();
        std::fs::write(dir.path().join("src/z.txt"), b"z").unwrap();

        let backend = tree(&dir);
        let seen = collect(&backend, "/src");
        let paths: Vec<_> = seen.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["/src/a", "/src/a/b.txt", "/src/a/deep", "/src/a/deep/c.txt", "/src/z.txt"]
        );
        assert_eq!(seen[0].kind, EntryKind::Directory);
        assert_eq!(seen[1].kind, EntryKind::File);
        assert_eq!(seen[3].depth, 3);
    }

    #[test]
    fn test_walk_keeps_root_spelling() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/f"), b"f").unwrap();

        let backend = tree(&dir);
        assert_eq!(collect(&backend, "/src/")[0].path, "/src/f");
        assert_eq!(collect(&backend, "src")[0].path, "src/f");
    }

    #[test]
    fn test_walk_missing_root_fails() {
        let dir = TempDir::new().unwrap();
        let backend = tree(&dir);
        let err = backend.walk_tree("/missing", &mut |_| {}).unwrap_err();
        assert!(matches!(err, FanCopyError::Walk { .. }));
    }

    #[test]
    fn test_walk_reports_symlinks_without_following() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/real")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("src/real"), dir.path().join("src/link")).unwrap();

        let backend = tree(&dir);
        let seen = collect(&backend, "/src");
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].kind, EntryKind::Symlink);
        assert_eq!(seen[1].kind, EntryKind::Directory);
    }

    #[test]
    fn test_create_applies_mode_and_truncates() {
        let dir = TempDir::new().unwrap();
        let backend = tree(&dir);
        std::fs::write(dir.path().join("f"), b"old contents").unwrap();

        let mut handle = backend.create("/f", 0o100640).unwrap();
        handle.write(b"new").unwrap();
        handle.close().unwrap();

        assert_eq!(std::fs::read(dir.path().join("f")).unwrap(), b"new");
        let mode = std::fs::metadata(dir.path().join("f")).unwrap().mode();
        assert_eq!(mode & 0o7777, 0o640);
    }

    #[test]
    fn test_read_until_end_of_stream() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f"), b"hello").unwrap();
        let backend = tree(&dir);

        let mut handle = backend.open("/f").unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(handle.read(&mut buf).unwrap(), 3);
        assert_eq!(handle.read(&mut buf).unwrap(), 2);
        assert_eq!(handle.read(&mut buf).unwrap(), 0);
        handle.close().unwrap();
    }

    #[test]
    fn test_mkdir_idempotent() {
        let dir = TempDir::new().unwrap();
        let backend = tree(&dir);

        backend.mkdir_idempotent("/d", 0o040755).unwrap();
        backend.mkdir_idempotent("/d", 0o040755).unwrap();
        assert!(dir.path().join("d").is_dir());

        std::fs::write(dir.path().join("file"), b"x").unwrap();
        let err = backend.mkdir_idempotent("/file", 0o755).unwrap_err();
        assert!(matches!(err, FanCopyError::NotADirectory(_)));
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let backend = tree(&dir);
        let err = backend.open("/nope").err().unwrap();
        assert!(err.is_not_found());
    }
}
