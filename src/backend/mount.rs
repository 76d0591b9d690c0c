//! Mount helper sessions
//!
//! Distributed filesystems are attached through the system mount helpers
//! (`mount.glusterfs`, `mount.ceph`). An existing mount of the same source
//! is reused and left in place; otherwise a private directory is created
//! under the configured base, mounted, and torn down again on release.

use crate::error::{FanCopyError, IoResultExt, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Mount table location on Linux
pub const PROC_MOUNTS: &str = "/proc/mounts";

/// Options shared by every mount of a run
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// Directory under which private mount points are created
    pub mount_base: PathBuf,
    /// Mount program
    pub mount_program: PathBuf,
    /// Unmount program
    pub umount_program: PathBuf,
    /// Mount table consulted for reusable mounts
    pub mount_table: PathBuf,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            mount_base: crate::config::default_mount_base(),
            mount_program: PathBuf::from("mount"),
            umount_program: PathBuf::from("umount"),
            mount_table: PathBuf::from(PROC_MOUNTS),
        }
    }
}

impl MountOptions {
    /// Options with a specific mount base
    pub fn with_base(mount_base: impl Into<PathBuf>) -> Self {
        Self {
            mount_base: mount_base.into(),
            ..Default::default()
        }
    }
}

/// What to hand to the mount helper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// Filesystem type passed with `-t`
    pub fstype: &'static str,
    /// Filesystem types under which an existing mount of the source may appear
    pub table_fstypes: &'static [&'static str],
    /// Mount source, e.g. `server:/volume`
    pub source: String,
    /// Options passed with `-o`
    pub options: Vec<String>,
}

/// One line of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Mounted source
    pub source: String,
    /// Mount point
    pub target: PathBuf,
    /// Filesystem type
    pub fstype: String,
}

/// Parsed mount table
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Read and parse a mount table file
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_path(path)?;
        Ok(Self::parse(&text))
    }

    /// Parse `/proc/mounts` formatted text
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let source = fields.next()?;
                let target = fields.next()?;
                let fstype = fields.next()?;
                Some(MountEntry {
                    source: unescape(source),
                    target: PathBuf::from(unescape(target)),
                    fstype: fstype.to_string(),
                })
            })
            .collect();

        Self { entries }
    }

    /// Find a mount of `source` under one of `fstypes`
    pub fn find(&self, fstypes: &[&str], source: &str) -> Option<&MountEntry> {
        self.entries
            .iter()
            .find(|e| e.source == source && fstypes.contains(&e.fstype.as_str()))
    }

    /// All entries
    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }
}

/// Decode the octal escapes (`\040` for space) used by the mount table
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// An attached filesystem
#[derive(Debug)]
pub struct MountSession {
    label: String,
    mount_point: PathBuf,
    owned: bool,
    umount_program: PathBuf,
}

impl MountSession {
    /// Reuse or create a mount for `request`
    pub fn establish(request: &MountRequest, label: &str, options: &MountOptions) -> Result<Self> {
        match MountTable::read(&options.mount_table) {
            Ok(table) => {
                if let Some(existing) = table.find(request.table_fstypes, &request.source) {
                    tracing::info!(
                        "{} reusing existing mount of {} at {}",
                        label,
                        request.source,
                        existing.target.display()
                    );
                    return Ok(Self {
                        label: label.to_string(),
                        mount_point: existing.target.clone(),
                        owned: false,
                        umount_program: options.umount_program.clone(),
                    });
                }
            }
            Err(e) => tracing::debug!("Mount table unavailable: {}", e),
        }

        let mount_point = options
            .mount_base
            .join(format!("{}-{}", label, std::process::id()));
        std::fs::create_dir_all(&mount_point)
            .map_err(|e| FanCopyError::mount(label, format!("{}: {}", mount_point.display(), e)))?;

        let mut command = Command::new(&options.mount_program);
        command.arg("-t").arg(request.fstype);
        if !request.options.is_empty() {
            command.arg("-o").arg(request.options.join(","));
        }
        command.arg(&request.source).arg(&mount_point);

        tracing::debug!("{} running {:?}", label, command);

        let output = match command.output() {
            Ok(output) => output,
            Err(e) => {
                let _ = std::fs::remove_dir(&mount_point);
                return Err(FanCopyError::mount(
                    label,
                    format!("cannot run {}: {}", options.mount_program.display(), e),
                ));
            }
        };

        if !output.status.success() {
            let _ = std::fs::remove_dir(&mount_point);
            return Err(FanCopyError::mount(
                label,
                format!(
                    "mounting {} failed ({}): {}",
                    request.source,
                    output.status,
                    helper_message(&output)
                ),
            ));
        }

        log_helper_output(label, &output);
        tracing::info!("{} mounted {} at {}", label, request.source, mount_point.display());

        Ok(Self {
            label: label.to_string(),
            mount_point,
            owned: true,
            umount_program: options.umount_program.clone(),
        })
    }

    /// Host directory the filesystem is attached at
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Whether this session created the mount
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Detach a mount created by this session
    pub fn release(self) -> Result<()> {
        if !self.owned {
            return Ok(());
        }

        let output = Command::new(&self.umount_program)
            .arg(&self.mount_point)
            .output()
            .map_err(|e| FanCopyError::Unmount {
                node: self.label.clone(),
                message: format!("cannot run {}: {}", self.umount_program.display(), e),
            })?;

        if !output.status.success() {
            return Err(FanCopyError::Unmount {
                node: self.label.clone(),
                message: format!("{} ({})", helper_message(&output), output.status),
            });
        }

        log_helper_output(&self.label, &output);
        if let Err(e) = std::fs::remove_dir(&self.mount_point) {
            tracing::debug!("{} left {} behind: {}", self.label, self.mount_point.display(), e);
        }

        tracing::info!("{} unmounted {}", self.label, self.mount_point.display());
        Ok(())
    }
}

fn helper_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        "no diagnostic output".to_string()
    } else {
        trimmed.to_string()
    }
}

fn log_helper_output(label: &str, output: &Output) {
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        if !line.trim().is_empty() {
            tracing::debug!(target: "fancopy::backend", "{}: {}", label, line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
gl1:/data /mnt/gluster\\040data fuse.glusterfs rw,relatime,user_id=0 0 0
10.0.0.1:6789,10.0.0.2:6789:/ /mnt/ceph ceph rw,relatime,name=admin 0 0
";

    fn request(source: &str) -> MountRequest {
        MountRequest {
            fstype: "glusterfs",
            table_fstypes: &["fuse.glusterfs", "glusterfs"],
            source: source.to_string(),
            options: vec!["transport=tcp".to_string()],
        }
    }

    fn options(dir: &TempDir, mount: &str, umount: &str) -> MountOptions {
        MountOptions {
            mount_base: dir.path().join("mounts"),
            mount_program: PathBuf::from(mount),
            umount_program: PathBuf::from(umount),
            mount_table: dir.path().join("mounts.table"),
        }
    }

    #[test]
    fn test_parse_mount_table() {
        let table = MountTable::parse(SAMPLE);
        assert_eq!(table.entries().len(), 3);

        let gluster = table.find(&["fuse.glusterfs"], "gl1:/data").unwrap();
        assert_eq!(gluster.target, PathBuf::from("/mnt/gluster data"));
        assert!(table.find(&["ceph"], "gl1:/data").is_none());
    }

    #[test]
    fn test_reuses_existing_mount() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("mounts.table"), SAMPLE).unwrap();

        let session =
            MountSession::establish(&request("gl1:/data"), "dst-0", &options(&dir, "false", "false")).unwrap();
        assert!(!session.is_owned());
        assert_eq!(session.mount_point(), Path::new("/mnt/gluster data"));
        // not ours, so the failing umount program is never run
        session.release().unwrap();
    }

    #[test]
    fn test_failed_helper_is_mount_error() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir, "false", "true");

        let err = MountSession::establish(&request("gl9:/vol"), "src-0", &opts).unwrap_err();
        assert!(matches!(err, FanCopyError::Mount { .. }));
        assert!(err.is_fatal());
        assert!(!opts.mount_base.join(format!("src-0-{}", std::process::id())).exists());
    }

    #[test]
    fn test_owned_mount_lifecycle() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir, "true", "true");

        let session = MountSession::establish(&request("gl9:/vol"), "dst-1", &opts).unwrap();
        assert!(session.is_owned());
        let mount_point = session.mount_point().to_path_buf();
        assert!(mount_point.is_dir());

        session.release().unwrap();
        assert!(!mount_point.exists());
    }

    #[test]
    fn test_failed_unmount_is_reported() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir, "true", "false");

        let session = MountSession::establish(&request("gl9:/vol"), "dst-2", &opts).unwrap();
        let err = session.release().unwrap_err();
        assert!(matches!(err, FanCopyError::Unmount { .. }));
    }
}
