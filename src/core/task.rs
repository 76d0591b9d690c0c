//! Replication tasks
//!
//! A task names its nodes by index and carries only the source path; the
//! destination path is translated when a worker picks the task up.

use crate::backend::FileHandle;
use crate::error::Result;
use crate::node::NodeRegistry;
use crate::path::translate;
use crossbeam::sync::WaitGroup;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Fields shared by every task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOp {
    /// Source node index
    pub src_index: usize,
    /// Destination node index
    pub dst_index: usize,
    /// Path on the source node
    pub src_path: String,
    /// Mode bits to apply on the destination
    pub mode: u32,
}

impl FileOp {
    /// Destination path of this operation
    pub fn destination_path(&self, registry: &NodeRegistry) -> Result<String> {
        let src_root = registry.source(self.src_index)?.root();
        let dst_root = registry.destination(self.dst_index)?.root();
        translate(src_root, dst_root, &self.src_path)
    }
}

/// Create one directory on one destination
#[derive(Debug)]
pub struct DirectoryTask {
    /// Operation fields
    pub op: FileOp,
    /// Released when the task is dropped, whatever its outcome
    pub latch: Option<WaitGroup>,
}

/// Copy one file to one destination
#[derive(Debug)]
pub struct CopyTask {
    /// Operation fields
    pub op: FileOp,
}

/// Unit of work executed by the pool
#[derive(Debug)]
pub enum Task {
    /// Directory creation
    Directory(DirectoryTask),
    /// File copy
    Copy(CopyTask),
}

impl Task {
    /// Directory task, optionally tied to a completion latch
    pub fn directory(op: FileOp, latch: Option<WaitGroup>) -> Self {
        Self::Directory(DirectoryTask { op, latch })
    }

    /// Copy task
    pub fn copy(op: FileOp) -> Self {
        Self::Copy(CopyTask { op })
    }

    /// Operation fields
    pub fn op(&self) -> &FileOp {
        match self {
            Self::Directory(t) => &t.op,
            Self::Copy(t) => &t.op,
        }
    }

    /// Whether this is a directory task
    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory(_))
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, op) = match self {
            Self::Directory(t) => ("mkdir", &t.op),
            Self::Copy(t) => ("copy", &t.op),
        };
        write!(f, "{} {} (src-{} -> dst-{})", kind, op.src_path, op.src_index, op.dst_index)
    }
}

/// Totals accumulated by a [`TaskExecutor`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    /// Directories ensured on a destination
    pub directories_created: u64,
    /// Files fully copied
    pub files_copied: u64,
    /// Bytes written to destinations
    pub bytes_copied: u64,
}

/// Runs tasks against the node registry
#[derive(Debug)]
pub struct TaskExecutor {
    registry: Arc<NodeRegistry>,
    chunk_size: usize,
    directories_created: AtomicU64,
    files_copied: AtomicU64,
    bytes_copied: AtomicU64,
}

impl TaskExecutor {
    /// Executor copying with buffers of `chunk_size` bytes
    pub fn new(registry: Arc<NodeRegistry>, chunk_size: usize) -> Self {
        Self {
            registry,
            chunk_size: chunk_size.max(1),
            directories_created: AtomicU64::new(0),
            files_copied: AtomicU64::new(0),
            bytes_copied: AtomicU64::new(0),
        }
    }

    /// Execute one task; the task is consumed
    pub fn execute(&self, task: Task) -> Result<()> {
        match task {
            Task::Directory(task) => {
                // the latch is released when `task` drops at the end of this arm
                self.make_directory(&task.op)?;
                self.directories_created.fetch_add(1, Ordering::Relaxed);
            }
            Task::Copy(task) => {
                let bytes = self.copy_file(&task.op)?;
                self.files_copied.fetch_add(1, Ordering::Relaxed);
                self.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Current totals
    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            directories_created: self.directories_created.load(Ordering::Relaxed),
            files_copied: self.files_copied.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
        }
    }

    fn make_directory(&self, op: &FileOp) -> Result<()> {
        let dst_path = op.destination_path(&self.registry)?;
        let dst = self.registry.destination(op.dst_index)?;

        tracing::info!("Making directory {} on node {}", dst_path, dst.label());
        dst.backend()?.mkdir_idempotent(&dst_path, op.mode)
    }

    /// Stream one file; both handles are closed on every path
    fn copy_file(&self, op: &FileOp) -> Result<u64> {
        let dst_path = op.destination_path(&self.registry)?;
        let src = self.registry.source(op.src_index)?;
        let dst = self.registry.destination(op.dst_index)?;

        tracing::info!(
            "Copying file {} from {} to {} on node {}",
            op.src_path,
            src.label(),
            dst_path,
            dst.label()
        );

        let mut reader = src.backend()?.open(&op.src_path)?;
        let mut writer = match dst.backend().and_then(|b| b.create(&dst_path, op.mode)) {
            Ok(writer) => writer,
            Err(e) => {
                close_quietly(reader);
                return Err(e);
            }
        };

        let mut buffer = vec![0u8; self.chunk_size];
        let copied = pump(reader.as_mut(), writer.as_mut(), &mut buffer);

        let dst_closed = writer.close();
        close_quietly(reader);

        let bytes = copied?;
        dst_closed?;
        Ok(bytes)
    }
}

/// Move data until the reader reports end of stream
fn pump(reader: &mut dyn FileHandle, writer: &mut dyn FileHandle, buffer: &mut [u8]) -> Result<u64> {
    let mut total = 0u64;
    loop {
        let n = reader.read(buffer)?;
        if n == 0 {
            return Ok(total);
        }
        writer.write(&buffer[..n])?;
        total += n as u64;
    }
}

fn close_quietly(handle: Box<dyn FileHandle>) {
    if let Err(e) = handle.close() {
        tracing::debug!("Ignoring close failure: {}", e);
    }
}
