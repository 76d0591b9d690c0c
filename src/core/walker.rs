//! Source tree walker
//!
//! Walks one source node and fans every entry out to all destinations,
//! one task per destination, in ascending destination order.

use super::pool::TaskSink;
use super::task::{FileOp, Task};
use crate::backend::{EntryKind, WalkEntry};
use crate::config::DirectoryOrdering;
use crate::error::Result;
use crate::node::NodeRegistry;
use crossbeam::sync::WaitGroup;
use serde::{Deserialize, Serialize};

/// Counters from walking one source node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkSummary {
    /// Directories visited
    pub directories: u64,
    /// Regular files visited
    pub files: u64,
    /// Symlinks and special files left alone
    pub skipped: u64,
    /// Directory tasks handed to the sink
    pub directory_tasks: u64,
    /// Copy tasks handed to the sink
    pub copy_tasks: u64,
    /// Tasks the sink refused
    pub rejected: u64,
    /// Entries the backend could not read
    pub walk_errors: u64,
}

impl WalkSummary {
    /// Tasks accepted by the sink
    pub fn tasks_submitted(&self) -> u64 {
        self.directory_tasks + self.copy_tasks
    }

    /// Accumulate another summary
    pub fn merge(&mut self, other: &WalkSummary) {
        self.directories += other.directories;
        self.files += other.files;
        self.skipped += other.skipped;
        self.directory_tasks += other.directory_tasks;
        self.copy_tasks += other.copy_tasks;
        self.rejected += other.rejected;
        self.walk_errors += other.walk_errors;
    }
}

/// Turns a source tree into tasks
pub struct TreeWalker<'a, S: TaskSink<Task>> {
    registry: &'a NodeRegistry,
    sink: &'a S,
    ordering: DirectoryOrdering,
}

impl<'a, S: TaskSink<Task>> TreeWalker<'a, S> {
    /// Create a new walker submitting into `sink`
    pub fn new(registry: &'a NodeRegistry, sink: &'a S, ordering: DirectoryOrdering) -> Self {
        Self {
            registry,
            sink,
            ordering,
        }
    }

    /// Walk source node `src_index`
    ///
    /// Returns once every task for the tree has been submitted; the tasks
    /// themselves may still be running.
    pub fn walk(&self, src_index: usize) -> Result<WalkSummary> {
        let node = self.registry.source(src_index)?;
        let backend = node.backend()?;
        let mut summary = WalkSummary::default();

        tracing::info!("Walking {} on {}", node.root(), node.label());

        let stats = backend.walk_tree(node.root(), &mut |entry| {
            self.visit(src_index, entry, &mut summary);
        })?;

        summary.walk_errors = stats.errors;
        tracing::debug!(
            "{} walked: {} directories, {} files, {} skipped",
            node.label(),
            summary.directories,
            summary.files,
            summary.skipped
        );
        Ok(summary)
    }

    fn visit(&self, src_index: usize, entry: &WalkEntry, summary: &mut WalkSummary) {
        match entry.kind {
            EntryKind::Directory => {
                summary.directories += 1;
                self.fan_out_directory(src_index, entry, summary);
            }
            EntryKind::File => {
                summary.files += 1;
                for dst_index in 0..self.registry.destination_count() {
                    let task = Task::copy(file_op(src_index, dst_index, entry));
                    if self.submit(task) {
                        summary.copy_tasks += 1;
                    } else {
                        summary.rejected += 1;
                    }
                }
            }
            EntryKind::Symlink | EntryKind::Other => {
                summary.skipped += 1;
                tracing::debug!("Skipping {:?} entry {}", entry.kind, entry.path);
            }
        }
    }

    fn fan_out_directory(&self, src_index: usize, entry: &WalkEntry, summary: &mut WalkSummary) {
        let latch = match self.ordering {
            DirectoryOrdering::Serialized => Some(WaitGroup::new()),
            DirectoryOrdering::Relaxed => None,
        };

        for dst_index in 0..self.registry.destination_count() {
            let task = Task::directory(file_op(src_index, dst_index, entry), latch.clone());
            if self.submit(task) {
                summary.directory_tasks += 1;
            } else {
                summary.rejected += 1;
            }
        }

        // nothing below this directory is submitted until it exists everywhere
        if let Some(latch) = latch {
            latch.wait();
        }
    }

    fn submit(&self, task: Task) -> bool {
        let label = task.to_string();
        match self.sink.submit(task) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Could not submit {}: {}", label, e);
                false
            }
        }
    }
}

fn file_op(src_index: usize, dst_index: usize, entry: &WalkEntry) -> FileOp {
    FileOp {
        src_index,
        dst_index,
        src_path: entry.path.clone(),
        mode: entry.mode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MountOptions;
    use crate::error::FanCopyError;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Records task descriptions and drops the tasks straight away
    #[derive(Default)]
    struct RecordingSink {
        tasks: Mutex<Vec<(bool, usize, String)>>,
    }

    impl TaskSink<Task> for RecordingSink {
        fn submit(&self, task: Task) -> Result<()> {
            let op = task.op();
            self.tasks
                .lock()
                .unwrap()
                .push((task.is_directory(), op.dst_index, op.src_path.clone()));
            Ok(())
        }
    }

    /// Completes directory tasks late, on another thread, and notes any
    /// copy task submitted before its parent directory finished
    #[derive(Default)]
    struct SlowDirectorySink {
        finished: Arc<Mutex<HashSet<(String, usize)>>>,
        violations: Mutex<Vec<String>>,
    }

    impl TaskSink<Task> for SlowDirectorySink {
        fn submit(&self, task: Task) -> Result<()> {
            let op = task.op().clone();
            if task.is_directory() {
                let finished = Arc::clone(&self.finished);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(10));
                    finished.lock().unwrap().insert((op.src_path, op.dst_index));
                    drop(task);
                });
            } else {
                let parent = Path::new(&op.src_path).parent().unwrap().to_str().unwrap().to_string();
                let is_root_child = parent.ends_with("/src");
                if !is_root_child && !self.finished.lock().unwrap().contains(&(parent, op.dst_index)) {
                    self.violations.lock().unwrap().push(op.src_path);
                }
            }
            Ok(())
        }
    }

    struct RefusingSink;

    impl TaskSink<Task> for RefusingSink {
        fn submit(&self, _task: Task) -> Result<()> {
            Err(FanCopyError::ThreadPool("closed".into()))
        }
    }

    /// src/a/b.txt, src/a/c/d.txt, src/e.txt and a symlink src/link
    fn sample_tree(destinations: usize) -> (TempDir, NodeRegistry) {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("a/c")).unwrap();
        std::fs::write(src.join("a/b.txt"), b"b").unwrap();
        std::fs::write(src.join("a/c/d.txt"), b"d").unwrap();
        std::fs::write(src.join("e.txt"), b"e").unwrap();
        std::os::unix::fs::symlink(src.join("e.txt"), src.join("link")).unwrap();

        let sources = vec![format!("file:{}", src.display())];
        let dsts: Vec<String> = (0..destinations)
            .map(|i| format!("file:{}", dir.path().join(format!("dst{}", i)).display()))
            .collect();
        let mut registry = NodeRegistry::from_uris(&sources, &dsts).unwrap();
        registry.open_all(&MountOptions::default()).unwrap();
        (dir, registry)
    }

    #[test]
    fn test_fan_out_counts() {
        let (_dir, registry) = sample_tree(3);
        let sink = RecordingSink::default();
        let walker = TreeWalker::new(&registry, &sink, DirectoryOrdering::Relaxed);

        let summary = walker.walk(0).unwrap();
        assert_eq!(summary.directories, 2);
        assert_eq!(summary.files, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.directory_tasks, 2 * 3);
        assert_eq!(summary.copy_tasks, 3 * 3);
        assert_eq!(summary.tasks_submitted(), 15);

        let tasks = sink.tasks.lock().unwrap();
        assert_eq!(tasks.len(), 15);
        assert!(tasks.iter().all(|(_, _, path)| !path.ends_with("/link")));
    }

    #[test]
    fn test_destinations_ascending_and_parents_first() {
        let (_dir, registry) = sample_tree(2);
        let sink = RecordingSink::default();
        TreeWalker::new(&registry, &sink, DirectoryOrdering::Serialized)
            .walk(0)
            .unwrap();

        let tasks = sink.tasks.lock().unwrap();
        for pair in tasks.chunks(2) {
            assert_eq!(pair[0].1, 0);
            assert_eq!(pair[1].1, 1);
            assert_eq!(pair[0].2, pair[1].2);
        }

        let position = |suffix: &str| tasks.iter().position(|t| t.2.ends_with(suffix)).unwrap();
        assert!(position("/a") < position("/a/b.txt"));
        assert!(position("/a/c") < position("/a/c/d.txt"));
        assert!(tasks[position("/a")].0);
        assert!(!tasks[position("/e.txt")].0);
    }

    #[test]
    fn test_serialized_waits_for_directories() {
        let (_dir, registry) = sample_tree(2);
        let sink = SlowDirectorySink::default();
        TreeWalker::new(&registry, &sink, DirectoryOrdering::Serialized)
            .walk(0)
            .unwrap();
        assert!(sink.violations.lock().unwrap().is_empty());
    }

    #[test]
    fn test_refused_tasks_are_counted() {
        let (_dir, registry) = sample_tree(2);
        let summary = TreeWalker::new(&registry, &RefusingSink, DirectoryOrdering::Serialized)
            .walk(0)
            .unwrap();
        assert_eq!(summary.tasks_submitted(), 0);
        assert_eq!(summary.rejected, 10);
    }

    #[test]
    fn test_missing_source_root_fails() {
        let dir = TempDir::new().unwrap();
        let src = format!("file:{}", dir.path().join("absent").display());
        let dst = format!("file:{}", dir.path().join("dst").display());
        let mut registry = NodeRegistry::from_uris(&[src], &[dst]).unwrap();
        registry.open_all(&MountOptions::default()).unwrap();

        let sink = RecordingSink::default();
        let err = TreeWalker::new(&registry, &sink, DirectoryOrdering::Serialized)
            .walk(0)
            .unwrap_err();
        assert!(matches!(err, FanCopyError::Walk { .. }));
        assert!(sink.tasks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_summary_merge() {
        let mut total = WalkSummary::default();
        let one = WalkSummary {
            directories: 1,
            files: 2,
            copy_tasks: 4,
            directory_tasks: 2,
            ..Default::default()
        };
        total.merge(&one);
        total.merge(&one);
        assert_eq!(total.files, 4);
        assert_eq!(total.tasks_submitted(), 12);
    }
}
