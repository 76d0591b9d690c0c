//! Replication engine
//!
//! Drives a run: open every node, create the destination roots, walk each
//! source tree in turn with a drain between sources, then shut the pool
//! down and close the nodes.

use super::pool::WorkerPool;
use super::task::{Task, TaskExecutor};
use super::walker::{TreeWalker, WalkSummary};
use crate::backend::MountOptions;
use crate::config::ReplicateConfig;
use crate::error::Result;
use crate::node::NodeRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Totals of one replication run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationReport {
    /// Sources whose walk completed
    pub sources_walked: usize,
    /// Labels of sources whose walk failed
    pub failed_sources: Vec<String>,
    /// Directories found in the source trees
    pub directories: u64,
    /// Regular files found in the source trees
    pub files: u64,
    /// Symlinks and special files skipped
    pub skipped: u64,
    /// Unreadable entries skipped by the walks
    pub walk_errors: u64,
    /// Directory tasks submitted
    pub directory_tasks: u64,
    /// Copy tasks submitted
    pub copy_tasks: u64,
    /// Tasks that succeeded
    pub tasks_completed: u64,
    /// Tasks that failed or could not be submitted
    pub tasks_failed: u64,
    /// Files fully copied
    pub files_copied: u64,
    /// Bytes written across all destinations
    pub bytes_copied: u64,
    /// Worker pool size
    pub workers: usize,
    /// Most tasks running at once
    pub peak_in_flight: usize,
    /// Wall-clock time of the run, in seconds
    pub duration_secs: f64,
}

impl ReplicationReport {
    /// Whether every source tree was walked
    pub fn is_success(&self) -> bool {
        self.failed_sources.is_empty()
    }

    fn add_walk(&mut self, summary: &WalkSummary) {
        self.sources_walked += 1;
        self.directories += summary.directories;
        self.files += summary.files;
        self.skipped += summary.skipped;
        self.walk_errors += summary.walk_errors;
        self.directory_tasks += summary.directory_tasks;
        self.copy_tasks += summary.copy_tasks;
        self.tasks_failed += summary.rejected;
    }

    /// Render as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Print a human-readable summary to stdout
    pub fn print_summary(&self) {
        // truncated to whole milliseconds
        let elapsed = Duration::from_millis((self.duration_secs * 1000.0) as u64);

        println!("\n=== Replication Summary ===");
        println!("Sources walked:  {}", self.sources_walked);
        println!("Directories:     {}", self.directories);
        println!("Files:           {}", self.files);
        println!("Skipped:         {}", self.skipped);
        println!("Tasks:           {} directory, {} copy", self.directory_tasks, self.copy_tasks);
        println!("Completed:       {}", self.tasks_completed);
        println!("Failed:          {}", self.tasks_failed);
        println!("Bytes copied:    {}", humansize::format_size(self.bytes_copied, humansize::BINARY));
        println!("Peak in flight:  {} of {}", self.peak_in_flight, self.workers);
        println!("Duration:        {}", humantime::format_duration(elapsed));

        if self.walk_errors > 0 {
            println!("Unreadable:      {}", self.walk_errors);
        }

        if !self.failed_sources.is_empty() {
            println!("\nFailed sources: {}", self.failed_sources.len());
            for label in &self.failed_sources {
                println!("  {}", label);
            }
        }
    }
}

/// Runs a replication from a [`ReplicateConfig`]
#[derive(Debug)]
pub struct ReplicationEngine {
    config: ReplicateConfig,
    mount_options: MountOptions,
}

impl ReplicationEngine {
    /// Create a new engine; private mounts go under `config.mount_base`
    pub fn new(config: ReplicateConfig) -> Self {
        let mount_options = MountOptions::with_base(config.mount_base.clone());
        Self {
            config,
            mount_options,
        }
    }

    /// Override how backends are mounted
    pub fn with_mount_options(mut self, mount_options: MountOptions) -> Self {
        self.mount_options = mount_options;
        self
    }

    /// Configuration of this engine
    pub fn config(&self) -> &ReplicateConfig {
        &self.config
    }

    /// Run the whole replication
    ///
    /// Errors are returned only for failures that stop the run before any
    /// walk begins. Failed walks and failed tasks are part of the report.
    pub fn run(&self) -> Result<ReplicationReport> {
        let start = Instant::now();
        self.config.validate()?;

        let mut registry = NodeRegistry::from_uris(&self.config.sources, &self.config.destinations)?;
        tracing::info!(
            "Replicating {} source(s) to {} destination(s) with {} workers",
            registry.source_count(),
            registry.destination_count(),
            self.config.workers
        );

        // on failure the registry is dropped, which closes whatever was opened
        registry.open_all(&self.mount_options)?;
        registry.create_destination_roots()?;

        let mut report = self.replicate(Arc::new(registry))?;
        report.duration_secs = start.elapsed().as_secs_f64();
        Ok(report)
    }

    /// Replicate every source of an opened registry, then close it
    pub fn replicate(&self, registry: Arc<NodeRegistry>) -> Result<ReplicationReport> {
        let start = Instant::now();
        let executor = Arc::new(TaskExecutor::new(Arc::clone(&registry), self.config.chunk_size));

        let handler = Arc::clone(&executor);
        let pool = WorkerPool::new("fancopy-worker", self.config.workers, move |task: Task| {
            handler.execute(task)
        })?;

        let mut report = ReplicationReport {
            workers: self.config.workers,
            ..Default::default()
        };

        for index in 0..registry.source_count() {
            let walker = TreeWalker::new(&registry, &pool, self.config.directory_ordering);
            match walker.walk(index) {
                Ok(summary) => report.add_walk(&summary),
                Err(e) => {
                    let label = registry.source(index).map(|n| n.label()).unwrap_or_default();
                    tracing::error!("Walk of {} failed: {}", label, e);
                    report.failed_sources.push(label);
                }
            }

            // drain before the next source tree
            pool.wait_all();
        }

        let pool_stats = pool.shutdown();
        let executed = executor.stats();
        drop(executor);

        report.tasks_completed = pool_stats.completed;
        report.tasks_failed += pool_stats.failed;
        report.peak_in_flight = pool_stats.peak_in_flight;
        report.files_copied = executed.files_copied;
        report.bytes_copied = executed.bytes_copied;
        report.duration_secs = start.elapsed().as_secs_f64();

        match Arc::try_unwrap(registry) {
            Ok(mut registry) => registry.close_all(),
            Err(_) => tracing::debug!("Registry still shared; nodes close when the last owner drops"),
        }

        tracing::info!(
            "Replication finished: {} completed, {} failed",
            report.tasks_completed,
            report.tasks_failed
        );
        Ok(report)
    }
}
