//! Configuration settings for FanCopy
//!
//! Defines the CLI arguments, the runtime configuration derived from them,
//! and the defaults for a replication run.

use crate::error::{FanCopyError, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default worker pool size
pub const DEFAULT_WORKERS: usize = 3;

/// Default copy buffer size
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest accepted copy buffer size
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024 * 1024;

/// FanCopy - replicate one directory tree onto many distributed filesystem mounts
#[derive(Parser, Debug, Clone)]
#[command(name = "fancopy")]
#[command(author = "FanCopy Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fan a source tree out to several GlusterFS/CephFS destinations")]
#[command(long_about = r#"
FanCopy walks each source tree once and replicates every directory and
regular file onto all destination endpoints concurrently.

Endpoint URIs:
  protocol:server:port:volume:path          GlusterFS (untagged)
  glfs:protocol:server:port:volume:path     GlusterFS
  cfs:monitors:id:keyringFile:root:path     CephFS
  file:path                                 Local directory

An empty protocol means tcp, an empty or zero port means 24007.

Examples:
  fancopy --from :gl1::data:/src --to :gl2::data:/dst
  fancopy --from file:/srv/a --to glfs:tcp:gl1:24007:vol:/a --to cfs:mon1,mon2:admin:/etc/ceph/admin.secret:/:/a
"#)]
pub struct CliArgs {
    /// Add a source endpoint (repeatable)
    #[arg(long = "from", value_name = "URI")]
    pub from: Vec<String>,

    /// Add a destination endpoint (repeatable)
    #[arg(long = "to", value_name = "URI")]
    pub to: Vec<String>,

    /// Worker pool size
    #[arg(short = 'w', long, default_value_t = DEFAULT_WORKERS, value_name = "NUM")]
    pub workers: usize,

    /// Enable verbose logging (one line per task)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Send logging to syslog instead of standard error
    #[arg(long)]
    pub syslog: bool,

    /// Copy buffer size (e.g., 64K, 1M)
    #[arg(long, default_value = "64K", value_name = "SIZE")]
    pub chunk_size: String,

    /// Do not wait for a directory to exist on every destination before descending into it
    #[arg(long)]
    pub relaxed_dirs: bool,

    /// Base directory for mounts created by this run
    #[arg(long, value_name = "PATH", env = "FANCOPY_MOUNT_DIR")]
    pub mount_dir: Option<PathBuf>,

    /// Output format for the run summary
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormat,
}

/// Output format for reports
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format
    Json,
}

/// When directory-create tasks must finish relative to the walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryOrdering {
    /// Wait for a directory to exist on every destination before descending into it
    #[default]
    Serialized,
    /// Submit and move on; children may race their parent's creation
    Relaxed,
}

/// Runtime configuration derived from CLI args
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateConfig {
    /// Source endpoint URIs, in registration order
    pub sources: Vec<String>,
    /// Destination endpoint URIs, in registration order
    pub destinations: Vec<String>,
    /// Worker pool size
    pub workers: usize,
    /// Copy buffer size in bytes
    pub chunk_size: usize,
    /// Directory creation ordering
    pub directory_ordering: DirectoryOrdering,
    /// Base directory for private mounts
    pub mount_base: PathBuf,
    /// Route logging to syslog
    pub syslog: bool,
    /// Summary output format
    pub output_format: OutputFormat,
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            destinations: Vec::new(),
            workers: DEFAULT_WORKERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            directory_ordering: DirectoryOrdering::Serialized,
            mount_base: default_mount_base(),
            syslog: false,
            output_format: OutputFormat::Text,
        }
    }
}

/// Default base directory for private mounts
pub fn default_mount_base() -> PathBuf {
    std::env::temp_dir().join("fancopy")
}

/// Parse human-readable size string to bytes
pub fn parse_size(size: &str) -> std::result::Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let (num_str, multiplier) = if size.ends_with("GB") || size.ends_with('G') {
        (size.trim_end_matches(['G', 'B']), 1024u64 * 1024 * 1024)
    } else if size.ends_with("MB") || size.ends_with('M') {
        (size.trim_end_matches(['M', 'B']), 1024u64 * 1024)
    } else if size.ends_with("KB") || size.ends_with('K') {
        (size.trim_end_matches(['K', 'B']), 1024u64)
    } else if size.ends_with('B') {
        (size.trim_end_matches('B'), 1u64)
    } else {
        (size.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;

    if num < 0.0 {
        return Err(format!("Negative size: {}", size));
    }

    let bytes = num * multiplier as f64;
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(format!("Size out of range: {}", size));
    }

    Ok(bytes as u64)
}

impl ReplicateConfig {
    /// Create config from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let chunk_size = parse_size(&args.chunk_size)
            .map_err(|e| FanCopyError::config(format!("Invalid chunk size: {}", e)))?;

        let config = Self {
            sources: args.from.clone(),
            destinations: args.to.clone(),
            workers: args.workers,
            chunk_size: usize::try_from(chunk_size)
                .map_err(|_| FanCopyError::config(format!("Invalid chunk size: {}", args.chunk_size)))?,
            directory_ordering: if args.relaxed_dirs {
                DirectoryOrdering::Relaxed
            } else {
                DirectoryOrdering::Serialized
            },
            mount_base: args.mount_dir.clone().unwrap_or_else(default_mount_base),
            syslog: args.syslog,
            output_format: args.output_format,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(FanCopyError::config("at least one --from endpoint is required"));
        }
        if self.destinations.is_empty() {
            return Err(FanCopyError::config("at least one --to endpoint is required"));
        }
        if self.workers == 0 {
            return Err(FanCopyError::config("worker count must be at least 1"));
        }
        if self.chunk_size == 0 {
            return Err(FanCopyError::config("chunk size must be greater than zero"));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(FanCopyError::config(format!(
                "chunk size {} exceeds the {} byte maximum",
                self.chunk_size, MAX_CHUNK_SIZE
            )));
        }
        Ok(())
    }
}
