//! # FanCopy - fan one directory tree out to many filesystems
//!
//! FanCopy walks each source tree once and replicates every directory and
//! regular file onto several destination endpoints at the same time.
//! Endpoints are GlusterFS volumes, CephFS filesystems or local
//! directories; all of them are served through one [`backend::Backend`]
//! capability set.
//!
//! ## Quick Start
//!
//! ```no_run
//! use fancopy::config::ReplicateConfig;
//! use fancopy::core::ReplicationEngine;
//!
//! let config = ReplicateConfig {
//!     sources: vec!["glfs:tcp:gl1:24007:data:/projects".into()],
//!     destinations: vec![
//!         ":gl2::data:/projects".into(),
//!         "cfs:mon1,mon2:backup:/etc/ceph/backup.secret:/:/projects".into(),
//!     ],
//!     workers: 8,
//!     ..Default::default()
//! };
//!
//! let report = ReplicationEngine::new(config).run().unwrap();
//! report.print_summary();
//! ```
//!
//! ## Path translation
//!
//! ```
//! use fancopy::path::translate;
//!
//! assert_eq!(translate("/src", "/dst/", "/src/a/b.txt").unwrap(), "/dst/a/b.txt");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(not(unix))]
compile_error!("fancopy relies on Unix mount helpers and file modes");

pub mod backend;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod node;
pub mod path;

// Re-export commonly used types
pub use config::{DirectoryOrdering, ReplicateConfig};
pub use crate::core::{ReplicationEngine, ReplicationReport};
pub use error::{FanCopyError, Result};
pub use node::{NodeRegistry, NodeSpec};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use fancopy::prelude::*;
    //! ```

    pub use crate::backend::{Backend, BackendKind, Endpoint, FileHandle, MountOptions};
    pub use crate::config::{DirectoryOrdering, OutputFormat, ReplicateConfig};
    pub use crate::core::{ReplicationEngine, ReplicationReport, Task, TaskSink, WorkerPool};
    pub use crate::error::{FanCopyError, Result};
    pub use crate::node::{Node, NodeRegistry, NodeRole, NodeSpec};
    pub use crate::path::translate;
}
