//! Configuration module for FanCopy
//!
//! Provides the CLI arguments and the runtime settings of a replication run.

mod settings;

pub use settings::*;
