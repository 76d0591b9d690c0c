//! FanCopy CLI - replicate source trees onto many destinations

use clap::Parser;
use fancopy::config::{CliArgs, OutputFormat, ReplicateConfig};
use fancopy::core::ReplicationEngine;
use fancopy::error::Result;
use fancopy::logging::init_logging;

fn main() {
    // Parse CLI arguments; clap exits with status 2 on malformed input
    let args = CliArgs::parse();

    match run(args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Returns whether every source tree was walked
fn run(args: CliArgs) -> Result<bool> {
    init_logging(args.verbose, args.debug, args.syslog)?;

    let config = ReplicateConfig::from_cli(&args)?;
    tracing::debug!(
        "Configuration: workers={} chunk_size={} ordering={:?} mount_base={}",
        config.workers,
        config.chunk_size,
        config.directory_ordering,
        config.mount_base.display()
    );

    let output_format = config.output_format;
    let report = ReplicationEngine::new(config).run()?;

    match output_format {
        OutputFormat::Text => report.print_summary(),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }

    Ok(report.is_success())
}
