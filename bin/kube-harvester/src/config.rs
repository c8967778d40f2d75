use std::path::PathBuf;

use clap::Parser;

/// Kubernetes metrics harvester.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Path to the configuration file.
    ///
    /// Missing files are ignored. Every setting can also be set through a `HARVEST_`-prefixed environment variable.
    #[arg(short = 'c', long = "config", default_value = "/etc/kube-harvester/config.yaml")]
    pub config: PathBuf,

    /// Runs a single collection cycle, then exits.
    #[arg(long)]
    pub once: bool,
}
