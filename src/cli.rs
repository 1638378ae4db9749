use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "valet")]
#[command(version)]
#[command(about = "Provision ephemeral development and test machines", long_about = None)]
pub struct Cli {
    /// Report intended changes without touching the host
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print every executed command and its output
    #[arg(long, global = true)]
    pub trace: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install host packages, set up providers and bootstrap Juju
    /// controllers as described by the configuration file
    Prepare {
        /// Path to the configuration file
        #[arg(short = 'f', long = "config", default_value = "valet.yaml")]
        config: PathBuf,

        /// Additional snap to install, in shorthand form
        /// (`name` or `name/channel`); may be repeated
        #[arg(long = "extra-snaps", value_name = "SNAP")]
        extra_snaps: Vec<String>,

        /// Additional apt package to install; may be repeated
        #[arg(long = "extra-debs", value_name = "PACKAGE")]
        extra_debs: Vec<String>,
    },

    /// Reverse a previous prepare, using its persisted snapshot
    Restore,
}
