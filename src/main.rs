mod cli;
mod config;
mod juju;
mod manager;
mod packages;
mod plan;
mod providers;
mod system;

use anyhow::{bail, Result};
use clap::Parser;
use cli::{Cli, Commands};
use config::Config;
use manager::Manager;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // In dry-run mode only printed intentions go to stdout; logging is
    // capped to errors.
    let log_level = if cli.dry_run {
        log::LevelFilter::Error
    } else if cli.verbose || cli.trace {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    // Live runs drive snap, apt-get and usermod; a dry run may be
    // unprivileged.
    if !cli.dry_run && unsafe { libc::geteuid() } != 0 {
        bail!("this command must be run as root (try `sudo valet ...`)");
    }

    let manager = Manager::new(cli.dry_run, cli.trace)?;

    match cli.command {
        Commands::Prepare {
            config,
            extra_snaps,
            extra_debs,
        } => {
            let mut conf = Config::load(&config)?;
            conf.add_host_extras(&extra_snaps, &extra_debs);
            conf.dry_run = cli.dry_run;
            conf.verbose = cli.verbose;
            conf.trace = cli.trace;
            manager.prepare(&conf)
        }
        Commands::Restore => manager.restore(cli.dry_run, cli.verbose, cli.trace),
    }
}
