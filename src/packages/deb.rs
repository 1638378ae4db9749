//! Installs and removes batches of debs via apt.

use crate::plan::Action;
use crate::system::{Command, Worker};
use anyhow::{Context, Result};
use std::sync::Arc;

/// A Debian package to be installed on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deb {
    pub name: String,
}

impl Deb {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// Handles installation and removal of a batch of debs. The apt
/// database locks itself against concurrent use, so every apt-get call
/// goes through the exclusion lock.
pub struct DebHandler {
    worker: Arc<dyn Worker>,
    debs: Vec<Deb>,
}

impl DebHandler {
    pub fn new(worker: Arc<dyn Worker>, debs: Vec<Deb>) -> Self {
        Self { worker, debs }
    }

    fn update_package_cache(&self) -> Result<()> {
        self.worker.print("Updating apt package cache");
        self.worker
            .run_exclusive(&Command::new("apt-get", &["update"]))
            .context("failed to update apt package cache")?;
        Ok(())
    }
}

impl Action for DebHandler {
    fn name(&self) -> String {
        "debs".to_string()
    }

    fn prepare(&self) -> Result<()> {
        self.update_package_cache()?;

        for deb in &self.debs {
            self.worker
                .print(&format!("Installing apt package '{}'", deb.name));
            self.worker
                .run_exclusive(&Command::new("apt-get", &["install", "-y", deb.name.as_str()]))
                .with_context(|| format!("failed to install apt package '{}'", deb.name))?;
        }
        Ok(())
    }

    fn restore(&self) -> Result<()> {
        for deb in &self.debs {
            self.worker
                .print(&format!("Removing apt package '{}'", deb.name));
            self.worker
                .run_exclusive(&Command::new("apt-get", &["remove", "-y", deb.name.as_str()]))
                .with_context(|| format!("failed to remove apt package '{}'", deb.name))?;
        }
        Ok(())
    }
}
