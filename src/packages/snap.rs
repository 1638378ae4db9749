//! Installs, refreshes, connects and removes batches of snaps.

use crate::plan::Action;
use crate::system::{Command, Snap, Worker};
use anyhow::{Context, Result};
use std::sync::Arc;

/// Handles installation and removal of a batch of snaps.
///
/// All snapd mutations go through the per-executable exclusion lock:
/// snapd serializes changes internally, and concurrent `snap` calls
/// just queue up and time out.
pub struct SnapHandler {
    worker: Arc<dyn Worker>,
    snaps: Vec<Snap>,
}

impl SnapHandler {
    pub fn new(worker: Arc<dyn Worker>, snaps: Vec<Snap>) -> Self {
        Self { worker, snaps }
    }

    /// Install or refresh one snap, then set up its declared interface
    /// connections.
    fn install_snap(&self, snap: &Snap) -> Result<()> {
        let info = self
            .worker
            .snap_info(&snap.name, &snap.channel)
            .with_context(|| format!("failed to query snap '{}'", snap.name))?;

        let verb = if info.installed {
            // Already tracking the requested channel (or no channel was
            // requested): nothing to do.
            if snap.channel.is_empty() || info.tracking_channel == snap.channel {
                log::debug!(
                    "Snap '{}' already installed at the requested channel",
                    snap.name
                );
                return self.connect_interfaces(snap);
            }
            "refresh"
        } else {
            "install"
        };

        if verb == "install" {
            self.worker.print(&format!("Installing snap '{}'", snap.name));
        } else {
            self.worker.print(&format!("Refreshing snap '{}'", snap.name));
        }
        log::debug!("Running snap {verb} for '{}'", snap.name);

        let mut args = vec![verb, snap.name.as_str()];
        if !snap.channel.is_empty() {
            args.push("--channel");
            args.push(snap.channel.as_str());
        }
        if info.classic {
            args.push("--classic");
        }

        self.worker
            .run_exclusive(&Command::new("snap", &args))
            .with_context(|| format!("failed to {verb} snap '{}'", snap.name))?;

        self.connect_interfaces(snap)
    }

    fn connect_interfaces(&self, snap: &Snap) -> Result<()> {
        for connection in &snap.connections {
            self.worker
                .print(&format!("Connecting snap interface '{connection}'"));
            self.worker
                .run_exclusive(&Command::new("snap", &["connect", connection.as_str()]))
                .with_context(|| format!("failed to connect snap interface '{connection}'"))?;
        }
        Ok(())
    }

    fn remove_snap(&self, snap: &Snap) -> Result<()> {
        self.worker.print(&format!("Removing snap '{}'", snap.name));

        self.worker
            .run_exclusive(&Command::new("snap", &["remove", snap.name.as_str(), "--purge"]))
            .with_context(|| format!("failed to remove snap '{}'", snap.name))?;
        Ok(())
    }
}

impl Action for SnapHandler {
    fn name(&self) -> String {
        "snaps".to_string()
    }

    fn prepare(&self) -> Result<()> {
        for snap in &self.snaps {
            self.install_snap(snap)?;
        }
        Ok(())
    }

    fn restore(&self) -> Result<()> {
        for snap in &self.snaps {
            self.remove_snap(snap)?;
        }
        Ok(())
    }
}
