//! The LXD container-runtime provider.

use crate::config::Config;
use crate::packages::SnapHandler;
use crate::plan::Action;
use crate::providers::Provider;
use crate::system::{Command, Snap, Worker};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_LXD_CHANNEL: &str = "latest/stable";

const WAITREADY_RETRY_BOUND: Duration = Duration::from_secs(5 * 60);

/// An LXD install on a given machine.
pub struct Lxd {
    channel: String,
    bootstrap: bool,
    model_defaults: BTreeMap<String, String>,
    bootstrap_constraints: BTreeMap<String, String>,

    worker: Arc<dyn Worker>,
    snaps: Vec<Snap>,
}

impl Lxd {
    pub fn new(worker: Arc<dyn Worker>, config: &Config) -> Self {
        let conf = &config.providers.lxd;
        let channel = if conf.channel.is_empty() {
            DEFAULT_LXD_CHANNEL.to_string()
        } else {
            conf.channel.clone()
        };

        Self {
            snaps: vec![Snap::new("lxd", &channel)],
            channel,
            bootstrap: conf.bootstrap,
            model_defaults: conf.model_defaults.clone(),
            bootstrap_constraints: conf.bootstrap_constraints.clone(),
            worker,
        }
    }

    fn install(&self) -> Result<()> {
        SnapHandler::new(self.worker.clone(), self.snaps.clone()).prepare()
    }

    /// Wait for the daemon, apply the default preseed and disable ipv6
    /// on the default bridge (Juju cannot route to ipv6 containers).
    fn init(&self) -> Result<()> {
        self.worker
            .run_with_retries(&Command::new("lxd", &["waitready"]), WAITREADY_RETRY_BOUND)?;

        self.worker.run_many(&[
            Command::new("lxd", &["init", "--auto"]),
            Command::new("lxc", &["network", "set", "lxdbr0", "ipv6.address", "none"]),
        ])?;
        Ok(())
    }

    fn enable_non_root_user_control(&self) -> Result<()> {
        let username = self.worker.user().username.clone();

        self.worker.run_many(&[
            Command::new("chmod", &["a+wr", "/var/snap/lxd/common/lxd/unix.socket"]),
            Command::new("usermod", &["-a", "-G", "lxd", username.as_str()]),
        ])?;
        Ok(())
    }

    /// Docker and other tools install FORWARD drop rules that black-hole
    /// container traffic.
    fn deconflict_firewall(&self) -> Result<()> {
        self.worker.run_many(&[
            Command::new("iptables", &["-F", "FORWARD"]),
            Command::new("iptables", &["-P", "FORWARD", "ACCEPT"]),
        ])?;
        Ok(())
    }
}

impl Action for Lxd {
    fn name(&self) -> String {
        "lxd".to_string()
    }

    fn prepare(&self) -> Result<()> {
        self.install().context("failed to install LXD")?;
        self.init().context("failed to initialize LXD")?;
        self.enable_non_root_user_control()
            .context("failed to enable non-root LXD access")?;
        self.deconflict_firewall()
            .context("failed to adjust firewall rules for LXD")?;

        log::info!("Prepared provider: {} (channel {})", self.name(), self.channel);
        Ok(())
    }

    fn restore(&self) -> Result<()> {
        SnapHandler::new(self.worker.clone(), self.snaps.clone()).restore()?;

        log::info!("Removed provider: {}", self.name());
        Ok(())
    }
}

impl Provider for Lxd {
    fn bootstrap(&self) -> bool {
        self.bootstrap
    }

    fn cloud_name(&self) -> &str {
        "localhost"
    }

    fn group_name(&self) -> String {
        "lxd".to_string()
    }

    fn model_defaults(&self) -> &BTreeMap<String, String> {
        &self.model_defaults
    }

    fn bootstrap_constraints(&self) -> &BTreeMap<String, String> {
        &self.bootstrap_constraints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::mock::MockWorker;

    #[test]
    fn channel_defaults_and_overrides() {
        let worker = Arc::new(MockWorker::new());

        let lxd = Lxd::new(worker.clone(), &Config::default());
        assert_eq!(lxd.channel, DEFAULT_LXD_CHANNEL);
        assert_eq!(lxd.snaps[0].channel, DEFAULT_LXD_CHANNEL);

        let mut config = Config::default();
        config.providers.lxd.channel = "5.21/stable".to_string();
        let lxd = Lxd::new(worker, &config);
        assert_eq!(lxd.channel, "5.21/stable");
    }

    #[test]
    fn prepare_command_sequence() {
        let mut config = Config::default();
        config.providers.lxd.enable = true;

        let worker = Arc::new(MockWorker::new());
        let lxd = Lxd::new(worker.clone(), &config);
        lxd.prepare().unwrap();

        assert_eq!(
            worker.state().executed_commands,
            vec![
                "snap install lxd --channel latest/stable".to_string(),
                "lxd waitready".to_string(),
                "lxd init --auto".to_string(),
                "lxc network set lxdbr0 ipv6.address none".to_string(),
                "chmod a+wr /var/snap/lxd/common/lxd/unix.socket".to_string(),
                "usermod -a -G lxd test-user".to_string(),
                "iptables -F FORWARD".to_string(),
                "iptables -P FORWARD ACCEPT".to_string(),
            ]
        );
    }

    #[test]
    fn restore_purges_the_snap() {
        let worker = Arc::new(MockWorker::new());
        let lxd = Lxd::new(worker.clone(), &Config::default());
        lxd.restore().unwrap();

        assert_eq!(
            worker.state().executed_commands,
            vec!["snap remove lxd --purge".to_string()]
        );
    }
}
