//! The MicroK8s cluster provider.

use crate::config::{Config, ImageRegistryConfig};
use crate::packages::SnapHandler;
use crate::plan::Action;
use crate::providers::{registry, Provider};
use crate::system::{write_home_dir_file, Command, Snap, Worker};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Fallback channel when the latest strict/stable channel cannot be
/// discovered from the store.
const DEFAULT_MICROK8S_CHANNEL: &str = "1.32-strict/stable";

const READY_RETRY_BOUND: Duration = Duration::from_secs(5 * 60);

const CERTS_DIR: &str = "/var/snap/microk8s/current/args/certs.d/docker.io";

/// A MicroK8s install on a given machine.
pub struct MicroK8s {
    channel: String,
    addons: Vec<String>,
    image_registry: ImageRegistryConfig,
    bootstrap: bool,
    model_defaults: BTreeMap<String, String>,
    bootstrap_constraints: BTreeMap<String, String>,

    worker: Arc<dyn Worker>,
    snaps: Vec<Snap>,
}

impl MicroK8s {
    pub fn new(worker: Arc<dyn Worker>, config: &Config) -> Self {
        let conf = &config.providers.microk8s;
        let channel = if conf.channel.is_empty() {
            default_channel(worker.as_ref())
        } else {
            conf.channel.clone()
        };

        Self {
            snaps: vec![Snap::new("microk8s", &channel), Snap::new("kubectl", "stable")],
            channel,
            addons: conf.addons.clone(),
            image_registry: conf.image_registry.clone(),
            bootstrap: conf.bootstrap,
            model_defaults: conf.model_defaults.clone(),
            bootstrap_constraints: conf.bootstrap_constraints.clone(),
            worker,
        }
    }

    fn install(&self) -> Result<()> {
        SnapHandler::new(self.worker.clone(), self.snaps.clone()).prepare()
    }

    /// Point docker.io pulls at the configured mirror. Must happen
    /// before waiting for readiness; the config is only picked up on
    /// restart.
    fn configure_image_registry(&self) -> Result<()> {
        if self.image_registry.url.is_empty() {
            return Ok(());
        }

        log::info!("Configuring image registry: {}", self.image_registry.url);

        self.worker.mkdir_all(Path::new(CERTS_DIR), 0o755)?;
        self.worker.write_file(
            &Path::new(CERTS_DIR).join("hosts.toml"),
            &registry::hosts_toml(&self.image_registry),
            0o600,
        )?;

        self.worker.run(&Command::new("microk8s", &["stop"]))?;
        self.worker.run(&Command::new("microk8s", &["start"]))?;
        Ok(())
    }

    fn init(&self) -> Result<()> {
        let cmd = Command::new("microk8s", &["status", "--wait-ready", "--timeout", "270"]);
        self.worker.run_with_retries(&cmd, READY_RETRY_BOUND)?;
        Ok(())
    }

    fn enable_addons(&self) -> Result<()> {
        for addon in &self.addons {
            // MetalLB needs an address pool to hand out.
            let enable_arg = if addon == "metallb" {
                "metallb:10.64.140.43-10.64.140.49"
            } else {
                addon.as_str()
            };

            let cmd = Command::new("microk8s", &["enable", enable_arg]);
            self.worker
                .run_with_retries(&cmd, READY_RETRY_BOUND)
                .with_context(|| format!("failed to enable MicroK8s addon '{addon}'"))?;
        }
        Ok(())
    }

    fn enable_non_root_user_control(&self) -> Result<()> {
        let username = self.worker.user().username.clone();
        let group = self.group_name();

        self.worker
            .run(&Command::new("usermod", &["-a", "-G", group.as_str(), username.as_str()]))
            .with_context(|| format!("failed to add user '{username}' to group '{group}'"))?;
        Ok(())
    }

    fn setup_kubectl(&self) -> Result<()> {
        let kubeconfig = self
            .worker
            .run(&Command::new("microk8s", &["config"]))
            .context("failed to fetch MicroK8s configuration")?;

        write_home_dir_file(self.worker.as_ref(), Path::new(".kube/config"), &kubeconfig)?;
        Ok(())
    }
}

impl Action for MicroK8s {
    fn name(&self) -> String {
        "microk8s".to_string()
    }

    fn prepare(&self) -> Result<()> {
        self.install().context("failed to install MicroK8s")?;
        self.configure_image_registry()
            .context("failed to configure image registry")?;
        self.init().context("failed to initialize MicroK8s")?;
        self.enable_addons()
            .context("failed to enable MicroK8s addons")?;
        self.enable_non_root_user_control()
            .context("failed to enable non-root MicroK8s access")?;
        self.setup_kubectl()
            .context("failed to setup kubectl for MicroK8s")?;

        log::info!("Prepared provider: {} (channel {})", self.name(), self.channel);
        Ok(())
    }

    fn restore(&self) -> Result<()> {
        SnapHandler::new(self.worker.clone(), self.snaps.clone()).restore()?;

        let kube_dir = self.worker.user().home_dir.join(".kube");
        self.worker
            .remove_path(&kube_dir)
            .context("failed to remove '.kube' from user's home directory")?;

        log::info!("Removed provider: {}", self.name());
        Ok(())
    }
}

impl Provider for MicroK8s {
    fn bootstrap(&self) -> bool {
        self.bootstrap
    }

    fn cloud_name(&self) -> &str {
        "microk8s"
    }

    /// Strictly confined MicroK8s uses a differently named group.
    fn group_name(&self) -> String {
        if self.channel.contains("strict") {
            "snap_microk8s".to_string()
        } else {
            "microk8s".to_string()
        }
    }

    fn model_defaults(&self) -> &BTreeMap<String, String> {
        &self.model_defaults
    }

    fn bootstrap_constraints(&self) -> &BTreeMap<String, String> {
        &self.bootstrap_constraints
    }
}

/// Prefer the newest strictly-confined stable channel from the store;
/// fall back to a known-good pin when the store cannot be reached.
fn default_channel(worker: &dyn Worker) -> String {
    let Ok(channels) = worker.snap_channels("microk8s") else {
        return DEFAULT_MICROK8S_CHANNEL.to_string();
    };

    channels
        .into_iter()
        .find(|c| c.contains("strict") && c.contains("stable"))
        .unwrap_or_else(|| DEFAULT_MICROK8S_CHANNEL.to_string())
}
