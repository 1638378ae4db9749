//! The Canonical K8s (microcluster) provider.

use crate::config::{Config, ImageRegistryConfig};
use crate::packages::{Deb, DebHandler, SnapHandler};
use crate::plan::Action;
use crate::providers::{registry, ClusterStatus, Provider};
use crate::system::{write_home_dir_file, Command, Error, Snap, Worker};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_K8S_CHANNEL: &str = "1.32-classic/stable";

const BOOTSTRAP_RETRY_BOUND: Duration = Duration::from_secs(5 * 60);

const HOSTS_DIR: &str = "/var/snap/k8s/common/etc/containerd/hosts.d/docker.io";

/// A K8s install on a given machine.
pub struct K8s {
    channel: String,
    features: BTreeMap<String, BTreeMap<String, String>>,
    image_registry: ImageRegistryConfig,
    bootstrap: bool,
    model_defaults: BTreeMap<String, String>,
    bootstrap_constraints: BTreeMap<String, String>,

    worker: Arc<dyn Worker>,
    debs: Vec<Deb>,
    snaps: Vec<Snap>,
}

impl K8s {
    pub fn new(worker: Arc<dyn Worker>, config: &Config) -> Self {
        let conf = &config.providers.k8s;
        let channel = if conf.channel.is_empty() {
            DEFAULT_K8S_CHANNEL.to_string()
        } else {
            conf.channel.clone()
        };

        Self {
            snaps: vec![Snap::new("k8s", &channel), Snap::new("kubectl", "stable")],
            debs: vec![Deb::new("iptables")],
            channel,
            features: conf.features.clone(),
            image_registry: conf.image_registry.clone(),
            bootstrap: conf.bootstrap,
            model_defaults: conf.model_defaults.clone(),
            bootstrap_constraints: conf.bootstrap_constraints.clone(),
            worker,
        }
    }

    /// Install the snaps, and iptables if the host lacks it. The two
    /// package batches are independent, so they run concurrently.
    fn install(&self) -> Result<()> {
        let (debs, snaps) = rayon::join(
            || {
                let cmd = Command::new("which", &["iptables"]).read_only();
                if self.worker.run(&cmd).is_err() {
                    DebHandler::new(self.worker.clone(), self.debs.clone()).prepare()
                } else {
                    Ok(())
                }
            },
            || SnapHandler::new(self.worker.clone(), self.snaps.clone()).prepare(),
        );
        debs?;
        snaps
    }

    fn configure_image_registry(&self) -> Result<()> {
        if self.image_registry.url.is_empty() {
            return Ok(());
        }

        log::info!("Configuring image registry: {}", self.image_registry.url);

        self.worker.mkdir_all(Path::new(HOSTS_DIR), 0o755)?;
        self.worker.write_file(
            &Path::new(HOSTS_DIR).join("hosts.toml"),
            &registry::hosts_toml(&self.image_registry),
            0o600,
        )?;
        Ok(())
    }

    fn init(&self) -> Result<()> {
        self.handle_existing_containerd();

        if self.cluster_status() == ClusterStatus::NotInitialized {
            self.worker
                .run_with_retries(&Command::new("k8s", &["bootstrap"]), BOOTSTRAP_RETRY_BOUND)?;
        }

        let cmd = Command::new("k8s", &["status", "--wait-ready", "--timeout", "270s"]);
        self.worker.run_with_retries(&cmd, BOOTSTRAP_RETRY_BOUND)?;
        Ok(())
    }

    /// Probe whether the node is already part of a cluster.
    ///
    /// `k8s status` only has human-readable output, so anything not
    /// positively recognized is `Unknown`, and `Unknown` never triggers
    /// a bootstrap.
    fn cluster_status(&self) -> ClusterStatus {
        let cmd = Command::new("k8s", &["status"]).read_only();
        match self.worker.run(&cmd) {
            Ok(_) => ClusterStatus::Ready,
            Err(Error::NotInstalled(tool)) => {
                log::info!("'{tool}' not found on the host, skipping bootstrap");
                ClusterStatus::Unknown
            }
            Err(err) => {
                let not_clustered = err
                    .command_output()
                    .is_some_and(|out| out.contains("not part of a Kubernetes cluster"));
                if not_clustered {
                    ClusterStatus::NotInitialized
                } else {
                    log::debug!("Unrecognized k8s status output: {err}");
                    ClusterStatus::Unknown
                }
            }
        }
    }

    /// Apply feature settings then enable each feature, in (feature,
    /// key) order so runs are reproducible.
    fn configure_features(&self) -> Result<()> {
        for (feature, settings) in &self.features {
            for (key, value) in settings {
                let setting = format!("{feature}.{key}={value}");
                self.worker
                    .run(&Command::new("k8s", &["set", setting.as_str()]))
                    .with_context(|| format!("failed to set K8s feature config '{setting}'"))?;
            }

            self.worker
                .run_with_retries(&Command::new("k8s", &["enable", feature.as_str()]), BOOTSTRAP_RETRY_BOUND)
                .with_context(|| format!("failed to enable K8s feature '{feature}'"))?;
        }
        Ok(())
    }

    fn setup_kubectl(&self) -> Result<()> {
        let kubeconfig = self
            .worker
            .run(&Command::new("k8s", &["kubectl", "config", "view", "--raw"]))
            .context("failed to fetch K8s configuration")?;

        write_home_dir_file(self.worker.as_ref(), Path::new(".kube/config"), &kubeconfig)?;
        Ok(())
    }

    /// A pre-existing containerd install conflicts with the one the k8s
    /// snap manages. Stop the service if it is running and clear its
    /// runtime directory; failures here are logged, not fatal, since
    /// bootstrap may still succeed.
    fn handle_existing_containerd(&self) {
        let probe = Command::new("systemctl", &["is-active", "containerd.service"]).read_only();
        match self.worker.run(&probe) {
            Ok(output) if output.trim() == "active" => {
                log::debug!("Containerd service is active, stopping it");
                let stop = Command::new("systemctl", &["stop", "containerd.service"]);
                if let Err(err) = self.worker.run(&stop) {
                    log::warn!("Failed to stop containerd service: {err}");
                }
            }
            _ => log::debug!("Containerd service is not active or does not exist"),
        }

        if let Err(err) = self.worker.remove_path(Path::new("/run/containerd")) {
            log::warn!("Failed to remove /run/containerd: {err}");
        }
    }

    /// Start containerd back up if the unit exists on the host; it may
    /// have been stopped during prepare.
    fn restore_containerd(&self) {
        let probe =
            Command::new("systemctl", &["list-unit-files", "containerd.service"]).read_only();
        match self.worker.run(&probe) {
            Ok(output) if output.contains("containerd.service") => {
                let start = Command::new("systemctl", &["start", "containerd.service"]);
                if let Err(err) = self.worker.run(&start) {
                    log::warn!("Failed to start containerd service: {err}");
                }
            }
            _ => log::debug!("Containerd service does not exist on system, skipping restore"),
        }
    }
}

impl Action for K8s {
    fn name(&self) -> String {
        "k8s".to_string()
    }

    fn prepare(&self) -> Result<()> {
        self.install().context("failed to install K8s")?;
        self.configure_image_registry()
            .context("failed to configure image registry")?;
        self.init().context("failed to initialize K8s")?;
        self.configure_features()
            .context("failed to configure K8s features")?;
        self.setup_kubectl()
            .context("failed to setup kubectl for K8s")?;

        log::info!("Prepared provider: {} (channel {})", self.name(), self.channel);
        Ok(())
    }

    fn restore(&self) -> Result<()> {
        SnapHandler::new(self.worker.clone(), self.snaps.clone()).restore()?;

        let kube_dir = self.worker.user().home_dir.join(".kube");
        self.worker
            .remove_path(&kube_dir)
            .context("failed to remove '.kube' from user's home directory")?;

        self.restore_containerd();

        log::info!("Removed provider: {}", self.name());
        Ok(())
    }
}

impl Provider for K8s {
    fn bootstrap(&self) -> bool {
        self.bootstrap
    }

    fn cloud_name(&self) -> &str {
        "k8s"
    }

    fn model_defaults(&self) -> &BTreeMap<String, String> {
        &self.model_defaults
    }

    fn bootstrap_constraints(&self) -> &BTreeMap<String, String> {
        &self.bootstrap_constraints
    }
}
