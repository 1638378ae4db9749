//! Bootstraps Juju controllers onto prepared providers.

use crate::config::{merge_maps, Config};
use crate::packages::SnapHandler;
use crate::plan::Action;
use crate::providers::Provider;
use crate::system::{mk_home_subdirectory, write_home_dir_file, Command, Snap, Worker};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_JUJU_CHANNEL: &str = "3.6/stable";

/// Controller bootstrap can take a long time on a fresh cluster.
const BOOTSTRAP_RETRY_BOUND: Duration = Duration::from_secs(10 * 60);

const JUJU_DATA_DIR: &str = ".local/share/juju";

/// Installs Juju and bootstraps a controller onto each provider that
/// asked for one.
pub struct Juju {
    model_defaults: BTreeMap<String, String>,
    bootstrap_constraints: BTreeMap<String, String>,
    extra_bootstrap_args: Vec<String>,

    worker: Arc<dyn Worker>,
    snaps: Vec<Snap>,
    providers: Vec<Arc<dyn Provider>>,
}

impl Juju {
    pub fn new(worker: Arc<dyn Worker>, config: &Config, providers: Vec<Arc<dyn Provider>>) -> Self {
        let channel = if config.juju.channel.is_empty() {
            DEFAULT_JUJU_CHANNEL.to_string()
        } else {
            config.juju.channel.clone()
        };

        Self {
            snaps: vec![Snap::new("juju", &channel)],
            model_defaults: config.juju.model_defaults.clone(),
            bootstrap_constraints: config.juju.bootstrap_constraints.clone(),
            extra_bootstrap_args: config
                .juju
                .extra_bootstrap_args
                .split_whitespace()
                .map(ToString::to_string)
                .collect(),
            worker,
            providers,
        }
    }

    fn controller_name(provider: &dyn Provider) -> String {
        format!("valet-{}", provider.name())
    }

    /// Whether a controller for the provider already exists, probed as
    /// the real user so we see their controller registry.
    fn controller_exists(&self, controller: &str) -> bool {
        let user = self.worker.user().username.clone();
        let cmd =
            Command::as_user(&user, "", "juju", &["show-controller", controller]).read_only();
        self.worker.run(&cmd).is_ok()
    }

    /// Render credentials.yaml for providers that need credentials.
    fn write_credentials(&self) -> Result<()> {
        let mut clouds: BTreeMap<String, serde_yaml::Value> = BTreeMap::new();
        for provider in &self.providers {
            if let Some(creds) = provider.credentials() {
                clouds.insert(provider.cloud_name().to_string(), creds);
            }
        }
        if clouds.is_empty() {
            return Ok(());
        }

        let document = BTreeMap::from([("credentials".to_string(), clouds)]);
        let yaml = serde_yaml::to_string(&document)
            .context("failed to render Juju credentials")?;

        write_home_dir_file(
            self.worker.as_ref(),
            &Path::new(JUJU_DATA_DIR).join("credentials.yaml"),
            &yaml,
        )?;
        Ok(())
    }

    fn bootstrap_provider(&self, provider: &dyn Provider) -> Result<()> {
        let controller = Self::controller_name(provider);
        if self.controller_exists(&controller) {
            log::info!("Controller '{controller}' already exists, skipping bootstrap");
            return Ok(());
        }

        self.worker.print(&format!(
            "Bootstrapping Juju controller '{controller}' on cloud '{}'",
            provider.cloud_name()
        ));

        let mut args: Vec<String> = vec![
            "bootstrap".to_string(),
            provider.cloud_name().to_string(),
            controller.clone(),
            "--verbose".to_string(),
        ];

        let model_defaults = merge_maps(&self.model_defaults, provider.model_defaults());
        for (key, value) in &model_defaults {
            args.push("--model-default".to_string());
            args.push(format!("{key}={value}"));
        }

        let constraints = merge_maps(&self.bootstrap_constraints, provider.bootstrap_constraints());
        if !constraints.is_empty() {
            let rendered: Vec<String> =
                constraints.iter().map(|(k, v)| format!("{k}={v}")).collect();
            args.push("--bootstrap-constraints".to_string());
            args.push(rendered.join(" "));
        }

        args.extend(self.extra_bootstrap_args.iter().cloned());

        let user = self.worker.user().username.clone();
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let cmd = Command::as_user(&user, "", "juju", &arg_refs);

        self.worker
            .run_with_retries(&cmd, BOOTSTRAP_RETRY_BOUND)
            .with_context(|| format!("failed to bootstrap controller '{controller}'"))?;

        let add_model =
            Command::as_user(&user, "", "juju", &["add-model", "-c", controller.as_str(), "testing"]);
        self.worker
            .run(&add_model)
            .with_context(|| format!("failed to add testing model to '{controller}'"))?;

        log::info!("Bootstrapped Juju controller: {controller}");
        Ok(())
    }

    fn kill_controller(&self, provider: &dyn Provider) -> Result<()> {
        let controller = Self::controller_name(provider);
        if !self.controller_exists(&controller) {
            log::debug!("Controller '{controller}' not found, nothing to destroy");
            return Ok(());
        }

        self.worker.print(&format!("Destroying Juju controller '{controller}'"));

        let user = self.worker.user().username.clone();
        let cmd = Command::as_user(
            &user,
            "",
            "juju",
            &["kill-controller", "--verbose", "--no-prompt", controller.as_str()],
        );
        self.worker
            .run(&cmd)
            .with_context(|| format!("failed to destroy controller '{controller}'"))?;
        Ok(())
    }
}

impl Action for Juju {
    fn name(&self) -> String {
        "juju".to_string()
    }

    fn prepare(&self) -> Result<()> {
        SnapHandler::new(self.worker.clone(), self.snaps.clone())
            .prepare()
            .context("failed to install Juju")?;

        mk_home_subdirectory(self.worker.as_ref(), Path::new(JUJU_DATA_DIR))
            .context("failed to create Juju data directory")?;

        self.write_credentials()?;

        for provider in &self.providers {
            if provider.bootstrap() {
                self.bootstrap_provider(provider.as_ref())?;
            }
        }
        Ok(())
    }

    fn restore(&self) -> Result<()> {
        for provider in &self.providers {
            if provider.bootstrap() {
                self.kill_controller(provider.as_ref())?;
            }
        }

        SnapHandler::new(self.worker.clone(), self.snaps.clone()).restore()?;

        let juju_dir = self.worker.user().home_dir.join(JUJU_DATA_DIR);
        self.worker
            .remove_path(&juju_dir)
            .context("failed to remove Juju data directory")?;
        Ok(())
    }
}
