//! Builds and executes the staged action graph.
//!
//! The graph has a fixed shape: host packages, then enabled providers,
//! then controller bootstrap. Members of a stage run concurrently;
//! stages are barrier-synchronized.

use crate::config::Config;
use crate::juju::Juju;
use crate::packages::{Deb, DebHandler, SnapHandler};
use crate::providers::{Google, K8s, Lxd, MicroK8s, Provider};
use crate::system::{Snap, Worker};
use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use std::sync::Arc;

/// A unit of idempotent prepare/restore work.
pub trait Action: Send + Sync {
    fn name(&self) -> String;
    fn prepare(&self) -> Result<()>;
    fn restore(&self) -> Result<()>;
}

/// Which way the plan drives its actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Prepare,
    Restore,
}

/// An ordered sequence of barrier-synchronized stages.
pub struct Plan {
    stages: Vec<Vec<Arc<dyn Action>>>,
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field(
                "stages",
                &self
                    .stages
                    .iter()
                    .map(|stage| stage.iter().map(|a| a.name()).collect::<Vec<_>>())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Plan {
    /// Validate the configuration and build the stage graph. Fails
    /// before any host interaction on inconsistent configuration.
    pub fn new(config: &Config, worker: Arc<dyn Worker>) -> Result<Self> {
        validate(config)?;

        let mut stages: Vec<Vec<Arc<dyn Action>>> = Vec::new();

        let packages = host_packages(config, &worker);
        if !packages.is_empty() {
            stages.push(packages);
        }

        let providers = enabled_providers(config, &worker);
        if !providers.is_empty() {
            stages.push(providers.iter().map(|p| p.clone() as Arc<dyn Action>).collect());
        }

        if providers.iter().any(|p| p.bootstrap()) {
            stages.push(vec![Arc::new(Juju::new(worker, config, providers))]);
        }

        Ok(Self { stages })
    }

    /// Run every stage in order, members concurrently.
    ///
    /// A failing member does not cancel its running siblings; the stage
    /// finishes and the first error in declaration order surfaces. No
    /// rollback is attempted: restore is the designated cleanup.
    pub fn execute(&self, direction: Direction) -> Result<()> {
        for stage in &self.stages {
            let results: Vec<Result<()>> = stage
                .par_iter()
                .map(|action| {
                    log::debug!("Running action: {} ({direction:?})", action.name());
                    let result = match direction {
                        Direction::Prepare => action.prepare(),
                        Direction::Restore => action.restore(),
                    };
                    result.with_context(|| format!("action '{}' failed", action.name()))
                })
                .collect();

            for result in results {
                result?;
            }
        }
        Ok(())
    }
}

fn host_packages(config: &Config, worker: &Arc<dyn Worker>) -> Vec<Arc<dyn Action>> {
    let mut actions: Vec<Arc<dyn Action>> = Vec::new();

    let snaps: Vec<Snap> = config
        .host
        .snaps
        .iter()
        .map(|(name, conf)| {
            let conf = conf.clone().unwrap_or_default();
            let mut snap = Snap::new(name, &conf.channel);
            snap.connections = conf.connections;
            snap
        })
        .collect();
    if !snaps.is_empty() {
        actions.push(Arc::new(SnapHandler::new(worker.clone(), snaps)));
    }

    let debs: Vec<Deb> = config.host.packages.iter().map(|name| Deb::new(name)).collect();
    if !debs.is_empty() {
        actions.push(Arc::new(DebHandler::new(worker.clone(), debs)));
    }

    actions
}

fn enabled_providers(config: &Config, worker: &Arc<dyn Worker>) -> Vec<Arc<dyn Provider>> {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    if config.providers.lxd.enable {
        providers.push(Arc::new(Lxd::new(worker.clone(), config)));
    }
    if config.providers.microk8s.enable {
        providers.push(Arc::new(MicroK8s::new(worker.clone(), config)));
    }
    if config.providers.k8s.enable {
        providers.push(Arc::new(K8s::new(worker.clone(), config)));
    }
    if config.providers.google.enable {
        providers.push(Arc::new(Google::new(worker.clone(), config)));
    }

    providers
}

/// Static pre-flight checks; a failure here means no worker call was
/// made, so a malformed configuration mutates nothing.
fn validate(config: &Config) -> Result<()> {
    let blocks = [
        (
            "lxd",
            config.providers.lxd.enable,
            config.providers.lxd.bootstrap,
            &config.providers.lxd.model_defaults,
            &config.providers.lxd.bootstrap_constraints,
        ),
        (
            "microk8s",
            config.providers.microk8s.enable,
            config.providers.microk8s.bootstrap,
            &config.providers.microk8s.model_defaults,
            &config.providers.microk8s.bootstrap_constraints,
        ),
        (
            "k8s",
            config.providers.k8s.enable,
            config.providers.k8s.bootstrap,
            &config.providers.k8s.model_defaults,
            &config.providers.k8s.bootstrap_constraints,
        ),
        (
            "google",
            config.providers.google.enable,
            config.providers.google.bootstrap,
            &config.providers.google.model_defaults,
            &config.providers.google.bootstrap_constraints,
        ),
    ];

    for (name, enable, bootstrap, model_defaults, constraints) in blocks {
        if enable {
            continue;
        }
        if bootstrap {
            bail!("bootstrap requested for disabled provider '{name}'");
        }
        if !model_defaults.is_empty() || !constraints.is_empty() {
            bail!("model-defaults or bootstrap-constraints configured for disabled provider '{name}'");
        }
    }

    if config.providers.google.enable && config.providers.google.credentials_file.is_empty() {
        bail!("provider 'google' is enabled but no credentials-file is configured");
    }

    Ok(())
}
