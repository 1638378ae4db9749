//! The resolved configuration document.
//!
//! One YAML file describes everything a run should do: host packages,
//! provider setup and the Juju controller. The same document, persisted
//! verbatim as a snapshot during `prepare`, is what `restore` replays.

use crate::system::Snap;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Fully resolved configuration for a prepare/restore run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Report intended changes without touching the host.
    pub dry_run: bool,
    /// Enable verbose logging.
    pub verbose: bool,
    /// Print every executed command and its output.
    pub trace: bool,

    pub juju: JujuConfig,
    pub providers: ProviderConfigs,
    pub host: HostConfig,
}

/// Controller bootstrap settings shared by all providers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct JujuConfig {
    /// Channel to install the juju snap from.
    pub channel: String,
    /// Model defaults applied to every bootstrapped controller.
    pub model_defaults: BTreeMap<String, String>,
    /// Bootstrap constraints applied to every bootstrapped controller.
    pub bootstrap_constraints: BTreeMap<String, String>,
    /// Extra whitespace-separated arguments appended to `juju bootstrap`.
    pub extra_bootstrap_args: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProviderConfigs {
    pub lxd: LxdConfig,
    pub microk8s: MicroK8sConfig,
    pub k8s: K8sConfig,
    pub google: GoogleConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LxdConfig {
    pub enable: bool,
    pub bootstrap: bool,
    pub channel: String,
    pub model_defaults: BTreeMap<String, String>,
    pub bootstrap_constraints: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MicroK8sConfig {
    pub enable: bool,
    pub bootstrap: bool,
    pub channel: String,
    pub addons: Vec<String>,
    pub image_registry: ImageRegistryConfig,
    pub model_defaults: BTreeMap<String, String>,
    pub bootstrap_constraints: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct K8sConfig {
    pub enable: bool,
    pub bootstrap: bool,
    pub channel: String,
    /// Feature name to {key: value} settings, applied before the
    /// feature is enabled.
    pub features: BTreeMap<String, BTreeMap<String, String>>,
    pub image_registry: ImageRegistryConfig,
    pub model_defaults: BTreeMap<String, String>,
    pub bootstrap_constraints: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GoogleConfig {
    pub enable: bool,
    pub bootstrap: bool,
    /// Path to the service-account credentials JSON file.
    pub credentials_file: String,
    pub model_defaults: BTreeMap<String, String>,
    pub bootstrap_constraints: BTreeMap<String, String>,
}

/// A containerd image-registry mirror for a cluster provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ImageRegistryConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Packages installed directly on the host, outside any provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HostConfig {
    /// Snap name to its (optional) per-snap settings. A bare key
    /// (`jq:`) deserializes to `None` and means "defaults".
    pub snaps: BTreeMap<String, Option<HostSnapConfig>>,
    /// Debian packages installed via apt.
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HostSnapConfig {
    pub channel: String,
    /// Interface connections set up after install.
    pub connections: Vec<String>,
}

impl Config {
    /// Load and parse the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))
    }

    /// Fold command-line extra packages into the host lists. Snaps use
    /// the shorthand form (`name` or `name/channel`). Extras become
    /// part of the persisted snapshot, so restore removes them too.
    pub fn add_host_extras(&mut self, extra_snaps: &[String], extra_debs: &[String]) {
        for shorthand in extra_snaps {
            let snap = Snap::from_shorthand(shorthand);
            let settings = (!snap.channel.is_empty()).then(|| HostSnapConfig {
                channel: snap.channel,
                connections: Vec::new(),
            });
            self.host.snaps.insert(snap.name, settings);
        }
        self.host.packages.extend(extra_debs.iter().cloned());
    }
}

/// Merge two maps; on key collision the value from `over` wins.
pub fn merge_maps(
    base: &BTreeMap<String, String>,
    over: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    merged.extend(over.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
