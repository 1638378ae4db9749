//! Provider setup: each provider drives an idempotent chain from
//! "not installed" to "ready for testing", and can reverse it.

mod google;
mod k8s;
mod lxd;
mod microk8s;
mod registry;

pub use google::Google;
pub use k8s::K8s;
pub use lxd::Lxd;
pub use microk8s::MicroK8s;
pub use registry::hosts_toml;

use crate::plan::Action;
use std::collections::BTreeMap;

/// A backend environment offering test infrastructure, plus the
/// details Juju needs to bootstrap a controller onto it.
pub trait Provider: Action {
    /// Whether a Juju controller should be bootstrapped onto the
    /// provider.
    fn bootstrap(&self) -> bool;

    /// The name of the provider as Juju sees it.
    fn cloud_name(&self) -> &str;

    /// The POSIX group granting non-root access to the provider, if
    /// there is one.
    fn group_name(&self) -> String {
        String::new()
    }

    /// The per-cloud section of Juju's credentials.yaml, for providers
    /// that require credentials.
    fn credentials(&self) -> Option<serde_yaml::Value> {
        None
    }

    /// Juju model-defaults specific to this provider.
    fn model_defaults(&self) -> &BTreeMap<String, String>;

    /// Juju bootstrap-constraints specific to this provider.
    fn bootstrap_constraints(&self) -> &BTreeMap<String, String>;
}

/// Outcome of probing a cluster tool's status output.
///
/// The probe parses human-readable CLI output, so anything it does not
/// positively recognize is `Unknown` and must never trigger a
/// bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStatus {
    /// The node is already part of a cluster.
    Ready,
    /// The tool reported the node is not part of a cluster yet.
    NotInitialized,
    /// Status could not be determined (tool missing, unrecognized
    /// output).
    Unknown,
}
