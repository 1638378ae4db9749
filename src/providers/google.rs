//! The Google Cloud provider.
//!
//! Nothing is installed on the host; the provider validates the
//! configured service-account credentials and hands them to Juju.

use crate::config::Config;
use crate::plan::Action;
use crate::providers::Provider;
use crate::system::Worker;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub struct Google {
    credentials_file: String,
    bootstrap: bool,
    model_defaults: BTreeMap<String, String>,
    bootstrap_constraints: BTreeMap<String, String>,

    worker: Arc<dyn Worker>,
}

impl Google {
    pub fn new(worker: Arc<dyn Worker>, config: &Config) -> Self {
        let conf = &config.providers.google;
        Self {
            credentials_file: conf.credentials_file.clone(),
            bootstrap: conf.bootstrap,
            model_defaults: conf.model_defaults.clone(),
            bootstrap_constraints: conf.bootstrap_constraints.clone(),
            worker,
        }
    }
}

impl Action for Google {
    fn name(&self) -> String {
        "google".to_string()
    }

    fn prepare(&self) -> Result<()> {
        let contents = self
            .worker
            .read_file(Path::new(&self.credentials_file))
            .with_context(|| {
                format!("failed to read credentials file '{}'", self.credentials_file)
            })?;

        serde_json::from_str::<serde_json::Value>(&contents).with_context(|| {
            format!("credentials file '{}' is not valid JSON", self.credentials_file)
        })?;

        log::info!("Prepared provider: {}", self.name());
        Ok(())
    }

    // Nothing was installed, so nothing to reverse.
    fn restore(&self) -> Result<()> {
        log::info!("Removed provider: {}", self.name());
        Ok(())
    }
}

impl Provider for Google {
    fn bootstrap(&self) -> bool {
        self.bootstrap
    }

    fn cloud_name(&self) -> &str {
        "google"
    }

    fn credentials(&self) -> Option<serde_yaml::Value> {
        let account = BTreeMap::from([
            ("auth-type".to_string(), "jsonfile".to_string()),
            ("file".to_string(), self.credentials_file.clone()),
        ]);
        let by_name = BTreeMap::from([("valet".to_string(), account)]);
        serde_yaml::to_value(by_name).ok()
    }

    fn model_defaults(&self) -> &BTreeMap<String, String> {
        &self.model_defaults
    }

    fn bootstrap_constraints(&self) -> &BTreeMap<String, String> {
        &self.bootstrap_constraints
    }
}
