//! Ties configuration, snapshot and plan together.
//!
//! `prepare` persists the resolved configuration before anything else
//! runs, so `restore` always reverses what prepare actually attempted,
//! not whatever the configuration sources look like later.

use crate::config::Config;
use crate::plan::{Direction, Plan};
use crate::system::{
    read_home_dir_file, write_home_dir_file, DryRunWorker, System, Worker,
};
use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::sync::Arc;

/// Snapshot location, relative to the real user's home directory.
const SNAPSHOT_PATH: &str = ".cache/valet/snapshot.yaml";

pub struct Manager {
    worker: Arc<dyn Worker>,
}

impl Manager {
    pub fn new(dry_run: bool, trace: bool) -> Result<Self> {
        let system: Arc<dyn Worker> = Arc::new(System::new(trace)?);
        let worker: Arc<dyn Worker> = if dry_run {
            Arc::new(DryRunWorker::new(system))
        } else {
            system
        };
        Ok(Self { worker })
    }

    #[cfg(test)]
    pub fn with_worker(worker: Arc<dyn Worker>) -> Self {
        Self { worker }
    }

    /// Persist the configuration snapshot, then build and run the
    /// prepare plan.
    pub fn prepare(&self, config: &Config) -> Result<()> {
        let snapshot =
            serde_yaml::to_string(config).context("failed to serialize configuration snapshot")?;
        write_home_dir_file(self.worker.as_ref(), Path::new(SNAPSHOT_PATH), &snapshot)
            .context("failed to persist configuration snapshot")?;

        let plan = Plan::new(config, self.worker.clone())?;
        plan.execute(Direction::Prepare)?;

        log::info!("Machine prepared");
        Ok(())
    }

    /// Load the snapshot from the previous prepare, overlay the runtime
    /// flags of this invocation, and run the identical plan in reverse.
    pub fn restore(&self, dry_run: bool, verbose: bool, trace: bool) -> Result<()> {
        let contents = read_home_dir_file(self.worker.as_ref(), Path::new(SNAPSHOT_PATH))
            .map_err(|err| {
                anyhow!(err).context(format!(
                    "no configuration snapshot at '~/{SNAPSHOT_PATH}'; run 'valet prepare' first"
                ))
            })?;

        let mut config: Config =
            serde_yaml::from_str(&contents).context("failed to parse configuration snapshot")?;
        config.dry_run = dry_run;
        config.verbose = verbose;
        config.trace = trace;

        let plan = Plan::new(&config, self.worker.clone())?;
        plan.execute(Direction::Restore)?;

        log::info!("Machine restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::mock::MockWorker;

    #[test]
    fn prepare_writes_the_snapshot_before_any_action() {
        let mut config = Config::default();
        config.providers.lxd.enable = true;

        let worker = Arc::new(MockWorker::new());
        let manager = Manager::with_worker(worker.clone());
        manager.prepare(&config).unwrap();

        let home = worker.user().home_dir.clone();
        let state = worker.state();
        let snapshot = &state.created_files[&home.join(SNAPSHOT_PATH)];

        let reloaded: Config = serde_yaml::from_str(snapshot).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn snapshot_persists_even_when_the_plan_is_invalid() {
        let mut config = Config::default();
        config.providers.k8s.bootstrap = true; // disabled provider

        let worker = Arc::new(MockWorker::new());
        let manager = Manager::with_worker(worker.clone());
        assert!(manager.prepare(&config).is_err());

        let home = worker.user().home_dir.clone();
        assert!(worker.state().created_files.contains_key(&home.join(SNAPSHOT_PATH)));
        assert!(worker.state().executed_commands.is_empty());
    }

    #[test]
    fn restore_replays_the_snapshot() {
        let mut config = Config::default();
        config.providers.lxd.enable = true;
        config.host.snaps.insert("jq".to_string(), None);

        let worker = Arc::new(MockWorker::new());
        let home = worker.user().home_dir.clone();
        worker.mock_file(
            &home.join(SNAPSHOT_PATH),
            &serde_yaml::to_string(&config).unwrap(),
        );

        let manager = Manager::with_worker(worker.clone());
        manager.restore(false, false, false).unwrap();

        assert_eq!(
            worker.state().executed_commands,
            vec![
                "snap remove jq --purge".to_string(),
                "snap remove lxd --purge".to_string(),
            ]
        );
    }

    #[test]
    fn restore_without_snapshot_names_the_path() {
        let worker = Arc::new(MockWorker::new());
        let manager = Manager::with_worker(worker);

        let err = manager.restore(false, false, false).unwrap_err();
        assert!(err.to_string().contains(SNAPSHOT_PATH));
    }
}
