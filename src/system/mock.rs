//! A recording test double for [`Worker`], keyed by the exact rendered
//! command line.

use crate::system::command::Command;
use crate::system::error::{Error, Result};
use crate::system::snap::SnapInfo;
use crate::system::{User, Worker};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Canned result for a rendered command line.
#[derive(Debug, Clone)]
enum MockReturn {
    Success(String),
    Failure(String),
    MissingExecutable,
}

/// Start/finish markers for one executed command, for concurrency
/// assertions.
#[derive(Debug, Clone)]
pub struct CommandEvent {
    pub line: String,
    pub started: Instant,
    pub finished: Instant,
}

/// Everything the mock recorded and everything registered on it.
#[derive(Debug, Default)]
pub struct MockState {
    pub executed_commands: Vec<String>,
    pub command_events: Vec<CommandEvent>,
    pub created_files: HashMap<PathBuf, String>,
    pub created_dirs: Vec<PathBuf>,
    pub removed_paths: Vec<PathBuf>,
    pub printed: Vec<String>,

    mock_returns: HashMap<String, MockReturn>,
    mock_files: HashMap<PathBuf, String>,
    mock_snap_info: HashMap<String, SnapInfo>,
    mock_snap_channels: HashMap<String, Vec<String>>,
    delays: HashMap<String, Duration>,
}

impl Default for MockWorker {
    fn default() -> Self {
        Self::new()
    }
}

/// A worker that emulates running commands, recording every invocation
/// in call order.
pub struct MockWorker {
    user: User,
    state: Mutex<MockState>,
}

impl MockWorker {
    pub fn new() -> Self {
        Self {
            user: User {
                username: "test-user".to_string(),
                uid: 666,
                gid: 666,
                home_dir: std::env::temp_dir(),
            },
            state: Mutex::new(MockState::default()),
        }
    }

    /// Register a canned return for the exact rendered command line.
    /// Unregistered commands succeed with empty output.
    pub fn mock_command(&self, line: &str, output: &str, ok: bool) {
        let ret = if ok {
            MockReturn::Success(output.to_string())
        } else {
            MockReturn::Failure(output.to_string())
        };
        self.state
            .lock()
            .unwrap()
            .mock_returns
            .insert(line.to_string(), ret);
    }

    /// Make the exact rendered command line report its executable as
    /// absent from the host, the way the dry-run worker does for
    /// read-only probes of uninstalled tools.
    pub fn mock_missing_command(&self, line: &str) {
        self.state
            .lock()
            .unwrap()
            .mock_returns
            .insert(line.to_string(), MockReturn::MissingExecutable);
    }

    /// Register canned contents for a file path; reads of unregistered
    /// paths fail.
    pub fn mock_file(&self, path: &Path, contents: &str) {
        self.state
            .lock()
            .unwrap()
            .mock_files
            .insert(path.to_path_buf(), contents.to_string());
    }

    pub fn mock_snap_info(&self, name: &str, info: SnapInfo) {
        self.state
            .lock()
            .unwrap()
            .mock_snap_info
            .insert(name.to_string(), info);
    }

    pub fn mock_snap_channels(&self, name: &str, channels: &[&str]) {
        self.state.lock().unwrap().mock_snap_channels.insert(
            name.to_string(),
            channels.iter().map(ToString::to_string).collect(),
        );
    }

    /// Make every execution of the given program take at least `delay`,
    /// so tests can observe overlap and ordering.
    pub fn delay_executable(&self, executable: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .delays
            .insert(executable.to_string(), delay);
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

impl Worker for MockWorker {
    fn user(&self) -> &User {
        &self.user
    }

    fn run(&self, cmd: &Command) -> Result<String> {
        let line = cmd.command_string();
        let started = Instant::now();

        let (ret, delay) = {
            let mut state = self.state.lock().unwrap();
            state.executed_commands.push(line.clone());
            (
                state.mock_returns.get(&line).cloned(),
                state.delays.get(&cmd.executable).copied(),
            )
        };

        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let result = match ret {
            Some(MockReturn::Success(output)) => Ok(output),
            Some(MockReturn::Failure(output)) => Err(Error::CommandFailed {
                command: line.clone(),
                output,
            }),
            Some(MockReturn::MissingExecutable) => {
                Err(Error::NotInstalled(cmd.executable.clone()))
            }
            None => Ok(String::new()),
        };

        self.state.lock().unwrap().command_events.push(CommandEvent {
            line,
            started,
            finished: Instant::now(),
        });

        result
    }

    fn run_with_retries(&self, cmd: &Command, _max_elapsed: Duration) -> Result<String> {
        self.run(cmd)
    }

    fn run_exclusive(&self, cmd: &Command) -> Result<String> {
        self.run(cmd)
    }

    fn read_file(&self, path: &Path) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .mock_files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::FileNotFound(path.display().to_string()))
    }

    fn write_file(&self, path: &Path, contents: &str, _mode: u32) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .created_files
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn remove_path(&self, path: &Path) -> Result<()> {
        self.state.lock().unwrap().removed_paths.push(path.to_path_buf());
        Ok(())
    }

    fn mkdir_all(&self, path: &Path, _mode: u32) -> Result<()> {
        self.state.lock().unwrap().created_dirs.push(path.to_path_buf());
        Ok(())
    }

    fn chown_recursive(&self, _path: &Path, _user: &User) -> Result<()> {
        Ok(())
    }

    fn snap_info(&self, name: &str, _channel: &str) -> Result<SnapInfo> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .mock_snap_info
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    fn snap_channels(&self, name: &str) -> Result<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .mock_snap_channels
            .get(name)
            .cloned()
            .ok_or_else(|| Error::SnapNotFound(name.to_string()))
    }

    fn print(&self, message: &str) {
        self.state.lock().unwrap().printed.push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_commands_in_call_order() {
        let mock = MockWorker::new();
        mock.run(&Command::new("snap", &["install", "juju"])).unwrap();
        mock.run(&Command::new("snap", &["refresh", "juju"])).unwrap();

        assert_eq!(
            mock.state().executed_commands,
            vec!["snap install juju".to_string(), "snap refresh juju".to_string()]
        );
    }

    #[test]
    fn canned_failure_carries_output() {
        let mock = MockWorker::new();
        mock.mock_command("k8s status", "Error: not part of a cluster", false);

        let err = mock.run(&Command::new("k8s", &["status"])).unwrap_err();
        assert_eq!(err.command_output(), Some("Error: not part of a cluster"));
    }

    #[test]
    fn canned_missing_executable() {
        let mock = MockWorker::new();
        mock.mock_missing_command("k8s status");

        let err = mock.run(&Command::new("k8s", &["status"]).read_only()).unwrap_err();
        assert!(matches!(err, Error::NotInstalled(tool) if tool == "k8s"));
    }

    #[test]
    fn unregistered_file_reads_fail() {
        let mock = MockWorker::new();
        assert!(matches!(
            mock.read_file(Path::new("/nope")),
            Err(Error::FileNotFound(_))
        ));
    }
}
