//! Dry-run shadow worker: reports every host mutation that would be
//! performed without executing it, while delegating pure reads to a
//! wrapped real worker so live-state-dependent decisions stay accurate.

use crate::system::command::Command;
use crate::system::error::{Error, Result};
use crate::system::snap::SnapInfo;
use crate::system::{User, Worker, lookup_path};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A worker that prints what would be done instead of doing it.
pub struct DryRunWorker {
    real: Arc<dyn Worker>,
    out: Mutex<Box<dyn Write + Send>>,
}

impl DryRunWorker {
    /// Wrap a real worker; intended actions are written to stdout.
    pub fn new(real: Arc<dyn Worker>) -> Self {
        Self::with_output(real, Box::new(std::io::stdout()))
    }

    /// Wrap a real worker with a custom output sink (used by tests).
    pub fn with_output(real: Arc<dyn Worker>, out: Box<dyn Write + Send>) -> Self {
        Self {
            real,
            out: Mutex::new(out),
        }
    }

    fn emit(&self, line: &str) {
        let mut out = self.out.lock().unwrap();
        let _ = writeln!(out, "{line}");
    }

    /// Delegate a read-only command to the real worker, but only when
    /// its executable can actually be located; a dry run on a machine
    /// missing the tool reports a distinguished condition instead of
    /// crashing.
    fn run_read_only(&self, cmd: &Command) -> Result<String> {
        if lookup_path(&cmd.executable).is_none() {
            return Err(Error::NotInstalled(cmd.executable.clone()));
        }
        self.real.run(cmd)
    }
}

impl Worker for DryRunWorker {
    fn user(&self) -> &User {
        self.real.user()
    }

    fn run(&self, cmd: &Command) -> Result<String> {
        if cmd.read_only {
            return self.run_read_only(cmd);
        }

        self.emit(&cmd.command_string());
        Ok(String::new())
    }

    // A dry run never sleeps: retry-wrapped operations behave as a
    // single always-optimistic attempt.
    fn run_with_retries(&self, cmd: &Command, _max_elapsed: Duration) -> Result<String> {
        self.run(cmd)
    }

    // A dry run never acquires the exclusion mutex.
    fn run_exclusive(&self, cmd: &Command) -> Result<String> {
        self.run(cmd)
    }

    fn read_file(&self, path: &Path) -> Result<String> {
        self.real.read_file(path)
    }

    fn write_file(&self, path: &Path, _contents: &str, _mode: u32) -> Result<()> {
        self.emit(&format!("# Write file: {}", path.display()));
        Ok(())
    }

    fn remove_path(&self, path: &Path) -> Result<()> {
        self.emit(&format!("rm -rf {}", path.display()));
        Ok(())
    }

    fn mkdir_all(&self, path: &Path, _mode: u32) -> Result<()> {
        self.emit(&format!("mkdir -p {}", path.display()));
        Ok(())
    }

    fn chown_recursive(&self, path: &Path, user: &User) -> Result<()> {
        self.emit(&format!("chown -R {}:{} {}", user.uid, user.gid, path.display()));
        Ok(())
    }

    fn snap_info(&self, name: &str, channel: &str) -> Result<SnapInfo> {
        self.real.snap_info(name, channel)
    }

    fn snap_channels(&self, name: &str) -> Result<Vec<String>> {
        self.real.snap_channels(name)
    }

    fn print(&self, message: &str) {
        self.emit(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::mock::MockWorker;

    struct SharedBuf(Arc<Mutex<String>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().push_str(&String::from_utf8_lossy(buf));
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn worker_with_buffer(real: Arc<MockWorker>) -> (DryRunWorker, Arc<Mutex<String>>) {
        let buf = Arc::new(Mutex::new(String::new()));
        let worker = DryRunWorker::with_output(real, Box::new(SharedBuf(buf.clone())));
        (worker, buf)
    }

    #[test]
    fn mutating_commands_are_printed_not_executed() {
        let real = Arc::new(MockWorker::new());
        let (dry, buf) = worker_with_buffer(real.clone());

        let cmd = Command::new("echo", &["hello", "world"]);
        let output = dry.run(&cmd).unwrap();

        assert!(output.is_empty());
        assert_eq!(*buf.lock().unwrap(), "echo hello world\n");
        assert!(real.state().executed_commands.is_empty());
    }

    #[test]
    fn retry_and_exclusive_are_single_printed_attempts() {
        let real = Arc::new(MockWorker::new());
        let (dry, buf) = worker_with_buffer(real.clone());
        let cmd = Command::new("echo", &["hello"]);

        dry.run_with_retries(&cmd, Duration::from_secs(300)).unwrap();
        dry.run_exclusive(&cmd).unwrap();
        dry.run_many(&[cmd.clone(), cmd]).unwrap();

        assert_eq!(
            *buf.lock().unwrap(),
            "echo hello\necho hello\necho hello\necho hello\n"
        );
        assert!(real.state().executed_commands.is_empty());
    }

    #[test]
    fn file_operations_are_printed_not_performed() {
        let real = Arc::new(MockWorker::new());
        let (dry, buf) = worker_with_buffer(real.clone());

        dry.write_file(Path::new("/test/path"), "contents", 0o644).unwrap();
        dry.mkdir_all(Path::new("/test/dir"), 0o755).unwrap();
        dry.remove_path(Path::new("/test/dir")).unwrap();
        let user = real.user().clone();
        dry.chown_recursive(Path::new("/test/path"), &user).unwrap();

        let expected = format!(
            "# Write file: /test/path\nmkdir -p /test/dir\nrm -rf /test/dir\nchown -R {}:{} /test/path\n",
            user.uid, user.gid
        );
        assert_eq!(*buf.lock().unwrap(), expected);

        let state = real.state();
        assert!(state.created_files.is_empty());
        assert!(state.created_dirs.is_empty());
        assert!(state.removed_paths.is_empty());
    }

    #[test]
    fn read_only_commands_delegate_to_real_worker() {
        let real = Arc::new(MockWorker::new());
        // `sh` exists on any machine running the tests, so the dry-run
        // lookup succeeds and the mock sees exactly one invocation.
        real.mock_command("sh -c true", "ok\n", true);
        let (dry, buf) = worker_with_buffer(real.clone());

        let cmd = Command::new("sh", &["-c", "true"]).read_only();
        let output = dry.run(&cmd).unwrap();

        assert_eq!(output, "ok\n");
        assert!(buf.lock().unwrap().is_empty());
        assert_eq!(real.state().executed_commands, vec!["sh -c true".to_string()]);
    }

    #[test]
    fn read_only_command_for_missing_tool_is_not_installed() {
        let real = Arc::new(MockWorker::new());
        let (dry, buf) = worker_with_buffer(real.clone());

        let cmd = Command::new("definitely-not-a-real-binary-xyz", &["status"]).read_only();
        let err = dry.run(&cmd).unwrap_err();

        assert!(matches!(err, Error::NotInstalled(_)));
        assert!(buf.lock().unwrap().is_empty());
        assert!(real.state().executed_commands.is_empty());
    }

    #[test]
    fn reads_delegate_unchanged() {
        let real = Arc::new(MockWorker::new());
        real.mock_file(Path::new("/etc/hostname"), "machine\n");
        real.mock_snap_info("juju", SnapInfo {
            installed: true,
            classic: true,
            tracking_channel: "3.6/stable".into(),
        });
        real.mock_snap_channels("juju", &["3.6/stable", "3.6/beta"]);

        let (dry, _) = worker_with_buffer(real.clone());

        assert_eq!(dry.read_file(Path::new("/etc/hostname")).unwrap(), "machine\n");
        assert!(dry.snap_info("juju", "3.6/stable").unwrap().installed);
        assert_eq!(dry.snap_channels("juju").unwrap().len(), 2);
        assert_eq!(dry.user().username, real.user().username);
    }
}
