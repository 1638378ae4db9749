//! The real worker: executes commands through a shell and performs
//! file/directory operations directly against the host.

use crate::system::command::Command;
use crate::system::error::{Error, Result};
use crate::system::retry::{self, RetryPolicy};
use crate::system::snap::SnapInfo;
use crate::system::{User, Worker, lookup_path, real_user, trace_message};
use std::collections::HashMap;
use std::ffi::CString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Bound on retries against the snapd API; socket answers are usually
/// immediate once the daemon is up.
const SNAPD_RETRY_BOUND: Duration = Duration::from_secs(60);

/// A worker that runs commands on the underlying system.
pub struct System {
    trace: bool,
    user: User,
    snapd: snapd::Client,
    // One mutex per executable name, created lazily, shared by every
    // action for the lifetime of the process.
    cmd_mutexes: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl System {
    /// Construct a new command system, resolving the real user.
    pub fn new(trace: bool) -> Result<Self> {
        Ok(Self {
            trace,
            user: real_user()?,
            snapd: snapd::Client::new(),
            cmd_mutexes: Mutex::new(HashMap::new()),
        })
    }

    #[cfg(test)]
    pub fn with_snapd_socket(trace: bool, socket: &Path) -> Result<Self> {
        Ok(Self {
            snapd: snapd::Client::with_socket(socket),
            ..Self::new(trace)?
        })
    }

    fn shell_path() -> Result<PathBuf> {
        lookup_path("bash")
            .or_else(|| lookup_path("sh"))
            .ok_or(Error::NoShell)
    }

    /// Store lookup with backoff; a definitive "not found" is terminal.
    fn store_snap(&self, name: &str) -> Result<snapd::Snap> {
        retry_snapd(|| self.snapd.find_one(name))
    }

    /// Reports whether the snap is installed and which channel it tracks.
    fn installed_info(&self, name: &str) -> (bool, String) {
        let result = retry_with_terminal_as_none(|| self.snapd.snap(name));

        match result {
            Ok(Some(snap)) if snap.status == snapd::STATUS_ACTIVE => {
                let tracking = if snap.tracking_channel.is_empty() {
                    snap.channel
                } else {
                    snap.tracking_channel
                };
                (true, tracking)
            }
            _ => (false, String::new()),
        }
    }

    /// Whether the tip of the requested channel uses classic confinement.
    fn snap_is_classic(&self, name: &str, channel: &str) -> Result<bool> {
        let snap = self.store_snap(name)?;

        match snap.channels.get(channel) {
            Some(info) => Ok(info.confinement == "classic"),
            None => Ok(snap.confinement == "classic"),
        }
    }
}

impl Worker for System {
    fn user(&self) -> &User {
        &self.user
    }

    fn run(&self, cmd: &Command) -> Result<String> {
        let shell = Self::shell_path()?;
        let line = cmd.command_string();

        if cmd.user.is_empty() {
            log::debug!("Starting command: {line}");
        } else {
            log::debug!("Starting command as user '{}': {line}", cmd.user);
        }

        let start = Instant::now();
        let output = std::process::Command::new(shell)
            .arg("-c")
            .arg(&line)
            .output()
            .map_err(|err| Error::CommandFailed {
                command: line.clone(),
                output: err.to_string(),
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        log::debug!("Finished command: {line} (elapsed {:?})", start.elapsed());

        if self.trace || !output.status.success() {
            eprint!("{}", trace_message(&line, &combined));
        }

        if output.status.success() {
            Ok(combined)
        } else {
            Err(Error::CommandFailed {
                command: line,
                output: combined,
            })
        }
    }

    fn run_with_retries(&self, cmd: &Command, max_elapsed: Duration) -> Result<String> {
        retry::retry_with_backoff(RetryPolicy::with_max_elapsed(max_elapsed), || self.run(cmd))
    }

    fn run_exclusive(&self, cmd: &Command) -> Result<String> {
        let mtx = {
            let mut table = self.cmd_mutexes.lock().unwrap();
            table.entry(cmd.executable.clone()).or_default().clone()
        };

        let _guard = mtx.lock().unwrap();
        self.run(cmd)
    }

    fn read_file(&self, path: &Path) -> Result<String> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.display().to_string()));
        }
        fs::read_to_string(path).map_err(|source| Error::Fs {
            message: format!("failed to read file '{}'", path.display()),
            source,
        })
    }

    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()> {
        fs::write(path, contents).map_err(|source| Error::Fs {
            message: format!("failed to write file '{}'", path.display()),
            source,
        })?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| Error::Fs {
            message: format!("failed to set permissions on '{}'", path.display()),
            source,
        })
    }

    fn remove_path(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        result.map_err(|source| Error::Fs {
            message: format!("failed to remove path '{}'", path.display()),
            source,
        })
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()> {
        fs::create_dir_all(path).map_err(|source| Error::Fs {
            message: format!("failed to create directory '{}'", path.display()),
            source,
        })?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| Error::Fs {
            message: format!("failed to set permissions on '{}'", path.display()),
            source,
        })
    }

    fn chown_recursive(&self, path: &Path, user: &User) -> Result<()> {
        for entry in walkdir::WalkDir::new(path) {
            let entry = entry.map_err(|err| Error::Fs {
                message: format!("failed to walk '{}'", path.display()),
                source: err.into(),
            })?;
            lchown(entry.path(), user.uid, user.gid)?;
        }

        log::debug!(
            "Filesystem ownership changed: path '{}' now owned by '{}'",
            path.display(),
            user.username
        );
        Ok(())
    }

    fn snap_info(&self, name: &str, channel: &str) -> Result<SnapInfo> {
        let classic = self.snap_is_classic(name, channel)?;
        let (installed, tracking_channel) = self.installed_info(name);

        log::debug!(
            "Queried snapd API: snap '{name}' installed={installed} classic={classic} tracking='{tracking_channel}'"
        );

        Ok(SnapInfo {
            installed,
            classic,
            tracking_channel,
        })
    }

    fn snap_channels(&self, name: &str) -> Result<Vec<String>> {
        // No socket means no snapd to ask; fail fast instead of
        // retrying so channel discovery can fall back immediately.
        let socket = self.snapd.socket_path();
        if !socket.exists() {
            return Err(Error::Snapd(snapd::Error::Socket(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no snapd socket at '{}'", socket.display()),
            ))));
        }

        let snap = self.store_snap(name)?;

        let mut channels: Vec<String> = snap.channels.into_keys().collect();
        channels.sort();
        channels.reverse();

        Ok(channels)
    }
}

fn lchown(path: &Path, uid: u32, gid: u32) -> Result<()> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        Error::InvalidPath(format!("path contains NUL byte: '{}'", path.display()))
    })?;

    // lchown, not chown: symlink targets may live outside the tree.
    let rc = unsafe { libc::lchown(c_path.as_ptr(), uid, gid) };
    if rc == 0 {
        Ok(())
    } else {
        Err(Error::Fs {
            message: format!("failed to change ownership of '{}'", path.display()),
            source: std::io::Error::last_os_error(),
        })
    }
}

fn retry_snapd(op: impl Fn() -> snapd::Result<snapd::Snap>) -> Result<snapd::Snap> {
    retry::retry_with_backoff(RetryPolicy::with_max_elapsed(SNAPD_RETRY_BOUND), || {
        op().map_err(Error::from)
    })
}

/// Retry a snapd query, folding terminal "no such snap" answers into
/// `None` instead of an error.
fn retry_with_terminal_as_none(
    op: impl Fn() -> snapd::Result<snapd::Snap>,
) -> Result<Option<snapd::Snap>> {
    retry::retry_with_backoff(RetryPolicy::with_max_elapsed(SNAPD_RETRY_BOUND), || {
        match op() {
            Ok(snap) => Ok(Some(snap)),
            Err(err) if err.is_terminal() => Ok(None),
            Err(err) => Err(Error::from(err)),
        }
    })
}
