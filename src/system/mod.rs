//! Host command abstraction: the [`Worker`] trait and its real,
//! dry-run and mock implementations, plus retry/exclusion middleware.

pub mod command;
pub mod dryrun;
pub mod error;
pub mod retry;
pub mod runner;
pub mod snap;

#[cfg(test)]
pub mod mock;

pub use command::Command;
pub use dryrun::DryRunWorker;
pub use error::{Error, Result};
pub use retry::RetryPolicy;
pub use runner::System;
pub use snap::{Snap, SnapInfo};

use std::env;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Executes commands and file/directory operations against the host.
///
/// Implementations: [`System`] (real shell execution), [`DryRunWorker`]
/// (shadow decorator that prints intended mutations) and a recording
/// mock for tests.
pub trait Worker: Send + Sync {
    /// The "real" user commands act on behalf of, which differs from
    /// the current user when the tool is executed with `sudo`.
    fn user(&self) -> &User;

    /// Execute the command, returning its combined stdout/stderr.
    fn run(&self, cmd: &Command) -> Result<String>;

    /// Execute the command, retrying with exponential backoff starting
    /// at one second, up to the specified maximum elapsed duration.
    fn run_with_retries(&self, cmd: &Command, max_elapsed: Duration) -> Result<String>;

    /// Execute the command while holding a process-wide mutex keyed by
    /// the executable name, so at most one instance of that program
    /// runs at a time.
    fn run_exclusive(&self, cmd: &Command) -> Result<String>;

    /// Run commands in sequence, stopping at the first error.
    fn run_many(&self, commands: &[Command]) -> Result<()> {
        for cmd in commands {
            self.run(cmd)?;
        }
        Ok(())
    }

    /// Read the contents of a file.
    fn read_file(&self, path: &Path) -> Result<String>;

    /// Write contents to a file with the given permissions.
    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()>;

    /// Recursively remove a path from the filesystem.
    fn remove_path(&self, path: &Path) -> Result<()>;

    /// Create a directory and all parents with the given permissions.
    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()>;

    /// Recursively change ownership of a path to the specified user.
    fn chown_recursive(&self, path: &Path, user: &User) -> Result<()>;

    /// Information about a snap, looked up via the snapd API.
    fn snap_info(&self, name: &str, channel: &str) -> Result<SnapInfo>;

    /// The list of store channels available for a snap, newest first.
    fn snap_channels(&self, name: &str) -> Result<Vec<String>>;

    /// Emit a human-readable note about an intended action. A no-op in
    /// normal execution; the dry-run worker writes it to its sink.
    fn print(&self, _message: &str) {}
}

/// Details of the user the tool acts on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub home_dir: PathBuf,
}

/// Resolve the "real" user: the `SUDO_USER` when the tool was invoked
/// through `sudo`, otherwise the current user.
pub fn real_user() -> Result<User> {
    let mut user = match env::var("SUDO_USER") {
        Ok(name) if !name.is_empty() && name != "root" => user_by_name(&name)?,
        _ => user_by_uid(unsafe { libc::getuid() })?,
    };

    // Some minimal containers ship passwd entries without a home.
    if user.home_dir.as_os_str().is_empty() {
        if let Some(home) = dirs::home_dir() {
            user.home_dir = home;
        }
    }

    Ok(user)
}

fn user_by_name(name: &str) -> Result<User> {
    let c_name = CString::new(name).map_err(|_| Error::UserLookup(name.to_string()))?;
    let passwd = unsafe { libc::getpwnam(c_name.as_ptr()) };
    passwd_to_user(passwd).ok_or_else(|| Error::UserLookup(name.to_string()))
}

fn user_by_uid(uid: u32) -> Result<User> {
    let passwd = unsafe { libc::getpwuid(uid) };
    passwd_to_user(passwd).ok_or_else(|| Error::UserLookup(format!("uid {uid}")))
}

fn passwd_to_user(passwd: *mut libc::passwd) -> Option<User> {
    if passwd.is_null() {
        return None;
    }

    // The pointer comes straight from libc and is non-null here; the
    // strings are copied out before any other libc call can reuse the
    // static buffer.
    unsafe {
        let pw = &*passwd;
        let username = std::ffi::CStr::from_ptr(pw.pw_name).to_string_lossy().into_owned();
        let home_dir = std::ffi::CStr::from_ptr(pw.pw_dir).to_string_lossy().into_owned();
        Some(User {
            username,
            uid: pw.pw_uid,
            gid: pw.pw_gid,
            home_dir: PathBuf::from(home_dir),
        })
    }
}

/// Locate an executable on the current `PATH`.
pub fn lookup_path(executable: &str) -> Option<PathBuf> {
    let path = Path::new(executable);
    if path.is_absolute() {
        return is_executable(path).then(|| path.to_path_buf());
    }

    env::split_paths(&env::var_os("PATH")?)
        .map(|dir| dir.join(executable))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Read a file at a path relative to the real user's home directory.
pub fn read_home_dir_file(worker: &dyn Worker, rel_path: &Path) -> Result<String> {
    let home_path = worker.user().home_dir.join(rel_path);
    worker.read_file(&home_path)
}

/// Write contents to a path relative to the real user's home directory,
/// creating parent directories and adjusting ownership as needed.
pub fn write_home_dir_file(worker: &dyn Worker, rel_path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = rel_path.parent() {
        mk_home_subdirectory(worker, parent)?;
    }

    let abs_path = worker.user().home_dir.join(rel_path);
    worker.write_file(&abs_path, contents, 0o644)?;
    worker.chown_recursive(&abs_path, worker.user())
}

/// Create a directory (and parents) relative to the real user's home
/// directory, chowning the topmost created component to the user.
pub fn mk_home_subdirectory(worker: &dyn Worker, rel_path: &Path) -> Result<()> {
    if rel_path.is_absolute() {
        return Err(Error::InvalidPath(format!(
            "only relative paths supported, got '{}'",
            rel_path.display()
        )));
    }

    let user = worker.user().clone();
    let dir = user.home_dir.join(rel_path);
    worker.mkdir_all(&dir, 0o755)?;

    let top = rel_path
        .components()
        .next()
        .map_or_else(|| dir.clone(), |first| user.home_dir.join(first));
    worker.chown_recursive(&top, &user)
}

/// Render the diagnostic block emitted on command failure or when
/// trace mode is enabled.
pub fn trace_message(command: &str, output: &str) -> String {
    let output = output.trim_end();
    if output.is_empty() {
        format!("Command: {command}\n")
    } else {
        format!("Command: {command}\nOutput:\n{output}\n")
    }
}
