//! A single external-program invocation, with the identity it should
//! assume and whether it mutates host state.

/// A command to be executed on the host, along with the user and group
/// that should be assumed where required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub executable: String,
    pub args: Vec<String>,
    pub user: String,
    pub group: String,
    /// The command only reads system state and makes no changes. In
    /// dry-run mode read-only commands are executed for real so that
    /// conditional logic (e.g. "is this cluster already bootstrapped?")
    /// stays accurate.
    pub read_only: bool,
}

impl Command {
    /// A command run as the current (effective) user and group.
    pub fn new(executable: &str, args: &[&str]) -> Self {
        Self {
            executable: executable.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            user: String::new(),
            group: String::new(),
            read_only: false,
        }
    }

    /// A command run as the specified user/group. Running as `root` is
    /// a no-op privilege switch, so it collapses to [`Command::new`].
    pub fn as_user(user: &str, group: &str, executable: &str, args: &[&str]) -> Self {
        if user == "root" {
            return Self::new(executable, args);
        }

        Self {
            user: user.to_string(),
            group: group.to_string(),
            ..Self::new(executable, args)
        }
    }

    /// Mark the command as read-only (a declared, not enforced, contract).
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Render the command for execution in a shell, including the `sudo`
    /// prefix and its arguments where appropriate.
    pub fn command_string(&self) -> String {
        let mut words: Vec<&str> = Vec::with_capacity(self.args.len() + 6);

        if !self.user.is_empty() || !self.group.is_empty() {
            words.push("sudo");
        }
        if !self.user.is_empty() {
            words.push("-u");
            words.push(&self.user);
        }
        if !self.group.is_empty() {
            words.push("-g");
            words.push(&self.group);
        }

        words.push(&self.executable);
        words.extend(self.args.iter().map(String::as_str));

        words
            .iter()
            .map(|word| quote(word))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Quote a word for a POSIX shell. Plain words pass through untouched
/// so rendered commands stay copy-paste friendly.
fn quote(word: &str) -> String {
    if !word.is_empty() && word.chars().all(is_plain) {
        return word.to_string();
    }

    format!("'{}'", word.replace('\'', r"'\''"))
}

fn is_plain(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '%' | '+' | '=' | ':' | ',' | '.' | '/' | '-')
}
