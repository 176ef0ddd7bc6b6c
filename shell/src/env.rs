use std::collections::HashMap;
use std::env as stdenv;
use std::path::PathBuf;

/// User-level view of the process environment used by the interpreter.
///
/// The environment contains:
/// - `vars`: a snapshot of the environment variables the shell started with.
/// - `current_dir`: the working directory shown in the prompt and changed by `cd`.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Key-value store of environment variables (e.g., USER, HOME).
    pub vars: HashMap<String, String>,
    /// The current working directory.
    pub current_dir: PathBuf,
}

impl Environment {
    /// Capture the current process state into a new `Environment` instance.
    pub fn new() -> Self {
        let vars = stdenv::vars().collect();
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self { vars, current_dir }
    }

    /// Get the value of an environment variable.
    ///
    /// Looks up the key in `self.vars` first, falling back to `std::env::var`.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
    }

    /// Set or override an environment variable in `self.vars`.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// Render the prompt: `user@host:cwd sysname$ `.
    ///
    /// A missing `USER` variable or an unreadable host name leaves that
    /// segment empty.
    pub fn prompt(&self, sysname: &str) -> String {
        let user = self.get_var("USER").unwrap_or_default();
        let host = nix::unistd::gethostname()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!(
            "{}@{}:{} {}$ ",
            user,
            host,
            self.current_dir.display(),
            sysname
        )
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
