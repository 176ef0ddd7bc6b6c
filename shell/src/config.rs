use crate::env::Environment;
use tracing::warn;

/// Knobs the interpreter reads once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Shell name shown in the prompt and in error messages.
    pub sysname: String,
    /// Directory external programs are loaded from. Concatenated with the
    /// command name as is, so it must end with a separator.
    pub bin_dir: String,
    /// Size of the line buffer. Lines are cut at `line_capacity - 1` bytes.
    pub line_capacity: usize,
    /// Names that leave the shell.
    pub exit_synonyms: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sysname: "shellax".to_string(),
            bin_dir: "/usr/bin/".to_string(),
            line_capacity: 4096,
            exit_synonyms: vec!["exit".to_string(), "quit".to_string(), "q".to_string()],
        }
    }
}

impl Config {
    /// Defaults, overridden by `SHELLAX_BIN_DIR` and `SHELLAX_LINE_CAPACITY`.
    pub fn from_env(env: &Environment) -> Self {
        let mut config = Self::default();
        if let Some(dir) = env.get_var("SHELLAX_BIN_DIR").filter(|dir| !dir.is_empty()) {
            config.bin_dir = if dir.ends_with('/') { dir } else { format!("{dir}/") };
        }
        if let Some(raw) = env.get_var("SHELLAX_LINE_CAPACITY") {
            match raw.parse::<usize>() {
                Ok(capacity) if capacity >= 2 => config.line_capacity = capacity,
                _ => warn!("ignoring SHELLAX_LINE_CAPACITY={:?}", raw),
            }
        }
        config
    }

    pub fn is_exit_synonym(&self, name: &str) -> bool {
        self.exit_synonyms.iter().any(|synonym| synonym == name)
    }

    /// Where the program for `name` is expected to live. No PATH search.
    pub fn program_path(&self, name: &str) -> String {
        format!("{}{}", self.bin_dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn env_with(vars: &[(&str, &str)]) -> Environment {
        let mut env = Environment {
            vars: HashMap::new(),
            current_dir: PathBuf::from("/"),
        };
        for (k, v) in vars {
            env.set_var(*k, *v);
        }
        env
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.program_path("ls"), "/usr/bin/ls");
        assert!(config.is_exit_synonym("exit"));
        assert!(config.is_exit_synonym("quit"));
        assert!(config.is_exit_synonym("q"));
        assert!(!config.is_exit_synonym("logout"));
    }

    #[test]
    fn test_overrides_from_environment() {
        let env = env_with(&[("SHELLAX_BIN_DIR", "/bin"), ("SHELLAX_LINE_CAPACITY", "64")]);
        let config = Config::from_env(&env);
        assert_eq!(config.program_path("cat"), "/bin/cat");
        assert_eq!(config.line_capacity, 64);
    }

    #[test]
    fn test_invalid_capacity_is_ignored() {
        let env = env_with(&[("SHELLAX_LINE_CAPACITY", "lots")]);
        assert_eq!(Config::from_env(&env).line_capacity, 4096);
    }
}
