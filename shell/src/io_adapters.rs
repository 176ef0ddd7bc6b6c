//! Redirection plumbing shared by in-process builtins and forked stages.

use crate::command::Command;
use anyhow::{Context, Result};
use nix::unistd::dup2;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

pub(crate) const STDIN_FD: RawFd = 0;
pub(crate) const STDOUT_FD: RawFd = 1;

const REDIRECT_MODE: u32 = 0o666;

/// `<path`: read only.
pub(crate) fn open_input(path: &str) -> Result<File> {
    File::open(path).with_context(|| format!("can't open {} for reading", path))
}

/// `>path` truncates, `>>path` appends; both create the file if needed.
pub(crate) fn open_output(path: &str, append: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).mode(REDIRECT_MODE);
    if append {
        options.append(true);
    } else {
        options.truncate(true);
    }
    options
        .open(path)
        .with_context(|| format!("can't open {} for writing", path))
}

/// Point descriptors 0 and 1 of the current process at the stage's files.
///
/// Used in forked children after pipe wiring, so a file always wins over
/// the pipe for the stream it names.
pub(crate) fn redirect_stdio(command: &Command) -> Result<()> {
    if let Some(path) = command.input_redirect() {
        let file = open_input(path)?;
        dup2(file.as_raw_fd(), STDIN_FD).context("dup2 stdin")?;
    }
    if let Some((path, append)) = command.output_redirect() {
        let file = open_output(path, append)?;
        dup2(file.as_raw_fd(), STDOUT_FD).context("dup2 stdout")?;
    }
    Ok(())
}

/// Descriptor 0 without std's read-ahead buffer, so bytes a builtin or the
/// line reader doesn't consume stay available to the next reader.
pub(crate) fn raw_stdin() -> Result<File> {
    let fd = io::stdin()
        .as_fd()
        .try_clone_to_owned()
        .context("can't duplicate stdin")?;
    Ok(File::from(fd))
}

/// Standard input of an in-process builtin.
pub(crate) fn builtin_input(command: &Command) -> Result<Box<dyn Read>> {
    Ok(match command.input_redirect() {
        Some(path) => Box::new(open_input(path)?),
        None => Box::new(raw_stdin()?),
    })
}

/// Standard output of an in-process builtin, when it is not feeding a pipe.
pub(crate) fn builtin_output(command: &Command) -> Result<Box<dyn Write>> {
    Ok(match command.output_redirect() {
        Some((path, append)) => Box::new(open_output(path, append)?),
        None => Box::new(io::stdout()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_path(tag: &str) -> String {
        let mut p = std::env::temp_dir();
        p.push(format!("io_adapters_{}_{}", tag, std::process::id()));
        p.to_string_lossy().to_string()
    }

    #[test]
    fn test_output_truncates_and_append_appends() {
        let path = temp_path("out");
        fs::write(&path, "old contents\n").unwrap();

        open_output(&path, false).unwrap().write_all(b"one\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\n");

        open_output(&path, true).unwrap().write_all(b"two\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let err = open_input("/definitely/not/here.txt").err().unwrap();
        assert!(err.to_string().contains("/definitely/not/here.txt"));
    }

    #[test]
    fn test_builtin_input_reads_redirect() {
        let path = temp_path("in");
        fs::write(&path, "from file\n").unwrap();

        let mut command = Command::named("uniq");
        command.redirect_in = Some(path.clone());
        let mut text = String::new();
        builtin_input(&command).unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "from file\n");

        let _ = fs::remove_file(path);
    }
}
