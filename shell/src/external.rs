use crate::command::{Command, ExitCode};
use crate::config::Config;
use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::wait::WaitStatus;
use nix::unistd::execv;
use std::ffi::CString;

/// A program image ready to replace the current process.
///
/// Built in the parent before forking so the child only has to call `execv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExternalProgram {
    path: CString,
    argv: Vec<CString>,
}

impl ExternalProgram {
    /// Resolve `command` to `<bin_dir><name>`; argv is the name followed by the arguments.
    pub(crate) fn new(config: &Config, command: &Command) -> Result<Self> {
        let path = CString::new(config.program_path(&command.name))
            .with_context(|| format!("{}: program name contains a NUL byte", command.name))?;
        let argv = std::iter::once(&command.name)
            .chain(command.arguments.iter())
            .map(|arg| CString::new(arg.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("{}: argument contains a NUL byte", command.name))?;
        Ok(Self { path, argv })
    }

    /// Replace the current process image. Only returns if that failed.
    pub(crate) fn exec(&self) -> Errno {
        match execv(&self.path, &self.argv) {
            Ok(never) => match never {},
            Err(errno) => errno,
        }
    }
}

/// Map a wait status to a shell-style exit code.
pub(crate) fn exit_code(status: WaitStatus) -> ExitCode {
    match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, signal, core_dumped) => {
            terminated_by_signal(signal as i32, core_dumped)
        }
        _ => -1,
    }
}

fn terminated_by_signal(signal: i32, core_dumped: bool) -> ExitCode {
    if signal > 0 {
        128 + signal
    } else if core_dumped {
        255
    } else {
        -1
    }
}

/// Message for a program that could not be started.
pub(crate) fn describe_exec_failure(errno: Errno) -> String {
    match errno {
        Errno::ENOENT => "command not found".to_string(),
        other => other.desc().to_string(),
    }
}
