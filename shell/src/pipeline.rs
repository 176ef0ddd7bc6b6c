//! Process topology for one command line.
//!
//! Every stage gets its own child. Adjacent stages are joined by a pipe, and
//! each child wires its pipe ends onto descriptors 0 and 1, closes every other
//! pipe descriptor it inherited, applies its own file redirections and only
//! then replaces its image. The parent drops its copies of both ends right
//! after each fork.
//!
//! A stage that execs also gets a close-on-exec status pipe. A successful
//! exec closes the write end, so the parent reads end-of-file; a failed exec
//! writes the errno first. This tells "not found" apart from "ran and failed".

use crate::command::{BuiltinHandler, Command, ExitCode};
use crate::config::Config;
use crate::env::Environment;
use crate::external::{self, ExternalProgram};
use crate::io_adapters::{self, STDIN_FD, STDOUT_FD};
use crate::terminal;
use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, Pid, close, dup2, fork, pipe2};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tracing::debug;

/// Exit code of a child whose exec failed.
const EXEC_FAILED: ExitCode = 127;

/// What a forked stage does once its descriptors are in place.
pub(crate) enum StageAction<'a> {
    Exec(ExternalProgram),
    Builtin(&'a dyn BuiltinHandler),
    /// Empty name or an exit synonym: nothing to run.
    Skip,
}

pub(crate) struct StagePlan<'a> {
    pub(crate) command: &'a Command,
    pub(crate) action: StageAction<'a>,
}

/// How one stage of a command line ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// The stage ran and exited with this code.
    Exited(ExitCode),
    /// The program image could not be loaded.
    ExecFailed(Errno),
    /// Left running in the background with this process id.
    Background(i32),
}

/// A forked stage the parent still has to collect.
pub(crate) struct Launched {
    pid: Pid,
    exec_status: Option<File>,
    exec_failure: Option<Errno>,
}

impl Launched {
    pub(crate) fn pid(&self) -> Pid {
        self.pid
    }

    /// Block until the child has either replaced its image or given up.
    pub(crate) fn exec_result(&mut self) -> Result<Option<Errno>> {
        if let Some(mut status_pipe) = self.exec_status.take() {
            let mut report = Vec::new();
            status_pipe
                .read_to_end(&mut report)
                .context("can't read exec status")?;
            self.exec_failure = <[u8; 4]>::try_from(report.as_slice())
                .ok()
                .map(|raw| Errno::from_raw(i32::from_ne_bytes(raw)));
        }
        Ok(self.exec_failure)
    }

    pub(crate) fn wait(mut self) -> Result<StageStatus> {
        let failure = self.exec_result()?;
        let status = loop {
            match waitpid(self.pid, None) {
                Err(Errno::EINTR) => continue,
                other => break other.with_context(|| format!("waitpid {}", self.pid))?,
            }
        };
        Ok(match failure {
            Some(errno) => StageStatus::ExecFailed(errno),
            None => StageStatus::Exited(external::exit_code(status)),
        })
    }
}

/// Wait for every stage, in launch order.
pub(crate) fn wait_all(launched: Vec<Launched>) -> Result<Vec<StageStatus>> {
    launched.into_iter().map(Launched::wait).collect()
}

/// Fork one child per plan, joined by pipes.
///
/// `stdin` becomes the first stage's input (the terminal when `None`).
/// `close_in_children` lists parent descriptors that no child may keep, such
/// as the write end a builtin in the parent is feeding the first stage with.
pub(crate) fn spawn(
    plans: &[StagePlan<'_>],
    stdin: Option<OwnedFd>,
    close_in_children: &[RawFd],
    env: &mut Environment,
    config: &Config,
) -> Result<Vec<Launched>> {
    // buffered prompt text must not be duplicated into the children
    std::io::stdout().flush().context("flush stdout")?;

    let mut launched = Vec::with_capacity(plans.len());
    if let Err(err) = spawn_into(&mut launched, plans, stdin, close_in_children, env, config) {
        for child in launched {
            let _ = child.wait();
        }
        return Err(err);
    }
    Ok(launched)
}

fn spawn_into(
    launched: &mut Vec<Launched>,
    plans: &[StagePlan<'_>],
    stdin: Option<OwnedFd>,
    close_in_children: &[RawFd],
    env: &mut Environment,
    config: &Config,
) -> Result<()> {
    let mut input = stdin;
    for (index, plan) in plans.iter().enumerate() {
        let (next_input, output) = if index + 1 < plans.len() {
            let (read, write) = pipe2(OFlag::O_CLOEXEC).context("can't create pipe")?;
            (Some(read), Some(write))
        } else {
            (None, None)
        };
        let status_pipe = match plan.action {
            StageAction::Exec(_) => {
                Some(pipe2(OFlag::O_CLOEXEC).context("can't create pipe")?)
            }
            _ => None,
        };

        // SAFETY: the child only rewires descriptors, then execs or runs a
        // builtin and leaves through `exit_child`.
        match unsafe { fork() }.context("can't fork")? {
            ForkResult::Child => {
                let wiring = Wiring {
                    input,
                    output,
                    unused: next_input,
                    status_pipe: status_pipe.map(|(_, write)| write),
                    close_in_children,
                };
                run_stage(plan, wiring, env, config)
            }
            ForkResult::Parent { child } => {
                debug!(pid = child.as_raw(), stage = index, "forked {:?}", plan.command.name);
                launched.push(Launched {
                    pid: child,
                    exec_status: status_pipe.map(|(read, _)| File::from(read)),
                    exec_failure: None,
                });
                drop(output);
                input = next_input;
            }
        }
    }
    Ok(())
}

struct Wiring<'a> {
    input: Option<OwnedFd>,
    output: Option<OwnedFd>,
    unused: Option<OwnedFd>,
    status_pipe: Option<OwnedFd>,
    close_in_children: &'a [RawFd],
}

/// Leave a forked child without running the parent's exit handlers or
/// flushing buffers it inherited.
pub(crate) fn exit_child(code: ExitCode) -> ! {
    // SAFETY: `_exit` only terminates the calling process.
    unsafe { nix::libc::_exit(code) }
}

fn run_stage(
    plan: &StagePlan<'_>,
    wiring: Wiring<'_>,
    env: &mut Environment,
    config: &Config,
) -> ! {
    let code = match enter_stage(plan, wiring, env) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("-{}: {}: {:#}", config.sysname, plan.command.name, err);
            1
        }
    };
    exit_child(code)
}

fn enter_stage(
    plan: &StagePlan<'_>,
    wiring: Wiring<'_>,
    env: &mut Environment,
) -> Result<ExitCode> {
    let Wiring {
        input,
        output,
        unused,
        status_pipe,
        close_in_children,
    } = wiring;

    if let Some(fd) = &input {
        dup2(fd.as_raw_fd(), STDIN_FD).context("dup2 stdin")?;
    }
    if let Some(fd) = &output {
        dup2(fd.as_raw_fd(), STDOUT_FD).context("dup2 stdout")?;
    }
    drop((input, output, unused));
    for &fd in close_in_children {
        let _ = close(fd);
    }

    io_adapters::redirect_stdio(plan.command)?;
    // only a single stage can run in the background
    let background = plan.command.background && plan.command.next.is_none();
    terminal::restore_child_signals(background);

    match &plan.action {
        StageAction::Exec(program) => {
            let errno = program.exec();
            if let Some(status_pipe) = status_pipe {
                let _ = File::from(status_pipe).write_all(&(errno as i32).to_ne_bytes());
            }
            Ok(EXEC_FAILED)
        }
        StageAction::Builtin(handler) => {
            // SAFETY: descriptors 0 and 1 belong to this child until it exits.
            let mut stdin = unsafe { File::from_raw_fd(STDIN_FD) };
            let mut stdout = BufWriter::new(unsafe { File::from_raw_fd(STDOUT_FD) });
            let code = handler.execute(plan.command, &mut stdin, &mut stdout, env)?;
            stdout.flush()?;
            Ok(code)
        }
        StageAction::Skip => Ok(0),
    }
}
