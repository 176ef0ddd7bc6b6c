use crate::builtin::Builtins;
use crate::command::{BuiltinHandler, Command, ExitCode, Outcome};
use crate::completion;
use crate::config::Config;
use crate::env::Environment;
use crate::external::{self, ExternalProgram};
use crate::io_adapters;
use crate::line_reader::{LineReader, ReadOutcome};
use crate::parser;
use crate::pipeline::{self, StageAction, StagePlan, StageStatus};
use crate::terminal::{self, RawMode};
use anyhow::{Context, Result};
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::os::fd::AsRawFd;
use tracing::debug;

/// What a command name means, decided in one place.
pub(crate) enum Dispatch<'a> {
    /// Blank line or blank stage.
    Noop,
    /// One of the exit synonyms.
    Exit,
    Builtin(&'a dyn BuiltinHandler),
    /// Anything else is a program in the bin directory.
    External,
}

impl<'a> Dispatch<'a> {
    pub(crate) fn resolve(name: &str, config: &Config, builtins: &'a Builtins) -> Self {
        if name.is_empty() {
            Self::Noop
        } else if config.is_exit_synonym(name) {
            Self::Exit
        } else if let Some(handler) = builtins.get(name) {
            Self::Builtin(handler)
        } else {
            Self::External
        }
    }
}

/// How a command line went: the outcome for the read-eval loop and the fate
/// of every stage, in pipeline order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub outcome: Outcome,
    pub stages: Vec<StageStatus>,
}

impl Report {
    fn outcome(outcome: Outcome) -> Self {
        Self {
            outcome,
            stages: Vec::new(),
        }
    }
}

/// The shell: parsed command lines in, processes out.
///
/// The interpreter owns the [`Environment`], the [`Config`] and the builtin
/// registry. [`Interpreter::run`] executes one parsed line and tells the
/// caller whether to keep going; [`Interpreter::repl`] is the interactive
/// loop around it.
///
/// Example
/// ```no_run
/// use shellax::{Interpreter, Outcome, parse};
/// let mut sh = Interpreter::default();
/// let outcome = sh.run(&parse("ls -l | wc -l"));
/// assert_eq!(outcome, Outcome::Continue);
/// ```
pub struct Interpreter {
    env: Environment,
    config: Config,
    builtins: Builtins,
}

impl Interpreter {
    pub fn new(env: Environment, config: Config, builtins: Builtins) -> Self {
        Self {
            env,
            config,
            builtins,
        }
    }

    /// Run one command line. Failures are reported on stderr and never stop
    /// the loop.
    pub fn run(&mut self, chain: &Command) -> Outcome {
        match self.execute(chain) {
            Ok(report) => report.outcome,
            Err(err) => {
                eprintln!("-{}: {:#}", self.config.sysname, err);
                Outcome::Continue
            }
        }
    }

    /// Run one command line and report on every stage.
    pub fn execute(&mut self, chain: &Command) -> Result<Report> {
        let Self {
            env,
            config,
            builtins,
        } = self;

        if chain.autocomplete_requested {
            return complete(chain, builtins, config, env);
        }

        match Dispatch::resolve(&chain.name, config, builtins) {
            Dispatch::Noop => Ok(Report::default()),
            Dispatch::Exit => Ok(Report::outcome(Outcome::ExitRequested)),
            Dispatch::Builtin(handler) => {
                debug!("builtin {:?}", chain.name);
                run_builtin(handler, chain, env, config, builtins)
            }
            Dispatch::External => {
                debug!("external {:?}, {} stage(s)", chain.name, chain.len());
                run_external(chain, env, config, builtins)
            }
        }
    }

    /// Prompt, read, parse, run; until end of input or an exit command.
    ///
    /// Ctrl-C and Ctrl-\ are ignored by the shell itself and only reach the
    /// foreground children.
    pub fn repl(&mut self) -> Result<()> {
        terminal::ignore_keyboard_signals()?;
        let mut reader = LineReader::new(self.config.line_capacity);
        let mut keys = io_adapters::raw_stdin()?;
        let mut stdout = io::stdout();

        loop {
            write!(stdout, "{}", self.env.prompt(&self.config.sysname))?;
            stdout.flush()?;

            let raw = RawMode::enter()?;
            let read = reader.read_line(&mut keys, &mut stdout);
            raw.leave()?;
            let ReadOutcome::Line(line) = read? else {
                break;
            };

            if self.run(&parser::parse(&line)) == Outcome::ExitRequested {
                break;
            }
        }

        writeln!(stdout)?;
        stdout.flush()?;
        Ok(())
    }
}

impl Default for Interpreter {
    /// The process environment, configuration read from it, and every builtin.
    fn default() -> Self {
        let env = Environment::new();
        let config = Config::from_env(&env);
        Self::new(env, config, Builtins::default())
    }
}

fn complete(
    chain: &Command,
    builtins: &Builtins,
    config: &Config,
    env: &Environment,
) -> Result<Report> {
    let found = completion::candidates(chain, builtins, config, &env.current_dir);
    if !found.is_empty() {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", found.join(" "))?;
        stdout.flush()?;
    }
    Ok(Report::default())
}

// Every stage goes through the dispatch table; exit synonyms and blanks
// downstream have nothing to run.
fn plan_stages<'a>(
    first: &'a Command,
    config: &Config,
    builtins: &'a Builtins,
) -> Result<Vec<StagePlan<'a>>> {
    first
        .stages()
        .map(|stage| {
            let action = match Dispatch::resolve(&stage.name, config, builtins) {
                Dispatch::Noop | Dispatch::Exit => StageAction::Skip,
                Dispatch::Builtin(handler) => StageAction::Builtin(handler),
                Dispatch::External => StageAction::Exec(ExternalProgram::new(config, stage)?),
            };
            Ok(StagePlan {
                command: stage,
                action,
            })
        })
        .collect()
}

fn run_external(
    chain: &Command,
    env: &mut Environment,
    config: &Config,
    builtins: &Builtins,
) -> Result<Report> {
    let plans = plan_stages(chain, config, builtins)?;
    let mut launched = pipeline::spawn(&plans, None, &[], env, config)?;

    // pipelines are always waited for
    if chain.background && chain.next.is_none() {
        if let Some(mut job) = launched.pop() {
            if job.exec_result()?.is_none() {
                let pid = job.pid().as_raw();
                println!("Executing in the background. PID is: {}", pid);
                return Ok(Report {
                    outcome: Outcome::Continue,
                    stages: vec![StageStatus::Background(pid)],
                });
            }
            launched.push(job);
        }
    }

    let stages = pipeline::wait_all(launched)?;
    let outcome = report_exec_failures(&plans, &stages, config);
    Ok(Report { outcome, stages })
}

fn run_builtin(
    handler: &dyn BuiltinHandler,
    chain: &Command,
    env: &mut Environment,
    config: &Config,
    builtins: &Builtins,
) -> Result<Report> {
    let mut stdin = io_adapters::builtin_input(chain)?;

    let Some(rest) = chain.next.as_deref() else {
        let mut stdout = io_adapters::builtin_output(chain)?;
        let code = invoke(handler, chain, &mut *stdin, &mut *stdout, env, config);
        return Ok(Report {
            outcome: Outcome::Continue,
            stages: vec![StageStatus::Exited(code)],
        });
    };

    // The rest of the chain reads what the builtin writes. The parent keeps
    // the write end, and it has to be closed before waiting.
    let plans = plan_stages(rest, config, builtins)?;
    let (read, write) = pipe2(OFlag::O_CLOEXEC).context("can't create pipe")?;
    let launched = pipeline::spawn(&plans, Some(read), &[write.as_raw_fd()], env, config)?;

    let head_output = if chain.output_redirect().is_some() {
        drop(write);
        io_adapters::builtin_output(chain)
    } else {
        Ok(Box::new(BufWriter::new(File::from(write))) as Box<dyn Write>)
    };
    let code = match head_output {
        Ok(mut stdout) => invoke(handler, chain, &mut *stdin, &mut *stdout, env, config),
        Err(err) => {
            eprintln!("-{}: {}: {:#}", config.sysname, chain.name, err);
            1
        }
    };

    let mut stages = vec![StageStatus::Exited(code)];
    stages.extend(pipeline::wait_all(launched)?);
    report_exec_failures(&plans, &stages[1..], config);
    Ok(Report {
        outcome: Outcome::Continue,
        stages,
    })
}

// Builtin errors are the builtin's business: report and carry on.
fn invoke(
    handler: &dyn BuiltinHandler,
    chain: &Command,
    stdin: &mut dyn Read,
    stdout: &mut dyn Write,
    env: &mut Environment,
    config: &Config,
) -> ExitCode {
    let result = handler
        .execute(chain, stdin, stdout, env)
        .and_then(|code| {
            stdout.flush()?;
            Ok(code)
        });
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("-{}: {}: {:#}", config.sysname, chain.name, err);
            1
        }
    }
}

/// Print a line for every stage that never started. The outcome is
/// [`Outcome::Unknown`] when that happened to the first stage.
fn report_exec_failures(
    plans: &[StagePlan<'_>],
    stages: &[StageStatus],
    config: &Config,
) -> Outcome {
    let mut outcome = Outcome::Continue;
    for (index, (plan, status)) in plans.iter().zip(stages).enumerate() {
        if let StageStatus::ExecFailed(errno) = status {
            eprintln!(
                "-{}: {}: {}",
                config.sysname,
                plan.command.name,
                external::describe_exec_failure(*errno)
            );
            if index == 0 {
                outcome = Outcome::Unknown;
            }
        }
    }
    outcome
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;
    use nix::errno::Errno;
    use nix::sys::wait::waitpid;
    use nix::unistd::Pid;
    use std::collections::HashMap;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::{Mutex, MutexGuard, OnceLock};
    use std::time::{SystemTime, UNIX_EPOCH};

    // Forking tests run one at a time so no child inherits another test's pipes.
    fn lock_processes() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn make_unique_temp_dir() -> PathBuf {
        let mut p = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("shellax_pipeline_{}_{}", std::process::id(), nanos));
        fs::create_dir_all(&p).unwrap();
        p
    }

    fn bin_dir() -> String {
        if Path::new("/usr/bin/cat").exists() {
            "/usr/bin/".to_string()
        } else {
            "/bin/".to_string()
        }
    }

    fn interpreter(dir: &Path) -> Interpreter {
        let env = Environment {
            vars: HashMap::new(),
            current_dir: dir.to_path_buf(),
        };
        let config = Config {
            bin_dir: bin_dir(),
            ..Config::default()
        };
        Interpreter::new(env, config, Builtins::default())
    }

    fn execute(sh: &mut Interpreter, line: &str) -> Report {
        sh.execute(&parser::parse(line)).unwrap()
    }

    #[test]
    fn test_redirect_copies_file_in_either_order() {
        let _lock = lock_processes();
        let dir = make_unique_temp_dir();
        let input = dir.join("in.txt");
        fs::write(&input, "hello\nworld\n").unwrap();
        let mut sh = interpreter(&dir);

        let out1 = dir.join("out1.txt");
        let report = execute(&mut sh, &format!("cat <{} >{}", input.display(), out1.display()));
        assert_eq!(report.outcome, Outcome::Continue);
        assert_eq!(report.stages, vec![StageStatus::Exited(0)]);

        let out2 = dir.join("out2.txt");
        execute(&mut sh, &format!("cat >{} <{}", out2.display(), input.display()));

        assert_eq!(fs::read_to_string(&out1).unwrap(), "hello\nworld\n");
        assert_eq!(fs::read_to_string(&out2).unwrap(), "hello\nworld\n");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_append_redirect() {
        let _lock = lock_processes();
        let dir = make_unique_temp_dir();
        let input = dir.join("in.txt");
        let log = dir.join("log.txt");
        fs::write(&input, "line\n").unwrap();
        fs::write(&log, "first\n").unwrap();
        let mut sh = interpreter(&dir);

        execute(&mut sh, &format!("cat <{} >>{}", input.display(), log.display()));
        assert_eq!(fs::read_to_string(&log).unwrap(), "first\nline\n");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_large_payload_flows_through_pipe() {
        let _lock = lock_processes();
        let dir = make_unique_temp_dir();
        let input = dir.join("big.bin");
        let output = dir.join("copy.bin");
        // several times a pipe buffer, so the stages really run concurrently
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&input, &payload).unwrap();
        let mut sh = interpreter(&dir);

        let report = execute(
            &mut sh,
            &format!("cat <{} | cat >{}", input.display(), output.display()),
        );
        assert_eq!(report.stages, vec![StageStatus::Exited(0), StageStatus::Exited(0)]);
        assert_eq!(fs::read(&output).unwrap(), payload);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_background_marker_on_pipeline_is_ignored() {
        let _lock = lock_processes();
        let dir = make_unique_temp_dir();
        let input = dir.join("in.txt");
        let output = dir.join("out.txt");
        fs::write(&input, "one\ntwo\n").unwrap();
        let mut sh = interpreter(&dir);

        let report = execute(
            &mut sh,
            &format!("cat <{} | cat >{} &", input.display(), output.display()),
        );
        assert_eq!(report.outcome, Outcome::Continue);
        assert_eq!(report.stages, vec![StageStatus::Exited(0), StageStatus::Exited(0)]);
        // waited for, so the output is complete already
        assert_eq!(fs::read_to_string(&output).unwrap(), "one\ntwo\n");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_three_stage_pipeline() {
        let _lock = lock_processes();
        let dir = make_unique_temp_dir();
        let input = dir.join("in.txt");
        let output = dir.join("out.txt");
        fs::write(&input, "a\nb\n").unwrap();
        let mut sh = interpreter(&dir);

        let report = execute(
            &mut sh,
            &format!("cat <{} | cat | cat >{}", input.display(), output.display()),
        );
        assert_eq!(report.stages.len(), 3);
        assert_eq!(fs::read_to_string(&output).unwrap(), "a\nb\n");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_program_is_unknown() {
        let _lock = lock_processes();
        let dir = make_unique_temp_dir();
        let mut sh = interpreter(&dir);

        let report = execute(&mut sh, "definitely-not-a-program-shellax");
        assert_eq!(report.outcome, Outcome::Unknown);
        assert_eq!(report.stages, vec![StageStatus::ExecFailed(Errno::ENOENT)]);
        assert_eq!(sh.run(&parser::parse("definitely-not-a-program-shellax")), Outcome::Unknown);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_failing_program_still_continues() {
        let _lock = lock_processes();
        let dir = make_unique_temp_dir();
        let mut sh = interpreter(&dir);

        let report = execute(&mut sh, "false");
        assert_eq!(report.outcome, Outcome::Continue);
        assert_eq!(report.stages, vec![StageStatus::Exited(1)]);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_exit_synonyms_and_blank_line() {
        let dir = make_unique_temp_dir();
        let mut sh = interpreter(&dir);

        for line in ["exit", "quit", "q", "  q  "] {
            assert_eq!(sh.run(&parser::parse(line)), Outcome::ExitRequested, "{line}");
        }
        assert_eq!(execute(&mut sh, ""), Report::default());
        assert_eq!(execute(&mut sh, "   \t "), Report::default());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_builtin_head_feeds_pipeline() {
        let _lock = lock_processes();
        let dir = make_unique_temp_dir();
        let input = dir.join("in.txt");
        let output = dir.join("out.txt");
        fs::write(&input, "x\nx\ny\n").unwrap();
        let mut sh = interpreter(&dir);

        let report = execute(
            &mut sh,
            &format!("uniq -c <{} | cat >{}", input.display(), output.display()),
        );
        assert_eq!(report.stages, vec![StageStatus::Exited(0), StageStatus::Exited(0)]);
        assert_eq!(fs::read_to_string(&output).unwrap(), "     2 x\n     1 y\n");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_builtin_downstream_runs_in_child() {
        let _lock = lock_processes();
        let dir = make_unique_temp_dir();
        let input = dir.join("in.txt");
        let output = dir.join("out.txt");
        fs::write(&input, "a\na\nb\nb\nb\n").unwrap();
        let mut sh = interpreter(&dir);

        let report = execute(
            &mut sh,
            &format!("cat <{} | uniq -c >{}", input.display(), output.display()),
        );
        assert_eq!(report.outcome, Outcome::Continue);
        assert_eq!(fs::read_to_string(&output).unwrap(), "     2 a\n     3 b\n");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_failing_builtin_continues() {
        let dir = make_unique_temp_dir();
        let mut sh = interpreter(&dir);

        let report = execute(&mut sh, "wiseman soon");
        assert_eq!(report.outcome, Outcome::Continue);
        assert_eq!(report.stages, vec![StageStatus::Exited(1)]);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_background_returns_without_waiting() {
        let _lock = lock_processes();
        let dir = make_unique_temp_dir();
        let mut sh = interpreter(&dir);

        let report = execute(&mut sh, "true &");
        assert_eq!(report.outcome, Outcome::Continue);
        let [StageStatus::Background(pid)] = report.stages[..] else {
            panic!("unexpected stages {:?}", report.stages);
        };
        assert!(pid > 0);
        waitpid(Pid::from_raw(pid), None).unwrap();
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_background_missing_program_is_unknown() {
        let _lock = lock_processes();
        let dir = make_unique_temp_dir();
        let mut sh = interpreter(&dir);

        let report = execute(&mut sh, "definitely-not-a-program-shellax &");
        assert_eq!(report.outcome, Outcome::Unknown);
        assert_eq!(report.stages, vec![StageStatus::ExecFailed(Errno::ENOENT)]);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_autocomplete_does_not_execute() {
        let _lock = lock_processes();
        let dir = make_unique_temp_dir();
        let marker = dir.join("marker.txt");
        let mut sh = interpreter(&dir);

        let report = execute(&mut sh, &format!("cat >{}?", marker.display()));
        assert_eq!(report, Report::default());
        assert!(!marker.exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
