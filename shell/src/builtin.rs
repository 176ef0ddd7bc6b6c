use crate::chatroom::Chatroom;
use crate::command::{BuiltinHandler, Command, ExitCode};
use crate::env::Environment;
use anyhow::{Context, Result, anyhow, bail};
use argh::{EarlyExit, FromArgs};
use std::collections::HashMap;
use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::process::{Command as Process, Stdio};

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "uniq" or "cd".
    fn name() -> &'static str;

    /// Executes the command using provided IO streams and environment.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;
}

/// Adapts a typed [`BuiltinCommand`] to the registry's [`BuiltinHandler`].
pub(crate) struct Factory<T> {
    _command: PhantomData<fn() -> T>,
}

impl<T> Factory<T> {
    pub(crate) fn boxed() -> Box<Self> {
        Box::new(Self {
            _command: PhantomData,
        })
    }
}

impl<T: BuiltinCommand> BuiltinHandler for Factory<T> {
    fn name(&self) -> &'static str {
        T::name()
    }

    fn execute(
        &self,
        command: &Command,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let args: Vec<&str> = command.arguments.iter().map(String::as_str).collect();
        match T::from_args(&[T::name()], &args) {
            Ok(builtin) => builtin.execute(stdin, stdout, env),
            Err(EarlyExit {
                output,
                status: Ok(()),
            }) => {
                stdout.write_all(output.as_bytes())?;
                Ok(0)
            }
            Err(EarlyExit { output, .. }) => Err(anyhow!("{}", output.trim_end())),
        }
    }
}

/// Name to handler table consulted by the dispatcher.
pub struct Builtins {
    handlers: HashMap<&'static str, Box<dyn BuiltinHandler>>,
}

impl Builtins {
    /// A registry with nothing in it.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Add a handler; a later registration under the same name replaces the earlier one.
    pub fn register(&mut self, handler: Box<dyn BuiltinHandler>) {
        self.handlers.insert(handler.name(), handler);
    }

    pub fn get(&self, name: &str) -> Option<&dyn BuiltinHandler> {
        self.handlers.get(name).map(|handler| handler.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }
}

impl Default for Builtins {
    fn default() -> Self {
        let mut builtins = Self::empty();
        builtins.register(Factory::<Cd>::boxed());
        builtins.register(Factory::<Uniq>::boxed());
        builtins.register(Factory::<MoodPrinter>::boxed());
        builtins.register(Factory::<Wiseman>::boxed());
        builtins.register(Factory::<LsFiles>::boxed());
        builtins.register(Factory::<Chatroom>::boxed());
        builtins
    }
}

/// Read one line without buffering ahead, so nothing meant for a later
/// reader (or a child process) is swallowed. `None` at end of input.
pub(crate) fn read_line_unbuffered(stdin: &mut dyn Read) -> io::Result<Option<String>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stdin.read(&mut byte) {
            Ok(0) if line.is_empty() => return Ok(None),
            Ok(0) => break,
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => line.push(byte[0]),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory.
    /// Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let target = match self.target.filter(|t| !t.is_empty()) {
            Some(t) => PathBuf::from(t),
            None => PathBuf::from(env.get_var("HOME").context("no target and HOME not set")?),
        };

        let new_dir = if target.is_absolute() {
            target
        } else {
            env.current_dir.join(target)
        };

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("{}", new_dir.display()))?;
        env::set_current_dir(&canonical)
            .with_context(|| format!("can't chdir to {}", canonical.display()))?;
        env.current_dir = canonical;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Collapse adjacent identical lines of standard input.
pub struct Uniq {
    #[argh(switch, short = 'c')]
    /// prefix each line with the number of times it was repeated.
    pub count: bool,
}

impl Uniq {
    fn emit(&self, stdout: &mut dyn Write, line: &[u8], repeats: usize) -> io::Result<()> {
        if self.count {
            write!(stdout, "{:>6} ", repeats)?;
        }
        stdout.write_all(line)
    }
}

impl BuiltinCommand for Uniq {
    fn name() -> &'static str {
        "uniq"
    }

    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let mut reader = BufReader::new(stdin);
        let mut current: Option<Vec<u8>> = None;
        let mut repeats = 0;

        loop {
            // lines keep their newline, so a last line without one is a different line
            let mut line = Vec::new();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            if current.as_deref() == Some(line.as_slice()) {
                repeats += 1;
                continue;
            }
            if let Some(previous) = current.replace(line) {
                self.emit(stdout, &previous, repeats)?;
            }
            repeats = 1;
        }

        if let Some(previous) = current {
            self.emit(stdout, &previous, repeats)?;
        }
        Ok(0)
    }
}

const MOODS: [(&str, &str); 10] = [
    ("happy", "[^w^]"),
    ("sad", "( T~~T )"),
    ("angry", "•`_´•"),
    ("rageous", "( ╯°□°)╯┻━━┻"),
    ("suspicious", "( `_>´)"),
    ("surprised", "( 0 _ 0 )"),
    ("bored", "(-_-)"),
    ("full of love", "( ˘ ³˘)"),
    ("cheerful", "\\(^o^)/"),
    ("stunned", "(*_*)"),
];

#[derive(FromArgs)]
/// Ask how you feel and answer with a matching emoticon.
pub struct MoodPrinter {}

impl BuiltinCommand for MoodPrinter {
    fn name() -> &'static str {
        "moodprinter"
    }

    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        writeln!(stdout, "How is your mood today?")?;
        for (number, (mood, _)) in MOODS.iter().enumerate() {
            writeln!(stdout, "{}. {}", number + 1, mood)?;
        }

        let mut choice = None;
        while choice.is_none() {
            write!(stdout, "Choose one of these numbers: ")?;
            stdout.flush()?;
            let Some(answer) = read_line_unbuffered(stdin)? else {
                break;
            };
            match answer.trim().parse::<i64>() {
                Ok(number) if (1..=MOODS.len() as i64).contains(&number) => {
                    choice = Some(number as usize)
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }

        match choice {
            Some(number) => writeln!(stdout, "This is your mood emoji: {}", MOODS[number - 1].1)?,
            None => writeln!(stdout, "invalid input")?,
        }
        Ok(0)
    }
}

const WISECOW_FILE: &str = "/tmp/wisecow.txt";

/// The crontab entry `wiseman` installs.
pub(crate) fn cron_line(minutes: u32) -> String {
    format!("*/{minutes} * * * * /usr/games/fortune | /usr/games/cowsay >> {WISECOW_FILE}\n")
}

/// `existing` crontab with the wiseman entry appended on a line of its own.
pub(crate) fn with_cron_line(existing: &str, minutes: u32) -> String {
    let mut table = existing.to_string();
    if !table.is_empty() && !table.ends_with('\n') {
        table.push('\n');
    }
    table.push_str(&cron_line(minutes));
    table
}

#[derive(FromArgs)]
/// Have cron drop a fortune told by a cow into /tmp/wisecow.txt every few minutes.
pub struct Wiseman {
    #[argh(positional)]
    /// interval in minutes; a positive integer.
    pub minutes: String,
}

impl BuiltinCommand for Wiseman {
    fn name() -> &'static str {
        "wiseman"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let minutes = match self.minutes.parse::<u32>() {
            Ok(minutes) if minutes > 0 => minutes,
            _ => bail!("Please enter a positive integer. You entered {}", self.minutes),
        };

        // `crontab -l` fails when the user has no table yet; start from scratch then
        let listing = Process::new("crontab")
            .arg("-l")
            .stderr(Stdio::null())
            .output()
            .context("can't run crontab -l")?;
        let existing = if listing.status.success() {
            String::from_utf8_lossy(&listing.stdout).into_owned()
        } else {
            String::new()
        };

        let mut install = Process::new("crontab")
            .arg("-")
            .stdin(Stdio::piped())
            .spawn()
            .context("can't run crontab -")?;
        install
            .stdin
            .take()
            .context("crontab has no stdin")?
            .write_all(with_cron_line(&existing, minutes).as_bytes())?;
        let status = install.wait()?;
        if !status.success() {
            bail!("crontab - failed: {}", status);
        }

        writeln!(stdout, "A new fortune lands in {} every {} minute(s).", WISECOW_FILE, minutes)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Recursively list a folder into a file, logging folders that can't be read.
pub struct LsFiles {
    #[argh(positional)]
    /// folder to list; asked for on standard input when omitted.
    pub folder: Option<String>,

    #[argh(option, default = "String::from(\"./lsfiles_output.txt\")")]
    /// file the listing is appended to.
    pub output: String,

    #[argh(option, default = "String::from(\"./lsfiles_log.txt\")")]
    /// file permission errors are appended to.
    pub log: String,
}

impl LsFiles {
    // Pre-order walk; entries sorted by name, symlinks listed but not followed.
    fn walk(&self, dir: &Path, listing: &mut dyn Write) -> Result<usize> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                writeln!(listing, "Permission denied to {}", dir.display())?;
                self.log_permission_error(dir)?;
                return Ok(0);
            }
            Err(err) => return Err(err).with_context(|| format!("can't read {}", dir.display())),
        };

        let mut entries = entries.collect::<io::Result<Vec<_>>>()?;
        entries.sort_by_key(|entry| entry.file_name());

        let mut listed = 0;
        for entry in entries {
            let path = entry.path();
            writeln!(listing, "{}", path.display())?;
            listed += 1;
            if entry.file_type()?.is_dir() {
                listed += self.walk(&path, listing)?;
            }
        }
        Ok(listed)
    }

    fn log_permission_error(&self, dir: &Path) -> Result<()> {
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log)
            .with_context(|| format!("can't open {}", self.log))?;
        let stamp = chrono::Local::now().format("%d/%m/%Y, %H:%M:%S");
        writeln!(log, "{} PermissionError: {}", stamp, dir.display())?;
        Ok(())
    }
}

impl BuiltinCommand for LsFiles {
    fn name() -> &'static str {
        "lsfiles"
    }

    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let folder = match &self.folder {
            Some(folder) => folder.clone(),
            None => {
                writeln!(stdout, "Please enter the full address of the folder.")?;
                write!(stdout, "E.g, '/home/USERNAME/FOLDER': ")?;
                stdout.flush()?;
                read_line_unbuffered(stdin)?
                    .map(|line| line.trim().to_string())
                    .filter(|line| !line.is_empty())
                    .context("no folder given")?
            }
        };

        let root = env.current_dir.join(&folder);
        if !root.is_dir() {
            bail!("{}: not a folder", folder);
        }

        let mut listing = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output)
            .with_context(|| format!("can't open {}", self.output))?;
        let listed = self.walk(&root, &mut listing)?;

        writeln!(stdout, "{} entries of {} written to {}", listed, folder, self.output)?;
        Ok(0)
    }
}
