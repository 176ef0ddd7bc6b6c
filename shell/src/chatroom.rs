//! `chatroom`: talk to other shells through named pipes under /tmp.
//!
//! A room is a directory holding one FIFO per member. Joining creates your
//! FIFO and forks a listener that prints whatever arrives on it; every line
//! you type is written to all the other FIFOs in the room.

use crate::builtin::{BuiltinCommand, read_line_unbuffered};
use crate::command::ExitCode;
use crate::env::Environment;
use crate::pipeline;
use anyhow::{Context, Result, bail};
use argh::FromArgs;
use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{Signal, kill};
use nix::sys::stat::Mode;
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, fork, mkfifo};
use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use tracing::debug;

const ROOMS_DIR: &str = "/tmp";
const ROOM_PREFIX: &str = "chatroom-";
const LEAVE: &str = "/leave";
const NAME_PATTERN: &str = r"^[A-Za-z0-9_-][A-Za-z0-9_.-]*$";
const MESSAGE_SIZE: usize = 500;

/// Whether `name` is usable as a room or user name: a single path component
/// that can't climb out of the room directory.
pub(crate) fn valid_name(name: &str) -> Result<bool> {
    Ok(Regex::new(NAME_PATTERN)
        .context("bad name pattern")?
        .is_match(name))
}

pub(crate) struct Room {
    name: String,
    dir: PathBuf,
}

impl Room {
    pub(crate) fn open(base: &Path, name: &str) -> Result<Self> {
        if !valid_name(name)? {
            bail!("invalid room name {:?}", name);
        }
        let dir = base.join(format!("{ROOM_PREFIX}{name}"));
        fs::create_dir_all(&dir).with_context(|| format!("can't create {}", dir.display()))?;
        Ok(Self {
            name: name.to_string(),
            dir,
        })
    }

    /// Create the FIFO other members write to. Rejoining reuses it.
    pub(crate) fn join(&self, user: &str) -> Result<PathBuf> {
        if !valid_name(user)? {
            bail!("invalid user name {:?}", user);
        }
        let inbox = self.dir.join(user);
        match mkfifo(&inbox, Mode::from_bits_truncate(0o666)) {
            Ok(()) | Err(Errno::EEXIST) => Ok(inbox),
            Err(err) => Err(err).with_context(|| format!("can't create {}", inbox.display())),
        }
    }

    /// Inboxes of everyone in the room except `user`.
    pub(crate) fn others(&self, user: &str) -> Result<Vec<PathBuf>> {
        let mut inboxes = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("can't read {}", self.dir.display()))?;
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_fifo() && entry.file_name() != user {
                inboxes.push(entry.path());
            }
        }
        inboxes.sort();
        Ok(inboxes)
    }

    /// Send `text` from `user` to everyone listening. Returns how many got it.
    ///
    /// Inboxes nobody is reading are skipped instead of blocking the sender.
    pub(crate) fn broadcast(&self, user: &str, text: &str) -> Result<usize> {
        let mut message = format!("{user}: {text}\n").into_bytes();
        message.truncate(MESSAGE_SIZE);

        let mut delivered = 0;
        for inbox in self.others(user)? {
            let opened = OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&inbox);
            let mut fifo = match opened {
                Ok(fifo) => fifo,
                Err(err) if err.raw_os_error() == Some(libc::ENXIO) => {
                    debug!("nobody listens on {}", inbox.display());
                    continue;
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("can't open {}", inbox.display()));
                }
            };
            match fifo.write_all(&message) {
                Ok(()) => delivered += 1,
                Err(err)
                    if matches!(err.kind(), ErrorKind::BrokenPipe | ErrorKind::WouldBlock) =>
                {
                    debug!("dropped message to {}: {}", inbox.display(), err)
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("can't write {}", inbox.display()));
                }
            }
        }
        Ok(delivered)
    }

    fn prompt(&self, user: &str) -> String {
        format!("\r[{}] {} > ", self.name, user)
    }

    // Runs in the forked listener until it is killed.
    fn listen(&self, user: &str, inbox: &Path, stdout: &mut dyn Write) -> Result<()> {
        let mut buf = [0u8; MESSAGE_SIZE];
        loop {
            // blocks until a writer shows up; EOF when the last one leaves
            let mut fifo =
                File::open(inbox).with_context(|| format!("can't open {}", inbox.display()))?;
            loop {
                let read = match fifo.read(&mut buf) {
                    Ok(0) => break,
                    Ok(read) => read,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err.into()),
                };
                write!(stdout, "\r[{}] ", self.name)?;
                stdout.write_all(&buf[..read])?;
                write!(stdout, "{}", self.prompt(user))?;
                stdout.flush()?;
            }
        }
    }
}

#[derive(FromArgs)]
/// Chat with other shells in a room. Type /leave to go.
pub struct Chatroom {
    #[argh(positional)]
    /// room to join; created when it doesn't exist.
    pub room: String,

    #[argh(positional)]
    /// name the other members see.
    pub user: String,
}

impl BuiltinCommand for Chatroom {
    fn name() -> &'static str {
        "chatroom"
    }

    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let room = Room::open(Path::new(ROOMS_DIR), &self.room)?;
        let inbox = room.join(&self.user)?;
        writeln!(stdout, "Welcome to {}!", self.room)?;
        stdout.flush()?;

        // SAFETY: the listener only loops over its FIFO and leaves through `exit_child`.
        let listener = match unsafe { fork() }.context("can't fork")? {
            ForkResult::Child => {
                let code = match room.listen(&self.user, &inbox, stdout) {
                    Ok(()) => 0,
                    Err(err) => {
                        eprintln!("chatroom: {:#}", err);
                        1
                    }
                };
                pipeline::exit_child(code)
            }
            ForkResult::Parent { child } => child,
        };
        debug!(pid = listener.as_raw(), "listening on {}", inbox.display());

        let talked = talk(&room, &self.user, stdin, stdout);

        let _ = kill(listener, Signal::SIGTERM);
        let _ = waitpid(listener, None);
        if let Err(err) = fs::remove_file(&inbox) {
            debug!("can't remove {}: {}", inbox.display(), err);
        }
        talked?;

        writeln!(stdout, "\rLeft {}.", self.room)?;
        Ok(0)
    }
}

fn talk(room: &Room, user: &str, stdin: &mut dyn Read, stdout: &mut dyn Write) -> Result<()> {
    loop {
        write!(stdout, "{}", room.prompt(user))?;
        stdout.flush()?;
        let Some(line) = read_line_unbuffered(stdin)? else {
            return Ok(());
        };
        match line.trim_end() {
            LEAVE => return Ok(()),
            "" => {}
            text => {
                room.broadcast(user, text)?;
            }
        }
    }
}
