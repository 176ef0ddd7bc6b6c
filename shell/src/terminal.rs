use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{SigHandler, Signal, signal};
use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use std::os::fd::AsFd;
use tracing::warn;

/// Signals the keyboard sends to the whole foreground process group.
const KEYBOARD_SIGNALS: [Signal; 2] = [Signal::SIGINT, Signal::SIGQUIT];

/// Raw keyboard mode on standard input for the lifetime of the value.
///
/// Entering captures the current settings and turns off canonical line
/// editing, echo and signal keys, so every key press (Ctrl-C included)
/// reaches the line reader unechoed. Dropping the guard puts the captured
/// settings back, whichever way the reading code exits.
///
/// When standard input is not a terminal, the guard does nothing.
pub struct RawMode {
    saved: Option<Termios>,
}

impl RawMode {
    pub fn enter() -> Result<Self> {
        let stdin = std::io::stdin();
        let saved = match termios::tcgetattr(stdin.as_fd()) {
            Ok(saved) => saved,
            Err(Errno::ENOTTY) => return Ok(Self { saved: None }),
            Err(err) => return Err(err).context("can't read terminal settings"),
        };

        let mut raw = saved.clone();
        raw.local_flags
            .remove(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw)
            .context("can't switch terminal to raw mode")?;

        Ok(Self { saved: Some(saved) })
    }

    /// Restore the captured settings now and report whether that worked.
    pub fn leave(mut self) -> Result<()> {
        match self.saved.take() {
            Some(saved) => restore(&saved).context("can't restore terminal settings"),
            None => Ok(()),
        }
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(err) = restore(&saved) {
                warn!("failed to restore terminal settings: {}", err);
            }
        }
    }
}

fn restore(saved: &Termios) -> nix::Result<()> {
    termios::tcsetattr(std::io::stdin().as_fd(), SetArg::TCSANOW, saved)
}

/// Keep Ctrl-C and Ctrl-\ from killing the shell while a foreground child runs.
pub(crate) fn ignore_keyboard_signals() -> Result<()> {
    for sig in KEYBOARD_SIGNALS {
        // SAFETY: installs no handler, only a disposition.
        unsafe { signal(sig, SigHandler::SigIgn) }
            .with_context(|| format!("can't ignore {}", sig))?;
    }
    Ok(())
}

/// Put back the default dispositions a forked stage should run with.
///
/// Ignored signals survive exec: the runtime ignores SIGPIPE and the
/// interactive loop ignores the keyboard signals. A background stage keeps
/// ignoring the keyboard so Ctrl-C at the prompt can't reach it.
pub(crate) fn restore_child_signals(background: bool) {
    let keyboard: &[Signal] = if background { &[] } else { &KEYBOARD_SIGNALS };
    for &sig in [Signal::SIGPIPE].iter().chain(keyboard) {
        // SAFETY: as above, a disposition and no handler.
        let _ = unsafe { signal(sig, SigHandler::SigDfl) };
    }
}
