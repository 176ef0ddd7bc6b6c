use crate::env::Environment;
use anyhow::Result;
use std::fmt;
use std::io::{Read, Write};

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
pub type ExitCode = i32;

/// One stage of a pipeline, as produced by [`crate::parse`].
///
/// The head of a chain is the first stage to run; `next` owns the rest of the
/// pipeline. `background` and `autocomplete_requested` describe the whole line
/// and are only ever set on the head.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    /// Program or builtin name. Empty for a blank line.
    pub name: String,
    /// Arguments, without the program name.
    pub arguments: Vec<String>,
    /// `<path`
    pub redirect_in: Option<String>,
    /// `>path`
    pub redirect_out: Option<String>,
    /// `>>path`
    pub redirect_append: Option<String>,
    /// The line ended with `&`.
    pub background: bool,
    /// The line ended with `?` (typed, or produced by the Tab key).
    pub autocomplete_requested: bool,
    /// The stage reading this stage's output.
    pub next: Option<Box<Command>>,
}

impl Command {
    /// A stage with the given name and nothing else.
    pub fn named(name: impl Into<String>) -> Self {
        let mut command = Self::default();
        command.name = name.into();
        command
    }

    /// Iterate over this stage and every stage after it.
    pub fn stages(&self) -> Stages<'_> {
        Stages { next: Some(self) }
    }

    /// Number of stages in the chain starting here.
    pub fn len(&self) -> usize {
        self.stages().count()
    }

    /// A chain always has at least one stage.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Input redirection target. An empty path means "no redirection".
    pub fn input_redirect(&self) -> Option<&str> {
        non_empty(&self.redirect_in)
    }

    /// Output redirection target and whether it appends.
    ///
    /// Append wins when both slots are somehow filled, because it is applied last.
    pub fn output_redirect(&self) -> Option<(&str, bool)> {
        non_empty(&self.redirect_append)
            .map(|path| (path, true))
            .or_else(|| non_empty(&self.redirect_out).map(|path| (path, false)))
    }
}

fn non_empty(slot: &Option<String>) -> Option<&str> {
    slot.as_deref().filter(|path| !path.is_empty())
}

// Unlink iteratively so a very long pipeline can't overflow the stack on drop.
impl Drop for Command {
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(mut stage) = next {
            next = stage.next.take();
        }
    }
}

/// Iterator over the stages of a [`Command`] chain.
pub struct Stages<'a> {
    next: Option<&'a Command>,
}

impl<'a> Iterator for Stages<'a> {
    type Item = &'a Command;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.next.as_deref();
        Some(current)
    }
}

/// Writes the chain back as a command line that parses to an equal chain.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, stage) in self.stages().enumerate() {
            if index > 0 {
                f.write_str(" | ")?;
            }
            f.write_str(&stage.name)?;
            // redirect paths are unquoted, so they must never be the last word
            if let Some(path) = &stage.redirect_in {
                write!(f, " <{path}")?;
            }
            if let Some(path) = &stage.redirect_out {
                write!(f, " >{path}")?;
            }
            if let Some(path) = &stage.redirect_append {
                write!(f, " >>{path}")?;
            }
            for arg in &stage.arguments {
                if needs_quotes(arg) {
                    write!(f, " \"{arg}\"")?;
                } else {
                    write!(f, " {arg}")?;
                }
            }
        }
        if self.background {
            f.write_str(" &")?;
        }
        if self.autocomplete_requested {
            f.write_str("?")?;
        }
        Ok(())
    }
}

// An argument the lexer would otherwise read as an operator, or as a quoted word.
fn needs_quotes(arg: &str) -> bool {
    arg == "|"
        || arg == "&"
        || arg.starts_with('<')
        || arg.starts_with('>')
        || arg.ends_with('&')
        || arg.ends_with('?')
        || crate::lexer::unquote(arg) != arg
}

/// Result of running one command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Outcome {
    /// Show the next prompt.
    #[default]
    Continue,
    /// The user asked to leave the shell.
    ExitRequested,
    /// The command could not be started at all.
    Unknown,
}

/// A command implemented inside the shell process.
///
/// Handlers receive the whole stage (including any `next` chain) together with
/// the streams the engine prepared for it. Whatever they return, the engine
/// carries on with the next prompt: a handler cannot stop the shell.
pub trait BuiltinHandler {
    /// Name the handler is registered under.
    fn name(&self) -> &'static str;

    /// Run the builtin for `command`.
    fn execute(
        &self,
        command: &Command,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;
}
