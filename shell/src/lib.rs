//! shellax: a small interactive Unix shell.
//!
//! A line typed at the prompt goes through three stages. [`LineReader`] turns
//! raw keystrokes into a line (with one line of up-arrow history), [`parse`]
//! turns the line into a chain of [`Command`] stages, and [`Interpreter`]
//! runs the chain: builtins in-process, everything else as programs from the
//! bin directory wired together with pipes and file redirections.
//!
//! The public modules [`command`] and [`env`] expose the types needed to
//! write and register your own builtins.

mod builtin;
mod chatroom;
pub mod command;
mod completion;
mod config;
pub mod env;
mod external;
mod interpreter;
mod io_adapters;
mod lexer;
mod line_reader;
mod parser;
mod pipeline;
mod terminal;

pub use builtin::Builtins;
pub use command::{BuiltinHandler, Command, ExitCode, Outcome};
pub use completion::candidates;
pub use config::Config;
pub use env::Environment;
pub use interpreter::{Interpreter, Report};
pub use line_reader::{LineReader, ReadOutcome};
pub use parser::parse;
pub use pipeline::StageStatus;
pub use terminal::RawMode;
