//! Answers for a line ending in `?`.

use crate::builtin::Builtins;
use crate::command::Command;
use crate::config::Config;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Completions for the last stage of `chain`, sorted and without duplicates.
///
/// A bare name completes against builtins, exit synonyms and the programs in
/// the bin directory. Otherwise the word being typed completes as a path.
pub fn candidates(
    chain: &Command,
    builtins: &Builtins,
    config: &Config,
    cwd: &Path,
) -> Vec<String> {
    let stage = chain.stages().last().unwrap_or(chain);
    match path_word(stage) {
        Some(word) => complete_path(word, cwd),
        None => complete_command(&stage.name, builtins, config),
    }
}

// The last argument, or a redirect path when the stage has no arguments.
// Redirects aren't ordered against arguments, so `sort x >ou?` completes `x`.
fn path_word(stage: &Command) -> Option<&str> {
    stage
        .arguments
        .last()
        .map(String::as_str)
        .or(stage.redirect_append.as_deref())
        .or(stage.redirect_out.as_deref())
        .or(stage.redirect_in.as_deref())
}

/// Complete a command name (first word on the line).
pub fn complete_command(prefix: &str, builtins: &Builtins, config: &Config) -> Vec<String> {
    let mut matches = BTreeSet::new();
    let names = builtins
        .names()
        .map(str::to_string)
        .chain(config.exit_synonyms.iter().cloned())
        .chain(
            list_dir(Path::new(&config.bin_dir))
                .into_iter()
                .map(|(name, _)| name),
        );
    for name in names {
        if name.starts_with(prefix) {
            matches.insert(name);
        }
    }
    matches.into_iter().collect()
}

/// Complete a path relative to `cwd`; directories get a trailing `/`.
pub fn complete_path(word: &str, cwd: &Path) -> Vec<String> {
    let (dir_prefix, file_prefix) = match word.rfind('/') {
        Some(slash) => word.split_at(slash + 1),
        None => ("", word),
    };
    let search_dir = if dir_prefix.is_empty() {
        cwd.to_path_buf()
    } else {
        // joining an absolute prefix replaces `cwd`
        cwd.join(dir_prefix)
    };

    let mut matches = BTreeSet::new();
    for (name, is_dir) in list_dir(&search_dir) {
        let hidden = name.starts_with('.') && !file_prefix.starts_with('.');
        if hidden || !name.starts_with(file_prefix) {
            continue;
        }
        let suffix = if is_dir { "/" } else { "" };
        matches.insert(format!("{dir_prefix}{name}{suffix}"));
    }
    matches.into_iter().collect()
}

// Unreadable directories complete to nothing.
fn list_dir(dir: &Path) -> Vec<(String, bool)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| {
            // follow symlinks so a link to a directory completes like one
            let is_dir = entry.path().is_dir();
            (entry.file_name().to_string_lossy().into_owned(), is_dir)
        })
        .collect()
}
