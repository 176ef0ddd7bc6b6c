//! Lexical analysis for command lines.
//!
//! Lines are split on spaces and tabs only. Each word is then classified on
//! its own: operators are recognized by exact match (`|`, `&`) or by prefix
//! (`<`, `>>`, `>`), and a word wrapped in one matching pair of quotes loses
//! that pair. There is no escaping and no nested quoting.

const SPLITTERS: &[char] = &[' ', '\t'];

/// A classified word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// `|`
    Pipe,
    /// A lone `&` in the middle of a line.
    Background,
    /// `<path`. The path may be empty.
    RedirectIn(&'a str),
    /// `>path`. The path may be empty.
    RedirectOut(&'a str),
    /// `>>path`. The path may be empty.
    RedirectAppend(&'a str),
    /// Anything else, quotes not yet removed.
    Word(&'a str),
}

/// Line-level markers found at the very end of a line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineMarkers {
    pub background: bool,
    pub autocomplete: bool,
}

/// Trim the line and remove one trailing `?` and then one trailing `&`.
///
/// The Tab key appends `?` to whatever was typed, so `sleep 5 &` followed by
/// Tab arrives here as `sleep 5 &?` and sets both markers.
pub fn strip_markers(line: &str) -> (&str, LineMarkers) {
    let mut markers = LineMarkers::default();
    let mut rest = line.trim_matches(SPLITTERS);
    if let Some(stripped) = rest.strip_suffix('?') {
        markers.autocomplete = true;
        rest = stripped.trim_end_matches(SPLITTERS);
    }
    if let Some(stripped) = rest.strip_suffix('&') {
        markers.background = true;
        rest = stripped.trim_end_matches(SPLITTERS);
    }
    (rest, markers)
}

/// Split on whitespace, dropping the empty words runs of delimiters leave.
pub fn split_words(line: &str) -> impl Iterator<Item = &str> {
    line.split(SPLITTERS).filter(|word| !word.is_empty())
}

/// Classify a single word.
pub fn classify(word: &str) -> Token<'_> {
    match word {
        "|" => Token::Pipe,
        "&" => Token::Background,
        _ => {
            if let Some(path) = word.strip_prefix('<') {
                Token::RedirectIn(path)
            } else if let Some(path) = word.strip_prefix(">>") {
                Token::RedirectAppend(path)
            } else if let Some(path) = word.strip_prefix('>') {
                Token::RedirectOut(path)
            } else {
                Token::Word(word)
            }
        }
    }
}

/// Remove one pair of matching `"` or `'` wrapping the whole word.
///
/// Words of two bytes or fewer are kept as they are, so `""` stays literal.
/// An unmatched quote is kept as part of the word.
pub fn unquote(word: &str) -> &str {
    let bytes = word.as_bytes();
    if bytes.len() > 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &word[1..word.len() - 1];
        }
    }
    word
}
