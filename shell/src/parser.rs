use crate::command::Command;
use crate::lexer::{self, Token};
use tracing::debug;

/// Assembles stages from a stream of words.
///
/// The first word of every stage is taken as its name without classification.
/// A `|` closes the current stage; whatever follows is parsed the same way as
/// a fresh line would be, except that line markers were already removed.
struct ChainBuilder<'a, I: Iterator<Item = &'a str>> {
    words: I,
    stages: Vec<Command>,
}

impl<'a, I: Iterator<Item = &'a str>> ChainBuilder<'a, I> {
    fn from(words: I) -> Self {
        ChainBuilder {
            words,
            stages: Vec::new(),
        }
    }

    fn build(mut self) -> Command {
        let mut current = self.start_stage();
        while let Some(word) = self.words.next() {
            match lexer::classify(word) {
                Token::Pipe => {
                    let next = self.start_stage();
                    self.stages.push(std::mem::replace(&mut current, next));
                }
                Token::Background => {}
                Token::RedirectIn(path) => current.redirect_in = Some(path.to_string()),
                Token::RedirectOut(path) => {
                    current.redirect_out = Some(path.to_string());
                    current.redirect_append = None;
                }
                Token::RedirectAppend(path) => {
                    current.redirect_append = Some(path.to_string());
                    current.redirect_out = None;
                }
                Token::Word(word) => {
                    current.arguments.push(lexer::unquote(word).to_string());
                }
            }
        }
        self.stages.push(current);
        self.link()
    }

    fn start_stage(&mut self) -> Command {
        Command::named(self.words.next().unwrap_or_default())
    }

    /// Link the collected stages back to front.
    fn link(mut self) -> Command {
        let mut rest: Option<Box<Command>> = None;
        while self.stages.len() > 1 {
            if let Some(mut stage) = self.stages.pop() {
                stage.next = rest;
                rest = Some(Box::new(stage));
            }
        }
        let mut head = self.stages.pop().unwrap_or_default();
        head.next = rest;
        head
    }
}

/// Parse one input line into a chain of pipeline stages.
///
/// Parsing never fails. Malformed input degrades instead: a redirection with
/// no path yields an empty path, an unmatched quote stays in the word, and a
/// blank line yields a single stage with an empty name. A line with N `|`
/// operators yields N + 1 stages.
pub fn parse(line: &str) -> Command {
    let (body, markers) = lexer::strip_markers(line);
    let mut head = ChainBuilder::from(lexer::split_words(body)).build();
    head.background = markers.background;
    head.autocomplete_requested = markers.autocomplete;
    debug!(stages = head.len(), background = head.background, "parsed {:?}", line);
    head
}
