//! Character-at-a-time line editing on top of a raw terminal.

use std::io::{self, ErrorKind, Read, Write};

const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;
const BACKSPACE: u8 = 0x08;
const TAB: u8 = 0x09;
const ESC: u8 = 0x1b;
const DELETE: u8 = 0x7f;

/// What one call to [`LineReader::read_line`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line, without its newline.
    Line(String),
    /// Ctrl-D or the end of the input stream: the session should end.
    EndOfInput,
}

// Position inside an `ESC [ x` arrow key sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    Started,
    Bracket,
}

/// Reads lines from keystrokes and keeps the one-slot history.
///
/// The reader does its own echoing, so it expects the terminal to be in raw
/// mode (see [`crate::RawMode`]). Pressing the up arrow swaps the line being
/// edited with the stored previous line; pressing it again swaps them back.
pub struct LineReader {
    capacity: usize,
    previous: Vec<u8>,
}

impl LineReader {
    /// `capacity` includes room for a terminator, as a C buffer would: lines
    /// are cut at `capacity - 1` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            previous: Vec::new(),
        }
    }

    /// The line the up arrow would bring back.
    pub fn previous_line(&self) -> &[u8] {
        &self.previous
    }

    /// Read keystrokes from `input` until a line is complete, echoing to `echo`.
    ///
    /// Ctrl-C abandons the line: the result is an empty line and the stored
    /// previous line stays as it was.
    pub fn read_line(
        &mut self,
        input: &mut dyn Read,
        echo: &mut dyn Write,
    ) -> io::Result<ReadOutcome> {
        let mut buf: Vec<u8> = Vec::new();
        let mut escape = Escape::None;

        loop {
            let byte = match read_byte(input)? {
                None | Some(CTRL_D) => return Ok(ReadOutcome::EndOfInput),
                Some(CTRL_C) => {
                    echo.write_all(b"^C\n")?;
                    echo.flush()?;
                    return Ok(ReadOutcome::Line(String::new()));
                }
                Some(byte) => byte,
            };

            match escape {
                Escape::Started if byte == b'[' => {
                    escape = Escape::Bracket;
                    continue;
                }
                Escape::Bracket => {
                    escape = Escape::None;
                    // B, C, D (down, right, left) have no navigation yet
                    if byte == b'A' {
                        self.recall(&mut buf, echo)?;
                        if self.is_full(&buf) {
                            echo.write_all(b"\n")?;
                            break;
                        }
                    }
                    continue;
                }
                // anything else after ESC ends the sequence and is handled normally
                _ => escape = Escape::None,
            }

            match byte {
                TAB => {
                    buf.push(b'?');
                    echo.write_all(b"?\n")?;
                    break;
                }
                DELETE | BACKSPACE => {
                    if pop_char(&mut buf) {
                        echo.write_all(b"\x08 \x08")?;
                    }
                }
                ESC => escape = Escape::Started,
                b'\n' | b'\r' => {
                    echo.write_all(b"\n")?;
                    break;
                }
                _ => {
                    echo.write_all(&[byte])?;
                    buf.push(byte);
                    if self.is_full(&buf) {
                        echo.write_all(b"\n")?;
                        break;
                    }
                }
            }
            echo.flush()?;
        }

        echo.flush()?;
        self.previous = buf.clone();
        Ok(ReadOutcome::Line(String::from_utf8_lossy(&buf).into_owned()))
    }

    fn is_full(&self, buf: &[u8]) -> bool {
        buf.len() >= self.capacity - 1
    }

    // Erase the displayed line, show the stored one, and swap the two.
    fn recall(&mut self, buf: &mut Vec<u8>, echo: &mut dyn Write) -> io::Result<()> {
        let shown = buf.iter().filter(|&&byte| !is_continuation(byte)).count();
        for _ in 0..shown {
            echo.write_all(b"\x08 \x08")?;
        }
        echo.write_all(&self.previous)?;
        std::mem::swap(buf, &mut self.previous);
        echo.flush()
    }
}

fn is_continuation(byte: u8) -> bool {
    byte & 0xc0 == 0x80
}

// Remove the last character, all of its UTF-8 bytes.
fn pop_char(buf: &mut Vec<u8>) -> bool {
    let Some(mut byte) = buf.pop() else {
        return false;
    };
    while is_continuation(byte) {
        match buf.pop() {
            Some(earlier) => byte = earlier,
            None => break,
        }
    }
    true
}

fn read_byte(input: &mut dyn Read) -> io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match input.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const UP: &[u8] = b"\x1b[A";

    fn read(reader: &mut LineReader, keys: &[u8]) -> (ReadOutcome, Vec<u8>) {
        let mut echo = Vec::new();
        let outcome = reader
            .read_line(&mut Cursor::new(keys.to_vec()), &mut echo)
            .unwrap();
        (outcome, echo)
    }

    fn line(s: &str) -> ReadOutcome {
        ReadOutcome::Line(s.to_string())
    }

    #[test]
    fn test_plain_line_is_echoed_without_newline_in_result() {
        let mut reader = LineReader::new(4096);
        let (outcome, echo) = read(&mut reader, b"ls -l\n");
        assert_eq!(outcome, line("ls -l"));
        assert_eq!(echo, b"ls -l\n");
        assert_eq!(reader.previous_line(), b"ls -l");
    }

    #[test]
    fn test_backspace_erases_last_char() {
        let mut reader = LineReader::new(4096);
        let (outcome, echo) = read(&mut reader, b"lsx\x7f\n");
        assert_eq!(outcome, line("ls"));
        assert_eq!(echo, b"lsx\x08 \x08\n");
    }

    #[test]
    fn test_backspace_on_empty_line_is_noop() {
        let mut reader = LineReader::new(4096);
        let (outcome, echo) = read(&mut reader, b"\x7f\x7fa\n");
        assert_eq!(outcome, line("a"));
        assert_eq!(echo, b"a\n");
    }

    #[test]
    fn test_tab_requests_completion_and_stops_reading() {
        let mut reader = LineReader::new(4096);
        let (outcome, _) = read(&mut reader, b"ca\tignored\n");
        assert_eq!(outcome, line("ca?"));
    }

    #[test]
    fn test_ctrl_d_discards_partial_line() {
        let mut reader = LineReader::new(4096);
        let (outcome, _) = read(&mut reader, b"rm -rf\x04\n");
        assert_eq!(outcome, ReadOutcome::EndOfInput);

        let (outcome, _) = read(&mut reader, b"");
        assert_eq!(outcome, ReadOutcome::EndOfInput);
        assert_eq!(reader.previous_line(), b"");
    }

    #[test]
    fn test_arrows_other_than_up_are_ignored() {
        let mut reader = LineReader::new(4096);
        let (outcome, echo) = read(&mut reader, b"a\x1b[Bb\x1b[Cc\x1b[D\n");
        assert_eq!(outcome, line("abc"));
        assert_eq!(echo, b"abc\n");
    }

    #[test]
    fn test_plain_capital_letters_are_text() {
        let mut reader = LineReader::new(4096);
        let (outcome, _) = read(&mut reader, b"ABCD [x]\n");
        assert_eq!(outcome, line("ABCD [x]"));
    }

    #[test]
    fn test_up_arrow_recalls_previous_line() {
        let mut reader = LineReader::new(4096);
        read(&mut reader, b"echo first\n");

        let mut keys = UP.to_vec();
        keys.push(b'\n');
        let (outcome, echo) = read(&mut reader, &keys);
        assert_eq!(outcome, line("echo first"));
        assert_eq!(echo, b"echo first\n");
    }

    #[test]
    fn test_up_arrow_twice_swaps_back() {
        let mut reader = LineReader::new(4096);
        read(&mut reader, b"old\n");

        let mut keys = b"new".to_vec();
        keys.extend_from_slice(UP);
        keys.extend_from_slice(UP);
        keys.push(b'\n');
        let (outcome, echo) = read(&mut reader, &keys);
        assert_eq!(outcome, line("new"));
        assert_eq!(
            echo,
            b"new\x08 \x08\x08 \x08\x08 \x08old\x08 \x08\x08 \x08\x08 \x08new\n"
        );
        assert_eq!(reader.previous_line(), b"new");
    }

    #[test]
    fn test_recalled_line_can_be_edited() {
        let mut reader = LineReader::new(4096);
        read(&mut reader, b"ls\n");

        let mut keys = UP.to_vec();
        keys.extend_from_slice(b" -l\n");
        let (outcome, _) = read(&mut reader, &keys);
        assert_eq!(outcome, line("ls -l"));
    }

    #[test]
    fn test_full_buffer_ends_line_silently() {
        let mut reader = LineReader::new(5);
        let (outcome, _) = read(&mut reader, b"abcdefg\n");
        assert_eq!(outcome, line("abcd"));
    }

    #[test]
    fn test_recalled_full_line_takes_no_more_keys() {
        let mut reader = LineReader::new(5);
        read(&mut reader, b"abcdefg\n");

        let mut keys = UP.to_vec();
        keys.extend_from_slice(b"Z\n");
        let (outcome, echo) = read(&mut reader, &keys);
        assert_eq!(outcome, line("abcd"));
        assert_eq!(echo, b"abcd\n");
    }

    #[test]
    fn test_ctrl_d_at_empty_prompt_ends_input() {
        let mut reader = LineReader::new(4096);
        read(&mut reader, b"ls\n");

        let (outcome, echo) = read(&mut reader, b"\x04");
        assert_eq!(outcome, ReadOutcome::EndOfInput);
        assert!(echo.is_empty());
        assert_eq!(reader.previous_line(), b"ls");
    }

    #[test]
    fn test_ctrl_c_abandons_line_and_keeps_history() {
        let mut reader = LineReader::new(4096);
        read(&mut reader, b"ls\n");

        let (outcome, echo) = read(&mut reader, b"rm -rf\x03more\n");
        assert_eq!(outcome, line(""));
        assert_eq!(echo, b"rm -rf^C\n");
        assert_eq!(reader.previous_line(), b"ls");
    }

    #[test]
    fn test_backspace_erases_whole_multibyte_char() {
        let mut reader = LineReader::new(4096);
        let (outcome, echo) = read(&mut reader, "a\u{e9}\x7f\n".as_bytes());
        assert_eq!(outcome, line("a"));
        assert_eq!(echo, "a\u{e9}\x08 \x08\n".as_bytes());

        let (outcome, _) = read(&mut reader, "\u{1f600}\x7f\x7fb\n".as_bytes());
        assert_eq!(outcome, line("b"));
    }
}
