//! Plain text out of RTF report bodies, and the line filter that removes the
//! lines naming the patient or the referrer.

use crate::error::{EtlError, Result};

/// A report line containing any of these is dropped. This is a line heuristic,
/// nothing more: identifying data elsewhere in the text is kept.
pub const IDENTIFYING_MARKERS: &[&str] = &["Paciente", "Solicitado por:"];

/// Destinations whose content is never text.
const IGNORED_DESTINATIONS: &[&str] = &[
    "fonttbl", "colortbl", "stylesheet", "info", "pict", "object", "header",
    "headerl", "headerr", "headerf", "footer", "footerl", "footerr", "footerf",
    "footnote", "listtable", "listoverridetable", "rsidtbl", "generator",
    "xmlnstbl", "themedata", "colorschememapping", "datastore", "latentstyles",
    "pntext", "pntxta", "pntxtb", "fldinst", "revtbl", "filetbl", "mmathPr",
];

/// Windows-1252 code points 0x80..=0x9F; the rest of the upper half is Latin-1.
const CP1252_HIGH: [char; 32] = [
    '€', '\u{81}', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\u{8d}', 'Ž', '\u{8f}',
    '\u{90}', '‘', '’', '“', '”', '•', '–', '—', '˜', '™', 'š', '›', 'œ', '\u{9d}', 'ž', 'Ÿ',
];

fn cp1252(byte: u8) -> char {
    match byte {
        0x80..=0x9F => CP1252_HIGH[(byte - 0x80) as usize],
        _ => byte as char,
    }
}

#[derive(Clone, Copy)]
struct GroupState {
    ignorable: bool,
    unicode_skip: usize,
}

struct RtfStripper<'a> {
    chars: &'a [char],
    pos: usize,
    state: GroupState,
    stack: Vec<GroupState>,
    /// Fallback characters still to drop after a `\u` escape.
    pending_skip: usize,
    out: String,
}

impl<'a> RtfStripper<'a> {
    fn new(chars: &'a [char]) -> Self {
        RtfStripper {
            chars,
            pos: 0,
            state: GroupState { ignorable: false, unicode_skip: 1 },
            stack: Vec::new(),
            pending_skip: 0,
            out: String::new(),
        }
    }

    fn error(&self, message: impl Into<String>) -> EtlError {
        EtlError::Rtf { offset: self.pos, message: message.into() }
    }

    fn emit(&mut self, c: char) {
        if self.pending_skip > 0 {
            self.pending_skip -= 1;
        } else if !self.state.ignorable {
            self.out.push(c);
        }
    }

    fn run(mut self) -> Result<String> {
        while self.pos < self.chars.len() {
            match self.chars[self.pos] {
                '{' => {
                    self.pending_skip = 0;
                    self.stack.push(self.state);
                    self.pos += 1;
                }
                '}' => {
                    self.state = self.stack.pop().ok_or_else(|| self.error("unbalanced '}'"))?;
                    self.pending_skip = 0;
                    self.pos += 1;
                }
                '\\' => self.control()?,
                '\r' | '\n' => self.pos += 1,
                c => {
                    self.emit(c);
                    self.pos += 1;
                }
            }
        }
        if !self.stack.is_empty() {
            return Err(self.error(format!("{} group(s) left open", self.stack.len())));
        }
        Ok(self.out)
    }

    fn control(&mut self) -> Result<()> {
        let Some(&next) = self.chars.get(self.pos + 1) else {
            return Err(self.error("truncated control sequence"));
        };
        match next {
            '\\' | '{' | '}' => {
                self.emit(next);
                self.pos += 2;
            }
            '\'' => {
                let hex: String = self.chars.iter().skip(self.pos + 2).take(2).collect();
                let byte = u8::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == 2)
                    .ok_or_else(|| self.error(format!("invalid hex escape '{}'", hex)))?;
                self.emit(cp1252(byte));
                self.pos += 4;
            }
            '*' => {
                self.state.ignorable = true;
                self.pos += 2;
            }
            '~' => {
                self.emit(' ');
                self.pos += 2;
            }
            '_' => {
                self.emit('-');
                self.pos += 2;
            }
            '\r' | '\n' => {
                self.emit('\n');
                self.pos += 2;
            }
            c if c.is_ascii_alphabetic() => self.control_word(),
            _ => self.pos += 2,
        }
        Ok(())
    }

    fn control_word(&mut self) {
        let start = self.pos + 1;
        let mut end = start;
        while end < self.chars.len() && self.chars[end].is_ascii_alphabetic() {
            end += 1;
        }
        let word: String = self.chars[start..end].iter().collect();

        let mut param_end = end;
        if param_end < self.chars.len() && self.chars[param_end] == '-' {
            param_end += 1;
        }
        while param_end < self.chars.len() && self.chars[param_end].is_ascii_digit() {
            param_end += 1;
        }
        let param: Option<i32> = if param_end > end {
            self.chars[end..param_end].iter().collect::<String>().parse().ok()
        } else {
            None
        };
        self.pos = param_end;
        if self.chars.get(self.pos) == Some(&' ') {
            self.pos += 1;
        }

        match word.as_str() {
            w if IGNORED_DESTINATIONS.contains(&w) => self.state.ignorable = true,
            "par" | "line" | "sect" | "page" => self.emit('\n'),
            "tab" => self.emit('\t'),
            "emdash" => self.emit('—'),
            "endash" => self.emit('–'),
            "bullet" => self.emit('•'),
            "lquote" => self.emit('‘'),
            "rquote" => self.emit('’'),
            "ldblquote" => self.emit('“'),
            "rdblquote" => self.emit('”'),
            "emspace" | "enspace" | "qmspace" => self.emit(' '),
            "uc" => self.state.unicode_skip = param.unwrap_or(1).max(0) as usize,
            "u" => {
                if let Some(code) = param {
                    let code = if code < 0 { code + 65536 } else { code };
                    if let Some(c) = char::from_u32(code as u32) {
                        self.emit(c);
                    }
                    self.pending_skip = self.state.unicode_skip;
                }
            }
            _ => {}
        }
    }
}

/// Text content of an RTF document.
pub fn rtf_to_text(rtf: &str) -> Result<String> {
    let chars: Vec<char> = rtf.chars().collect();
    RtfStripper::new(&chars).run()
}

/// Drops every line that contains one of [`IDENTIFYING_MARKERS`].
pub fn anonymize_text(text: &str) -> String {
    text.split_inclusive('\n')
        .filter(|line| !IDENTIFYING_MARKERS.iter().any(|marker| line.contains(marker)))
        .collect()
}

pub fn anonymize_rtf(rtf: &str) -> Result<String> {
    Ok(anonymize_text(&rtf_to_text(rtf)?))
}
