//! Line framing for the modem's output stream

use heapless::Vec;

use super::grammar::PayloadRule;

/// Longest line the engine keeps
pub const LINE_CAPACITY: usize = 256;

/// One framed line, without its terminator
pub type Line = Vec<u8, LINE_CAPACITY>;

/// Event produced by the [`LineReader`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Framed {
    /// A complete line. `overflowed` lines were cut at [`LINE_CAPACITY`];
    /// `binary` lines carry a length-framed payload.
    Line {
        line: Line,
        overflowed: bool,
        binary: bool,
    },
    /// The data-entry prompt byte at the start of a line
    Prompt,
}

/// Splits the byte stream into lines.
///
/// Lines end at CR or LF; empty lines are skipped. A line that begins with a
/// payload prefix switches to length framing once the opening quote of the
/// payload arrives, so CR and LF inside the payload do not end the line.
#[derive(Debug)]
pub(crate) struct LineReader {
    buf: Line,
    overflowed: bool,
    binary: bool,
    raw_remaining: usize,
    payloads: &'static [PayloadRule],
}

impl LineReader {
    pub(crate) fn new(payloads: &'static [PayloadRule]) -> Self {
        Self {
            buf: Line::new(),
            overflowed: false,
            binary: false,
            raw_remaining: 0,
            payloads,
        }
    }

    /// Feed one byte. `prompt` is the prompt byte when a command is waiting
    /// for one.
    pub(crate) fn push(&mut self, byte: u8, prompt: Option<u8>) -> Option<Framed> {
        if self.raw_remaining > 0 {
            self.raw_remaining -= 1;
            self.store(byte);
            return None;
        }

        match byte {
            b'\r' | b'\n' => {
                if self.buf.is_empty() && !self.overflowed {
                    return None;
                }
                Some(self.take())
            }
            _ => {
                if self.buf.is_empty() && !self.overflowed && prompt == Some(byte) {
                    return Some(Framed::Prompt);
                }
                self.store(byte);
                if byte == b'"' && !self.binary {
                    if let Some(len) = self.payload_length() {
                        self.binary = true;
                        self.raw_remaining = len;
                    }
                }
                None
            }
        }
    }

    /// Whether a partial line is buffered.
    pub(crate) fn is_mid_line(&self) -> bool {
        !self.buf.is_empty() || self.raw_remaining > 0
    }

    pub(crate) fn clear(&mut self) {
        self.buf.clear();
        self.overflowed = false;
        self.binary = false;
        self.raw_remaining = 0;
    }

    fn store(&mut self, byte: u8) {
        if self.buf.push(byte).is_err() {
            self.overflowed = true;
        }
    }

    fn take(&mut self) -> Framed {
        let framed = Framed::Line {
            line: core::mem::take(&mut self.buf),
            overflowed: self.overflowed,
            binary: self.binary,
        };
        self.overflowed = false;
        self.binary = false;
        framed
    }

    /// Payload length when the quote just stored opens a framed payload,
    /// e.g. the `"` in `+USORD: 0,5,"`.
    fn payload_length(&self) -> Option<usize> {
        let text = core::str::from_utf8(&self.buf).ok()?;
        let rule = self.payloads.iter().find(|rule| text.starts_with(rule.prefix))?;
        let fields = text[rule.prefix.len()..].strip_suffix("\"")?.strip_suffix(',')?;
        if fields.split(',').count() != rule.length_field + 1 {
            return None;
        }
        fields.split(',').nth(rule.length_field)?.trim().parse().ok()
    }
}
