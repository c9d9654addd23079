//! AT command engine
//!
//! Turns a raw, interleaved byte stream into a strict one-command-at-a-time
//! command/response protocol. Lines that are not part of the outstanding
//! command's reply are classified as unsolicited notifications and routed to
//! listeners by [`Category`].

use core::fmt;

use heapless::{String, Vec};

use super::error::EngineError;

mod engine;
mod grammar;
mod line;

pub use engine::{Completion, Engine, EngineConfig};
pub use grammar::{Grammar, LineKind, Outcome, PayloadRule, UrcRule};
pub use line::{LINE_CAPACITY, Line};

/// Longest command text, excluding the terminator
pub const MAX_COMMAND_LEN: usize = 128;
/// Intermediate lines kept per response
pub const MAX_RESPONSE_LINES: usize = 4;
/// Longest error message kept in [`Response::Error`]
pub const ERROR_MESSAGE_LEN: usize = 48;
/// Longest notification line kept
pub const NOTIFICATION_LEN: usize = 64;
/// Concurrent notification listeners
pub const MAX_LISTENERS: usize = 4;
/// Notifications buffered per listener before the oldest is dropped
pub const INBOX_DEPTH: usize = 8;
/// Submitted commands that may be pending or unclaimed at once
pub const QUEUE_DEPTH: usize = 4;
/// Timeout applied when a command does not set one
pub const DEFAULT_TIMEOUT_MS: u32 = 5_000;

/// Identifies a submitted command and its completion.
pub type Tag = u16;

/// Intermediate lines of a successful response
pub type Lines = Vec<Line, MAX_RESPONSE_LINES>;

/// A command ready to be written to the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String<MAX_COMMAND_LEN>,
    timeout_ms: u32,
    tag: Tag,
}

impl Command {
    /// Command with the default timeout.
    pub fn new(text: &str) -> Result<Self, EngineError> {
        let mut command = Self::empty();
        command
            .text
            .push_str(text)
            .map_err(|_| EngineError::CommandTooLong)?;
        Ok(command)
    }

    /// Command built from format arguments, e.g.
    /// `Command::format(format_args!("AT+USOCL={}", id))`.
    pub fn format(args: fmt::Arguments<'_>) -> Result<Self, EngineError> {
        let mut command = Self::empty();
        fmt::write(&mut command.text, args).map_err(|_| EngineError::CommandTooLong)?;
        Ok(command)
    }

    fn empty() -> Self {
        Self {
            text: String::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            tag: 0,
        }
    }

    /// Replace the timeout.
    pub fn with_timeout(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    /// Tag assigned by the engine; zero until the command is issued.
    pub fn tag(&self) -> Tag {
        self.tag
    }
}

/// Error code carried by an error final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Plain `ERROR`
    Generic,
    /// `+CME ERROR:`; `None` when the modem reported text instead of a number
    Cme(Option<u16>),
    /// `+CMS ERROR:`; `None` when the modem reported text instead of a number
    Cms(Option<u16>),
}

#[cfg(feature = "defmt")]
impl defmt::Format for ErrorCode {
    fn format(&self, f: defmt::Formatter) {
        match self {
            ErrorCode::Generic => defmt::write!(f, "ERROR"),
            ErrorCode::Cme(code) => defmt::write!(f, "CME({})", code),
            ErrorCode::Cms(code) => defmt::write!(f, "CMS({})", code),
        }
    }
}

/// Result of one executed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Final `OK` with the intermediate lines that preceded it
    Ok(Lines),
    /// Error final result with its code and a human-readable message
    Error(ErrorCode, String<ERROR_MESSAGE_LEN>),
    /// No final result before the deadline
    Timeout,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok(_))
    }

    /// Intermediate lines; empty unless the response is `Ok`.
    pub fn lines(&self) -> &[Line] {
        match self {
            Response::Ok(lines) => lines,
            _ => &[],
        }
    }

    /// Text after `prefix` on the first intermediate line that starts with it,
    /// with surrounding whitespace removed.
    pub fn field(&self, prefix: &str) -> Option<&str> {
        self.lines().iter().find_map(|line| {
            let text = core::str::from_utf8(line).ok()?;
            text.strip_prefix(prefix).map(str::trim)
        })
    }

    /// First intermediate line that is valid text.
    pub fn first_text(&self) -> Option<&str> {
        self.lines()
            .iter()
            .find_map(|line| core::str::from_utf8(line).ok())
            .map(str::trim)
    }
}

/// Kind of unsolicited notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Data waiting on a modem socket
    SocketData,
    /// A modem socket was closed
    SocketClosed,
    /// Network registration changed
    Registration,
    /// Packet data session activated or deactivated
    DataSession,
    /// Incoming call or message
    IncomingCall,
    /// Other device events
    Device,
    /// A line no rule recognizes, received while no command was outstanding
    Unclassified,
}

impl Category {
    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Set of categories a listener subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CategorySet(u8);

impl CategorySet {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self(0x7f);

    /// Set containing `categories`.
    pub const fn of(categories: &[Category]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < categories.len() {
            bits |= categories[i].bit();
            i += 1;
        }
        Self(bits)
    }

    pub const fn with(self, category: Category) -> Self {
        Self(self.0 | category.bit())
    }

    pub const fn contains(&self, category: Category) -> bool {
        self.0 & category.bit() != 0
    }
}

/// One unsolicited line delivered to a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    category: Category,
    line: String<NOTIFICATION_LEN>,
}

impl Notification {
    /// Notification for `line`, truncated to [`NOTIFICATION_LEN`] bytes.
    pub fn new(category: Category, line: &str) -> Self {
        let mut text = String::new();
        for c in line.chars() {
            if text.push(c).is_err() {
                break;
            }
        }
        Self { category, line: text }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    /// Parameters after the `+XXX:` prefix, or the whole line when there is none.
    pub fn params(&self) -> &str {
        match self.line.split_once(':') {
            Some((_, params)) => params.trim(),
            None => self.line.trim(),
        }
    }

    /// Whether the line starts with `prefix`.
    pub fn is(&self, prefix: &str) -> bool {
        self.line.starts_with(prefix)
    }
}

/// Handle returned by [`Engine::register_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u8);

/// Split comma-separated AT parameters, removing quotes and whitespace.
pub fn params(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').map(|p| p.trim().trim_matches('"'))
}

/// The `index`-th parameter parsed as a number.
pub fn param_number<T: core::str::FromStr>(text: &str, index: usize) -> Option<T> {
    params(text).nth(index)?.parse().ok()
}
