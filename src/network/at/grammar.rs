//! Line classification rules
//!
//! A [`Grammar`] is static data supplied by the modem integration. The engine
//! asks it what each received line is: a final result, a notification, part
//! of the current response, or garbage.

use super::{Category, ErrorCode};

/// Maps a line prefix to a notification category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrcRule {
    pub prefix: &'static str,
    pub category: Category,
    /// While a command starting with this text is outstanding, matching
    /// lines are treated as its intermediate response instead.
    pub solicited_by: Option<&'static str>,
}

impl UrcRule {
    pub const fn new(prefix: &'static str, category: Category) -> Self {
        Self {
            prefix,
            category,
            solicited_by: None,
        }
    }

    pub const fn solicited_by(mut self, command: &'static str) -> Self {
        self.solicited_by = Some(command);
        self
    }
}

/// A response line whose payload is framed by a length parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadRule {
    pub prefix: &'static str,
    /// Zero-based index of the length parameter; the quoted payload follows
    /// the parameter after it.
    pub length_field: usize,
}

/// Final result kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Error(ErrorCode),
}

/// What a received line is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Ends the outstanding command
    Final(Outcome),
    /// Unsolicited notification
    Notification(Category),
    /// Part of the outstanding command's response
    Intermediate,
    /// The modem echoing the outstanding command
    Echo,
    /// Not valid text; dropped
    Garbled,
}

/// Result codes and notification rules of one modem family.
#[derive(Debug, Clone, Copy)]
pub struct Grammar {
    pub ok: &'static [&'static str],
    pub errors: &'static [&'static str],
    pub cme_prefix: &'static str,
    pub cms_prefix: &'static str,
    pub urcs: &'static [UrcRule],
    pub payloads: &'static [PayloadRule],
    /// Byte the modem sends when it is ready for raw data
    pub prompt: u8,
    /// Descriptions for numeric `+CME ERROR` codes
    pub cme_messages: &'static [(u16, &'static str)],
}

impl Grammar {
    /// Plain V.25ter result codes with no modem-specific notifications.
    pub const BASIC: Grammar = Grammar {
        ok: &["OK"],
        errors: &["ERROR", "NO CARRIER", "BUSY", "NO ANSWER"],
        cme_prefix: "+CME ERROR:",
        cms_prefix: "+CMS ERROR:",
        urcs: &[UrcRule::new("RING", Category::IncomingCall)],
        payloads: &[],
        prompt: b'>',
        cme_messages: &[],
    };

    /// Classify one line. `binary` marks a length-framed payload line;
    /// `outstanding` is the text of the command awaiting its result.
    pub fn classify(&self, line: &[u8], binary: bool, outstanding: Option<&str>) -> LineKind {
        if binary {
            return match outstanding {
                Some(_) => LineKind::Intermediate,
                None => LineKind::Notification(Category::Unclassified),
            };
        }
        let Ok(text) = core::str::from_utf8(line) else {
            return LineKind::Garbled;
        };
        if text.bytes().any(|b| b.is_ascii_control() && b != b'\t') {
            return LineKind::Garbled;
        }
        let text = text.trim();

        if outstanding.is_some_and(|command| text == command.trim()) {
            return LineKind::Echo;
        }
        if let Some(outcome) = self.final_outcome(text) {
            return LineKind::Final(outcome);
        }

        for rule in self.urcs {
            if !text.starts_with(rule.prefix) {
                continue;
            }
            let solicited = matches!(
                (rule.solicited_by, outstanding),
                (Some(query), Some(command)) if command.starts_with(query)
            );
            if !solicited {
                return LineKind::Notification(rule.category);
            }
        }

        match outstanding {
            Some(_) => LineKind::Intermediate,
            None => LineKind::Notification(Category::Unclassified),
        }
    }

    fn final_outcome(&self, text: &str) -> Option<Outcome> {
        if self.ok.iter().any(|ok| *ok == text) {
            return Some(Outcome::Ok);
        }
        if self.errors.iter().any(|error| *error == text) {
            return Some(Outcome::Error(ErrorCode::Generic));
        }
        if let Some(rest) = text.strip_prefix(self.cme_prefix) {
            return Some(Outcome::Error(ErrorCode::Cme(rest.trim().parse().ok())));
        }
        text.strip_prefix(self.cms_prefix)
            .map(|rest| Outcome::Error(ErrorCode::Cms(rest.trim().parse().ok())))
    }

    /// Final-result text without the CME/CMS prefix.
    pub fn error_text<'a>(&self, line: &'a str) -> &'a str {
        let line = line.trim();
        line.strip_prefix(self.cme_prefix)
            .or_else(|| line.strip_prefix(self.cms_prefix))
            .map(str::trim)
            .unwrap_or(line)
    }

    /// Known description of an error code.
    pub fn describe(&self, code: ErrorCode) -> Option<&'static str> {
        match code {
            ErrorCode::Cme(Some(number)) => self
                .cme_messages
                .iter()
                .find(|(known, _)| *known == number)
                .map(|(_, message)| *message),
            _ => None,
        }
    }
}
