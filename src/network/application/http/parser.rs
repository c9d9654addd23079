//! Resumable HTTP/1.1 response parser
//!
//! The parser keeps all state between calls, so a response can be fed in
//! whatever pieces the socket delivers, down to one byte at a time. Body
//! bytes are handed to a callback as they are decoded and are never buffered
//! by the parser itself.

use heapless::{String, Vec};

use crate::network::error::{HttpError, SocketError};

/// Headers kept per response
pub const MAX_HEADERS: usize = 16;
/// Longest header name kept
pub const MAX_HEADER_NAME_LEN: usize = 64;
/// Longest header value kept
pub const MAX_HEADER_VALUE_LEN: usize = 128;
/// Longest status, header, chunk-size or trailer line
pub const MAX_LINE_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String<MAX_HEADER_NAME_LEN>,
    pub value: String<MAX_HEADER_VALUE_LEN>,
}

impl Header {
    /// `None` when either part is too long.
    pub fn new(name: &str, value: &str) -> Option<Self> {
        let mut header = Self {
            name: String::new(),
            value: String::new(),
        };
        header.name.push_str(name).ok()?;
        header.value.push_str(value).ok()?;
        Some(header)
    }
}

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseHead {
    pub status_code: u16,
    pub headers: Vec<Header, MAX_HEADERS>,
}

impl ResponseHead {
    /// Value of the first header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk {
    Size,
    Data(usize),
    DataEnd,
    Trailer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    StatusLine,
    Headers,
    Length(usize),
    Chunked(Chunk),
    UntilClose,
    Done,
}

/// Incremental decoder for one response.
///
/// ```rust
/// use libcellular::network::application::http::ResponseParser;
///
/// let mut parser = ResponseParser::new(64);
/// let mut body = Vec::new();
/// let mut sink = |bytes: &[u8]| {
///     body.extend_from_slice(bytes);
///     Ok(())
/// };
/// parser.push(b"HTTP/1.1 200 OK\r\nContent-Le", &mut sink).unwrap();
/// parser.push(b"ngth: 5\r\n\r\nhel", &mut sink).unwrap();
/// parser.push(b"lo", &mut sink).unwrap();
/// assert!(parser.is_done());
/// assert_eq!(parser.head().status_code, 200);
/// assert_eq!(body, b"hello");
/// ```
#[derive(Debug)]
pub struct ResponseParser {
    phase: Phase,
    line: Vec<u8, MAX_LINE_LEN>,
    head: ResponseHead,
    content_length: Option<usize>,
    chunked: bool,
    no_body: bool,
    max_body: usize,
    body_len: usize,
}

impl ResponseParser {
    /// Parser that rejects bodies longer than `max_body` bytes.
    pub fn new(max_body: usize) -> Self {
        Self {
            phase: Phase::StatusLine,
            line: Vec::new(),
            head: ResponseHead::default(),
            content_length: None,
            chunked: false,
            no_body: false,
            max_body,
            body_len: 0,
        }
    }

    /// The request was `HEAD`; the response has headers only.
    pub fn expect_no_body(&mut self) {
        self.no_body = true;
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Whether the status line and all headers have been parsed.
    pub fn head_complete(&self) -> bool {
        !matches!(self.phase, Phase::StatusLine | Phase::Headers)
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    pub fn into_head(self) -> ResponseHead {
        self.head
    }

    /// Body bytes decoded so far.
    pub fn body_len(&self) -> usize {
        self.body_len
    }

    /// Consume `input`, passing decoded body bytes to `on_body`. Bytes after
    /// the end of the response are ignored.
    pub fn push<F>(&mut self, mut input: &[u8], on_body: &mut F) -> Result<(), HttpError>
    where
        F: FnMut(&[u8]) -> Result<(), HttpError>,
    {
        while !input.is_empty() {
            match self.phase {
                Phase::Done => return Ok(()),
                Phase::StatusLine | Phase::Headers | Phase::Chunked(Chunk::Size | Chunk::DataEnd | Chunk::Trailer) => {
                    if !self.take_line(&mut input)? {
                        return Ok(());
                    }
                    let line = core::mem::take(&mut self.line);
                    self.on_line(&line)?;
                }
                Phase::Length(remaining) => {
                    let n = remaining.min(input.len());
                    self.emit(&input[..n], on_body)?;
                    input = &input[n..];
                    self.phase = if remaining == n {
                        Phase::Done
                    } else {
                        Phase::Length(remaining - n)
                    };
                }
                Phase::Chunked(Chunk::Data(remaining)) => {
                    let n = remaining.min(input.len());
                    self.emit(&input[..n], on_body)?;
                    input = &input[n..];
                    self.phase = Phase::Chunked(if remaining == n {
                        Chunk::DataEnd
                    } else {
                        Chunk::Data(remaining - n)
                    });
                }
                Phase::UntilClose => {
                    self.emit(input, on_body)?;
                    input = &[];
                }
            }
        }
        Ok(())
    }

    /// The connection closed. Completes a read-until-close body; anything
    /// else unfinished is a truncated response.
    pub fn finish(&mut self) -> Result<(), HttpError> {
        match self.phase {
            Phase::Done => Ok(()),
            Phase::UntilClose => {
                self.phase = Phase::Done;
                Ok(())
            }
            _ => Err(HttpError::Transport(SocketError::RemoteClosed)),
        }
    }

    /// Move bytes up to and including the next LF into `self.line`. Returns
    /// whether a whole line is now available, without its CR LF.
    fn take_line(&mut self, input: &mut &[u8]) -> Result<bool, HttpError> {
        let data: &[u8] = *input;
        let (part, complete) = match data.iter().position(|&b| b == b'\n') {
            Some(end) => (&data[..end], true),
            None => (data, false),
        };
        self.line
            .extend_from_slice(part)
            .map_err(|_| HttpError::ProtocolError)?;
        *input = &data[(part.len() + usize::from(complete)).min(data.len())..];
        if complete && self.line.last() == Some(&b'\r') {
            self.line.pop();
        }
        Ok(complete)
    }

    fn on_line(&mut self, line: &[u8]) -> Result<(), HttpError> {
        let text = core::str::from_utf8(line).map_err(|_| HttpError::ProtocolError)?;
        match self.phase {
            Phase::StatusLine => {
                self.head.status_code = parse_status(text)?;
                self.phase = Phase::Headers;
            }
            Phase::Headers if text.is_empty() => self.begin_body()?,
            Phase::Headers => self.on_header(text)?,
            Phase::Chunked(Chunk::Size) => {
                let size = text.split(';').next().unwrap_or("").trim();
                let size = usize::from_str_radix(size, 16).map_err(|_| HttpError::ProtocolError)?;
                self.phase = Phase::Chunked(if size == 0 {
                    Chunk::Trailer
                } else {
                    Chunk::Data(size)
                });
            }
            Phase::Chunked(Chunk::DataEnd) => {
                if !text.is_empty() {
                    return Err(HttpError::ProtocolError);
                }
                self.phase = Phase::Chunked(Chunk::Size);
            }
            Phase::Chunked(Chunk::Trailer) => {
                if text.is_empty() {
                    self.phase = Phase::Done;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn on_header(&mut self, text: &str) -> Result<(), HttpError> {
        let (name, value) = text.split_once(':').ok_or(HttpError::ProtocolError)?;
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() || name.contains(' ') {
            return Err(HttpError::ProtocolError);
        }

        if name.eq_ignore_ascii_case("Content-Length") {
            let length = value.parse().map_err(|_| HttpError::ProtocolError)?;
            if self.content_length.is_some_and(|known| known != length) {
                return Err(HttpError::ProtocolError);
            }
            self.content_length = Some(length);
        } else if name.eq_ignore_ascii_case("Transfer-Encoding") {
            self.chunked = value
                .rsplit(',')
                .next()
                .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"));
        }

        // Headers that do not fit are dropped; framing was already applied.
        if let Some(header) = Header::new(name, value) {
            let _ = self.head.headers.push(header);
        }
        Ok(())
    }

    fn begin_body(&mut self) -> Result<(), HttpError> {
        let status = self.head.status_code;
        if (100..200).contains(&status) {
            // Interim response; the real one follows.
            self.head = ResponseHead::default();
            self.content_length = None;
            self.chunked = false;
            self.phase = Phase::StatusLine;
            return Ok(());
        }
        self.phase = if self.no_body || status == 204 || status == 304 {
            Phase::Done
        } else if self.chunked {
            Phase::Chunked(Chunk::Size)
        } else {
            match self.content_length {
                Some(0) => Phase::Done,
                Some(length) if length > self.max_body => return Err(HttpError::BodyTooLarge),
                Some(length) => Phase::Length(length),
                None => Phase::UntilClose,
            }
        };
        Ok(())
    }

    fn emit<F>(&mut self, bytes: &[u8], on_body: &mut F) -> Result<(), HttpError>
    where
        F: FnMut(&[u8]) -> Result<(), HttpError>,
    {
        if bytes.is_empty() {
            return Ok(());
        }
        self.body_len += bytes.len();
        if self.body_len > self.max_body {
            return Err(HttpError::BodyTooLarge);
        }
        on_body(bytes)
    }
}

fn parse_status(line: &str) -> Result<u16, HttpError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::ProtocolError);
    }
    let code = parts.next().unwrap_or("");
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HttpError::ProtocolError);
    }
    code.parse().map_err(|_| HttpError::ProtocolError)
}
