use core::fmt::{self, Write};

use base64ct::{Base64, Encoding as B64Encoding};
use heapless::Vec;
use serde::Serialize;

use super::parser::{Header, MAX_HEADERS, ResponseHead, ResponseParser};
use super::url::{DEFAULT_PORT, Url};
use crate::diag::Diagnostics;
use crate::network::CancelToken;
use crate::network::error::{HttpError, SocketError};
use crate::network::socket::{Protocol, SocketHandle, Sockets};

const COMPONENT: &str = "http";

/// Request line plus headers, and small bodies sent together with them
pub const REQUEST_BUFFER_LEN: usize = 512;
/// Largest body collected by [`Client::request`]
pub const MAX_BODY_LEN: usize = 2048;
/// Largest serialized body of [`Client::post_json`]
pub const MAX_JSON_LEN: usize = 512;

const RECEIVE_CHUNK: usize = 256;
const BASIC_TOKEN_LEN: usize = 128;

/// Request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
    /// `HEAD`; the response never carries a body
    Head,
}

impl Method {
    fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }

    fn expects_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

/// A request borrowed from the caller
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    /// Request method
    pub method: Method,
    /// Absolute `http://` URL
    pub url: &'a str,
    /// Extra headers; they replace the generated default of the same name
    pub headers: &'a [Header],
    /// Request body
    pub body: Option<&'a [u8]>,
}

/// A complete response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code of the final response
    pub status_code: u16,
    /// Headers in arrival order
    pub headers: Vec<Header, MAX_HEADERS>,
    /// Decoded body
    pub body: Vec<u8, MAX_BODY_LEN>,
}

impl Response {
    /// Value of the first header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    /// Status code is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Body as text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        core::str::from_utf8(&self.body).ok()
    }
}

/// HTTP client options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Body limit of [`Client::request`], capped at [`MAX_BODY_LEN`]
    pub max_body_len: usize,
    /// Give up when the server sends nothing for this long
    pub response_timeout_ms: u32,
    /// Delay between receive polls while waiting for data
    pub poll_interval_ms: u32,
    /// Sent unless the request carries its own `User-Agent`
    pub user_agent: &'static str,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_body_len: MAX_BODY_LEN,
            response_timeout_ms: 30_000,
            poll_interval_ms: 20,
            user_agent: concat!("libcellular/", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// HTTP/1.1 client issuing one request per connection.
#[derive(Debug)]
pub struct Client<S: Sockets> {
    sockets: S,
    config: ClientConfig,
    diag: Diagnostics,
}

impl<S: Sockets> Client<S> {
    /// Client with [`ClientConfig::default`].
    pub fn new(sockets: S) -> Self {
        Self::with_config(sockets, ClientConfig::default())
    }

    /// Client with explicit options.
    pub fn with_config(sockets: S, config: ClientConfig) -> Self {
        let diag = sockets.diagnostics();
        Self { sockets, config, diag }
    }

    /// Underlying socket provider.
    pub fn sockets(&mut self) -> &mut S {
        &mut self.sockets
    }

    /// Give back the socket provider.
    pub fn into_inner(self) -> S {
        self.sockets
    }

    /// Perform a request and collect the whole response.
    pub fn request(
        &mut self,
        method: Method,
        url: &str,
        headers: &[Header],
        body: Option<&[u8]>,
    ) -> Result<Response, HttpError> {
        self.request_with(
            &Request {
                method,
                url,
                headers,
                body,
            },
            None,
        )
    }

    /// [`Client::request`] with cancellation.
    pub fn request_with(&mut self, request: &Request<'_>, cancel: Option<&CancelToken>) -> Result<Response, HttpError> {
        let limit = self.config.max_body_len.min(MAX_BODY_LEN);
        let mut body: Vec<u8, MAX_BODY_LEN> = Vec::new();
        let head = self.exchange(request, cancel, limit, &mut |bytes: &[u8]| {
            body.extend_from_slice(bytes).map_err(|_| HttpError::BodyTooLarge)
        })?;
        Ok(Response {
            status_code: head.status_code,
            headers: head.headers,
            body,
        })
    }

    /// Perform a request and hand the body to `on_body` as it arrives.
    /// The body size is bounded only by what `on_body` accepts.
    pub fn request_streaming<F>(
        &mut self,
        request: &Request<'_>,
        cancel: Option<&CancelToken>,
        mut on_body: F,
    ) -> Result<ResponseHead, HttpError>
    where
        F: FnMut(&[u8]) -> Result<(), HttpError>,
    {
        self.exchange(request, cancel, usize::MAX, &mut on_body)
    }

    /// POST `value` serialized as JSON.
    pub fn post_json<T: Serialize>(&mut self, url: &str, value: &T) -> Result<Response, HttpError> {
        let mut json = [0u8; MAX_JSON_LEN];
        let len = serde_json_core::to_slice(value, &mut json).map_err(|_| HttpError::RequestTooLarge)?;
        let content_type = Header::new("Content-Type", "application/json").ok_or(HttpError::RequestTooLarge)?;
        self.request(
            Method::Post,
            url,
            core::slice::from_ref(&content_type),
            Some(&json[..len]),
        )
    }

    fn exchange<F>(
        &mut self,
        request: &Request<'_>,
        cancel: Option<&CancelToken>,
        max_body: usize,
        on_body: &mut F,
    ) -> Result<ResponseHead, HttpError>
    where
        F: FnMut(&[u8]) -> Result<(), HttpError>,
    {
        let url = Url::parse(request.url).map_err(|error| {
            log_warn!(self.diag, COMPONENT, "rejected url {}: {:?}", request.url, error);
            HttpError::InvalidUrl
        })?;
        let mut head: Vec<u8, REQUEST_BUFFER_LEN> = Vec::new();
        render_head(&mut HeadBuffer(&mut head), request, &url, self.config.user_agent)
            .map_err(|_| HttpError::RequestTooLarge)?;
        check(cancel)?;

        log_info!(
            self.diag,
            COMPONENT,
            "{} http://{}:{}{}",
            request.method.as_str(),
            url.host,
            url.port,
            url.target
        );
        let handle = self.sockets.open_cancellable(url.host, url.port, Protocol::Tcp, cancel)?;
        let result = self.transfer(handle, &mut head, request, cancel, max_body, on_body);
        if let Err(error) = self.sockets.close(handle) {
            log_warn!(self.diag, COMPONENT, "closing socket {} failed: {:?}", handle.id(), error);
        }
        match &result {
            Ok(head) => log_info!(self.diag, COMPONENT, "-> {}", head.status_code),
            Err(error) => log_warn!(self.diag, COMPONENT, "request failed: {:?}", error),
        }
        result
    }

    fn transfer<F>(
        &mut self,
        handle: SocketHandle,
        head: &mut Vec<u8, REQUEST_BUFFER_LEN>,
        request: &Request<'_>,
        cancel: Option<&CancelToken>,
        max_body: usize,
        on_body: &mut F,
    ) -> Result<ResponseHead, HttpError>
    where
        F: FnMut(&[u8]) -> Result<(), HttpError>,
    {
        let body = request.body.unwrap_or(&[]);
        if head.extend_from_slice(body).is_ok() {
            self.send_all(handle, head, cancel)?;
        } else {
            self.send_all(handle, head, cancel)?;
            for chunk in body.chunks(REQUEST_BUFFER_LEN) {
                self.send_all(handle, chunk, cancel)?;
            }
        }

        let mut parser = ResponseParser::new(max_body);
        if request.method == Method::Head {
            parser.expect_no_body();
        }
        let mut buf = [0u8; RECEIVE_CHUNK];
        let mut last_progress = self.sockets.now_ms();
        loop {
            check(cancel)?;
            match self.sockets.receive(handle, &mut buf) {
                Ok(0) => {
                    let idle = self.sockets.now_ms().saturating_sub(last_progress);
                    if idle >= self.config.response_timeout_ms as u64 {
                        return Err(HttpError::Transport(SocketError::Timeout));
                    }
                    self.sockets.delay_ms(self.config.poll_interval_ms);
                }
                Ok(read) => {
                    parser.push(&buf[..read], on_body)?;
                    if parser.is_done() {
                        break;
                    }
                    last_progress = self.sockets.now_ms();
                }
                Err(SocketError::RemoteClosed) => {
                    parser.finish()?;
                    break;
                }
                Err(error) => return Err(error.into()),
            }
        }
        Ok(parser.into_head())
    }

    fn send_all(&mut self, handle: SocketHandle, mut bytes: &[u8], cancel: Option<&CancelToken>) -> Result<(), HttpError> {
        while !bytes.is_empty() {
            check(cancel)?;
            let sent = self.sockets.send(handle, bytes)?;
            if sent == 0 {
                return Err(HttpError::Transport(SocketError::Timeout));
            }
            bytes = &bytes[sent.min(bytes.len())..];
        }
        Ok(())
    }
}

fn check(cancel: Option<&CancelToken>) -> Result<(), HttpError> {
    if cancel.is_some_and(CancelToken::is_cancelled) {
        return Err(HttpError::Cancelled);
    }
    Ok(())
}

struct HeadBuffer<'b>(&'b mut Vec<u8, REQUEST_BUFFER_LEN>);

impl Write for HeadBuffer<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.extend_from_slice(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

fn render_head(out: &mut impl Write, request: &Request<'_>, url: &Url<'_>, user_agent: &str) -> fmt::Result {
    let has = |name: &str| request.headers.iter().any(|header| header.name.eq_ignore_ascii_case(name));
    let slash = if url.target.starts_with('?') { "/" } else { "" };

    write!(out, "{} {}{} HTTP/1.1\r\n", request.method.as_str(), slash, url.target)?;
    if url.port == DEFAULT_PORT {
        write!(out, "Host: {}\r\n", url.host)?;
    } else {
        write!(out, "Host: {}:{}\r\n", url.host, url.port)?;
    }
    if !has("User-Agent") {
        write!(out, "User-Agent: {}\r\n", user_agent)?;
    }
    if let Some(userinfo) = url.userinfo.filter(|_| !has("Authorization")) {
        let mut token = [0u8; BASIC_TOKEN_LEN];
        let token = Base64::encode(userinfo.as_bytes(), &mut token).map_err(|_| fmt::Error)?;
        write!(out, "Authorization: Basic {}\r\n", token)?;
    }
    if !has("Content-Length") {
        match request.body {
            Some(body) => write!(out, "Content-Length: {}\r\n", body.len())?,
            None if request.method.expects_body() => out.write_str("Content-Length: 0\r\n")?,
            None => {}
        }
    }
    if !has("Connection") {
        out.write_str("Connection: close\r\n")?;
    }
    for header in request.headers {
        write!(out, "{}: {}\r\n", header.name, header.value)?;
    }
    out.write_str("\r\n")
}
