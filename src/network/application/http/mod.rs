//! HTTP/1.1 protocol implementation for embedded systems.
//!
//! This module provides a lightweight HTTP client that runs over the logical
//! sockets of a cellular modem. It focuses on predictable memory usage: the
//! request head is built in a fixed buffer, request bodies are sent in bounded
//! chunks, and responses are decoded by a resumable parser that accepts input
//! split at any byte boundary.
//!
//! # Features
//!
//! - HTTP/1.1 with `Connection: close` per request
//! - Content-Length, chunked and read-until-close response framing
//! - Streaming response bodies through a callback
//! - JSON request bodies via `serde`
//! - Basic authorization from URL user-info
//! - Cancellation through [`CancelToken`](crate::network::CancelToken)

/// HTTP client implementation and supporting types.
pub mod client;

/// Resumable HTTP/1.1 response parser.
pub mod parser;

/// `http://` URL parsing.
pub mod url;

pub use client::{Client, ClientConfig, Method, Request, Response};
pub use parser::{Header, ResponseHead, ResponseParser};
pub use url::{Url, UrlError};
