//! # Application Layer Network Protocols
//!
//! Protocols that run over the logical sockets of [`crate::network::socket`].
//!
//! ## Design Principles
//!
//! - **Socket Agnostic**: Work with any type implementing [`Sockets`](crate::network::socket::Sockets)
//! - **No-std Compatible**: Designed for embedded systems without heap allocation
//! - **Resource Conscious**: Fixed-size buffers; bodies larger than a buffer are streamed
//!
//! ## Usage Pattern
//!
//! 1. Bring up the modem and obtain its socket stack
//! 2. Wrap the stack with the protocol client
//! 3. Use protocol-specific methods for communication
//!
//! ```rust,no_run
//! use libcellular::network::application::http::{Client, Method};
//! # use libcellular::network::socket::{Protocol, SocketHandle, SocketState, Sockets};
//! # use libcellular::network::error::SocketError;
//! # use libcellular::network::CancelToken;
//! # struct Offline;
//! # impl Sockets for Offline {
//! #     fn open_cancellable(&mut self, _: &str, _: u16, _: Protocol, _: Option<&CancelToken>)
//! #         -> Result<SocketHandle, SocketError> { Err(SocketError::NoSlots) }
//! #     fn send(&mut self, _: SocketHandle, _: &[u8]) -> Result<usize, SocketError> { Ok(0) }
//! #     fn receive(&mut self, _: SocketHandle, _: &mut [u8]) -> Result<usize, SocketError> { Ok(0) }
//! #     fn close(&mut self, _: SocketHandle) -> Result<(), SocketError> { Ok(()) }
//! #     fn state(&self, _: SocketHandle) -> SocketState { SocketState::Closed }
//! #     fn now_ms(&self) -> u64 { 0 }
//! #     fn delay_ms(&mut self, _: u32) {}
//! # }
//!
//! let mut client = Client::new(Offline);
//! let result = client.request(Method::Get, "http://example.com/api/status", &[], None);
//! assert!(result.is_err());
//! ```

/// HTTP client implementation.
///
/// Provides an HTTP/1.1 client with a resumable response parser, chunked
/// transfer decoding and streaming bodies.
pub mod http;
