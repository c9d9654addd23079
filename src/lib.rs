//! # libcellular - cellular connectivity for constrained IoT devices
//!
//! A Rust SDK for devices that reach the network only through a cellular modem
//! driven by AT commands over a serial line. The library turns that single
//! half-duplex command channel into a managed command/response protocol, a
//! set of logical sockets multiplexed over it, and an HTTP client on top. It
//! is designed for embedded systems and supports `no_std` environments: every
//! buffer is bounded at compile time.
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────┐   ┌──────────────────────┐
//! │ HTTP client              │   │ GNSS receiver        │
//! │ network::application     │   │ gps                  │
//! └────────────┬─────────────┘   └──────────┬───────────┘
//!              ▼                            │
//! ┌──────────────────────────┐              │
//! │ Socket stack             │              │
//! │ network::socket          │              │
//! └────────────┬─────────────┘              │
//!              ▼                            ▼
//! ┌──────────────────────────┐   ┌──────────────────────┐
//! │ AT command engine        │◀──│ Modem integration    │
//! │ network::at              │   │ modem (SARA-R4/R5)   │
//! └────────────┬─────────────┘   └──────────────────────┘
//!              ▼
//!      serial line (network::Read + network::Write)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use libcellular::modem::{Modem, ModemConfig, Settings};
//! use libcellular::modem::sara_r::SaraR;
//! use libcellular::network::application::http::{Client, Method};
//! use libcellular::network::at::{Engine, EngineConfig};
//! # struct Uart;
//! # impl libcellular::network::Read for Uart {
//! #     type Error = ();
//! #     fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Self::Error> { Ok(0) }
//! # }
//! # impl libcellular::network::Write for Uart {
//! #     type Error = ();
//! #     fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> { Ok(buf.len()) }
//! #     fn flush(&mut self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! # struct Ticks(u64);
//! # impl libcellular::time::Clock for Ticks {
//! #     fn now_ms(&self) -> u64 { self.0 }
//! #     fn delay_ms(&mut self, ms: u32) { self.0 += ms as u64 }
//! # }
//!
//! let dialect = SaraR::r510();
//! let engine = Engine::new(Uart, Ticks(0), dialect.grammar(), EngineConfig::default());
//! let mut modem = Modem::new(engine, dialect, ModemConfig::default()).unwrap();
//!
//! let settings = Settings::from_json(br#"{"apn":"soracom.io","user":"sora","password":"sora"}"#).unwrap();
//! modem.provision(&settings);
//! modem.connect(&settings.apn()).unwrap();
//!
//! let mut client = Client::new(modem.sockets());
//! let response = client
//!     .request(Method::Get, "http://example.com/status", &[], None)
//!     .unwrap();
//! assert!(response.is_success());
//! ```
//!
//! ## Optional Features
//!
//! - `std`: Enable standard library support (default: disabled)
//! - `defmt`: Mirror diagnostics to `defmt` and implement `defmt::Format` for error types

#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

/// Diagnostic sinks: structured log lines and raw protocol capture.
#[macro_use]
pub mod diag;

/// Monotonic time, deadlines and retry backoff.
pub mod time;

/// Transport layers: AT command engine, logical sockets and application protocols.
pub mod network;

/// Concrete modem integration: bring-up, registration, data session and device queries.
pub mod modem;

/// GNSS (NMEA 0183) sentence parsing and position tracking.
pub mod gps;
