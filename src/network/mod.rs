//! Transport layers between the modem's serial line and application protocols
//!
//! The serial line is abstracted by the [`Read`] and [`Write`] traits. On top of
//! it the [`at`] engine runs one AT command at a time, [`socket`] multiplexes
//! logical connections over that engine and [`application`] speaks HTTP over
//! the sockets.
//!

#![allow(missing_docs)]
#![deny(unsafe_code)]

use core::sync::atomic::{AtomicBool, Ordering};

/// Error types for every transport layer
pub mod error;

/// AT command engine: framing, classification, execution and notifications
pub mod at;

/// Logical sockets multiplexed over the AT command engine
pub mod socket;

/// Application protocol implementations
pub mod application;

/// Re-exports of common traits
pub mod prelude {
    pub use super::socket::Sockets;
    pub use super::{Channel, Read, Write};
}

// Command channel
pub trait Read {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Read whatever bytes are available without blocking; `Ok(0)` means none.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Write data to the channel
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
    /// Flush the write buffer
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// A bidirectional byte channel to the modem
pub trait Channel: Read + Write {}

impl<T: Read + Write> Channel for T {}

impl<T: Read + ?Sized> Read for &mut T {
    type Error = T::Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        (**self).read(buf)
    }
}

impl<T: Write + ?Sized> Write for &mut T {
    type Error = T::Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        (**self).flush()
    }
}

/// Cooperative cancellation flag.
///
/// Set from another task or interrupt handler; long operations check it
/// between steps and return a `Cancelled` error.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
}

impl CancelToken {
    pub const fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Clear a previous request so the token can be reused.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }
}
