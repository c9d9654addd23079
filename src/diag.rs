//! Diagnostics plumbing shared by every layer
//!
//! The library never prints. Each component owns a [`Diagnostics`] handle and
//! hands `(level, component, message)` triples to an optional [`LogSink`].
//! When transcript capture is enabled, raw protocol bytes additionally go to an
//! optional [`RecordSink`]. Neither sink can stall or fail a protocol operation.
//!
//! ```rust
//! use core::fmt;
//! use libcellular::diag::{Diagnostics, Level, LogSink};
//!
//! struct Console;
//!
//! impl LogSink for Console {
//!     fn log(&self, level: Level, component: &str, message: fmt::Arguments<'_>) {
//!         println!("[{}] {}: {}", level.as_str(), component, message);
//!     }
//! }
//!
//! static CONSOLE: Console = Console;
//!
//! let diag = Diagnostics::silent()
//!     .with_log_sink(&CONSOLE)
//!     .with_level(Level::Debug);
//! assert!(diag.enabled(Level::Info));
//! assert!(!diag.enabled(Level::Trace));
//! ```

use core::fmt;

/// Maximum rendered length of a message mirrored to `defmt`
#[cfg(feature = "defmt")]
const DEFMT_MESSAGE_LEN: usize = 128;

/// Severity of a diagnostic message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Byte-level protocol tracing
    Trace,
    /// Command and state transitions
    Debug,
    /// Lifecycle milestones
    Info,
    /// Recoverable anomalies
    Warn,
    /// Failures surfaced to the caller
    Error,
}

impl Level {
    /// Short upper-case name, e.g. `"WARN"`
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Level {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=str}", self.as_str())
    }
}

/// Receiver of formatted diagnostic messages.
///
/// Implementations must not block; a sink that cannot keep up should drop
/// messages rather than apply backpressure.
pub trait LogSink {
    /// Deliver one message produced by `component` (`"at"`, `"socket"`, ...).
    fn log(&self, level: Level, component: &str, message: fmt::Arguments<'_>);
}

/// Failure reported by a [`RecordSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    /// The backing store is not mounted or not ready.
    Unavailable,
    /// The backing store has no room left.
    Full,
    /// The write itself failed.
    WriteFailed,
}

#[cfg(feature = "defmt")]
impl defmt::Format for RecordError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            RecordError::Unavailable => defmt::write!(f, "Unavailable"),
            RecordError::Full => defmt::write!(f, "Full"),
            RecordError::WriteFailed => defmt::write!(f, "WriteFailed"),
        }
    }
}

/// Append-only store for raw protocol transcripts.
pub trait RecordSink {
    /// Append `bytes` to the named stream.
    fn append_record(&self, stream: &str, bytes: &[u8]) -> Result<(), RecordError>;
}

/// Copyable handle to the configured sinks.
#[derive(Clone, Copy)]
pub struct Diagnostics {
    log: Option<&'static dyn LogSink>,
    records: Option<&'static dyn RecordSink>,
    level: Level,
}

impl Diagnostics {
    /// A handle that discards everything.
    pub const fn silent() -> Self {
        Self {
            log: None,
            records: None,
            level: Level::Info,
        }
    }

    /// Route messages to `sink`.
    pub fn with_log_sink(mut self, sink: &'static dyn LogSink) -> Self {
        self.log = Some(sink);
        self
    }

    /// Route protocol transcripts to `sink`.
    pub fn with_record_sink(mut self, sink: &'static dyn RecordSink) -> Self {
        self.records = Some(sink);
        self
    }

    /// Drop messages below `level`.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Minimum level that is delivered.
    pub fn level(&self) -> Level {
        self.level
    }

    /// Whether a message at `level` would reach any sink.
    pub fn enabled(&self, level: Level) -> bool {
        level >= self.level && (self.log.is_some() || cfg!(feature = "defmt"))
    }

    /// Whether a record sink is attached.
    pub fn records_enabled(&self) -> bool {
        self.records.is_some()
    }

    /// Emit one message. Prefer the `log_*!` macros, which skip formatting
    /// when the level is filtered out.
    pub fn emit(&self, level: Level, component: &str, message: fmt::Arguments<'_>) {
        if level < self.level {
            return;
        }
        if let Some(sink) = self.log {
            sink.log(level, component, message);
        }
        #[cfg(feature = "defmt")]
        mirror_to_defmt(level, component, message);
    }

    /// Append raw bytes to a record stream.
    ///
    /// A failing sink is reported once through the log sink and otherwise
    /// ignored.
    pub fn record(&self, stream: &str, bytes: &[u8]) {
        let Some(sink) = self.records else {
            return;
        };
        if let Err(error) = sink.append_record(stream, bytes) {
            self.emit(
                Level::Warn,
                "diag",
                format_args!("record sink rejected {} bytes on '{}': {:?}", bytes.len(), stream, error),
            );
        }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::silent()
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("log", &self.log.is_some())
            .field("records", &self.records.is_some())
            .field("level", &self.level)
            .finish()
    }
}

#[cfg(feature = "defmt")]
fn mirror_to_defmt(level: Level, component: &str, message: fmt::Arguments<'_>) {
    let mut text: heapless::String<DEFMT_MESSAGE_LEN> = heapless::String::new();
    // Truncated messages are still worth emitting.
    let _ = fmt::write(&mut text, message);
    match level {
        Level::Trace => defmt::trace!("[{=str}] {=str}", component, text.as_str()),
        Level::Debug => defmt::debug!("[{=str}] {=str}", component, text.as_str()),
        Level::Info => defmt::info!("[{=str}] {=str}", component, text.as_str()),
        Level::Warn => defmt::warn!("[{=str}] {=str}", component, text.as_str()),
        Level::Error => defmt::error!("[{=str}] {=str}", component, text.as_str()),
    }
}

macro_rules! log_at {
    ($diag:expr, $level:expr, $component:expr, $($arg:tt)+) => {{
        let diag: &$crate::diag::Diagnostics = &$diag;
        if $level >= diag.level() {
            diag.emit($level, $component, format_args!($($arg)+));
        }
    }};
}

macro_rules! log_trace {
    ($diag:expr, $component:expr, $($arg:tt)+) => {
        log_at!($diag, $crate::diag::Level::Trace, $component, $($arg)+)
    };
}

macro_rules! log_debug {
    ($diag:expr, $component:expr, $($arg:tt)+) => {
        log_at!($diag, $crate::diag::Level::Debug, $component, $($arg)+)
    };
}

macro_rules! log_info {
    ($diag:expr, $component:expr, $($arg:tt)+) => {
        log_at!($diag, $crate::diag::Level::Info, $component, $($arg)+)
    };
}

macro_rules! log_warn {
    ($diag:expr, $component:expr, $($arg:tt)+) => {
        log_at!($diag, $crate::diag::Level::Warn, $component, $($arg)+)
    };
}

macro_rules! log_error {
    ($diag:expr, $component:expr, $($arg:tt)+) => {
        log_at!($diag, $crate::diag::Level::Error, $component, $($arg)+)
    };
}
