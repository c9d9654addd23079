//! Error types for the transport layers
//!
//! Each layer has its own error enum. Lower-layer errors are translated into
//! the upper layer's vocabulary at the boundary; only the HTTP client keeps the
//! socket failure that caused a transport error.

use super::at::ErrorCode;

/// What a caller can usefully do after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The operation failed but the stack is intact; retrying is safe.
    Retry,
    /// The underlying link or configuration is unusable until re-initialized.
    Fatal,
}

/// Errors produced by the AT command engine.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EngineError {
    /// The command channel failed; every outstanding command completed as a timeout.
    ChannelLost,
    /// The command queue is full.
    Busy,
    /// No final result arrived before the command's deadline.
    Timeout,
    /// The caller cancelled the command; the engine is resynchronizing.
    Cancelled,
    /// The modem answered with an error final result.
    Rejected(ErrorCode),
    /// No notification listener slot is free.
    ListenersExhausted,
    /// The formatted command does not fit the command buffer.
    CommandTooLong,
}

impl EngineError {
    pub fn recovery(&self) -> Recovery {
        match self {
            EngineError::ChannelLost | EngineError::ListenersExhausted | EngineError::CommandTooLong => {
                Recovery::Fatal
            }
            EngineError::Busy | EngineError::Timeout | EngineError::Cancelled | EngineError::Rejected(_) => {
                Recovery::Retry
            }
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for EngineError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            EngineError::ChannelLost => defmt::write!(f, "ChannelLost"),
            EngineError::Busy => defmt::write!(f, "Busy"),
            EngineError::Timeout => defmt::write!(f, "Timeout"),
            EngineError::Cancelled => defmt::write!(f, "Cancelled"),
            EngineError::Rejected(code) => defmt::write!(f, "Rejected({})", code),
            EngineError::ListenersExhausted => defmt::write!(f, "ListenersExhausted"),
            EngineError::CommandTooLong => defmt::write!(f, "CommandTooLong"),
        }
    }
}

/// Why a socket could not be opened.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OpenFailure {
    /// The modem refused to create or connect the socket.
    Rejected(ErrorCode),
    /// Socket creation or connection did not complete in time.
    Timeout,
    /// The remote end closed the connection while it was being established.
    Refused,
    /// The modem reused an identifier whose previous socket is still closing.
    IdCollision,
    /// The modem's reply could not be understood.
    BadResponse,
}

/// Errors produced by the socket layer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SocketError {
    /// Opening the socket failed.
    OpenFailed(OpenFailure),
    /// Every logical socket slot is in use.
    NoSlots,
    /// The handle does not refer to an open socket.
    NotConnected,
    /// The remote end closed the connection and all buffered data was consumed.
    RemoteClosed,
    /// A modem command timed out.
    Timeout,
    /// The command engine queue is full.
    Busy,
    /// The caller cancelled the operation.
    Cancelled,
    /// The command channel failed.
    ChannelLost,
    /// The modem refused a send or receive.
    Rejected(ErrorCode),
    /// Host, port or payload outside what the modem accepts.
    InvalidArgument,
}

impl SocketError {
    pub fn recovery(&self) -> Recovery {
        match self {
            SocketError::ChannelLost | SocketError::InvalidArgument => Recovery::Fatal,
            SocketError::OpenFailed(_)
            | SocketError::NoSlots
            | SocketError::NotConnected
            | SocketError::RemoteClosed
            | SocketError::Timeout
            | SocketError::Busy
            | SocketError::Cancelled
            | SocketError::Rejected(_) => Recovery::Retry,
        }
    }
}

impl From<EngineError> for SocketError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::ChannelLost => SocketError::ChannelLost,
            EngineError::Busy | EngineError::ListenersExhausted => SocketError::Busy,
            EngineError::Timeout => SocketError::Timeout,
            EngineError::Cancelled => SocketError::Cancelled,
            EngineError::Rejected(code) => SocketError::Rejected(code),
            EngineError::CommandTooLong => SocketError::InvalidArgument,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for OpenFailure {
    fn format(&self, f: defmt::Formatter) {
        match self {
            OpenFailure::Rejected(code) => defmt::write!(f, "Rejected({})", code),
            OpenFailure::Timeout => defmt::write!(f, "Timeout"),
            OpenFailure::Refused => defmt::write!(f, "Refused"),
            OpenFailure::IdCollision => defmt::write!(f, "IdCollision"),
            OpenFailure::BadResponse => defmt::write!(f, "BadResponse"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for SocketError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            SocketError::OpenFailed(reason) => defmt::write!(f, "OpenFailed({})", reason),
            SocketError::NoSlots => defmt::write!(f, "NoSlots"),
            SocketError::NotConnected => defmt::write!(f, "NotConnected"),
            SocketError::RemoteClosed => defmt::write!(f, "RemoteClosed"),
            SocketError::Timeout => defmt::write!(f, "Timeout"),
            SocketError::Busy => defmt::write!(f, "Busy"),
            SocketError::Cancelled => defmt::write!(f, "Cancelled"),
            SocketError::ChannelLost => defmt::write!(f, "ChannelLost"),
            SocketError::Rejected(code) => defmt::write!(f, "Rejected({})", code),
            SocketError::InvalidArgument => defmt::write!(f, "InvalidArgument"),
        }
    }
}

/// Errors produced by the HTTP client.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum HttpError {
    /// The response violated HTTP/1.1 framing.
    ProtocolError,
    /// The underlying socket failed.
    Transport(SocketError),
    /// The response body exceeds the configured limit.
    BodyTooLarge,
    /// The caller cancelled the exchange.
    Cancelled,
    /// The URL could not be parsed or uses an unsupported scheme.
    InvalidUrl,
    /// The request head or JSON body does not fit its buffer.
    RequestTooLarge,
}

impl HttpError {
    pub fn recovery(&self) -> Recovery {
        match self {
            HttpError::Transport(error) => error.recovery(),
            HttpError::ProtocolError | HttpError::Cancelled => Recovery::Retry,
            HttpError::BodyTooLarge | HttpError::InvalidUrl | HttpError::RequestTooLarge => Recovery::Fatal,
        }
    }
}

impl From<SocketError> for HttpError {
    fn from(error: SocketError) -> Self {
        match error {
            SocketError::Cancelled => HttpError::Cancelled,
            other => HttpError::Transport(other),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for HttpError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            HttpError::ProtocolError => defmt::write!(f, "ProtocolError"),
            HttpError::Transport(error) => defmt::write!(f, "Transport({})", error),
            HttpError::BodyTooLarge => defmt::write!(f, "BodyTooLarge"),
            HttpError::Cancelled => defmt::write!(f, "Cancelled"),
            HttpError::InvalidUrl => defmt::write!(f, "InvalidUrl"),
            HttpError::RequestTooLarge => defmt::write!(f, "RequestTooLarge"),
        }
    }
}
