//! Errors of the modem integration layer

use crate::network::error::{EngineError, Recovery};

/// Errors produced while bringing up or querying the modem.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum IntegrationError {
    /// The modem did not answer the responsiveness probe.
    NotResponding,
    /// A bring-up command failed or the network refused registration within
    /// the retry budget.
    RegistrationFailed,
    /// The packet data bearer could not be attached or activated.
    BearerActivationFailed,
    /// The command channel failed.
    ChannelLost,
    /// Provisioning settings are malformed or contain characters the modem
    /// cannot take.
    InvalidSettings,
    /// A device query was rejected or its answer could not be parsed.
    QueryFailed,
}

impl IntegrationError {
    pub fn recovery(&self) -> Recovery {
        match self {
            IntegrationError::ChannelLost | IntegrationError::InvalidSettings => Recovery::Fatal,
            IntegrationError::NotResponding
            | IntegrationError::RegistrationFailed
            | IntegrationError::BearerActivationFailed
            | IntegrationError::QueryFailed => Recovery::Retry,
        }
    }
}

impl From<EngineError> for IntegrationError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::ChannelLost => IntegrationError::ChannelLost,
            EngineError::CommandTooLong => IntegrationError::InvalidSettings,
            EngineError::Busy
            | EngineError::Timeout
            | EngineError::Cancelled
            | EngineError::Rejected(_)
            | EngineError::ListenersExhausted => IntegrationError::QueryFailed,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for IntegrationError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            IntegrationError::NotResponding => defmt::write!(f, "NotResponding"),
            IntegrationError::RegistrationFailed => defmt::write!(f, "RegistrationFailed"),
            IntegrationError::BearerActivationFailed => defmt::write!(f, "BearerActivationFailed"),
            IntegrationError::ChannelLost => defmt::write!(f, "ChannelLost"),
            IntegrationError::InvalidSettings => defmt::write!(f, "InvalidSettings"),
            IntegrationError::QueryFailed => defmt::write!(f, "QueryFailed"),
        }
    }
}
