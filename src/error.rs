//! Error types for the rig control layer.
//!
//! `RigError` is the single error type returned by every command module, the
//! trigger sequencer and the acquisition sequencer. It is built with
//! `thiserror` so that underlying failures convert cleanly with `?`.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidDeviceLabel`**: a compound `"prefix:axis"` label could not be split.
//!   Fatal to module construction.
//! - **`DeviceCommand`**: the controller answered with the `:N` failure sentinel.
//!   The command was received and rejected, so it is never retried.
//! - **`UnexpectedResponse`**: a reply did not have the expected shape.
//! - **`Transport`**: the channel failed or timed out. This is the only transient
//!   kind and the only one the retry policy acts on.
//! - **`AcquisitionFault`**: any of the above raised while a run was being prepared
//!   or acquired. Carries the sequencer state and the original cause.

use std::fmt;
use thiserror::Error;

use crate::hardware::AutofocusState;

/// Convenience alias for results using the rig error type.
pub type RigResult<T> = std::result::Result<T, RigError>;

/// Controller error codes reported after the `:N` sentinel.
///
/// The Tiger firmware answers a rejected command with `:N-<code>`. Codes that
/// are not in the table decode to [`AsiErrorCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsiErrorCode {
    /// `:N-1` Unknown command
    UnknownCommand,
    /// `:N-2` Unrecognized axis parameter
    UnrecognizedAxis,
    /// `:N-3` Missing parameters
    MissingParameters,
    /// `:N-4` Parameter out of range
    ParameterOutOfRange,
    /// `:N-5` Operation failed
    OperationFailed,
    /// `:N-6` Undefined error
    UndefinedError,
    /// `:N-7` Invalid card address
    InvalidCardAddress,
    /// `:N-21` Serial command halted
    SerialCommandHalted,
    /// Code missing or not in the table
    Unknown,
}

impl AsiErrorCode {
    /// Decode the code that follows `:N` in a reply (`":N-4"` -> `ParameterOutOfRange`).
    pub fn from_reply(reply: &str) -> Self {
        let Some(idx) = reply.find(":N") else {
            return Self::Unknown;
        };
        let digits: String = reply[idx + 2..]
            .trim_start_matches('-')
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        match digits.parse::<u8>() {
            Ok(code) => Self::from_u8(code),
            Err(_) => Self::Unknown,
        }
    }

    /// Map a numeric controller code.
    pub fn from_u8(code: u8) -> Self {
        match code {
            1 => Self::UnknownCommand,
            2 => Self::UnrecognizedAxis,
            3 => Self::MissingParameters,
            4 => Self::ParameterOutOfRange,
            5 => Self::OperationFailed,
            6 => Self::UndefinedError,
            7 => Self::InvalidCardAddress,
            21 => Self::SerialCommandHalted,
            _ => Self::Unknown,
        }
    }

    /// Human-readable meaning of the code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::UnknownCommand => "Unknown command",
            Self::UnrecognizedAxis => "Unrecognized axis parameter",
            Self::MissingParameters => "Missing parameters",
            Self::ParameterOutOfRange => "Parameter out of range",
            Self::OperationFailed => "Operation failed",
            Self::UndefinedError => "Undefined error",
            Self::InvalidCardAddress => "Invalid card address",
            Self::SerialCommandHalted => "Serial command halted",
            Self::Unknown => "Unknown error",
        }
    }
}

impl fmt::Display for AsiErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Primary error type for the rig.
#[derive(Error, Debug)]
pub enum RigError {
    /// A compound device label had no `:` delimiter or an empty half.
    ///
    /// **Error Type**: Permanent - fix the label in the hardware constants.
    #[error("Invalid device label '{label}': expected 'prefix:axis'")]
    InvalidDeviceLabel { label: String },

    /// The controller rejected a command with the `:N` failure sentinel.
    ///
    /// **Error Type**: Permanent for this command. The bus is healthy, the
    /// firmware refused the request.
    ///
    /// **Recovery Strategy**: Never retried. Surface to the caller.
    #[error("Command '{command}' rejected by controller ({code}): '{reply}'")]
    DeviceCommand {
        command: String,
        reply: String,
        code: AsiErrorCode,
    },

    /// A reply did not match the expected `tag=value` or numeric shape.
    #[error("Unexpected response for '{parameter}': '{raw}'")]
    UnexpectedResponse { parameter: String, raw: String },

    /// The underlying channel failed or timed out.
    ///
    /// **Error Type**: Transient.
    ///
    /// **Recovery Strategy**: Bounded retry with backoff, see
    /// [`crate::error_recovery::RetryPolicy`].
    #[error("Transport error on '{device}': {message}")]
    Transport { device: String, message: String },

    /// A caller passed a value outside the range the firmware accepts.
    #[error("Invalid parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },

    /// The acquisition sequencer received an event it cannot handle in its
    /// current state.
    #[error("Cannot {event} while {state}")]
    InvalidTransition { state: String, event: String },

    /// The autofocus loop did not reach the expected state in time.
    #[error("Autofocus did not reach {expected} (last observed {last})")]
    FocusTimeout {
        expected: AutofocusState,
        last: AutofocusState,
    },

    /// Configuration values failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A run failed while preparing or acquiring. Cleanup has already run
    /// when this is returned.
    #[error("Acquisition fault while {state}: {source}")]
    AcquisitionFault {
        state: String,
        #[source]
        source: Box<RigError>,
    },
}

impl RigError {
    pub(crate) fn transport(device: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Transport {
            device: device.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn unexpected(parameter: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            parameter: parameter.into(),
            raw: raw.into(),
        }
    }

    pub(crate) fn invalid_parameter(name: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_controller_error_codes() {
        assert_eq!(AsiErrorCode::from_reply(":N-1"), AsiErrorCode::UnknownCommand);
        assert_eq!(AsiErrorCode::from_reply(" :N-4\r"), AsiErrorCode::ParameterOutOfRange);
        assert_eq!(AsiErrorCode::from_reply(":N-21"), AsiErrorCode::SerialCommandHalted);
        assert_eq!(AsiErrorCode::from_reply(":N"), AsiErrorCode::Unknown);
        assert_eq!(AsiErrorCode::from_reply(":N-99"), AsiErrorCode::Unknown);
        assert_eq!(AsiErrorCode::from_reply(":A"), AsiErrorCode::Unknown);
    }

    #[test]
    fn only_transport_errors_are_transient() {
        assert!(RigError::transport("hub", "timed out").is_transient());
        let rejected = RigError::DeviceCommand {
            command: "ZS S=1".into(),
            reply: ":N-5".into(),
            code: AsiErrorCode::OperationFailed,
        };
        assert!(!rejected.is_transient());
        assert!(!RigError::unexpected("X", "garbage").is_transient());
    }

    #[test]
    fn fault_message_includes_cause() {
        let err = RigError::AcquisitionFault {
            state: "preparing".into(),
            source: Box::new(RigError::transport("TigerCommHub", "read timeout")),
        };
        let text = err.to_string();
        assert!(text.contains("preparing"));
        assert!(text.contains("read timeout"));
    }
}
