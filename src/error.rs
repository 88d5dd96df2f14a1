//! Error types for the ble-central-session crate.

use thiserror::Error;
use uuid::Uuid;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter is present on this system.
    #[error("Bluetooth not available")]
    BluetoothUnavailable,

    /// The adapter is not powered on, so the request cannot be issued.
    #[error("Adapter not ready: {state}")]
    AdapterNotReady {
        /// Adapter state at the time of the request.
        state: crate::ble::adapter::AdapterState,
    },

    /// The peripheral was not discovered during the current scan.
    #[error("Unknown peripheral: {identifier}")]
    UnknownPeripheral {
        /// The identifier that was looked up.
        identifier: String,
    },

    /// The peripheral was only seen below the minimum signal strength.
    #[error("Signal too weak for {identifier}: {rssi} dBm (minimum {min_rssi} dBm)")]
    SignalTooWeak {
        /// The peripheral identifier.
        identifier: String,
        /// Last observed signal strength.
        rssi: i16,
        /// Configured minimum.
        min_rssi: i16,
    },

    /// Operation requires a subscribed session.
    #[error("Not connected")]
    NotConnected,

    /// The session has no characteristic to address.
    #[error("No characteristic available")]
    NoCharacteristic,

    /// A specific characteristic was requested but is not part of the session.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: Uuid,
    },

    /// The platform failed to establish the connection.
    #[error("Connection failed: {reason}")]
    ConnectFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// A notification payload was not valid UTF-8.
    #[error("Malformed payload from {characteristic}: {len} bytes")]
    MalformedPayload {
        /// Characteristic the payload arrived on.
        characteristic: Uuid,
        /// Payload length.
        len: usize,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A failure that ended the active session.
///
/// These happen inside platform callbacks, so they reach consumers as events
/// rather than as a returned [`Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionFailure {
    /// The platform could not connect to the peripheral.
    ConnectFailed {
        /// Peripheral the connection was attempted to.
        peripheral: String,
        /// Platform-supplied reason.
        reason: String,
    },
    /// A notification could not be decoded as UTF-8 text.
    MalformedPayload {
        /// Characteristic the payload arrived on.
        characteristic: Uuid,
        /// Payload length.
        len: usize,
    },
    /// The platform reported an error while delivering a value.
    NotificationFailed {
        /// Characteristic the error was reported for.
        characteristic: Uuid,
        /// Platform-supplied reason.
        reason: String,
    },
}

impl From<SessionFailure> for Error {
    fn from(failure: SessionFailure) -> Self {
        match failure {
            SessionFailure::ConnectFailed { reason, .. } => Error::ConnectFailed { reason },
            SessionFailure::MalformedPayload {
                characteristic,
                len,
            } => Error::MalformedPayload {
                characteristic,
                len,
            },
            SessionFailure::NotificationFailed {
                characteristic,
                reason,
            } => Error::Internal(format!(
                "notification on {} failed: {}",
                characteristic, reason
            )),
        }
    }
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectFailed { peripheral, reason } => {
                write!(f, "connection to {} failed: {}", peripheral, reason)
            }
            Self::MalformedPayload {
                characteristic,
                len,
            } => write!(f, "malformed {}-byte payload on {}", len, characteristic),
            Self::NotificationFailed {
                characteristic,
                reason,
            } => write!(f, "notification on {} failed: {}", characteristic, reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_converts_to_error() {
        let err: Error = SessionFailure::ConnectFailed {
            peripheral: "p1".to_string(),
            reason: "timeout".to_string(),
        }
        .into();
        assert!(matches!(err, Error::ConnectFailed { ref reason } if reason == "timeout"));

        let err: Error = SessionFailure::MalformedPayload {
            characteristic: Uuid::nil(),
            len: 3,
        }
        .into();
        assert!(matches!(err, Error::MalformedPayload { len: 3, .. }));
    }

    #[test]
    fn test_error_display() {
        let err = Error::SignalTooWeak {
            identifier: "p1".to_string(),
            rssi: -105,
            min_rssi: -100,
        };
        assert_eq!(
            err.to_string(),
            "Signal too weak for p1: -105 dBm (minimum -100 dBm)"
        );
        assert_eq!(Error::NoCharacteristic.to_string(), "No characteristic available");
    }
}
