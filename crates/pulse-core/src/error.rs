//! Error types for pulse-core.
//!
//! This module defines all error types that can occur while acquiring and
//! monitoring a heart rate peripheral.
//!
//! # Propagation Policy
//!
//! Discovery, connection, and subscription errors abort the whole
//! acquisition and surface to the caller as one of the variants below.
//! Per-frame decode errors never reach this type: a malformed notification
//! is logged and dropped inside the session without ending the stream.
//!
//! The three acquisition failures are deliberately distinct because each
//! implies a different remediation:
//!
//! | Error | Meaning | Remediation |
//! |-------|---------|-------------|
//! | [`Error::DeviceNotFound`] | No peripheral advertises the service | Wake the sensor, move closer |
//! | [`Error::ConnectionFailed`] | Found the device but could not keep a link | Check for a competing central |
//! | [`Error::CharacteristicNotFound`] | Connected but the characteristic is absent | Wrong UUID or firmware |

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when communicating with a heart rate peripheral.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy transport error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No device advertising the target service was found.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// A device was found but a usable connection could not be established
    /// or kept.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// The device identifier that failed to connect, when known.
        device_id: Option<String>,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// The target characteristic is absent after service resolution.
    #[error("Characteristic not found: {uuid} on device {device_id}")]
    CharacteristicNotFound {
        /// The device that was searched.
        device_id: String,
        /// The UUID that was not found.
        uuid: String,
    },

}

/// Reason why a device was not found.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// No Bluetooth adapter available on this host.
    NoAdapter,
    /// No peripheral advertising the service after exhausting the
    /// discovery retry budget.
    NoMatch {
        /// The service UUID that was searched for.
        service: String,
        /// Number of discovery scans performed.
        scans: u32,
    },
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
            Self::NoMatch { service, scans } => write!(
                f,
                "no device advertising service {} after {} scan(s)",
                service, scans
            ),
        }
    }
}

/// Structured reasons for connection failures.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// All connection attempts were exhausted.
    AttemptsExhausted {
        /// Number of attempts made.
        attempts: u32,
    },
    /// The device disconnected while the connection was in use.
    LinkLost,
    /// The device stayed connected but never resolved its services within
    /// the configured bound.
    ResolveTimeout {
        /// The timeout that elapsed.
        duration: Duration,
    },
    /// Generic BLE error.
    BleError(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AttemptsExhausted { attempts } => {
                write!(f, "all {} connection attempt(s) failed", attempts)
            }
            Self::LinkLost => write!(f, "device disconnected"),
            Self::ResolveTimeout { duration } => {
                write!(f, "services not resolved within {:?}", duration)
            }
            Self::BleError(msg) => write!(f, "BLE error: {}", msg),
        }
    }
}

impl Error {
    /// Create a device not found error for a service UUID search.
    pub fn no_match(service: impl Into<String>, scans: u32) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NoMatch {
            service: service.into(),
            scans,
        })
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(device_id: Option<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed { device_id, reason }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(
        device_id: impl Into<String>,
        uuid: impl Into<String>,
    ) -> Self {
        Self::CharacteristicNotFound {
            device_id: device_id.into(),
            uuid: uuid.into(),
        }
    }
}

/// Result type alias using pulse-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::no_match("0000180d-0000-1000-8000-00805f9b34fb", 3);
        assert!(err.to_string().contains("0000180d"));
        assert!(err.to_string().contains("3 scan(s)"));

        let err = Error::connection_failed(
            Some("AA:BB:CC:DD:EE:FF".into()),
            ConnectionFailureReason::AttemptsExhausted { attempts: 2 },
        );
        assert!(err.to_string().contains("2 connection attempt(s)"));

        let err = Error::characteristic_not_found("AA:BB:CC:DD:EE:FF", "00002a37");
        assert!(err.to_string().contains("00002a37"));
        assert!(err.to_string().contains("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_failure_reason_display() {
        let reason = ConnectionFailureReason::LinkLost;
        assert_eq!(reason.to_string(), "device disconnected");

        let reason = ConnectionFailureReason::ResolveTimeout {
            duration: Duration::from_secs(30),
        };
        assert!(reason.to_string().contains("30s"));
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }
}
