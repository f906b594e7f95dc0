//! Error types for the temperature controller link

use std::time::Duration;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the transport, the protocol engine and the command façade
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port could not be opened or configured
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error on the link
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sensor type outside of the allowed set, raised before any byte is sent
    #[error("Invalid sensor type '{0}'")]
    InvalidSensorType(char),

    /// Channel index outside of 0..=3
    #[error("Invalid channel {0}")]
    InvalidChannel(u8),

    /// Argument or configuration value the device cannot represent
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Connection was closed
    #[error("Connection closed")]
    Closed,

    /// Command issued before the setup handshake completed
    #[error("Device is not calibrated yet")]
    NotCalibrated,

    /// Device never produced the calibration sentinel within the budget
    #[error("Handshake did not complete after {elapsed:?}")]
    HandshakeTimeout {
        /// Time spent waiting for the device
        elapsed: Duration,
    },

    /// No reply within the read timeout
    #[error("No reply from device")]
    Timeout,

    /// Reply with unexpected arity or non-numeric parameters
    #[error("Malformed reply {raw:?}: expected {expected}")]
    MalformedReply {
        /// Reply line as received
        raw: String,
        /// Description of the expected shape
        expected: &'static str,
    },
}
