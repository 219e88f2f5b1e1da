//! Local sensor seam used by sensor-role nodes to answer polls.

use agromesh_core::wire::{err_code, DATA_LEN};

/// Typed failure of a sensor read. Each maps to the code carried in an
/// `ErrorResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SensorError {
    #[error("no RS485 connection to sensor")]
    NoRs485Connection,
    #[error("sensor reading out of bounds")]
    OutOfBounds,
    #[error("sensor fault 0x{0:02x}")]
    Other(u8),
}

impl SensorError {
    /// Wire error code for this failure.
    pub fn code(self) -> u8 {
        match self {
            SensorError::NoRs485Connection => err_code::NO_RS485_CONNECTION,
            SensorError::OutOfBounds => err_code::READING_OUT_OF_BOUNDS,
            SensorError::Other(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            err_code::NO_RS485_CONNECTION => SensorError::NoRs485Connection,
            err_code::READING_OUT_OF_BOUNDS => SensorError::OutOfBounds,
            other => SensorError::Other(other),
        }
    }
}

/// The physical sensor interface.
pub trait SensorDriver: Send {
    /// Take one reading.
    fn read(&mut self) -> Result<[u8; DATA_LEN], SensorError>;
}
