//! Error handling for the RTU stack.
//!
//! Faults are split by layer, following the recovery story of the engines:
//!
//! - **Caller misuse** ([`ModbusError::Busy`], [`ModbusError::InvalidParams`],
//!   [`ModbusError::Config`]): rejected before anything touches the wire.
//! - **Hardware** ([`ModbusError::Hardware`]): a link callback refused to
//!   start a transmission or arm the receiver.
//! - **Wire** ([`ModbusError::Frame`], [`ModbusError::CrcMismatch`]): a frame
//!   was received but discarded; the slave stays silent, the master reports a
//!   corrupted transaction.
//! - **Peer-reported** ([`ModbusError::Exception`]): the request was rejected
//!   with a Modbus exception response.
//!
//! All terminal conditions self-clear: the engines return to standby on the
//! same tick that reports the fault, so the caller may retry immediately.

use thiserror::Error;

/// Result type alias for all stack operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Fault conditions surfaced by the master and slave engines
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModbusError {
    /// A master request was issued while a transaction is still in flight
    #[error("engine busy, transaction in flight")]
    Busy,

    /// Request parameters out of range (register count, packet length)
    #[error("invalid parameters: {message}")]
    InvalidParams { message: String },

    /// Invalid stack configuration detected at construction
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A link callback reported a hardware fault
    #[error("hardware error: {message}")]
    Hardware { message: String },

    /// Frame structure violation: too short, too long, malformed PDU
    #[error("frame error: {message}")]
    Frame { message: String },

    /// The trailing CRC pair did not match the computed checksum
    #[error("CRC mismatch: expected={expected:04X}, actual={actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// The request was answered with a Modbus exception
    #[error("exception response: function={function:02X}, code={code:02X}")]
    Exception { function: u8, code: u8 },
}

impl ModbusError {
    /// Create an invalid-parameters error
    pub fn invalid_params<S: Into<String>>(message: S) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a hardware error
    pub fn hardware<S: Into<String>>(message: S) -> Self {
        Self::Hardware {
            message: message.into(),
        }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    /// Create a CRC mismatch error
    pub fn crc_mismatch(expected: u16, actual: u16) -> Self {
        Self::CrcMismatch { expected, actual }
    }

    /// Create an exception-response error
    pub fn exception(function: u8, code: u8) -> Self {
        Self::Exception { function, code }
    }

    /// Check if the error came from the wire rather than from this host.
    ///
    /// Protocol errors indicate line noise, a misbehaving peer, or an
    /// address clash; they are worth logging but carry no local state.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Frame { .. } | Self::CrcMismatch { .. } | Self::Exception { .. }
        )
    }

    /// Check if the failed operation may be retried as-is.
    ///
    /// `Busy` clears once the in-flight transaction terminates; wire errors
    /// clear on the next request. Parameter and configuration errors are
    /// permanent until the caller changes its inputs.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidParams { .. } | Self::Config { .. })
    }
}
