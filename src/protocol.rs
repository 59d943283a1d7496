//! Wire-level protocol definitions.
//!
//! The RTU ADU layout is
//!
//! ```text
//! [addr:1][fc:1][pdu:0..252][crc_lo:1][crc_hi:1]
//! ```
//!
//! with everything big-endian except the trailing CRC pair, which is
//! little-endian (low byte first) per the Modbus specification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Modbus register address type
pub type RegisterAddress = u16;

/// Modbus register value type (16-bit, big-endian on the wire)
pub type RegisterValue = u16;

/// Modbus slave/unit identifier (1-247; 0 is broadcast)
pub type SlaveId = u8;

/// Function codes understood by the engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Diagnostic echo, subfunction 0 only (0x08)
    Diagnostic = 0x08,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
    /// Read Data Packet, custom opcode (0x64)
    #[cfg(feature = "data-packet")]
    ReadDataPacket = 0x64,
    /// Write Data Packet, custom opcode (0x65)
    #[cfg(feature = "data-packet")]
    WriteDataPacket = 0x65,
}

impl FunctionCode {
    /// Decode a function byte. Returns `None` for codes the stack does not
    /// implement; the slave answers those with ILLEGAL_OPCODE.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x03 => Some(FunctionCode::ReadHoldingRegisters),
            0x04 => Some(FunctionCode::ReadInputRegisters),
            0x08 => Some(FunctionCode::Diagnostic),
            0x10 => Some(FunctionCode::WriteMultipleRegisters),
            #[cfg(feature = "data-packet")]
            0x64 => Some(FunctionCode::ReadDataPacket),
            #[cfg(feature = "data-packet")]
            0x65 => Some(FunctionCode::WriteDataPacket),
            _ => None,
        }
    }

    /// Convert to the wire byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a register read (0x03/0x04)
    pub fn is_register_read(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters
        )
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FunctionCode::ReadHoldingRegisters => "Read Holding Registers",
            FunctionCode::ReadInputRegisters => "Read Input Registers",
            FunctionCode::Diagnostic => "Diagnostic",
            FunctionCode::WriteMultipleRegisters => "Write Multiple Registers",
            #[cfg(feature = "data-packet")]
            FunctionCode::ReadDataPacket => "Read Data Packet",
            #[cfg(feature = "data-packet")]
            FunctionCode::WriteDataPacket => "Write Data Packet",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Exception codes carried in exception responses.
///
/// Values are fixed by the wire format: the exception response is the request
/// function byte with the high bit set, followed by one of these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusException {
    /// The function code is not supported by the slave
    IllegalOpcode = 0x01,
    /// The register range falls outside the slave's address space
    IllegalAddress = 0x02,
    /// A field in the request PDU violates its shape constraints
    IllegalValue = 0x03,
    /// The slave failed internally while producing the answer
    DeviceFault = 0x04,
}

impl ModbusException {
    /// Decode an exception byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalOpcode),
            0x02 => Some(ModbusException::IllegalAddress),
            0x03 => Some(ModbusException::IllegalValue),
            0x04 => Some(ModbusException::DeviceFault),
            _ => None,
        }
    }

    /// Convert to the wire byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get a human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ModbusException::IllegalOpcode => "function code not supported",
            ModbusException::IllegalAddress => "register address out of range",
            ModbusException::IllegalValue => "request field out of range",
            ModbusException::DeviceFault => "device failed to perform the request",
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exception 0x{:02X}: {}", self.to_u8(), self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_code_conversion() {
        assert_eq!(
            FunctionCode::from_u8(0x03),
            Some(FunctionCode::ReadHoldingRegisters)
        );
        assert_eq!(FunctionCode::ReadHoldingRegisters.to_u8(), 0x03);
        assert_eq!(FunctionCode::from_u8(0x05), None);
        assert_eq!(FunctionCode::from_u8(0xFF), None);
    }

    #[cfg(feature = "data-packet")]
    #[test]
    fn test_custom_opcodes() {
        assert_eq!(FunctionCode::from_u8(0x64), Some(FunctionCode::ReadDataPacket));
        assert_eq!(FunctionCode::from_u8(0x65), Some(FunctionCode::WriteDataPacket));
    }

    #[test]
    fn test_exception_conversion() {
        assert_eq!(
            ModbusException::from_u8(0x02),
            Some(ModbusException::IllegalAddress)
        );
        assert_eq!(ModbusException::IllegalAddress.to_u8(), 0x02);
        assert_eq!(ModbusException::from_u8(0x05), None);
    }

    #[test]
    fn test_register_read_predicate() {
        assert!(FunctionCode::ReadHoldingRegisters.is_register_read());
        assert!(FunctionCode::ReadInputRegisters.is_register_read());
        assert!(!FunctionCode::WriteMultipleRegisters.is_register_read());
    }
}
