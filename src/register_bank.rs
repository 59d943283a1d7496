//! Ready-made backing store for slave applications.
//!
//! [`RegisterBank`] implements [`SlaveDevice`] with a flat register file
//! serving both holding (0x03/0x10) and input (0x04) accesses, plus a pair
//! of packet FIFOs for the custom 0x64/0x65 opcodes. Applications with
//! richer needs (sparse maps, live sensor values, access control) implement
//! [`SlaveDevice`] themselves.

#[cfg(feature = "data-packet")]
use std::collections::VecDeque;

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::ModbusException;
use crate::slave::SlaveDevice;
#[cfg(feature = "data-packet")]
use crate::MAX_PACKET_SIZE;

/// Default register file size
const DEFAULT_REGISTERS_SIZE: usize = 10000;

/// Flat register file with packet FIFOs
#[derive(Debug, Clone)]
pub struct RegisterBank {
    registers: Vec<u16>,
    /// Packets queued for the master to collect via 0x64
    #[cfg(feature = "data-packet")]
    outgoing: VecDeque<Vec<u8>>,
    /// Packets stored by the master via 0x65
    #[cfg(feature = "data-packet")]
    incoming: VecDeque<Vec<u8>>,
}

impl RegisterBank {
    /// Create a bank with the default register file size
    pub fn new() -> Self {
        Self::with_size(DEFAULT_REGISTERS_SIZE)
    }

    /// Create a bank serving register addresses `0..size`
    pub fn with_size(size: usize) -> Self {
        Self {
            registers: vec![0; size],
            #[cfg(feature = "data-packet")]
            outgoing: VecDeque::new(),
            #[cfg(feature = "data-packet")]
            incoming: VecDeque::new(),
        }
    }

    /// Number of registers served
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Host-side register read
    pub fn get(&self, address: u16) -> ModbusResult<u16> {
        self.registers
            .get(address as usize)
            .copied()
            .ok_or_else(|| {
                ModbusError::invalid_params(format!("register {:#06X} out of range", address))
            })
    }

    /// Host-side register write
    pub fn set(&mut self, address: u16, value: u16) -> ModbusResult<()> {
        match self.registers.get_mut(address as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ModbusError::invalid_params(format!(
                "register {:#06X} out of range",
                address
            ))),
        }
    }

    /// Queue a packet for the master to collect with 0x64. Packets are
    /// served in queueing order, one per request.
    #[cfg(feature = "data-packet")]
    pub fn queue_packet(&mut self, data: &[u8]) -> ModbusResult<()> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(ModbusError::invalid_params(format!(
                "packet of {} bytes exceeds the {}-byte limit",
                data.len(),
                MAX_PACKET_SIZE
            )));
        }
        self.outgoing.push_back(data.to_vec());
        Ok(())
    }

    /// Take the oldest packet the master stored with 0x65
    #[cfg(feature = "data-packet")]
    pub fn take_packet(&mut self) -> Option<Vec<u8>> {
        self.incoming.pop_front()
    }

    /// Packets waiting to be collected by the master
    #[cfg(feature = "data-packet")]
    pub fn outgoing_count(&self) -> usize {
        self.outgoing.len()
    }

    /// Packets stored by the master and not yet taken by the host
    #[cfg(feature = "data-packet")]
    pub fn incoming_count(&self) -> usize {
        self.incoming.len()
    }
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

impl SlaveDevice for RegisterBank {
    fn read_register(&mut self, address: u16) -> Result<u16, ModbusException> {
        self.registers
            .get(address as usize)
            .copied()
            .ok_or(ModbusException::IllegalAddress)
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<(), ModbusException> {
        match self.registers.get_mut(address as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ModbusException::IllegalAddress),
        }
    }

    /// Serve the oldest queued packet; an empty FIFO answers a zero-length
    /// packet.
    #[cfg(feature = "data-packet")]
    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, ModbusException> {
        match self.outgoing.pop_front() {
            Some(packet) => {
                if packet.len() > buf.len() {
                    return Err(ModbusException::DeviceFault);
                }
                buf[..packet.len()].copy_from_slice(&packet);
                Ok(packet.len())
            }
            None => Ok(0),
        }
    }

    #[cfg(feature = "data-packet")]
    fn write_packet(&mut self, data: &[u8]) -> Result<(), ModbusException> {
        self.incoming.push_back(data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_access() {
        let mut bank = RegisterBank::with_size(16);
        bank.set(5, 0xABCD).unwrap();
        assert_eq!(bank.get(5).unwrap(), 0xABCD);
        assert!(bank.get(16).is_err());
        assert!(bank.set(16, 0).is_err());
    }

    #[test]
    fn test_device_bounds() {
        let mut bank = RegisterBank::with_size(4);
        assert_eq!(bank.read_register(3), Ok(0));
        assert_eq!(bank.read_register(4), Err(ModbusException::IllegalAddress));
        assert_eq!(
            bank.write_register(4, 1),
            Err(ModbusException::IllegalAddress)
        );
    }

    #[cfg(feature = "data-packet")]
    #[test]
    fn test_packet_fifo_order() {
        let mut bank = RegisterBank::with_size(1);
        bank.queue_packet(&[1, 2, 3]).unwrap();
        bank.queue_packet(&[4]).unwrap();

        let mut buf = [0u8; MAX_PACKET_SIZE];
        assert_eq!(bank.read_packet(&mut buf), Ok(3));
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(bank.read_packet(&mut buf), Ok(1));
        assert_eq!(buf[0], 4);
        // drained: zero-length packet
        assert_eq!(bank.read_packet(&mut buf), Ok(0));
    }

    #[cfg(feature = "data-packet")]
    #[test]
    fn test_oversized_packet_refused() {
        let mut bank = RegisterBank::with_size(1);
        assert!(bank.queue_packet(&[0u8; MAX_PACKET_SIZE + 1]).is_err());
        assert!(bank.queue_packet(&[0u8; MAX_PACKET_SIZE]).is_ok());
    }

    #[cfg(feature = "data-packet")]
    #[test]
    fn test_incoming_packets() {
        let mut bank = RegisterBank::with_size(1);
        bank.write_packet(&[0xDE, 0xAD]).unwrap();
        assert_eq!(bank.incoming_count(), 1);
        assert_eq!(bank.take_packet(), Some(vec![0xDE, 0xAD]));
        assert_eq!(bank.take_packet(), None);
    }
}
