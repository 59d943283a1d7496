//! Slave engine: listens for requests addressed to this station, dispatches
//! them against the backing store, and answers with a response or an
//! exception frame.
//!
//! The engine is a five-state machine driven from two sides:
//!
//! ```text
//!        tick: arm receiver           ISR: rx_done
//! STANDBY ────────────► RECEIVING ────────────► RECEIVED
//!    ▲                      │ ISR: rx_error        │ tick: parse
//!    │                      ▼                      ▼
//!    │◄──────────────── STANDBY               PROCESSING
//!    │                                            │ dispatch + build answer
//!    │        ISR: tx_done                        ▼
//!    └─────────────────────────────────── TRANSMITTING
//! ```
//!
//! [`ModbusSlave::check`] runs in main context and performs all parsing and
//! all [`SlaveDevice`] callbacks. The three event methods ([`rx_done`],
//! [`rx_error`], [`tx_done`]) are safe to call from an interrupt handler:
//! they only move the state word and copy bytes, and they ignore events that
//! arrive in a state that is not armed for them.
//!
//! [`rx_done`]: ModbusSlave::rx_done
//! [`rx_error`]: ModbusSlave::rx_error
//! [`tx_done`]: ModbusSlave::tx_done

use std::sync::atomic::{AtomicU8, Ordering};

use log::{debug, trace, warn};

use crate::error::{ModbusError, ModbusResult};
use crate::frame::FrameBuffer;
use crate::protocol::{FunctionCode, ModbusException, RegisterAddress, RegisterValue, SlaveId};
use crate::{
    ADU_BUFFER_SIZE, BROADCAST_ADDRESS, MAX_READ_REGISTERS, MAX_SLAVE_ADDRESS,
    MAX_WRITE_REGISTERS,
};
#[cfg(feature = "data-packet")]
use crate::MAX_PACKET_SIZE;

/// Physical transmit side of the slave: how answers leave the station and
/// how the receiver is armed for the next request.
///
/// Both methods are invoked from main context only (inside
/// [`ModbusSlave::check`]). On a successful `send_answer` the driver must
/// call [`ModbusSlave::tx_done`] once the last byte left the shifter; after
/// `standby` it must deliver [`ModbusSlave::rx_done`] or
/// [`ModbusSlave::rx_error`] for the next frame on the wire.
pub trait SlaveLink {
    /// Arm the receiver for one frame
    fn standby(&mut self) -> ModbusResult<()>;

    /// Start transmitting the assembled answer frame
    fn send_answer(&mut self, frame: &[u8]) -> ModbusResult<()>;
}

/// Register backing store and packet FIFO of the slave.
///
/// Callbacks run in main context during dispatch, after the frame has passed
/// length, address, CRC, shape, and range validation. An `Err` return is
/// answered on the wire as the corresponding Modbus exception.
pub trait SlaveDevice {
    /// Read the register at `address` (serves both 0x03 and 0x04)
    fn read_register(&mut self, address: RegisterAddress) -> Result<RegisterValue, ModbusException>;

    /// Write `value` to the register at `address`
    fn write_register(
        &mut self,
        address: RegisterAddress,
        value: RegisterValue,
    ) -> Result<(), ModbusException>;

    /// Produce the next outbound data packet into `buf`, returning its
    /// length (0 for "nothing pending"; never more than 251)
    #[cfg(feature = "data-packet")]
    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, ModbusException>;

    /// Store a data packet received from the master
    #[cfg(feature = "data-packet")]
    fn write_packet(&mut self, data: &[u8]) -> Result<(), ModbusException>;
}

/// Slave engine FSM states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlaveState {
    /// Idle; the next tick arms the receiver
    Standby = 0,
    /// Receiver armed, waiting for a frame
    Receiving = 1,
    /// A frame is in the buffer, waiting for the tick to parse it
    Received = 2,
    /// Parsing and dispatching (main context, transient)
    Processing = 3,
    /// Answer handed to the link, waiting for transmission-complete
    Transmitting = 4,
}

impl SlaveState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SlaveState::Receiving,
            2 => SlaveState::Received,
            3 => SlaveState::Processing,
            4 => SlaveState::Transmitting,
            _ => SlaveState::Standby,
        }
    }
}

/// Slave traffic counters, updated from main context only
#[derive(Debug, Clone, Default)]
pub struct SlaveStats {
    /// Requests dispatched without exception
    pub requests_processed: u64,
    /// Answer frames handed to the link (including exception answers)
    pub answers_sent: u64,
    /// Exception answers among `answers_sent`
    pub exceptions_sent: u64,
    /// Broadcast requests acted on silently
    pub broadcasts_processed: u64,
    /// Frames dropped for length or CRC violations
    pub frames_discarded: u64,
}

/// Modbus RTU slave engine.
///
/// One engine per UART. Create it with the station address and the highest
/// served register address, then call [`check`](Self::check) from the main
/// loop and wire the driver's interrupt handlers to the three event methods.
pub struct ModbusSlave<L: SlaveLink, D: SlaveDevice> {
    state: AtomicU8,
    address: SlaveId,
    last_reg: RegisterAddress,
    buf: FrameBuffer,
    link: L,
    device: D,
    stats: SlaveStats,
}

impl<L: SlaveLink, D: SlaveDevice> ModbusSlave<L, D> {
    /// Create a slave engine.
    ///
    /// `address` must be a unicast station address (1..=247); `last_reg` is
    /// the highest register address served, inclusive.
    pub fn new(address: SlaveId, last_reg: RegisterAddress, link: L, device: D) -> ModbusResult<Self> {
        if address == BROADCAST_ADDRESS || address > MAX_SLAVE_ADDRESS {
            return Err(ModbusError::config(format!(
                "invalid slave address {} (expected 1..=247)",
                address
            )));
        }
        Ok(Self {
            state: AtomicU8::new(SlaveState::Standby as u8),
            address,
            last_reg,
            buf: FrameBuffer::new(),
            link,
            device,
            stats: SlaveStats::default(),
        })
    }

    /// Current FSM state
    pub fn state(&self) -> SlaveState {
        SlaveState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SlaveState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Station address of this engine
    pub fn address(&self) -> SlaveId {
        self.address
    }

    /// Highest served register address, inclusive
    pub fn last_reg(&self) -> RegisterAddress {
        self.last_reg
    }

    /// Traffic counters
    pub fn stats(&self) -> &SlaveStats {
        &self.stats
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Raw ADU buffer for zero-copy reception: a driver may DMA into this
    /// region while the engine is in [`SlaveState::Receiving`] and complete
    /// with [`rx_done_in_place`](Self::rx_done_in_place).
    pub fn rx_buffer_mut(&mut self) -> &mut [u8; ADU_BUFFER_SIZE] {
        self.buf.raw_mut()
    }

    /// Cooperative tick, called periodically from the main loop.
    ///
    /// Arms the receiver when idle and parses a pending frame when one has
    /// arrived. Returns `Ok(())` while idle and after a clean dispatch;
    /// returns an error when a frame was discarded, a request was answered
    /// with an exception, or the link refused an operation. Errors are
    /// informational - the engine has already returned to a safe state.
    pub fn check(&mut self) -> ModbusResult<()> {
        if self.state() == SlaveState::Standby {
            self.set_state(SlaveState::Receiving);
            if let Err(e) = self.link.standby() {
                // receiver not armed; retry on the next tick
                self.set_state(SlaveState::Standby);
                return Err(e);
            }
        }
        if self.state() == SlaveState::Received {
            return self.parse_message();
        }
        Ok(())
    }

    /// Validate the received ADU and dispatch it.
    ///
    /// Order: length, address match, CRC, then the function-code shape
    /// checks. Anything failing before dispatch is dropped without touching
    /// the device.
    fn parse_message(&mut self) -> ModbusResult<()> {
        self.set_state(SlaveState::Processing);

        if self.buf.last() < 3 {
            self.set_state(SlaveState::Standby);
            self.stats.frames_discarded += 1;
            return Err(ModbusError::frame(format!(
                "frame too short: {} bytes",
                self.buf.len()
            )));
        }

        let source = self.buf.byte(0);
        if source != self.address && source != BROADCAST_ADDRESS {
            // Another station's exchange on the shared pair; not an error.
            trace!("ignoring frame addressed to {:#04X}", source);
            self.set_state(SlaveState::Standby);
            return Ok(());
        }

        if let Err(e) = self.buf.check_crc() {
            self.set_state(SlaveState::Standby);
            self.stats.frames_discarded += 1;
            warn!("discarding request: {}", e);
            return Err(e);
        }
        self.buf.strip_crc();

        let function = self.buf.byte(1);
        let dispatched = self.process_command();

        if source == BROADCAST_ADDRESS {
            // Broadcasts are acted on but never answered.
            self.set_state(SlaveState::Standby);
            return match dispatched {
                Ok(()) => {
                    self.stats.broadcasts_processed += 1;
                    Ok(())
                }
                Err(code) => Err(ModbusError::exception(function, code.to_u8())),
            };
        }

        self.send_answer()?;
        self.stats.answers_sent += 1;
        match dispatched {
            Ok(()) => {
                self.stats.requests_processed += 1;
                Ok(())
            }
            Err(code) => {
                self.stats.exceptions_sent += 1;
                Err(ModbusError::exception(function, code.to_u8()))
            }
        }
    }

    /// Dispatch on the function code. On any exception the answer buffer is
    /// rewritten as an exception report before returning.
    fn process_command(&mut self) -> Result<(), ModbusException> {
        let function = self.buf.byte(1);
        let result = match FunctionCode::from_u8(function) {
            Some(FunctionCode::ReadHoldingRegisters) | Some(FunctionCode::ReadInputRegisters) => {
                self.read_registers()
            }
            Some(FunctionCode::WriteMultipleRegisters) => self.write_registers(),
            Some(FunctionCode::Diagnostic) => self.diagnostic(),
            #[cfg(feature = "data-packet")]
            Some(FunctionCode::ReadDataPacket) => self.read_data_packet(),
            #[cfg(feature = "data-packet")]
            Some(FunctionCode::WriteDataPacket) => self.write_data_packet(),
            None => Err(ModbusException::IllegalOpcode),
        };
        if let Err(code) = result {
            debug!("request 0x{:02X} rejected: {}", function, code);
            self.exception_report(code);
        }
        result
    }

    /// Rewrite the buffer as an exception answer: function byte with the
    /// high bit set, one exception byte.
    fn exception_report(&mut self, code: ModbusException) {
        let function = self.buf.byte(1);
        self.buf.set_byte(1, function | 0x80);
        self.buf.set_byte(2, code.to_u8());
        self.buf.set_last(2);
    }

    /// 0x03 / 0x04: `start_hi, start_lo, 0, count` with 1..=125 registers.
    /// The count high byte must be zero (deliberate narrowing of the 16-bit
    /// standard field).
    fn read_registers(&mut self) -> Result<(), ModbusException> {
        let count = self.buf.byte(5) as u16;
        if self.buf.last() != 5
            || self.buf.byte(4) != 0
            || count < 1
            || count > MAX_READ_REGISTERS
        {
            return Err(ModbusException::IllegalValue);
        }

        let first = self.buf.read_u16_be(2);
        let end = self.range_end(first, count)?;
        debug!("read {} register(s) from {:#06X}", count, first);

        self.buf.set_byte(2, (2 * count) as u8);
        self.buf.set_last(2);
        for addr in first..=end {
            let value = self.device.read_register(addr)?;
            self.buf.push((value >> 8) as u8);
            self.buf.push(value as u8);
        }
        Ok(())
    }

    /// 0x10: `start_hi, start_lo, 0, count, byte_count, data...` with
    /// 1..=123 registers, `byte_count == 2 * count`, and exactly that many
    /// data bytes in the ADU. Registers are written in ascending order; the
    /// answer echoes the request header.
    fn write_registers(&mut self) -> Result<(), ModbusException> {
        let count = self.buf.byte(5) as u16;
        if self.buf.byte(4) != 0 || count < 1 || count > MAX_WRITE_REGISTERS {
            return Err(ModbusException::IllegalValue);
        }
        let byte_count = self.buf.byte(6) as usize;
        if byte_count != 2 * count as usize || self.buf.last() != byte_count + 6 {
            return Err(ModbusException::IllegalValue);
        }

        let first = self.buf.read_u16_be(2);
        let end = self.range_end(first, count)?;
        debug!("write {} register(s) from {:#06X}", count, first);

        let mut index = 7;
        for addr in first..=end {
            let value = self.buf.read_u16_be(index);
            index += 2;
            self.device.write_register(addr, value)?;
        }

        // Echo address, function, start, and count.
        self.buf.set_last(5);
        Ok(())
    }

    /// 0x08: subfunction 0x0000 is a ping, answered by echoing the request
    /// unchanged. Every other subfunction is unsupported.
    fn diagnostic(&mut self) -> Result<(), ModbusException> {
        if self.buf.last() < 3 {
            return Err(ModbusException::IllegalValue);
        }
        if self.buf.byte(2) != 0 || self.buf.byte(3) != 0 {
            return Err(ModbusException::IllegalOpcode);
        }
        Ok(())
    }

    /// 0x64: empty request PDU; the answer carries `length, data...` pulled
    /// from the device FIFO. A producer overrunning the 251-byte limit is an
    /// internal fault.
    #[cfg(feature = "data-packet")]
    fn read_data_packet(&mut self) -> Result<(), ModbusException> {
        if self.buf.last() != 1 {
            return Err(ModbusException::IllegalValue);
        }
        let len = self
            .device
            .read_packet(&mut self.buf.raw_mut()[3..3 + MAX_PACKET_SIZE])?;
        if len > MAX_PACKET_SIZE {
            return Err(ModbusException::DeviceFault);
        }
        self.buf.set_byte(2, len as u8);
        self.buf.set_last(len + 2);
        Ok(())
    }

    /// 0x65: `length, data...` where `length` covers exactly the remaining
    /// PDU bytes. The answer echoes the length byte.
    #[cfg(feature = "data-packet")]
    fn write_data_packet(&mut self) -> Result<(), ModbusException> {
        let len = self.buf.byte(2) as usize;
        if self.buf.last() != len + 2 {
            return Err(ModbusException::IllegalValue);
        }
        self.device.write_packet(&self.buf.frame()[3..3 + len])?;
        self.buf.set_last(2);
        Ok(())
    }

    /// Bounds of a register window: rejects 16-bit overflow of the end
    /// address and anything beyond `last_reg`.
    fn range_end(&self, first: u16, count: u16) -> Result<u16, ModbusException> {
        let end = first
            .checked_add(count - 1)
            .ok_or(ModbusException::IllegalAddress)?;
        if end > self.last_reg {
            return Err(ModbusException::IllegalAddress);
        }
        Ok(end)
    }

    /// Append the CRC and hand the answer to the link. On any fault the
    /// engine returns to standby so the bus recovers on the next tick.
    fn send_answer(&mut self) -> ModbusResult<()> {
        if let Err(e) = self.buf.append_crc() {
            self.set_state(SlaveState::Standby);
            return Err(e);
        }
        self.set_state(SlaveState::Transmitting);
        if let Err(e) = self.link.send_answer(self.buf.frame()) {
            self.set_state(SlaveState::Standby);
            return Err(e);
        }
        Ok(())
    }

    /// Reception-complete event, safe to call from the interrupt handler.
    ///
    /// Copies the frame into the engine buffer (a driver that received into
    /// [`rx_buffer_mut`](Self::rx_buffer_mut) uses
    /// [`rx_done_in_place`](Self::rx_done_in_place) instead). Ignored unless
    /// the engine is in [`SlaveState::Receiving`]; a zero or over-long
    /// length drops the frame and restarts reception on the next tick.
    pub fn rx_done(&mut self, msg: &[u8]) {
        if self.state() != SlaveState::Receiving {
            return;
        }
        if msg.is_empty() || msg.len() > ADU_BUFFER_SIZE {
            self.set_state(SlaveState::Standby);
            return;
        }
        self.buf.load(msg);
        self.set_state(SlaveState::Received);
    }

    /// Zero-copy variant of [`rx_done`](Self::rx_done): the frame is already
    /// in the engine buffer, only its length is recorded.
    pub fn rx_done_in_place(&mut self, len: usize) {
        if self.state() != SlaveState::Receiving {
            return;
        }
        if len == 0 || len > ADU_BUFFER_SIZE {
            self.set_state(SlaveState::Standby);
            return;
        }
        self.buf.set_last(len - 1);
        self.set_state(SlaveState::Received);
    }

    /// Reception-error event (framing, parity, overrun), safe to call from
    /// the interrupt handler. Drops the frame silently.
    pub fn rx_error(&mut self) {
        if self.state() == SlaveState::Receiving {
            self.set_state(SlaveState::Standby);
        }
    }

    /// Transmission-complete event, safe to call from the interrupt handler.
    pub fn tx_done(&mut self) {
        if self.state() == SlaveState::Transmitting {
            self.set_state(SlaveState::Standby);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullLink {
        sent: Vec<Vec<u8>>,
        fail_send: bool,
    }

    impl NullLink {
        fn new() -> Self {
            Self {
                sent: Vec::new(),
                fail_send: false,
            }
        }
    }

    impl SlaveLink for NullLink {
        fn standby(&mut self) -> ModbusResult<()> {
            Ok(())
        }

        fn send_answer(&mut self, frame: &[u8]) -> ModbusResult<()> {
            if self.fail_send {
                return Err(ModbusError::hardware("tx refused"));
            }
            self.sent.push(frame.to_vec());
            Ok(())
        }
    }

    struct ArrayDevice {
        regs: [u16; 32],
    }

    impl ArrayDevice {
        fn new() -> Self {
            Self { regs: [0; 32] }
        }
    }

    impl SlaveDevice for ArrayDevice {
        fn read_register(&mut self, address: u16) -> Result<u16, ModbusException> {
            self.regs
                .get(address as usize)
                .copied()
                .ok_or(ModbusException::IllegalAddress)
        }

        fn write_register(&mut self, address: u16, value: u16) -> Result<(), ModbusException> {
            *self
                .regs
                .get_mut(address as usize)
                .ok_or(ModbusException::IllegalAddress)? = value;
            Ok(())
        }

        #[cfg(feature = "data-packet")]
        fn read_packet(&mut self, _buf: &mut [u8]) -> Result<usize, ModbusException> {
            Ok(0)
        }

        #[cfg(feature = "data-packet")]
        fn write_packet(&mut self, _data: &[u8]) -> Result<(), ModbusException> {
            Ok(())
        }
    }

    fn make_slave() -> ModbusSlave<NullLink, ArrayDevice> {
        ModbusSlave::new(0x01, 0x001F, NullLink::new(), ArrayDevice::new()).unwrap()
    }

    /// Build a request ADU with a valid CRC appended.
    fn with_crc(payload: &[u8]) -> Vec<u8> {
        let mut frame = payload.to_vec();
        let crc = crate::frame::crc16(payload);
        frame.push(crc as u8);
        frame.push((crc >> 8) as u8);
        frame
    }

    #[test]
    fn test_rejects_broadcast_and_reserved_addresses() {
        assert!(ModbusSlave::new(0, 0xFF, NullLink::new(), ArrayDevice::new()).is_err());
        assert!(ModbusSlave::new(248, 0xFF, NullLink::new(), ArrayDevice::new()).is_err());
        assert!(ModbusSlave::new(247, 0xFF, NullLink::new(), ArrayDevice::new()).is_ok());
    }

    #[test]
    fn test_tick_arms_receiver() {
        let mut slave = make_slave();
        assert_eq!(slave.state(), SlaveState::Standby);
        slave.check().unwrap();
        assert_eq!(slave.state(), SlaveState::Receiving);
    }

    #[test]
    fn test_events_ignored_outside_armed_state() {
        let mut slave = make_slave();
        // Not armed yet: the event must not disturb the FSM.
        slave.rx_done(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
        assert_eq!(slave.state(), SlaveState::Standby);
        slave.tx_done();
        assert_eq!(slave.state(), SlaveState::Standby);
        slave.rx_error();
        assert_eq!(slave.state(), SlaveState::Standby);
    }

    #[test]
    fn test_oversized_reception_dropped() {
        let mut slave = make_slave();
        slave.check().unwrap();
        slave.rx_done(&[0u8; ADU_BUFFER_SIZE + 1]);
        assert_eq!(slave.state(), SlaveState::Standby);
        slave.check().unwrap();
        slave.rx_done(&[]);
        assert_eq!(slave.state(), SlaveState::Standby);
    }

    #[test]
    fn test_short_frame_discarded_without_device_access() {
        let mut slave = make_slave();
        slave.check().unwrap();
        slave.rx_done(&[0x01, 0x03, 0x84]);
        let result = slave.check();
        assert!(matches!(result, Err(ModbusError::Frame { .. })));
        assert_eq!(slave.state(), SlaveState::Standby); // re-armed on the next tick
        assert_eq!(slave.stats().frames_discarded, 1);
        assert!(slave.link().sent.is_empty());
    }

    #[test]
    fn test_foreign_address_ignored_silently() {
        let mut slave = make_slave();
        slave.check().unwrap();
        slave.rx_done(&with_crc(&[0x02, 0x03, 0x00, 0x00, 0x00, 0x01]));
        assert!(slave.check().is_ok());
        assert!(slave.link().sent.is_empty());
        assert_eq!(slave.stats().frames_discarded, 0);
    }

    #[test]
    fn test_crc_mismatch_discarded() {
        let mut slave = make_slave();
        slave.check().unwrap();
        let mut frame = with_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]);
        let tail = frame.len() - 1;
        frame[tail] ^= 0xFF;
        slave.rx_done(&frame);
        assert!(matches!(slave.check(), Err(ModbusError::CrcMismatch { .. })));
        assert_eq!(slave.stats().frames_discarded, 1);
        assert!(slave.link().sent.is_empty());
    }

    #[test]
    fn test_read_registers_answer() {
        let mut slave = make_slave();
        slave.device_mut().regs[0] = 0x1234;
        slave.check().unwrap();
        slave.rx_done(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
        slave.check().unwrap();

        assert_eq!(slave.state(), SlaveState::Transmitting);
        assert_eq!(
            slave.link().sent[0],
            vec![0x01, 0x03, 0x02, 0x12, 0x34, 0xB5, 0x33]
        );
        assert_eq!(slave.stats().requests_processed, 1);
        assert_eq!(slave.stats().answers_sent, 1);

        slave.tx_done();
        assert_eq!(slave.state(), SlaveState::Standby);
    }

    #[test]
    fn test_count_high_byte_must_be_zero() {
        let mut slave = make_slave();
        slave.check().unwrap();
        slave.rx_done(&with_crc(&[0x01, 0x03, 0x00, 0x00, 0x01, 0x01]));
        assert!(slave.check().is_err());
        // ILLEGAL_VALUE exception answer
        let answer = &slave.link().sent[0];
        assert_eq!(&answer[..3], &[0x01, 0x83, 0x03]);
        assert_eq!(slave.stats().exceptions_sent, 1);
    }

    #[test]
    fn test_write_registers_ascending_order() {
        let mut slave = make_slave();
        slave.check().unwrap();
        slave.rx_done(&with_crc(&[
            0x01, 0x10, 0x00, 0x08, 0x00, 0x03, 0x06, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03,
        ]));
        slave.check().unwrap();
        assert_eq!(&slave.device().regs[8..11], &[1, 2, 3]);
        // Echo of address, function, start, count.
        let answer = &slave.link().sent[0];
        assert_eq!(&answer[..6], &[0x01, 0x10, 0x00, 0x08, 0x00, 0x03]);
    }

    #[test]
    fn test_write_byte_count_mismatch_rejected() {
        let mut slave = make_slave();
        slave.check().unwrap();
        // byte_count says 4 but count says 3 registers
        slave.rx_done(&with_crc(&[
            0x01, 0x10, 0x00, 0x08, 0x00, 0x03, 0x04, 0x00, 0x01, 0x00, 0x02,
        ]));
        assert!(slave.check().is_err());
        assert_eq!(&slave.link().sent[0][..3], &[0x01, 0x90, 0x03]);
        assert_eq!(slave.device().regs[8], 0); // store untouched
    }

    #[test]
    fn test_broadcast_write_acts_silently() {
        let mut slave = make_slave();
        slave.check().unwrap();
        slave.rx_done(&with_crc(&[
            0x00, 0x10, 0x00, 0x00, 0x00, 0x01, 0x02, 0xAB, 0xCD,
        ]));
        slave.check().unwrap();
        assert_eq!(slave.device().regs[0], 0xABCD);
        assert!(slave.link().sent.is_empty());
        assert_eq!(slave.stats().broadcasts_processed, 1);
        assert_eq!(slave.state(), SlaveState::Standby);
    }

    #[test]
    fn test_send_failure_returns_to_standby() {
        let mut slave = make_slave();
        slave.link_mut().fail_send = true;
        slave.check().unwrap();
        slave.rx_done(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
        assert!(matches!(slave.check(), Err(ModbusError::Hardware { .. })));
        assert_eq!(slave.state(), SlaveState::Standby);
    }

    #[test]
    fn test_rx_done_in_place() {
        let mut slave = make_slave();
        slave.device_mut().regs[0] = 0x1234;
        slave.check().unwrap();
        let request = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A];
        slave.rx_buffer_mut()[..request.len()].copy_from_slice(&request);
        slave.rx_done_in_place(request.len());
        slave.check().unwrap();
        assert_eq!(
            slave.link().sent[0],
            vec![0x01, 0x03, 0x02, 0x12, 0x34, 0xB5, 0x33]
        );
    }
}
