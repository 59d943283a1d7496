//! Master engine: builds request frames, tracks the answer timeout, and
//! validates that the answer matches the transaction it issued.
//!
//! One transaction at a time:
//!
//! ```text
//!   request API                ISR: tx_done              ISR: rx_done
//! STANDBY ────► TRANSMITTING ────────────► WAITING_ANSWER ────────► RECEIVED
//!    ▲                                          │ tick: timeout        │ tick: parse
//!    │                                          ▼                      ▼
//!    │                                      TIMED_OUT             PROCESSING
//!    │                                                                 │
//!    └──────────── reported once through check() ◄────────────────────┘
//!                  {PROCESSED, ERR_REPORTED, CORRUPTED, TIMED_OUT, HW_ERROR}
//! ```
//!
//! [`ModbusMaster::check`] runs in main context; it reports each terminal
//! result exactly once and returns the engine to standby on the same tick,
//! so the caller may issue the next request immediately. The event methods
//! ([`tx_done`], [`rx_done`], [`rx_error`]) are safe to call from interrupt
//! handlers; `tx_done` arms the receiver through [`MasterLink::receive`],
//! which therefore must itself be ISR-safe.
//!
//! [`tx_done`]: ModbusMaster::tx_done
//! [`rx_done`]: ModbusMaster::rx_done
//! [`rx_error`]: ModbusMaster::rx_error

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::{ModbusError, ModbusResult};
use crate::frame::FrameBuffer;
use crate::protocol::{FunctionCode, RegisterAddress, RegisterValue, SlaveId};
use crate::{ADU_BUFFER_SIZE, DEFAULT_RX_TIMEOUT_MS, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS};
#[cfg(feature = "data-packet")]
use crate::MAX_PACKET_SIZE;

/// Physical side of the master: transmit a request, arm the receiver for
/// the answer.
///
/// `send` is called from the request APIs (main context). `receive` is
/// called from [`ModbusMaster::tx_done`], which usually runs in the
/// transmit-complete interrupt - it must be ISR-safe.
pub trait MasterLink {
    /// Start transmitting the request frame; the driver must call
    /// [`ModbusMaster::tx_done`] when the last byte has left the wire
    fn send(&mut self, frame: &[u8]) -> ModbusResult<()>;

    /// Arm the receiver for one answer frame, completed via
    /// [`ModbusMaster::rx_done`] or [`ModbusMaster::rx_error`]
    fn receive(&mut self) -> ModbusResult<()>;
}

/// Monotonic millisecond time source.
///
/// Both variants must return the same monotonic count; the split exists for
/// platforms where reading the tick counter takes a different path inside an
/// interrupt handler.
pub trait Clock {
    /// Current milliseconds, main context
    fn now_ms(&self) -> u32;

    /// Current milliseconds, interrupt context
    fn now_ms_isr(&self) -> u32 {
        self.now_ms()
    }
}

/// [`Clock`] over [`std::time::Instant`], counting from construction
pub struct StdClock {
    origin: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now_ms(&self) -> u32 {
        self.origin.elapsed().as_millis() as u32
    }
}

/// Master engine FSM states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MasterState {
    /// Idle, ready for a request
    Standby = 0,
    /// Request handed to the link, waiting for transmission-complete
    Transmitting = 1,
    /// Receiver armed, waiting for the answer or the timeout
    WaitingAnswer = 2,
    /// An answer is in the buffer, waiting for the tick to parse it
    Received = 3,
    /// Parsing the answer (main context, transient)
    Processing = 4,
    /// Terminal: no answer within the timeout
    TimedOut = 5,
    /// Terminal: answer malformed, mismatched, or reception error
    Corrupted = 6,
    /// Terminal: the slave answered with an exception
    ErrReported = 7,
    /// Terminal: answer validated, results available
    Processed = 8,
    /// Terminal: the link refused to send or to arm the receiver
    HwError = 9,
}

impl MasterState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => MasterState::Transmitting,
            2 => MasterState::WaitingAnswer,
            3 => MasterState::Received,
            4 => MasterState::Processing,
            5 => MasterState::TimedOut,
            6 => MasterState::Corrupted,
            7 => MasterState::ErrReported,
            8 => MasterState::Processed,
            9 => MasterState::HwError,
            _ => MasterState::Standby,
        }
    }
}

/// Result of a finished transaction, reported exactly once by
/// [`ModbusMaster::check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Answer validated; results readable through
    /// [`ModbusMaster::registers`] / [`ModbusMaster::packet`]
    Processed,
    /// The slave rejected the request with this exception code
    ExceptionReported(u8),
    /// Short frame, CRC mismatch, wrong source address, answer shape
    /// mismatch, or reception error
    Corrupted,
    /// No answer within the configured timeout
    TimedOut,
    /// The link reported a hardware fault
    HardwareError,
}

/// Master transaction counters, updated from main context only
#[derive(Debug, Clone, Default)]
pub struct MasterStats {
    pub transactions_started: u64,
    pub processed: u64,
    pub exceptions_reported: u64,
    pub corrupted: u64,
    pub timeouts: u64,
    pub hardware_errors: u64,
}

/// Modbus RTU master engine.
///
/// One engine per UART, one transaction in flight at a time. Issue a
/// request, then call [`check`](Self::check) from the main loop until it
/// reports the outcome; the driver's interrupt handlers feed the three
/// event methods in between.
pub struct ModbusMaster<L: MasterLink, C: Clock> {
    state: AtomicU8,
    rx_start_ms: AtomicU32,
    buf: FrameBuffer,
    link: L,
    clock: C,
    timeout_ms: u32,
    /// Transaction descriptor of the request on the fly
    slave_addr: SlaveId,
    opcode: u8,
    first_reg: RegisterAddress,
    /// Register count, or the sent packet length for 0x65
    num_regs: u16,
    /// Decoded answer registers for 0x03/0x04
    regs: [u16; MAX_READ_REGISTERS as usize],
    /// Length of the packet received by 0x64
    #[cfg(feature = "data-packet")]
    packet_len: u8,
    stats: MasterStats,
}

impl<L: MasterLink, C: Clock> ModbusMaster<L, C> {
    /// Create a master engine with the default 100 ms answer timeout
    pub fn new(link: L, clock: C) -> Self {
        Self::with_timeout(link, clock, Duration::from_millis(DEFAULT_RX_TIMEOUT_MS as u64))
    }

    /// Create a master engine with a custom answer timeout
    pub fn with_timeout(link: L, clock: C, timeout: Duration) -> Self {
        Self {
            state: AtomicU8::new(MasterState::Standby as u8),
            rx_start_ms: AtomicU32::new(0),
            buf: FrameBuffer::new(),
            link,
            clock,
            timeout_ms: timeout.as_millis() as u32,
            slave_addr: 0,
            opcode: 0,
            first_reg: 0,
            num_regs: 0,
            regs: [0; MAX_READ_REGISTERS as usize],
            #[cfg(feature = "data-packet")]
            packet_len: 0,
            stats: MasterStats::default(),
        }
    }

    /// Current FSM state
    pub fn state(&self) -> MasterState {
        MasterState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: MasterState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Transaction counters
    pub fn stats(&self) -> &MasterStats {
        &self.stats
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Raw ADU buffer for zero-copy reception: a driver may DMA into this
    /// region while the engine is in [`MasterState::WaitingAnswer`] and
    /// complete with [`rx_done_in_place`](Self::rx_done_in_place).
    pub fn rx_buffer_mut(&mut self) -> &mut [u8; ADU_BUFFER_SIZE] {
        self.buf.raw_mut()
    }

    /// Register values returned by the last processed read transaction
    /// (0x03/0x04). Valid after [`TransactionOutcome::Processed`] until the
    /// next request is issued.
    pub fn registers(&self) -> &[RegisterValue] {
        &self.regs[..self.num_regs as usize]
    }

    /// Payload of the last processed 0x64 transaction. Valid after
    /// [`TransactionOutcome::Processed`] until the next request is issued.
    #[cfg(feature = "data-packet")]
    pub fn packet(&self) -> &[u8] {
        let len = self.packet_len as usize;
        if len == 0 {
            return &[];
        }
        &self.buf.frame()[3..3 + len]
    }

    /// Issue a Read Holding Registers (0x03) request for `count` registers
    /// starting at `first`.
    pub fn read_holding_registers(
        &mut self,
        slave: SlaveId,
        first: RegisterAddress,
        count: u16,
    ) -> ModbusResult<()> {
        self.read_registers(FunctionCode::ReadHoldingRegisters, slave, first, count)
    }

    /// Issue a Read Input Registers (0x04) request for `count` registers
    /// starting at `first`.
    pub fn read_input_registers(
        &mut self,
        slave: SlaveId,
        first: RegisterAddress,
        count: u16,
    ) -> ModbusResult<()> {
        self.read_registers(FunctionCode::ReadInputRegisters, slave, first, count)
    }

    fn read_registers(
        &mut self,
        function: FunctionCode,
        slave: SlaveId,
        first: RegisterAddress,
        count: u16,
    ) -> ModbusResult<()> {
        self.ensure_standby()?;
        if count > MAX_READ_REGISTERS {
            return Err(ModbusError::invalid_params(format!(
                "cannot read {} registers at once (max {})",
                count, MAX_READ_REGISTERS
            )));
        }

        self.slave_addr = slave;
        self.opcode = function.to_u8();
        self.first_reg = first;
        self.num_regs = count;

        self.buf.set_byte(0, slave);
        self.buf.set_byte(1, self.opcode);
        self.buf.set_byte(2, (first >> 8) as u8);
        self.buf.set_byte(3, first as u8);
        self.buf.set_byte(4, (count >> 8) as u8);
        self.buf.set_byte(5, count as u8);
        self.buf.set_last(5);

        self.transmit()
    }

    /// Issue a Write Multiple Registers (0x10) request placing `values`
    /// from `first` upward.
    pub fn write_multiple_registers(
        &mut self,
        slave: SlaveId,
        first: RegisterAddress,
        values: &[RegisterValue],
    ) -> ModbusResult<()> {
        self.ensure_standby()?;
        if values.len() > MAX_WRITE_REGISTERS as usize {
            return Err(ModbusError::invalid_params(format!(
                "cannot write {} registers at once (max {})",
                values.len(),
                MAX_WRITE_REGISTERS
            )));
        }
        let count = values.len() as u16;

        self.slave_addr = slave;
        self.opcode = FunctionCode::WriteMultipleRegisters.to_u8();
        self.first_reg = first;
        self.num_regs = count;

        self.buf.set_byte(0, slave);
        self.buf.set_byte(1, self.opcode);
        self.buf.set_byte(2, (first >> 8) as u8);
        self.buf.set_byte(3, first as u8);
        self.buf.set_byte(4, (count >> 8) as u8);
        self.buf.set_byte(5, count as u8);
        self.buf.set_byte(6, (2 * count) as u8);
        self.buf.set_last(6);
        for value in values {
            self.buf.push((value >> 8) as u8);
            self.buf.push(*value as u8);
        }

        self.transmit()
    }

    /// Issue a Read Data Packet (0x64) request; the received payload is
    /// read through [`packet`](Self::packet) once processed.
    #[cfg(feature = "data-packet")]
    pub fn read_data_packet(&mut self, slave: SlaveId) -> ModbusResult<()> {
        self.ensure_standby()?;

        self.slave_addr = slave;
        self.opcode = FunctionCode::ReadDataPacket.to_u8();
        self.packet_len = 0;

        self.buf.set_byte(0, slave);
        self.buf.set_byte(1, self.opcode);
        self.buf.set_last(1);

        self.transmit()
    }

    /// Issue a Write Data Packet (0x65) request carrying `data` (at most
    /// 251 bytes).
    #[cfg(feature = "data-packet")]
    pub fn write_data_packet(&mut self, slave: SlaveId, data: &[u8]) -> ModbusResult<()> {
        self.ensure_standby()?;
        if data.len() > MAX_PACKET_SIZE {
            return Err(ModbusError::invalid_params(format!(
                "packet of {} bytes exceeds the {}-byte limit",
                data.len(),
                MAX_PACKET_SIZE
            )));
        }

        self.slave_addr = slave;
        self.opcode = FunctionCode::WriteDataPacket.to_u8();
        self.num_regs = data.len() as u16; // echoed length, checked on answer

        self.buf.set_byte(0, slave);
        self.buf.set_byte(1, self.opcode);
        self.buf.set_byte(2, data.len() as u8);
        self.buf.set_last(2);
        for byte in data {
            self.buf.push(*byte);
        }

        self.transmit()
    }

    fn ensure_standby(&self) -> ModbusResult<()> {
        if self.state() != MasterState::Standby {
            return Err(ModbusError::Busy);
        }
        Ok(())
    }

    /// Append the CRC and hand the request to the link. A link refusal
    /// parks the engine in HW_ERROR for the next tick to report.
    fn transmit(&mut self) -> ModbusResult<()> {
        self.stats.transactions_started += 1;
        self.buf.append_crc()?;
        debug!(
            "request 0x{:02X} to {:#04X}, {} bytes",
            self.opcode,
            self.slave_addr,
            self.buf.len()
        );
        self.set_state(MasterState::Transmitting);
        if let Err(e) = self.link.send(self.buf.frame()) {
            self.set_state(MasterState::HwError);
            return Err(e);
        }
        Ok(())
    }

    /// Cooperative tick, called periodically from the main loop.
    ///
    /// Returns `None` while idle or while the transaction is in flight, and
    /// `Some(outcome)` exactly once when it terminates; the engine is back
    /// in [`MasterState::Standby`] by the time the outcome is returned.
    pub fn check(&mut self) -> Option<TransactionOutcome> {
        match self.state() {
            MasterState::Standby | MasterState::Transmitting => None,

            MasterState::WaitingAnswer => {
                let elapsed = self
                    .clock
                    .now_ms()
                    .wrapping_sub(self.rx_start_ms.load(Ordering::Acquire));
                if elapsed > self.timeout_ms {
                    // An answer completing concurrently wins the race: the
                    // timeout only lands if the engine is still waiting.
                    let parked = self.state.compare_exchange(
                        MasterState::WaitingAnswer as u8,
                        MasterState::Standby as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    if parked.is_ok() {
                        warn!(
                            "no answer from {:#04X} within {} ms",
                            self.slave_addr, self.timeout_ms
                        );
                        self.stats.timeouts += 1;
                        return Some(TransactionOutcome::TimedOut);
                    }
                }
                None
            }

            MasterState::Received => {
                self.parse_answer();
                let outcome = match self.state() {
                    MasterState::Processed => {
                        self.stats.processed += 1;
                        TransactionOutcome::Processed
                    }
                    MasterState::ErrReported => {
                        self.stats.exceptions_reported += 1;
                        TransactionOutcome::ExceptionReported(self.buf.byte(2))
                    }
                    _ => {
                        self.stats.corrupted += 1;
                        TransactionOutcome::Corrupted
                    }
                };
                self.set_state(MasterState::Standby);
                Some(outcome)
            }

            MasterState::Corrupted => {
                self.stats.corrupted += 1;
                self.set_state(MasterState::Standby);
                Some(TransactionOutcome::Corrupted)
            }

            MasterState::HwError => {
                self.stats.hardware_errors += 1;
                self.set_state(MasterState::Standby);
                Some(TransactionOutcome::HardwareError)
            }

            // Transient or already-reported states observed here mean the
            // driver broke the event contract; recover to standby.
            MasterState::Processing
            | MasterState::TimedOut
            | MasterState::ErrReported
            | MasterState::Processed => {
                self.set_state(MasterState::Standby);
                None
            }
        }
    }

    /// Validate the received ADU: source address, length, CRC, then the
    /// answer body.
    fn parse_answer(&mut self) {
        self.set_state(MasterState::Processing);

        if self.buf.byte(0) != self.slave_addr {
            warn!(
                "answer from {:#04X} while waiting for {:#04X}",
                self.buf.byte(0),
                self.slave_addr
            );
            self.set_state(MasterState::Corrupted);
            return;
        }
        if self.buf.last() < 3 {
            self.set_state(MasterState::Corrupted);
            return;
        }
        if let Err(e) = self.buf.check_crc() {
            warn!("discarding answer: {}", e);
            self.set_state(MasterState::Corrupted);
            return;
        }
        self.buf.strip_crc();
        self.process_answer();
    }

    /// Check the answer against the issued transaction and decode it.
    fn process_answer(&mut self) {
        let function = self.buf.byte(1);
        if function & 0x7F != self.opcode {
            // answer to a different command
            self.set_state(MasterState::Corrupted);
            return;
        }
        if function & 0x80 != 0 {
            // exception report; code must be present
            if self.buf.last() < 2 {
                self.set_state(MasterState::Corrupted);
            } else {
                self.set_state(MasterState::ErrReported);
            }
            return;
        }

        let state = match FunctionCode::from_u8(self.opcode) {
            Some(fc) if fc.is_register_read() => self.decode_read_answer(),
            Some(FunctionCode::WriteMultipleRegisters) => self.check_write_echo(),
            #[cfg(feature = "data-packet")]
            Some(FunctionCode::ReadDataPacket) => self.decode_packet_answer(),
            #[cfg(feature = "data-packet")]
            Some(FunctionCode::WriteDataPacket) => self.check_packet_echo(),
            _ => MasterState::Corrupted,
        };
        self.set_state(state);
    }

    /// 0x03/0x04 answer: `byte_count` must equal twice the requested count
    /// and the PDU must carry that many bytes; values unpack big-endian.
    fn decode_read_answer(&mut self) -> MasterState {
        let expected = 2 * self.num_regs as usize;
        if self.buf.last() < 2 + expected || self.buf.byte(2) as usize != expected {
            return MasterState::Corrupted;
        }
        for i in 0..self.num_regs as usize {
            self.regs[i] = self.buf.read_u16_be(3 + 2 * i);
        }
        MasterState::Processed
    }

    /// 0x10 answer: the echo must carry the start and count that were sent.
    /// The function byte is already pinned by the masked-opcode check.
    fn check_write_echo(&mut self) -> MasterState {
        if self.buf.last() < 5 {
            return MasterState::Corrupted;
        }
        if self.buf.read_u16_be(2) == self.first_reg && self.buf.read_u16_be(4) == self.num_regs {
            MasterState::Processed
        } else {
            MasterState::Corrupted
        }
    }

    /// 0x64 answer: `length, data...` with exactly `length` payload bytes.
    #[cfg(feature = "data-packet")]
    fn decode_packet_answer(&mut self) -> MasterState {
        let last = self.buf.last();
        if last < 2 || last != 2 + self.buf.byte(2) as usize {
            return MasterState::Corrupted;
        }
        self.packet_len = self.buf.byte(2);
        MasterState::Processed
    }

    /// 0x65 answer: a bare length byte echoing what was sent.
    #[cfg(feature = "data-packet")]
    fn check_packet_echo(&mut self) -> MasterState {
        if self.buf.last() == 2 && self.buf.byte(2) as u16 == self.num_regs {
            MasterState::Processed
        } else {
            MasterState::Corrupted
        }
    }

    /// Transmission-complete event, safe to call from the interrupt
    /// handler. Arms the receiver and samples the timeout origin; a link
    /// refusal parks the engine in HW_ERROR.
    pub fn tx_done(&mut self) {
        if self.state() != MasterState::Transmitting {
            return;
        }
        self.set_state(MasterState::WaitingAnswer);
        if self.link.receive().is_err() {
            self.set_state(MasterState::HwError);
        }
        self.rx_start_ms
            .store(self.clock.now_ms_isr(), Ordering::Release);
    }

    /// Reception-complete event, safe to call from the interrupt handler.
    ///
    /// Copies the answer into the engine buffer (a driver that received
    /// into [`rx_buffer_mut`](Self::rx_buffer_mut) uses
    /// [`rx_done_in_place`](Self::rx_done_in_place) instead). Ignored
    /// unless the engine is waiting for an answer; a zero or over-long
    /// length terminates the transaction as corrupted.
    pub fn rx_done(&mut self, msg: &[u8]) {
        if self.state() != MasterState::WaitingAnswer {
            return;
        }
        if msg.is_empty() || msg.len() > ADU_BUFFER_SIZE {
            self.set_state(MasterState::Corrupted);
            return;
        }
        self.buf.load(msg);
        self.set_state(MasterState::Received);
    }

    /// Zero-copy variant of [`rx_done`](Self::rx_done): the answer is
    /// already in the engine buffer, only its length is recorded.
    pub fn rx_done_in_place(&mut self, len: usize) {
        if self.state() != MasterState::WaitingAnswer {
            return;
        }
        if len == 0 || len > ADU_BUFFER_SIZE {
            self.set_state(MasterState::Corrupted);
            return;
        }
        self.buf.set_last(len - 1);
        self.set_state(MasterState::Received);
    }

    /// Reception-error event (framing, parity, overrun), safe to call from
    /// the interrupt handler. Terminates the transaction as corrupted.
    pub fn rx_error(&mut self) {
        if self.state() == MasterState::WaitingAnswer {
            self.set_state(MasterState::Corrupted);
        }
    }
}
