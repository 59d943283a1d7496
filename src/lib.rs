//! # Modbus RTU Stack - Callback-Driven Master/Slave Protocol Engines
//!
//! A Modbus RTU protocol core for half-duplex serial links (RS-485/RS-422),
//! designed for firmware and gateway applications where the UART driver, the
//! timer source, and the register backing store live outside the protocol
//! stack and are reached through narrow trait seams.
//!
//! ## Features
//!
//! - **No runtime required**: cooperative `check()` tick from the main loop,
//!   three small event callbacks from the interrupt context; no threads, no
//!   RTOS, no async executor
//! - **Fixed memory**: one 257-byte ADU buffer per engine, no allocation on
//!   the receive/transmit path
//! - **Strict validation**: length, address, CRC, and PDU shape checks before
//!   any user callback runs
//! - **Symmetric engines**: [`ModbusMaster`] issues requests and validates
//!   answers; [`ModbusSlave`] dispatches requests and builds answers or
//!   exceptions
//! - **Zero-copy reception**: drivers may DMA straight into the engine buffer
//!   and complete with [`ModbusSlave::rx_done_in_place`]
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Master | Slave |
//! |------|----------|--------|-------|
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x08 | Diagnostic (subfunction 0 echo) | | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//! | 0x64 | Read Data Packet (custom, `data-packet` feature) | ✅ | ✅ |
//! | 0x65 | Write Data Packet (custom, `data-packet` feature) | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ### Slave Example
//!
//! ```rust
//! use modbus_rtu_stack::{ModbusResult, ModbusSlave, RegisterBank, SlaveLink};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! // The link trait is where the UART driver plugs in.
//! struct LoopbackLink {
//!     answers: Rc<RefCell<Vec<Vec<u8>>>>,
//! }
//!
//! impl SlaveLink for LoopbackLink {
//!     fn standby(&mut self) -> ModbusResult<()> {
//!         Ok(()) // arm the receiver here
//!     }
//!
//!     fn send_answer(&mut self, frame: &[u8]) -> ModbusResult<()> {
//!         self.answers.borrow_mut().push(frame.to_vec());
//!         Ok(()) // start the transmission here
//!     }
//! }
//!
//! fn main() -> ModbusResult<()> {
//!     let answers = Rc::new(RefCell::new(Vec::new()));
//!     let link = LoopbackLink { answers: answers.clone() };
//!
//!     let mut bank = RegisterBank::with_size(16);
//!     bank.set(0x0000, 0x1234)?;
//!
//!     // Address 0x01, registers 0x0000..=0x000F.
//!     let mut slave = ModbusSlave::new(0x01, 0x000F, link, bank)?;
//!
//!     slave.check()?; // arms the receiver
//!     slave.rx_done(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
//!     slave.check()?; // parses the request and builds the answer
//!     slave.tx_done();
//!
//!     assert_eq!(
//!         answers.borrow()[0],
//!         [0x01, 0x03, 0x02, 0x12, 0x34, 0xB5, 0x33]
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ### Master Example
//!
//! ```rust,no_run
//! use modbus_rtu_stack::{
//!     MasterLink, ModbusMaster, ModbusResult, StdClock, TransactionOutcome,
//! };
//!
//! struct Uart; // wraps the real serial driver
//!
//! impl MasterLink for Uart {
//!     fn send(&mut self, frame: &[u8]) -> ModbusResult<()> {
//!         Ok(()) // start DMA transmission; driver calls tx_done() when finished
//!     }
//!
//!     fn receive(&mut self) -> ModbusResult<()> {
//!         Ok(()) // arm the receiver; driver calls rx_done()/rx_error()
//!     }
//! }
//!
//! fn main() -> ModbusResult<()> {
//!     let mut master = ModbusMaster::new(Uart, StdClock::new());
//!     master.read_holding_registers(0x01, 0x0000, 4)?;
//!
//!     // The driver's interrupt handlers feed the engine:
//!     //   master.tx_done();            on transmission complete
//!     //   master.rx_done(frame);       on reception complete
//!     //   master.rx_error();           on framing/overrun error
//!
//!     loop {
//!         match master.check() {
//!             Some(TransactionOutcome::Processed) => {
//!                 println!("registers: {:?}", master.registers());
//!                 break;
//!             }
//!             Some(outcome) => {
//!                 eprintln!("transaction failed: {:?}", outcome);
//!                 break;
//!             }
//!             None => { /* still in flight */ }
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!  main loop                     interrupt context
//!  ─────────                     ─────────────────
//!  check() ──► parse/dispatch    tx_done / rx_done / rx_error
//!     │             │                     │
//!     ▼             ▼                     ▼
//!  ┌──────────────────────┐      state word only
//!  │  engine FSM (atomic) │◄─────(never parses,
//!  └──────────────────────┘       never calls user logic)
//!     │             │
//!     ▼             ▼
//!  SlaveDevice   SlaveLink / MasterLink
//!  (registers,   (UART send / receiver arm)
//!   packets)
//! ```
//!
//! The FSM state word is the only variable shared between the two contexts:
//! interrupt handlers store it with release ordering after filling the frame
//! buffer, the tick loads it with acquire ordering before reading the buffer.

/// Error types and result handling
pub mod error;

/// Wire-level protocol definitions: function codes, exception codes
pub mod protocol;

/// CRC codec and the fixed-size ADU frame buffer
pub mod frame;

/// Slave engine: listens for requests, dispatches, answers
pub mod slave;

/// Master engine: issues requests, tracks timeout, validates answers
pub mod master;

/// Ready-made register/packet backing store for slave applications
pub mod register_bank;

// Re-export main types for convenience
pub use error::{ModbusError, ModbusResult};
pub use frame::{crc16, crc16_digest, FrameBuffer};
pub use master::{
    Clock, MasterLink, MasterState, MasterStats, ModbusMaster, StdClock, TransactionOutcome,
};
pub use protocol::{FunctionCode, ModbusException};
pub use register_bank::RegisterBank;
pub use slave::{ModbusSlave, SlaveDevice, SlaveLink, SlaveState, SlaveStats};

/// Broadcast address: every slave acts on the request, none answers
pub const BROADCAST_ADDRESS: u8 = 0;

/// Highest legal unicast slave address
pub const MAX_SLAVE_ADDRESS: u8 = 247;

/// Maximum legal RTU ADU size on the wire (address + function + PDU + CRC)
pub const MAX_ADU_SIZE: usize = 256;

/// ADU buffer capacity; one byte above [`MAX_ADU_SIZE`] so a completely
/// filled buffer can be recognized as an overrun by the driver
pub const ADU_BUFFER_SIZE: usize = 257;

/// Maximum number of registers in a single read request (0x03/0x04)
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum number of registers in a single write request (0x10)
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Maximum payload of a custom data packet (0x64/0x65)
pub const MAX_PACKET_SIZE: usize = 251;

/// Answer timeout of the master engine, in milliseconds
pub const DEFAULT_RX_TIMEOUT_MS: u32 = 100;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
