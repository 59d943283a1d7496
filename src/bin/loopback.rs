//! Loopback demo: a master and a slave engine wired back-to-back in memory.
//!
//! Run with `cargo run --bin loopback`. Every byte printed below really went
//! through frame assembly, CRC, and both state machines; only the UART is
//! replaced by two shared byte buffers.

use std::cell::RefCell;
use std::rc::Rc;

use modbus_rtu_stack::{
    MasterLink, ModbusMaster, ModbusResult, ModbusSlave, RegisterBank, SlaveLink, StdClock,
    TransactionOutcome,
};

/// One direction of the simulated bus
type Wire = Rc<RefCell<Option<Vec<u8>>>>;

struct MasterPort {
    request_wire: Wire,
}

impl MasterLink for MasterPort {
    fn send(&mut self, frame: &[u8]) -> ModbusResult<()> {
        println!("  master -> {}", hex(frame));
        *self.request_wire.borrow_mut() = Some(frame.to_vec());
        Ok(())
    }

    fn receive(&mut self) -> ModbusResult<()> {
        Ok(())
    }
}

struct SlavePort {
    answer_wire: Wire,
}

impl SlaveLink for SlavePort {
    fn standby(&mut self) -> ModbusResult<()> {
        Ok(())
    }

    fn send_answer(&mut self, frame: &[u8]) -> ModbusResult<()> {
        println!("  slave  -> {}", hex(frame));
        *self.answer_wire.borrow_mut() = Some(frame.to_vec());
        Ok(())
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Carry one transaction across the simulated bus and report its outcome.
fn exchange(
    master: &mut ModbusMaster<MasterPort, StdClock>,
    slave: &mut ModbusSlave<SlavePort, RegisterBank>,
    request_wire: &Wire,
    answer_wire: &Wire,
) -> TransactionOutcome {
    // Transmission completes instantly on a memory bus.
    master.tx_done();

    let request = request_wire.borrow_mut().take().expect("request on wire");
    slave.check().ok(); // arm the slave receiver
    slave.rx_done(&request);
    if let Err(e) = slave.check() {
        println!("  slave  :: {}", e);
    }
    slave.tx_done();

    if let Some(answer) = answer_wire.borrow_mut().take() {
        master.rx_done(&answer);
    }

    loop {
        if let Some(outcome) = master.check() {
            return outcome;
        }
    }
}

fn main() -> ModbusResult<()> {
    let request_wire: Wire = Rc::new(RefCell::new(None));
    let answer_wire: Wire = Rc::new(RefCell::new(None));

    let mut bank = RegisterBank::with_size(32);
    bank.set(0x0000, 0x1234)?;
    bank.queue_packet(b"telemetry frame #1")?;

    let mut slave = ModbusSlave::new(
        0x01,
        0x001F,
        SlavePort {
            answer_wire: answer_wire.clone(),
        },
        bank,
    )?;

    let mut master = ModbusMaster::new(
        MasterPort {
            request_wire: request_wire.clone(),
        },
        StdClock::new(),
    );

    println!("read 4 holding registers from 0x0000:");
    master.read_holding_registers(0x01, 0x0000, 4)?;
    let outcome = exchange(&mut master, &mut slave, &request_wire, &answer_wire);
    println!("  outcome: {:?}, registers: {:04X?}\n", outcome, master.registers());

    println!("write registers 0x0010..=0x0011:");
    master.write_multiple_registers(0x01, 0x0010, &[0xAABB, 0xCCDD])?;
    let outcome = exchange(&mut master, &mut slave, &request_wire, &answer_wire);
    println!("  outcome: {:?}\n", outcome);

    println!("read them back:");
    master.read_holding_registers(0x01, 0x0010, 2)?;
    let outcome = exchange(&mut master, &mut slave, &request_wire, &answer_wire);
    println!("  outcome: {:?}, registers: {:04X?}\n", outcome, master.registers());

    println!("read past the served range (exception expected):");
    master.read_holding_registers(0x01, 0x001E, 4)?;
    let outcome = exchange(&mut master, &mut slave, &request_wire, &answer_wire);
    println!("  outcome: {:?}\n", outcome);

    println!("collect the queued data packet:");
    master.read_data_packet(0x01)?;
    let outcome = exchange(&mut master, &mut slave, &request_wire, &answer_wire);
    println!(
        "  outcome: {:?}, payload: {:?}\n",
        outcome,
        String::from_utf8_lossy(master.packet())
    );

    println!("send a data packet to the slave:");
    master.write_data_packet(0x01, b"setpoint update")?;
    let outcome = exchange(&mut master, &mut slave, &request_wire, &answer_wire);
    let stored = slave.device_mut().take_packet();
    println!(
        "  outcome: {:?}, slave stored: {:?}",
        outcome,
        stored.map(|p| String::from_utf8_lossy(&p).into_owned())
    );

    Ok(())
}
