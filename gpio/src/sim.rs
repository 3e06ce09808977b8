//! Host-side simulation of a GPIO port wired to an HD44780 controller.
//!
//! [SimPort] records every port access into a trace of [SimEvent]s and decodes the bus the way
//! the controller would: nibbles are latched on the falling edge of E while R/W is low, the
//! interface starts in 8-bit mode until a function set with DL = 0 arrives, and reads with
//! R/W high present the busy flag and address counter on DB7..DB4.
//!
//! [SimDelay] shares the trace, so delays show up between the pin changes they separate.
use crate::port::{PortNibbleBus, PortPin};
use crate::{GpioDriver, GpioError, GpioOutput, GpioPinMode, GpioPort, GpioResult, NibbleBus};
use embedded_hal::delay::DelayNs;
use log::trace;
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;
use std::time::Duration;

/// Which port bits the controller's signals are wired to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SimWiring {
    pub rs: usize,
    pub rw: usize,
    pub e: usize,
    /// Bit of DB4; DB5..DB7 follow it.
    pub data: usize,
}

impl Default for SimWiring {
    /// DB4..DB7 on bits 0–3 of a 16-bit port, control lines on bits 8–10.
    fn default() -> Self {
        SimWiring {
            rs: 8,
            rw: 9,
            e: 10,
            data: 0,
        }
    }
}

/// One access to the simulated port or delay provider.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SimEvent {
    Write { mask: u32, value: u32 },
    Mode { mask: u32, mode: GpioPinMode },
    Read { value: u32 },
    Delay { ns: u64 },
}

/// Controller register selected by RS.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Register {
    Instruction,
    Data,
}

/// A nibble latched by the controller on a falling E edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Transfer {
    pub register: Register,
    pub nibble: u8,
}

/// A complete byte executed by the controller.
///
/// In 8-bit interface mode only DB7..DB4 are wired, so the low nibble reads as zero.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Received {
    pub register: Register,
    pub value: u8,
}

const DDRAM_SIZE: usize = 0x80;
const CGRAM_SIZE: usize = 0x40;
const ROW_OFFSETS: [u8; 4] = [0x00, 0x40, 0x14, 0x54];
const ROW_WIDTH: usize = 20;

#[derive(Debug)]
struct SimState {
    wiring: SimWiring,
    latch: u32,
    input_mask: u32,
    claimed: u32,
    events: Vec<SimEvent>,
    transfers: Vec<Transfer>,
    received: Vec<Received>,
    elapsed_ns: u64,

    four_bit: bool,
    pending_high: Option<u8>,
    read_high_phase: bool,
    presented: u8,
    busy_polls: u32,
    busy_remaining: u32,
    stuck_busy: bool,

    ddram: [u8; DDRAM_SIZE],
    cgram: [u8; CGRAM_SIZE],
    address: u8,
    cgram_selected: bool,
    increment: bool,
    display_on: bool,
}

impl SimState {
    fn bit(&self, index: usize) -> bool {
        self.latch & (1 << index) != 0
    }

    fn data_mask(&self) -> u32 {
        0b1111 << self.wiring.data
    }

    fn on_write(&mut self, old: u32) {
        let e_mask = 1 << self.wiring.e;
        let rw_mask = 1 << self.wiring.rw;

        if (old ^ self.latch) & rw_mask != 0 {
            self.read_high_phase = true;
        }

        let e_rose = old & e_mask == 0 && self.latch & e_mask != 0;
        let e_fell = old & e_mask != 0 && self.latch & e_mask == 0;

        if e_rose && self.bit(self.wiring.rw) {
            self.present_read();
        } else if e_fell && !self.bit(self.wiring.rw) {
            let register = if self.bit(self.wiring.rs) {
                Register::Data
            } else {
                Register::Instruction
            };
            let nibble = ((self.latch >> self.wiring.data) & 0b1111) as u8;
            self.latch_nibble(Transfer { register, nibble });
        }
    }

    fn present_read(&mut self) {
        if self.read_high_phase {
            let busy = self.stuck_busy || self.busy_remaining > 0;
            if !self.stuck_busy && self.busy_remaining > 0 {
                self.busy_remaining -= 1;
            }
            self.presented = ((busy as u8) << 3) | ((self.address >> 4) & 0b0111);
        } else {
            self.presented = self.address & 0b1111;
        }
        self.read_high_phase = !self.read_high_phase;
    }

    fn latch_nibble(&mut self, transfer: Transfer) {
        self.transfers.push(transfer);

        if !self.four_bit {
            self.pending_high = None;
            self.execute(transfer.register, transfer.nibble << 4);
            return;
        }

        match self.pending_high.take() {
            None => self.pending_high = Some(transfer.nibble),
            Some(high) => self.execute(transfer.register, (high << 4) | transfer.nibble),
        }
    }

    fn execute(&mut self, register: Register, value: u8) {
        trace!("sim: {:?} {:#04x}", register, value);
        self.received.push(Received { register, value });
        self.busy_remaining = self.busy_polls;

        match register {
            Register::Data => self.write_ram(value),
            Register::Instruction => self.execute_instruction(value),
        }
    }

    fn write_ram(&mut self, value: u8) {
        if self.cgram_selected {
            self.cgram[self.address as usize % CGRAM_SIZE] = value;
        } else {
            self.ddram[self.address as usize % DDRAM_SIZE] = value;
        }
        self.step_address(self.increment);
    }

    fn step_address(&mut self, forward: bool) {
        let size = (if self.cgram_selected { CGRAM_SIZE } else { DDRAM_SIZE }) as u8;
        self.address = if forward {
            self.address.wrapping_add(1) % size
        } else {
            self.address.checked_sub(1).unwrap_or(size - 1)
        };
    }

    fn execute_instruction(&mut self, value: u8) {
        match value.leading_zeros() {
            // Set DDRAM address
            0 => {
                self.cgram_selected = false;
                self.address = value & 0x7F;
            }
            // Set CGRAM address
            1 => {
                self.cgram_selected = true;
                self.address = value & 0x3F;
            }
            // Function set
            2 => {
                let four_bit = value & 0x10 == 0;
                if four_bit != self.four_bit {
                    self.pending_high = None;
                }
                self.four_bit = four_bit;
            }
            // Cursor or display shift
            3 => {
                if value & 0x08 == 0 {
                    self.step_address(value & 0x04 != 0);
                }
            }
            // Display on/off control
            4 => self.display_on = value & 0x04 != 0,
            // Entry mode set
            5 => self.increment = value & 0x02 != 0,
            // Return home
            6 => {
                self.cgram_selected = false;
                self.address = 0;
            }
            // Clear display
            7 => {
                self.ddram = [b' '; DDRAM_SIZE];
                self.cgram_selected = false;
                self.address = 0;
                self.increment = true;
            }
            _ => {}
        }
    }

    fn read_word(&self) -> u32 {
        let mut word = self.latch & !self.input_mask;
        let data_mask = self.data_mask();
        let reading = self.input_mask & data_mask == data_mask
            && self.bit(self.wiring.rw)
            && self.bit(self.wiring.e);
        if reading {
            word |= (self.presented as u32) << self.wiring.data;
        }
        word
    }
}

/// Simulated 16-bit GPIO port with an HD44780 controller attached.
///
/// Cloning gives another handle to the same port.
#[derive(Clone)]
pub struct SimPort {
    state: Rc<RefCell<SimState>>,
}

impl SimPort {
    pub const WIDTH: u32 = 16;

    pub fn new(wiring: SimWiring) -> Self {
        let state = SimState {
            wiring,
            latch: 0,
            input_mask: 0,
            claimed: 0,
            events: Vec::new(),
            transfers: Vec::new(),
            received: Vec::new(),
            elapsed_ns: 0,
            four_bit: false,
            pending_high: None,
            read_high_phase: true,
            presented: 0,
            busy_polls: 0,
            busy_remaining: 0,
            stuck_busy: false,
            ddram: [b' '; DDRAM_SIZE],
            cgram: [0; CGRAM_SIZE],
            address: 0,
            cgram_selected: false,
            increment: true,
            display_on: false,
        };
        SimPort {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// Creates a delay provider that records into this port's trace instead of blocking.
    pub fn delay(&self) -> SimDelay {
        SimDelay {
            state: Rc::clone(&self.state),
        }
    }

    pub fn wiring(&self) -> SimWiring {
        self.state.borrow().wiring
    }

    /// Makes the controller report busy for `polls` busy-flag reads after every executed byte.
    pub fn set_busy_polls(&self, polls: u32) {
        self.state.borrow_mut().busy_polls = polls;
    }

    /// Makes the controller report busy forever, as a hung or absent display would.
    pub fn set_stuck_busy(&self, stuck: bool) {
        self.state.borrow_mut().stuck_busy = stuck;
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.state.borrow().events.clone()
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        self.state.borrow().transfers.clone()
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.borrow().received.clone()
    }

    /// Forgets the recorded events, transfers and bytes, keeping the controller state.
    pub fn clear_trace(&self) {
        let mut state = self.state.borrow_mut();
        state.events.clear();
        state.transfers.clear();
        state.received.clear();
    }

    /// Total time spent in [SimDelay].
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.state.borrow().elapsed_ns)
    }

    pub fn output_word(&self) -> u32 {
        self.state.borrow().latch
    }

    pub fn level(&self, index: usize) -> bool {
        self.state.borrow().bit(index)
    }

    /// Pins currently configured as inputs.
    pub fn input_mask(&self) -> u32 {
        self.state.borrow().input_mask
    }

    pub fn is_four_bit(&self) -> bool {
        self.state.borrow().four_bit
    }

    pub fn is_display_on(&self) -> bool {
        self.state.borrow().display_on
    }

    /// Gets the characters shown on one row of a 4×20 display.
    pub fn row_text(&self, row: usize) -> Option<String> {
        let offset = *ROW_OFFSETS.get(row)? as usize;
        let state = self.state.borrow();
        let cells = &state.ddram[offset..offset + ROW_WIDTH];
        Some(cells.iter().map(|&c| c as char).collect())
    }

    /// Gets the eight pattern rows of a custom character.
    pub fn glyph(&self, slot: usize) -> Option<[u8; 8]> {
        let state = self.state.borrow();
        let rows = state.cgram.get(slot * 8..slot * 8 + 8)?;
        rows.try_into().ok()
    }
}

impl Debug for SimPort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimPort({:?})", self.state.borrow().wiring)
    }
}

impl GpioPort for SimPort {
    fn width(&self) -> u32 {
        Self::WIDTH
    }

    fn read_input(&self) -> GpioResult<u32> {
        let mut state = self.state.borrow_mut();
        let value = state.read_word();
        state.events.push(SimEvent::Read { value });
        Ok(value)
    }

    fn write_masked(&self, mask: u32, value: u32) -> GpioResult<()> {
        let mut state = self.state.borrow_mut();
        let old = state.latch;
        state.latch = (old & !mask) | (value & mask);
        state.events.push(SimEvent::Write { mask, value: value & mask });
        state.on_write(old);
        Ok(())
    }

    fn set_mode(&self, mask: u32, mode: GpioPinMode) -> GpioResult<()> {
        let mut state = self.state.borrow_mut();
        match mode {
            GpioPinMode::Input(_) => state.input_mask |= mask,
            GpioPinMode::Output => state.input_mask &= !mask,
        }
        state.events.push(SimEvent::Mode { mask, mode });
        Ok(())
    }

    fn claim(&self, mask: u32) -> GpioResult<()> {
        let mut state = self.state.borrow_mut();
        if state.claimed & mask != 0 {
            return Err(GpioError::AlreadyInUse);
        }
        state.claimed |= mask;
        Ok(())
    }

    fn release(&self, mask: u32) {
        self.state.borrow_mut().claimed &= !mask;
    }
}

impl GpioDriver for SimPort {
    fn count(&self) -> GpioResult<usize> {
        Ok(Self::WIDTH as usize)
    }

    fn output_pin(&self, index: usize) -> GpioResult<Box<dyn GpioOutput + '_>> {
        Ok(Box::new(PortPin::claim(self, index)?))
    }

    fn nibble_bus(&self, indices: [usize; 4]) -> GpioResult<Box<dyn NibbleBus + '_>> {
        Ok(Box::new(PortNibbleBus::claim(self, indices)?))
    }
}

/// Delay provider recording into a [SimPort] trace.
pub struct SimDelay {
    state: Rc<RefCell<SimState>>,
}

impl SimDelay {
    fn record(&mut self, ns: u64) {
        let mut state = self.state.borrow_mut();
        state.elapsed_ns += ns;
        state.events.push(SimEvent::Delay { ns });
    }
}

impl Debug for SimDelay {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimDelay")
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.record(ns.into());
    }

    fn delay_us(&mut self, us: u32) {
        self.record(u64::from(us) * 1_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.record(u64::from(ms) * 1_000_000);
    }
}
