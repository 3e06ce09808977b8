//! Memory-mapped BCM283x GPIO driver.
//!
//! Exposes GPIO bank 0 (pins 0–31) as a single [GpioPort] word: levels come from `GPLEV0`,
//! masked writes go through `GPSET0`/`GPCLR0`, so no other pin of the bank is ever rewritten.
use crate::port::{PortNibbleBus, PortPin};
use crate::{GpioBias, GpioDriver, GpioError, GpioOutput, GpioPinMode, GpioPort, GpioResult, NibbleBus};
use bitvec::vec::BitVec;
use memmap2::{MmapOptions, MmapRaw};
use std::fmt::{Debug, Formatter};
use std::fs::OpenOptions;
use std::sync::atomic::AtomicU8;

pub struct RawGpioDriver {
    mmap: MmapRaw,
    used_pins: BitVec<AtomicU8>,
}

impl RawGpioDriver {
    // 0x7e200000
    // const GPIO_BASE: u32 = 0xFE200000;
    const GPIO_BASE: u32 = 0x3F200000;

    /// Pins of bank 0, the only bank exposed as a port.
    const BANK_WIDTH: u32 = 32;

    const GPFSEL0: usize = 0x00 / 4;
    const GPSET0: usize = 0x1C / 4;
    const GPCLR0: usize = 0x28 / 4;
    const GPLEV0: usize = 0x34 / 4;
    const GPIO_PUP_PDN_CNTRL_REG0: usize = 0xE4 / 4;

    const FUNCTION_INPUT: u32 = 0b000;
    const FUNCTION_OUTPUT: u32 = 0b001;

    fn create(path: &str) -> GpioResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;

        let mmap = MmapOptions::new()
                .offset(Self::GPIO_BASE as u64)
                .len(4096)
                .map_raw(&file)?;

        Ok(RawGpioDriver {
            mmap,
            used_pins: BitVec::repeat(false, Self::BANK_WIDTH as usize),
        })
    }

    pub fn new_gpiomem() -> GpioResult<Self> {
        Self::create("/dev/gpiomem")
    }

    pub fn new_mem() -> GpioResult<Self> {
        Self::create("/dev/mem")
    }

    fn read_register(&self, offset: usize) -> u32 {
        let mmap = self.mmap.as_ptr() as *const u32;
        unsafe { mmap.add(offset).read_volatile() }
    }

    fn write_register(&self, offset: usize, value: u32) {
        let mmap = self.mmap.as_mut_ptr() as *mut u32;
        unsafe { mmap.add(offset).write_volatile(value) };
    }

    /// Sets the function of every pin in `mask`, with one read-modify-write per `GPFSELn` register.
    fn set_function_masked(&self, mask: u32, function: u32) {
        // Each GPFSELn register holds 10 pins, 3 bits each
        for register in 0..=(Self::BANK_WIDTH as usize / 10) {
            let mut register_value = self.read_register(Self::GPFSEL0 + register);
            let mut changed = false;
            for slot in 0..10 {
                let pin = register * 10 + slot;
                if pin >= Self::BANK_WIDTH as usize || mask & (1 << pin) == 0 {
                    continue;
                }
                let shift = slot * 3;
                register_value &= !(0b111 << shift); // Clear the bits for this pin
                register_value |= function << shift;
                changed = true;
            }
            if changed {
                self.write_register(Self::GPFSEL0 + register, register_value);
            }
        }
    }

    /// Sets the pull resistors of every pin in `mask`.
    ///
    /// GPIO_PUP_PDN_CNTRL_REGn (yes that is a long name) holds 16 pins, 2 bits each.
    fn set_bias_masked(&self, mask: u32, bias: GpioBias) {
        let bias_value = match bias {
            GpioBias::None => 0b00,
            GpioBias::PullUp => 0b01,
            GpioBias::PullDown => 0b10,
        };

        for register in 0..(Self::BANK_WIDTH as usize / 16) {
            let bits = (mask >> (register * 16)) & 0xFFFF;
            if bits == 0 {
                continue;
            }
            let mut register_value = self.read_register(Self::GPIO_PUP_PDN_CNTRL_REG0 + register);
            for slot in 0..16 {
                if bits & (1 << slot) == 0 {
                    continue;
                }
                let shift = slot * 2;
                register_value &= !(0b11 << shift);
                register_value |= bias_value << shift;
            }
            self.write_register(Self::GPIO_PUP_PDN_CNTRL_REG0 + register, register_value);
        }
    }
}

impl Debug for RawGpioDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawGpioDriver({:?})", self.mmap.as_ptr().addr())
    }
}

impl GpioPort for RawGpioDriver {
    fn width(&self) -> u32 {
        Self::BANK_WIDTH
    }

    fn read_input(&self) -> GpioResult<u32> {
        Ok(self.read_register(Self::GPLEV0))
    }

    fn write_masked(&self, mask: u32, value: u32) -> GpioResult<()> {
        let set = value & mask;
        let clear = !value & mask;
        if set != 0 {
            self.write_register(Self::GPSET0, set);
        }
        if clear != 0 {
            self.write_register(Self::GPCLR0, clear);
        }
        Ok(())
    }

    fn set_mode(&self, mask: u32, mode: GpioPinMode) -> GpioResult<()> {
        match mode {
            GpioPinMode::Input(bias) => {
                self.set_function_masked(mask, Self::FUNCTION_INPUT);
                self.set_bias_masked(mask, bias);
            }
            GpioPinMode::Output => {
                self.set_function_masked(mask, Self::FUNCTION_OUTPUT);
            }
        }
        Ok(())
    }

    fn claim(&self, mask: u32) -> GpioResult<()> {
        let pins = (0..Self::BANK_WIDTH as usize).filter(|&pin| mask & (1 << pin) != 0);

        if pins.clone().any(|pin| self.used_pins[pin]) {
            return Err(GpioError::AlreadyInUse);
        }

        for pin in pins {
            self.used_pins.set_aliased(pin, true);
        }
        Ok(())
    }

    fn release(&self, mask: u32) {
        for pin in (0..Self::BANK_WIDTH as usize).filter(|&pin| mask & (1 << pin) != 0) {
            self.used_pins.set_aliased(pin, false);
        }
    }
}

impl GpioDriver for RawGpioDriver {
    fn count(&self) -> GpioResult<usize> {
        Ok(Self::BANK_WIDTH as usize)
    }

    fn output_pin(&self, index: usize) -> GpioResult<Box<dyn GpioOutput + '_>> {
        Ok(Box::new(PortPin::claim(self, index)?))
    }

    fn nibble_bus(&self, indices: [usize; 4]) -> GpioResult<Box<dyn NibbleBus + '_>> {
        Ok(Box::new(PortNibbleBus::claim(self, indices)?))
    }
}
