//! GpiodDriver implementation for managing GPIO pins using the gpiod library.
//!
//! The character device has no port word, so the nibble bus requests its four lines together
//! and switches direction by releasing them and requesting them again.
use crate::{
    bits_from_nibble, nibble_from_bits, BusDirection, GpioBias, GpioDriver, GpioError, GpioOutput,
    GpioResult, NibbleBus,
};
use bitvec::vec::BitVec;
use log::trace;
use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::sync::atomic::AtomicU8;

/// GpiodDriver is a GPIO driver that uses the gpiod library to manage GPIO pins.
pub struct GpiodDriver {
    chip: gpiod::Chip,
    used_pins: BitVec<AtomicU8>,
}

impl GpiodDriver {
    pub fn new(chip: gpiod::Chip) -> Self {
        let n = chip.num_lines() as usize;
        let bits = BitVec::repeat(false, n);
        Self {
            chip,
            used_pins: bits,
        }
    }

    /// Opens the GPIO chip at the given path, e.g. `/dev/gpiochip0`.
    pub fn open(path: impl AsRef<Path>) -> GpioResult<Self> {
        Ok(Self::new(gpiod::Chip::new(path.as_ref())?))
    }

    fn claim(&self, indices: &[usize]) -> GpioResult<()> {
        let n = self.count()?;

        if indices.iter().any(|&index| index >= n) {
            return Err(GpioError::InvalidArgument);
        }

        if indices.iter().any(|&index| self.used_pins[index]) {
            return Err(GpioError::AlreadyInUse);
        }

        for &index in indices {
            self.used_pins.set_aliased(index, true);
        }
        Ok(())
    }

    fn release(&self, indices: &[usize]) {
        for &index in indices {
            self.used_pins.set_aliased(index, false);
        }
    }
}

impl Debug for GpiodDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpiodDriver({})", self.chip.name())
    }
}

impl GpioDriver for GpiodDriver {
    fn count(&self) -> GpioResult<usize> {
        Ok(self.chip.num_lines() as usize)
    }

    fn output_pin(&self, index: usize) -> GpioResult<Box<dyn GpioOutput + '_>> {
        self.claim(&[index])?;

        let line = self.chip.request_lines(
            gpiod::Options::output([index as u32]).consumer(env!("CARGO_PKG_NAME")),
        );
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                self.release(&[index]);
                return Err(err.into());
            }
        };

        Ok(Box::new(GpiodOutput {
            driver: self,
            pin_index: index,
            line,
        }))
    }

    fn nibble_bus(&self, indices: [usize; 4]) -> GpioResult<Box<dyn NibbleBus + '_>> {
        self.claim(&indices)?;

        let mut bus = GpiodNibbleBus {
            driver: self,
            pin_indices: indices,
            lines: None,
            direction: BusDirection::Output,
        };
        // Dropping the bus on failure releases the pins
        bus.set_direction(BusDirection::Output)?;
        bus.write_nibble(0)?;
        Ok(Box::new(bus))
    }
}

impl From<GpioBias> for gpiod::Bias {
    fn from(bias: GpioBias) -> Self {
        match bias {
            GpioBias::None => gpiod::Bias::Disable,
            GpioBias::PullUp => gpiod::Bias::PullUp,
            GpioBias::PullDown => gpiod::Bias::PullDown,
        }
    }
}

struct GpiodOutput<'a> {
    driver: &'a GpiodDriver,
    pin_index: usize,
    line: gpiod::Lines<gpiod::Output>,
}

impl Debug for GpiodOutput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}][output]", self.driver, self.pin_index)
    }
}

impl GpioOutput for GpiodOutput<'_> {
    fn write(&self, value: bool) -> GpioResult<()> {
        self.line.set_values([value])?;
        Ok(())
    }
}

impl Drop for GpiodOutput<'_> {
    fn drop(&mut self) {
        self.driver.release(&[self.pin_index]);
    }
}

enum GpiodLines {
    Input(gpiod::Lines<gpiod::Input>),
    Output(gpiod::Lines<gpiod::Output>),
}

struct GpiodNibbleBus<'a> {
    driver: &'a GpiodDriver,
    pin_indices: [usize; 4],
    lines: Option<GpiodLines>,
    direction: BusDirection,
}

impl GpiodNibbleBus<'_> {
    fn offsets(&self) -> [u32; 4] {
        self.pin_indices.map(|index| index as u32)
    }
}

impl Debug for GpiodNibbleBus<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}{:?}[{:?}]", self.driver, self.pin_indices, self.direction)
    }
}

impl NibbleBus for GpiodNibbleBus<'_> {
    fn write_nibble(&mut self, value: u8) -> GpioResult<()> {
        let values = bits_from_nibble(value)?;
        match &self.lines {
            Some(GpiodLines::Output(lines)) => {
                lines.set_values(values)?;
                Ok(())
            }
            _ => Err(GpioError::WrongDirection),
        }
    }

    fn read_nibble(&mut self) -> GpioResult<u8> {
        match &self.lines {
            Some(GpiodLines::Input(lines)) => {
                let values = lines.get_values([false; 4])?;
                Ok(nibble_from_bits(values))
            }
            _ => Err(GpioError::WrongDirection),
        }
    }

    fn set_direction(&mut self, direction: BusDirection) -> GpioResult<()> {
        trace!("{:?}: switching to {:?}", self, direction);

        // The old request has to be released before the lines can be requested again
        self.lines = None;

        let offsets = self.offsets();
        let lines = match direction {
            BusDirection::Output => GpiodLines::Output(self.driver.chip.request_lines(
                gpiod::Options::output(offsets).consumer(env!("CARGO_PKG_NAME")),
            )?),
            BusDirection::Input => GpiodLines::Input(self.driver.chip.request_lines(
                gpiod::Options::input(offsets)
                    .consumer(env!("CARGO_PKG_NAME"))
                    .bias(GpioBias::None.into()),
            )?),
        };

        self.lines = Some(lines);
        self.direction = direction;
        Ok(())
    }

    fn direction(&self) -> BusDirection {
        self.direction
    }
}

impl Drop for GpiodNibbleBus<'_> {
    fn drop(&mut self) {
        self.lines = None;
        self.driver.release(&self.pin_indices);
    }
}
