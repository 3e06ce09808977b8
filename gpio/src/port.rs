//! Pin handles built on top of a [GpioPort] word.
//!
//! [PortPin] drives a single control line, [PortNibbleBus] drives four contiguous data lines with
//! a masked read-modify-write, so several handles can share one port without disturbing each other.
use crate::{BusDirection, GpioError, GpioOutput, GpioPinMode, GpioPort, GpioResult, NibbleBus};
use std::fmt::{Debug, Formatter};

/// A single output line backed by one bit of a [GpioPort].
pub struct PortPin<'a, P: GpioPort + ?Sized> {
    port: &'a P,
    bit: u32,
}

impl<'a, P: GpioPort + ?Sized> PortPin<'a, P> {
    /// Claims the pin at `index`, switches it to push-pull output and drives it low.
    pub fn claim(port: &'a P, index: usize) -> GpioResult<Self> {
        if index >= port.width() as usize {
            return Err(GpioError::InvalidArgument);
        }

        let bit = index as u32;
        let mask = 1 << bit;
        port.claim(mask)?;

        let pin = PortPin { port, bit };
        port.write_masked(mask, 0)?;
        port.set_mode(mask, GpioPinMode::Output)?;
        Ok(pin)
    }

    fn mask(&self) -> u32 {
        1 << self.bit
    }
}

impl<P: GpioPort + ?Sized> Debug for PortPin<'_, P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}]", self.port, self.bit)
    }
}

impl<P: GpioPort + ?Sized> GpioOutput for PortPin<'_, P> {
    fn write(&self, value: bool) -> GpioResult<()> {
        let mask = self.mask();
        self.port.write_masked(mask, if value { mask } else { 0 })
    }
}

impl<P: GpioPort + ?Sized> Drop for PortPin<'_, P> {
    fn drop(&mut self) {
        self.port.release(self.mask());
    }
}

/// Four contiguous bits of a [GpioPort] used as a nibble bus.
pub struct PortNibbleBus<'a, P: GpioPort + ?Sized> {
    port: &'a P,
    shift: u32,
    direction: BusDirection,
}

impl<'a, P: GpioPort + ?Sized> PortNibbleBus<'a, P> {
    /// Claims the four pins, which must be ascending and adjacent within the port word,
    /// drives them low and switches them to output.
    pub fn claim(port: &'a P, indices: [usize; 4]) -> GpioResult<Self> {
        let first = indices[0];
        let contiguous = indices
            .iter()
            .enumerate()
            .all(|(i, &index)| index == first + i);
        if !contiguous || first + 4 > port.width() as usize {
            return Err(GpioError::InvalidArgument);
        }

        let shift = first as u32;
        let mask = 0b1111 << shift;
        port.claim(mask)?;

        let bus = PortNibbleBus {
            port,
            shift,
            direction: BusDirection::Output,
        };
        port.write_masked(mask, 0)?;
        port.set_mode(mask, BusDirection::Output.pin_mode())?;
        Ok(bus)
    }

    /// Gets the mask of the data bits within the port word.
    pub fn mask(&self) -> u32 {
        0b1111 << self.shift
    }
}

impl<P: GpioPort + ?Sized> Debug for PortNibbleBus<'_, P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}[{}..{}][{:?}]",
            self.port,
            self.shift,
            self.shift + 4,
            self.direction
        )
    }
}

impl<P: GpioPort + ?Sized> NibbleBus for PortNibbleBus<'_, P> {
    fn write_nibble(&mut self, value: u8) -> GpioResult<()> {
        if value > 0b1111 {
            return Err(GpioError::InvalidArgument);
        }
        self.port
            .write_masked(self.mask(), (value as u32) << self.shift)
    }

    fn read_nibble(&mut self) -> GpioResult<u8> {
        let word = self.port.read_input()?;
        Ok(((word & self.mask()) >> self.shift) as u8)
    }

    fn set_direction(&mut self, direction: BusDirection) -> GpioResult<()> {
        self.port.set_mode(self.mask(), direction.pin_mode())?;
        self.direction = direction;
        Ok(())
    }

    fn direction(&self) -> BusDirection {
        self.direction
    }
}

impl<P: GpioPort + ?Sized> Drop for PortNibbleBus<'_, P> {
    fn drop(&mut self) {
        // Leave the data lines floating
        _ = self.port.set_mode(self.mask(), BusDirection::Input.pin_mode());
        self.port.release(self.mask());
    }
}
