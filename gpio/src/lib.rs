pub mod delay;
pub mod gpiod;
pub mod lcd;
pub mod port;
pub mod raw;
pub mod sim;

use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum GpioError {
    #[error("pin already in use")]
    AlreadyInUse,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("bus is not in the direction required by this operation")]
    WrongDirection,
    #[error("IO error: {0}")]
    Io(std::io::ErrorKind),
}

impl From<std::io::Error> for GpioError {
    fn from(err: std::io::Error) -> Self {
        GpioError::Io(err.kind())
    }
}

pub type GpioResult<T> = Result<T, GpioError>;

/// Hands out exclusively owned lines of a GPIO backend.
///
/// Every line is claimed when handed out and released when the returned handle is dropped,
/// so two handles can never drive the same pin.
pub trait GpioDriver: Debug {
    /// Gets the amount of GPIO pins available.
    fn count(&self) -> GpioResult<usize>;

    /// Claims the pin at the given index as a push-pull output, initially low.
    fn output_pin(&self, index: usize) -> GpioResult<Box<dyn GpioOutput + '_>>;

    /// Claims four pins as a nibble bus, `indices[0]` carrying the least significant bit.
    ///
    /// Port-based backends require the pins to be contiguous and ascending within one port word.
    fn nibble_bus(&self, indices: [usize; 4]) -> GpioResult<Box<dyn NibbleBus + '_>>;
}

/// Specifies the bias of the GPIO pin.
///
/// You can use this to enable pull-up or pull-down resistors.
/// [GpioBias::None] leaves an input floating.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioBias {
    #[default] None,
    PullUp,
    PullDown,
}

/// Electrical configuration of a pin.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GpioPinMode {
    Input(GpioBias),
    /// Push-pull output, driven high or low with low impedance.
    Output,
}

/// Direction of the data lines of a [NibbleBus].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum BusDirection {
    #[default] Output,
    Input,
}

impl BusDirection {
    /// Gets the pin mode used for the data lines: push-pull when writing, floating when reading.
    pub fn pin_mode(self) -> GpioPinMode {
        match self {
            BusDirection::Output => GpioPinMode::Output,
            BusDirection::Input => GpioPinMode::Input(GpioBias::None),
        }
    }
}

pub trait GpioOutput: Debug {
    /// Writes the state of the GPIO pin.
    fn write(&self, value: bool) -> GpioResult<()>;

    /// Drives the pin high.
    fn set(&self) -> GpioResult<()> {
        self.write(true)
    }

    /// Drives the pin low.
    fn reset(&self) -> GpioResult<()> {
        self.write(false)
    }
}

/// A physical port register: one word whose bits each back a pin.
///
/// All methods take `&self`, as the pins of one port are shared between several handles
/// ([port::PortPin], [port::PortNibbleBus]). Each handle only ever touches the bits it claimed.
pub trait GpioPort: Debug {
    /// Width of the port word in bits.
    fn width(&self) -> u32;

    /// Reads the input level of every pin of the port.
    fn read_input(&self) -> GpioResult<u32>;

    /// Updates the output state of the bits set in `mask` to the matching bits of `value`,
    /// leaving every other bit of the port untouched.
    fn write_masked(&self, mask: u32, value: u32) -> GpioResult<()>;

    /// Switches every pin set in `mask` to `mode`.
    fn set_mode(&self, mask: u32, mode: GpioPinMode) -> GpioResult<()>;

    /// Marks the pins in `mask` as used.
    ///
    /// # Errors
    /// - `GpioError::AlreadyInUse` if any of them is already claimed.
    fn claim(&self, mask: u32) -> GpioResult<()>;

    /// Marks the pins in `mask` as free again.
    fn release(&self, mask: u32);
}

/// Four data lines read and written together as one nibble.
pub trait NibbleBus: Debug {
    /// Writes the lowest four bits of `value` to the data lines, LSb on the first line.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if `value` doesn't fit in four bits.
    fn write_nibble(&mut self, value: u8) -> GpioResult<()>;

    /// Reads the data lines as a nibble, LSb first.
    fn read_nibble(&mut self) -> GpioResult<u8>;

    /// Switches all four lines to the given direction.
    /// Once this returns, either all lines are switched or the call failed.
    fn set_direction(&mut self, direction: BusDirection) -> GpioResult<()>;

    /// Gets the current direction of the lines.
    fn direction(&self) -> BusDirection;
}

/// Packs four line states into a nibble, LSb first.
pub fn nibble_from_bits(values: [bool; 4]) -> u8 {
    let mut nibble = 0u8;
    for (i, value) in values.into_iter().enumerate() {
        if value {
            nibble |= 1 << i;
        }
    }
    nibble
}

/// Unpacks a nibble into four line states, LSb first.
pub fn bits_from_nibble(value: u8) -> GpioResult<[bool; 4]> {
    if value > 0b1111 {
        return Err(GpioError::InvalidArgument);
    }

    let mut values = [false; 4];
    for (i, bit) in values.iter_mut().enumerate() {
        *bit = (value & (1 << i)) != 0;
    }
    Ok(values)
}
