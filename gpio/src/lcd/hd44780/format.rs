//! Numbers as display characters.
//!
//! Hex output is upper-case and fixed width; decimal output is left-justified without leading
//! zeros. Only [HD44780Driver::write_data] is used, so these work on any driver.
use crate::lcd::hd44780::driver::HD44780Driver;
use crate::GpioResult;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Longest decimal `u32`, `4294967295`.
pub const U32_DECIMAL_DIGITS: usize = 10;

pub fn hex_u8(value: u8) -> [u8; 2] {
    [
        HEX_DIGITS[(value >> 4) as usize],
        HEX_DIGITS[(value & 0x0F) as usize],
    ]
}

pub fn hex_u16(value: u16) -> [u8; 4] {
    let [high, low] = value.to_be_bytes().map(hex_u8);
    [high[0], high[1], low[0], low[1]]
}

pub fn hex_u32(value: u32) -> [u8; 8] {
    let mut digits = [0; 8];
    for (chunk, byte) in digits.chunks_exact_mut(2).zip(value.to_be_bytes()) {
        chunk.copy_from_slice(&hex_u8(byte));
    }
    digits
}

/// Writes the decimal digits of `value` to the end of `buffer` and returns them.
pub fn decimal_u32(value: u32, buffer: &mut [u8; U32_DECIMAL_DIGITS]) -> &[u8] {
    let mut start = U32_DECIMAL_DIGITS;
    let mut rest = value;
    loop {
        start -= 1;
        buffer[start] = b'0' + (rest % 10) as u8;
        rest /= 10;
        if rest == 0 {
            break;
        }
    }
    &buffer[start..]
}

pub trait PrintExt {
    /// Prints a byte as two hex digits.
    fn print_hex_u8(&mut self, value: u8) -> GpioResult<()>;
    /// Prints a 16-bit value as four hex digits.
    fn print_hex_u16(&mut self, value: u16) -> GpioResult<()>;
    /// Prints a 32-bit value as eight hex digits.
    fn print_hex_u32(&mut self, value: u32) -> GpioResult<()>;
    /// Prints a 32-bit value in decimal.
    fn print_u32(&mut self, value: u32) -> GpioResult<()>;
    /// Prints a 16-bit value in decimal.
    fn print_u16(&mut self, value: u16) -> GpioResult<()>;
}

impl<T: ?Sized + HD44780Driver> PrintExt for T {
    fn print_hex_u8(&mut self, value: u8) -> GpioResult<()> {
        write_all(self, &hex_u8(value))
    }

    fn print_hex_u16(&mut self, value: u16) -> GpioResult<()> {
        write_all(self, &hex_u16(value))
    }

    fn print_hex_u32(&mut self, value: u32) -> GpioResult<()> {
        write_all(self, &hex_u32(value))
    }

    fn print_u32(&mut self, value: u32) -> GpioResult<()> {
        let mut buffer = [0; U32_DECIMAL_DIGITS];
        write_all(self, decimal_u32(value, &mut buffer))
    }

    fn print_u16(&mut self, value: u16) -> GpioResult<()> {
        self.print_u32(value.into())
    }
}

fn write_all<T: ?Sized + HD44780Driver>(driver: &mut T, chars: &[u8]) -> GpioResult<()> {
    for &c in chars {
        driver.write_data(c)?;
    }
    Ok(())
}
