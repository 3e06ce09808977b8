//! HD44780 LCD module.
//!
//! The [driver::HD44780Driver] trait is the command surface; [driver::GpioHD44780Driver] drives the
//! controller over a 4-bit parallel bus, polling the busy flag between bytes.
//! [address] maps rows and columns to DDRAM addresses and [format] prints numbers on top of the
//! command surface.

pub mod address;
pub mod driver;
pub mod format;
