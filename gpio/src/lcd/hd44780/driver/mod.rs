mod gpio;

use crate::lcd::hd44780::address::position_command;
use crate::{GpioError, GpioResult};
pub use gpio::*;
use log::{debug, warn};
use std::fmt::Debug;

/// Instruction bytes and init nibbles used by the driver.
pub mod commands {
    /// Function set nibble selecting the 8-bit interface, sent three times at power-on.
    pub const FUNCTION_SET_8BIT_NIBBLE: u8 = 0x03;
    /// Function set nibble selecting the 4-bit interface.
    pub const FUNCTION_SET_4BIT_NIBBLE: u8 = 0x02;

    pub const CLEAR_DISPLAY: u8 = 0x01;
    pub const RETURN_HOME: u8 = 0x02;
    /// Return home with the don't-care bit set.
    pub const RESET_CURSOR_POSITION: u8 = 0x03;
    pub const CURSOR_AUTO_INCREMENT: u8 = 0x06;
    pub const DISPLAY_OFF: u8 = 0x08;
    pub const DISPLAY_ON_CURSOR_OFF: u8 = 0x0C;
    pub const DISPLAY_CURSOR_ON: u8 = 0x0E;
    /// 4-bit interface, 2 lines, 5×10 font.
    pub const TWO_LINES_5X10: u8 = 0x2C;
    pub const SET_CGRAM_ADDRESS: u8 = 0x40;
    pub const SET_DDRAM_ADDRESS: u8 = 0x80;

    /// Full-byte commands sent once the 4-bit interface is active, in this exact order.
    pub const POWER_ON_SEQUENCE: [u8; 7] = [
        CURSOR_AUTO_INCREMENT,
        DISPLAY_CURSOR_ON,
        TWO_LINES_5X10,
        DISPLAY_OFF,
        CLEAR_DISPLAY,
        DISPLAY_ON_CURSOR_OFF,
        RESET_CURSOR_POSITION,
    ];
}

/// State of one attached display.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DisplaySession {
    /// The power-on sequence has completed.
    pub initialized: bool,
    /// The display output is turned on.
    pub enabled: bool,
}

pub trait HD44780Driver: Debug {
    /// Runs the power-on sequence, leaving the display cleared and on with the cursor at home.
    ///
    /// Marks the session as initialized.
    fn initialize(&mut self) -> GpioResult<()>;

    fn session(&self) -> &DisplaySession;

    fn session_mut(&mut self) -> &mut DisplaySession;

    /// Initializes the display on the first call, then turns it on.
    ///
    /// Safe to call any number of times; the power-on sequence runs at most once per session.
    fn start(&mut self) -> GpioResult<()> {
        if !self.session().initialized {
            self.initialize()?;
        }
        self.enable()
    }

    /// Turns the display on.
    fn enable(&mut self) -> GpioResult<()> {
        self.display_on()?;
        self.session_mut().enabled = true;
        Ok(())
    }

    /// Turns the display off. The contents are kept and come back with [Self::enable].
    fn stop(&mut self) -> GpioResult<()> {
        self.display_off()?;
        self.session_mut().enabled = false;
        Ok(())
    }

    /// Clears the display and sets the cursor to the home position.
    fn clear_display(&mut self) -> GpioResult<()> {
        self.write_command(commands::CLEAR_DISPLAY)
    }

    /// Sets the cursor to the home position.
    fn return_home(&mut self) -> GpioResult<()> {
        self.write_command(commands::RETURN_HOME)
    }

    fn display_on(&mut self) -> GpioResult<()> {
        self.write_command(commands::DISPLAY_ON_CURSOR_OFF)
    }

    fn display_off(&mut self) -> GpioResult<()> {
        self.write_command(commands::DISPLAY_OFF)
    }

    /// Sets the display to the specified entry mode.
    fn set_entry_mode(&mut self, cursor_direction: CursorDirection, shift: bool) -> GpioResult<()> {
        let mut command = 0b00000100;
        if cursor_direction == CursorDirection::Right {
            command |= 0b00000010;
        }
        if shift {
            command |= 0b00000001;
        }
        self.write_command(command)
    }

    /// Sets the display on/off, cursor on/off, and blinking on/off.
    fn set_display_control(
        &mut self,
        display_on: bool,
        cursor_on: bool,
        blink_on: bool,
    ) -> GpioResult<()> {
        let mut command = 0b00001000;
        if display_on {
            command |= 0b00000100;
        }
        if cursor_on {
            command |= 0b00000010;
        }
        if blink_on {
            command |= 0b00000001;
        }
        self.write_command(command)
    }

    /// Moves the cursor or scrolls the display by one character.
    fn cursor_shift(&mut self, display_shift: bool, direction: CursorDirection) -> GpioResult<()> {
        let mut command = 0b00010000;
        if display_shift {
            command |= 0b00001000;
        }
        if direction == CursorDirection::Right {
            command |= 0b00000100;
        }
        self.write_command(command)
    }

    /// Sets the function set.
    ///
    /// Sending `data_length = true` over a 4-bit bus switches the controller out of nibble mode.
    fn function_set(&mut self, data_length: bool, two_lines: bool, font: bool) -> GpioResult<()> {
        let mut command = 0b00100000;
        if data_length {
            command |= 0b00010000;
        }
        if two_lines {
            command |= 0b00001000;
        }
        if font {
            command |= 0b00000100;
        }
        self.write_command(command)
    }

    /// Sets the CGRAM address.
    fn set_cgram_address(&mut self, address: u8) -> GpioResult<()> {
        if address > 0b00111111 {
            return Err(GpioError::InvalidArgument);
        }
        self.write_command(commands::SET_CGRAM_ADDRESS | address)
    }

    /// Sets the DDRAM address.
    fn set_ddram_address(&mut self, address: u8) -> GpioResult<()> {
        if address > 0b01111111 {
            return Err(GpioError::InvalidArgument);
        }
        self.write_command(commands::SET_DDRAM_ADDRESS | address)
    }

    /// Moves the cursor to `row`, `column`.
    ///
    /// Rows outside 0–3 are ignored: no command is sent and the cursor stays where it was.
    /// The column is passed through unchecked, see [position_command].
    fn set_position(&mut self, row: u8, column: u8) -> GpioResult<()> {
        match position_command(row, column) {
            Some(command) => self.write_command(command),
            None => {
                debug!("Ignoring cursor position on row {}", row);
                Ok(())
            }
        }
    }

    /// Writes one character at the cursor.
    fn put_char(&mut self, c: u8) -> GpioResult<()> {
        self.write_data(c)
    }

    /// Writes a string at the cursor, stopping at the end of the string or at the first NUL.
    fn print(&mut self, s: &str) -> GpioResult<()> {
        for c in s.chars().take_while(|&c| c != '\0') {
            if c.is_ascii() {
                self.write_data(c as u8)?;
            } else {
                warn!("Non-ASCII character: {}", c);
                self.write_data(b'?')?;
            }
        }
        Ok(())
    }

    /// Loads a 5×8 custom character into CGRAM slot 0–7; it then prints as character `slot`.
    ///
    /// Leaves the address counter in CGRAM, so move the cursor with [Self::set_position] before
    /// printing again.
    fn define_char(&mut self, slot: u8, rows: &[u8; 8]) -> GpioResult<()> {
        if slot > 7 {
            return Err(GpioError::InvalidArgument);
        }
        self.set_cgram_address(slot * 8)?;
        for &row in rows {
            self.write_data(row & 0b00011111)?;
        }
        Ok(())
    }

    /// Writes an instruction byte. RS is low.
    fn write_command(&mut self, command: u8) -> GpioResult<()>;

    /// Writes a byte into the display RAM at the address counter. RS is high.
    fn write_data(&mut self, data: u8) -> GpioResult<()>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CursorDirection {
    /// Moves the cursor to the left after writing/reading data.
    Left,
    /// Moves the cursor to the right after writing/reading data.
    Right,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records commands without any bus underneath.
    #[derive(Debug, Default)]
    struct RecordingDriver {
        session: DisplaySession,
        initializations: u32,
        commands: Vec<u8>,
        data: Vec<u8>,
    }

    impl HD44780Driver for RecordingDriver {
        fn initialize(&mut self) -> GpioResult<()> {
            self.initializations += 1;
            self.session.initialized = true;
            Ok(())
        }

        fn session(&self) -> &DisplaySession {
            &self.session
        }

        fn session_mut(&mut self) -> &mut DisplaySession {
            &mut self.session
        }

        fn write_command(&mut self, command: u8) -> GpioResult<()> {
            self.commands.push(command);
            Ok(())
        }

        fn write_data(&mut self, data: u8) -> GpioResult<()> {
            self.data.push(data);
            Ok(())
        }
    }

    #[test]
    fn start_initializes_once_and_always_enables() {
        let mut driver = RecordingDriver::default();
        driver.start().unwrap();
        driver.start().unwrap();
        driver.start().unwrap();

        assert_eq!(driver.initializations, 1);
        assert_eq!(driver.commands, vec![commands::DISPLAY_ON_CURSOR_OFF; 3]);
        assert!(driver.session.enabled);
    }

    #[test]
    fn start_after_explicit_initialize_does_not_repeat_it() {
        let mut driver = RecordingDriver::default();
        driver.initialize().unwrap();
        driver.start().unwrap();
        assert_eq!(driver.initializations, 1);
    }

    #[test]
    fn stop_turns_the_display_off() {
        let mut driver = RecordingDriver::default();
        driver.start().unwrap();
        driver.stop().unwrap();
        assert_eq!(driver.commands.last(), Some(&commands::DISPLAY_OFF));
        assert!(!driver.session.enabled);
        assert!(driver.session.initialized);
    }

    #[test]
    fn invalid_rows_send_nothing() {
        let mut driver = RecordingDriver::default();
        driver.set_position(4, 0).unwrap();
        driver.set_position(255, 3).unwrap();
        assert!(driver.commands.is_empty());

        driver.set_position(2, 3).unwrap();
        assert_eq!(driver.commands, vec![0x97]);
    }

    #[test]
    fn print_stops_at_nul_and_replaces_non_ascii() {
        let mut driver = RecordingDriver::default();
        driver.print("Hé\0llo").unwrap();
        assert_eq!(driver.data, b"H?");
    }

    #[test]
    fn custom_characters_are_written_to_their_cgram_slot() {
        let mut driver = RecordingDriver::default();
        driver.define_char(2, &[0xFF; 8]).unwrap();
        assert_eq!(driver.commands, vec![0x50]);
        assert_eq!(driver.data, vec![0x1F; 8]);
        assert_eq!(driver.define_char(8, &[0; 8]), Err(GpioError::InvalidArgument));
    }

    #[test]
    fn display_control_bits() {
        let mut driver = RecordingDriver::default();
        driver.set_display_control(true, true, true).unwrap();
        driver.cursor_shift(true, CursorDirection::Left).unwrap();
        driver.set_entry_mode(CursorDirection::Right, false).unwrap();
        driver.return_home().unwrap();
        driver.function_set(false, true, true).unwrap();
        driver.set_ddram_address(0x7F).unwrap();
        driver.set_cgram_address(0x3F).unwrap();
        assert_eq!(driver.commands, vec![0x0F, 0x18, 0x06, 0x02, 0x2C, 0xFF, 0x7F]);

        assert_eq!(driver.set_ddram_address(0x80), Err(GpioError::InvalidArgument));
        assert_eq!(driver.set_cgram_address(0x40), Err(GpioError::InvalidArgument));
        assert_eq!(driver.commands.len(), 7);
    }
}
