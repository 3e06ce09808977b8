//! The demo shown on the display: configured text plus a frame counter.

use crate::config::Config;
use hdlcd_gpio::GpioResult;
use hdlcd_gpio::lcd::hd44780::driver::HD44780Driver;
use hdlcd_gpio::lcd::hd44780::format::PrintExt;
use log::{debug, warn};

/// Rows of the largest supported display.
const ROWS: u8 = 4;

/// Rows left for the configured lines, top to bottom, skipping the counter row.
fn line_rows(counter_row: u8) -> Vec<u8> {
    (0..ROWS).filter(|&row| row != counter_row).collect()
}

pub struct App<'a> {
    config: &'a Config,
    lcd: &'a mut dyn HD44780Driver,
    /// Counter updates shown so far.
    frame: u32,
}

impl<'a> App<'a> {
    pub fn new(config: &'a Config, lcd: &'a mut dyn HD44780Driver) -> App<'a> {
        App {
            config,
            lcd,
            frame: 0,
        }
    }

    /// Brings the display up and prints the configured lines.
    pub fn start(&mut self) -> GpioResult<()> {
        self.lcd.start()?;
        self.lcd.clear_display()?;

        let config = self.config;
        let rows = line_rows(config.counter_row);
        if config.lines.len() > rows.len() {
            warn!(
                "Only the first {} lines fit next to the counter on row {}",
                rows.len(),
                config.counter_row
            );
        }
        for (&row, line) in rows.iter().zip(&config.lines) {
            self.lcd.set_position(row, 0)?;
            self.lcd.print(line)?;
        }
        Ok(())
    }

    /// Whether the configured number of frames has been shown.
    pub fn finished(&self) -> bool {
        self.config.frames.is_some_and(|frames| self.frame >= frames)
    }

    /// Prints the next counter value, in decimal and in hex.
    pub fn update(&mut self) -> GpioResult<()> {
        debug!("Frame {}", self.frame);

        self.lcd.set_position(self.config.counter_row, 0)?;
        self.lcd.print_u32(self.frame)?;
        self.lcd.put_char(b' ')?;
        self.lcd.print_hex_u32(self.frame)?;

        self.frame = self.frame.wrapping_add(1);
        Ok(())
    }

    /// Turns the display off, keeping its contents.
    pub fn stop(&mut self) -> GpioResult<()> {
        self.lcd.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdlcd_gpio::GpioDriver;
    use hdlcd_gpio::lcd::hd44780::driver::GpioHD44780Driver;
    use hdlcd_gpio::sim::{SimPort, SimWiring};

    #[test]
    fn lines_flow_around_the_counter_row() {
        assert_eq!(line_rows(0), vec![1, 2, 3]);
        assert_eq!(line_rows(2), vec![0, 1, 3]);
        assert_eq!(line_rows(7), vec![0, 1, 2, 3]);
    }

    #[test]
    fn line_on_the_counter_row_moves_below_it() {
        let port = SimPort::new(SimWiring::default());
        let wiring = port.wiring();
        let rs = port.output_pin(wiring.rs).unwrap();
        let rw = port.output_pin(wiring.rw).unwrap();
        let e = port.output_pin(wiring.e).unwrap();
        let mut bus = port.nibble_bus([0, 1, 2, 3]).unwrap();
        let mut lcd = GpioHD44780Driver::new_4bit(&*rs, Some(&*rw), &*e, &mut *bus, port.delay());

        let config = Config {
            lines: vec!["first".to_string(), "second".to_string()],
            counter_row: 0,
            frames: Some(1),
            ..Config::default()
        };
        let mut app = App::new(&config, &mut lcd);
        app.start().unwrap();
        app.update().unwrap();

        assert_eq!(port.row_text(0).unwrap().trim_end(), "0 00000000");
        assert_eq!(port.row_text(1).unwrap().trim_end(), "first");
        assert_eq!(port.row_text(2).unwrap().trim_end(), "second");
    }

    #[test]
    fn shows_lines_and_counts_frames() {
        let port = SimPort::new(SimWiring::default());
        let wiring = port.wiring();
        let rs = port.output_pin(wiring.rs).unwrap();
        let rw = port.output_pin(wiring.rw).unwrap();
        let e = port.output_pin(wiring.e).unwrap();
        let mut bus = port.nibble_bus([0, 1, 2, 3]).unwrap();
        let mut lcd = GpioHD44780Driver::new_4bit(&*rs, Some(&*rw), &*e, &mut *bus, port.delay());

        let config = Config {
            lines: vec!["top".to_string(), "second".to_string()],
            counter_row: 2,
            frames: Some(12),
            ..Config::default()
        };
        let mut app = App::new(&config, &mut lcd);
        app.start().unwrap();
        while !app.finished() {
            app.update().unwrap();
        }
        app.stop().unwrap();

        assert_eq!(port.row_text(0).unwrap().trim_end(), "top");
        assert_eq!(port.row_text(1).unwrap().trim_end(), "second");
        assert_eq!(port.row_text(2).unwrap().trim_end(), "11 0000000B");
        assert!(!port.is_display_on());
    }
}
