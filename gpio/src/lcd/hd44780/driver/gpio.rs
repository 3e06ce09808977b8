use crate::lcd::hd44780::driver::{commands, DisplaySession, HD44780Driver};
use crate::{BusDirection, GpioOutput, GpioResult, NibbleBus};
use embedded_hal::delay::DelayNs;
use log::{debug, trace, warn};
use std::fmt::Debug;

/// Limits of the busy-flag poller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BusyPollConfig {
    /// Poll iterations before the flag is ignored.
    ///
    /// This is a count, not a wall-clock bound: each iteration takes a few microseconds plus
    /// [Self::busy_retry_delay_us] when the controller reports busy.
    pub max_polls: u32,
    /// Extra wait after a poll that found the controller busy.
    pub busy_retry_delay_us: u32,
    /// Fixed wait before each byte when there is no R/W line to read the flag with.
    pub fallback_delay_us: u32,
}

impl Default for BusyPollConfig {
    /// The slowest instruction takes 1.52 ms at 270 kHz, 1617 µs with the oscillator at its
    /// lower tolerance; four times that in 16 µs steps gives 404 polls.
    fn default() -> Self {
        BusyPollConfig {
            max_polls: 0x651 * 4 / 16,
            busy_retry_delay_us: 10,
            fallback_delay_us: 2000,
        }
    }
}

/// Outcome of waiting for the controller before a byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusyStatus {
    /// The flag read as ready after `polls` iterations.
    Ready { polls: u32 },
    /// The flag still read busy after the whole budget. The byte was sent anyway.
    TimedOut,
    /// No R/W line is wired, so a fixed delay was used instead of polling.
    Skipped,
}

/// Splits a byte into its high and low nibble, in transmission order.
pub fn split_nibbles(byte: u8) -> (u8, u8) {
    (byte >> 4, byte & 0x0F)
}

/// Joins a high and a low nibble back into a byte.
pub fn join_nibbles(high: u8, low: u8) -> u8 {
    (high << 4) | (low & 0x0F)
}

/// HD44780 driver for a 4-bit bus on GPIO lines.
///
/// The R/W line is optional. When it's missing, the data lines never switch to input and every
/// byte is preceded by [BusyPollConfig::fallback_delay_us] instead of a busy-flag poll.
#[derive(Debug)]
pub struct GpioHD44780Driver<'a, D: DelayNs> {
    pin_rs: &'a dyn GpioOutput,
    pin_rw: Option<&'a dyn GpioOutput>,
    pin_e: &'a dyn GpioOutput,
    data_bus: &'a mut dyn NibbleBus,
    delay: D,
    config: BusyPollConfig,
    session: DisplaySession,
    last_busy: Option<BusyStatus>,
    busy_timeouts: u32,
}

impl<'a, D: DelayNs> GpioHD44780Driver<'a, D> {
    /// RS and R/W setup before E rises.
    const SETUP_US: u32 = 2;
    /// E high time of a write.
    const ENABLE_PULSE_US: u32 = 1;
    /// Address setup before E rises in a read cycle.
    const ADDRESS_SETUP_NS: u32 = 40;
    /// E high time before the data lines are sampled in a read cycle.
    const DATA_SETUP_US: u32 = 1;
    /// DB7 within the high nibble.
    const BUSY_FLAG: u8 = 0b1000;

    pub fn new_4bit(
        pin_rs: &'a dyn GpioOutput,
        pin_rw: Option<&'a dyn GpioOutput>,
        pin_e: &'a dyn GpioOutput,
        data_bus: &'a mut dyn NibbleBus,
        delay: D,
    ) -> Self {
        GpioHD44780Driver {
            pin_rs,
            pin_rw,
            pin_e,
            data_bus,
            delay,
            config: BusyPollConfig::default(),
            session: DisplaySession::default(),
            last_busy: None,
            busy_timeouts: 0,
        }
    }

    pub fn with_busy_poll_config(mut self, config: BusyPollConfig) -> Self {
        self.config = config;
        self
    }

    pub fn busy_poll_config(&self) -> BusyPollConfig {
        self.config
    }

    /// Gets the outcome of the most recent wait before a byte, if any byte was sent.
    pub fn last_busy_status(&self) -> Option<BusyStatus> {
        self.last_busy
    }

    /// Gets how many bytes were sent after the busy flag timed out.
    pub fn busy_timeouts(&self) -> u32 {
        self.busy_timeouts
    }

    fn write_nibble(&mut self, nibble: u8, rs: bool) -> GpioResult<()> {
        trace!("Writing nibble: {:04b}, RS: {}", nibble, rs);

        self.pin_rs.write(rs)?;
        if let Some(rw) = self.pin_rw {
            rw.reset()?;
        }
        self.delay.delay_us(Self::SETUP_US);

        self.data_bus.write_nibble(nibble)?;

        self.pin_e.set()?;
        self.delay.delay_us(Self::ENABLE_PULSE_US);
        self.pin_e.reset()?;
        Ok(())
    }

    /// Clocks one nibble into the data register.
    pub fn write_data_nibble(&mut self, nibble: u8) -> GpioResult<()> {
        self.write_nibble(nibble, true)
    }

    /// Clocks one nibble into the instruction register.
    pub fn write_control_nibble(&mut self, nibble: u8) -> GpioResult<()> {
        self.write_nibble(nibble, false)
    }

    /// Waits until the controller can take another byte, or until the poll budget runs out.
    ///
    /// The bus is back in write mode when this returns, including when a pin access failed.
    pub fn wait_ready(&mut self) -> GpioResult<BusyStatus> {
        let status = match self.pin_rw {
            None => {
                self.delay.delay_us(self.config.fallback_delay_us);
                BusyStatus::Skipped
            }
            Some(pin_rw) => {
                let polled = self.poll_busy_flag(pin_rw);
                let restored = self.restore_write_mode(pin_rw);
                let status = polled?;
                restored?;
                status
            }
        };

        if status == BusyStatus::TimedOut {
            self.busy_timeouts += 1;
            warn!(
                "Busy flag still set after {} polls, sending anyway",
                self.config.max_polls
            );
        }
        self.last_busy = Some(status);
        Ok(status)
    }

    fn poll_busy_flag(&mut self, pin_rw: &dyn GpioOutput) -> GpioResult<BusyStatus> {
        self.data_bus.write_nibble(0)?;
        self.data_bus.set_direction(BusDirection::Input)?;
        self.pin_rs.reset()?;
        pin_rw.set()?;

        for poll in 1..=self.config.max_polls {
            // First pulse carries BF and AC6..AC4
            self.delay.delay_ns(Self::ADDRESS_SETUP_NS);
            self.pin_e.set()?;
            self.delay.delay_us(Self::DATA_SETUP_US);
            let busy = self.data_bus.read_nibble()? & Self::BUSY_FLAG != 0;
            self.pin_e.reset()?;

            // Second pulse carries AC3..AC0, which we don't need
            self.delay.delay_ns(Self::ADDRESS_SETUP_NS);
            self.pin_e.set()?;
            self.delay.delay_us(Self::DATA_SETUP_US);
            self.pin_e.reset()?;

            trace!("Busy flag poll {}: {}", poll, busy);
            if !busy {
                return Ok(BusyStatus::Ready { polls: poll });
            }
            self.delay.delay_us(self.config.busy_retry_delay_us);
        }

        Ok(BusyStatus::TimedOut)
    }

    fn restore_write_mode(&mut self, pin_rw: &dyn GpioOutput) -> GpioResult<()> {
        let rw = pin_rw.reset();
        let direction = self.data_bus.set_direction(BusDirection::Output);
        rw?;
        direction
    }

    fn write_byte(&mut self, byte: u8, rs: bool) -> GpioResult<()> {
        self.wait_ready()?;
        trace!("Sending byte: {:08b}, RS: {}", byte, rs);

        let (high, low) = split_nibbles(byte);
        self.write_nibble(high, rs)?;
        self.write_nibble(low, rs)
    }
}

impl<D: DelayNs + Debug> HD44780Driver for GpioHD44780Driver<'_, D> {
    fn initialize(&mut self) -> GpioResult<()> {
        debug!("Initializing display");

        self.data_bus.set_direction(BusDirection::Output)?;
        self.pin_e.reset()?;
        self.delay.delay_ms(40);

        // The controller may be in any interface mode here, so nothing can be polled yet
        self.write_control_nibble(commands::FUNCTION_SET_8BIT_NIBBLE)?;
        self.delay.delay_ms(5);
        self.write_control_nibble(commands::FUNCTION_SET_8BIT_NIBBLE)?;
        self.delay.delay_ms(15);
        self.write_control_nibble(commands::FUNCTION_SET_8BIT_NIBBLE)?;
        self.delay.delay_ms(1);
        self.write_control_nibble(commands::FUNCTION_SET_4BIT_NIBBLE)?;
        self.delay.delay_ms(5);

        debug!("Interface in 4-bit mode");
        for command in commands::POWER_ON_SEQUENCE {
            self.write_command(command)?;
        }
        self.delay.delay_ms(5);

        self.session.initialized = true;
        self.session.enabled = true;
        debug!("Display initialized");
        Ok(())
    }

    fn session(&self) -> &DisplaySession {
        &self.session
    }

    fn session_mut(&mut self) -> &mut DisplaySession {
        &mut self.session
    }

    fn write_command(&mut self, command: u8) -> GpioResult<()> {
        self.write_byte(command, false)
    }

    fn write_data(&mut self, data: u8) -> GpioResult<()> {
        self.write_byte(data, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Received, Register, SimDelay, SimEvent, SimPort, SimWiring, Transfer};
    use crate::GpioDriver;
    use proptest::prelude::*;

    /// Port state taken before the driver's pins are released.
    ///
    /// Dropping the nibble bus floats the data lines, which would otherwise show up in the trace.
    struct Snapshot {
        events: Vec<SimEvent>,
        input_mask: u32,
    }

    fn with_driver<R>(
        port: &SimPort,
        with_rw: bool,
        config: BusyPollConfig,
        f: impl FnOnce(&mut GpioHD44780Driver<'_, SimDelay>) -> R,
    ) -> (R, Snapshot) {
        let wiring = port.wiring();
        let rs = port.output_pin(wiring.rs).unwrap();
        let rw = with_rw.then(|| port.output_pin(wiring.rw).unwrap());
        let e = port.output_pin(wiring.e).unwrap();
        let data = wiring.data;
        let mut bus = port
            .nibble_bus([data, data + 1, data + 2, data + 3])
            .unwrap();

        let mut driver =
            GpioHD44780Driver::new_4bit(&*rs, rw.as_deref(), &*e, &mut *bus, port.delay())
                .with_busy_poll_config(config);
        let result = f(&mut driver);
        let snapshot = Snapshot {
            events: port.events(),
            input_mask: port.input_mask(),
        };
        (result, snapshot)
    }

    fn instructions(values: &[u8]) -> Vec<Received> {
        values
            .iter()
            .map(|&value| Received {
                register: Register::Instruction,
                value,
            })
            .collect()
    }

    fn write(mask: u32, value: u32) -> SimEvent {
        SimEvent::Write { mask, value }
    }

    fn read_count(events: &[SimEvent]) -> usize {
        events
            .iter()
            .filter(|event| matches!(event, SimEvent::Read { .. }))
            .count()
    }

    #[test]
    fn nibbles_split_high_first() {
        assert_eq!(split_nibbles(0x41), (0x4, 0x1));
        assert_eq!(split_nibbles(0xF0), (0xF, 0x0));
        for byte in 0..=u8::MAX {
            let (high, low) = split_nibbles(byte);
            assert!(high <= 0xF && low <= 0xF);
            assert_eq!(join_nibbles(high, low), byte);
        }
    }

    #[test]
    fn busy_poll_limit_defaults_to_404() {
        assert_eq!(BusyPollConfig::default().max_polls, 404);
    }

    #[test]
    fn data_and_control_nibbles_differ_only_in_rs() {
        let wiring = SimWiring::default();
        let rs_mask = 1 << wiring.rs;

        for nibble in [0x0, 0x5, 0xA, 0xF] {
            let traces: Vec<Vec<SimEvent>> = [true, false]
                .into_iter()
                .map(|data| {
                    let port = SimPort::new(wiring);
                    let (_, snapshot) =
                        with_driver(&port, true, BusyPollConfig::default(), |driver| {
                            port.clear_trace();
                            if data {
                                driver.write_data_nibble(nibble).unwrap();
                            } else {
                                driver.write_control_nibble(nibble).unwrap();
                            }
                        });
                    snapshot.events
                })
                .collect();

            assert_eq!(traces[0].len(), traces[1].len());
            for (data, control) in traces[0].iter().zip(&traces[1]) {
                match (data, control) {
                    (
                        SimEvent::Write { mask: m1, value: v1 },
                        SimEvent::Write { mask: m2, value: v2 },
                    ) if *m1 == rs_mask => {
                        assert_eq!(*m2, rs_mask);
                        assert_eq!((*v1, *v2), (rs_mask, 0));
                    }
                    _ => assert_eq!(data, control),
                }
            }
        }
    }

    #[test]
    fn writing_a_character_sends_two_data_nibbles_in_order() {
        let wiring = SimWiring::default();
        let port = SimPort::new(wiring);
        let rs = 1 << wiring.rs;
        let rw = 1 << wiring.rw;
        let e = 1 << wiring.e;

        let (_, snapshot) = with_driver(&port, true, BusyPollConfig::default(), |driver| {
            port.clear_trace();
            driver.write_data(b'A').unwrap();
            assert_eq!(driver.last_busy_status(), Some(BusyStatus::Ready { polls: 1 }));
        });

        assert_eq!(
            port.transfers(),
            vec![
                Transfer { register: Register::Data, nibble: 0x4 },
                Transfer { register: Register::Data, nibble: 0x1 },
            ]
        );

        let events = snapshot.events;
        let last_mode = events
            .iter()
            .rposition(|event| matches!(event, SimEvent::Mode { .. }))
            .unwrap();
        let nibble = |value: u32| {
            vec![
                write(rs, rs),
                write(rw, 0),
                SimEvent::Delay { ns: 2_000 },
                write(0b1111, value),
                write(e, e),
                SimEvent::Delay { ns: 1_000 },
                write(e, 0),
            ]
        };
        let expected: Vec<SimEvent> = nibble(0x4).into_iter().chain(nibble(0x1)).collect();
        assert_eq!(events[last_mode + 1..], expected[..]);
    }

    #[test]
    fn poller_retries_while_busy() {
        let port = SimPort::new(SimWiring::default());
        port.set_busy_polls(3);

        let (_, snapshot) = with_driver(&port, true, BusyPollConfig::default(), |driver| {
            driver.write_command(0x01).unwrap();
            port.clear_trace();

            assert_eq!(driver.wait_ready().unwrap(), BusyStatus::Ready { polls: 4 });
            assert_eq!(driver.busy_timeouts(), 0);
        });

        let events = snapshot.events;
        assert_eq!(read_count(&events), 4);
        let retries = events
            .iter()
            .filter(|event| **event == SimEvent::Delay { ns: 10_000 })
            .count();
        assert_eq!(retries, 3);
    }

    #[test]
    fn poller_enters_read_mode_and_restores_write_mode() {
        let wiring = SimWiring::default();
        let port = SimPort::new(wiring);
        let data_mask = 0b1111 << wiring.data;

        let (_, snapshot) = with_driver(&port, true, BusyPollConfig::default(), |driver| {
            driver.write_data(0xFF).unwrap();
            port.clear_trace();
            driver.wait_ready().unwrap();
        });

        let events = snapshot.events;
        let rs = 1 << wiring.rs;
        let rw = 1 << wiring.rw;
        assert_eq!(
            events[..4],
            [
                write(data_mask, 0),
                SimEvent::Mode { mask: data_mask, mode: BusDirection::Input.pin_mode() },
                write(rs, 0),
                write(rw, rw),
            ]
        );
        assert_eq!(
            events[events.len() - 2..],
            [
                write(rw, 0),
                SimEvent::Mode { mask: data_mask, mode: BusDirection::Output.pin_mode() },
            ]
        );
        assert_eq!(snapshot.input_mask, 0);
        assert!(port.transfers().is_empty());
    }

    #[test]
    fn poller_gives_up_after_max_polls_and_still_sends() {
        let wiring = SimWiring::default();
        let port = SimPort::new(wiring);
        let config = BusyPollConfig {
            max_polls: 5,
            ..BusyPollConfig::default()
        };

        let (rw_level, snapshot) = with_driver(&port, true, config, |driver| {
            driver.initialize().unwrap();
            port.set_stuck_busy(true);
            port.clear_trace();

            driver.write_data(b'x').unwrap();
            assert_eq!(driver.last_busy_status(), Some(BusyStatus::TimedOut));
            driver.write_data(b'y').unwrap();
            assert_eq!(driver.busy_timeouts(), 2);
            port.level(wiring.rw)
        });

        assert_eq!(read_count(&snapshot.events), 10);
        assert_eq!(
            port.received(),
            vec![
                Received { register: Register::Data, value: b'x' },
                Received { register: Register::Data, value: b'y' },
            ]
        );
        assert!(!rw_level);
        assert_eq!(snapshot.input_mask, 0);
    }

    #[test]
    fn write_only_wiring_waits_instead_of_polling() {
        let port = SimPort::new(SimWiring::default());

        let (_, snapshot) = with_driver(&port, false, BusyPollConfig::default(), |driver| {
            port.clear_trace();
            driver.write_command(0x0C).unwrap();
            assert_eq!(driver.last_busy_status(), Some(BusyStatus::Skipped));
        });

        let events = snapshot.events;
        assert_eq!(events[0], SimEvent::Delay { ns: 2_000_000 });
        assert_eq!(read_count(&events), 0);
        assert!(!events.iter().any(|event| matches!(event, SimEvent::Mode { .. })));
    }

    #[test]
    fn initialization_follows_the_power_on_sequence() {
        let port = SimPort::new(SimWiring::default());

        let (_, snapshot) = with_driver(&port, true, BusyPollConfig::default(), |driver| {
            port.clear_trace();
            driver.initialize().unwrap();
            assert!(driver.session().initialized);
        });

        assert_eq!(
            port.received(),
            instructions(&[0x30, 0x30, 0x30, 0x20, 0x06, 0x0E, 0x2C, 0x08, 0x01, 0x0C, 0x03])
        );
        assert!(port.is_four_bit());
        assert!(port.is_display_on());

        // The four interface nibbles come before any read of the busy flag
        let events = snapshot.events;
        let first_read = events
            .iter()
            .position(|event| matches!(event, SimEvent::Read { .. }))
            .unwrap();
        let falls_before_read = events[..first_read]
            .iter()
            .filter(|event| **event == write(1 << 10, 0))
            .count();
        assert_eq!(falls_before_read, 5);

        assert_eq!(events[2], SimEvent::Delay { ns: 40_000_000 });
        assert_eq!(events.last(), Some(&SimEvent::Delay { ns: 5_000_000 }));
    }

    #[test]
    fn start_initializes_only_once() {
        let port = SimPort::new(SimWiring::default());

        with_driver(&port, true, BusyPollConfig::default(), |driver| {
            driver.start().unwrap();
            driver.start().unwrap();
            driver.start().unwrap();
            assert!(driver.session().enabled);
        });

        let received = port.received();
        let resets = received.iter().filter(|r| r.value == 0x30).count();
        assert_eq!(resets, 3);
        let enables = received.iter().filter(|r| r.value == 0x0C).count();
        assert_eq!(enables, 4);
    }

    proptest! {
        #[test]
        fn any_byte_arrives_intact(byte in any::<u8>(), data in any::<bool>()) {
            let port = SimPort::new(SimWiring::default());
            with_driver(&port, true, BusyPollConfig::default(), |driver| {
                driver.initialize().unwrap();
                port.clear_trace();
                if data {
                    driver.write_data(byte).unwrap();
                } else {
                    driver.write_command(byte).unwrap();
                }
            });

            let register = if data { Register::Data } else { Register::Instruction };
            prop_assert_eq!(port.received(), vec![Received { register, value: byte }]);
        }
    }
}
