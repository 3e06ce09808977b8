//! Blocking delay provider for hosts running a full OS.
use embedded_hal::delay::DelayNs;
use std::hint::spin_loop;
use std::thread::sleep;
use std::time::{Duration, Instant};

/// [DelayNs] implementation backed by the standard library.
///
/// Waits of a millisecond or more go through [sleep]. Shorter ones spin on [Instant], since the
/// scheduler can't wake a sleeping thread in less than tens of microseconds. Either way the
/// delay lasts at least the requested duration.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl StdDelay {
    const SLEEP_THRESHOLD: Duration = Duration::from_millis(1);

    fn wait(duration: Duration) {
        if duration >= Self::SLEEP_THRESHOLD {
            sleep(duration);
            return;
        }

        let start = Instant::now();
        while start.elapsed() < duration {
            spin_loop();
        }
    }
}

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        Self::wait(Duration::from_nanos(ns.into()));
    }

    fn delay_us(&mut self, us: u32) {
        Self::wait(Duration::from_micros(us.into()));
    }

    fn delay_ms(&mut self, ms: u32) {
        Self::wait(Duration::from_millis(ms.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_last_at_least_the_requested_time() {
        let mut delay = StdDelay;

        let start = Instant::now();
        delay.delay_us(50);
        assert!(start.elapsed() >= Duration::from_micros(50));

        let start = Instant::now();
        delay.delay_ms(2);
        assert!(start.elapsed() >= Duration::from_millis(2));
    }
}
