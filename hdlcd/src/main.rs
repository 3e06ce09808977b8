mod app;
mod config;

use crate::app::App;
use crate::config::Config;
use dotenv::dotenv;
use embedded_hal::delay::DelayNs;
use hdlcd_gpio::delay::StdDelay;
use hdlcd_gpio::gpiod::GpiodDriver;
use hdlcd_gpio::lcd::hd44780::driver::GpioHD44780Driver;
use hdlcd_gpio::raw::RawGpioDriver;
use hdlcd_gpio::sim::{SimPort, SimWiring};
use hdlcd_gpio::GpioDriver;
use log::{debug, info, warn};
use std::env::var;
use std::fmt::Debug;
use std::thread;
use std::time::Duration;
use sysinfo::System;

/// Frames shown by the simulator when the config doesn't limit them.
const SIM_FRAMES: u32 = 10;

fn parse_pin_bus(pin_str: &str) -> eyre::Result<[usize; 4]> {
    pin_str
        .split([',', ' ', ';'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse())
        .collect::<Result<Vec<_>, _>>()?
        .try_into()
        .map_err(|_| eyre::eyre!("Invalid number of data pins"))
}

/// Pin numbers of the display lines.
#[derive(Debug, Clone, Copy)]
struct LcdPins {
    rs: usize,
    rw: Option<usize>,
    e: usize,
    /// DB4..DB7
    data: [usize; 4],
}

impl LcdPins {
    fn from_env() -> eyre::Result<Self> {
        let rw = match var("HDLCD_PIN_RW") {
            Ok(rw) => Some(rw.parse()?),
            Err(_) => None,
        };
        Ok(LcdPins {
            rs: var("HDLCD_PIN_RS")?.parse()?,
            rw,
            e: var("HDLCD_PIN_E")?.parse()?,
            data: parse_pin_bus(&var("HDLCD_PINS_DATA")?)?,
        })
    }

    /// Wiring of a simulated port carrying these pins.
    ///
    /// Without an R/W pin, R/W goes to the lowest port bit no other line uses; it stays low.
    fn sim_wiring(&self) -> eyre::Result<SimWiring> {
        let base = self.data[0];
        if (0..4).any(|i| self.data[i] != base + i) {
            return Err(eyre::eyre!(
                "Simulated data pins must be consecutive, got {:?}",
                self.data
            ));
        }
        let mut used = vec![self.rs, self.e];
        used.extend(self.rw);
        used.extend(self.data);
        let width = SimPort::WIDTH as usize;
        for (i, &pin) in used.iter().enumerate() {
            if pin >= width {
                return Err(eyre::eyre!("Pin {} is outside the {}-bit simulated port", pin, width));
            }
            if used[..i].contains(&pin) {
                return Err(eyre::eyre!("Pin {} is assigned to more than one line", pin));
            }
        }
        let rw = match self.rw {
            Some(rw) => rw,
            None => (0..width)
                .find(|pin| !used.contains(pin))
                .ok_or_else(|| eyre::eyre!("No free bit left for R/W"))?,
        };
        Ok(SimWiring {
            rs: self.rs,
            rw,
            e: self.e,
            data: base,
        })
    }

    fn from_sim_wiring(wiring: SimWiring) -> Self {
        let data = wiring.data;
        LcdPins {
            rs: wiring.rs,
            rw: Some(wiring.rw),
            e: wiring.e,
            data: [data, data + 1, data + 2, data + 3],
        }
    }
}

fn log_banner() {
    const UNKNOWN_STR: &str = "???";

    info!(
        "hdlcd {} on {}",
        env!("CARGO_PKG_VERSION"),
        System::name().as_deref().unwrap_or(UNKNOWN_STR)
    );
    info!(
        "System ver {} kernel ver {}",
        System::long_os_version().as_deref().unwrap_or(UNKNOWN_STR),
        System::kernel_version().as_deref().unwrap_or(UNKNOWN_STR),
    );
    info!(
        "Hostname {}",
        System::host_name().as_deref().unwrap_or(UNKNOWN_STR)
    );
    info!("Architecture {}", System::cpu_arch());
}

fn load_config() -> eyre::Result<Config> {
    debug!("Trying to load config...");
    let config = if let Some(config) = Config::try_load() {
        info!("Config loaded.");
        config
    } else {
        info!("Config not found. Using default");
        let config = Config::default();
        config.save()?;
        info!("Default config saved.");
        config
    };
    Ok(config)
}

/// Claims the display lines from `gpio` and runs the demo until the configured frame count.
fn run<D: DelayNs + Debug>(
    gpio: &dyn GpioDriver,
    delay: D,
    pins: LcdPins,
    config: &Config,
) -> eyre::Result<()> {
    info!(
        "LCD @ RS: {}, RW: {:?}, E: {}, Data: {:?}",
        pins.rs, pins.rw, pins.e, pins.data
    );
    if pins.rw.is_none() {
        warn!("No R/W pin, waiting {} µs before every byte", config.fallback_delay_us);
    }

    let pin_rs = gpio.output_pin(pins.rs)?;
    let pin_rw = pins.rw.map(|rw| gpio.output_pin(rw)).transpose()?;
    let pin_e = gpio.output_pin(pins.e)?;
    let mut data_bus = gpio.nibble_bus(pins.data)?;

    let mut lcd = GpioHD44780Driver::new_4bit(
        &*pin_rs,
        pin_rw.as_deref(),
        &*pin_e,
        &mut *data_bus,
        delay,
    )
    .with_busy_poll_config(config.busy_poll_config());

    {
        let mut app = App::new(config, &mut lcd);
        app.start()?;
        info!("Display started.");

        let refresh = Duration::from_millis(config.refresh_ms);
        while !app.finished() {
            app.update()?;
            thread::sleep(refresh);
        }
        app.stop()?;
    }

    info!(
        "Done, {} bytes sent without a ready busy flag.",
        lcd.busy_timeouts()
    );
    Ok(())
}

fn main() -> eyre::Result<()> {
    dotenv().ok();
    pretty_env_logger::init();

    log_banner();

    let mut config = load_config()?;
    let backend = var("HDLCD_BACKEND").unwrap_or_else(|_| "gpiomem".to_string());
    debug!("Using the {} backend", backend);

    match backend.as_str() {
        "raw" => {
            let gpio = RawGpioDriver::new_mem()?;
            run(&gpio, StdDelay, LcdPins::from_env()?, &config)?;
        }
        "gpiomem" => {
            let gpio = RawGpioDriver::new_gpiomem()?;
            run(&gpio, StdDelay, LcdPins::from_env()?, &config)?;
        }
        "gpiod" => {
            let chip = var("HDLCD_GPIOCHIP").unwrap_or_else(|_| "/dev/gpiochip0".to_string());
            let gpio = GpiodDriver::open(&chip)?;
            debug!("{:?} opened.", gpio);
            run(&gpio, StdDelay, LcdPins::from_env()?, &config)?;
        }
        "sim" => {
            let pins = if var("HDLCD_PIN_RS").is_ok() {
                LcdPins::from_env()?
            } else {
                LcdPins::from_sim_wiring(SimWiring::default())
            };
            let port = SimPort::new(pins.sim_wiring()?);
            config.frames.get_or_insert(SIM_FRAMES);
            config.refresh_ms = 0;

            run(&port, port.delay(), pins, &config)?;

            for row in 0..4 {
                if let Some(text) = port.row_text(row) {
                    info!("|{}|", text);
                }
            }
            info!("Simulated bus time: {:?}", port.elapsed());
        }
        other => return Err(eyre::eyre!("Unknown backend: {}", other)),
    }

    Ok(())
}
