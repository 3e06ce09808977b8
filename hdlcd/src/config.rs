use std::env::var_os;
use std::ffi::OsStr;
use std::path::Path;
use dotenv::var;
use hdlcd_gpio::lcd::hd44780::driver::BusyPollConfig;
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_FILE: &str = "hdlcd.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Text shown on the rows above the counter, one entry per row.
    pub lines: Vec<String>,
    /// Row the frame counter is printed on.
    pub counter_row: u8,
    /// Time between two counter updates.
    pub refresh_ms: u64,
    /// Stops after this many counter updates. Runs forever when missing.
    pub frames: Option<u32>,
    pub max_busy_polls: u32,
    pub busy_retry_delay_us: u32,
    pub fallback_delay_us: u32,
}

impl Config {
    pub fn try_load() -> Option<Self> {
        let config_str = var_os("HDLCD_CONFIG_FILE");
        let config_str: &OsStr = config_str
            .as_deref()
            .unwrap_or(OsStr::new(DEFAULT_CONFIG_FILE));
        let config_path = Path::new(config_str);
        if config_path.exists() {
            let file = std::fs::File::open(config_path).ok()?;
            let reader = std::io::BufReader::new(file);
            serde_json::from_reader(reader).ok()
        } else {
            None
        }
    }

    pub fn save(&self) -> std::io::Result<()> {
        let config_str =
            var("HDLCD_CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let config_path = Path::new(&config_str);
        let file = std::fs::File::create(config_path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn busy_poll_config(&self) -> BusyPollConfig {
        BusyPollConfig {
            max_polls: self.max_busy_polls,
            busy_retry_delay_us: self.busy_retry_delay_us,
            fallback_delay_us: self.fallback_delay_us,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let busy = BusyPollConfig::default();
        Config {
            lines: vec![
                "hdlcd".to_string(),
                concat!("v.", env!("CARGO_PKG_VERSION")).to_string(),
            ],
            counter_row: 3,
            refresh_ms: 500,
            frames: None,
            max_busy_polls: busy.max_polls,
            busy_retry_delay_us: busy.busy_retry_delay_us,
            fallback_delay_us: busy.fallback_delay_us,
        }
    }
}
