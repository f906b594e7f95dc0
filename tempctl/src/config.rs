use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "tempctl";
const ENV_PREFIX: &str = "TEMPCTL";

/// Number of sensor/PID lanes on the shield
pub const CHANNELS: usize = 4;

/// Timeout value meaning "run forever"
pub const INFINITE_TIMEOUT: f64 = -1.0;

/// More decimals than a firmware `float` can hold
pub const MAX_PRECISION: u32 = 6;

/// Wire protocol constants
///
/// Every value here has to match the firmware flashed on the board.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Time a single line read may block, in ms
    pub read_timeout_ms: u64,
    /// Pause after every write, in ms
    pub settle_delay_ms: u64,
    /// Line terminator
    pub terminator: char,
    /// Field delimiter
    pub delimiter: char,
    /// Decimal places kept on outgoing numbers
    pub precision: u32,
    /// Allowed sensor type letters
    pub sensor_types: String,
    /// Channel index addressing every channel at once
    pub all_channels: u8,
    /// Pause before the handshake starts reading, in ms
    pub boot_delay_ms: u64,
    /// Overall budget of the setup handshake, in ms
    pub handshake_timeout_ms: u64,
    /// Setters consume the acknowledgement line echoed by the firmware
    pub setter_reply: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 60_000,
            settle_delay_ms: 500,
            terminator: '\n',
            delimiter: ',',
            precision: 2,
            sensor_types: String::from("TJKESRNB"),
            all_channels: 4,
            boot_delay_ms: 2_000,
            handshake_timeout_ms: 120_000,
            setter_reply: true,
        }
    }
}

impl ProtocolConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn boot_delay(&self) -> Duration {
        Duration::from_millis(self.boot_delay_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn is_allowed_sensor(&self, sensor: char) -> bool {
        self.sensor_types.contains(sensor)
    }

    /// Round a value to the precision the firmware keeps
    pub fn round(&self, value: f64) -> f64 {
        let scale = 10f64.powi(self.precision.min(MAX_PRECISION) as i32);
        (value * scale).round() / scale
    }

    /// Reject settings the wire format cannot carry
    pub fn validate(&self) -> crate::Result<()> {
        self.terminator_byte()?;
        if self.precision > MAX_PRECISION {
            return Err(crate::Error::InvalidArgument(format!(
                "precision {} exceeds {} decimals",
                self.precision, MAX_PRECISION
            )));
        }
        Ok(())
    }

    /// Terminator as the byte the transport splits lines on
    pub fn terminator_byte(&self) -> crate::Result<u8> {
        u8::try_from(self.terminator)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| crate::Error::InvalidArgument(format!("terminator {:?} is not ASCII", self.terminator)))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SerialConfig {
    /// `/dev/ttyACM0` on Linux, `COM3` on Windows
    pub port: String,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::from("/dev/ttyACM0"),
            baud_rate: 9600,
        }
    }
}

/// Host application settings
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Settings {
    pub serial: SerialConfig,
    /// One letter per channel, firmware defaults when absent
    pub sensor_types: Option<String>,
    /// Snapshot pushed to the device after calibration
    pub load_snapshot: Option<PathBuf>,
    /// Snapshot written on exit
    pub save_snapshot: Option<PathBuf>,
    /// Period of the temperature readout, in ms
    pub poll_interval_ms: u64,
    pub log_level: String,
    pub protocol: ProtocolConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            sensor_types: None,
            load_snapshot: None,
            save_snapshot: None,
            poll_interval_ms: 5_000,
            log_level: String::from("info"),
            protocol: ProtocolConfig::default(),
        }
    }
}

impl Settings {
    /// Load `tempctl.toml` when present, then apply `TEMPCTL__*` overrides
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("Cannot read configuration")?
            .try_deserialize()
            .context("Cannot parse configuration")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_protocol_defaults() {
        let config = ProtocolConfig::default();
        assert_eq!(config.terminator_byte().unwrap(), b'\n');
        assert_eq!(config.all_channels, 4);
        assert_eq!(config.read_timeout(), Duration::from_secs(60));
        assert!(config.is_allowed_sensor('K'));
        assert!(!config.is_allowed_sensor('X'));
    }

    #[test]
    fn test_round() {
        let config = ProtocolConfig::default();
        assert_eq!(config.round(1.234), 1.23);
        assert_eq!(config.round(0.255_1), 0.26);
        assert_eq!(config.round(-1.0), -1.0);
        let config = ProtocolConfig {
            precision: 0,
            ..Default::default()
        };
        assert_eq!(config.round(2.6), 3.0);
    }

    #[test]
    fn test_precision_bound() {
        let config = ProtocolConfig {
            precision: u32::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(config.round(1.5).is_finite());
        assert!(ProtocolConfig::default().validate().is_ok());
    }

    #[test]
    fn test_terminator_not_ascii() {
        let config = ProtocolConfig {
            terminator: 'é',
            ..Default::default()
        };
        assert!(config.terminator_byte().is_err());
    }

    #[test]
    fn test_settings_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
sensor_types = "KJNB"
poll_interval_ms = 1000

[serial]
port = "/dev/ttyUSB1"
baud_rate = 115200

[protocol]
settle_delay_ms = 100
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.serial.port, "/dev/ttyUSB1");
        assert_eq!(settings.serial.baud_rate, 115200);
        assert_eq!(settings.sensor_types.as_deref(), Some("KJNB"));
        assert_eq!(settings.poll_interval(), Duration::from_secs(1));
        assert_eq!(settings.protocol.settle_delay_ms, 100);
        assert_eq!(settings.protocol.read_timeout_ms, 60_000);
    }
}
