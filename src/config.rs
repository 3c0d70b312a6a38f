//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! The configuration is read once at startup and handed to every component
//! by value; nothing in the core mutates it afterwards.

use serde::de::Error;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{LoggerError, Result};
use crate::position::PositionFix;
use crate::sensors::ChannelId;
use crate::upload::RelocationPolicy;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub site: SiteConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub modem: ModemConfig,
    pub provider: ProviderConfig,
    pub gps: GpsConfig,
    pub sensors: SensorConfig,
    pub remote: RemoteConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Site identification
#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    pub name: String,
}

/// Local directory layout
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_sampling_dir")]
    pub sampling_dir: String,

    #[serde(default = "default_pending_dir")]
    pub pending_dir: String,

    #[serde(default = "default_uploaded_dir")]
    pub uploaded_dir: String,

    #[serde(default = "default_test_dir")]
    pub test_dir: String,

    /// Process log left behind by a previous, interrupted run
    #[serde(default)]
    pub stale_log: Option<String>,

    #[serde(default = "default_failed_transfer_policy")]
    pub failed_transfer_policy: RelocationPolicy,

    #[serde(default = "default_rollover_settle_ms")]
    pub rollover_settle_ms: u64,
}

/// AT command port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_ports")]
    pub ports: Vec<String>,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Modem control configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ModemConfig {
    /// QMI control device
    #[serde(default = "default_modem_device")]
    pub device: String,

    #[serde(default = "default_use_sudo")]
    pub use_sudo: bool,

    #[serde(default = "default_gpio_root")]
    pub gpio_root: String,

    #[serde(default = "default_enable_pin")]
    pub enable_pin: u32,

    #[serde(default = "default_reset_pin")]
    pub reset_pin: u32,

    #[serde(default = "default_reset_pulse_ms")]
    pub reset_pulse_ms: u64,

    #[serde(default = "default_boot_settle_s")]
    pub boot_settle_s: u64,

    /// Wait after a radio reset before the next mode change
    #[serde(default = "default_reset_settle_s")]
    pub reset_settle_s: u64,

    /// Wait after any other mutating modem command
    #[serde(default = "default_command_settle_s")]
    pub command_settle_s: u64,

    /// Wait between network interface reconfiguration steps
    #[serde(default = "default_link_settle_s")]
    pub link_settle_s: u64,

    #[serde(default = "default_dhcp_attempts")]
    pub dhcp_attempts: u32,

    #[serde(default = "default_dhcp_timeout_s")]
    pub dhcp_timeout_s: u64,

    #[serde(default = "default_command_timeout_s")]
    pub command_timeout_s: u64,
}

/// Cellular provider credentials
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub apn: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Providers that authenticate by APN alone get no credentials
    #[serde(default)]
    pub apn_only_auth: bool,
}

/// Position acquisition configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GpsConfig {
    #[serde(default = "default_gps_enabled")]
    pub enabled: bool,

    #[serde(default = "default_max_polls")]
    pub max_polls: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub reacquire_daily: bool,

    pub fallback: PositionFix,
}

/// A pulse-counting gauge (anemometer, rain gauge)
#[derive(Debug, Deserialize, Clone)]
pub struct PulseGaugeConfig {
    /// Column label the gauge is wired to
    pub label: String,

    /// Engineering units per pulse per second
    pub constant: f64,

    #[serde(default = "default_pulse_threshold_volts")]
    pub threshold_volts: f64,
}

/// Sensor channel configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SensorConfig {
    /// Channels in column order
    pub channels: Vec<ChannelId>,

    /// Channel id to column label
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub pulse: Vec<PulseGaugeConfig>,

    #[serde(default = "default_iio_root")]
    pub iio_root: String,
}

/// Remote server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    pub host: String,

    #[serde(default = "default_remote_port")]
    pub port: u16,

    pub username: String,

    #[serde(default)]
    pub identity_file: Option<String>,

    #[serde(default = "default_remote_root")]
    pub root: String,

    #[serde(default = "default_sftp_program")]
    pub sftp_program: String,

    #[serde(default = "default_transfer_timeout_s")]
    pub transfer_timeout_s: u64,
}

/// Main loop configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Delay between loop iterations; bounds pulse polling latency
    #[serde(default = "default_loop_interval_ms")]
    pub loop_interval_ms: u64,

    /// Samples after startup before the one-off test upload (0 disables)
    #[serde(default = "default_test_upload_after_samples")]
    pub test_upload_after_samples: u64,

    /// Network time command run after each connect; empty disables it
    #[serde(default = "default_clock_sync_command")]
    pub clock_sync_command: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for the rolling log file; stdout only when unset
    #[serde(default)]
    pub dir: Option<String>,

    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

// Default value functions
fn default_sampling_dir() -> String { "./data/sampling".to_string() }
fn default_pending_dir() -> String { "./data/pending".to_string() }
fn default_uploaded_dir() -> String { "./data/uploaded".to_string() }
fn default_test_dir() -> String { "./data/test".to_string() }
fn default_failed_transfer_policy() -> RelocationPolicy { RelocationPolicy::Relocate }
fn default_rollover_settle_ms() -> u64 { 1000 }

fn default_serial_ports() -> Vec<String> {
    vec!["/dev/ttyUSB2".to_string(), "/dev/ttyUSB3".to_string()]
}
fn default_baud_rate() -> u32 { 115200 }
fn default_timeout_ms() -> u64 { 3000 }

fn default_modem_device() -> String { "/dev/cdc-wdm0".to_string() }
fn default_use_sudo() -> bool { true }
fn default_gpio_root() -> String { "/sys/class/gpio".to_string() }
fn default_enable_pin() -> u32 { 6 }
fn default_reset_pin() -> u32 { 4 }
fn default_reset_pulse_ms() -> u64 { 500 }
fn default_boot_settle_s() -> u64 { 20 }
fn default_reset_settle_s() -> u64 { 30 }
fn default_command_settle_s() -> u64 { 10 }
fn default_link_settle_s() -> u64 { 5 }
fn default_dhcp_attempts() -> u32 { 3 }
fn default_dhcp_timeout_s() -> u64 { 30 }
fn default_command_timeout_s() -> u64 { 60 }

fn default_gps_enabled() -> bool { true }
fn default_max_polls() -> u32 { 100 }
fn default_poll_interval_ms() -> u64 { 2000 }

fn default_pulse_threshold_volts() -> f64 { 4.0 }
fn default_iio_root() -> String { "/sys/bus/iio/devices".to_string() }

fn default_remote_port() -> u16 { 22 }
fn default_remote_root() -> String { "/data".to_string() }
fn default_sftp_program() -> String { "sftp".to_string() }
fn default_transfer_timeout_s() -> u64 { 300 }

fn default_loop_interval_ms() -> u64 { 5 }
fn default_test_upload_after_samples() -> u64 { 60 }
fn default_clock_sync_command() -> Vec<String> {
    vec!["ntpdate".to_string(), "-u".to_string(), "pool.ntp.org".to_string()]
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_file_prefix() -> String { "field-datalogger.log".to_string() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sampling_dir: default_sampling_dir(),
            pending_dir: default_pending_dir(),
            uploaded_dir: default_uploaded_dir(),
            test_dir: default_test_dir(),
            stale_log: None,
            failed_transfer_policy: default_failed_transfer_policy(),
            rollover_settle_ms: default_rollover_settle_ms(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            ports: default_serial_ports(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            device: default_modem_device(),
            use_sudo: default_use_sudo(),
            gpio_root: default_gpio_root(),
            enable_pin: default_enable_pin(),
            reset_pin: default_reset_pin(),
            reset_pulse_ms: default_reset_pulse_ms(),
            boot_settle_s: default_boot_settle_s(),
            reset_settle_s: default_reset_settle_s(),
            command_settle_s: default_command_settle_s(),
            link_settle_s: default_link_settle_s(),
            dhcp_attempts: default_dhcp_attempts(),
            dhcp_timeout_s: default_dhcp_timeout_s(),
            command_timeout_s: default_command_timeout_s(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            loop_interval_ms: default_loop_interval_ms(),
            test_upload_after_samples: default_test_upload_after_samples(),
            clock_sync_command: default_clock_sync_command(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
            file_prefix: default_log_file_prefix(),
        }
    }
}

impl SensorConfig {
    /// Column label for a channel, falling back to the channel id.
    pub fn label_for(&self, channel: &ChannelId) -> String {
        let key = channel.to_string();
        self.labels.get(&key).cloned().unwrap_or(key)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use field_datalogger::config::Config;
    ///
    /// let config = Config::load("config/datalogger.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.site.name.trim().is_empty() {
            return Err(invalid("site name cannot be empty"));
        }

        // Site name becomes a remote directory segment
        if self.site.name.contains('/') {
            return Err(invalid("site name cannot contain '/'"));
        }

        for (name, dir) in [
            ("sampling_dir", &self.storage.sampling_dir),
            ("pending_dir", &self.storage.pending_dir),
            ("uploaded_dir", &self.storage.uploaded_dir),
            ("test_dir", &self.storage.test_dir),
        ] {
            if dir.is_empty() {
                return Err(invalid(format!("{} cannot be empty", name)));
            }
        }

        if self.storage.sampling_dir == self.storage.pending_dir
            || self.storage.pending_dir == self.storage.uploaded_dir
        {
            return Err(invalid(
                "sampling_dir, pending_dir and uploaded_dir must be distinct",
            ));
        }

        if self.serial.ports.is_empty() {
            return Err(invalid("at least one serial port is required"));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 60000 {
            return Err(invalid("serial timeout_ms must be between 1 and 60000"));
        }

        if ![9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600]
            .contains(&self.serial.baud_rate)
        {
            return Err(invalid(
                "baud_rate must be one of: 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600",
            ));
        }

        if self.modem.device.is_empty() {
            return Err(invalid("modem device cannot be empty"));
        }

        if self.modem.enable_pin == self.modem.reset_pin {
            return Err(invalid("enable_pin and reset_pin must differ"));
        }

        if self.modem.dhcp_attempts == 0 || self.modem.dhcp_attempts > 20 {
            return Err(invalid("dhcp_attempts must be between 1 and 20"));
        }

        if self.modem.dhcp_timeout_s == 0 || self.modem.command_timeout_s == 0 {
            return Err(invalid("modem timeouts must be greater than 0"));
        }

        if self.provider.apn.is_empty() {
            return Err(invalid("provider apn cannot be empty"));
        }

        if !self.provider.apn_only_auth && self.provider.username.is_empty() {
            return Err(invalid(
                "provider username is required unless apn_only_auth is set",
            ));
        }

        if self.gps.max_polls == 0 {
            return Err(invalid("gps max_polls must be greater than 0"));
        }

        if self.gps.poll_interval_ms == 0 || self.gps.poll_interval_ms > 60000 {
            return Err(invalid("gps poll_interval_ms must be between 1 and 60000"));
        }

        validate_fallback(&self.gps.fallback)?;

        if self.sensors.channels.is_empty() {
            return Err(invalid("at least one sensor channel is required"));
        }

        for key in self.sensors.labels.keys() {
            if !self.sensors.channels.iter().any(|c| c.to_string() == *key) {
                return Err(invalid(format!(
                    "label given for unknown channel {}",
                    key
                )));
            }
        }

        for gauge in &self.sensors.pulse {
            let wired = self
                .sensors
                .channels
                .iter()
                .any(|c| self.sensors.label_for(c) == gauge.label);
            if !wired {
                return Err(invalid(format!(
                    "pulse gauge {:?} does not match any channel label",
                    gauge.label
                )));
            }
            if gauge.constant <= 0.0 || gauge.threshold_volts <= 0.0 {
                return Err(invalid(format!(
                    "pulse gauge {:?} needs a positive constant and threshold",
                    gauge.label
                )));
            }
        }

        if self.remote.host.is_empty() || self.remote.username.is_empty() {
            return Err(invalid("remote host and username cannot be empty"));
        }

        if self.remote.transfer_timeout_s == 0 {
            return Err(invalid("transfer_timeout_s must be greater than 0"));
        }

        if self.scheduler.loop_interval_ms == 0 || self.scheduler.loop_interval_ms > 1000 {
            return Err(invalid("loop_interval_ms must be between 1 and 1000"));
        }

        Ok(())
    }
}

fn validate_fallback(fix: &PositionFix) -> Result<()> {
    let lat = &fix.latitude;
    let lon = &fix.longitude;

    if lat.degrees > 90 || lon.degrees > 180 {
        return Err(invalid("fallback degrees out of range"));
    }

    if lat.minutes >= 60 || lon.minutes >= 60 {
        return Err(invalid("fallback minutes must be below 60"));
    }

    if !(0.0..60.0).contains(&lat.seconds) || !(0.0..60.0).contains(&lon.seconds) {
        return Err(invalid("fallback seconds must be in [0, 60)"));
    }

    Ok(())
}

fn invalid(message: impl std::fmt::Display) -> LoggerError {
    LoggerError::Config(toml::de::Error::custom(message))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE_TOML: &str = r#"
[site]
name = "LakeStation"

[provider]
name = "hologram"
apn = "hologram"
apn_only_auth = true

[gps]
fallback.latitude = { degrees = 43, minutes = 4, seconds = 12.5, hemisphere = "N" }
fallback.longitude = { degrees = 77, minutes = 40, seconds = 30.0, hemisphere = "W" }

[sensors]
channels = ["AD00", "AD01", "AD10"]

[sensors.labels]
AD00 = "Pyranometer(W/m2)"
AD01 = "Temperature(C)"
AD10 = "Anemometer(km/h)"

[[sensors.pulse]]
label = "Anemometer(km/h)"
constant = 2.4

[remote]
host = "data.example.org"
username = "logger"
"#;

    pub(crate) fn create_valid_config() -> Config {
        Config::from_toml(SAMPLE_TOML).unwrap()
    }

    #[test]
    fn test_sample_config_loads() {
        let config = create_valid_config();
        assert_eq!(config.site.name, "LakeStation");
        assert_eq!(config.sensors.channels.len(), 3);
        assert_eq!(config.gps.fallback.latitude.degrees, 43);
        assert_eq!(config.storage.failed_transfer_policy, RelocationPolicy::Relocate);
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(SAMPLE_TOML.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let result = Config::load(temp_file.path());
        assert!(result.is_ok());
    }

    #[test]
    fn test_shipped_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/datalogger.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.sensors.channels.len(), 5);
        assert_eq!(config.sensors.pulse.len(), 2);
        assert!(config.provider.apn_only_auth);
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load("/nonexistent/datalogger.toml");
        assert!(matches!(result, Err(LoggerError::Io(_))));
    }

    #[test]
    fn test_label_for() {
        let config = create_valid_config();
        let channels = &config.sensors.channels;
        assert_eq!(config.sensors.label_for(&channels[0]), "Pyranometer(W/m2)");

        let mut config = config;
        config.sensors.labels.clear();
        assert_eq!(config.sensors.label_for(&config.sensors.channels[0]), "AD00");
    }

    #[test]
    fn test_empty_site_name() {
        let mut config = create_valid_config();
        config.site.name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_site_name_with_slash() {
        let mut config = create_valid_config();
        config.site.name = "lake/station".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_same_sampling_and_pending_dir() {
        let mut config = create_valid_config();
        config.storage.pending_dir = config.storage.sampling_dir.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_serial_ports() {
        let mut config = create_valid_config();
        config.serial.ports.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_baud_rate() {
        let mut config = create_valid_config();
        config.serial.baud_rate = 420000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_same_gpio_pins() {
        let mut config = create_valid_config();
        config.modem.reset_pin = config.modem.enable_pin;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dhcp_attempts_zero() {
        let mut config = create_valid_config();
        config.modem.dhcp_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_required_without_apn_only_auth() {
        let mut config = create_valid_config();
        config.provider.apn_only_auth = false;
        assert!(config.validate().is_err());

        config.provider.username = "user".to_string();
        config.provider.password = "secret".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_polls_zero() {
        let mut config = create_valid_config();
        config.gps.max_polls = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fallback_out_of_range() {
        let mut config = create_valid_config();
        config.gps.fallback.latitude.degrees = 91;
        assert!(config.validate().is_err());

        let mut config = create_valid_config();
        config.gps.fallback.longitude.minutes = 60;
        assert!(config.validate().is_err());

        let mut config = create_valid_config();
        config.gps.fallback.latitude.seconds = 60.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_label_for_unknown_channel() {
        let mut config = create_valid_config();
        config
            .sensors
            .labels
            .insert("AD77".to_string(), "Ghost".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unwired_pulse_gauge() {
        let mut config = create_valid_config();
        config.sensors.pulse[0].label = "RainGauge(mm)".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_channel_id_rejected_at_parse() {
        let toml = SAMPLE_TOML.replace("\"AD10\"]", "\"XY10\"]");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn test_failed_transfer_policy_parses() {
        let toml = format!(
            "{}\n[storage]\nfailed_transfer_policy = \"delete\"\n",
            SAMPLE_TOML
        );
        let config = Config::from_toml(&toml).unwrap();
        assert_eq!(config.storage.failed_transfer_policy, RelocationPolicy::Delete);
    }

    #[test]
    fn test_empty_clock_sync_command_disables_sync() {
        let toml = format!("{}\n[scheduler]\nclock_sync_command = []\n", SAMPLE_TOML);
        let config = Config::from_toml(&toml).unwrap();
        assert!(config.scheduler.clock_sync_command.is_empty());
    }

    #[test]
    fn test_loop_interval_bounds() {
        let mut config = create_valid_config();
        config.scheduler.loop_interval_ms = 0;
        assert!(config.validate().is_err());
        config.scheduler.loop_interval_ms = 1001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_serial_ports(), vec!["/dev/ttyUSB2", "/dev/ttyUSB3"]);
        assert_eq!(default_baud_rate(), 115200);
        assert_eq!(default_modem_device(), "/dev/cdc-wdm0");
        assert_eq!(default_reset_settle_s(), 30);
        assert_eq!(default_command_settle_s(), 10);
        assert_eq!(default_link_settle_s(), 5);
        assert_eq!(default_max_polls(), 100);
        assert_eq!(default_pulse_threshold_volts(), 4.0);
        assert_eq!(default_remote_port(), 22);
        assert_eq!(default_test_upload_after_samples(), 60);
        assert_eq!(default_clock_sync_command(), vec!["ntpdate", "-u", "pool.ntp.org"]);
    }
}
