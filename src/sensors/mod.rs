//! # Sensors Module
//!
//! Reads environmental sensors through analog input channels.
//!
//! This module handles:
//! - Channel identifiers (`ADbc`: board digit `b`, channel digit `c`)
//! - The opaque "read channel" seam ([`AnalogInput`]) and its sysfs IIO backend
//! - Pulse gauges that must be polled on every loop iteration
//! - Building a [`SampleRecord`] in configured column order

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use tokio::time::Instant;
use tracing::warn;

use crate::config::SensorConfig;

pub mod adc;
pub mod pulse;

pub use adc::{AnalogInput, IioAdc};
pub use pulse::PulseCounter;

/// Prefix of every analog channel identifier
const CHANNEL_PREFIX: &str = "AD";

/// Analog channel address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct ChannelId {
    pub board: u8,
    pub channel: u8,
}

impl FromStr for ChannelId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let digits = s
            .strip_prefix(CHANNEL_PREFIX)
            .ok_or_else(|| format!("channel id {:?} must start with {}", s, CHANNEL_PREFIX))?;

        let mut chars = digits.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some(b), Some(c), None) => {
                let board = b
                    .to_digit(10)
                    .ok_or_else(|| format!("invalid board digit in {:?}", s))?;
                let channel = c
                    .to_digit(10)
                    .ok_or_else(|| format!("invalid channel digit in {:?}", s))?;
                Ok(ChannelId {
                    board: board as u8,
                    channel: channel as u8,
                })
            }
            _ => Err(format!("channel id {:?} must be {}<board><channel>", s, CHANNEL_PREFIX)),
        }
    }
}

impl TryFrom<String> for ChannelId {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", CHANNEL_PREFIX, self.board, self.channel)
    }
}

/// One row of the day file
///
/// Readings are in configured column order; `None` marks a failed read.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub readings: Vec<Option<f64>>,
    pub timestamp: DateTime<Utc>,
}

impl SampleRecord {
    /// Render the record as a CSV line (without trailing newline).
    ///
    /// The line always ends with `YYYY,MM,DD,HH,MM,SS`.
    pub fn to_csv_line(&self) -> String {
        let mut fields: Vec<String> = self
            .readings
            .iter()
            .map(|r| r.map(|v| format!("{:.4}", v)).unwrap_or_default())
            .collect();

        let t = &self.timestamp;
        fields.push(format!("{:04}", t.year()));
        fields.push(format!("{:02}", t.month()));
        fields.push(format!("{:02}", t.day()));
        fields.push(format!("{:02}", t.hour()));
        fields.push(format!("{:02}", t.minute()));
        fields.push(format!("{:02}", t.second()));

        fields.join(",")
    }
}

/// Column headings appended after the channel labels
pub const TIMESTAMP_HEADINGS: [&str; 6] = ["Year", "Month", "Day", "Hour", "Minute", "Second"];

/// How one column is produced
#[derive(Debug)]
enum Column {
    Analog(ChannelId),
    Pulse(usize),
}

/// All configured sensors, in column order
pub struct SensorArray {
    input: Box<dyn AnalogInput>,
    columns: Vec<Column>,
    labels: Vec<String>,
    gauges: Vec<PulseCounter>,
}

impl fmt::Debug for SensorArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorArray")
            .field("labels", &self.labels)
            .field("gauges", &self.gauges)
            .finish_non_exhaustive()
    }
}

impl SensorArray {
    /// Build the array from configuration
    ///
    /// Pulse gauges are wired to the channel whose label matches the
    /// gauge label.
    pub fn new(config: &SensorConfig, input: Box<dyn AnalogInput>, now: Instant) -> Self {
        let mut columns = Vec::with_capacity(config.channels.len());
        let mut labels = Vec::with_capacity(config.channels.len());
        let mut gauges = Vec::new();

        for channel in &config.channels {
            let label = config.label_for(channel);
            match config.pulse.iter().find(|g| g.label == label) {
                Some(gauge) => {
                    gauges.push(PulseCounter::new(
                        *channel,
                        gauge.constant,
                        gauge.threshold_volts,
                        now,
                    ));
                    columns.push(Column::Pulse(gauges.len() - 1));
                }
                None => columns.push(Column::Analog(*channel)),
            }
            labels.push(label);
        }

        Self {
            input,
            columns,
            labels,
            gauges,
        }
    }

    /// Column headings for the day-file header
    pub fn headings(&self) -> String {
        self.labels
            .iter()
            .map(String::as_str)
            .chain(TIMESTAMP_HEADINGS)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Poll every pulse gauge once
    ///
    /// Must run on every loop iteration: pulses are not buffered anywhere.
    pub fn poll_pulses(&mut self, now: Instant) {
        for gauge in &mut self.gauges {
            if let Err(e) = gauge.poll(self.input.as_mut(), now) {
                warn!(channel = %gauge.channel(), error = %e, "Pulse gauge read failed");
            }
        }
    }

    /// Read every column and stamp the record
    pub fn sample(&mut self, timestamp: DateTime<Utc>) -> SampleRecord {
        let mut readings = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let reading = match column {
                Column::Analog(channel) => match self.input.read_channel(*channel) {
                    Ok(volts) => Some(volts),
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Analog read failed");
                        None
                    }
                },
                Column::Pulse(idx) => Some(self.gauges[*idx].value()),
            };
            readings.push(reading);
        }

        SampleRecord {
            readings,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::adc::mocks::MockAnalogInput;
    use super::*;
    use crate::config::tests::create_valid_config;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn test_channel_id_parse() {
        let id: ChannelId = "AD17".parse().unwrap();
        assert_eq!(id, ChannelId { board: 1, channel: 7 });
        assert_eq!(id.to_string(), "AD17");
    }

    #[test]
    fn test_channel_id_rejects_bad_input() {
        assert!("AD1".parse::<ChannelId>().is_err());
        assert!("AD123".parse::<ChannelId>().is_err());
        assert!("XY12".parse::<ChannelId>().is_err());
        assert!("ADx2".parse::<ChannelId>().is_err());
        assert!("".parse::<ChannelId>().is_err());
    }

    #[test]
    fn test_sample_record_csv_line() {
        let record = SampleRecord {
            readings: vec![Some(1.5), None, Some(0.25)],
            timestamp: Utc.with_ymd_and_hms(2024, 3, 7, 4, 5, 6).unwrap(),
        };
        assert_eq!(record.to_csv_line(), "1.5000,,0.2500,2024,03,07,04,05,06");
    }

    #[tokio::test(start_paused = true)]
    async fn test_headings_follow_channel_order() {
        let config = create_valid_config();
        let sensors = SensorArray::new(
            &config.sensors,
            Box::new(MockAnalogInput::new()),
            Instant::now(),
        );
        assert_eq!(
            sensors.headings(),
            "Pyranometer(W/m2),Temperature(C),Anemometer(km/h),Year,Month,Day,Hour,Minute,Second"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_reads_analog_and_pulse_columns() {
        let config = create_valid_config();
        let input = MockAnalogInput::new();
        input.set_voltage("AD00".parse().unwrap(), 1.25);
        input.set_voltage("AD01".parse().unwrap(), 0.5);
        input.set_voltage("AD10".parse().unwrap(), 0.0);

        let start = Instant::now();
        let mut sensors = SensorArray::new(&config.sensors, Box::new(input.clone()), start);

        // Three rising edges inside one second
        for volts in [5.0, 0.0, 5.0, 0.0, 5.0, 0.0] {
            input.set_voltage("AD10".parse().unwrap(), volts);
            sensors.poll_pulses(start + Duration::from_millis(100));
        }
        sensors.poll_pulses(start + Duration::from_millis(1000));

        let stamp = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let record = sensors.sample(stamp);
        assert_eq!(record.readings.len(), 3);
        assert_eq!(record.readings[0], Some(1.25));
        assert_eq!(record.readings[1], Some(0.5));
        let wind = record.readings[2].unwrap();
        assert!((wind - 3.0 * 2.4).abs() < 1e-9, "got {}", wind);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_read_leaves_field_empty() {
        let config = create_valid_config();
        let input = MockAnalogInput::new();
        input.set_voltage("AD01".parse().unwrap(), 0.5);
        input.set_voltage("AD10".parse().unwrap(), 0.0);
        input.fail_channel("AD00".parse().unwrap());

        let mut sensors = SensorArray::new(&config.sensors, Box::new(input), Instant::now());
        let record = sensors.sample(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        assert_eq!(record.readings[0], None);
        assert_eq!(record.readings[1], Some(0.5));
    }
}
