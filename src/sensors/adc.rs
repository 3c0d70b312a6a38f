//! Analog input abstraction
//!
//! The logger only needs "give me the voltage on this channel". The real
//! backend reads the Linux IIO sysfs interface exposed by the ADC driver:
//! `<root>/iio:device<board>/in_voltage<channel>_raw` scaled by
//! `in_voltage_scale` (millivolts per count).

use std::fs;
use std::path::PathBuf;

use super::ChannelId;
use crate::error::{LoggerError, Result};

/// Trait for reading one analog channel
pub trait AnalogInput: Send {
    /// Read the channel voltage in volts
    fn read_channel(&mut self, channel: ChannelId) -> Result<f64>;
}

/// ADC boards exposed through the IIO sysfs interface
#[derive(Debug, Clone)]
pub struct IioAdc {
    root: PathBuf,
}

impl IioAdc {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn device_dir(&self, board: u8) -> PathBuf {
        self.root.join(format!("iio:device{}", board))
    }

    fn read_number(path: PathBuf) -> Result<f64> {
        let text = fs::read_to_string(&path)?;
        text.trim().parse::<f64>().map_err(|e| {
            LoggerError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{}: {}", path.display(), e),
            ))
        })
    }
}

impl AnalogInput for IioAdc {
    fn read_channel(&mut self, channel: ChannelId) -> Result<f64> {
        let dir = self.device_dir(channel.board);
        let raw = Self::read_number(dir.join(format!("in_voltage{}_raw", channel.channel)))?;

        // Per-channel scale wins over the shared one when the driver has it
        let channel_scale = dir.join(format!("in_voltage{}_scale", channel.channel));
        let scale = if channel_scale.exists() {
            Self::read_number(channel_scale)?
        } else {
            Self::read_number(dir.join("in_voltage_scale"))?
        };

        Ok(raw * scale / 1000.0)
    }
}
