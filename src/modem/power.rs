//! Modem supply and reset lines
//!
//! The modem hat exposes two GPIO lines: a supply enable and a reset input.
//! Both are driven through the sysfs GPIO interface.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::config::ModemConfig;
use crate::error::{LoggerError, Result};

/// Trait for the hardware power lines
#[async_trait]
pub trait PowerControl: Send {
    /// Enable supply and pulse reset
    async fn power_up(&mut self) -> Result<()>;

    /// Cut supply regardless of modem state
    async fn force_down(&mut self) -> Result<()>;
}

/// sysfs GPIO implementation
#[derive(Debug, Clone)]
pub struct SysfsGpioPower {
    root: PathBuf,
    enable_pin: u32,
    reset_pin: u32,
    reset_pulse: Duration,
}

impl SysfsGpioPower {
    pub fn new(config: &ModemConfig) -> Self {
        Self {
            root: PathBuf::from(&config.gpio_root),
            enable_pin: config.enable_pin,
            reset_pin: config.reset_pin,
            reset_pulse: Duration::from_millis(config.reset_pulse_ms),
        }
    }

    async fn export(&self, pin: u32) -> Result<()> {
        let pin_dir = self.root.join(format!("gpio{}", pin));
        if tokio::fs::metadata(&pin_dir).await.is_err() {
            debug!("Exporting GPIO {}", pin);
            tokio::fs::write(self.root.join("export"), pin.to_string()).await?;
        }
        tokio::fs::write(pin_dir.join("direction"), "out").await?;
        Ok(())
    }

    async fn write(&self, pin: u32, high: bool) -> Result<()> {
        let value = self.root.join(format!("gpio{}", pin)).join("value");
        tokio::fs::write(value, if high { "1" } else { "0" }).await?;
        Ok(())
    }

    async fn drive(&self, pin: u32, high: bool) -> Result<()> {
        self.export(pin)
            .await
            .map_err(|e| LoggerError::FatalHardware(format!("GPIO {} export failed: {}", pin, e)))?;
        self.write(pin, high)
            .await
            .map_err(|e| LoggerError::FatalHardware(format!("GPIO {} write failed: {}", pin, e)))
    }
}

#[async_trait]
impl PowerControl for SysfsGpioPower {
    async fn power_up(&mut self) -> Result<()> {
        self.drive(self.enable_pin, true).await?;
        self.drive(self.reset_pin, true).await?;
        tokio::time::sleep(self.reset_pulse).await;
        self.drive(self.reset_pin, false).await
    }

    async fn force_down(&mut self) -> Result<()> {
        self.drive(self.enable_pin, false).await
    }
}
