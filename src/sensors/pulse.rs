//! Pulse-counting gauges
//!
//! Reed-switch instruments (cup anemometer, tipping-bucket rain gauge) show
//! up on an analog channel as a voltage that jumps above a threshold once per
//! revolution or tip. Only the rising edge counts. Once per second the tick
//! count is converted to engineering units and the counter starts over.

use std::time::Duration;
use tokio::time::Instant;

use super::{AnalogInput, ChannelId};
use crate::error::Result;

/// Integration window for converting ticks to a rate
const WINDOW: Duration = Duration::from_secs(1);

/// Rising-edge pulse counter for one channel
#[derive(Debug, Clone)]
pub struct PulseCounter {
    channel: ChannelId,
    constant: f64,
    threshold_volts: f64,
    window_start: Instant,
    ticks: u32,
    high: bool,
    value: f64,
}

impl PulseCounter {
    pub fn new(channel: ChannelId, constant: f64, threshold_volts: f64, now: Instant) -> Self {
        Self {
            channel,
            constant,
            threshold_volts,
            window_start: now,
            ticks: 0,
            high: false,
            value: 0.0,
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Value of the last completed window
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Close the window if it has elapsed, then sample the channel once.
    pub fn poll(&mut self, input: &mut dyn AnalogInput, now: Instant) -> Result<()> {
        if now.saturating_duration_since(self.window_start) >= WINDOW {
            self.value = f64::from(self.ticks) * self.constant;
            self.ticks = 0;
            self.window_start = now;
        }

        let volts = input.read_channel(self.channel)?;
        self.record(volts);
        Ok(())
    }

    fn record(&mut self, volts: f64) {
        if volts > self.threshold_volts {
            if !self.high {
                self.ticks += 1;
                self.high = true;
            }
        } else {
            self.high = false;
        }
    }
}
