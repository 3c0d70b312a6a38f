//! Bounded-retry position acquisition
//!
//! Starts the receiver, then polls the position report at a fixed interval
//! until a usable report arrives or the poll budget runs out.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::parser;
use super::PositionFix;
use crate::config::GpsConfig;
use crate::link::{response_ok, LinkHandle};

/// Start standalone positioning with hot restart
pub const START_COMMAND: &str = "AT+CGPS=1,1";

/// Request the current position report
pub const REPORT_COMMAND: &str = "AT+CGPSINFO";

/// Result of one acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionOutcome {
    /// A fresh fix from the receiver
    Acquired(PositionFix),
    /// The poll budget ran out; configured fallback
    Fallback(PositionFix),
    /// The link failed; nothing was learned
    Unavailable,
}

impl PositionOutcome {
    pub fn fix(&self) -> Option<PositionFix> {
        match self {
            PositionOutcome::Acquired(fix) | PositionOutcome::Fallback(fix) => Some(*fix),
            PositionOutcome::Unavailable => None,
        }
    }
}

/// Runs the fix protocol over a borrowed link
#[derive(Debug, Clone)]
pub struct PositionAcquirer {
    max_polls: u32,
    poll_interval: Duration,
    fallback: PositionFix,
}

impl PositionAcquirer {
    pub fn new(config: &GpsConfig) -> Self {
        Self {
            max_polls: config.max_polls,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            fallback: config.fallback,
        }
    }

    pub fn fallback(&self) -> PositionFix {
        self.fallback
    }

    /// Acquire a fix
    ///
    /// # Returns
    ///
    /// * `Acquired` - a usable report was parsed
    /// * `Fallback` - every poll came back empty or unparseable
    /// * `Unavailable` - the link failed; no retry budget is consumed
    pub async fn acquire(&self, link: &mut LinkHandle) -> PositionOutcome {
        info!("Acquiring position on {}", link.device_path());

        match link.send_command(START_COMMAND).await {
            Ok(response) if response_ok(&response) => debug!("Positioning started"),
            // Already running after a warm restart answers ERROR
            Ok(response) => debug!("Start positioning not acknowledged: {:?}", response.trim()),
            Err(e) => {
                warn!("Position link failed while starting receiver: {}", e);
                return PositionOutcome::Unavailable;
            }
        }

        for poll in 1..=self.max_polls {
            tokio::time::sleep(self.poll_interval).await;

            let response = match link.send_command(REPORT_COMMAND).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(poll, "Position link failed: {}", e);
                    return PositionOutcome::Unavailable;
                }
            };

            match parser::parse_report(&response) {
                Ok(Some(fix)) => {
                    info!(poll, "Position fix acquired: {}", fix);
                    return PositionOutcome::Acquired(fix);
                }
                Ok(None) => debug!(poll, "No fix yet"),
                Err(e) => debug!(poll, "Ignoring malformed report: {}", e),
            }
        }

        info!(
            "No fix after {} polls, using fallback {}",
            self.max_polls, self.fallback
        );
        PositionOutcome::Fallback(self.fallback)
    }
}
