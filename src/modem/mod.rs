//! # Modem Module
//!
//! Power and connectivity lifecycle of the cellular modem.
//!
//! ## State machine
//!
//! ```text
//! PoweredOff --power_on--> PoweringOn --> Offline
//! Offline/Online --connect--> [Resetting -->] Offline --> Online --> Connecting --> Connected
//! Connected/Online --disconnect--> Disconnecting --> Offline
//! any --power_off--> PoweredOff
//! ```
//!
//! Every mutating modem command is followed by a settle delay and checked
//! against the exact acknowledgment text. A radio that reports `online`
//! before we configured it is left over from an earlier run and gets reset
//! first.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{ModemConfig, ProviderConfig};
use crate::error::{LoggerError, Result};
use crate::link::{CommandRunner, LinkHandle, LinkOpener, ProcessCommand};

pub mod commands;
pub mod power;

pub use commands::{ModeRequest, ModemCommands, RadioMode};
pub use power::{PowerControl, SysfsGpioPower};

/// Modem lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemState {
    PoweredOff,
    PoweringOn,
    Offline,
    Resetting,
    Online,
    Connecting,
    Connected,
    Disconnecting,
}

impl ModemState {
    /// States only seen while a lifecycle call is in progress
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            ModemState::PoweringOn
                | ModemState::Resetting
                | ModemState::Connecting
                | ModemState::Disconnecting
        )
    }

    /// Radio is on and configured (with or without a data session)
    pub fn is_online(self) -> bool {
        matches!(self, ModemState::Online | ModemState::Connected)
    }
}

/// Owns the modem, its command link and its state
pub struct ConnectivityManager {
    config: ModemConfig,
    provider: ProviderConfig,
    commands: ModemCommands,
    runner: Arc<dyn CommandRunner>,
    power: Box<dyn PowerControl>,
    opener: Box<dyn LinkOpener>,
    link: Option<LinkHandle>,
    interface: Option<String>,
    state: ModemState,
    connected: bool,
}

impl std::fmt::Debug for ConnectivityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityManager")
            .field("device", &self.config.device)
            .field("state", &self.state)
            .field("connected", &self.connected)
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

impl ConnectivityManager {
    pub fn new(
        config: &ModemConfig,
        provider: &ProviderConfig,
        runner: Arc<dyn CommandRunner>,
        power: Box<dyn PowerControl>,
        opener: Box<dyn LinkOpener>,
    ) -> Self {
        Self {
            config: config.clone(),
            provider: provider.clone(),
            commands: ModemCommands::new(config),
            runner,
            power,
            opener,
            link: None,
            interface: None,
            state: ModemState::PoweredOff,
            connected: false,
        }
    }

    pub fn state(&self) -> ModemState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// WWAN interface resolved at power-on
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// Borrow the command link
    ///
    /// Only lent while no lifecycle transition is in progress and the modem
    /// is powered.
    pub fn link(&mut self) -> Option<&mut LinkHandle> {
        if self.state.is_transitional() || self.state == ModemState::PoweredOff {
            return None;
        }
        self.link.as_mut()
    }

    fn transition(&mut self, next: ModemState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "Modem state change");
            self.state = next;
        }
    }

    fn settle(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }

    /// Power the modem and wait for it to enumerate
    ///
    /// # Errors
    ///
    /// Returns `FatalHardware` if the power lines cannot be driven; the
    /// modem is forced back to `PoweredOff`. Returns `SoftFailure` if the
    /// WWAN interface cannot be resolved. The modem is then left powered in
    /// `Offline` and `connect` resolves the interface again.
    pub async fn power_on(&mut self) -> Result<()> {
        if self.state != ModemState::PoweredOff {
            debug!("Modem already powered ({:?})", self.state);
            return Ok(());
        }

        self.transition(ModemState::PoweringOn);

        if let Err(e) = self.power.power_up().await {
            self.abort_power_on().await;
            return Err(match e {
                LoggerError::FatalHardware(_) => e,
                other => LoggerError::FatalHardware(other.to_string()),
            });
        }

        sleep(Self::settle(self.config.boot_settle_s)).await;

        let resolved = self.resolve_interface().await;
        self.interface = match &resolved {
            Ok(interface) => {
                info!("Modem network interface: {}", interface);
                Some(interface.clone())
            }
            Err(e) => {
                warn!("WWAN interface not resolved, retrying at connect: {}", e);
                None
            }
        };

        match self.opener.open() {
            Ok(link) => self.link = Some(link),
            Err(e) => warn!("Modem command port unavailable, position fix disabled: {}", e),
        }

        self.transition(ModemState::Offline);
        resolved.map(|_| ()).map_err(|e| {
            LoggerError::SoftFailure(format!("no WWAN interface after power-on: {}", e))
        })
    }

    async fn abort_power_on(&mut self) {
        if let Err(e) = self.power.force_down().await {
            warn!("Forced power-down after failed power-on also failed: {}", e);
        }
        self.transition(ModemState::PoweredOff);
    }

    async fn resolve_interface(&self) -> Result<String> {
        let output = self.runner.run(&self.commands.get_wwan_interface()).await?;
        let name = output.stdout.trim();
        if !output.success || name.is_empty() {
            return Err(LoggerError::Command(format!(
                "no WWAN interface reported: {}",
                output.stderr.trim()
            )));
        }
        Ok(name.to_string())
    }

    /// Bring the radio online and obtain a data session
    ///
    /// Valid from `Offline` or `Online`; a no-op when already connected.
    ///
    /// # Errors
    ///
    /// Returns `SoftFailure` when any step fails. The modem is left in the
    /// last safe state (`Offline` before the radio is online, `Online`
    /// without a session afterwards); callers skip the dependent work and
    /// try again on the next cycle.
    pub async fn connect(&mut self) -> Result<()> {
        match self.state {
            ModemState::Connected => return Ok(()),
            ModemState::Offline | ModemState::Online => {}
            other => {
                return Err(LoggerError::SoftFailure(format!(
                    "connect is not valid from {:?}",
                    other
                )));
            }
        }

        info!("Connecting modem on {}", self.commands.device());

        let mode = self.query_mode().await?;
        debug!("Radio reports mode {}", mode);

        if mode == RadioMode::Online {
            info!("Radio already online from an earlier run, forcing reset");
            self.reset_radio().await?;
        } else {
            self.transition(ModemState::Offline);
        }

        self.reset_radio().await?;

        self.set_mode(ModeRequest::Online).await?;
        sleep(Self::settle(self.config.command_settle_s)).await;
        self.transition(ModemState::Online);

        self.configure_raw_ip().await?;
        self.start_session().await
    }

    /// Online/Offline → Resetting → Offline, then wait for the radio
    async fn reset_radio(&mut self) -> Result<()> {
        self.transition(ModemState::Resetting);
        let result = self.set_mode(ModeRequest::Reset).await;
        self.transition(ModemState::Offline);
        result?;
        sleep(Self::settle(self.config.reset_settle_s)).await;
        Ok(())
    }

    async fn query_mode(&self) -> Result<RadioMode> {
        let output = self
            .runner
            .run(&self.commands.get_operating_mode())
            .await
            .map_err(|e| LoggerError::SoftFailure(format!("operating mode query failed: {}", e)))?;

        commands::parse_operating_mode(&output.stdout).ok_or_else(|| {
            LoggerError::SoftFailure(format!(
                "unrecognised operating mode response: {:?}",
                output.stdout.trim()
            ))
        })
    }

    async fn set_mode(&self, mode: ModeRequest) -> Result<()> {
        let output = self
            .runner
            .run(&self.commands.set_operating_mode(mode))
            .await
            .map_err(|e| {
                LoggerError::SoftFailure(format!("set mode {} failed: {}", mode.as_str(), e))
            })?;

        if !commands::is_mode_ack(self.commands.device(), &output.stdout) {
            warn!(
                mode = mode.as_str(),
                response = %output.stdout.trim(),
                "Mode change not acknowledged"
            );
            return Err(LoggerError::SoftFailure(format!(
                "mode {} not acknowledged",
                mode.as_str()
            )));
        }

        info!("Radio mode set to {}", mode.as_str());
        Ok(())
    }

    /// Interface down, raw-IP flag, interface up
    async fn configure_raw_ip(&mut self) -> Result<()> {
        let interface = match self.interface.clone() {
            Some(interface) => interface,
            None => {
                let interface = self
                    .resolve_interface()
                    .await
                    .map_err(|e| LoggerError::SoftFailure(e.to_string()))?;
                self.interface = Some(interface.clone());
                interface
            }
        };

        let link_settle = Self::settle(self.config.link_settle_s);
        let steps = [
            self.commands.link_set(&interface, false),
            self.commands.set_raw_ip(&interface),
            self.commands.link_set(&interface, true),
        ];

        for (i, step) in steps.iter().enumerate() {
            if i > 0 {
                sleep(link_settle).await;
            }
            self.run_checked(step).await?;
        }

        debug!("Raw-IP framing enabled on {}", interface);
        Ok(())
    }

    /// Online → Connecting → Connected (or back to Online)
    async fn start_session(&mut self) -> Result<()> {
        let interface = self.interface.clone().unwrap_or_default();
        self.transition(ModemState::Connecting);

        let attach = self.commands.start_network(&self.provider);
        if let Err(e) = self.run_checked(&attach).await {
            self.transition(ModemState::Online);
            self.connected = false;
            return Err(e);
        }

        let dhcp_timeout = Self::settle(self.config.dhcp_timeout_s);
        let attempts = self.config.dhcp_attempts;
        let mut leased = false;

        for attempt in 1..=attempts {
            match self
                .runner
                .run(&self.commands.dhcp_lease(&interface, dhcp_timeout))
                .await
            {
                Ok(output) if output.success => {
                    info!(attempt, "DHCP lease obtained on {}", interface);
                    leased = true;
                    break;
                }
                Ok(output) => {
                    warn!(
                        attempt,
                        attempts,
                        stderr = %output.stderr.trim(),
                        "DHCP lease not obtained"
                    );
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "DHCP client failed");
                }
            }
        }

        if !leased {
            self.connected = false;
            self.transition(ModemState::Online);
            return Err(LoggerError::SoftFailure(format!(
                "no DHCP lease on {} after {} attempts",
                interface, attempts
            )));
        }

        self.connected = true;
        self.transition(ModemState::Connected);
        self.log_diagnostics(&interface).await;
        Ok(())
    }

    async fn log_diagnostics(&self, interface: &str) {
        for command in [
            self.commands.default_route(interface),
            self.commands.get_signal_strength(),
            self.commands.get_home_network(),
        ] {
            match self.runner.run(&command).await {
                Ok(output) if output.stdout.trim().is_empty() => {
                    debug!("{}: no output", command)
                }
                Ok(output) => debug!("{}: {}", command, output.stdout.trim()),
                Err(e) => debug!("{}: {}", command, e),
            }
        }
    }

    async fn run_checked(&self, command: &ProcessCommand) -> Result<()> {
        let output = self
            .runner
            .run(command)
            .await
            .map_err(|e| LoggerError::SoftFailure(e.to_string()))?;

        if !output.success {
            return Err(LoggerError::SoftFailure(format!(
                "{} failed: {}",
                command,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    /// Drop the data session and take the radio offline
    ///
    /// Idempotent when already offline.
    pub async fn disconnect(&mut self) -> Result<()> {
        match self.state {
            ModemState::Offline | ModemState::PoweredOff => {
                debug!("Modem already offline");
                return Ok(());
            }
            ModemState::Connected | ModemState::Online => {}
            other => {
                return Err(LoggerError::SoftFailure(format!(
                    "disconnect is not valid from {:?}",
                    other
                )));
            }
        }

        self.transition(ModemState::Disconnecting);
        self.connected = false;

        if let Some(interface) = self.interface.clone() {
            if let Err(e) = self.run_checked(&self.commands.link_set(&interface, false)).await {
                warn!("Failed to bring {} down: {}", interface, e);
            }
        }

        let result = self.set_mode(ModeRequest::Offline).await;
        self.transition(ModemState::Offline);
        result
    }

    /// Power the modem down
    ///
    /// Always ends in `PoweredOff`. Failures in the shutdown sequence are
    /// logged and the supply is cut regardless.
    pub async fn power_off(&mut self) {
        if matches!(self.state, ModemState::Online | ModemState::Connected) {
            if let Err(e) = self.disconnect().await {
                warn!("Ignoring disconnect failure during power-off: {}", e);
            }
        }

        self.link = None;
        self.connected = false;
        self.interface = None;

        if let Err(e) = self.power.force_down().await {
            warn!("Forced power-down failed: {}", e);
        }

        self.transition(ModemState::PoweredOff);
    }
}
