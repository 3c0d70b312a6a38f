//! qmicli command builders and acknowledgment matching
//!
//! The modem firmware answers in free text. Mode changes are accepted only
//! on an exact match of the success acknowledgment; anything else, including
//! a response that merely contains it, is a failure.

use std::fmt;
use std::time::Duration;

use crate::config::{ModemConfig, ProviderConfig};
use crate::link::ProcessCommand;

/// Operating modes accepted by `--dms-set-operating-mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeRequest {
    Online,
    Offline,
    Reset,
}

impl ModeRequest {
    pub fn as_str(self) -> &'static str {
        match self {
            ModeRequest::Online => "online",
            ModeRequest::Offline => "offline",
            ModeRequest::Reset => "reset",
        }
    }
}

/// Operating mode reported by `--dms-get-operating-mode`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioMode {
    Online,
    Offline,
    LowPower,
    Other(String),
}

impl fmt::Display for RadioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioMode::Online => f.write_str("online"),
            RadioMode::Offline => f.write_str("offline"),
            RadioMode::LowPower => f.write_str("low-power"),
            RadioMode::Other(mode) => f.write_str(mode),
        }
    }
}

/// Parse the mode out of `Mode: '<mode>'`
pub fn parse_operating_mode(output: &str) -> Option<RadioMode> {
    const MARKER: &str = "Mode: '";

    let start = output.find(MARKER)? + MARKER.len();
    let rest = &output[start..];
    let end = rest.find('\'')?;

    Some(match &rest[..end] {
        "online" => RadioMode::Online,
        "offline" => RadioMode::Offline,
        "low-power" => RadioMode::LowPower,
        other => RadioMode::Other(other.to_string()),
    })
}

/// Exact acknowledgment printed after a successful mode change
pub fn mode_ack(device: &str) -> String {
    format!("[{}] Operating mode set successfully\n", device)
}

/// Exact-match acknowledgment check
pub fn is_mode_ack(device: &str, output: &str) -> bool {
    output == mode_ack(device)
}

/// Builds every modem-related process invocation
#[derive(Debug, Clone)]
pub struct ModemCommands {
    device: String,
    use_sudo: bool,
    timeout: Duration,
}

impl ModemCommands {
    pub fn new(config: &ModemConfig) -> Self {
        Self {
            device: config.device.clone(),
            use_sudo: config.use_sudo,
            timeout: Duration::from_secs(config.command_timeout_s),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    fn qmicli(&self) -> ProcessCommand {
        ProcessCommand::privileged(self.use_sudo, "qmicli")
            .args(["-d", self.device.as_str()])
            .timeout(self.timeout)
    }

    pub fn get_operating_mode(&self) -> ProcessCommand {
        self.qmicli().arg("--dms-get-operating-mode")
    }

    pub fn set_operating_mode(&self, mode: ModeRequest) -> ProcessCommand {
        self.qmicli()
            .arg(format!("--dms-set-operating-mode={}", mode.as_str()))
    }

    pub fn get_signal_strength(&self) -> ProcessCommand {
        self.qmicli().arg("--nas-get-signal-strength")
    }

    pub fn get_home_network(&self) -> ProcessCommand {
        self.qmicli().arg("--nas-get-home-network")
    }

    /// Resolve the WWAN network interface bound to the control device
    pub fn get_wwan_interface(&self) -> ProcessCommand {
        self.qmicli().arg("-w")
    }

    /// Attach to the packet network
    ///
    /// Credentials are left out for providers that authenticate by APN alone.
    pub fn start_network(&self, provider: &ProviderConfig) -> ProcessCommand {
        let mut settings = format!("apn='{}'", provider.apn);
        if !provider.apn_only_auth {
            settings.push_str(&format!(
                ",username='{}',password='{}'",
                provider.username, provider.password
            ));
        }
        settings.push_str(",ip-type=4");

        ProcessCommand::privileged(self.use_sudo, "qmicli")
            .args(["-p", "-d", self.device.as_str()])
            .arg("--device-open-net=net-raw-ip|net-no-qos-header")
            .arg(format!("--wds-start-network={}", settings))
            .arg("--client-no-release-cid")
            .timeout(self.timeout)
    }

    pub fn link_set(&self, interface: &str, up: bool) -> ProcessCommand {
        ProcessCommand::privileged(self.use_sudo, "ip")
            .args(["link", "set", interface, if up { "up" } else { "down" }])
            .timeout(self.timeout)
    }

    /// Enable raw-IP framing; the flag does not survive a power cycle
    pub fn set_raw_ip(&self, interface: &str) -> ProcessCommand {
        ProcessCommand::privileged(self.use_sudo, "sh")
            .arg("-c")
            .arg(format!("echo Y > /sys/class/net/{}/qmi/raw_ip", interface))
            .timeout(self.timeout)
    }

    /// One bounded DHCP lease request
    pub fn dhcp_lease(&self, interface: &str, timeout: Duration) -> ProcessCommand {
        ProcessCommand::privileged(self.use_sudo, "udhcpc")
            .args(["-i", interface, "-n", "-q"])
            .timeout(timeout)
    }

    pub fn default_route(&self, interface: &str) -> ProcessCommand {
        ProcessCommand::new("ip")
            .args(["route", "show", "default", "dev", interface])
            .timeout(self.timeout)
    }
}
