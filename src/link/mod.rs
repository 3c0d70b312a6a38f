//! # Link Transport Module
//!
//! Handles the two ways the logger talks to the modem.
//!
//! This module handles:
//! - Opening the modem's AT command port (tries each configured path)
//! - Framing newline-terminated commands and collecting free-text responses
//! - Running opaque system tools (see [`process`])

use bytes::BytesMut;
use std::time::Duration;
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::{LoggerError, Result};

pub mod port_trait;
pub mod process;

pub use port_trait::{SerialPortIO, TokioSerialPort};
pub use process::{CommandOutput, CommandRunner, ProcessCommand, SystemRunner};

/// Size of a single read from the port
const READ_CHUNK: usize = 256;

/// Final result codes that end a response
const FINAL_RESULT_CODES: &[&str] = &["OK", "ERROR", "+CME ERROR", "+CMS ERROR"];

/// Frame a command for the wire
pub fn frame_command(command: &str) -> Vec<u8> {
    format!("{}\r\n", command).into_bytes()
}

/// True once a final result line has been received
pub fn response_complete(text: &str) -> bool {
    text.lines()
        .map(str::trim)
        .any(|line| FINAL_RESULT_CODES.iter().any(|code| line.starts_with(code)))
}

/// True when the response carries a bare `OK` result line
pub fn response_ok(text: &str) -> bool {
    text.lines().map(str::trim).any(|line| line == "OK")
}

/// Opened AT command link
///
/// Exclusively owned by the connectivity manager; other components borrow
/// it for the duration of one exchange sequence.
pub struct LinkHandle {
    port: Box<dyn SerialPortIO>,
    device_path: String,
    timeout: Duration,
    buffer: BytesMut,
}

impl std::fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkHandle")
            .field("device_path", &self.device_path)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl LinkHandle {
    pub fn new(
        port: Box<dyn SerialPortIO>,
        device_path: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            port,
            device_path: device_path.into(),
            timeout,
            buffer: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Send a command and collect its response
    ///
    /// Reads until a final result line or the response timeout. A timeout
    /// with nothing received is an error; a partial response is returned
    /// as-is for the caller's marker matching.
    ///
    /// # Errors
    ///
    /// Returns `Serial` if the write fails or nothing arrives in time.
    pub async fn send_command(&mut self, command: &str) -> Result<String> {
        let frame = frame_command(command);

        self.port
            .write_all(&frame)
            .await
            .map_err(|e| LoggerError::Serial(format!("Failed to write command: {}", e)))?;

        self.port
            .flush()
            .await
            .map_err(|e| LoggerError::Serial(format!("Failed to flush serial port: {}", e)))?;

        debug!("Sent {:?} to {}", command, self.device_path);
        self.read_response(command).await
    }

    async fn read_response(&mut self, command: &str) -> Result<String> {
        self.buffer.clear();
        let deadline = Instant::now() + self.timeout;
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            match tokio::time::timeout_at(deadline, self.port.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    return Err(LoggerError::Serial(format!(
                        "{} closed while waiting for {:?}",
                        self.device_path, command
                    )));
                }
                Ok(Ok(n)) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    if response_complete(&String::from_utf8_lossy(&self.buffer)) {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    return Err(LoggerError::Serial(format!("Failed to read response: {}", e)));
                }
                Err(_) if self.buffer.is_empty() => {
                    return Err(LoggerError::Serial(format!(
                        "No response to {:?} within {:?}",
                        command, self.timeout
                    )));
                }
                Err(_) => {
                    warn!("Partial response to {:?} after {:?}", command, self.timeout);
                    break;
                }
            }
        }

        Ok(String::from_utf8_lossy(&self.buffer).into_owned())
    }
}

/// Opens the AT command link once the modem has enumerated
pub trait LinkOpener: Send + Sync {
    fn open(&self) -> Result<LinkHandle>;
}

/// Opens a real serial port with `tokio-serial`
#[derive(Debug, Clone)]
pub struct SerialLinkOpener {
    config: SerialConfig,
}

impl SerialLinkOpener {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }

    /// Open a specific serial port at 8N1 without flow control
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| LoggerError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }
}

impl LinkOpener for SerialLinkOpener {
    /// Try each configured path in order
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` listing every path tried.
    fn open(&self) -> Result<LinkHandle> {
        for path in &self.config.ports {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, self.config.baud_rate) {
                Ok(port) => {
                    info!("Opened modem command port at {}", path);
                    return Ok(LinkHandle::new(
                        Box::new(TokioSerialPort::new(port)),
                        path.clone(),
                        Duration::from_millis(self.config.timeout_ms),
                    ));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(LoggerError::SerialPortNotFound(self.config.ports.join(", ")))
    }
}
