//! Serial transport implementation

use super::Transport;
use crate::error::{Error, Result};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Longest single blocking read, so deadlines are honoured closely
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Longest partial line kept while waiting for a terminator
const MAX_PENDING: usize = 1024;

/// Serial transport for the USB UART of the board
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    terminator: u8,
    pending: Vec<u8>,
}

impl SerialTransport {
    /// Open a serial port
    ///
    /// # Arguments
    /// * `path` - Serial port path (e.g., "/dev/ttyACM0")
    /// * `baud_rate` - Baud rate (e.g., 9600)
    /// * `terminator` - Byte ending every line
    pub fn open(path: &str, baud_rate: u32, terminator: u8) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(POLL_TIMEOUT)
            .open()?;

        log::info!("Opened serial port: {} at {} baud", path, baud_rate);

        Ok(Self::from_port(port, terminator))
    }

    /// Wrap a port opened elsewhere
    pub fn from_port(port: Box<dyn SerialPort>, terminator: u8) -> Self {
        SerialTransport {
            port: Some(port),
            terminator,
            pending: Vec::new(),
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(Error::Closed)
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.pending.iter().position(|&byte| byte == self.terminator)?;
        Some(self.pending.drain(..=end).collect())
    }

    /// Drop a runaway partial line
    fn bound_pending(&mut self) {
        if self.pending.len() > MAX_PENDING && !self.pending.contains(&self.terminator) {
            log::warn!("Dropping {} bytes received without a line terminator", self.pending.len());
            self.pending.clear();
        }
    }
}

impl Transport for SerialTransport {
    fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        let mut buffer = [0u8; 64];
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            self.bound_pending();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                // Partial bytes stay queued for the next call
                return Ok(None);
            }
            let port = self.port()?;
            port.set_timeout(remaining.min(POLL_TIMEOUT))?;
            match port.read(&mut buffer) {
                Ok(n) => self.pending.extend_from_slice(&buffer[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => (),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write_line(&mut self, frame: &[u8]) -> Result<()> {
        let port = self.port()?;
        port.write_all(frame)?;
        port.flush()?;
        Ok(())
    }

    fn reset_output(&mut self) -> Result<()> {
        self.port()?.clear(ClearBuffer::Output)?;
        Ok(())
    }

    fn reset_buffers(&mut self) -> Result<()> {
        self.port()?.clear(ClearBuffer::All)?;
        self.pending.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            log::info!("Closed serial port");
        }
        self.pending.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
