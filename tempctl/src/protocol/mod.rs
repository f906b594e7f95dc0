//! Framing, request/reply sequencing and the setup handshake

use std::thread;
use std::time::{Duration, Instant};

use crate::config::ProtocolConfig;
use crate::error::{Error, Result};
use crate::transport::Transport;

mod command;
mod handshake;
mod reply;

pub use command::{Address, Argument, Command, Opcode};
pub use handshake::{Handshake, HandshakeState, SensorSelection, Step, CALIBRATED, WAITING_TYPES};
pub use reply::{Parameters, ParsedReply, Reply, ReplyView, ViewKind};

/// Half-duplex command engine
///
/// Only one request is ever in flight: every write is followed by the settle
/// delay before anything else touches the link, and replies are matched to
/// requests by order alone.
pub struct Engine<T: Transport> {
    transport: T,
    config: ProtocolConfig,
    state: HandshakeState,
}

impl<T: Transport> Engine<T> {
    pub fn new(transport: T, config: ProtocolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            state: HandshakeState::AwaitingPrompt,
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Send one command; no reply is read
    pub fn send(&mut self, command: &Command) -> Result<()> {
        self.ensure_ready()?;
        let frame = command.encode(&self.config)?;
        self.write_frame(&frame)
    }

    /// Send a line as typed, for the console side channel
    pub fn send_raw(&mut self, line: &str) -> Result<()> {
        self.ensure_ready()?;
        if line.contains(['\r', '\n', self.config.terminator]) {
            return Err(Error::InvalidArgument(format!("{:?} spans several lines", line)));
        }
        self.write_frame(line)
    }

    /// Next line from the device, or an empty reply once the read timeout elapsed
    pub fn receive_reply(&mut self) -> Result<Reply> {
        self.read_reply(self.config.read_timeout())
    }

    pub fn receive(&mut self, view: ViewKind) -> Result<ReplyView> {
        Ok(self.receive_reply()?.view(view))
    }

    /// Send then read exactly one reply
    pub fn request(&mut self, command: &Command) -> Result<Reply> {
        self.send(command)?;
        self.receive_reply()
    }

    /// Negotiate the sensor types and wait for calibration.
    ///
    /// Pending input is dropped first. Invalid types close the link before any byte is written. The wait is
    /// bounded by `handshake_timeout_ms`.
    pub fn setup(&mut self, selection: &SensorSelection) -> Result<()> {
        if let Err(e) = selection.validate(&self.config) {
            log::error!("Refusing sensor types {:?}: {}", selection, e);
            self.state = HandshakeState::Failed;
            self.transport.close()?;
            return Err(e);
        }

        // Lines left over from an earlier session must not end the handshake
        if let Err(e) = self.transport.reset_buffers() {
            return Err(self.fault(e));
        }
        thread::sleep(self.config.boot_delay());

        let mut handshake = Handshake::new(selection);
        let budget = self.config.handshake_timeout();
        let started = Instant::now();
        loop {
            let elapsed = started.elapsed();
            if elapsed >= budget {
                handshake.fail();
                self.state = handshake.state();
                log::error!("Device did not calibrate within {:?}", budget);
                return Err(Error::HandshakeTimeout { elapsed });
            }
            let reply = self.read_reply(self.config.read_timeout().min(budget - elapsed))?;
            if !reply.is_received() {
                continue;
            }
            match handshake.on_line(reply.raw()) {
                Step::Send(payload) => {
                    log::info!("Sending sensor types {}", payload);
                    self.write_frame(&payload)?;
                },
                Step::Wait => (),
                Step::Done => break,
            }
            self.state = handshake.state();
        }

        self.transport.reset_buffers()?;
        self.state = HandshakeState::Calibrated;
        log::info!("Device calibrated");
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.transport.close()
    }

    fn ensure_ready(&self) -> Result<()> {
        if !self.transport.is_open() {
            Err(Error::Closed)
        } else if self.state != HandshakeState::Calibrated {
            Err(Error::NotCalibrated)
        } else {
            Ok(())
        }
    }

    fn write_frame(&mut self, frame: &str) -> Result<()> {
        let mut bytes = String::with_capacity(frame.len() + 1);
        bytes.push_str(frame);
        bytes.push(self.config.terminator);

        log::debug!("-> {}", frame);
        let written = self
            .transport
            .reset_output()
            .and_then(|()| self.transport.write_line(bytes.as_bytes()));
        if let Err(e) = written {
            return Err(self.fault(e));
        }
        thread::sleep(self.config.settle_delay());
        Ok(())
    }

    fn read_reply(&mut self, timeout: Duration) -> Result<Reply> {
        match self.transport.read_line(timeout) {
            Ok(Some(line)) => {
                let reply = Reply::new(&String::from_utf8_lossy(&line), self.config.delimiter, self.config.terminator);
                log::debug!("<- {}", reply.raw());
                Ok(reply)
            },
            Ok(None) => {
                log::warn!("No reply within {:?}", timeout);
                Ok(Reply::empty(self.config.delimiter))
            },
            Err(e) => Err(self.fault(e)),
        }
    }

    /// Transport faults end the connection
    fn fault(&mut self, error: Error) -> Error {
        log::error!("Link failure: {}", error);
        if let Err(e) = self.transport.close() {
            log::warn!("Closing after failure: {}", e);
        }
        error
    }
}
