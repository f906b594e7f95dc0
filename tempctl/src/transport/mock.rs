//! In-memory transport and firmware model for testing

use super::Transport;
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Mock transport recording every frame written to it
///
/// Clones share the same link, so a test can keep a handle while the engine
/// owns another.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    incoming: VecDeque<Vec<u8>>,
    written: Vec<String>,
    device: Option<SimulatedController>,
    wait_on_empty: bool,
    open: bool,
    output_resets: usize,
    /// Boot banner not printed yet
    booting: bool,
}

impl MockTransport {
    /// Create a link nobody answers on
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                incoming: VecDeque::new(),
                written: Vec::new(),
                device: None,
                wait_on_empty: false,
                open: true,
                output_resets: 0,
                booting: false,
            })),
        }
    }

    /// Create a link to a simulated board
    ///
    /// The board prints its boot banner on the first read, so anything the host
    /// flushes before reading does not swallow it.
    pub fn with_device(device: SimulatedController) -> Self {
        let transport = Self::new();
        {
            let mut inner = transport.lock();
            inner.device = Some(device);
            inner.booting = true;
        }
        transport
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap()
    }

    /// Queue a line as the board would print it
    pub fn inject_line(&self, line: &str) {
        self.lock().incoming.push_back(framed(line));
    }

    /// Frames written so far, terminators included
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    pub fn clear_written(&self) {
        self.lock().written.clear();
    }

    pub fn pending(&self) -> usize {
        self.lock().incoming.len()
    }

    pub fn output_resets(&self) -> usize {
        self.lock().output_resets
    }

    /// Make empty reads sleep for the whole timeout, like a quiet serial line
    pub fn wait_on_empty(&self, enabled: bool) {
        self.lock().wait_on_empty = enabled;
    }

    /// Inspect or alter the simulated board
    pub fn device<R>(&self, f: impl FnOnce(&mut SimulatedController) -> R) -> Option<R> {
        self.lock().device.as_mut().map(f)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn framed(line: &str) -> Vec<u8> {
    format!("{}\r\n", line).into_bytes()
}

impl Transport for MockTransport {
    fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let wait = {
            let mut inner = self.lock();
            if !inner.open {
                return Err(Error::Closed);
            }
            if inner.booting {
                inner.booting = false;
                let banner = inner.device.as_mut().map(SimulatedController::boot).unwrap_or_default();
                for line in banner.iter().rev() {
                    inner.incoming.push_front(framed(line));
                }
            }
            if let Some(line) = inner.incoming.pop_front() {
                return Ok(Some(line));
            }
            inner.wait_on_empty
        };
        if wait {
            std::thread::sleep(timeout);
        }
        Ok(None)
    }

    fn write_line(&mut self, frame: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        if !inner.open {
            return Err(Error::Closed);
        }
        let frame = String::from_utf8_lossy(frame).into_owned();
        let line = frame.trim_end_matches(['\r', '\n']).to_string();
        inner.written.push(frame);
        let replies = match inner.device.as_mut() {
            Some(device) => device.receive(&line),
            None => Vec::new(),
        };
        inner.incoming.extend(replies.iter().map(|reply| framed(reply)));
        Ok(())
    }

    fn reset_output(&mut self) -> Result<()> {
        self.lock().output_resets += 1;
        Ok(())
    }

    fn reset_buffers(&mut self) -> Result<()> {
        self.lock().incoming.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.lock().open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }
}

/// State of one PID lane on the simulated board
#[derive(Clone, Debug, PartialEq)]
pub struct SimulatedChannel {
    pub target: f32,
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub imax: f32,
    pub imin: f32,
    pub alpha: f32,
    pub beta: f32,
    pub error: f32,
    pub noise: f32,
    pub timeout: f32,
    pub timer: f32,
    pub enabled: bool,
    pub temperature: f32,
    pub raw: f32,
}

impl SimulatedChannel {
    fn new(pid: [f32; 3], limits: [f32; 2], alpha_beta: [f32; 2], kalman: [f32; 2]) -> Self {
        Self {
            target: 0.0,
            kp: pid[0],
            ki: pid[1],
            kd: pid[2],
            imax: limits[0],
            imin: limits[1],
            alpha: alpha_beta[0],
            beta: alpha_beta[1],
            error: kalman[0],
            noise: kalman[1],
            timeout: -1.0,
            timer: 0.0,
            enabled: false,
            temperature: 21.5,
            raw: 21.75,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Stage {
    WaitingTypes,
    Running,
}

/// Firmware model answering the command table the way the board does
///
/// Floats are printed with two decimals and every setter frame is echoed back
/// as its acknowledgement.
#[derive(Clone, Debug)]
pub struct SimulatedController {
    stage: Stage,
    pub sensor_types: [char; 4],
    pub channels: [SimulatedChannel; 4],
    pub acknowledge: bool,
    /// Keep applying commands but print nothing
    pub mute: bool,
    pub prompt: bool,
    pub type_lines: usize,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self {
            stage: Stage::WaitingTypes,
            sensor_types: ['N'; 4],
            channels: [
                SimulatedChannel::new([15.0, 0.25, 20.0], [100.0, 0.0], [0.5, 0.05], [1.0, 0.1]),
                SimulatedChannel::new([0.75, 0.01, 8.0], [100.0, 0.0], [0.5, 0.05], [1.1, 0.2]),
                SimulatedChannel::new([0.0; 3], [5.0, 0.0], [0.0; 2], [0.0; 2]),
                SimulatedChannel::new([0.0; 3], [5.0, 0.0], [0.0; 2], [0.0; 2]),
            ],
            acknowledge: true,
            mute: false,
            prompt: true,
            type_lines: 0,
        }
    }
}

impl SimulatedController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Board already past its setup phase
    pub fn calibrated() -> Self {
        Self {
            stage: Stage::Running,
            prompt: false,
            ..Self::default()
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.stage == Stage::Running
    }

    fn boot(&mut self) -> Vec<String> {
        let mut lines = vec![String::from("CN0391 temperature controller")];
        if self.prompt {
            lines.push(String::from("WAITING-TYPES"));
        }
        lines
    }

    /// Handle one received line and return the lines printed in response
    pub fn receive(&mut self, line: &str) -> Vec<String> {
        let replies = match self.stage {
            Stage::WaitingTypes => self.receive_types(line),
            Stage::Running => self.receive_command(line),
        };
        if self.mute {
            Vec::new()
        } else {
            replies
        }
    }

    fn receive_types(&mut self, line: &str) -> Vec<String> {
        self.type_lines += 1;
        if line != "0" {
            let types: Vec<char> = line.chars().collect();
            match <[char; 4]>::try_from(types) {
                Ok(types) if types.iter().all(char::is_ascii_uppercase) => self.sensor_types = types,
                _ => return vec![String::from("WAITING-TYPES")],
            }
        }
        self.stage = Stage::Running;
        vec![line.to_string(), String::from("CALIBRATED")]
    }

    fn receive_command(&mut self, line: &str) -> Vec<String> {
        let fields: Vec<&str> = line.split(',').collect();
        let Ok(opcode) = fields[0].parse::<u8>() else {
            return vec![format!("UNKNOWN,{}", line)];
        };
        let channel = fields.get(1).and_then(|field| field.parse::<usize>().ok());
        let values: Vec<f32> = fields.iter().skip(2).filter_map(|field| field.parse().ok()).collect();

        let readout = |values: [f32; 4]| vec![print_floats(opcode, &values)];
        match (opcode, channel) {
            (0, _) => readout(self.channels.each(|c| c.temperature)),
            (1, _) => readout(self.channels.each(|c| c.raw)),
            (2, _) => readout(self.channels.each(|c| c.target)),
            (4, Some(ch)) if ch < 4 => {
                let c = &self.channels[ch];
                vec![print_floats(opcode, &[c.kp, c.ki, c.kd])]
            },
            (6, Some(ch)) if ch < 4 => {
                let c = &self.channels[ch];
                vec![print_floats(opcode, &[c.imax, c.imin])]
            },
            (8, Some(ch)) if ch < 4 => {
                let c = &self.channels[ch];
                vec![print_floats(opcode, &[c.alpha, c.beta])]
            },
            (10, Some(ch)) if ch < 4 => {
                let c = &self.channels[ch];
                vec![print_floats(opcode, &[c.error, c.noise])]
            },
            (13, _) => {
                let types: Vec<String> = self.sensor_types.iter().map(char::to_string).collect();
                vec![format!("13,{}", types.join(","))]
            },
            (16, _) => {
                let flags: Vec<&str> = self.channels.iter().map(|c| if c.enabled { "1" } else { "0" }).collect();
                vec![format!("16,{}", flags.join(","))]
            },
            (17, _) => readout(self.channels.each(|c| c.timer)),
            (18, _) => readout(self.channels.each(|c| c.timeout)),
            (3 | 5 | 7 | 9 | 11 | 12 | 14 | 15 | 19, Some(ch)) if ch <= 4 => {
                self.apply(opcode, ch, &values);
                if self.acknowledge {
                    vec![line.to_string()]
                } else {
                    Vec::new()
                }
            },
            _ => vec![format!("UNKNOWN,{}", line)],
        }
    }

    fn apply(&mut self, opcode: u8, ch: usize, values: &[f32]) {
        let value = |i: usize| values.get(i).copied().unwrap_or(0.0);
        if ch == 4 {
            match opcode {
                3 => self.channels.iter_mut().zip(values).for_each(|(c, v)| c.target = *v),
                14 => self.channels.iter_mut().for_each(|c| c.enabled = true),
                15 => self.channels.iter_mut().for_each(|c| c.enabled = false),
                _ => (0..4).for_each(|ch| self.apply(opcode, ch, values)),
            }
            return;
        }
        let c = &mut self.channels[ch];
        match opcode {
            3 => c.target = value(0),
            5 => (c.kp, c.ki, c.kd) = (value(0), value(1), value(2)),
            7 => (c.imax, c.imin) = (value(0), value(1)),
            9 => (c.alpha, c.beta) = (value(0), value(1)),
            11 => (c.error, c.noise) = (value(0), value(1)),
            12 => c.temperature = value(0),
            14 => c.enabled = true,
            15 => c.enabled = false,
            19 => c.timeout = value(0),
            _ => (),
        }
    }
}

trait EachChannel {
    fn each(&self, f: impl Fn(&SimulatedChannel) -> f32) -> [f32; 4];
}

impl EachChannel for [SimulatedChannel; 4] {
    fn each(&self, f: impl Fn(&SimulatedChannel) -> f32) -> [f32; 4] {
        [f(&self[0]), f(&self[1]), f(&self[2]), f(&self[3])]
    }
}

fn print_floats(opcode: u8, values: &[f32]) -> String {
    let values: Vec<String> = values.iter().map(|value| format!("{:.2}", value)).collect();
    format!("{},{}", opcode, values.join(","))
}
