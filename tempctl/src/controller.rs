//! Named operations of the CN0391 temperature controller
//!
//! Getters send one frame and read one reply. Setters send one frame, then
//! read the acknowledgement echoed by the firmware when `setter_reply` is set.
//! Successful setters also update the [`ControllerState`] mirror; nothing is
//! read back to confirm the write.

use crate::config::{ProtocolConfig, CHANNELS, INFINITE_TIMEOUT};
use crate::error::{Error, Result};
use crate::protocol::{Address, Command, Engine, HandshakeState, Opcode, Reply, SensorSelection};
use crate::state::{ChannelParameters, ControllerState};
use crate::transport::Transport;
use crate::types::{AlphaBeta, InputLimit, Kalman, Pid, Readout};

pub struct TempController<T: Transport> {
    engine: Engine<T>,
    state: ControllerState,
}

impl<T: Transport> TempController<T> {
    /// Run the setup handshake, then prime the mirror from the device
    pub fn connect(transport: T, config: ProtocolConfig, selection: SensorSelection) -> Result<Self> {
        let mut engine = Engine::new(transport, config)?;
        engine.setup(&selection)?;
        let mut controller = Self {
            engine,
            state: ControllerState::default(),
        };
        controller.resynchronize()?;
        Ok(controller)
    }

    /// Run the setup handshake with the snapshot sensor types, then push every
    /// known coefficient of the snapshot to the device
    pub fn restore(transport: T, config: ProtocolConfig, state: ControllerState) -> Result<Self> {
        let selection = state.sensor_types.map_or(SensorSelection::FirmwareDefault, SensorSelection::Types);
        let mut engine = Engine::new(transport, config)?;
        engine.setup(&selection)?;
        let mut controller = Self {
            engine,
            state,
        };
        controller.state.sensor_types = Some(controller.get_sensor_types()?);
        controller.apply_parameters()?;
        Ok(controller)
    }

    fn apply_parameters(&mut self) -> Result<()> {
        for channel in 0..CHANNELS as u8 {
            let parameters = self.state.parameters[usize::from(channel)].clone();
            if let Some(pid) = parameters.pid() {
                self.set_pid(channel, pid)?;
            }
            if let Some(filter) = parameters.alpha_beta() {
                self.set_alpha_beta(channel, filter)?;
            }
            if let Some(filter) = parameters.kalman() {
                self.set_kalman(channel, filter)?;
            }
            if let Some(limit) = parameters.input_limit() {
                self.set_input_limit(channel, limit)?;
            }
            if let Some(timeout) = parameters.timeout {
                self.set_timeout(channel, timeout)?;
            }
            if parameters.enable == Some(true) {
                self.enable(channel)?;
            }
        }
        log::info!("Restored controller parameters");
        Ok(())
    }

    /// Read every getter again and overwrite the mirror.
    ///
    /// This is the only way to repair the mirror after the board was driven by
    /// someone else.
    pub fn resynchronize(&mut self) -> Result<()> {
        let sensor_types = self.get_sensor_types()?;
        let enabled = self.get_enabled()?;
        let timeouts = self.get_timeout()?;
        let mut parameters = self.state.parameters.clone();
        for (channel, mirror) in parameters.iter_mut().enumerate() {
            let index = channel as u8;
            mirror.set_pid(self.get_pid(index)?);
            mirror.set_alpha_beta(self.get_alpha_beta(index)?);
            mirror.set_kalman(self.get_kalman(index)?);
            mirror.set_input_limit(self.get_input_limit(index)?);
            mirror.timeout = Some(timeouts[channel]);
            mirror.enable = Some(enabled[channel]);
        }
        self.state.sensor_types = Some(sensor_types);
        self.state.parameters = parameters;
        log::info!("Mirror synchronized with device");
        Ok(())
    }

    /// Record the link settings in the mirror so snapshots can reopen it
    pub fn record_link(&mut self, port: &str, baud_rate: u32) {
        self.state.serial_port = Some(port.to_string());
        self.state.baud_rate = Some(baud_rate);
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn snapshot(&self) -> ControllerState {
        self.state.clone()
    }

    pub fn config(&self) -> &ProtocolConfig {
        self.engine.config()
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.engine.state()
    }

    pub fn transport(&self) -> &T {
        self.engine.transport()
    }

    pub fn is_active(&self) -> bool {
        self.engine.is_open()
    }

    pub fn close(&mut self) -> Result<()> {
        self.engine.close()
    }

    /// Send an arbitrary command line and return whatever comes back
    pub fn send_raw(&mut self, line: &str) -> Result<Reply> {
        self.engine.send_raw(line)?;
        self.engine.receive_reply()
    }

    // Readouts

    /// Kalman filtered temperatures
    pub fn get_filtered(&mut self) -> Result<Readout> {
        self.query(Command::new(Opcode::GetFiltered))
    }

    pub fn get_raw(&mut self) -> Result<Readout> {
        self.query(Command::new(Opcode::GetRaw))
    }

    pub fn get_target(&mut self) -> Result<Readout> {
        self.query(Command::new(Opcode::GetTarget))
    }

    pub fn set_target(&mut self, channel: u8, target: f64) -> Result<Reply> {
        self.command(Command::new(Opcode::SetTarget).to(Address::channel(channel)?).number(target))
    }

    /// Every target in one frame
    pub fn set_target_all(&mut self, targets: Readout) -> Result<Reply> {
        self.command(Command::new(Opcode::SetTarget).to(Address::All).numbers(&targets))
    }

    // PID

    pub fn get_pid(&mut self, channel: u8) -> Result<Pid> {
        let [kp, ki, kd] = self.query(Command::new(Opcode::GetPid).to(Address::channel(channel)?))?;
        Ok(Pid {
            kp,
            ki,
            kd,
        })
    }

    pub fn set_pid(&mut self, channel: u8, pid: Pid) -> Result<Reply> {
        let pid = Pid {
            kp: self.round(pid.kp),
            ki: self.round(pid.ki),
            kd: self.round(pid.kd),
        };
        let command = Command::new(Opcode::SetPid).to(Address::channel(channel)?).numbers(&[pid.kp, pid.ki, pid.kd]);
        let reply = self.command(command)?;
        self.mirror(channel).set_pid(pid);
        Ok(reply)
    }

    pub fn get_input_limit(&mut self, channel: u8) -> Result<InputLimit> {
        let [max, min] = self.query(Command::new(Opcode::GetInputLimit).to(Address::channel(channel)?))?;
        Ok(InputLimit {
            max,
            min,
        })
    }

    pub fn set_input_limit(&mut self, channel: u8, limit: InputLimit) -> Result<Reply> {
        let limit = InputLimit {
            max: self.round(limit.max),
            min: self.round(limit.min),
        };
        let command = Command::new(Opcode::SetInputLimit).to(Address::channel(channel)?).numbers(&[limit.max, limit.min]);
        let reply = self.command(command)?;
        self.mirror(channel).set_input_limit(limit);
        Ok(reply)
    }

    // Filters

    pub fn get_alpha_beta(&mut self, channel: u8) -> Result<AlphaBeta> {
        let [alpha, beta] = self.query(Command::new(Opcode::GetAlphaBeta).to(Address::channel(channel)?))?;
        Ok(AlphaBeta {
            alpha,
            beta,
        })
    }

    pub fn set_alpha_beta(&mut self, channel: u8, filter: AlphaBeta) -> Result<Reply> {
        let filter = AlphaBeta {
            alpha: self.round(filter.alpha),
            beta: self.round(filter.beta),
        };
        let command =
            Command::new(Opcode::SetAlphaBeta).to(Address::channel(channel)?).numbers(&[filter.alpha, filter.beta]);
        let reply = self.command(command)?;
        self.mirror(channel).set_alpha_beta(filter);
        Ok(reply)
    }

    pub fn get_kalman(&mut self, channel: u8) -> Result<Kalman> {
        let [error, noise] = self.query(Command::new(Opcode::GetKalman).to(Address::channel(channel)?))?;
        Ok(Kalman {
            error,
            noise,
        })
    }

    pub fn set_kalman(&mut self, channel: u8, filter: Kalman) -> Result<Reply> {
        let filter = Kalman {
            error: self.round(filter.error),
            noise: self.round(filter.noise),
        };
        let command =
            Command::new(Opcode::SetKalman).to(Address::channel(channel)?).numbers(&[filter.error, filter.noise]);
        let reply = self.command(command)?;
        self.mirror(channel).set_kalman(filter);
        Ok(reply)
    }

    /// Reset the Kalman estimate of a channel, in Celsius
    pub fn set_kalman_state(&mut self, channel: u8, value: f64) -> Result<Reply> {
        self.command(Command::new(Opcode::SetKalmanState).to(Address::channel(channel)?).number(value))
    }

    // Sensors

    pub fn get_sensor_types(&mut self) -> Result<[char; CHANNELS]> {
        let reply = self.engine.request(&Command::new(Opcode::GetSensorType))?;
        check_echo(&reply, Opcode::GetSensorType, "sensor type letters")?;
        let letters: Option<Vec<char>> = reply
            .fields()
            .iter()
            .skip(1)
            .map(|field| {
                let mut chars = field.trim().chars();
                match (chars.next(), chars.next()) {
                    (Some(letter), None) => Some(letter),
                    _ => None,
                }
            })
            .collect();
        letters
            .and_then(|letters| <[char; CHANNELS]>::try_from(letters).ok())
            .ok_or_else(|| malformed(&reply, "sensor type letters"))
    }

    // Enable

    pub fn enable(&mut self, channel: u8) -> Result<Reply> {
        let reply = self.command(Command::new(Opcode::Enable).to(Address::channel(channel)?))?;
        self.mirror(channel).enable = Some(true);
        Ok(reply)
    }

    pub fn enable_all(&mut self) -> Result<Reply> {
        let reply = self.command(Command::new(Opcode::Enable).to(Address::All))?;
        self.state.set_all_enabled(true);
        Ok(reply)
    }

    pub fn disable(&mut self, channel: u8) -> Result<Reply> {
        let reply = self.command(Command::new(Opcode::Disable).to(Address::channel(channel)?))?;
        self.mirror(channel).enable = Some(false);
        Ok(reply)
    }

    pub fn disable_all(&mut self) -> Result<Reply> {
        let reply = self.command(Command::new(Opcode::Disable).to(Address::All))?;
        self.state.set_all_enabled(false);
        Ok(reply)
    }

    pub fn get_enabled(&mut self) -> Result<[bool; CHANNELS]> {
        let flags = self.query(Command::new(Opcode::GetEnable))?;
        Ok(flags.map(|flag| flag != 0.0))
    }

    // Timers

    /// Seconds each channel has been controlling
    pub fn get_timer(&mut self) -> Result<Readout> {
        self.query(Command::new(Opcode::GetTimer))
    }

    /// Seconds each channel may control, -1 when unbounded
    pub fn get_timeout(&mut self) -> Result<Readout> {
        self.query(Command::new(Opcode::GetTimeout))
    }

    pub fn set_timeout(&mut self, channel: u8, seconds: f64) -> Result<Reply> {
        let seconds = self.round(seconds);
        let reply = self.command(Command::new(Opcode::SetTimeout).to(Address::channel(channel)?).number(seconds))?;
        self.mirror(channel).timeout = Some(seconds);
        Ok(reply)
    }

    pub fn set_timeout_infinite(&mut self, channel: u8) -> Result<Reply> {
        self.set_timeout(channel, INFINITE_TIMEOUT)
    }

    fn round(&self, value: f64) -> f64 {
        self.engine.config().round(value)
    }

    /// Channels were validated when the command was built
    fn mirror(&mut self, channel: u8) -> &mut ChannelParameters {
        &mut self.state.parameters[usize::from(channel)]
    }

    fn query<const N: usize>(&mut self, command: Command) -> Result<[f64; N]> {
        let reply = self.engine.request(&command)?;
        check_echo(&reply, command.opcode(), "numeric values")?;
        let parameters = reply.parameters();
        if !parameters.valid {
            return Err(malformed(&reply, "numeric values"));
        }
        <[f64; N]>::try_from(parameters.values).map_err(|_| malformed(&reply, "one value per field"))
    }

    fn command(&mut self, command: Command) -> Result<Reply> {
        self.engine.send(&command)?;
        if !self.engine.config().setter_reply {
            return Ok(Reply::empty(self.engine.config().delimiter));
        }
        let reply = self.engine.receive_reply()?;
        if !reply.is_received() {
            log::warn!("No acknowledgement for {:?}", command.opcode());
        }
        Ok(reply)
    }
}

fn check_echo(reply: &Reply, opcode: Opcode, expected: &'static str) -> Result<()> {
    if !reply.is_received() {
        return Err(Error::Timeout);
    }
    if reply.function().trim() != opcode.code().to_string() {
        return Err(malformed(reply, expected));
    }
    Ok(())
}

fn malformed(reply: &Reply, expected: &'static str) -> Error {
    log::warn!("Unexpected reply {:?}", reply.raw());
    Error::MalformedReply {
        raw: reply.raw().to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockTransport, SimulatedController};

    fn fast_config() -> ProtocolConfig {
        ProtocolConfig {
            read_timeout_ms: 20,
            settle_delay_ms: 0,
            boot_delay_ms: 0,
            handshake_timeout_ms: 1_000,
            ..Default::default()
        }
    }

    fn connect() -> (TempController<MockTransport>, MockTransport) {
        let link = MockTransport::with_device(SimulatedController::new());
        let selection = SensorSelection::parse("KJNB").unwrap();
        let controller = TempController::connect(link.clone(), fast_config(), selection).unwrap();
        link.clear_written();
        (controller, link)
    }

    #[test]
    fn test_connect_primes_mirror() {
        let (controller, _link) = connect();
        let state = controller.state();
        assert_eq!(controller.handshake_state(), HandshakeState::Calibrated);
        assert_eq!(state.sensor_types, Some(['K', 'J', 'N', 'B']));
        assert_eq!(
            state.parameters[0].pid(),
            Some(Pid {
                kp: 15.0,
                ki: 0.25,
                kd: 20.0
            })
        );
        assert_eq!(state.parameters[1].kalman().map(|k| k.noise), Some(0.2));
        assert_eq!(state.parameters[2].imax, Some(5.0));
        assert_eq!(state.parameters[3].enable, Some(false));
        assert!(state.parameters[3].is_infinite());
    }

    #[test]
    fn test_pid_round_trip() {
        let (mut controller, _link) = connect();
        for channel in 0..4 {
            let pid = Pid {
                kp: 1.234 + f64::from(channel),
                ki: 0.0151,
                kd: 12.5,
            };
            controller.set_pid(channel, pid).unwrap();
            let expected = Pid {
                kp: controller.config().round(pid.kp),
                ki: 0.02,
                kd: 12.5,
            };
            assert_eq!(controller.get_pid(channel).unwrap(), expected);
            assert_eq!(controller.state().parameters[usize::from(channel)].pid(), Some(expected));
        }
    }

    #[test]
    fn test_target_all_is_one_frame() {
        let (mut controller, link) = connect();
        controller.set_target_all([10.0, 20.0, 30.0, 40.0]).unwrap();
        assert_eq!(link.written(), vec!["3,4,10,20,30,40\n"]);
        assert_eq!(controller.get_target().unwrap(), [10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_single_target() {
        let (mut controller, link) = connect();
        controller.set_target(2, 55.556).unwrap();
        assert_eq!(link.written(), vec!["3,2,55.56\n"]);
        assert_eq!(controller.get_target().unwrap(), [0.0, 0.0, 55.56, 0.0]);
    }

    #[test]
    fn test_enable_decoding() {
        let (mut controller, _link) = connect();
        controller.enable_all().unwrap();
        controller.disable(1).unwrap();
        assert_eq!(controller.get_enabled().unwrap(), [true, false, true, true]);
        let enabled: Vec<_> = controller.state().parameters.iter().map(|p| p.enable).collect();
        assert_eq!(enabled, vec![Some(true), Some(false), Some(true), Some(true)]);
    }

    #[test]
    fn test_infinite_timeout_round_trip() {
        let (mut controller, _link) = connect();
        controller.set_timeout(2, 90.0).unwrap();
        assert_eq!(controller.get_timeout().unwrap()[2], 90.0);
        controller.set_timeout_infinite(2).unwrap();
        assert_eq!(controller.get_timeout().unwrap()[2], -1.0);
        assert!(controller.state().parameters[2].is_infinite());
    }

    #[test]
    fn test_filters_and_limits() {
        let (mut controller, _link) = connect();
        let filter = AlphaBeta {
            alpha: 0.333,
            beta: 0.071,
        };
        controller.set_alpha_beta(3, filter).unwrap();
        assert_eq!(
            controller.get_alpha_beta(3).unwrap(),
            AlphaBeta {
                alpha: 0.33,
                beta: 0.07
            }
        );

        let kalman = Kalman {
            error: 1.5,
            noise: 0.05,
        };
        controller.set_kalman(0, kalman).unwrap();
        assert_eq!(controller.get_kalman(0).unwrap(), kalman);

        let limit = InputLimit {
            max: 80.0,
            min: 10.0,
        };
        controller.set_input_limit(1, limit).unwrap();
        assert_eq!(controller.get_input_limit(1).unwrap(), limit);

        controller.set_kalman_state(0, 30.0).unwrap();
        assert_eq!(controller.get_filtered().unwrap()[0], 30.0);
    }

    #[test]
    fn test_invalid_channel_sends_nothing() {
        let (mut controller, link) = connect();
        assert!(matches!(controller.get_pid(4), Err(Error::InvalidChannel(4))));
        assert!(matches!(controller.set_target(7, 1.0), Err(Error::InvalidChannel(7))));
        assert!(link.written().is_empty());
    }

    #[test]
    fn test_malformed_replies() {
        let (mut controller, mut link) = connect();
        link.inject_line("0,1.5,bad,3.0,4.0");
        match controller.get_filtered() {
            Err(Error::MalformedReply {
                raw,
                ..
            }) => assert_eq!(raw, "0,1.5,bad,3.0,4.0"),
            other => panic!("unexpected result {:?}", other),
        }
        // The real answer is still queued behind the bad line
        assert_eq!(link.pending(), 1);
        link.reset_buffers().unwrap();

        link.inject_line("4,1.00,2.00,3.00");
        assert!(matches!(controller.get_raw(), Err(Error::MalformedReply { .. })));
        link.reset_buffers().unwrap();
        assert_eq!(controller.get_raw().unwrap(), [21.75; 4]);

        assert_eq!(controller.send_raw("99").unwrap().raw(), "UNKNOWN,99");
    }

    #[test]
    fn test_no_reply_is_timeout() {
        let (mut controller, link) = connect();
        link.device(|device| device.mute = true);
        link.wait_on_empty(true);

        let started = std::time::Instant::now();
        assert!(matches!(controller.get_raw(), Err(Error::Timeout)));
        assert!(started.elapsed() < std::time::Duration::from_millis(200));

        // Missing acknowledgements do not undo the mirror update
        let reply = controller.set_timeout(1, 30.0).unwrap();
        assert!(!reply.is_received());
        assert_eq!(controller.state().parameters[1].timeout, Some(30.0));

        link.device(|device| device.mute = false);
        assert_eq!(controller.get_timeout().unwrap()[1], 30.0);
    }

    #[test]
    fn test_resynchronize_repairs_mirror() {
        let (mut controller, link) = connect();
        link.device(|device| {
            device.channels[1].kp = 3.5;
            device.channels[1].enabled = true;
        });
        assert_eq!(controller.state().parameters[1].kp, Some(0.75));
        controller.resynchronize().unwrap();
        assert_eq!(controller.state().parameters[1].kp, Some(3.5));
        assert_eq!(controller.state().parameters[1].enable, Some(true));
    }

    #[test]
    fn test_restore_pushes_snapshot() {
        let mut state = ControllerState {
            sensor_types: Some(['T', 'T', 'K', 'K']),
            ..Default::default()
        };
        state.parameters[0] = ChannelParameters {
            kp: Some(2.0),
            ki: Some(0.1),
            kd: Some(4.0),
            timeout: Some(-1.0),
            enable: Some(true),
            ..Default::default()
        };
        state.parameters[3].alpha = Some(0.4);
        state.parameters[3].beta = Some(0.02);

        let link = MockTransport::with_device(SimulatedController::new());
        let controller = TempController::restore(link.clone(), fast_config(), state.clone()).unwrap();
        assert_eq!(controller.state().sensor_types, Some(['T', 'T', 'K', 'K']));
        assert_eq!(
            link.written(),
            vec!["TTKK\n", "13\n", "5,0,2,0.1,4\n", "19,0,-1\n", "14,0\n", "9,3,0.4,0.02\n"]
        );
        let device = link.device(|device| device.channels.clone()).unwrap();
        assert!(device[0].enabled);
        assert_eq!(device[0].kp, 2.0);
        assert_eq!(device[3].alpha, 0.4);
        assert_eq!(controller.snapshot().parameters, state.parameters);
    }

    #[test]
    fn test_pure_setters() {
        let link = MockTransport::with_device(SimulatedController::new());
        let config = ProtocolConfig {
            setter_reply: false,
            ..fast_config()
        };
        let mut controller = TempController::connect(link.clone(), config, SensorSelection::FirmwareDefault).unwrap();
        link.device(|device| device.acknowledge = false);
        let reply = controller.enable(2).unwrap();
        assert!(!reply.is_received());
        assert_eq!(controller.get_enabled().unwrap(), [false, false, true, false]);
    }
}
