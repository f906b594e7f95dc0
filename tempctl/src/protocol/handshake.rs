use crate::config::{ProtocolConfig, CHANNELS};
use crate::error::{Error, Result};

/// Printed by the firmware when it wants the sensor types
pub const WAITING_TYPES: &str = "WAITING-TYPES";
/// Printed by the firmware once its sensors are calibrated
pub const CALIBRATED: &str = "CALIBRATED";

/// Payload asking the firmware to keep its compiled-in sensor types
const FIRMWARE_DEFAULT: &str = "0";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingPrompt,
    TypesSent,
    Calibrated,
    Failed,
}

/// Sensor type assignment sent during setup
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorSelection {
    FirmwareDefault,
    /// One letter per channel
    Types([char; CHANNELS]),
}

impl SensorSelection {
    /// Parse a string such as `"KJNB"`
    pub fn parse(types: &str) -> Result<Self> {
        let letters: Vec<char> = types.trim().chars().collect();
        <[char; CHANNELS]>::try_from(letters)
            .map(SensorSelection::Types)
            .map_err(|_| Error::InvalidArgument(format!("expected {} sensor types, got {:?}", CHANNELS, types)))
    }

    pub fn validate(&self, config: &ProtocolConfig) -> Result<()> {
        match self {
            SensorSelection::FirmwareDefault => Ok(()),
            SensorSelection::Types(types) => match types.iter().find(|&&t| !config.is_allowed_sensor(t)) {
                Some(&invalid) => Err(Error::InvalidSensorType(invalid)),
                None => Ok(()),
            },
        }
    }

    pub fn payload(&self) -> String {
        match self {
            SensorSelection::FirmwareDefault => String::from(FIRMWARE_DEFAULT),
            SensorSelection::Types(types) => types.iter().collect(),
        }
    }
}

/// What the engine has to do after a line was received
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Wait,
    Send(String),
    Done,
}

/// Sensor type negotiation run once per connection
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    payload: String,
    type_sends: usize,
}

impl Handshake {
    pub fn new(selection: &SensorSelection) -> Self {
        Self {
            state: HandshakeState::AwaitingPrompt,
            payload: selection.payload(),
            type_sends: 0,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn type_sends(&self) -> usize {
        self.type_sends
    }

    pub fn on_line(&mut self, line: &str) -> Step {
        if matches!(self.state, HandshakeState::Calibrated | HandshakeState::Failed) {
            return Step::Done;
        }
        match line {
            WAITING_TYPES => {
                if self.state == HandshakeState::TypesSent {
                    log::warn!("Device asked again for sensor types");
                }
                self.state = HandshakeState::TypesSent;
                self.type_sends += 1;
                Step::Send(self.payload.clone())
            },
            CALIBRATED => {
                self.state = HandshakeState::Calibrated;
                Step::Done
            },
            noise => {
                log::debug!("Ignoring {:?} while in {:?}", noise, self.state);
                Step::Wait
            },
        }
    }

    pub fn fail(&mut self) {
        self.state = HandshakeState::Failed;
    }
}
