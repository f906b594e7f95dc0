use crate::config::{ProtocolConfig, CHANNELS};
use crate::error::{Error, Result};

/// Function codes understood by the firmware
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    GetFiltered = 0,
    GetRaw = 1,
    GetTarget = 2,
    SetTarget = 3,
    GetPid = 4,
    SetPid = 5,
    GetInputLimit = 6,
    SetInputLimit = 7,
    GetAlphaBeta = 8,
    SetAlphaBeta = 9,
    GetKalman = 10,
    SetKalman = 11,
    SetKalmanState = 12,
    GetSensorType = 13,
    Enable = 14,
    Disable = 15,
    GetEnable = 16,
    GetTimer = 17,
    GetTimeout = 18,
    SetTimeout = 19,
}

impl Opcode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Channel field of a frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Address {
    Channel(u8),
    /// Every channel in a single frame
    All,
}

impl Address {
    pub fn channel(index: u8) -> Result<Self> {
        if usize::from(index) < CHANNELS {
            Ok(Address::Channel(index))
        } else {
            Err(Error::InvalidChannel(index))
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Argument {
    Number(f64),
    Char(char),
}

/// One request frame, built per call and discarded once sent
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    opcode: Opcode,
    address: Option<Address>,
    arguments: Vec<Argument>,
}

impl Command {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            address: None,
            arguments: Vec::new(),
        }
    }

    pub fn to(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn number(mut self, value: f64) -> Self {
        self.arguments.push(Argument::Number(value));
        self
    }

    pub fn numbers(mut self, values: &[f64]) -> Self {
        self.arguments.extend(values.iter().copied().map(Argument::Number));
        self
    }

    pub fn character(mut self, value: char) -> Self {
        self.arguments.push(Argument::Char(value));
        self
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn address(&self) -> Option<Address> {
        self.address
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    /// Render the frame without its terminator.
    ///
    /// Numbers are rounded to the precision of the firmware first.
    pub fn encode(&self, config: &ProtocolConfig) -> Result<String> {
        let mut fields = vec![self.opcode.code().to_string()];
        match self.address {
            Some(Address::Channel(index)) => fields.push(index.to_string()),
            Some(Address::All) => fields.push(config.all_channels.to_string()),
            None => (),
        }
        for argument in &self.arguments {
            let field = match *argument {
                Argument::Number(value) => match config.round(value) {
                    rounded if rounded.is_finite() => rounded.to_string(),
                    _ => return Err(Error::InvalidArgument(format!("{} cannot be sent", value))),
                },
                Argument::Char(value) => value.to_string(),
            };
            fields.push(field);
        }

        let frame = fields.join(&config.delimiter.to_string());
        if frame.contains(['\r', '\n', config.terminator]) {
            return Err(Error::InvalidArgument(format!("frame {:?} contains a line break", frame)));
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_channel_command() {
        let config = ProtocolConfig::default();
        let command = Command::new(Opcode::SetPid).to(Address::channel(2).unwrap()).numbers(&[1.234, 0.5, 20.0]);
        assert_eq!(command.encode(&config).unwrap(), "5,2,1.23,0.5,20");
    }

    #[test]
    fn test_encode_all_channels() {
        let config = ProtocolConfig::default();
        let command = Command::new(Opcode::SetTarget).to(Address::All).numbers(&[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(command.encode(&config).unwrap(), "3,4,10,20,30,40");

        let config = ProtocolConfig {
            all_channels: 9,
            delimiter: ';',
            ..Default::default()
        };
        assert_eq!(command.encode(&config).unwrap(), "3;9;10;20;30;40");
    }

    #[test]
    fn test_encode_bare_and_infinite() {
        let config = ProtocolConfig::default();
        assert_eq!(Command::new(Opcode::GetEnable).encode(&config).unwrap(), "16");
        let command = Command::new(Opcode::SetTimeout).to(Address::Channel(1)).number(-1.0);
        assert_eq!(command.encode(&config).unwrap(), "19,1,-1");
    }

    #[test]
    fn test_encode_rejects_non_finite() {
        let config = ProtocolConfig::default();
        let command = Command::new(Opcode::SetTarget).to(Address::Channel(0)).number(f64::NAN);
        assert!(matches!(command.encode(&config), Err(Error::InvalidArgument(_))));
        let command = Command::new(Opcode::SetTarget).to(Address::Channel(0)).number(f64::MAX);
        assert!(matches!(command.encode(&config), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_encode_rejects_line_break() {
        let config = ProtocolConfig::default();
        let command = Command::new(Opcode::GetSensorType).character('\n');
        assert!(command.encode(&config).is_err());
    }

    #[test]
    fn test_channel_range() {
        assert_eq!(Address::channel(3).unwrap(), Address::Channel(3));
        assert!(matches!(Address::channel(4), Err(Error::InvalidChannel(4))));
    }
}
