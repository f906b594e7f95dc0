//! Host side mirror of the controller configuration
//!
//! The board never reports changes on its own, so the mirror is a cache with
//! no invalidation: anything driving the board behind our back makes it stale
//! until [`TempController::resynchronize`](crate::controller::TempController::resynchronize)
//! reads every channel again.

use serde::{Deserialize, Serialize};

use crate::config::{CHANNELS, INFINITE_TIMEOUT};
use crate::types::{AlphaBeta, InputLimit, Kalman, Pid};

/// Configuration of one channel, `None` until known
///
/// Every key is always written, unknown values as `null`.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ChannelParameters {
    pub kp: Option<f64>,
    pub ki: Option<f64>,
    pub kd: Option<f64>,
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub error: Option<f64>,
    pub noise: Option<f64>,
    pub imax: Option<f64>,
    pub imin: Option<f64>,
    /// Seconds, -1 for no timeout
    pub timeout: Option<f64>,
    #[serde(with = "flag")]
    pub enable: Option<bool>,
}

impl ChannelParameters {
    pub fn pid(&self) -> Option<Pid> {
        Some(Pid {
            kp: self.kp?,
            ki: self.ki?,
            kd: self.kd?,
        })
    }

    pub fn set_pid(&mut self, pid: Pid) {
        self.kp = Some(pid.kp);
        self.ki = Some(pid.ki);
        self.kd = Some(pid.kd);
    }

    pub fn input_limit(&self) -> Option<InputLimit> {
        Some(InputLimit {
            max: self.imax?,
            min: self.imin?,
        })
    }

    pub fn set_input_limit(&mut self, limit: InputLimit) {
        self.imax = Some(limit.max);
        self.imin = Some(limit.min);
    }

    pub fn alpha_beta(&self) -> Option<AlphaBeta> {
        Some(AlphaBeta {
            alpha: self.alpha?,
            beta: self.beta?,
        })
    }

    pub fn set_alpha_beta(&mut self, filter: AlphaBeta) {
        self.alpha = Some(filter.alpha);
        self.beta = Some(filter.beta);
    }

    pub fn kalman(&self) -> Option<Kalman> {
        Some(Kalman {
            error: self.error?,
            noise: self.noise?,
        })
    }

    pub fn set_kalman(&mut self, filter: Kalman) {
        self.error = Some(filter.error);
        self.noise = Some(filter.noise);
    }

    pub fn is_infinite(&self) -> bool {
        self.timeout == Some(INFINITE_TIMEOUT)
    }
}

/// Mirror of the board, in the shape persisted as a snapshot
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ControllerState {
    pub serial_port: Option<String>,
    pub baud_rate: Option<u32>,
    /// Written as four nulls while unknown
    #[serde(with = "sensor_types")]
    pub sensor_types: Option<[char; CHANNELS]>,
    pub parameters: [ChannelParameters; CHANNELS],
}

impl ControllerState {
    pub fn channel(&self, channel: u8) -> Option<&ChannelParameters> {
        self.parameters.get(usize::from(channel))
    }

    pub fn channel_mut(&mut self, channel: u8) -> Option<&mut ChannelParameters> {
        self.parameters.get_mut(usize::from(channel))
    }

    pub fn set_all_enabled(&mut self, enabled: bool) {
        for parameters in self.parameters.iter_mut() {
            parameters.enable = Some(enabled);
        }
    }
}

/// Enable flags are stored as 0/1
mod flag {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(f64),
    }

    pub fn serialize<S: Serializer>(value: &Option<bool>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(enabled) => serializer.serialize_u8(u8::from(*enabled)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
        Ok(Option::<Flag>::deserialize(deserializer)?.map(|flag| match flag {
            Flag::Bool(enabled) => enabled,
            Flag::Number(value) => value != 0.0,
        }))
    }
}

/// Sensor types are known for all channels or for none
mod sensor_types {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::config::CHANNELS;

    pub fn serialize<S: Serializer>(value: &Option<[char; CHANNELS]>, serializer: S) -> Result<S::Ok, S::Error> {
        let letters: [Option<char>; CHANNELS] = match value {
            Some(types) => types.map(Some),
            None => [None; CHANNELS],
        };
        letters.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<[char; CHANNELS]>, D::Error> {
        let letters = Option::<[Option<char>; CHANNELS]>::deserialize(deserializer)?;
        Ok(letters.and_then(|letters| {
            let known: Option<Vec<char>> = letters.into_iter().collect();
            known.and_then(|known| <[char; CHANNELS]>::try_from(known).ok())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_channel() {
        let mut parameters = ChannelParameters::default();
        assert_eq!(parameters.pid(), None);
        parameters.kp = Some(1.0);
        assert_eq!(parameters.pid(), None);
        parameters.set_pid(Pid {
            kp: 1.0,
            ki: 0.5,
            kd: 2.0,
        });
        assert_eq!(parameters.pid().map(|pid| pid.ki), Some(0.5));
    }

    #[test]
    fn test_enable_flag_encoding() {
        let mut state = ControllerState::default();
        state.set_all_enabled(false);
        state.parameters[2].enable = Some(true);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["parameters"][2]["enable"], 1);
        assert_eq!(json["parameters"][0]["enable"], 0);

        let parsed: ControllerState = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn test_accepts_null_template() {
        let json = r#"{
            "baud_rate": null,
            "serial_port": null,
            "sensor_types": null,
            "parameters": [
                {"kp": null, "enable": null},
                {"kp": 1.5, "enable": true},
                {},
                {"timeout": -1}
            ]
        }"#;
        let state: ControllerState = serde_json::from_str(json).unwrap();
        assert_eq!(state.parameters[0], ChannelParameters::default());
        assert_eq!(state.parameters[1].kp, Some(1.5));
        assert_eq!(state.parameters[1].enable, Some(true));
        assert!(state.parameters[3].is_infinite());
    }

    #[test]
    fn test_accepts_empty_template() {
        let json = r#"{
            "baud_rate": null,
            "serial_port": null,
            "sensor_types": [null, null, null, null],
            "parameters": [
                {"kp": null, "ki": null, "kd": null, "alpha": null, "beta": null, "error": null,
                 "noise": null, "imax": null, "imin": null, "timeout": null, "enable": null},
                {"kp": null, "ki": null, "kd": null, "alpha": null, "beta": null, "error": null,
                 "noise": null, "imax": null, "imin": null, "timeout": null, "enable": null},
                {"kp": null, "ki": null, "kd": null, "alpha": null, "beta": null, "error": null,
                 "noise": null, "imax": null, "imin": null, "timeout": null, "enable": null},
                {"kp": null, "ki": null, "kd": null, "alpha": null, "beta": null, "error": null,
                 "noise": null, "imax": null, "imin": null, "timeout": null, "enable": null}
            ]
        }"#;
        let state: ControllerState = serde_json::from_str(json).unwrap();
        assert_eq!(state, ControllerState::default());

        let partial = r#"{"sensor_types": ["K", null, "T", "N"]}"#;
        let state: ControllerState = serde_json::from_str(partial).unwrap();
        assert_eq!(state.sensor_types, None);
    }

    #[test]
    fn test_unknown_values_are_null() {
        let mut state = ControllerState::default();
        state.parameters[0].kp = Some(1.0);
        let json = serde_json::to_value(&state).unwrap();

        assert!(json["serial_port"].is_null());
        assert!(json["baud_rate"].is_null());
        assert_eq!(json["sensor_types"], serde_json::json!([null, null, null, null]));
        for channel in json["parameters"].as_array().unwrap() {
            let keys: Vec<&str> = channel.as_object().unwrap().keys().map(String::as_str).collect();
            assert_eq!(keys.len(), 11);
            for key in ["kp", "ki", "kd", "alpha", "beta", "error", "noise", "imax", "imin", "timeout", "enable"] {
                assert!(keys.contains(&key), "missing {}", key);
            }
        }
        assert_eq!(json["parameters"][0]["kp"], 1.0);
        assert!(json["parameters"][0]["ki"].is_null());
        assert!(json["parameters"][3]["enable"].is_null());

        state.sensor_types = Some(['K', 'J', 'N', 'B']);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["sensor_types"], serde_json::json!(["K", "J", "N", "B"]));
    }
}
