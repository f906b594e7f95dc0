use serde::{Deserialize, Serialize};

use crate::config::CHANNELS;

/// One value per channel, channel 0 first
pub type Readout = [f64; CHANNELS];

/// Proportional Integral Derivative controller gains
#[derive(Serialize, Deserialize, Default, Copy, Clone, Debug, PartialEq)]
pub struct Pid {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// Bounds of the target temperature, in Celsius
#[derive(Serialize, Deserialize, Default, Copy, Clone, Debug, PartialEq)]
pub struct InputLimit {
    pub max: f64,
    pub min: f64,
}

/// Alpha-beta filter applied to the PID input
#[derive(Serialize, Deserialize, Default, Copy, Clone, Debug, PartialEq)]
pub struct AlphaBeta {
    /// Signal smoothing, between 0 and 1
    pub alpha: f64,
    /// Derivative smoothing, between 0 and 1
    pub beta: f64,
}

/// Kalman filter applied to the measurements
#[derive(Serialize, Deserialize, Default, Copy, Clone, Debug, PartialEq)]
pub struct Kalman {
    /// Standard deviation of the measurement
    pub error: f64,
    /// Process noise, lower smooths more but lags
    pub noise: f64,
}
