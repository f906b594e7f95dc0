//! Host side driver for the CN0391 four channel temperature controller

pub mod config;
pub mod console;
pub mod controller;
pub mod error;
pub mod log;
pub mod polling;
pub mod protocol;
pub mod snapshot;
pub mod state;
pub mod transport;
pub mod types;

pub use controller::TempController;
pub use error::{Error, Result};
