//! Byte link between the host and the controller board

use crate::error::Result;
use std::time::Duration;

mod serial;
pub use serial::SerialTransport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

/// Line oriented, half-duplex link to the device
pub trait Transport: Send {
    /// Block until one line arrives or `timeout` elapses.
    ///
    /// The returned bytes still carry their terminator. `Ok(None)` means nothing
    /// complete arrived in time.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Write one already terminated frame and wait until it left the host
    fn write_line(&mut self, frame: &[u8]) -> Result<()>;

    /// Drop bytes queued for sending
    fn reset_output(&mut self) -> Result<()>;

    /// Drop bytes queued in both directions, including partial lines
    fn reset_buffers(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        (**self).read_line(timeout)
    }

    fn write_line(&mut self, frame: &[u8]) -> Result<()> {
        (**self).write_line(frame)
    }

    fn reset_output(&mut self) -> Result<()> {
        (**self).reset_output()
    }

    fn reset_buffers(&mut self) -> Result<()> {
        (**self).reset_buffers()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
