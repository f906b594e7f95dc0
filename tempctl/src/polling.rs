use anyhow::{Context, Result};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::os::fd::AsRawFd;
use std::time::Duration;

/// Readiness wait on raw file descriptors
pub struct Poller {
    inner: Poll,
    events: Events,
}

impl Poller {
    pub fn new(capacity: usize) -> Result<Self> {
        let inner = Poll::new().context("Error creating poller")?;
        let events = Events::with_capacity(capacity);
        Ok(Self {
            inner,
            events,
        })
    }

    pub fn register<T: AsRawFd>(&mut self, source: &T, token: Token, interest: Interest) -> Result<()> {
        self.inner
            .registry()
            .register(&mut SourceFd(&source.as_raw_fd()), token, interest)
            .context("Error registering file descriptor")
    }

    /// Wait for readiness; an empty set means the timeout elapsed
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<&Events> {
        if let Err(e) = self.inner.poll(&mut self.events, timeout) {
            if e.kind() != std::io::ErrorKind::Interrupted {
                return Err(e).context("Error polling for events");
            }
            self.events.clear();
        }
        Ok(&self.events)
    }

    pub fn is_ready(&mut self, token: Token, timeout: Option<Duration>) -> Result<bool> {
        Ok(self.poll(timeout)?.iter().any(|event| event.token() == token))
    }
}
