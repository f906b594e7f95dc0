//! Operator console
//!
//! A background thread turns stdin into raw command lines. It never touches the
//! serial link: lines go through a channel to the main loop, which owns the
//! controller and is the only writer.

use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use mio::{Interest, Token};

use crate::polling::Poller;

const INPUT: Token = Token(0);
const STOP_CHECK: Duration = Duration::from_millis(100);
/// Larger than the stdin buffer so reads go straight to the descriptor
const CHUNK: usize = 16 * 1024;

pub struct Console {
    lines: Receiver<String>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Console {
    /// Start reading stdin
    pub fn spawn() -> Result<Self> {
        Self::spawn_with(io::stdin())
    }

    pub fn spawn_with<R>(input: R) -> Result<Self>
    where
        R: Read + AsRawFd + Send + 'static,
    {
        let mut poller = Poller::new(4)?;
        poller.register(&input, INPUT, Interest::READABLE)?;

        let (sender, lines) = channel();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name("console".into())
            .spawn(move || {
                if let Err(e) = read_lines(input, poller, sender, flag) {
                    log::error!("Console stopped: {:#}", e);
                }
            })
            .context("Cannot start console thread")?;

        Ok(Self {
            lines,
            stop,
            handle: Some(handle),
        })
    }

    /// Next typed line, if any
    pub fn try_recv(&self) -> Option<String> {
        self.lines.try_recv().ok()
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_lines<R: Read>(mut input: R, mut poller: Poller, sender: Sender<String>, stop: Arc<AtomicBool>) -> Result<()> {
    let mut pending = Vec::new();
    let mut chunk = vec![0u8; CHUNK];
    while !stop.load(Ordering::Relaxed) {
        if !poller.is_ready(INPUT, Some(STOP_CHECK))? {
            continue;
        }
        let count = match input.read(&mut chunk) {
            Ok(0) => {
                log::info!("Console input closed");
                return Ok(());
            },
            Ok(count) => count,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("Cannot read console input"),
        };
        pending.extend_from_slice(&chunk[..count]);
        for line in take_lines(&mut pending) {
            if sender.send(line).is_err() {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Split complete, non-blank lines off the front of `pending`
fn take_lines(pending: &mut Vec<u8>) -> Vec<String> {
    let Some(end) = pending.iter().rposition(|&byte| byte == b'\n') else {
        return Vec::new();
    };
    let complete: Vec<u8> = pending.drain(..=end).collect();
    String::from_utf8_lossy(&complete)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::time::Instant;

    fn recv_timeout(console: &Console, timeout: Duration) -> Option<String> {
        let started = Instant::now();
        while started.elapsed() < timeout {
            if let Some(line) = console.try_recv() {
                return Some(line);
            }
            thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn test_take_lines() {
        let mut pending = b"0\r\n\n  16 \n5,0".to_vec();
        assert_eq!(take_lines(&mut pending), vec!["0", "16"]);
        assert_eq!(pending, b"5,0");
        assert!(take_lines(&mut pending).is_empty());
    }

    #[test]
    fn test_console_forwards_lines() {
        let (mut writer, reader) = UnixStream::pair().unwrap();
        let mut console = Console::spawn_with(reader).unwrap();

        writer.write_all(b"13\n5,0,").unwrap();
        assert_eq!(recv_timeout(&console, Duration::from_secs(1)).as_deref(), Some("13"));
        assert_eq!(console.try_recv(), None);

        writer.write_all(b"1,2,3\n").unwrap();
        assert_eq!(recv_timeout(&console, Duration::from_secs(1)).as_deref(), Some("5,0,1,2,3"));

        let started = Instant::now();
        console.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
