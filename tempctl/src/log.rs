use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

const BACKLOG: usize = 64;

struct SyncRecord {
    timestamp: Instant,
    level: Level,
    target: String,
    content: String,
}

/// Receiving end of the logger, drained by the main loop
pub struct LogSink {
    receiver: Receiver<SyncRecord>,
    start: Instant,
}

/// Logger handing records over to the main loop instead of printing them in place
pub struct Logger {
    sender: SyncSender<SyncRecord>,
}

impl Logger {
    pub fn init(level: LevelFilter) -> LogSink {
        let (sender, receiver) = sync_channel(BACKLOG);
        let logger = Box::new(Self {
            sender,
        });
        let _ = log::set_logger(Box::leak(logger)).map(|()| log::set_max_level(level));
        LogSink {
            receiver,
            start: Instant::now(),
        }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            // Records are dropped when the main loop falls behind
            let _ = self.sender.try_send(SyncRecord {
                timestamp: Instant::now(),
                level: record.level(),
                target: record.target().to_string(),
                content: std::fmt::format(*record.args()),
            });
        }
    }

    fn flush(&self) {}
}

impl LogSink {
    pub fn handle_logs(&mut self) {
        for record in self.receiver.try_iter() {
            println!("{}", self.format(&record));
        }
    }

    fn format(&self, record: &SyncRecord) -> String {
        format!(
            "[{:<9.5}] {:<5} {}: {}",
            record.timestamp.duration_since(self.start).as_secs_f32(),
            record.level,
            record.target,
            record.content
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_format() {
        let (_sender, receiver) = sync_channel(1);
        let sink = LogSink {
            receiver,
            start: Instant::now(),
        };
        let record = SyncRecord {
            timestamp: sink.start,
            level: Level::Warn,
            target: String::from("tempctl::protocol"),
            content: String::from("No reply"),
        };
        assert_eq!(sink.format(&record), "[0.00000  ] WARN  tempctl::protocol: No reply");
    }
}
