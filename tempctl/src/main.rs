use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};

use tempctl::config::Settings;
use tempctl::console::Console;
use tempctl::log::{LogSink, Logger};
use tempctl::protocol::SensorSelection;
use tempctl::snapshot::Snapshot;
use tempctl::transport::SerialTransport;
use tempctl::TempController;

const IDLE: Duration = Duration::from_millis(10);

fn main() -> Result<()> {
    let settings = Settings::load()?;
    let mut log_sink = Logger::init(settings.log_level());
    let result = run(&settings, &mut log_sink);
    if let Err(e) = &result {
        log::error!("{:#}", e);
    }
    log_sink.handle_logs();
    result
}

fn run(settings: &Settings, log_sink: &mut LogSink) -> Result<()> {
    let terminate = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, terminate.clone()).context("Cannot register signal handler")?;
    }

    let selection = match &settings.sensor_types {
        Some(types) => SensorSelection::parse(types)?,
        None => SensorSelection::FirmwareDefault,
    };
    let protocol = settings.protocol.clone();
    let transport = SerialTransport::open(&settings.serial.port, settings.serial.baud_rate, protocol.terminator_byte()?)
        .with_context(|| format!("Cannot open {}", settings.serial.port))?;
    log_sink.handle_logs();

    let mut controller = match &settings.load_snapshot {
        Some(path) => {
            let mut snapshot = Snapshot::load(path)?;
            if let (None, SensorSelection::Types(types)) = (snapshot.sensor_types, &selection) {
                snapshot.sensor_types = Some(*types);
            }
            TempController::restore(transport, protocol, snapshot)?
        },
        None => TempController::connect(transport, protocol, selection)?,
    };
    controller.record_link(&settings.serial.port, settings.serial.baud_rate);
    log_sink.handle_logs();

    let mut console = match Console::spawn() {
        Ok(console) => Some(console),
        Err(e) => {
            log::warn!("Console unavailable: {:#}", e);
            None
        },
    };

    let mut next_poll = Instant::now();
    while !terminate.load(Ordering::Relaxed) && controller.is_active() {
        log_sink.handle_logs();

        while let Some(line) = console.as_ref().and_then(Console::try_recv) {
            match controller.send_raw(&line) {
                Ok(reply) if reply.is_received() => println!("{}", reply.raw()),
                Ok(_) => log::warn!("No reply to {}", line),
                Err(e) => log::error!("Cannot send {}: {}", line, e),
            }
        }

        if Instant::now() >= next_poll {
            match controller.get_filtered() {
                Ok(temperatures) => log::info!("Temperatures {:?}", temperatures),
                Err(e) => log::warn!("Cannot read temperatures: {}", e),
            }
            next_poll = Instant::now() + settings.poll_interval();
        }

        thread::sleep(IDLE);
    }

    log::info!("Shutting down");
    if let Some(path) = &settings.save_snapshot {
        if let Err(e) = controller.snapshot().save(path) {
            log::error!("{:#}", e);
        }
    }
    if let Err(e) = controller.close() {
        log::warn!("Closing serial port: {}", e);
    }
    if let Some(console) = console.as_mut() {
        console.stop();
    }
    Ok(())
}
