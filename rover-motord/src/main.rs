//! Motor/UART adapter binary (C9 Motor adapter): consumes `nav.command`,
//! writes the ESP32 line protocol over serial, and republishes parsed
//! ACK/STATUS/DATA telemetry as `esp32.raw`.

use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use std::time::Duration;

use rover_core::bus::payload::Message;
use rover_core::config::RoverConfig;
use rover_core::motor::{format_command, parse_telemetry};
use rover_core::{Bus, Channel};

fn open_port(cfg: &RoverConfig) -> anyhow::Result<Box<dyn serialport::SerialPort>> {
    let port = serialport::new(&cfg.nav.uart_device, cfg.nav.baud_rate)
        .timeout(Duration::from_secs_f32(cfg.nav.timeout_seconds))
        .open()?;
    Ok(port)
}

fn spawn_telemetry_thread(port: Box<dyn serialport::SerialPort>, bus: Arc<Bus>) {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(port);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => std::thread::sleep(Duration::from_millis(100)),
                Ok(_) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let payload = parse_telemetry(&line);
                    tracing::debug!(?payload, "uart rx");
                    bus.publish(Channel::Upstream, Message::Esp32Raw(payload));
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    tracing::warn!("uart read error: {e}");
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
    });
}

fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("ROVER_CONFIG").unwrap_or_else(|_| {
            RoverConfig::default_config_path().to_string_lossy().into_owned()
        });
    let log_dir = std::env::var("ROVER_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let _guard = rover_core::logging::init("rover-motord", &log_dir, "rover_motord=info");

    let config = match RoverConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("failed to load {config_path}: {e}; using defaults");
            RoverConfig::default()
        }
    };

    let bus = Bus::connect(&config.ipc)?;
    let sim = std::env::var("ROVER_MOTOR_SIM").is_ok();
    let mut writer: Option<Box<dyn serialport::SerialPort>> = None;

    if sim {
        tracing::info!("rover-motord running in simulation mode (ROVER_MOTOR_SIM set)");
    } else {
        match open_port(&config) {
            Ok(port) => {
                tracing::info!(device = %config.nav.uart_device, baud = config.nav.baud_rate, "uart opened");
                match port.try_clone() {
                    Ok(rx_port) => spawn_telemetry_thread(rx_port, Arc::clone(&bus)),
                    Err(e) => tracing::warn!("failed to clone serial handle for rx thread: {e}"),
                }
                writer = Some(port);
            }
            Err(e) => {
                tracing::error!(
                    "failed to open uart {}: {e}; running in simulation mode",
                    config.nav.uart_device
                );
            }
        }
    }

    let downstream = bus.subscribe(Channel::Downstream, "nav.command");

    loop {
        match downstream.recv() {
            Ok(Message::NavCommand(cmd)) => {
                let line = format_command(cmd.direction, &config.nav.commands);
                if let Some(port) = writer.as_mut() {
                    if let Err(e) = port.write_all(line.as_bytes()) {
                        tracing::warn!("uart write failed: {e}");
                    } else {
                        let _ = port.flush();
                        tracing::info!(tx = line.trim(), "uart tx");
                    }
                } else {
                    tracing::info!(tx = line.trim(), "uart tx (simulated)");
                }
            }
            Ok(_) => {}
            Err(_) => {
                tracing::error!("downstream bus channel disconnected, shutting down");
                return Ok(());
            }
        }
    }
}
