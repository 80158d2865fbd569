//! Remote supervision adapter binary: serves a read-only telemetry
//! snapshot over a minimal HTTP-like TCP listener restricted to private
//! network ranges, and converts a remote trigger intent into the same
//! `ww.detected` shape the onboard wake-word detector produces — tagged
//! `source:"remote"` so the orchestrator treats it as a manual trigger
//! rather than a real wake-word hit.
//!
//! No HTTP framework is part of this workspace's dependency stack, so the
//! listener speaks just enough HTTP/1.1 to serve one GET and one POST
//! route. The MJPEG video path and full web UI from the source system are
//! out of scope for the coordination spine.

use std::io::{BufRead, BufReader, Write};
use std::net::{IpAddr, Ipv4Addr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;

use rover_core::bus::payload::{DisplayStateMsg, EspPayload, Message, WakeWordDetected};
use rover_core::config::RoverConfig;
use rover_core::{Bus, Channel};

#[derive(Default, Serialize, Clone)]
struct Snapshot {
    phase: String,
    display_state: String,
    last_telemetry: Option<String>,
    updated_at: i64,
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

fn is_private(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4 == Ipv4Addr::UNSPECIFIED
        }
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
}

fn handle_connection(mut stream: TcpStream, snapshot: &Mutex<Snapshot>, bus: &Bus, allow_public: bool) {
    let peer = stream.peer_addr().map(|a| a.ip());
    if !allow_public {
        match peer {
            Ok(ip) if is_private(ip) => {}
            Ok(ip) => {
                tracing::warn!(%ip, "rejecting connection from non-private address");
                respond(&mut stream, "403 Forbidden", "{\"error\":\"private network only\"}");
                return;
            }
            Err(_) => return,
        }
    }

    let mut reader = BufReader::new(stream.try_clone().expect("clone tcp stream"));
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");

    match (method, path) {
        ("GET", "/snapshot") => {
            let body = serde_json::to_string(&*snapshot.lock()).unwrap_or_default();
            respond(&mut stream, "200 OK", &body);
        }
        ("POST", "/trigger") => {
            tracing::info!("remote trigger intent received");
            bus.publish(
                Channel::Upstream,
                Message::WwDetected(WakeWordDetected {
                    timestamp: now_millis(),
                    keyword: "remote".to_string(),
                    variant: "manual".to_string(),
                    confidence: 1.0,
                    source: "remote".to_string(),
                }),
            );
            respond(&mut stream, "200 OK", "{\"ok\":true}");
        }
        _ => respond(&mut stream, "404 Not Found", "{\"error\":\"not found\"}"),
    }
}

fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("ROVER_CONFIG").unwrap_or_else(|_| {
            RoverConfig::default_config_path().to_string_lossy().into_owned()
        });
    let log_dir = std::env::var("ROVER_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let _guard = rover_core::logging::init("rover-remoted", &log_dir, "rover_remoted=info");

    let config = match RoverConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("failed to load {config_path}: {e}; using defaults");
            RoverConfig::default()
        }
    };

    let bus = Bus::connect(&config.ipc)?;
    let snapshot = Arc::new(Mutex::new(Snapshot::default()));

    {
        let snapshot = Arc::clone(&snapshot);
        let display_rx = bus.subscribe(Channel::Downstream, "display.state");
        std::thread::spawn(move || {
            while let Ok(Message::DisplayState(DisplayStateMsg { state, phase, timestamp })) =
                display_rx.recv()
            {
                let mut snap = snapshot.lock();
                snap.phase = phase;
                snap.display_state = format!("{state:?}").to_lowercase();
                snap.updated_at = timestamp;
            }
        });
    }

    {
        let snapshot = Arc::clone(&snapshot);
        let telemetry_rx = bus.subscribe(Channel::Upstream, "esp32.raw");
        std::thread::spawn(move || {
            while let Ok(Message::Esp32Raw(payload)) = telemetry_rx.recv() {
                if let EspPayload::Data { data_raw } | EspPayload::Status { status_raw: data_raw } = payload {
                    snapshot.lock().last_telemetry = Some(data_raw);
                }
            }
        });
    }

    let listener = TcpListener::bind(&config.remote.listen_addr)?;
    tracing::info!(addr = %config.remote.listen_addr, "remote telemetry listener started");
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => handle_connection(stream, &snapshot, &bus, config.remote.allow_public),
            Err(e) => tracing::warn!("accept failed: {e}"),
        }
    }
    Ok(())
}
