//! Vision adapter binary: runs a pausable detection loop and answers
//! one-shot capture requests, both publishing `visn.object`. Actual object
//! detection inference is out of scope for the coordination spine; this
//! emits a deterministic placeholder detection, the same boundary the STT
//! and LLM adapters use for their own out-of-scope model calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rover_core::bus::payload::{CmdPauseVision, CmdVisnCapture, Message, VisnObject};
use rover_core::config::RoverConfig;
use rover_core::{Bus, Channel};

const DETECTION_INTERVAL: Duration = Duration::from_millis(500);

fn now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn placeholder_detection(request_id: Option<String>) -> VisnObject {
    VisnObject {
        label: "none".to_string(),
        bbox: [0.0, 0.0, 0.0, 0.0],
        confidence: 0.0,
        ts: now_ts(),
        request_id,
    }
}

fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("ROVER_CONFIG").unwrap_or_else(|_| {
            RoverConfig::default_config_path().to_string_lossy().into_owned()
        });
    let log_dir = std::env::var("ROVER_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let _guard = rover_core::logging::init("rover-visiond", &log_dir, "rover_visiond=info");

    let config = match RoverConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("failed to load {config_path}: {e}; using defaults");
            RoverConfig::default()
        }
    };

    let bus = Bus::connect(&config.ipc)?;
    let paused = Arc::new(AtomicBool::new(false));

    {
        let paused = Arc::clone(&paused);
        let pause_rx = bus.subscribe(Channel::Downstream, "cmd.pause.vision");
        std::thread::spawn(move || {
            while let Ok(Message::CmdPauseVision(CmdPauseVision { pause })) = pause_rx.recv() {
                paused.store(pause, Ordering::SeqCst);
                tracing::debug!(pause, "vision pause state updated");
            }
        });
    }

    {
        let bus = Arc::clone(&bus);
        let capture_rx = bus.subscribe(Channel::Downstream, "cmd.visn.capture");
        std::thread::spawn(move || {
            while let Ok(Message::CmdVisnCapture(CmdVisnCapture { request_id })) =
                capture_rx.recv()
            {
                tracing::info!(request_id = %request_id, "one-shot vision capture requested");
                bus.publish(
                    Channel::Upstream,
                    Message::VisnObject(placeholder_detection(Some(request_id))),
                );
            }
        });
    }

    loop {
        std::thread::sleep(DETECTION_INTERVAL);
        if paused.load(Ordering::SeqCst) {
            continue;
        }
        bus.publish(Channel::Upstream, Message::VisnObject(placeholder_detection(None)));
    }
}
