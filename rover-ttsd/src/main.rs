//! Text-to-speech adapter binary: consumes `cmd.tts.speak`/`tts.speak`
//! requests, "speaks" them, and publishes `tts.speak {done:true}` on
//! completion. Synthesis and playback hardware are out of scope here; the
//! adapter models them as a sleep proportional to the text length so the
//! bus contract and preemption behavior are real even without an engine.
//!
//! Speaker ownership is single-writer by construction: one thread drains
//! one queue. A `cmd.listen.start` arriving mid-speech preempts whatever is
//! queued, matching the wake-word interrupt contract.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rover_core::bus::payload::{CmdListenStart, Message, TtsSpeak};
use rover_core::config::RoverConfig;
use rover_core::{Bus, Channel};

const MS_PER_CHAR: u64 = 60;
const MIN_SPEAK_MS: u64 = 300;
const POLL_STEP: Duration = Duration::from_millis(50);

fn speak(text: &str, interrupted: &AtomicBool) -> bool {
    let total_ms = (text.len() as u64 * MS_PER_CHAR).max(MIN_SPEAK_MS);
    let mut elapsed = Duration::ZERO;
    let total = Duration::from_millis(total_ms);
    while elapsed < total {
        if interrupted.swap(false, Ordering::SeqCst) {
            tracing::info!("speech preempted by cmd.listen.start");
            return false;
        }
        let step = POLL_STEP.min(total - elapsed);
        std::thread::sleep(step);
        elapsed += step;
    }
    true
}

fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("ROVER_CONFIG").unwrap_or_else(|_| {
            RoverConfig::default_config_path().to_string_lossy().into_owned()
        });
    let log_dir = std::env::var("ROVER_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let _guard = rover_core::logging::init("rover-ttsd", &log_dir, "rover_ttsd=info");

    let config = match RoverConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("failed to load {config_path}: {e}; using defaults");
            RoverConfig::default()
        }
    };

    let bus = Bus::connect(&config.ipc)?;
    let interrupted = Arc::new(AtomicBool::new(false));

    {
        let interrupted = Arc::clone(&interrupted);
        let preempt_rx = bus.subscribe(Channel::Downstream, "cmd.listen.start");
        std::thread::spawn(move || {
            while let Ok(Message::CmdListenStart(CmdListenStart { start: true })) =
                preempt_rx.recv()
            {
                interrupted.store(true, Ordering::SeqCst);
            }
        });
    }

    let downstream = bus.subscribe(Channel::Downstream, "cmd.tts.speak");
    loop {
        match downstream.recv() {
            Ok(Message::CmdTtsSpeak(TtsSpeak { text: Some(text), notification, .. })) => {
                interrupted.store(false, Ordering::SeqCst);
                tracing::info!(notification = notification.unwrap_or(false), "speaking: {text}");
                let completed = speak(&text, &interrupted);
                if completed {
                    bus.publish(
                        Channel::Upstream,
                        Message::TtsSpeak(TtsSpeak {
                            text: None,
                            notification,
                            done: Some(true),
                        }),
                    );
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
