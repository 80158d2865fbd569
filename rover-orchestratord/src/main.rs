//! Orchestrator binary (C7 + C8): owns the `Bus`, classifies upstream bus
//! traffic into FSM events, drives `Fsm::handle`/`check_timers`, and
//! publishes the `display.state` projection after every phase change.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rover_core::bus::payload::{EspPayload, Message};
use rover_core::config::RoverConfig;
use rover_core::fsm::{Event, Fsm, FsmConfig, Phase, SttInvalidReason};
use rover_core::{Bus, Channel};

/// The only alert string the firmware's `STATUS`/`DATA` lines carry that the
/// FSM cares about; everything else in those lines is sensor-only context.
fn esp_alert(payload: &EspPayload) -> Option<&str> {
    match payload {
        EspPayload::Status { status_raw } if status_raw.contains("COLLISION") => Some("COLLISION"),
        EspPayload::Data { data_raw } if data_raw.contains("COLLISION") => Some("COLLISION"),
        _ => None,
    }
}

const POLL_TIMEOUT: Duration = Duration::from_millis(100);

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Maps upstream wire traffic to the FSM's internal event vocabulary. A
/// `ww.detected` whose `source` is `"remote"` is the remote adapter's
/// converted intent and plays the role of `manual_trigger` in the
/// transition table — both land on an identical IDLE→LISTENING row, so
/// classifying them into distinct `Event` variants only matters for the
/// transition log, not the side effects.
fn classify(msg: &Message, min_confidence: f32) -> Option<Event> {
    match msg {
        Message::WwDetected(hit) if hit.source == "remote" => Some(Event::ManualTrigger),
        Message::WwDetected(hit) => Some(Event::Wakeword {
            keyword: hit.keyword.clone(),
            variant: hit.variant.clone(),
            confidence: hit.confidence,
        }),
        Message::SttTranscription(t) => {
            if t.text.trim().is_empty() {
                Some(Event::SttInvalid(SttInvalidReason::Empty))
            } else if t.confidence < min_confidence {
                Some(Event::SttInvalid(SttInvalidReason::LowConfidence))
            } else {
                Some(Event::SttValid { text: t.text.clone() })
            }
        }
        Message::LlmResponse(r) => {
            let speak = r.json.speak.trim();
            if speak.is_empty() {
                Some(Event::LlmNoSpeech { direction: r.json.direction })
            } else {
                Some(Event::LlmWithSpeech {
                    speak: speak.to_string(),
                    direction: r.json.direction,
                })
            }
        }
        Message::TtsSpeak(t) if t.done == Some(true) && t.notification != Some(true) => Some(Event::TtsDone),
        Message::SystemHealth(h) => {
            if h.ok {
                Some(Event::HealthOk)
            } else {
                Some(Event::HealthError {
                    component: h.component.clone(),
                    detail: h.detail.clone(),
                })
            }
        }
        _ => None,
    }
}

fn publish_effects(bus: &Bus, effects: Vec<(Channel, Message)>) {
    for (channel, msg) in effects {
        bus.publish(channel, msg);
    }
}

fn publish_display_state(bus: &Bus, phase: Phase) {
    let msg = rover_core::display::project(phase, now_millis());
    bus.publish(Channel::Downstream, Message::DisplayState(msg));
}

fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("ROVER_CONFIG").unwrap_or_else(|_| {
            RoverConfig::default_config_path().to_string_lossy().into_owned()
        });
    let log_dir = std::env::var("ROVER_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let _guard = rover_core::logging::init("rover-orchestratord", &log_dir, "rover_orchestratord=info");

    let config = match RoverConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("failed to load {config_path}: {e}; using defaults");
            RoverConfig::default()
        }
    };

    let bus: Arc<Bus> = Bus::serve(&config.ipc)?;
    let upstream = bus.subscribe(Channel::Upstream, "");

    let fsm_config = FsmConfig {
        stt_timeout_s: config.stt.timeout_seconds,
        error_recovery_s: config.orchestrator.error_recovery_s,
        auto_trigger_enabled: config.orchestrator.auto_trigger_enabled,
        auto_trigger_interval: config.orchestrator.auto_trigger_interval,
        min_confidence: config.stt.min_confidence,
    };
    let mut fsm = Fsm::new(fsm_config, Instant::now());
    tracing::info!(phase = ?fsm.phase(), "orchestrator started");
    publish_display_state(&bus, fsm.phase());

    loop {
        match upstream.recv_timeout(POLL_TIMEOUT) {
            Ok(msg) => {
                if let Message::Esp32Raw(payload) = &msg {
                    // Context-only; never drives a transition directly, but a
                    // collision alert is logged for operator visibility.
                    fsm.apply_esp_telemetry(esp_alert(payload));
                }
                if let Message::VisnObject(v) = &msg {
                    let before = fsm.phase();
                    let effects = fsm.handle_vision_captured(v.label.clone(), v.confidence, Instant::now());
                    if fsm.phase() != before {
                        publish_display_state(&bus, fsm.phase());
                    }
                    if !effects.is_empty() {
                        publish_effects(&bus, effects);
                    }
                    continue;
                }
                if let Some(event) = classify(&msg, config.stt.min_confidence) {
                    let before = fsm.phase();
                    let effects = fsm.handle(event, Instant::now());
                    if fsm.phase() != before {
                        publish_display_state(&bus, fsm.phase());
                    }
                    publish_effects(&bus, effects);
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                tracing::error!("upstream bus channel disconnected, shutting down");
                return Ok(());
            }
        }

        let before = fsm.phase();
        let effects = fsm.check_timers(Instant::now());
        if fsm.phase() != before {
            publish_display_state(&bus, fsm.phase());
        }
        if !effects.is_empty() {
            publish_effects(&bus, effects);
        }
    }
}
