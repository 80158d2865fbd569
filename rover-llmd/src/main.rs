//! LLM adapter binary: consumes `llm.request`, enriches it with bounded
//! conversation memory and a robot-state snapshot, and publishes
//! `llm.response {ok, json:{speak,direction,track}, raw}`. Direction is
//! always normalized to the allowed enum before it reaches the bus.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use rover_core::bus::payload::{EspPayload, LlmResponse, LlmResponseJson, Message, VisnObject};
use rover_core::config::RoverConfig;
use rover_core::memory::{ConversationMemory, LlmBackend, RuleBasedLlmBackend, VisionDetection};
use rover_core::{Bus, Channel};

fn handle_request(
    memory: &Mutex<ConversationMemory>,
    backend: &Mutex<Box<dyn LlmBackend>>,
    text: &str,
) -> LlmResponse {
    let now = Instant::now();
    let mut mem = memory.lock();
    mem.add_user_message(text, now);
    let context = mem.build_context(now);
    drop(mem);

    let reply = backend.lock().respond(&context, text);

    let mut mem = memory.lock();
    if !reply.speak.is_empty() {
        mem.add_assistant_message(&reply.speak, now);
    }
    if let Some(direction) = reply.direction {
        mem.robot_state.direction = direction;
    }
    drop(mem);

    LlmResponse {
        ok: true,
        json: LlmResponseJson {
            speak: reply.speak.clone(),
            direction: reply.direction,
            track: reply.track.clone(),
        },
        raw: reply.speak,
    }
}

fn esp_alert(payload: &EspPayload) -> Option<String> {
    match payload {
        EspPayload::Status { status_raw } if status_raw.contains("COLLISION") => Some("COLLISION".to_string()),
        EspPayload::Data { data_raw } if data_raw.contains("COLLISION") => Some("COLLISION".to_string()),
        _ => None,
    }
}

fn failure_response() -> LlmResponse {
    LlmResponse {
        ok: false,
        json: LlmResponseJson {
            speak: String::new(),
            direction: Some(rover_core::bus::payload::Direction::Stop),
            track: String::new(),
        },
        raw: String::new(),
    }
}

fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("ROVER_CONFIG").unwrap_or_else(|_| {
            RoverConfig::default_config_path().to_string_lossy().into_owned()
        });
    let log_dir = std::env::var("ROVER_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let _guard = rover_core::logging::init("rover-llmd", &log_dir, "rover_llmd=info");

    let config = match RoverConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("failed to load {config_path}: {e}; using defaults");
            RoverConfig::default()
        }
    };

    let bus = Bus::connect(&config.ipc)?;
    let memory = Arc::new(Mutex::new(ConversationMemory::new(
        config.llm.max_conversation_turns,
        Duration::from_secs_f32(config.llm.conversation_timeout_s),
    )));
    let backend: Arc<Mutex<Box<dyn LlmBackend>>> = Arc::new(Mutex::new(Box::new(RuleBasedLlmBackend)));

    // Vision detections keep the robot-state snapshot fresh so the 30-second
    // staleness rule has something real to measure against.
    {
        let memory = Arc::clone(&memory);
        let vision_upstream = bus.subscribe(Channel::Upstream, "visn.object");
        std::thread::spawn(move || {
            while let Ok(Message::VisnObject(VisnObject { label, confidence, .. })) =
                vision_upstream.recv()
            {
                memory.lock().robot_state.last_detection = Some(VisionDetection {
                    label,
                    confidence,
                    detected_at: Instant::now(),
                });
            }
        });
    }

    // ESP32 collision alerts keep the robot-state snapshot current, same
    // pattern as the vision subscription above.
    {
        let memory = Arc::clone(&memory);
        let esp_upstream = bus.subscribe(Channel::Upstream, "esp32.raw");
        std::thread::spawn(move || {
            while let Ok(Message::Esp32Raw(payload)) = esp_upstream.recv() {
                memory.lock().robot_state.esp_alert = esp_alert(&payload);
            }
        });
    }

    let downstream = bus.subscribe(Channel::Downstream, "llm.request");
    loop {
        match downstream.recv() {
            Ok(Message::LlmRequest(req)) => {
                let response = if req.text.trim().is_empty() {
                    tracing::warn!("llm.request with empty text; returning failure response");
                    failure_response()
                } else {
                    handle_request(&memory, &backend, &req.text)
                };
                tracing::info!(ok = response.ok, speak = %response.json.speak, "llm response");
                bus.publish(Channel::Upstream, Message::LlmResponse(response));
            }
            Ok(_) => {}
            Err(_) => {
                tracing::error!("downstream bus channel disconnected, shutting down");
                return Ok(());
            }
        }
    }
}
