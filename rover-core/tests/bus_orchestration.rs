//! Drives the phase FSM across real bus threads (not just direct calls) to
//! check the wire-level downstream sequence for the happy-path and
//! empty-transcription scenarios.

use std::thread;
use std::time::{Duration, Instant};

use rover_core::bus::payload::{
    Direction, LlmResponse, LlmResponseJson, Message, SttTranscription, TtsSpeak, WakeWordDetected,
    Durations,
};
use rover_core::{Bus, Channel, Event, Fsm, FsmConfig, Phase};

fn config() -> FsmConfig {
    FsmConfig {
        stt_timeout_s: 5.0,
        error_recovery_s: 5.0,
        auto_trigger_enabled: false,
        auto_trigger_interval: 60.0,
        min_confidence: 0.4,
    }
}

fn classify(msg: &Message, min_confidence: f32) -> Option<Event> {
    match msg {
        Message::WwDetected(hit) => Some(Event::Wakeword {
            keyword: hit.keyword.clone(),
            variant: hit.variant.clone(),
            confidence: hit.confidence,
        }),
        Message::SttTranscription(t) => {
            if t.text.trim().is_empty() {
                Some(Event::SttInvalid(rover_core::fsm::SttInvalidReason::Empty))
            } else if t.confidence < min_confidence {
                Some(Event::SttInvalid(rover_core::fsm::SttInvalidReason::LowConfidence))
            } else {
                Some(Event::SttValid { text: t.text.clone() })
            }
        }
        Message::LlmResponse(r) => {
            if r.json.speak.trim().is_empty() {
                Some(Event::LlmNoSpeech { direction: r.json.direction })
            } else {
                Some(Event::LlmWithSpeech { speak: r.json.speak.clone(), direction: r.json.direction })
            }
        }
        Message::TtsSpeak(t) if t.done == Some(true) && t.notification != Some(true) => Some(Event::TtsDone),
        _ => None,
    }
}

fn publish_display_state(bus: &Bus, phase: Phase) {
    let msg = rover_core::display::project(phase, 0);
    bus.publish(Channel::Downstream, Message::DisplayState(msg));
}

/// Mirrors `rover-orchestratord`'s main loop closely enough to exercise the
/// same `display.state`-before-other-effects ordering on real bus threads.
fn spawn_orchestrator(bus: std::sync::Arc<Bus>) -> thread::JoinHandle<()> {
    let upstream = bus.subscribe(Channel::Upstream, "");
    thread::spawn(move || {
        let mut fsm = Fsm::new(config(), Instant::now());
        publish_display_state(&bus, fsm.phase());
        while let Ok(msg) = upstream.recv_timeout(Duration::from_millis(300)) {
            if let Some(event) = classify(&msg, 0.4) {
                let before = fsm.phase();
                let effects = fsm.handle(event, Instant::now());
                if fsm.phase() != before {
                    publish_display_state(&bus, fsm.phase());
                }
                for (channel, out) in effects {
                    bus.publish(channel, out);
                }
            }
        }
    })
}

#[test]
fn happy_path_produces_expected_downstream_topic_sequence() {
    let bus = Bus::new();
    let downstream = bus.subscribe(Channel::Downstream, "");
    let handle = spawn_orchestrator(bus.clone());

    bus.publish(
        Channel::Upstream,
        Message::WwDetected(WakeWordDetected {
            timestamp: 0,
            keyword: "hey robo".into(),
            variant: "default".into(),
            confidence: 0.95,
            source: "onboard".into(),
        }),
    );
    bus.publish(
        Channel::Upstream,
        Message::SttTranscription(SttTranscription {
            timestamp: 0,
            text: "move forward".into(),
            confidence: 0.9,
            language: "en".into(),
            durations_ms: Durations::default(),
            kind: "final".into(),
        }),
    );
    bus.publish(
        Channel::Upstream,
        Message::LlmResponse(LlmResponse {
            ok: true,
            json: LlmResponseJson {
                speak: "moving forward".into(),
                direction: Some(Direction::Forward),
                track: String::new(),
            },
            raw: String::new(),
        }),
    );
    bus.publish(Channel::Upstream, Message::TtsSpeak(TtsSpeak { done: Some(true), ..Default::default() }));

    let mut topics = Vec::new();
    while let Ok(msg) = downstream.recv_timeout(Duration::from_millis(200)) {
        topics.push(msg.topic());
    }
    drop(bus);
    handle.join().unwrap();

    assert_eq!(
        topics,
        vec![
            "display.state", // startup announcement, IDLE
            "display.state", // -> LISTENING
            "cmd.pause.vision",
            "cmd.listen.start",
            "display.state", // -> THINKING
            "cmd.listen.stop",
            "llm.request",
            "display.state", // -> SPEAKING
            "nav.command",
            "cmd.tts.speak",
            "display.state", // -> IDLE
            "cmd.pause.vision",
        ]
    );
}

#[test]
fn empty_transcription_skips_llm_request() {
    let bus = Bus::new();
    let downstream = bus.subscribe(Channel::Downstream, "");
    let handle = spawn_orchestrator(bus.clone());

    bus.publish(
        Channel::Upstream,
        Message::WwDetected(WakeWordDetected {
            timestamp: 0,
            keyword: "hey robo".into(),
            variant: "default".into(),
            confidence: 0.95,
            source: "onboard".into(),
        }),
    );
    bus.publish(
        Channel::Upstream,
        Message::SttTranscription(SttTranscription {
            timestamp: 0,
            text: "".into(),
            confidence: 0.0,
            language: "en".into(),
            durations_ms: Durations::default(),
            kind: "final".into(),
        }),
    );

    let mut topics = Vec::new();
    while let Ok(msg) = downstream.recv_timeout(Duration::from_millis(200)) {
        topics.push(msg.topic());
    }
    drop(bus);
    handle.join().unwrap();

    assert!(!topics.contains(&"llm.request"));
    assert!(topics.contains(&"cmd.listen.stop"));
    assert!(topics.contains(&"cmd.tts.speak"));

    // display.state for IDLE->LISTENING->IDLE must each precede the effects
    // of their own transition, not trail them.
    let listen_transition = topics.iter().position(|t| *t == "cmd.listen.start").unwrap();
    let display_before_listen = topics[..listen_transition].iter().filter(|t| **t == "display.state").count();
    assert_eq!(display_before_listen, 2, "display.state for startup and LISTENING must precede cmd.listen.start");

    let stop_transition = topics.iter().position(|t| *t == "cmd.listen.stop").unwrap();
    assert_eq!(topics[stop_transition - 1], "display.state", "display.state for the stt_invalid transition must precede cmd.listen.stop");
}
