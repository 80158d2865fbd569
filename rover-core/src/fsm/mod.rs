//! Phase FSM (C7) — the single source of truth for orchestrator behavior.
//!
//! `Fsm::handle` is the only way `Phase` changes. Every transition is a row
//! in the table transcribed from the coordination design; any `(phase,
//! event)` pair not in that table is logged at debug and leaves the phase
//! untouched. `Fsm::check_timers` applies the three wall-clock rules
//! (`stt_timeout_s`, `error_recovery_s`, `auto_trigger_interval`).

use std::time::{Duration, Instant};

use crate::bus::payload::{
    CmdListenStart, CmdListenStop, CmdPauseVision, CmdVisnCapture, Direction, LlmRequest,
    NavCommand, TtsSpeak,
};
use crate::bus::{Channel, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Listening,
    Thinking,
    Speaking,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SttInvalidReason {
    Empty,
    LowConfidence,
    Timeout,
}

impl SttInvalidReason {
    fn as_str(&self) -> &'static str {
        match self {
            SttInvalidReason::Empty => "empty",
            SttInvalidReason::LowConfidence => "low_confidence",
            SttInvalidReason::Timeout => "timeout",
        }
    }
}

/// Events as classified from raw bus traffic — see `classify` below for the
/// mapping from wire payloads to these variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Wakeword { keyword: String, variant: String, confidence: f32 },
    ManualTrigger,
    SttValid { text: String },
    SttInvalid(SttInvalidReason),
    LlmWithSpeech { speak: String, direction: Option<Direction> },
    LlmNoSpeech { direction: Option<Direction> },
    TtsDone,
    HealthError { component: String, detail: Option<String> },
    HealthOk,
}

#[derive(Debug, Clone)]
pub struct VisionRecord {
    pub label: String,
    pub confidence: f32,
    pub detected_at: Instant,
}

/// Auxiliary data that is *not* part of the state: phase transitions never
/// depend on these fields, only on `(current_phase, event_kind)`.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub phase_entered_at: Instant,
    pub last_interaction_at: Instant,
    pub last_transcript: String,
    pub last_vision: Option<VisionRecord>,
    pub last_nav_direction: Direction,
    pub vision_capture_pending: Option<String>,
    pub esp_alert: Option<String>,
}

impl PhaseContext {
    fn new(now: Instant) -> Self {
        Self {
            phase_entered_at: now,
            last_interaction_at: now,
            last_transcript: String::new(),
            last_vision: None,
            last_nav_direction: Direction::Stop,
            vision_capture_pending: None,
            esp_alert: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FsmConfig {
    pub stt_timeout_s: f32,
    pub error_recovery_s: f32,
    pub auto_trigger_enabled: bool,
    pub auto_trigger_interval: f32,
    pub min_confidence: f32,
}

/// Substrings that cause a valid transcript to request a vision capture
/// before the LLM request is sent — grounded in the original orchestrator's
/// `_should_request_vision` heuristic.
const VISION_TRIGGER_WORDS: &[&str] = &["see", "look", "describe", "what is", "what's"];

pub struct Fsm {
    phase: Phase,
    context: PhaseContext,
    config: FsmConfig,
    next_request_id: u64,
}

type Effects = Vec<(Channel, Message)>;

impl Fsm {
    pub fn new(config: FsmConfig, now: Instant) -> Self {
        Self {
            phase: Phase::Idle,
            context: PhaseContext::new(now),
            config,
            next_request_id: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn context(&self) -> &PhaseContext {
        &self.context
    }

    fn transition_to(&mut self, next: Phase, now: Instant, event_name: &str) {
        tracing::info!(from = ?self.phase, to = ?next, event = event_name, "phase transition");
        self.phase = next;
        self.context.phase_entered_at = now;
        self.context.last_interaction_at = now;
    }

    fn pause_vision(pause: bool) -> (Channel, Message) {
        (
            Channel::Downstream,
            Message::CmdPauseVision(CmdPauseVision { pause }),
        )
    }

    fn listen_start() -> (Channel, Message) {
        (
            Channel::Downstream,
            Message::CmdListenStart(CmdListenStart { start: true }),
        )
    }

    fn listen_stop(reason: &str) -> (Channel, Message) {
        (
            Channel::Downstream,
            Message::CmdListenStop(CmdListenStop {
                stop: true,
                reason: Some(reason.to_string()),
            }),
        )
    }

    fn notification_speech(text: &str) -> (Channel, Message) {
        (
            Channel::Downstream,
            Message::CmdTtsSpeak(TtsSpeak {
                text: Some(text.to_string()),
                notification: Some(true),
                done: None,
            }),
        )
    }

    fn phase_speech(text: &str) -> (Channel, Message) {
        (
            Channel::Downstream,
            Message::CmdTtsSpeak(TtsSpeak {
                text: Some(text.to_string()),
                notification: Some(false),
                done: None,
            }),
        )
    }

    fn nav(direction: Direction) -> (Channel, Message) {
        (
            Channel::Downstream,
            Message::NavCommand(NavCommand {
                direction,
                speed: None,
                duration_ms: None,
                target: None,
            }),
        )
    }

    fn next_vision_request_id(&mut self) -> String {
        self.next_request_id += 1;
        format!("visn-{}", self.next_request_id)
    }

    /// Enter LISTENING from any phase, emitting both the interrupt cleanup
    /// (if capture was in flight) and the normal entry side effects. Wake
    /// word interrupts and the three IDLE→LISTENING causes all funnel here.
    fn enter_listening(&mut self, now: Instant, event_name: &str) -> Effects {
        let mut effects = Vec::new();
        if self.phase == Phase::Listening {
            effects.push(Self::listen_stop("interrupted"));
        }
        self.transition_to(Phase::Listening, now, event_name);
        effects.push(Self::pause_vision(true));
        effects.push(Self::listen_start());
        effects
    }

    /// Apply one classified event. Returns the outgoing bus messages caused
    /// by the transition, in emission order. Illegal events return no
    /// effects and do not mutate `phase`.
    pub fn handle(&mut self, event: Event, now: Instant) -> Effects {
        // Wake-word interrupt: fires from any non-IDLE phase regardless of
        // the per-phase table below.
        if let Event::Wakeword { .. } = &event {
            if self.phase != Phase::Idle && self.phase != Phase::Error {
                return self.enter_listening(now, "wakeword-interrupt");
            }
        }

        match (self.phase, event) {
            (Phase::Idle, Event::Wakeword { .. }) => self.enter_listening(now, "wakeword"),
            (Phase::Idle, Event::ManualTrigger) => self.enter_listening(now, "manual_trigger"),

            (Phase::Listening, Event::SttValid { text }) => {
                self.context.last_transcript = text.clone();
                self.transition_to(Phase::Thinking, now, "stt_valid");
                let mut effects = Vec::new();
                effects.push(Self::listen_stop("complete"));
                if wants_vision(&text) {
                    let request_id = self.next_vision_request_id();
                    self.context.vision_capture_pending = Some(request_id.clone());
                    effects.push((
                        Channel::Downstream,
                        Message::CmdVisnCapture(CmdVisnCapture { request_id }),
                    ));
                } else {
                    effects.push((
                        Channel::Downstream,
                        Message::LlmRequest(LlmRequest {
                            text,
                            vision: None,
                            direction: Some(direction_name(self.context.last_nav_direction)),
                        }),
                    ));
                }
                effects
            }

            (Phase::Listening, Event::SttInvalid(reason)) => {
                self.transition_to(Phase::Idle, now, "stt_invalid");
                vec![
                    Self::listen_stop(reason.as_str()),
                    Self::notification_speech(&stt_failure_message(&reason)),
                    Self::pause_vision(false),
                ]
            }

            (Phase::Thinking, Event::LlmWithSpeech { speak, direction }) => {
                self.transition_to(Phase::Speaking, now, "llm_with_speech");
                let mut effects = Vec::new();
                if let Some(dir) = direction {
                    if dir != Direction::Stop {
                        self.context.last_nav_direction = dir;
                        effects.push(Self::nav(dir));
                    }
                }
                effects.push(Self::phase_speech(&speak));
                effects
            }

            (Phase::Thinking, Event::LlmNoSpeech { direction }) => {
                self.transition_to(Phase::Idle, now, "llm_no_speech");
                let mut effects = Vec::new();
                if let Some(dir) = direction {
                    self.context.last_nav_direction = dir;
                    effects.push(Self::nav(dir));
                }
                effects.push(Self::pause_vision(false));
                effects
            }

            (Phase::Speaking, Event::TtsDone) => {
                self.transition_to(Phase::Idle, now, "tts_done");
                vec![Self::pause_vision(false)]
            }

            (phase, Event::HealthError { component, detail }) if phase != Phase::Error => {
                tracing::error!(component, detail = ?detail, "component reported unhealthy");
                self.transition_to(Phase::Error, now, "health_error");
                vec![]
            }

            (Phase::Error, Event::HealthOk) => {
                self.transition_to(Phase::Idle, now, "health_ok");
                vec![Self::pause_vision(false)]
            }

            (phase, event) => {
                tracing::debug!(?phase, ?event, "ignored event — no matching transition");
                vec![]
            }
        }
    }

    /// Called once per orchestrator loop turn to apply wall-clock rules.
    pub fn check_timers(&mut self, now: Instant) -> Effects {
        match self.phase {
            Phase::Listening => {
                let elapsed = now.duration_since(self.context.phase_entered_at);
                if elapsed >= Duration::from_secs_f32(self.config.stt_timeout_s) {
                    return self.handle(Event::SttInvalid(SttInvalidReason::Timeout), now);
                }
                vec![]
            }
            Phase::Error => {
                let elapsed = now.duration_since(self.context.phase_entered_at);
                if elapsed >= Duration::from_secs_f32(self.config.error_recovery_s) {
                    self.transition_to(Phase::Idle, now, "error_timeout");
                    return vec![Self::pause_vision(false)];
                }
                vec![]
            }
            Phase::Idle => {
                if self.config.auto_trigger_enabled {
                    let elapsed = now.duration_since(self.context.last_interaction_at);
                    if elapsed >= Duration::from_secs_f32(self.config.auto_trigger_interval) {
                        return self.enter_listening(now, "auto_trigger");
                    }
                }
                vec![]
            }
            _ => vec![],
        }
    }

    /// Resolve a deferred vision capture (supplemental to the base table —
    /// does not change phase, only unblocks the LLM request that `SttValid`
    /// postponed while waiting on `cmd.visn.capture`).
    pub fn handle_vision_captured(&mut self, label: String, confidence: f32, now: Instant) -> Effects {
        if self.phase != Phase::Thinking || self.context.vision_capture_pending.is_none() {
            return vec![];
        }
        self.context.vision_capture_pending = None;
        self.context.last_vision = Some(VisionRecord {
            label: label.clone(),
            confidence,
            detected_at: now,
        });
        vec![(
            Channel::Downstream,
            Message::LlmRequest(LlmRequest {
                text: self.context.last_transcript.clone(),
                vision: Some(serde_json::json!({ "label": label, "confidence": confidence })),
                direction: Some(direction_name(self.context.last_nav_direction)),
            }),
        )]
    }

    /// Context-only update — ESP32 sensor telemetry never drives a
    /// transition, it only refreshes what the LLM adapter can read.
    pub fn apply_esp_telemetry(&mut self, alert: Option<&str>) {
        if alert == Some("COLLISION") {
            tracing::error!("collision alert from esp32 telemetry");
        }
        self.context.esp_alert = alert.map(str::to_string);
    }
}

fn wants_vision(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    VISION_TRIGGER_WORDS.iter().any(|w| lowered.contains(w))
}

fn direction_name(direction: Direction) -> String {
    serde_json::to_value(direction)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "stop".to_string())
}

fn stt_failure_message(reason: &SttInvalidReason) -> String {
    match reason {
        SttInvalidReason::Empty => "Sorry, I didn't catch that.".to_string(),
        SttInvalidReason::LowConfidence => "I'm not sure I understood, could you repeat that?".to_string(),
        SttInvalidReason::Timeout => "I didn't hear anything.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FsmConfig {
        FsmConfig {
            stt_timeout_s: 15.0,
            error_recovery_s: 30.0,
            auto_trigger_enabled: false,
            auto_trigger_interval: 60.0,
            min_confidence: 0.4,
        }
    }

    fn has_topic(effects: &Effects, topic: &str) -> bool {
        effects.iter().any(|(_, m)| m.topic() == topic)
    }

    #[test]
    fn happy_path_with_movement() {
        let now = Instant::now();
        let mut fsm = Fsm::new(config(), now);

        let e1 = fsm.handle(
            Event::Wakeword { keyword: "hey robo".into(), variant: "default".into(), confidence: 0.95 },
            now,
        );
        assert_eq!(fsm.phase(), Phase::Listening);
        assert!(has_topic(&e1, "cmd.pause.vision"));
        assert!(has_topic(&e1, "cmd.listen.start"));

        let e2 = fsm.handle(Event::SttValid { text: "move forward".into() }, now);
        assert_eq!(fsm.phase(), Phase::Thinking);
        assert!(has_topic(&e2, "llm.request"));

        let e3 = fsm.handle(
            Event::LlmWithSpeech { speak: "moving forward".into(), direction: Some(Direction::Forward) },
            now,
        );
        assert_eq!(fsm.phase(), Phase::Speaking);
        assert!(has_topic(&e3, "nav.command"));
        assert!(has_topic(&e3, "cmd.tts.speak"));

        let e4 = fsm.handle(Event::TtsDone, now);
        assert_eq!(fsm.phase(), Phase::Idle);
        assert!(has_topic(&e4, "cmd.pause.vision"));
    }

    #[test]
    fn empty_transcription_returns_to_idle_without_llm_request() {
        let now = Instant::now();
        let mut fsm = Fsm::new(config(), now);
        fsm.handle(Event::Wakeword { keyword: "hey robo".into(), variant: "default".into(), confidence: 0.95 }, now);
        let effects = fsm.handle(Event::SttInvalid(SttInvalidReason::Empty), now);
        assert_eq!(fsm.phase(), Phase::Idle);
        assert!(!has_topic(&effects, "llm.request"));
        assert!(has_topic(&effects, "cmd.tts.speak"));
        assert!(has_topic(&effects, "cmd.pause.vision"));
    }

    #[test]
    fn stt_timeout_fires_after_configured_duration() {
        let now = Instant::now();
        let mut cfg = config();
        cfg.stt_timeout_s = 0.01;
        let mut fsm = Fsm::new(cfg, now);
        fsm.handle(Event::ManualTrigger, now);
        assert_eq!(fsm.phase(), Phase::Listening);
        let later = now + Duration::from_millis(50);
        let effects = fsm.check_timers(later);
        assert_eq!(fsm.phase(), Phase::Idle);
        assert!(has_topic(&effects, "cmd.listen.stop"));
    }

    #[test]
    fn wake_word_interrupt_during_speaking_returns_to_listening() {
        let now = Instant::now();
        let mut fsm = Fsm::new(config(), now);
        fsm.handle(Event::ManualTrigger, now);
        fsm.handle(Event::SttValid { text: "hello".into() }, now);
        fsm.handle(Event::LlmWithSpeech { speak: "hi".into(), direction: None }, now);
        assert_eq!(fsm.phase(), Phase::Speaking);

        let effects = fsm.handle(
            Event::Wakeword { keyword: "hey robo".into(), variant: "default".into(), confidence: 0.9 },
            now,
        );
        assert_eq!(fsm.phase(), Phase::Listening);
        assert!(has_topic(&effects, "cmd.listen.start"));
    }

    #[test]
    fn health_error_from_any_phase_enters_error_and_auto_recovers() {
        let now = Instant::now();
        let mut cfg = config();
        cfg.error_recovery_s = 0.01;
        let mut fsm = Fsm::new(cfg, now);
        fsm.handle(Event::HealthError { component: "audio".into(), detail: None }, now);
        assert_eq!(fsm.phase(), Phase::Error);
        let later = now + Duration::from_millis(50);
        let effects = fsm.check_timers(later);
        assert_eq!(fsm.phase(), Phase::Idle);
        assert!(has_topic(&effects, "cmd.pause.vision"));
    }

    #[test]
    fn wake_word_during_error_is_ignored_not_treated_as_interrupt() {
        let now = Instant::now();
        let mut fsm = Fsm::new(config(), now);
        fsm.handle(Event::HealthError { component: "audio".into(), detail: None }, now);
        assert_eq!(fsm.phase(), Phase::Error);
        let effects = fsm.handle(
            Event::Wakeword { keyword: "hey robo".into(), variant: "default".into(), confidence: 0.9 },
            now,
        );
        assert_eq!(fsm.phase(), Phase::Error);
        assert!(effects.is_empty());
    }

    #[test]
    fn esp_telemetry_alert_is_stored_for_later_reads() {
        let now = Instant::now();
        let mut fsm = Fsm::new(config(), now);
        assert_eq!(fsm.context().esp_alert, None);
        fsm.apply_esp_telemetry(Some("COLLISION"));
        assert_eq!(fsm.context().esp_alert.as_deref(), Some("COLLISION"));
        fsm.apply_esp_telemetry(None);
        assert_eq!(fsm.context().esp_alert, None);
    }

    #[test]
    fn illegal_event_does_not_mutate_phase() {
        let now = Instant::now();
        let mut fsm = Fsm::new(config(), now);
        let effects = fsm.handle(Event::TtsDone, now);
        assert_eq!(fsm.phase(), Phase::Idle);
        assert!(effects.is_empty());
    }

    #[test]
    fn vision_trigger_words_defer_llm_request_until_capture_resolves() {
        let now = Instant::now();
        let mut fsm = Fsm::new(config(), now);
        fsm.handle(Event::ManualTrigger, now);
        let effects = fsm.handle(Event::SttValid { text: "what do you see".into() }, now);
        assert!(!has_topic(&effects, "llm.request"));
        assert!(has_topic(&effects, "cmd.visn.capture"));
        let effects = fsm.handle_vision_captured("cup".into(), 0.8, now);
        assert!(has_topic(&effects, "llm.request"));
    }
}
