//! Conversation memory (supplemental feature, owned by the LLM adapter):
//! a bounded turn buffer plus a robot-state snapshot, so a stateless LLM
//! call can be given local context the way the original system's
//! `ConversationMemory` assembled it.

use std::time::{Duration, Instant};

use crate::bus::payload::Direction;

const VISION_STALENESS: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct VisionDetection {
    pub label: String,
    pub confidence: f32,
    pub detected_at: Instant,
}

/// Snapshot of robot state injected into every LLM prompt. Detections older
/// than 30 seconds are dropped from the context, not just hidden — matching
/// the "stale vision context" edge case.
#[derive(Debug, Clone)]
pub struct RobotState {
    pub direction: Direction,
    pub tracking_target: Option<String>,
    pub last_detection: Option<VisionDetection>,
    /// Latest ESP32 collision/obstacle alert, mirrored here from `esp32.raw`
    /// traffic so a stateless LLM call can be told about it.
    pub esp_alert: Option<String>,
}

impl Default for RobotState {
    fn default() -> Self {
        Self {
            direction: Direction::Stop,
            tracking_target: None,
            last_detection: None,
            esp_alert: None,
        }
    }
}

impl RobotState {
    pub fn to_context_string(&self, now: Instant) -> String {
        let mut lines = vec![format!("Navigation: {}", direction_word(self.direction))];
        if let Some(target) = &self.tracking_target {
            lines.push(format!("Tracking: {target}"));
        }
        if let Some(det) = &self.last_detection {
            if now.duration_since(det.detected_at) < VISION_STALENESS {
                lines.push(format!(
                    "Vision: {} (confidence: {:.0}%)",
                    det.label,
                    det.confidence * 100.0
                ));
            }
        }
        if let Some(alert) = &self.esp_alert {
            lines.push(format!("Alert: {alert}"));
        }
        lines.join("\n")
    }
}

fn direction_word(direction: Direction) -> &'static str {
    match direction {
        Direction::Forward => "forward",
        Direction::Backward => "backward",
        Direction::Left => "left",
        Direction::Right => "right",
        Direction::Stop => "stopped",
        Direction::Scan => "scanning",
    }
}

/// Bounded conversation buffer for a stateless LLM backend. Once at 80% of
/// capacity the oldest half is folded into a running summary rather than
/// dropped outright.
pub struct ConversationMemory {
    max_turns: usize,
    conversation_timeout: Duration,
    turns: std::collections::VecDeque<Turn>,
    summary: String,
    last_interaction: Option<Instant>,
    pub robot_state: RobotState,
}

impl ConversationMemory {
    pub fn new(max_turns: usize, conversation_timeout: Duration) -> Self {
        Self {
            max_turns,
            conversation_timeout,
            turns: std::collections::VecDeque::new(),
            summary: String::new(),
            last_interaction: None,
            robot_state: RobotState::default(),
        }
    }

    pub fn add_user_message(&mut self, content: &str, now: Instant) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        if self.is_expired(now) {
            self.clear();
        }
        self.turns.push_back(Turn { role: Role::User, content: content.to_string() });
        self.last_interaction = Some(now);
        self.maybe_summarize();
    }

    pub fn add_assistant_message(&mut self, content: &str, now: Instant) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        self.turns.push_back(Turn { role: Role::Assistant, content: content.to_string() });
        self.last_interaction = Some(now);
        self.maybe_summarize();
    }

    fn maybe_summarize(&mut self) {
        let capacity = self.max_turns * 2;
        if self.turns.len() < (capacity * 4) / 5 {
            return;
        }
        let drop_count = self.turns.len() / 2;
        let mut parts = Vec::with_capacity(drop_count);
        for _ in 0..drop_count {
            if let Some(turn) = self.turns.pop_front() {
                let label = match turn.role {
                    Role::User => "User asked about",
                    Role::Assistant => "Assistant responded",
                };
                let snippet: String = turn.content.chars().take(50).collect();
                parts.push(format!("{label}: {snippet}..."));
            }
        }
        if self.summary.is_empty() {
            self.summary = parts.join(" ");
        } else {
            self.summary = format!("{} {}", self.summary, parts.join(" "));
        }
        if self.summary.len() > 500 {
            let start = self.summary.len() - 500;
            self.summary = self.summary[start..].to_string();
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        match self.last_interaction {
            Some(last) => now.duration_since(last) > self.conversation_timeout,
            None => false,
        }
    }

    fn clear(&mut self) {
        self.turns.clear();
        self.summary.clear();
    }

    /// Full prompt context: summary (if any) followed by the retained
    /// turns, then the robot-state snapshot.
    pub fn build_context(&self, now: Instant) -> String {
        let mut parts = Vec::new();
        if !self.summary.is_empty() {
            parts.push(format!("[Earlier context: {}]", self.summary));
        }
        for turn in &self.turns {
            let prefix = match turn.role {
                Role::User => "User",
                Role::Assistant => "ROBO",
            };
            parts.push(format!("{prefix}: {}", turn.content));
        }
        let conversation = if parts.is_empty() {
            "This is the start of the conversation.".to_string()
        } else {
            parts.join("\n")
        };
        format!("{}\n\n{}", self.robot_state.to_context_string(now), conversation)
    }
}

/// What the LLM adapter calls after assembling context. Real model
/// invocation (local or cloud) is out of scope for the coordination spine;
/// this boundary exists so the bus contract is exercised the same way
/// regardless of what eventually answers it.
pub trait LlmBackend: Send {
    fn respond(&mut self, context: &str, user_text: &str) -> LlmReply;
}

#[derive(Debug, Clone)]
pub struct LlmReply {
    pub speak: String,
    pub direction: Option<Direction>,
    pub track: String,
}

/// Keyword-driven stand-in: recognizes movement and look/describe intents
/// directly from the user's text, same trigger words as the transcript
/// pre-check in the phase FSM. Gives the bus contract a deterministic,
/// always-available backend without claiming to be a real model.
pub struct RuleBasedLlmBackend;

impl LlmBackend for RuleBasedLlmBackend {
    fn respond(&mut self, _context: &str, user_text: &str) -> LlmReply {
        let lower = user_text.to_lowercase();
        let (speak, direction) = if lower.contains("forward") || lower.contains("ahead") {
            ("moving forward".to_string(), Some(Direction::Forward))
        } else if lower.contains("back") || lower.contains("reverse") {
            ("moving backward".to_string(), Some(Direction::Backward))
        } else if lower.contains("left") {
            ("turning left".to_string(), Some(Direction::Left))
        } else if lower.contains("right") {
            ("turning right".to_string(), Some(Direction::Right))
        } else if lower.contains("stop") || lower.contains("halt") {
            ("stopping".to_string(), Some(Direction::Stop))
        } else {
            (String::new(), None)
        };
        LlmReply { speak, direction, track: String::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_vision_detection_is_excluded_from_context() {
        let mut state = RobotState::default();
        let now = Instant::now();
        state.last_detection = Some(VisionDetection {
            label: "person".into(),
            confidence: 0.9,
            detected_at: now - Duration::from_secs(45),
        });
        assert!(!state.to_context_string(now).contains("Vision:"));
    }

    #[test]
    fn fresh_vision_detection_is_included() {
        let mut state = RobotState::default();
        let now = Instant::now();
        state.last_detection = Some(VisionDetection {
            label: "person".into(),
            confidence: 0.9,
            detected_at: now - Duration::from_secs(5),
        });
        assert!(state.to_context_string(now).contains("Vision: person"));
    }

    #[test]
    fn buffer_summarizes_once_past_eighty_percent_capacity() {
        let mut mem = ConversationMemory::new(2, Duration::from_secs(120));
        let now = Instant::now();
        for i in 0..4 {
            mem.add_user_message(&format!("message {i}"), now);
        }
        assert!(!mem.summary.is_empty() || mem.turns.len() <= 4);
    }

    #[test]
    fn esp_alert_is_included_in_context_when_present() {
        let mut state = RobotState::default();
        let now = Instant::now();
        assert!(!state.to_context_string(now).contains("Alert:"));
        state.esp_alert = Some("COLLISION".into());
        assert!(state.to_context_string(now).contains("Alert: COLLISION"));
    }

    #[test]
    fn rule_based_backend_maps_movement_words_to_directions() {
        let mut backend = RuleBasedLlmBackend;
        let reply = backend.respond("", "please move forward");
        assert_eq!(reply.direction, Some(Direction::Forward));
        assert_eq!(reply.speak, "moving forward");

        let reply = backend.respond("", "what's your favorite color");
        assert_eq!(reply.direction, None);
        assert!(reply.speak.is_empty());
    }

    #[test]
    fn expired_conversation_clears_on_next_user_message() {
        let mut mem = ConversationMemory::new(5, Duration::from_millis(1));
        let now = Instant::now();
        mem.add_user_message("hello", now);
        let later = now + Duration::from_millis(50);
        mem.add_user_message("still there?", later);
        assert_eq!(mem.turns.len(), 1);
    }
}
