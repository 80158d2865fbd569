//! Wire payloads for every bus topic, plus the tagged sum type that ties a
//! topic string to its JSON shape. `Message` is internally tagged on
//! `"topic"`, so `serde_json::to_value(&msg)` produces exactly the
//! `(topic, payload-fields)` shape external adapters speak.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    /// Optional adapter extension — not part of the core transition table.
    Scan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayState {
    Idle,
    Listening,
    Thinking,
    Speaking,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeWordDetected {
    pub timestamp: i64,
    pub keyword: String,
    pub variant: String,
    pub confidence: f32,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Durations {
    pub capture: f64,
    pub engine: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttTranscription {
    pub timestamp: i64,
    pub text: String,
    pub confidence: f32,
    pub language: String,
    pub durations_ms: Durations,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponseJson {
    pub speak: String,
    pub direction: Option<Direction>,
    pub track: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub ok: bool,
    pub json: LlmResponseJson,
    pub raw: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub text: String,
    pub vision: Option<serde_json::Value>,
    pub direction: Option<String>,
}

/// Shared by `tts.speak`/`cmd.tts.speak`: a request carries `text` (and
/// optionally `notification`); a completion carries `done`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TtsSpeak {
    pub text: Option<String>,
    pub notification: Option<bool>,
    pub done: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisnObject {
    pub label: String,
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub ts: f64,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EspPayload {
    Ack { ack: String, status: String },
    Data { data_raw: String },
    Status { status_raw: String },
    Raw { raw: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub ok: bool,
    pub component: String,
    pub detail: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmdListenStart {
    pub start: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmdListenStop {
    pub stop: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmdPauseVision {
    pub pause: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmdVisnCapture {
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavCommand {
    pub direction: Direction,
    pub speed: Option<u8>,
    pub duration_ms: Option<u32>,
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayStateMsg {
    pub state: DisplayState,
    pub phase: String,
    pub timestamp: i64,
}

/// Every message that can cross the bus, tagged by its topic string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "topic")]
pub enum Message {
    #[serde(rename = "ww.detected")]
    WwDetected(WakeWordDetected),
    #[serde(rename = "stt.transcription")]
    SttTranscription(SttTranscription),
    #[serde(rename = "llm.request")]
    LlmRequest(LlmRequest),
    #[serde(rename = "llm.response")]
    LlmResponse(LlmResponse),
    #[serde(rename = "tts.speak")]
    TtsSpeak(TtsSpeak),
    #[serde(rename = "cmd.tts.speak")]
    CmdTtsSpeak(TtsSpeak),
    #[serde(rename = "visn.object")]
    VisnObject(VisnObject),
    #[serde(rename = "nav.command")]
    NavCommand(NavCommand),
    #[serde(rename = "cmd.pause.vision")]
    CmdPauseVision(CmdPauseVision),
    #[serde(rename = "cmd.visn.capture")]
    CmdVisnCapture(CmdVisnCapture),
    #[serde(rename = "esp32.raw")]
    Esp32Raw(EspPayload),
    #[serde(rename = "system.health")]
    SystemHealth(SystemHealth),
    #[serde(rename = "cmd.listen.start")]
    CmdListenStart(CmdListenStart),
    #[serde(rename = "cmd.listen.stop")]
    CmdListenStop(CmdListenStop),
    #[serde(rename = "display.state")]
    DisplayState(DisplayStateMsg),
}

impl Message {
    pub fn topic(&self) -> &'static str {
        match self {
            Message::WwDetected(_) => crate::bus::topics::WW_DETECTED,
            Message::SttTranscription(_) => crate::bus::topics::STT_TRANSCRIPTION,
            Message::LlmRequest(_) => crate::bus::topics::LLM_REQUEST,
            Message::LlmResponse(_) => crate::bus::topics::LLM_RESPONSE,
            Message::TtsSpeak(_) => crate::bus::topics::TTS_SPEAK,
            Message::CmdTtsSpeak(_) => crate::bus::topics::CMD_TTS_SPEAK,
            Message::VisnObject(_) => crate::bus::topics::VISN_OBJECT,
            Message::NavCommand(_) => crate::bus::topics::NAV_COMMAND,
            Message::CmdPauseVision(_) => crate::bus::topics::CMD_PAUSE_VISION,
            Message::CmdVisnCapture(_) => crate::bus::topics::CMD_VISN_CAPTURE,
            Message::Esp32Raw(_) => crate::bus::topics::ESP32_RAW,
            Message::SystemHealth(_) => crate::bus::topics::SYSTEM_HEALTH,
            Message::CmdListenStart(_) => crate::bus::topics::CMD_LISTEN_START,
            Message::CmdListenStop(_) => crate::bus::topics::CMD_LISTEN_STOP,
            Message::DisplayState(_) => crate::bus::topics::DISPLAY_STATE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_word_round_trips_with_topic_tag() {
        let msg = Message::WwDetected(WakeWordDetected {
            timestamp: 1,
            keyword: "hey robo".into(),
            variant: "default".into(),
            confidence: 0.95,
            source: "oww".into(),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["topic"], "ww.detected");
        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back.topic(), "ww.detected");
    }

    #[test]
    fn esp_payload_variants_are_untagged() {
        let ack = EspPayload::Ack {
            ack: "FORWARD".into(),
            status: "OK".into(),
        };
        let value = serde_json::to_value(&ack).unwrap();
        assert!(value.get("ack").is_some());
        let data = EspPayload::Data {
            data_raw: "S1:30,S2:40".into(),
        };
        let value = serde_json::to_value(&data).unwrap();
        assert!(value.get("data_raw").is_some());
    }

    #[test]
    fn display_state_serializes_lowercase() {
        let msg = DisplayStateMsg {
            state: DisplayState::Listening,
            phase: "LISTENING".into(),
            timestamp: 0,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["state"], "listening");
    }
}
