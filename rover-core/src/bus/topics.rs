//! Topic string constants. Mirrors the original system's topic byte strings
//! 1:1 so external adapters speaking the same wire protocol need no mapping.

pub const WW_DETECTED: &str = "ww.detected";
pub const STT_TRANSCRIPTION: &str = "stt.transcription";
pub const LLM_REQUEST: &str = "llm.request";
pub const LLM_RESPONSE: &str = "llm.response";
pub const TTS_SPEAK: &str = "tts.speak";
pub const CMD_TTS_SPEAK: &str = "cmd.tts.speak";
pub const VISN_OBJECT: &str = "visn.object";
pub const NAV_COMMAND: &str = "nav.command";
pub const CMD_PAUSE_VISION: &str = "cmd.pause.vision";
pub const CMD_VISN_CAPTURE: &str = "cmd.visn.capture";
pub const ESP32_RAW: &str = "esp32.raw";
pub const SYSTEM_HEALTH: &str = "system.health";
pub const CMD_LISTEN_START: &str = "cmd.listen.start";
pub const CMD_LISTEN_STOP: &str = "cmd.listen.stop";
pub const DISPLAY_STATE: &str = "display.state";
