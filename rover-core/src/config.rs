//! Configuration document loading: a single TOML file plus environment
//! overrides for bus endpoints and credentials.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, RoverError};

const APP_NAME: &str = "roverd";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    pub upstream: String,
    pub downstream: String,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            upstream: "tcp://127.0.0.1:6010".into(),
            downstream: "tcp://127.0.0.1:6011".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub hw_sample_rate: u32,
    pub target_sample_rate: u32,
    pub chunk_ms: u32,
    pub buffer_seconds: f32,
    pub preferred_device_substring: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            hw_sample_rate: 48_000,
            target_sample_rate: 16_000,
            chunk_ms: 30,
            buffer_seconds: 10.0,
            preferred_device_substring: Some("USB".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakewordConfig {
    pub sensitivity: f32,
    pub model_path: Option<String>,
    pub access_key: Option<String>,
    pub payload_keyword: String,
    pub payload_variant: String,
}

impl Default for WakewordConfig {
    fn default() -> Self {
        Self {
            sensitivity: 0.5,
            model_path: None,
            access_key: None,
            payload_keyword: "hey robo".into(),
            payload_variant: "default".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    pub min_confidence: f32,
    pub silence_threshold: f32,
    pub silence_duration_ms: u32,
    pub max_capture_seconds: f32,
    pub min_capture_seconds: f32,
    pub timeout_seconds: f32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.4,
            silence_threshold: 0.25,
            silence_duration_ms: 800,
            max_capture_seconds: 12.0,
            min_capture_seconds: 0.6,
            timeout_seconds: 15.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub auto_trigger_enabled: bool,
    pub auto_trigger_interval: f32,
    pub error_recovery_s: f32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            auto_trigger_enabled: false,
            auto_trigger_interval: 60.0,
            error_recovery_s: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    pub uart_device: String,
    pub baud_rate: u32,
    pub timeout_seconds: f32,
    pub commands: std::collections::HashMap<String, String>,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            uart_device: "/dev/ttyAMA0".into(),
            baud_rate: 115_200,
            timeout_seconds: 1.0,
            commands: std::collections::HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub max_conversation_turns: usize,
    pub conversation_timeout_s: f32,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            max_conversation_turns: 10,
            conversation_timeout_s: 120.0,
            api_base: None,
            api_key: None,
            model: "local".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub listen_addr: String,
    pub allow_public: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8088".into(),
            allow_public: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RoverConfig {
    pub ipc: IpcConfig,
    pub audio: AudioConfig,
    pub wakeword: WakewordConfig,
    pub stt: SttConfig,
    pub orchestrator: OrchestratorConfig,
    pub nav: NavConfig,
    pub llm: LlmConfig,
    pub remote: RemoteConfig,
}

impl RoverConfig {
    /// The platform config directory's `system.toml`, the fallback callers
    /// use when `ROVER_CONFIG` isn't set — `dirs::config_dir()/roverd/
    /// system.toml`, the same layout `AppPaths` resolves settings at.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME)
            .join("system.toml")
    }

    /// Load from a TOML file, then apply `IPC_*` and `*_ACCESS_KEY`/`*_API_KEY`
    /// environment overrides. Missing file is a config error, not a silent
    /// default — callers that want defaults should use `RoverConfig::default()`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RoverError::Config(format!("reading {}: {e}", path.display())))?;
        let mut cfg: RoverConfig = toml::from_str(&text)
            .map_err(|e| RoverError::Config(format!("parsing {}: {e}", path.display())))?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("IPC_UPSTREAM") {
            self.ipc.upstream = v;
        }
        if let Ok(v) = std::env::var("IPC_DOWNSTREAM") {
            self.ipc.downstream = v;
        }
        if let Ok(v) = std::env::var("WAKEWORD_ACCESS_KEY") {
            self.wakeword.access_key = Some(v);
        }
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RoverConfig::default();
        assert_eq!(cfg.audio.chunk_ms, 30);
        assert_eq!(cfg.stt.silence_threshold, 0.25);
        assert_eq!(cfg.orchestrator.error_recovery_s, 30.0);
    }

    #[test]
    fn default_config_path_ends_with_app_name_and_system_toml() {
        let path = RoverConfig::default_config_path();
        assert_eq!(path.file_name().unwrap(), "system.toml");
        assert_eq!(path.parent().unwrap().file_name().unwrap(), APP_NAME);
    }

    #[test]
    fn partial_toml_fills_remaining_fields_with_defaults() {
        let dir = std::env::temp_dir().join(format!("rover-cfg-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("system.toml");
        std::fs::write(&path, "[stt]\nmin_confidence = 0.7\n").unwrap();
        let cfg = RoverConfig::load(&path).unwrap();
        assert_eq!(cfg.stt.min_confidence, 0.7);
        assert_eq!(cfg.stt.silence_threshold, 0.25);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn env_override_wins_over_file() {
        let dir = std::env::temp_dir().join(format!("rover-cfg-test-env-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("system.toml");
        std::fs::write(&path, "[ipc]\nupstream = \"tcp://127.0.0.1:9999\"\n").unwrap();
        std::env::set_var("IPC_UPSTREAM", "tcp://10.0.0.5:6010");
        let cfg = RoverConfig::load(&path).unwrap();
        assert_eq!(cfg.ipc.upstream, "tcp://10.0.0.5:6010");
        std::env::remove_var("IPC_UPSTREAM");
        std::fs::remove_dir_all(&dir).ok();
    }
}
