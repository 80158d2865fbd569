use thiserror::Error;

/// All errors produced by rover-core.
#[derive(Debug, Error)]
pub enum RoverError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("ring buffer chunk of {0} samples exceeds capacity {1}")]
    ChunkExceedsCapacity(usize, usize),

    #[error("unknown ring buffer reader")]
    UnknownReader,

    #[error("bus transport error: {0}")]
    Bus(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serial port error: {0}")]
    Serial(String),

    #[error("wake-word model error: {0}")]
    WakeWordModel(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RoverError>;
