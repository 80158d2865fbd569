//! # rover-core
//!
//! Shared coordination primitives for the voice-and-vision controlled
//! robotic car: the multi-reader audio ring buffer, the in-process message
//! bus and its wire payloads, the phase FSM, wake-word and speech-capture
//! building blocks, configuration, and logging setup. Each binary crate in
//! the workspace links this and wires the pieces it needs around its own
//! bus boundary.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → RingBuffer ──┬─→ WakeWordDetector → ww.detected
//!                                           └─→ AudioSession (STT capture) → stt.transcription
//!
//! Bus (Upstream: workers → orchestrator, Downstream: orchestrator → workers)
//!                                           │
//!                                          Fsm::handle
//!                                           │
//!                                   display::project → display.state
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod bus;
pub mod config;
pub mod display;
pub mod error;
pub mod fsm;
pub mod logging;
pub mod memory;
pub mod motor;
pub mod ring_buffer;
pub mod stt;
pub mod wakeword;

pub use bus::{Bus, Channel};
pub use config::RoverConfig;
pub use error::{Result, RoverError};
pub use fsm::{Event, Fsm, FsmConfig, Phase};
pub use ring_buffer::{ReadOutcome, ReaderId, RingBuffer};

#[cfg(feature = "onnx")]
pub use wakeword::onnx::OnnxWakeWordDetector;
