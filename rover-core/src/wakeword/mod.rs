//! Continuous wake-word detection (C5). Runs for the lifetime of the audio
//! core process, regardless of the orchestrator's phase — a detection is
//! published whenever it fires, and the orchestrator decides what to do
//! with it (including treating one as an interrupt mid-SPEAKING).

#[cfg(feature = "onnx")]
pub mod onnx;

/// One wake-word detection event, ready to be wrapped in a bus message.
#[derive(Debug, Clone, PartialEq)]
pub struct WakeWordHit {
    pub keyword: String,
    pub variant: String,
    pub confidence: f32,
}

/// A pluggable wake-word classifier. Implementations consume fixed-length
/// frames (`frame_length()` samples of 16 kHz mono f32) and decide per-frame
/// whether a keyword fired.
pub trait WakeWordDetector: Send {
    fn frame_length(&self) -> usize;
    fn process(&mut self, frame: &[f32]) -> Option<WakeWordHit>;
    fn reset(&mut self);
}

/// Always-silent detector. Used when no model is configured and in tests —
/// keeps the consumer loop running without ever firing a false positive.
pub struct NullWakeWordDetector {
    frame_length: usize,
}

impl NullWakeWordDetector {
    pub fn new(frame_length: usize) -> Self {
        Self { frame_length }
    }
}

impl WakeWordDetector for NullWakeWordDetector {
    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn process(&mut self, _frame: &[f32]) -> Option<WakeWordHit> {
        None
    }

    fn reset(&mut self) {}
}

/// A test/bench detector that fires once a configured number of frames
/// carried RMS energy above a threshold — not a real acoustic model, just
/// enough signal to drive the consumer loop and orchestrator tests without
/// an ONNX model file on disk.
pub struct EnergyTriggerDetector {
    frame_length: usize,
    threshold: f32,
    keyword: String,
    variant: String,
    armed: bool,
}

impl EnergyTriggerDetector {
    pub fn new(frame_length: usize, threshold: f32, keyword: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            frame_length,
            threshold,
            keyword: keyword.into(),
            variant: variant.into(),
            armed: true,
        }
    }

    fn rms(frame: &[f32]) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }
        (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt()
    }
}

impl WakeWordDetector for EnergyTriggerDetector {
    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn process(&mut self, frame: &[f32]) -> Option<WakeWordHit> {
        if !self.armed {
            return None;
        }
        let energy = Self::rms(frame);
        if energy >= self.threshold {
            self.armed = false;
            Some(WakeWordHit {
                keyword: self.keyword.clone(),
                variant: self.variant.clone(),
                confidence: energy.min(1.0),
            })
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.armed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_detector_never_fires() {
        let mut d = NullWakeWordDetector::new(512);
        assert!(d.process(&vec![1.0; 512]).is_none());
    }

    #[test]
    fn energy_trigger_fires_once_above_threshold_then_resets() {
        let mut d = EnergyTriggerDetector::new(4, 0.5, "hey robo", "default");
        assert!(d.process(&[0.0, 0.0, 0.0, 0.0]).is_none());
        let hit = d.process(&[0.9, 0.9, 0.9, 0.9]).expect("should fire");
        assert_eq!(hit.keyword, "hey robo");
        assert!(d.process(&[0.9, 0.9, 0.9, 0.9]).is_none(), "disarmed until reset");
        d.reset();
        assert!(d.process(&[0.9, 0.9, 0.9, 0.9]).is_some());
    }
}
