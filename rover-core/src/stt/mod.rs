//! Speech capture consumer (C6): reads from the ring buffer once triggered,
//! tracks RMS-based speech/silence counters, and decides when to stop and
//! hand the accumulated audio to the external STT adapter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::bus::payload::{Durations, SttTranscription};
use crate::ring_buffer::{ReadOutcome, ReaderId, RingBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStop {
    MaxDuration,
    Silence,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SttOutcome {
    Completed { samples: Vec<i16>, stop: CaptureStop },
    Interrupted,
    ExternalStop,
}

#[derive(Debug, Clone)]
pub struct SttCaptureConfig {
    pub sample_rate: u32,
    pub chunk_ms: u32,
    pub silence_threshold: f32,
    pub silence_duration_ms: u32,
    pub max_capture_seconds: f32,
    pub min_capture_seconds: f32,
    pub min_speech_frames: u32,
}

impl SttCaptureConfig {
    pub fn chunk_samples(&self) -> usize {
        (self.sample_rate as f32 * self.chunk_ms as f32 / 1000.0) as usize
    }
}

/// Per-capture accumulator. Created on `cmd.listen.start`, dropped on exit
/// from LISTENING.
pub struct AudioSession {
    started_at: Instant,
    accumulated: Vec<i16>,
    silence_frame_count: u32,
    speech_frame_count: u32,
}

impl AudioSession {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            accumulated: Vec::new(),
            silence_frame_count: 0,
            speech_frame_count: 0,
        }
    }

    /// Feed one chunk; returns the stop reason once a stop condition fires.
    pub fn push_chunk(&mut self, chunk: &[i16], cfg: &SttCaptureConfig) -> Option<CaptureStop> {
        self.accumulated.extend_from_slice(chunk);

        if rms_normalized(chunk) >= cfg.silence_threshold {
            self.silence_frame_count = 0;
            self.speech_frame_count += 1;
        } else {
            self.silence_frame_count += 1;
        }

        let elapsed = self.started_at.elapsed().as_secs_f32();
        if elapsed >= cfg.max_capture_seconds {
            return Some(CaptureStop::MaxDuration);
        }

        let silence_ms = self.silence_frame_count as f32 * cfg.chunk_ms as f32;
        if self.speech_frame_count >= cfg.min_speech_frames
            && silence_ms >= cfg.silence_duration_ms as f32
            && elapsed >= cfg.min_capture_seconds
        {
            return Some(CaptureStop::Silence);
        }
        None
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.accumulated
    }
}

impl Default for AudioSession {
    fn default() -> Self {
        Self::new()
    }
}

fn rms_normalized(chunk: &[i16]) -> f32 {
    if chunk.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = chunk.iter().map(|s| (*s as f64).powi(2)).sum();
    let rms = (sum_sq / chunk.len() as f64).sqrt();
    (rms / i16::MAX as f64) as f32
}

/// Drive one STT capture session to completion. Polls the ring buffer,
/// sleeping briefly when no new chunk is ready yet; checks `interrupted`
/// (a fresh wake-word hit) and `should_stop` (`cmd.listen.stop`) on every
/// iteration so either cause prompt exit within roughly one chunk period.
pub fn run_capture(
    ring: &RingBuffer,
    reader: ReaderId,
    cfg: &SttCaptureConfig,
    should_stop: &AtomicBool,
    interrupted: &AtomicBool,
) -> SttOutcome {
    let chunk_samples = cfg.chunk_samples();
    let mut session = AudioSession::new();
    loop {
        if interrupted.load(Ordering::Relaxed) {
            return SttOutcome::Interrupted;
        }
        if should_stop.load(Ordering::Relaxed) {
            return SttOutcome::ExternalStop;
        }
        match ring.read(reader, chunk_samples) {
            Ok(ReadOutcome::Ready(chunk)) => {
                if let Some(stop) = session.push_chunk(&chunk, cfg) {
                    return SttOutcome::Completed {
                        samples: session.into_samples(),
                        stop,
                    };
                }
            }
            Ok(ReadOutcome::NotReady) => std::thread::sleep(Duration::from_millis(5)),
            Err(e) => {
                tracing::warn!("ring buffer read error in STT capture: {e}");
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }
}

/// Speech-to-text execution itself is out of scope for this crate — real
/// transcription runs in a separate process (mirroring the original
/// system's STT wrapper, which talks to the audio core over its own
/// control channel rather than the pub/sub bus). This trait is the
/// in-process stand-in for that boundary: a real deployment wires in
/// whatever talks to the external STT process, while `SimulatedSttBackend`
/// keeps the capture loop exercisable without one.
pub trait SttBackend: Send {
    fn transcribe(&mut self, samples: &[i16], sample_rate: u32) -> SttTranscription;
}

/// Stand-in matching the original STT wrapper's simulation mode: publishes
/// a fixed low-confidence placeholder rather than running a real model.
pub struct SimulatedSttBackend;

impl SttBackend for SimulatedSttBackend {
    fn transcribe(&mut self, samples: &[i16], sample_rate: u32) -> SttTranscription {
        let capture_ms = samples.len() as f64 / sample_rate as f64 * 1000.0;
        SttTranscription {
            timestamp: 0,
            text: String::new(),
            confidence: 0.0,
            language: "en".to_string(),
            durations_ms: Durations {
                capture: capture_ms,
                engine: 0.0,
                total: capture_ms,
            },
            kind: "final".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SttCaptureConfig {
        SttCaptureConfig {
            sample_rate: 16_000,
            chunk_ms: 30,
            silence_threshold: 0.25,
            silence_duration_ms: 90,
            max_capture_seconds: 1.0,
            min_capture_seconds: 0.0,
            min_speech_frames: 2,
        }
    }

    fn loud_chunk(n: usize) -> Vec<i16> {
        vec![20_000; n]
    }

    fn silent_chunk(n: usize) -> Vec<i16> {
        vec![0; n]
    }

    #[test]
    fn silence_before_min_speech_frames_never_stops_on_silence() {
        let mut session = AudioSession::new();
        let cfg = cfg();
        // All silence, never reaches min_speech_frames — should only stop on max duration.
        for _ in 0..3 {
            assert_eq!(session.push_chunk(&silent_chunk(480), &cfg), None);
        }
    }

    #[test]
    fn speech_then_silence_triggers_silence_stop() {
        let mut session = AudioSession::new();
        let cfg = cfg();
        assert_eq!(session.push_chunk(&loud_chunk(480), &cfg), None);
        assert_eq!(session.push_chunk(&loud_chunk(480), &cfg), None);
        // two silent 30ms chunks = 60ms, not yet past 90ms silence_duration_ms
        assert_eq!(session.push_chunk(&silent_chunk(480), &cfg), None);
        let stop = session.push_chunk(&silent_chunk(480), &cfg);
        assert_eq!(stop, Some(CaptureStop::Silence));
    }

    #[test]
    fn accumulated_samples_include_every_chunk() {
        let mut session = AudioSession::new();
        let cfg = cfg();
        session.push_chunk(&loud_chunk(10), &cfg);
        session.push_chunk(&loud_chunk(10), &cfg);
        assert_eq!(session.into_samples().len(), 20);
    }

    #[test]
    fn run_capture_honors_external_stop_flag() {
        let ring = RingBuffer::new(16_000);
        let reader = ring.register_reader();
        let should_stop = AtomicBool::new(true);
        let interrupted = AtomicBool::new(false);
        let outcome = run_capture(&ring, reader, &cfg(), &should_stop, &interrupted);
        assert_eq!(outcome, SttOutcome::ExternalStop);
    }

    #[test]
    fn run_capture_honors_interrupt_flag() {
        let ring = RingBuffer::new(16_000);
        let reader = ring.register_reader();
        let should_stop = AtomicBool::new(false);
        let interrupted = AtomicBool::new(true);
        let outcome = run_capture(&ring, reader, &cfg(), &should_stop, &interrupted);
        assert_eq!(outcome, SttOutcome::Interrupted);
    }
}
