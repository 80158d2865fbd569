//! Audio capture via cpal, feeding the unified multi-reader ring buffer.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated (TIME_CRITICAL on
//! Windows) priority. It **must not**:
//! - Allocate heap memory in the steady-state path (a bounded mixdown scratch buffer
//!   is grown once to the device's frame size and then reused)
//! - Block on a mutex held by anyone other than the ring buffer itself, which is
//!   only ever held for the duration of a short copy
//! - Perform file or network I/O
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on macOS).
//! `AudioCapture` therefore must be created and dropped on the same thread — the
//! capture binary does this inside `tokio::task::spawn_blocking`.

pub mod device;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use crate::error::{Result, RoverError};
use crate::ring_buffer::RingBuffer;
use resample::RateConverter;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{error, info, warn};

/// Handle to an active audio capture stream.
///
/// **Not `Send`** — `cpal::Stream` is bound to its creation thread on Windows/macOS.
/// Create and drop this type on the same OS thread.
pub struct AudioCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    running: Arc<AtomicBool>,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

impl AudioCapture {
    /// Open an input device by preferred substring match, otherwise fall back
    /// to the default input device and then the first available device.
    ///
    /// Captured audio is resampled to `target_rate` and written into `ring`
    /// as signed 16-bit PCM, one `write()` call per device callback.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        ring: Arc<RingBuffer>,
        target_rate: u32,
        running: Arc<AtomicBool>,
        preferred_device_substring: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut devices: Vec<(String, cpal::Device)> = host
            .input_devices()
            .map_err(|e| RoverError::AudioDevice(e.to_string()))?
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                (name, device)
            })
            .collect();
        if devices.is_empty() {
            return Err(RoverError::NoDefaultInputDevice);
        }

        let default_name = host.default_input_device().and_then(|d| d.name().ok());
        let substring_idx = preferred_device_substring.and_then(|needle| {
            let needle = needle.to_ascii_lowercase();
            devices
                .iter()
                .position(|(name, _)| name.to_ascii_lowercase().contains(&needle))
        });
        let default_idx = default_name
            .as_deref()
            .and_then(|name| devices.iter().position(|(n, _)| n.as_str() == name));
        let best_non_loopback_idx = devices
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| !device::is_loopback_like_name(name))
            .max_by_key(|(_, (name, _))| device::mic_preference_score(name))
            .map(|(idx, _)| idx);

        if preferred_device_substring.is_some() && substring_idx.is_none() {
            warn!(
                "preferred device substring '{}' matched no input device, falling back",
                preferred_device_substring.unwrap_or_default()
            );
        }

        let selected_idx = if let Some(idx) = substring_idx {
            idx
        } else if let Some(idx) = default_idx {
            if device::is_loopback_like_name(&devices[idx].0) {
                best_non_loopback_idx.unwrap_or(idx)
            } else {
                idx
            }
        } else if let Some(idx) = best_non_loopback_idx {
            warn!("no default input device, falling back to best available microphone input");
            idx
        } else {
            warn!("no default microphone input device, falling back to first available input");
            0
        };

        let (selected_name, device) = devices.swap_remove(selected_idx);
        info!(device = selected_name.as_str(), "opening input device");

        let supported = device
            .default_input_config()
            .map_err(|e| RoverError::AudioDevice(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, target_rate, "audio config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running_cb = Arc::clone(&running);
        let ch = channels as usize;
        let mut mono_buf: Vec<f32> = Vec::new();
        let mut resampler = RateConverter::new(sample_rate, target_rate, 960)
            .map_err(|e| RoverError::AudioStream(e.to_string()))?;
        let ring_cb = Arc::clone(&ring);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    mixdown_f32(data, ch, &mut mono_buf);
                    write_resampled(&mut resampler, &mono_buf, &ring_cb);
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _info| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    mixdown_i16(data, ch, &mut mono_buf);
                    write_resampled(&mut resampler, &mono_buf, &ring_cb);
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),
            SampleFormat::U8 => device.build_input_stream(
                &config,
                move |data: &[u8], _info| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    mixdown_u8(data, ch, &mut mono_buf);
                    write_resampled(&mut resampler, &mono_buf, &ring_cb);
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),
            fmt => {
                return Err(RoverError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| RoverError::AudioStream(e.to_string()))?;

        stream.play().map_err(|e| RoverError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    #[cfg(feature = "audio-cpal")]
    pub fn open_default(
        ring: Arc<RingBuffer>,
        target_rate: u32,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        Self::open_with_preference(ring, target_rate, running, None)
    }

    /// Stop: signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(feature = "audio-cpal")]
fn mixdown_f32(data: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels == 1 {
        out.clear();
        out.extend_from_slice(data);
        return;
    }
    let frames = data.len() / channels;
    out.resize(frames, 0.0);
    for f in 0..frames {
        let base = f * channels;
        out[f] = data[base..base + channels].iter().sum::<f32>() / channels as f32;
    }
}

#[cfg(feature = "audio-cpal")]
fn mixdown_i16(data: &[i16], channels: usize, out: &mut Vec<f32>) {
    let frames = data.len() / channels;
    out.resize(frames, 0.0);
    for f in 0..frames {
        let base = f * channels;
        let sum: f32 = data[base..base + channels]
            .iter()
            .map(|s| *s as f32 / 32768.0)
            .sum();
        out[f] = sum / channels as f32;
    }
}

#[cfg(feature = "audio-cpal")]
fn mixdown_u8(data: &[u8], channels: usize, out: &mut Vec<f32>) {
    let frames = data.len() / channels;
    out.resize(frames, 0.0);
    for f in 0..frames {
        let base = f * channels;
        let sum: f32 = data[base..base + channels]
            .iter()
            .map(|s| (*s as f32 - 128.0) / 128.0)
            .sum();
        out[f] = sum / channels as f32;
    }
}

#[cfg(feature = "audio-cpal")]
fn write_resampled(resampler: &mut RateConverter, mono: &[f32], ring: &RingBuffer) {
    let resampled = resampler.process(mono);
    if resampled.is_empty() {
        return;
    }
    let pcm: Vec<i16> = resampled
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect();
    if let Err(e) = ring.write(&pcm) {
        warn!("ring buffer write failed: {e}");
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_with_preference(
        _ring: Arc<RingBuffer>,
        _target_rate: u32,
        _running: Arc<AtomicBool>,
        _preferred_device_substring: Option<&str>,
    ) -> Result<Self> {
        Err(RoverError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn open_default(
        ring: Arc<RingBuffer>,
        target_rate: u32,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        Self::open_with_preference(ring, target_rate, running, None)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}
