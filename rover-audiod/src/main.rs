//! Unified audio core daemon (C3, C4, C5, C6): one capture thread writes
//! into a shared ring buffer; a wake-word thread and on-demand STT capture
//! threads read it independently. Coordination with the rest of the system
//! happens exclusively over the message bus — this process owns the
//! microphone and nothing else touches the device directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rover_core::audio::AudioCapture;
use rover_core::bus::payload::{Message, WakeWordDetected};
use rover_core::config::RoverConfig;
use rover_core::ring_buffer::{ReadOutcome, RingBuffer};
use rover_core::stt::{run_capture, SimulatedSttBackend, SttBackend, SttCaptureConfig, SttOutcome};
use rover_core::wakeword::{EnergyTriggerDetector, NullWakeWordDetector, WakeWordDetector};
use rover_core::{Bus, Channel};

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn build_detector(cfg: &RoverConfig) -> Box<dyn WakeWordDetector> {
    #[cfg(feature = "onnx")]
    if let Some(model_dir) = &cfg.wakeword.model_path {
        let mel = format!("{model_dir}/melspectrogram.onnx");
        let embed = format!("{model_dir}/embedding.onnx");
        let ww = format!("{model_dir}/wakeword.onnx");
        match rover_core::OnnxWakeWordDetector::load(
            &mel,
            &embed,
            &ww,
            cfg.wakeword.payload_keyword.clone(),
            cfg.wakeword.payload_variant.clone(),
            Some(cfg.wakeword.sensitivity),
        ) {
            Ok(d) => return Box::new(d),
            Err(e) => tracing::warn!("failed to load onnx wake-word model: {e}; falling back"),
        }
    }

    let frame_len = (cfg.audio.target_sample_rate as f32 * cfg.audio.chunk_ms as f32 / 1000.0) as usize;
    if cfg.wakeword.model_path.is_some() {
        Box::new(EnergyTriggerDetector::new(
            frame_len,
            cfg.wakeword.sensitivity,
            cfg.wakeword.payload_keyword.clone(),
            cfg.wakeword.payload_variant.clone(),
        ))
    } else {
        Box::new(NullWakeWordDetector::new(frame_len))
    }
}

fn spawn_capture_thread(
    ring: Arc<RingBuffer>,
    cfg: RoverConfig,
    running: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let capture = match AudioCapture::open_with_preference(
            ring,
            cfg.audio.target_sample_rate,
            Arc::clone(&running),
            cfg.audio.preferred_device_substring.as_deref(),
        ) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("failed to open audio capture: {e}");
                return;
            }
        };
        while running.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(200));
        }
        capture.stop();
    })
}

fn spawn_wakeword_thread(
    ring: Arc<RingBuffer>,
    bus: Arc<Bus>,
    cfg: RoverConfig,
    running: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let reader = ring.register_reader();
        let mut detector = build_detector(&cfg);
        let frame_len = detector.frame_length();
        while running.load(Ordering::Relaxed) {
            match ring.read(reader, frame_len) {
                Ok(ReadOutcome::Ready(samples)) => {
                    let frame: Vec<f32> = samples.iter().map(|s| *s as f32 / 32768.0).collect();
                    if let Some(hit) = detector.process(&frame) {
                        tracing::info!(keyword = %hit.keyword, confidence = hit.confidence, "wake word detected");
                        interrupted.store(true, Ordering::Relaxed);
                        bus.publish(
                            Channel::Upstream,
                            Message::WwDetected(WakeWordDetected {
                                timestamp: now_millis(),
                                keyword: hit.keyword,
                                variant: hit.variant,
                                confidence: hit.confidence,
                                source: "onboard".to_string(),
                            }),
                        );
                        detector.reset();
                    }
                }
                Ok(ReadOutcome::NotReady) => std::thread::sleep(Duration::from_millis(5)),
                Err(e) => {
                    tracing::warn!("wake-word ring read error: {e}");
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        }
    })
}

/// Handles `cmd.listen.start`/`cmd.listen.stop` by spawning one STT capture
/// session per start and tearing it down on stop/interrupt/timeout.
fn spawn_bus_thread(
    ring: Arc<RingBuffer>,
    bus: Arc<Bus>,
    cfg: RoverConfig,
    running: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let downstream = bus.subscribe(Channel::Downstream, "cmd.listen.");
        let active_stop: Arc<Mutex<Option<Arc<AtomicBool>>>> = Arc::new(Mutex::new(None));

        while running.load(Ordering::Relaxed) {
            match downstream.recv_timeout(Duration::from_millis(200)) {
                Ok(Message::CmdListenStart(_)) => {
                    interrupted.store(false, Ordering::Relaxed);
                    let should_stop = Arc::new(AtomicBool::new(false));
                    *active_stop.lock().unwrap() = Some(Arc::clone(&should_stop));

                    let ring = Arc::clone(&ring);
                    let bus = Arc::clone(&bus);
                    let interrupted = Arc::clone(&interrupted);
                    let stt_cfg = SttCaptureConfig {
                        sample_rate: cfg.audio.target_sample_rate,
                        chunk_ms: cfg.audio.chunk_ms,
                        silence_threshold: cfg.stt.silence_threshold,
                        silence_duration_ms: cfg.stt.silence_duration_ms,
                        max_capture_seconds: cfg.stt.max_capture_seconds,
                        min_capture_seconds: cfg.stt.min_capture_seconds,
                        min_speech_frames: 2,
                    };
                    let sample_rate = cfg.audio.target_sample_rate;
                    std::thread::spawn(move || {
                        let reader = ring.register_reader();
                        let mut backend: Box<dyn SttBackend> = Box::new(SimulatedSttBackend);
                        let outcome = run_capture(&ring, reader, &stt_cfg, &should_stop, &interrupted);
                        ring.unregister_reader(reader);
                        if let SttOutcome::Completed { samples, .. } = outcome {
                            let mut transcription = backend.transcribe(&samples, sample_rate);
                            transcription.timestamp = now_millis();
                            bus.publish(Channel::Upstream, Message::SttTranscription(transcription));
                        }
                    });
                }
                Ok(Message::CmdListenStop(_)) => {
                    if let Some(flag) = active_stop.lock().unwrap().as_ref() {
                        flag.store(true, Ordering::Relaxed);
                    }
                }
                Ok(_) => {}
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
    })
}

fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("ROVER_CONFIG").unwrap_or_else(|_| {
            RoverConfig::default_config_path().to_string_lossy().into_owned()
        });
    let log_dir = std::env::var("ROVER_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let _guard = rover_core::logging::init("rover-audiod", &log_dir, "rover_audiod=info");

    let config = match RoverConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("failed to load {config_path}: {e}; using defaults");
            RoverConfig::default()
        }
    };

    let capacity = (config.audio.target_sample_rate as f32 * config.audio.buffer_seconds) as usize;
    let ring = Arc::new(RingBuffer::new(capacity));
    let bus = Bus::connect(&config.ipc)?;
    let running = Arc::new(AtomicBool::new(true));
    let interrupted = Arc::new(AtomicBool::new(false));

    let capture_handle = spawn_capture_thread(Arc::clone(&ring), config.clone(), Arc::clone(&running));
    let _wakeword_handle = spawn_wakeword_thread(
        Arc::clone(&ring),
        Arc::clone(&bus),
        config.clone(),
        Arc::clone(&running),
        Arc::clone(&interrupted),
    );
    let _bus_handle = spawn_bus_thread(ring, bus, config, Arc::clone(&running), interrupted);

    tracing::info!("rover-audiod running");
    capture_handle.join().ok();
    Ok(())
}
