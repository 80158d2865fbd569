//! ONNX-backed wake-word detector: a three-stage pipeline (melspectrogram →
//! embedding → classifier) matching the openWakeWord model family. Frames
//! are accumulated into overlapping windows and fed through all three ONNX
//! sessions; a classifier score above `threshold` is a detection.

use ndarray::Array2;
use ort::session::Session;

use super::{WakeWordDetector, WakeWordHit};
use crate::error::{Result, RoverError};

const CHUNK_SAMPLES: usize = 1280;
const DETECTION_THRESHOLD_DEFAULT: f32 = 0.9;

pub struct OnnxWakeWordDetector {
    mel_session: Session,
    embed_session: Session,
    ww_session: Session,
    sample_buf: Vec<f32>,
    keyword: String,
    variant: String,
    threshold: f32,
}

impl OnnxWakeWordDetector {
    pub fn load(
        mel_model_path: &str,
        embed_model_path: &str,
        ww_model_path: &str,
        keyword: impl Into<String>,
        variant: impl Into<String>,
        threshold: Option<f32>,
    ) -> Result<Self> {
        let mel_session = Session::builder()
            .map_err(|e| RoverError::WakeWordModel(e.to_string()))?
            .commit_from_file(mel_model_path)
            .map_err(|e| RoverError::WakeWordModel(e.to_string()))?;
        let embed_session = Session::builder()
            .map_err(|e| RoverError::WakeWordModel(e.to_string()))?
            .commit_from_file(embed_model_path)
            .map_err(|e| RoverError::WakeWordModel(e.to_string()))?;
        let ww_session = Session::builder()
            .map_err(|e| RoverError::WakeWordModel(e.to_string()))?
            .commit_from_file(ww_model_path)
            .map_err(|e| RoverError::WakeWordModel(e.to_string()))?;

        Ok(Self {
            mel_session,
            embed_session,
            ww_session,
            sample_buf: Vec::with_capacity(CHUNK_SAMPLES * 2),
            keyword: keyword.into(),
            variant: variant.into(),
            threshold: threshold.unwrap_or(DETECTION_THRESHOLD_DEFAULT),
        })
    }

    fn run_pipeline(&mut self, chunk: &[f32]) -> Result<f32> {
        let input = Array2::from_shape_vec((1, chunk.len()), chunk.to_vec())
            .map_err(|e| RoverError::WakeWordModel(e.to_string()))?;
        let mel_inputs = ort::inputs![input.into_dyn()];
        let mel_outputs = self
            .mel_session
            .run(mel_inputs)
            .map_err(|e| RoverError::WakeWordModel(format!("mel stage: {e}")))?;
        let mel_tensor = mel_outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RoverError::WakeWordModel(e.to_string()))?;
        let mel_shape = mel_tensor.shape().to_vec();
        let mel_data: Vec<f32> = mel_tensor.iter().copied().collect();
        let mel_array = Array2::from_shape_vec(
            (mel_shape.first().copied().unwrap_or(1), mel_data.len() / mel_shape.first().copied().unwrap_or(1).max(1)),
            mel_data,
        )
        .map_err(|e| RoverError::WakeWordModel(e.to_string()))?;

        let embed_inputs = ort::inputs![mel_array.into_dyn()];
        let embed_outputs = self
            .embed_session
            .run(embed_inputs)
            .map_err(|e| RoverError::WakeWordModel(format!("embedding stage: {e}")))?;
        let embed_tensor = embed_outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RoverError::WakeWordModel(e.to_string()))?;
        let embed_shape = embed_tensor.shape().to_vec();
        let embed_data: Vec<f32> = embed_tensor.iter().copied().collect();
        let embed_array = Array2::from_shape_vec(
            (embed_shape.first().copied().unwrap_or(1), embed_data.len() / embed_shape.first().copied().unwrap_or(1).max(1)),
            embed_data,
        )
        .map_err(|e| RoverError::WakeWordModel(e.to_string()))?;

        let ww_inputs = ort::inputs![embed_array.into_dyn()];
        let ww_outputs = self
            .ww_session
            .run(ww_inputs)
            .map_err(|e| RoverError::WakeWordModel(format!("classifier stage: {e}")))?;
        let score_tensor = ww_outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RoverError::WakeWordModel(e.to_string()))?;
        Ok(score_tensor.iter().copied().fold(0.0f32, f32::max))
    }
}

impl WakeWordDetector for OnnxWakeWordDetector {
    fn frame_length(&self) -> usize {
        CHUNK_SAMPLES
    }

    fn process(&mut self, frame: &[f32]) -> Option<WakeWordHit> {
        self.sample_buf.extend_from_slice(frame);
        if self.sample_buf.len() < CHUNK_SAMPLES {
            return None;
        }
        let chunk: Vec<f32> = self.sample_buf.drain(..CHUNK_SAMPLES).collect();
        match self.run_pipeline(&chunk) {
            Ok(score) if score >= self.threshold => Some(WakeWordHit {
                keyword: self.keyword.clone(),
                variant: self.variant.clone(),
                confidence: score,
            }),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("wake-word pipeline error: {e}");
                None
            }
        }
    }

    fn reset(&mut self) {
        self.sample_buf.clear();
    }
}
