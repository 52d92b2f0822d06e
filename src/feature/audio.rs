use std::borrow::Cow;
use std::sync::Arc;

use crate::config::InteropConfig;
use crate::error::{EdgeError, EdgeResult};
use crate::native::{AudioRequest, Engine, NativeInput};
use crate::tensor::DType;
use super::{EdgeFeature, FeatureKind, FeatureType};

/// Interleaved linear PCM input with buffer shape `(1, frames, channels)`
#[derive(Debug, Clone)]
pub struct AudioFeature<'a> {
    samples: Cow<'a, [f32]>,
    sample_rate: u32,
    channel_count: usize,
    pub mean: [f32; 4],
    pub std: [f32; 4],
}

impl<'a> AudioFeature<'a> {
    pub fn new(samples: impl Into<Cow<'a, [f32]>>, sample_rate: u32, channel_count: usize) -> EdgeResult<Self> {
        let samples = samples.into();
        if channel_count == 0 || channel_count > 4 {
            return Err(EdgeError::InvalidOperation(format!(
                "audio must have 1 to 4 channels, got {}",
                channel_count
            )));
        }
        if samples.len() % channel_count != 0 {
            return Err(EdgeError::InvalidShape(format!(
                "{} samples do not split into {} channels",
                samples.len(),
                channel_count
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
            channel_count,
            mean: [0.0; 4],
            std: [1.0; 4],
        })
    }

    pub fn with_normalization(mut self, mean: f32, std: f32) -> Self {
        self.mean = [mean; 4];
        self.std = [std; 4];
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channel_count
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

impl<'a> EdgeFeature for AudioFeature<'a> {
    fn feature_type(&self) -> FeatureType {
        FeatureType::audio(self.sample_rate, self.channel_count, self.frame_count())
    }

    fn create_native<'f>(
        &'f self,
        engine: &Arc<dyn Engine>,
        expected: &FeatureType,
        _interop: &InteropConfig,
    ) -> EdgeResult<NativeInput<'f>> {
        if expected.dtype() != DType::F32 {
            return Err(EdgeError::InvalidOperation(format!(
                "model expects {} feature but was given audio",
                expected.dtype()
            )));
        }
        if expected.rank() != 3 {
            return Err(EdgeError::InvalidShape(format!(
                "audio input needs a rank 3 model shape, got rank {}",
                expected.rank()
            )));
        }
        let sample_rate = match expected.kind() {
            FeatureKind::Audio { sample_rate } => sample_rate,
            _ => self.sample_rate,
        };
        let channel_count = match expected.shape().map(|s| s[1]) {
            Some(channels) if channels > 0 => channels as usize,
            _ => self.channel_count,
        };
        let request = AudioRequest {
            samples: &self.samples,
            buffer_sample_rate: self.sample_rate,
            buffer_shape: [1, self.frame_count() as i32, self.channel_count as i32],
            sample_rate,
            channel_count,
            dtype: DType::F32,
            mean: self.mean,
            std: self.std,
        };
        NativeInput::audio(engine, &request)
    }
}
