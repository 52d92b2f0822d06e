use std::borrow::Cow;
use std::sync::Arc;

use crate::config::InteropConfig;
use crate::error::{EdgeError, EdgeResult};
use crate::native::{AspectMode, Engine, ImageRequest, NativeInput};
use crate::tensor::DType;
use super::{EdgeFeature, FeatureType};

/// RGBA8888 image input.
///
/// The engine resizes the pixels into the model's expected layout and applies
/// `(pixel / 255 - mean) / std` per channel.
#[derive(Debug, Clone)]
pub struct ImageFeature<'a> {
    pixels: Cow<'a, [u8]>,
    width: usize,
    height: usize,
    pub mean: [f32; 4],
    pub std: [f32; 4],
    pub aspect_mode: AspectMode,
}

impl<'a> ImageFeature<'a> {
    pub fn new(pixels: impl Into<Cow<'a, [u8]>>, width: usize, height: usize) -> EdgeResult<Self> {
        let pixels = pixels.into();
        let expected = width
            .checked_mul(height)
            .and_then(|count| count.checked_mul(4))
            .ok_or_else(|| EdgeError::InvalidShape(format!("image of {}x{} pixels is too large", width, height)))?;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(EdgeError::ElementCountMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            pixels,
            width,
            height,
            mean: [0.0; 4],
            std: [1.0; 4],
            aspect_mode: AspectMode::default(),
        })
    }

    /// Per-channel RGB normalization; alpha passes through unchanged
    pub fn with_normalization(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.mean = [mean[0], mean[1], mean[2], 0.0];
        self.std = [std[0], std[1], std[2], 1.0];
        self
    }

    pub fn with_aspect_mode(mut self, aspect_mode: AspectMode) -> Self {
        self.aspect_mode = aspect_mode;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

impl<'a> EdgeFeature for ImageFeature<'a> {
    fn feature_type(&self) -> FeatureType {
        FeatureType::image(self.width, self.height)
    }

    fn create_native<'f>(
        &'f self,
        engine: &Arc<dyn Engine>,
        expected: &FeatureType,
        _interop: &InteropConfig,
    ) -> EdgeResult<NativeInput<'f>> {
        if !matches!(expected.dtype(), DType::F32 | DType::U8) {
            return Err(EdgeError::InvalidOperation(format!(
                "model expects {} feature but was given an image",
                expected.dtype()
            )));
        }
        let shape: Vec<i32> = match expected.shape() {
            Some(shape) if shape.len() == 4 && expected.is_fully_specified() => {
                shape.iter().map(|&d| d as i32).collect()
            }
            other => {
                return Err(EdgeError::InvalidShape(format!(
                    "image input needs a fully specified rank 4 model shape, got {:?}",
                    other
                )))
            }
        };
        let request = ImageRequest {
            pixels: &self.pixels,
            width: self.width,
            height: self.height,
            shape: &shape,
            dtype: expected.dtype(),
            mean: self.mean,
            std: self.std,
            aspect_mode: self.aspect_mode,
        };
        NativeInput::image(engine, &request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::HostEngine;

    #[test]
    fn test_pixel_count_is_checked() {
        assert!(ImageFeature::new(vec![0u8; 15], 2, 2).is_err());
        assert!(ImageFeature::new(vec![0u8; 16], 2, 2).is_ok());
        assert!(ImageFeature::new(Vec::<u8>::new(), 0, 0).is_err());

        let err = ImageFeature::new(vec![0u8; 16], usize::MAX / 2, 3).unwrap_err();
        assert!(err.is_shape_error());
    }

    #[test]
    fn test_creates_model_layout() {
        let engine: Arc<dyn Engine> = Arc::new(HostEngine::new());
        let pixels = [255u8; 16];
        let image = ImageFeature::new(&pixels[..], 2, 2)
            .unwrap()
            .with_normalization([0.5; 3], [0.5; 3]);
        let expected = FeatureType::image_with_shape(None, DType::F32, vec![1, 3, 4, 4]).unwrap();
        let input = image.create_native(&engine, &expected, &InteropConfig::default()).unwrap();
        assert_eq!(input.feature().shape(), &[1, 3, 4, 4]);
        assert_eq!(input.feature().dtype(), DType::F32);

        let first = unsafe { *(input.feature().data_ptr() as *const f32) };
        assert_eq!(first, 1.0);
    }

    #[test]
    fn test_rejects_unusable_model_types() {
        let engine: Arc<dyn Engine> = Arc::new(HostEngine::new());
        let image = ImageFeature::new(vec![0u8; 16], 2, 2).unwrap();

        let dynamic = FeatureType::image_with_shape(None, DType::F32, vec![1, 3, -1, 4]).unwrap();
        let err = image.create_native(&engine, &dynamic, &InteropConfig::default()).unwrap_err();
        assert!(err.is_shape_error());

        let text = FeatureType::text(4);
        assert!(image.create_native(&engine, &text, &InteropConfig::default()).is_err());
    }
}
