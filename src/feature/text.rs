use std::borrow::Cow;
use std::sync::Arc;

use crate::config::InteropConfig;
use crate::error::{EdgeError, EdgeResult};
use crate::native::{Engine, NativeInput};
use crate::tensor::DType;
use super::{EdgeFeature, FeatureType};

/// UTF-8 text input, always copied into the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFeature<'a> {
    text: Cow<'a, str>,
}

impl<'a> TextFeature<'a> {
    pub fn new(text: impl Into<Cow<'a, str>>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl<'a> EdgeFeature for TextFeature<'a> {
    fn feature_type(&self) -> FeatureType {
        FeatureType::text(self.text.len())
    }

    fn create_native<'f>(
        &'f self,
        engine: &Arc<dyn Engine>,
        expected: &FeatureType,
        _interop: &InteropConfig,
    ) -> EdgeResult<NativeInput<'f>> {
        if expected.dtype() != DType::String {
            return Err(EdgeError::InvalidOperation(format!(
                "model expects {} feature but was given text",
                expected.dtype()
            )));
        }
        NativeInput::copied(engine, self.text.as_bytes(), &[self.text.len()], DType::String)
    }
}
