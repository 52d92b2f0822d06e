use std::sync::Arc;

use crate::config::InteropConfig;
use crate::error::{EdgeError, EdgeResult};
use crate::native::{CopyMode, Engine, NativeInput};
use crate::tensor::{shape, DType, Element, TensorView};
use super::{EdgeFeature, FeatureType};

/// Fail unless the model slot takes `actual` data
pub(crate) fn check_dtype(expected: &FeatureType, actual: DType) -> EdgeResult<()> {
    if expected.dtype() == actual {
        Ok(())
    } else {
        Err(EdgeError::InvalidOperation(format!(
            "model expects {} feature but was given {}",
            expected.dtype(),
            actual
        )))
    }
}

/// Shape to create a feature with: the input's own shape, else the model's,
/// with a dynamic axis resolved against the `available` elements
pub(crate) fn resolve_dims(own: Option<&[usize]>, expected: &FeatureType, available: usize) -> EdgeResult<Vec<usize>> {
    if let Some(dims) = own {
        return Ok(dims.to_vec());
    }
    match expected.shape() {
        Some(declared) => shape::resolve(declared, available),
        None => Err(EdgeError::InvalidShape(
            "neither the input nor the model declares a shape".to_string(),
        )),
    }
}

pub(crate) fn array_input<'f>(
    engine: &Arc<dyn Engine>,
    bytes: &'f [u8],
    dims: &[usize],
    dtype: DType,
    mode: CopyMode,
) -> EdgeResult<NativeInput<'f>> {
    match mode {
        CopyMode::Copy => NativeInput::copied(engine, bytes, dims, dtype),
        CopyMode::NoCopy => NativeInput::array(engine, bytes, dims, dtype, mode),
    }
}

impl<'a, T: Element> EdgeFeature for TensorView<'a, T> {
    fn feature_type(&self) -> FeatureType {
        TensorView::feature_type(self)
    }

    fn create_native<'f>(
        &'f self,
        engine: &Arc<dyn Engine>,
        expected: &FeatureType,
        interop: &InteropConfig,
    ) -> EdgeResult<NativeInput<'f>> {
        check_dtype(expected, T::DTYPE)?;
        if !self.is_contiguous() {
            tracing::debug!(shape = ?self.shape(), "materializing strided view for the engine");
            let dense = self.contiguous()?;
            let dims = dense.shape().map(<[usize]>::to_vec).unwrap_or_default();
            return NativeInput::copied(engine, dense.storage().as_bytes(), &dims, T::DTYPE);
        }
        let dims = resolve_dims(self.shape(), expected, self.storage().len())?;
        let mode = if interop.force_copy {
            CopyMode::Copy
        } else {
            self.ownership().copy_mode()
        };
        array_input(engine, self.storage().as_bytes(), &dims, T::DTYPE, mode)
    }
}
