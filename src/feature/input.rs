use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::config::InteropConfig;
use crate::error::{EdgeError, EdgeResult};
use crate::native::{CopyMode, Engine, NativeFeature, NativeInput};
use crate::tensor::{shape, DType, Element, TensorView};
use super::array::{array_input, check_dtype, resolve_dims};
use super::{AudioFeature, EdgeFeature, FeatureType, ImageFeature, TextFeature};

/// One prediction input.
///
/// Each variant is built with a named constructor; nothing is inferred from
/// runtime types.
pub enum Feature<'a> {
    Text(TextFeature<'a>),
    Float(f32),
    FloatArray(Cow<'a, [f32]>),
    Int(i32),
    IntArray(Cow<'a, [i32]>),
    Bool(bool),
    Image(ImageFeature<'a>),
    Audio(AudioFeature<'a>),
    /// Any typed view or custom input
    Tensor(Box<dyn EdgeFeature + Send + Sync + 'a>),
    /// Output of an earlier prediction, passed back without a copy
    Native(Arc<NativeFeature>),
}

impl<'a> Feature<'a> {
    pub fn text(text: impl Into<Cow<'a, str>>) -> Self {
        Feature::Text(TextFeature::new(text))
    }

    pub fn float(value: f32) -> Self {
        Feature::Float(value)
    }

    pub fn float_array(values: impl Into<Cow<'a, [f32]>>) -> Self {
        Feature::FloatArray(values.into())
    }

    pub fn int(value: i32) -> Self {
        Feature::Int(value)
    }

    pub fn int_array(values: impl Into<Cow<'a, [i32]>>) -> Self {
        Feature::IntArray(values.into())
    }

    pub fn boolean(value: bool) -> Self {
        Feature::Bool(value)
    }

    pub fn image(image: ImageFeature<'a>) -> Self {
        Feature::Image(image)
    }

    pub fn audio(audio: AudioFeature<'a>) -> Self {
        Feature::Audio(audio)
    }

    pub fn tensor<T: Element>(view: TensorView<'a, T>) -> Self {
        Feature::Tensor(Box::new(view))
    }

    pub fn custom(feature: impl EdgeFeature + Send + Sync + 'a) -> Self {
        Feature::Tensor(Box::new(feature))
    }

    pub fn native(feature: NativeFeature) -> Self {
        Feature::Native(Arc::new(feature))
    }

    pub fn shared_native(feature: Arc<NativeFeature>) -> Self {
        Feature::Native(feature)
    }
}

/// Array input over plain values; owned values are copied, borrowed ones are not
fn values_input<'f, T: Element>(
    engine: &Arc<dyn Engine>,
    values: &'f [T],
    owned: bool,
    expected: &FeatureType,
    interop: &InteropConfig,
) -> EdgeResult<NativeInput<'f>> {
    check_dtype(expected, T::DTYPE)?;
    let dims = resolve_dims(None, expected, values.len())?;
    let mode = if owned || interop.force_copy {
        CopyMode::Copy
    } else {
        CopyMode::NoCopy
    };
    array_input(engine, bytemuck::cast_slice(values), &dims, T::DTYPE, mode)
}

fn scalar_dims(expected: &FeatureType) -> Vec<usize> {
    match expected.shape() {
        Some(declared) if shape::is_fully_specified(declared) && declared.iter().all(|&d| d == 1) => {
            declared.iter().map(|&d| d as usize).collect()
        }
        _ => vec![1],
    }
}

impl<'a> EdgeFeature for Feature<'a> {
    fn feature_type(&self) -> FeatureType {
        match self {
            Feature::Text(text) => text.feature_type(),
            Feature::Float(_) => FeatureType::array(None, DType::F32, Some(vec![1])),
            Feature::FloatArray(values) => FeatureType::array(None, DType::F32, Some(vec![values.len() as isize])),
            Feature::Int(_) => FeatureType::array(None, DType::I32, Some(vec![1])),
            Feature::IntArray(values) => FeatureType::array(None, DType::I32, Some(vec![values.len() as isize])),
            Feature::Bool(_) => FeatureType::array(None, DType::Bool, Some(vec![1])),
            Feature::Image(image) => image.feature_type(),
            Feature::Audio(audio) => audio.feature_type(),
            Feature::Tensor(tensor) => tensor.feature_type(),
            Feature::Native(native) => native
                .feature_type()
                .unwrap_or_else(|| FeatureType::array(native.name().map(str::to_string), native.dtype(), None)),
        }
    }

    fn create_native<'f>(
        &'f self,
        engine: &Arc<dyn Engine>,
        expected: &FeatureType,
        interop: &InteropConfig,
    ) -> EdgeResult<NativeInput<'f>> {
        match self {
            Feature::Text(text) => text.create_native(engine, expected, interop),
            Feature::Float(value) => {
                check_dtype(expected, DType::F32)?;
                NativeInput::copied(engine, bytemuck::bytes_of(value), &scalar_dims(expected), DType::F32)
            }
            Feature::Int(value) => {
                check_dtype(expected, DType::I32)?;
                NativeInput::copied(engine, bytemuck::bytes_of(value), &scalar_dims(expected), DType::I32)
            }
            Feature::Bool(value) => {
                check_dtype(expected, DType::Bool)?;
                NativeInput::copied(engine, &[u8::from(*value)], &scalar_dims(expected), DType::Bool)
            }
            Feature::FloatArray(values) => {
                values_input(engine, values.as_ref(), matches!(values, Cow::Owned(_)), expected, interop)
            }
            Feature::IntArray(values) => {
                values_input(engine, values.as_ref(), matches!(values, Cow::Owned(_)), expected, interop)
            }
            Feature::Image(image) => image.create_native(engine, expected, interop),
            Feature::Audio(audio) => audio.create_native(engine, expected, interop),
            Feature::Tensor(tensor) => tensor.create_native(engine, expected, interop),
            Feature::Native(native) => native_input(engine, native, expected),
        }
    }
}

/// Re-wrap an earlier output for this engine without copying its data
fn native_input<'f>(
    engine: &Arc<dyn Engine>,
    native: &'f NativeFeature,
    expected: &FeatureType,
) -> EdgeResult<NativeInput<'f>> {
    check_dtype(expected, native.dtype())?;
    let count = native.element_count();
    let len = if native.dtype() == DType::String {
        count
    } else {
        count * native.dtype().size()
    };
    let ptr = native.data_ptr();
    if len > 0 && ptr.is_null() {
        return Err(EdgeError::null_handle("feature data"));
    }
    let bytes: &'f [u8] = if len == 0 {
        &[]
    } else {
        // SAFETY: the feature exposes `len` bytes for as long as it lives, and
        // the borrow of `native` keeps it alive for `'f`.
        unsafe { std::slice::from_raw_parts(ptr, len) }
    };
    NativeInput::array(engine, bytes, native.shape(), native.dtype(), CopyMode::NoCopy)
}

impl<'a> fmt::Debug for Feature<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::Float(value) => f.debug_tuple("Float").field(value).finish(),
            Feature::Int(value) => f.debug_tuple("Int").field(value).finish(),
            Feature::Bool(value) => f.debug_tuple("Bool").field(value).finish(),
            Feature::Text(text) => f.debug_tuple("Text").field(&text.text()).finish(),
            other => f.debug_tuple("Feature").field(&other.feature_type().to_string()).finish(),
        }
    }
}

impl From<NativeFeature> for Feature<'static> {
    fn from(feature: NativeFeature) -> Self {
        Feature::native(feature)
    }
}

impl<'a, T: Element> From<TensorView<'a, T>> for Feature<'a> {
    fn from(view: TensorView<'a, T>) -> Self {
        Feature::tensor(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::HostEngine;

    fn engine() -> Arc<dyn Engine> {
        Arc::new(HostEngine::new())
    }

    fn read<T: Element>(input: &NativeInput<'_>) -> Vec<T> {
        let feature = input.feature();
        let slice = unsafe { std::slice::from_raw_parts(feature.data_ptr() as *const T, feature.element_count()) };
        slice.to_vec()
    }

    #[test]
    fn test_scalars_take_model_scalar_shape() {
        let engine = engine();
        let interop = InteropConfig::default();
        let scalar = FeatureType::array(None, DType::F32, Some(vec![1, 1]));

        let feature = Feature::float(2.5);
        let input = feature.create_native(&engine, &scalar, &interop).unwrap();
        assert_eq!(input.feature().shape(), &[1, 1]);
        assert_eq!(read::<f32>(&input), vec![2.5]);

        let flag = Feature::boolean(true);
        let expected = FeatureType::array(None, DType::Bool, Some(vec![1]));
        let input = flag.create_native(&engine, &expected, &interop).unwrap();
        assert_eq!(read::<u8>(&input), vec![1]);

        assert!(Feature::int(3).create_native(&engine, &scalar, &interop).is_err());

        let huge = FeatureType::array(None, DType::F32, Some(vec![isize::MAX, 4]));
        let one = Feature::float(1.0);
        let input = one.create_native(&engine, &huge, &interop).unwrap();
        assert_eq!(input.feature().shape(), &[1]);
    }

    #[test]
    fn test_borrowed_arrays_are_zero_copy() {
        let engine = engine();
        let interop = InteropConfig::default();
        let expected = FeatureType::array(None, DType::I32, Some(vec![-1, 2]));

        let data = [1i32, 2, 3, 4];
        let borrowed = Feature::int_array(&data[..]);
        let input = borrowed.create_native(&engine, &expected, &interop).unwrap();
        assert_eq!(input.feature().shape(), &[2, 2]);
        assert_eq!(input.feature().data_ptr(), data.as_ptr() as *const u8);

        let owned = Feature::int_array(data.to_vec());
        let input = owned.create_native(&engine, &expected, &interop).unwrap();
        assert_ne!(input.feature().data_ptr(), data.as_ptr() as *const u8);
        assert_eq!(read::<i32>(&input), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_native_feature_is_passed_through() {
        let engine = engine();
        let view = TensorView::from_vec(vec![0.5f32, 1.5], &[2]).unwrap();
        let native = NativeFeature::copy_from(&engine, &view).unwrap();
        let data = native.data_ptr();

        let feature = Feature::native(native);
        let expected = FeatureType::array(None, DType::F32, Some(vec![2]));
        let input = feature.create_native(&engine, &expected, &InteropConfig::default()).unwrap();
        assert_eq!(input.feature().data_ptr(), data);
        assert_eq!(read::<f32>(&input), vec![0.5, 1.5]);
    }

    #[test]
    fn test_feature_types() {
        assert_eq!(Feature::float_array(vec![0.0f32; 3]).feature_type().to_string(), "(3) float32");
        let view = TensorView::from_vec(vec![1u8; 6], &[2, 3]).unwrap().with_name("mask");
        assert_eq!(Feature::from(view).feature_type().to_string(), "mask: (2, 3) uint8");
        assert_eq!(Feature::text("hey").feature_type().text_length(), Some(3));
    }
}
