use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{EdgeError, EdgeResult};
use crate::feature::FeatureType;
use crate::tensor::{shape, DType, Element, TensorView};
use super::engine::{AudioRequest, CopyMode, Engine, FeatureHandle, ImageRequest, NativeType};

/// Owning wrapper around an engine feature handle.
///
/// The handle is released exactly once, when the wrapper drops. Type
/// information is read once at construction.
pub struct NativeFeature {
    engine: Arc<dyn Engine>,
    handle: FeatureHandle,
    name: Option<String>,
    dtype: DType,
    shape: Vec<usize>,
}

impl NativeFeature {
    /// Take ownership of a handle created by `engine`.
    ///
    /// On error the handle is still released.
    pub fn from_handle(engine: Arc<dyn Engine>, handle: FeatureHandle) -> EdgeResult<Self> {
        let native = engine.feature_type(handle);
        let mut feature = Self {
            engine,
            handle,
            name: None,
            dtype: DType::Undefined,
            shape: Vec::new(),
        };
        let native = native.ok_or_else(|| EdgeError::null_handle("feature type"))?;
        feature.shape = native
            .shape
            .iter()
            .map(|&d| usize::try_from(d))
            .collect::<Result<_, _>>()
            .map_err(|_| {
                EdgeError::NativeInteropFailure(format!(
                    "engine reported unresolved shape {:?}",
                    native.shape
                ))
            })?;
        feature.name = native.name;
        feature.dtype = native.dtype;
        Ok(feature)
    }

    /// Copy the elements of `view` into a new engine feature
    pub fn copy_from<T: Element>(engine: &Arc<dyn Engine>, view: &TensorView<'_, T>) -> EdgeResult<Self> {
        let dims = view
            .shape()
            .ok_or_else(|| EdgeError::operation_error("copy_from", "view has no shape"))?
            .to_vec();
        let data = view.to_vec()?;
        let handle = create_array_handle(engine, bytemuck::cast_slice(&data), &dims, T::DTYPE, CopyMode::Copy)?;
        let mut feature = Self::from_handle(engine.clone(), handle)?;
        if feature.name.is_none() {
            feature.name = view.name().map(str::to_string);
        }
        Ok(feature)
    }

    pub fn handle(&self) -> FeatureHandle {
        self.handle
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn element_count(&self) -> usize {
        shape::element_count(&self.shape)
    }

    /// Raw data pointer, valid while `self` lives
    pub fn data_ptr(&self) -> *const u8 {
        self.engine.feature_data(self.handle)
    }

    pub fn feature_type(&self) -> Option<FeatureType> {
        FeatureType::from_native(&NativeType {
            name: self.name.clone(),
            dtype: self.dtype,
            shape: self.shape.iter().map(|&d| d as i32).collect(),
        })
    }

    /// Re-wrap as a typed view that owns this handle
    pub fn into_view<T: Element>(self) -> EdgeResult<TensorView<'static, T>> {
        TensorView::from_native(self)
    }

    /// Read a string feature as UTF-8 text
    pub fn text(&self) -> EdgeResult<String> {
        if self.dtype != DType::String {
            return Err(EdgeError::operation_error(
                "text",
                &format!("feature holds {} data", self.dtype),
            ));
        }
        let len = self.element_count();
        let ptr = self.data_ptr();
        if len == 0 {
            return Ok(String::new());
        }
        if ptr.is_null() {
            return Err(EdgeError::null_handle("feature data"));
        }
        // SAFETY: string features expose `len` bytes that live as long as the handle
        let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
        String::from_utf8(bytes.to_vec())
            .map_err(|e| EdgeError::InvalidOperation(format!("feature text is not UTF-8: {}", e)))
    }
}

impl Drop for NativeFeature {
    fn drop(&mut self) {
        tracing::trace!(engine = self.engine.name(), handle = ?self.handle, "releasing feature");
        // SAFETY: the handle came from `self.engine` and is owned by this wrapper alone
        unsafe { self.engine.release_feature(self.handle) };
    }
}

impl fmt::Debug for NativeFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFeature")
            .field("engine", &self.engine.name())
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("dtype", &self.dtype)
            .field("shape", &self.shape)
            .finish()
    }
}

/// Engine feature created for one prediction from caller data.
///
/// `'f` ties the feature to the buffer it may read in place, so a no-copy
/// feature can never outlive its data.
#[derive(Debug)]
pub struct NativeInput<'f> {
    feature: NativeFeature,
    _borrow: PhantomData<&'f [u8]>,
}

impl<'f> NativeInput<'f> {
    /// Create an array feature over `bytes` with the given resolved shape
    pub fn array(
        engine: &Arc<dyn Engine>,
        bytes: &'f [u8],
        dims: &[usize],
        dtype: DType,
        mode: CopyMode,
    ) -> EdgeResult<Self> {
        let handle = create_array_handle(engine, bytes, dims, dtype, mode)?;
        Self::from_handle(engine, handle)
    }

    /// Create an array feature from a copy of `bytes`
    pub fn copied(engine: &Arc<dyn Engine>, bytes: &[u8], dims: &[usize], dtype: DType) -> EdgeResult<Self> {
        let handle = create_array_handle(engine, bytes, dims, dtype, CopyMode::Copy)?;
        Self::from_handle(engine, handle)
    }

    /// Create an image feature. Pixels are copied, so any lifetime works.
    pub fn image(engine: &Arc<dyn Engine>, request: &ImageRequest<'_>) -> EdgeResult<Self> {
        tracing::debug!(
            engine = engine.name(),
            width = request.width,
            height = request.height,
            shape = ?request.shape,
            "creating image feature"
        );
        let handle = engine
            .create_image_feature(request)
            .ok_or_else(|| EdgeError::null_handle("create image feature"))?;
        Self::from_handle(engine, handle)
    }

    /// Create an audio feature. Samples are copied.
    pub fn audio(engine: &Arc<dyn Engine>, request: &AudioRequest<'_>) -> EdgeResult<Self> {
        tracing::debug!(
            engine = engine.name(),
            sample_rate = request.sample_rate,
            channels = request.channel_count,
            "creating audio feature"
        );
        let handle = engine
            .create_audio_feature(request)
            .ok_or_else(|| EdgeError::null_handle("create audio feature"))?;
        Self::from_handle(engine, handle)
    }

    fn from_handle(engine: &Arc<dyn Engine>, handle: FeatureHandle) -> EdgeResult<Self> {
        Ok(Self {
            feature: NativeFeature::from_handle(engine.clone(), handle)?,
            _borrow: PhantomData,
        })
    }

    pub fn handle(&self) -> FeatureHandle {
        self.feature.handle()
    }

    pub fn feature(&self) -> &NativeFeature {
        &self.feature
    }
}

impl NativeInput<'static> {
    /// Detach a feature that borrows nothing
    pub fn into_feature(self) -> NativeFeature {
        self.feature
    }
}

fn create_array_handle(
    engine: &Arc<dyn Engine>,
    bytes: &[u8],
    dims: &[usize],
    dtype: DType,
    mode: CopyMode,
) -> EdgeResult<FeatureHandle> {
    let count = shape::checked_element_count(dims.iter())?;
    let required = if dtype == DType::String {
        count
    } else {
        count
            .checked_mul(dtype.size())
            .ok_or_else(|| EdgeError::shape_error(&shape::to_signed(dims), "byte length overflows usize"))?
    };
    if dtype != DType::String && !dtype.is_tensor() {
        return Err(EdgeError::operation_error(
            "create feature",
            &format!("{} is not an array data type", dtype),
        ));
    }
    if bytes.len() < required {
        return Err(EdgeError::ElementCountMismatch {
            expected: bytes.len() / dtype.size().max(1),
            actual: count,
        });
    }
    let native_shape = to_native_shape(dims)?;
    tracing::debug!(
        engine = engine.name(),
        dtype = %dtype,
        shape = ?dims,
        mode = ?mode,
        "creating array feature"
    );
    // SAFETY: `bytes` holds at least `required` bytes. Callers bound the
    // feature's lifetime by the borrow of `bytes` unless `mode` copies.
    unsafe { engine.create_array_feature(bytes.as_ptr(), &native_shape, dtype, mode) }
        .ok_or_else(|| EdgeError::null_handle("create array feature"))
}

fn to_native_shape(dims: &[usize]) -> EdgeResult<Vec<i32>> {
    dims.iter()
        .map(|&d| i32::try_from(d))
        .collect::<Result<_, _>>()
        .map_err(|_| EdgeError::InvalidShape(format!("shape {:?} exceeds the engine's axis range", dims)))
}
