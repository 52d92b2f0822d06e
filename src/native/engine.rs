//! Handle-based inference engine boundary
//!
//! Every call is synchronous. Handles returned by one engine are only valid with
//! that engine, and a model handle must not be used from two threads at once.

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

use serde::{Deserialize, Serialize};

use crate::tensor::DType;

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(NonNull<c_void>);

        impl $name {
            /// Wrap a raw engine pointer; a null pointer yields `None`
            pub fn from_ptr(ptr: *mut c_void) -> Option<Self> {
                NonNull::new(ptr).map(Self)
            }

            pub fn as_ptr(&self) -> *mut c_void {
                self.0.as_ptr()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:p})", stringify!($name), self.0)
            }
        }

        // Handles are plain tokens; thread-safety of the object behind them is
        // governed by the engine contract, not by the token.
        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}
    };
}

opaque_handle! {
    /// Engine feature handle
    FeatureHandle
}

opaque_handle! {
    /// Engine model handle
    ModelHandle
}

/// Whether the engine copies the caller's buffer or reads it in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CopyMode {
    /// Engine reads the buffer directly; the buffer must outlive the feature
    NoCopy = 0,
    /// Engine copies the buffer during creation
    Copy = 1,
}

/// How an image is fitted into the model's expected width and height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum AspectMode {
    /// Stretch to fill, ignoring aspect ratio
    #[default]
    ScaleToFit = 0,
    /// Scale to cover and crop the overflow
    AspectFill = 1,
    /// Scale to fit inside and pad the remainder
    AspectFit = 2,
}

/// Preferred hardware for predictions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum ComputeTarget {
    #[default]
    All = 0,
    CpuOnly = 1,
}

/// Model creation options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelOptions {
    pub compute_target: ComputeTarget,
}

/// Feature type as reported by the engine, before interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeType {
    pub name: Option<String>,
    pub dtype: DType,
    pub shape: Vec<i32>,
}

impl NativeType {
    /// Placeholder for a slot whose type the engine could not report
    pub fn undefined() -> Self {
        Self {
            name: None,
            dtype: DType::Undefined,
            shape: Vec::new(),
        }
    }
}

/// Pixel data and normalization for an image feature
#[derive(Debug, Clone, Copy)]
pub struct ImageRequest<'a> {
    /// RGBA8888 pixels, `width * height * 4` bytes
    pub pixels: &'a [u8],
    pub width: usize,
    pub height: usize,
    /// Target shape, rank 4
    pub shape: &'a [i32],
    pub dtype: DType,
    pub mean: [f32; 4],
    pub std: [f32; 4],
    pub aspect_mode: AspectMode,
}

/// Sample data and normalization for an audio feature
#[derive(Debug, Clone, Copy)]
pub struct AudioRequest<'a> {
    /// Interleaved linear PCM
    pub samples: &'a [f32],
    pub buffer_sample_rate: u32,
    /// Buffer shape `(1, frames, channels)`
    pub buffer_shape: [i32; 3],
    pub sample_rate: u32,
    pub channel_count: usize,
    pub dtype: DType,
    pub mean: [f32; 4],
    pub std: [f32; 4],
}

/// Native inference engine.
///
/// Creation calls return `None` when the engine produced a null handle.
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;

    /// Create an array feature over `data`.
    ///
    /// # Safety
    /// `data` must be valid for reads of `product(shape) * dtype.size()` bytes
    /// (or the string byte length for `DType::String`). With
    /// [`CopyMode::NoCopy`] it must stay valid and unchanged until the
    /// returned feature is released.
    unsafe fn create_array_feature(
        &self,
        data: *const u8,
        shape: &[i32],
        dtype: DType,
        mode: CopyMode,
    ) -> Option<FeatureHandle>;

    /// Create an image feature. The engine always copies the pixels.
    fn create_image_feature(&self, request: &ImageRequest<'_>) -> Option<FeatureHandle>;

    /// Create an audio feature. The engine always copies the samples.
    fn create_audio_feature(&self, request: &AudioRequest<'_>) -> Option<FeatureHandle>;

    /// Release a feature.
    ///
    /// # Safety
    /// `feature` must come from this engine and must not be used afterwards.
    unsafe fn release_feature(&self, feature: FeatureHandle);

    fn feature_type(&self, feature: FeatureHandle) -> Option<NativeType>;

    /// Pointer to the feature's data, valid until the feature is released
    fn feature_data(&self, feature: FeatureHandle) -> *const u8;

    fn create_model(&self, graph: &[u8], options: &ModelOptions) -> Option<ModelHandle>;

    /// Release a model.
    ///
    /// # Safety
    /// `model` must come from this engine and must not be used afterwards.
    unsafe fn release_model(&self, model: ModelHandle);

    fn input_types(&self, model: ModelHandle) -> Vec<NativeType>;

    fn output_types(&self, model: ModelHandle) -> Vec<NativeType>;

    fn metadata(&self, model: ModelHandle) -> Vec<(String, String)>;

    /// Run a prediction. The result has one slot per declared output; a `None`
    /// slot is a null output handle.
    fn predict(&self, model: ModelHandle, inputs: &[FeatureHandle]) -> Vec<Option<FeatureHandle>>;
}
