//! Bindings to the NatML shared library
//!
//! Only built with the `native` feature. Link against `libNatML` from the
//! platform plugin directory.

use std::ffi::{c_void, CStr};

use libc::{c_char, c_float, c_int};

use crate::tensor::DType;
use super::engine::{
    AudioRequest, CopyMode, Engine, FeatureHandle, ImageRequest, ModelHandle, ModelOptions,
    NativeType,
};

const STRING_CAPACITY: usize = 2048;
const METADATA_CAPACITY: usize = 8192;

#[link(name = "NatML")]
extern "C" {
    fn NMLCreateModelOptions(options: *mut *mut c_void);
    fn NMLReleaseModelOptions(options: *mut c_void);
    fn NMLModelOptionsSetComputeTarget(options: *mut c_void, target: c_int);

    fn NMLCreateModel(buffer: *const c_void, size: c_int, options: *mut c_void, model: *mut *mut c_void);
    fn NMLReleaseModel(model: *mut c_void);
    fn NMLModelGetMetadataCount(model: *mut c_void) -> c_int;
    fn NMLModelGetMetadataKey(model: *mut c_void, index: c_int, key: *mut c_char, size: c_int);
    fn NMLModelGetMetadataValue(model: *mut c_void, key: *const c_char, value: *mut c_char, size: c_int);
    fn NMLModelGetInputFeatureCount(model: *mut c_void) -> c_int;
    fn NMLModelGetInputFeatureType(model: *mut c_void, index: c_int, ty: *mut *mut c_void);
    fn NMLModelGetOutputFeatureCount(model: *mut c_void) -> c_int;
    fn NMLModelGetOutputFeatureType(model: *mut c_void, index: c_int, ty: *mut *mut c_void);
    fn NMLModelPredict(model: *mut c_void, inputs: *const *mut c_void, outputs: *mut *mut c_void);

    fn NMLReleaseFeature(feature: *mut c_void);
    fn NMLFeatureGetType(feature: *mut c_void, ty: *mut *mut c_void);
    fn NMLFeatureGetData(feature: *mut c_void) -> *mut c_void;
    fn NMLCreateArrayFeature(
        data: *mut c_void,
        shape: *const c_int,
        dims: c_int,
        dtype: c_int,
        flags: c_int,
        feature: *mut *mut c_void,
    );
    fn NMLCreateImageFeature(
        pixels: *const u8,
        width: c_int,
        height: c_int,
        shape: *const c_int,
        dtype: c_int,
        mean: *const c_float,
        std: *const c_float,
        flags: c_int,
        feature: *mut *mut c_void,
    );
    fn NMLCreateAudioFeature(
        samples: *const c_float,
        buffer_sample_rate: c_int,
        buffer_shape: *const c_int,
        sample_rate: c_int,
        channel_count: c_int,
        dtype: c_int,
        mean: *const c_float,
        std: *const c_float,
        flags: c_int,
        feature: *mut *mut c_void,
    );

    fn NMLReleaseFeatureType(ty: *mut c_void);
    fn NMLFeatureTypeGetName(ty: *mut c_void, name: *mut c_char, size: c_int);
    fn NMLFeatureTypeGetDataType(ty: *mut c_void) -> c_int;
    fn NMLFeatureTypeGetDimensions(ty: *mut c_void) -> c_int;
    fn NMLFeatureTypeGetShape(ty: *mut c_void, shape: *mut c_int, len: c_int);
}

/// Image flags share bit positions with the array copy flag
const IMAGE_FLAG_ASPECT_FILL: c_int = 1;
const IMAGE_FLAG_ASPECT_FIT: c_int = 4;

/// Engine backed by the NatML runtime
#[derive(Debug, Default)]
pub struct NatEngine;

impl NatEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Read a NUL-terminated string written by the library into `buffer`
fn read_string(buffer: &[c_char]) -> String {
    // SAFETY: the buffer is zero-initialised and one byte longer than the size
    // passed to the library, so it always holds a terminator.
    unsafe { CStr::from_ptr(buffer.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// Marshal and release a native feature type
unsafe fn take_type(ty: *mut c_void) -> Option<NativeType> {
    if ty.is_null() {
        return None;
    }
    let mut name = vec![0 as c_char; STRING_CAPACITY + 1];
    NMLFeatureTypeGetName(ty, name.as_mut_ptr(), STRING_CAPACITY as c_int);
    let name = read_string(&name);
    let dtype = DType::from_code(NMLFeatureTypeGetDataType(ty)).unwrap_or(DType::Undefined);
    let dims = NMLFeatureTypeGetDimensions(ty).max(0);
    let mut shape = vec![0 as c_int; dims as usize];
    NMLFeatureTypeGetShape(ty, shape.as_mut_ptr(), dims);
    NMLReleaseFeatureType(ty);
    Some(NativeType {
        name: (!name.is_empty()).then_some(name),
        dtype,
        shape,
    })
}

impl Engine for NatEngine {
    fn name(&self) -> &str {
        "natml"
    }

    unsafe fn create_array_feature(
        &self,
        data: *const u8,
        shape: &[i32],
        dtype: DType,
        mode: CopyMode,
    ) -> Option<FeatureHandle> {
        let mut feature = std::ptr::null_mut();
        NMLCreateArrayFeature(
            data as *mut c_void,
            shape.as_ptr(),
            shape.len() as c_int,
            dtype.code(),
            mode as c_int,
            &mut feature,
        );
        FeatureHandle::from_ptr(feature)
    }

    fn create_image_feature(&self, request: &ImageRequest<'_>) -> Option<FeatureHandle> {
        if request.pixels.len() < request.width * request.height * 4 || request.shape.len() != 4 {
            return None;
        }
        let flags = match request.aspect_mode {
            super::AspectMode::ScaleToFit => 0,
            super::AspectMode::AspectFill => IMAGE_FLAG_ASPECT_FILL,
            super::AspectMode::AspectFit => IMAGE_FLAG_ASPECT_FIT,
        };
        let mut feature = std::ptr::null_mut();
        // SAFETY: pixel and shape lengths were checked above; the library copies them
        unsafe {
            NMLCreateImageFeature(
                request.pixels.as_ptr(),
                request.width as c_int,
                request.height as c_int,
                request.shape.as_ptr(),
                request.dtype.code(),
                request.mean.as_ptr(),
                request.std.as_ptr(),
                flags,
                &mut feature,
            );
        }
        FeatureHandle::from_ptr(feature)
    }

    fn create_audio_feature(&self, request: &AudioRequest<'_>) -> Option<FeatureHandle> {
        let frames = usize::try_from(request.buffer_shape[1]).ok()?;
        let channels = usize::try_from(request.buffer_shape[2]).ok()?;
        if request.samples.len() < frames * channels {
            return None;
        }
        let mut feature = std::ptr::null_mut();
        // SAFETY: the sample buffer covers the buffer shape; the library copies it
        unsafe {
            NMLCreateAudioFeature(
                request.samples.as_ptr(),
                request.buffer_sample_rate as c_int,
                request.buffer_shape.as_ptr(),
                request.sample_rate as c_int,
                request.channel_count as c_int,
                request.dtype.code(),
                request.mean.as_ptr(),
                request.std.as_ptr(),
                0,
                &mut feature,
            );
        }
        FeatureHandle::from_ptr(feature)
    }

    unsafe fn release_feature(&self, feature: FeatureHandle) {
        NMLReleaseFeature(feature.as_ptr());
    }

    fn feature_type(&self, feature: FeatureHandle) -> Option<NativeType> {
        let mut ty = std::ptr::null_mut();
        // SAFETY: `feature` is a live handle from this library
        unsafe {
            NMLFeatureGetType(feature.as_ptr(), &mut ty);
            take_type(ty)
        }
    }

    fn feature_data(&self, feature: FeatureHandle) -> *const u8 {
        // SAFETY: `feature` is a live handle from this library
        unsafe { NMLFeatureGetData(feature.as_ptr()) as *const u8 }
    }

    fn create_model(&self, graph: &[u8], options: &ModelOptions) -> Option<ModelHandle> {
        let size = c_int::try_from(graph.len()).ok()?;
        let mut model = std::ptr::null_mut();
        // SAFETY: options are created and released around the call; the graph
        // buffer is read during `NMLCreateModel` only.
        unsafe {
            let mut native_options = std::ptr::null_mut();
            NMLCreateModelOptions(&mut native_options);
            if !native_options.is_null() {
                NMLModelOptionsSetComputeTarget(native_options, options.compute_target as c_int);
            }
            NMLCreateModel(graph.as_ptr() as *const c_void, size, native_options, &mut model);
            if !native_options.is_null() {
                NMLReleaseModelOptions(native_options);
            }
        }
        ModelHandle::from_ptr(model)
    }

    unsafe fn release_model(&self, model: ModelHandle) {
        NMLReleaseModel(model.as_ptr());
    }

    fn input_types(&self, model: ModelHandle) -> Vec<NativeType> {
        // SAFETY: `model` is a live handle; each type is released by `take_type`
        unsafe {
            let count = NMLModelGetInputFeatureCount(model.as_ptr()).max(0);
            (0..count)
                .map(|i| {
                    let mut ty = std::ptr::null_mut();
                    NMLModelGetInputFeatureType(model.as_ptr(), i, &mut ty);
                    take_type(ty).unwrap_or_else(|| {
                        tracing::warn!(index = i, "engine reported no input feature type");
                        NativeType::undefined()
                    })
                })
                .collect()
        }
    }

    fn output_types(&self, model: ModelHandle) -> Vec<NativeType> {
        // SAFETY: as in `input_types`
        unsafe {
            let count = NMLModelGetOutputFeatureCount(model.as_ptr()).max(0);
            (0..count)
                .map(|i| {
                    let mut ty = std::ptr::null_mut();
                    NMLModelGetOutputFeatureType(model.as_ptr(), i, &mut ty);
                    take_type(ty).unwrap_or_else(|| {
                        tracing::warn!(index = i, "engine reported no output feature type");
                        NativeType::undefined()
                    })
                })
                .collect()
        }
    }

    fn metadata(&self, model: ModelHandle) -> Vec<(String, String)> {
        let mut key = vec![0 as c_char; METADATA_CAPACITY + 1];
        let mut value = vec![0 as c_char; METADATA_CAPACITY + 1];
        // SAFETY: buffers are one byte larger than the size handed to the library
        unsafe {
            let count = NMLModelGetMetadataCount(model.as_ptr()).max(0);
            (0..count)
                .map(|i| {
                    key.fill(0);
                    value.fill(0);
                    NMLModelGetMetadataKey(model.as_ptr(), i, key.as_mut_ptr(), METADATA_CAPACITY as c_int);
                    NMLModelGetMetadataValue(
                        model.as_ptr(),
                        key.as_ptr(),
                        value.as_mut_ptr(),
                        METADATA_CAPACITY as c_int,
                    );
                    (read_string(&key), read_string(&value))
                })
                .collect()
        }
    }

    fn predict(&self, model: ModelHandle, inputs: &[FeatureHandle]) -> Vec<Option<FeatureHandle>> {
        // SAFETY: `model` and every input are live handles; the output array has
        // one slot per declared output.
        unsafe {
            let count = NMLModelGetOutputFeatureCount(model.as_ptr()).max(0) as usize;
            let inputs: Vec<*mut c_void> = inputs.iter().map(FeatureHandle::as_ptr).collect();
            let mut outputs = vec![std::ptr::null_mut(); count];
            NMLModelPredict(model.as_ptr(), inputs.as_ptr(), outputs.as_mut_ptr());
            outputs.into_iter().map(FeatureHandle::from_ptr).collect()
        }
    }
}
