//! In-process engine backed by Rust kernels
//!
//! Features are heap-allocated [`HostTensor`]s and models are [`HostGraph`]s
//! registered under a name. `create_model` reads the graph bytes as that name.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{EdgeError, EdgeResult};
use crate::tensor::{shape, DType, Element};
use super::engine::{
    AspectMode, AudioRequest, CopyMode, Engine, FeatureHandle, ImageRequest, ModelHandle,
    ModelOptions, NativeType,
};

/// Kernel run by a host model
pub type HostKernel = dyn Fn(&[&HostTensor]) -> EdgeResult<Vec<HostTensor>> + Send + Sync;

enum HostData {
    /// Word-backed so every element type is aligned
    Owned { words: Vec<u64>, len: usize },
    /// Caller buffer read in place
    Borrowed { ptr: *const u8, len: usize },
}

/// Feature data held by the host engine
pub struct HostTensor {
    name: Option<String>,
    dtype: DType,
    shape: Vec<i32>,
    data: HostData,
}

impl HostTensor {
    /// Owned tensor holding a copy of `bytes`
    pub fn from_bytes(dtype: DType, shape: &[i32], bytes: &[u8]) -> Self {
        let mut words = vec![0u64; (bytes.len() + 7) / 8];
        bytemuck::cast_slice_mut::<u64, u8>(&mut words)[..bytes.len()].copy_from_slice(bytes);
        Self {
            name: None,
            dtype,
            shape: shape.to_vec(),
            data: HostData::Owned { words, len: bytes.len() },
        }
    }

    /// Owned tensor holding `values`
    pub fn from_values<T: Element>(shape: &[i32], values: &[T]) -> Self {
        Self::from_bytes(T::DTYPE, shape, bytemuck::cast_slice(values))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[i32] {
        &self.shape
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.data {
            HostData::Owned { words, len } => &bytemuck::cast_slice::<u64, u8>(words)[..*len],
            HostData::Borrowed { len: 0, .. } => &[],
            // SAFETY: borrowed data was created with `CopyMode::NoCopy`, whose
            // contract keeps `len` bytes valid until this tensor is released.
            HostData::Borrowed { ptr, len } => unsafe { std::slice::from_raw_parts(*ptr, *len) },
        }
    }

    /// Copy out the elements as `T`
    pub fn values<T: Element>(&self) -> EdgeResult<Vec<T>> {
        if self.dtype != T::DTYPE {
            return Err(EdgeError::InvalidOperation(format!(
                "host tensor holds {} data, not {}",
                self.dtype,
                T::DTYPE
            )));
        }
        let bytes = self.bytes();
        let mut out = vec![T::zeroed(); bytes.len() / std::mem::size_of::<T>()];
        let filled = out.len() * std::mem::size_of::<T>();
        bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&bytes[..filled]);
        Ok(out)
    }

    fn native_type(&self) -> NativeType {
        NativeType {
            name: self.name.clone(),
            dtype: self.dtype,
            shape: self.shape.clone(),
        }
    }

    fn data_ptr(&self) -> *const u8 {
        match &self.data {
            HostData::Owned { words, .. } => words.as_ptr() as *const u8,
            HostData::Borrowed { ptr, .. } => *ptr,
        }
    }
}

/// Declared signature and kernel of a host model
pub struct HostGraph {
    inputs: Vec<NativeType>,
    outputs: Vec<NativeType>,
    metadata: Vec<(String, String)>,
    kernel: Box<HostKernel>,
}

impl HostGraph {
    pub fn new<F>(kernel: F) -> Self
    where
        F: Fn(&[&HostTensor]) -> EdgeResult<Vec<HostTensor>> + Send + Sync + 'static,
    {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            metadata: Vec::new(),
            kernel: Box::new(kernel),
        }
    }

    pub fn input(mut self, name: &str, dtype: DType, shape: &[i32]) -> Self {
        self.inputs.push(declared(name, dtype, shape));
        self
    }

    pub fn output(mut self, name: &str, dtype: DType, shape: &[i32]) -> Self {
        self.outputs.push(declared(name, dtype, shape));
        self
    }

    pub fn metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.push((key.to_string(), value.to_string()));
        self
    }
}

fn declared(name: &str, dtype: DType, shape: &[i32]) -> NativeType {
    NativeType {
        name: Some(name.to_string()),
        dtype,
        shape: shape.to_vec(),
    }
}

/// Engine that runs registered Rust kernels in process
#[derive(Default)]
pub struct HostEngine {
    graphs: RwLock<HashMap<String, Arc<HostGraph>>>,
}

impl HostEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a graph; `create_model` with the bytes of `name` loads it
    pub fn register(&self, name: &str, graph: HostGraph) {
        tracing::debug!(graph = name, inputs = graph.inputs.len(), outputs = graph.outputs.len(), "registering host graph");
        self.graphs.write().insert(name.to_string(), Arc::new(graph));
    }

    fn boxed(tensor: HostTensor) -> Option<FeatureHandle> {
        FeatureHandle::from_ptr(Box::into_raw(Box::new(tensor)) as *mut c_void)
    }

    fn tensor(&self, feature: FeatureHandle) -> &HostTensor {
        // SAFETY: handles given to this engine were produced by `boxed` and stay
        // allocated until `release_feature`.
        unsafe { &*(feature.as_ptr() as *const HostTensor) }
    }

    fn graph(&self, model: ModelHandle) -> &HostGraph {
        // SAFETY: model handles are boxed `Arc<HostGraph>`s alive until `release_model`
        unsafe { &*(model.as_ptr() as *const Arc<HostGraph>) }
    }
}

impl Engine for HostEngine {
    fn name(&self) -> &str {
        "host"
    }

    unsafe fn create_array_feature(
        &self,
        data: *const u8,
        shape: &[i32],
        dtype: DType,
        mode: CopyMode,
    ) -> Option<FeatureHandle> {
        let dims: Vec<usize> = shape.iter().map(|&d| usize::try_from(d).ok()).collect::<Option<_>>()?;
        let count = shape::checked_element_count(dims.iter()).ok()?;
        let len = match dtype {
            DType::String => count,
            _ if dtype.is_tensor() => count.checked_mul(dtype.size())?,
            _ => return None,
        };
        if len > 0 && data.is_null() {
            return None;
        }
        let tensor = match mode {
            CopyMode::Copy if len == 0 => HostTensor::from_bytes(dtype, shape, &[]),
            CopyMode::Copy => HostTensor::from_bytes(dtype, shape, std::slice::from_raw_parts(data, len)),
            CopyMode::NoCopy => HostTensor {
                name: None,
                dtype,
                shape: shape.to_vec(),
                data: HostData::Borrowed { ptr: data, len },
            },
        };
        Self::boxed(tensor)
    }

    fn create_image_feature(&self, request: &ImageRequest<'_>) -> Option<FeatureHandle> {
        let values = resample_image(request)?;
        let tensor = match request.dtype {
            DType::F32 => HostTensor::from_values(request.shape, &values),
            DType::U8 => {
                let bytes: Vec<u8> = values.iter().map(|&v| v.clamp(0.0, 255.0) as u8).collect();
                HostTensor::from_values(request.shape, &bytes)
            }
            _ => return None,
        };
        Self::boxed(tensor)
    }

    fn create_audio_feature(&self, request: &AudioRequest<'_>) -> Option<FeatureHandle> {
        if request.dtype != DType::F32 {
            return None;
        }
        if request.sample_rate != request.buffer_sample_rate {
            tracing::warn!(
                buffer = request.buffer_sample_rate,
                target = request.sample_rate,
                "host engine does not resample audio"
            );
            return None;
        }
        let frames = usize::try_from(request.buffer_shape[1]).ok()?;
        let channels = usize::try_from(request.buffer_shape[2]).ok()?;
        if channels != request.channel_count || channels == 0 || channels > 4 {
            return None;
        }
        if request.samples.len() < frames * channels {
            return None;
        }
        let mut planar = vec![0.0f32; frames * channels];
        for c in 0..channels {
            let (mean, std) = (request.mean[c], request.std[c]);
            for f in 0..frames {
                planar[c * frames + f] = (request.samples[f * channels + c] - mean) / std;
            }
        }
        let shape = [1, channels as i32, frames as i32];
        Self::boxed(HostTensor::from_values(&shape, &planar))
    }

    unsafe fn release_feature(&self, feature: FeatureHandle) {
        drop(Box::from_raw(feature.as_ptr() as *mut HostTensor));
    }

    fn feature_type(&self, feature: FeatureHandle) -> Option<NativeType> {
        Some(self.tensor(feature).native_type())
    }

    fn feature_data(&self, feature: FeatureHandle) -> *const u8 {
        self.tensor(feature).data_ptr()
    }

    fn create_model(&self, graph: &[u8], options: &ModelOptions) -> Option<ModelHandle> {
        let name = std::str::from_utf8(graph).ok()?.trim();
        let graph = self.graphs.read().get(name).cloned();
        let Some(graph) = graph else {
            tracing::warn!(graph = name, "no host graph registered under this name");
            return None;
        };
        tracing::debug!(graph = name, target = ?options.compute_target, "created host model");
        ModelHandle::from_ptr(Box::into_raw(Box::new(graph)) as *mut c_void)
    }

    unsafe fn release_model(&self, model: ModelHandle) {
        drop(Box::from_raw(model.as_ptr() as *mut Arc<HostGraph>));
    }

    fn input_types(&self, model: ModelHandle) -> Vec<NativeType> {
        self.graph(model).inputs.clone()
    }

    fn output_types(&self, model: ModelHandle) -> Vec<NativeType> {
        self.graph(model).outputs.clone()
    }

    fn metadata(&self, model: ModelHandle) -> Vec<(String, String)> {
        self.graph(model).metadata.clone()
    }

    fn predict(&self, model: ModelHandle, inputs: &[FeatureHandle]) -> Vec<Option<FeatureHandle>> {
        let graph = self.graph(model);
        let mut slots: Vec<Option<FeatureHandle>> = vec![None; graph.outputs.len()];
        let tensors: Vec<&HostTensor> = inputs.iter().map(|&h| self.tensor(h)).collect();
        match (graph.kernel)(&tensors) {
            Ok(outputs) => {
                for (slot, (tensor, declared)) in slots.iter_mut().zip(outputs.into_iter().zip(&graph.outputs)) {
                    let tensor = match tensor.name {
                        Some(_) => tensor,
                        None => HostTensor { name: declared.name.clone(), ..tensor },
                    };
                    *slot = Self::boxed(tensor);
                }
            }
            Err(err) => tracing::warn!(error = %err, "host kernel failed"),
        }
        slots
    }
}

/// Nearest-neighbour resample of RGBA pixels into the request shape, normalized
/// per channel. Returns values in the layout the shape implies.
fn resample_image(request: &ImageRequest<'_>) -> Option<Vec<f32>> {
    let (width, height) = (request.width, request.height);
    let pixel_bytes = width.checked_mul(height)?.checked_mul(4)?;
    if request.shape.len() != 4 || width == 0 || height == 0 || request.pixels.len() < pixel_bytes {
        return None;
    }
    let dims: Vec<usize> = request.shape.iter().map(|&d| usize::try_from(d).ok()).collect::<Option<_>>()?;
    let interleaved = dims[1] > dims[3];
    let (out_h, out_w, channels) = if interleaved {
        (dims[1], dims[2], dims[3])
    } else {
        (dims[2], dims[3], dims[1])
    };
    if channels == 0 || channels > 4 || out_w == 0 || out_h == 0 {
        return None;
    }

    let (sx, sy) = (out_w as f32 / width as f32, out_h as f32 / height as f32);
    let (scale_x, scale_y) = match request.aspect_mode {
        AspectMode::ScaleToFit => (sx, sy),
        AspectMode::AspectFill => (sx.max(sy), sx.max(sy)),
        AspectMode::AspectFit => (sx.min(sy), sx.min(sy)),
    };
    let offset_x = (out_w as f32 - width as f32 * scale_x) / 2.0;
    let offset_y = (out_h as f32 - height as f32 * scale_y) / 2.0;
    let normalize = request.dtype == DType::F32;

    let mut out = vec![0.0f32; out_w.checked_mul(out_h)?.checked_mul(channels)?];
    for y in 0..out_h {
        let src_y = ((y as f32 + 0.5 - offset_y) / scale_y).floor();
        for x in 0..out_w {
            let src_x = ((x as f32 + 0.5 - offset_x) / scale_x).floor();
            let inside = src_x >= 0.0 && src_y >= 0.0 && (src_x as usize) < width && (src_y as usize) < height;
            let pixel = if inside {
                let base = ((src_y as usize) * width + src_x as usize) * 4;
                &request.pixels[base..base + 4]
            } else {
                &[0u8; 4][..]
            };
            for c in 0..channels {
                let raw = pixel[c] as f32;
                let value = if normalize {
                    (raw / 255.0 - request.mean[c]) / request.std[c]
                } else {
                    raw
                };
                let index = if interleaved {
                    (y * out_w + x) * channels + c
                } else {
                    (c * out_h + y) * out_w + x
                };
                out[index] = value;
            }
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_request<'a>(pixels: &'a [u8], shape: &'a [i32], mode: AspectMode) -> ImageRequest<'a> {
        ImageRequest {
            pixels,
            width: 2,
            height: 2,
            shape,
            dtype: DType::F32,
            mean: [0.0; 4],
            std: [1.0; 4],
            aspect_mode: mode,
        }
    }

    #[test]
    fn test_no_copy_reads_in_place() {
        let engine = HostEngine::new();
        let data = [1.0f32, 2.0];
        let handle = unsafe {
            engine.create_array_feature(data.as_ptr() as *const u8, &[2], DType::F32, CopyMode::NoCopy)
        }
        .unwrap();
        assert_eq!(engine.feature_data(handle), data.as_ptr() as *const u8);
        let ty = engine.feature_type(handle).unwrap();
        assert_eq!(ty.shape, vec![2]);
        assert_eq!(ty.dtype, DType::F32);
        unsafe { engine.release_feature(handle) };
    }

    #[test]
    fn test_rejects_non_array_dtypes() {
        let engine = HostEngine::new();
        let data = [0u8; 4];
        let handle = unsafe { engine.create_array_feature(data.as_ptr(), &[4], DType::Sequence, CopyMode::Copy) };
        assert!(handle.is_none());
        let handle = unsafe { engine.create_array_feature(data.as_ptr(), &[-1], DType::U8, CopyMode::Copy) };
        assert!(handle.is_none());
    }

    #[test]
    fn test_oversized_image_is_rejected() {
        let engine = HostEngine::new();
        let pixels = [0u8; 16];
        let mut request = image_request(&pixels, &[1, 3, 2, 2], AspectMode::ScaleToFit);
        request.width = usize::MAX / 2;
        assert!(engine.create_image_feature(&request).is_none());
    }

    #[test]
    fn test_planar_image_normalization() {
        let engine = HostEngine::new();
        // 2x2 RGBA: red, green, blue, white
        let pixels = [
            255, 0, 0, 255, 0, 255, 0, 255,
            0, 0, 255, 255, 255, 255, 255, 255,
        ];
        let mut request = image_request(&pixels, &[1, 3, 2, 4], AspectMode::ScaleToFit);
        request.mean = [0.5, 0.5, 0.5, 0.0];
        request.std = [0.5, 0.5, 0.5, 1.0];
        let handle = engine.create_image_feature(&request).unwrap();
        let values = engine.tensor(handle).values::<f32>().unwrap();
        assert_eq!(values.len(), 24);
        // red plane, stretched horizontally
        assert_eq!(&values[0..8], &[1.0, 1.0, -1.0, -1.0, -1.0, -1.0, 1.0, 1.0]);
        // blue plane
        assert_eq!(&values[16..24], &[-1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0]);
        unsafe { engine.release_feature(handle) };
    }

    #[test]
    fn test_interleaved_image_upscale() {
        let engine = HostEngine::new();
        let pixels = [
            10, 0, 0, 0, 20, 0, 0, 0,
            30, 0, 0, 0, 40, 0, 0, 0,
        ];
        let mut request = image_request(&pixels, &[1, 4, 4, 1], AspectMode::ScaleToFit);
        request.dtype = DType::U8;
        let handle = engine.create_image_feature(&request).unwrap();
        let values = engine.tensor(handle).values::<u8>().unwrap();
        assert_eq!(values, vec![10, 10, 20, 20, 10, 10, 20, 20, 30, 30, 40, 40, 30, 30, 40, 40]);
        unsafe { engine.release_feature(handle) };
    }

    #[test]
    fn test_aspect_fit_pads() {
        let engine = HostEngine::new();
        let pixels = [255u8; 16];
        let mut request = image_request(&pixels, &[1, 1, 4, 2], AspectMode::AspectFit);
        request.dtype = DType::U8;
        let handle = engine.create_image_feature(&request).unwrap();
        let values = engine.tensor(handle).values::<u8>().unwrap();
        assert_eq!(values, vec![0, 0, 255, 255, 255, 255, 0, 0]);
        unsafe { engine.release_feature(handle) };
    }

    #[test]
    fn test_audio_is_deinterleaved() {
        let engine = HostEngine::new();
        let samples = [1.0f32, -1.0, 2.0, -2.0, 3.0, -3.0];
        let request = AudioRequest {
            samples: &samples,
            buffer_sample_rate: 16_000,
            buffer_shape: [1, 3, 2],
            sample_rate: 16_000,
            channel_count: 2,
            dtype: DType::F32,
            mean: [0.0; 4],
            std: [1.0; 4],
        };
        let handle = engine.create_audio_feature(&request).unwrap();
        let tensor = engine.tensor(handle);
        assert_eq!(tensor.shape(), &[1, 2, 3]);
        assert_eq!(tensor.values::<f32>().unwrap(), vec![1.0, 2.0, 3.0, -1.0, -2.0, -3.0]);
        unsafe { engine.release_feature(handle) };

        let resampled = AudioRequest { sample_rate: 44_100, ..request };
        assert!(engine.create_audio_feature(&resampled).is_none());
    }

    #[test]
    fn test_registered_graph_predicts() {
        let engine = HostEngine::new();
        engine.register(
            "double",
            HostGraph::new(|inputs| {
                let values: Vec<f32> = inputs[0].values::<f32>()?.iter().map(|v| v * 2.0).collect();
                Ok(vec![HostTensor::from_values(inputs[0].shape(), &values)])
            })
            .input("x", DType::F32, &[2])
            .output("y", DType::F32, &[2])
            .metadata("author", "edgeview"),
        );
        assert!(engine.create_model(b"missing", &ModelOptions::default()).is_none());

        let model = engine.create_model(b"double", &ModelOptions::default()).unwrap();
        assert_eq!(engine.input_types(model)[0].name.as_deref(), Some("x"));
        assert_eq!(engine.metadata(model), vec![("author".to_string(), "edgeview".to_string())]);

        let data = [1.5f32, -4.0];
        let input = unsafe {
            engine.create_array_feature(data.as_ptr() as *const u8, &[2], DType::F32, CopyMode::Copy)
        }
        .unwrap();
        let outputs = engine.predict(model, &[input]);
        let output = outputs[0].unwrap();
        assert_eq!(engine.tensor(output).values::<f32>().unwrap(), vec![3.0, -8.0]);
        assert_eq!(engine.feature_type(output).unwrap().name.as_deref(), Some("y"));
        unsafe {
            engine.release_feature(output);
            engine.release_feature(input);
            engine.release_model(model);
        }
    }
}
