//! Host engine wrapper that records handle releases and model options

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::tensor::DType;
use super::engine::{
    AudioRequest, CopyMode, Engine, FeatureHandle, ImageRequest, ModelHandle, ModelOptions, NativeType,
};
use super::host::HostEngine;

#[derive(Default)]
pub struct RecordingEngine {
    host: HostEngine,
    released_features: AtomicUsize,
    released_models: AtomicUsize,
    model_options: Mutex<Vec<ModelOptions>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(&self) -> &HostEngine {
        &self.host
    }

    pub fn released_features(&self) -> usize {
        self.released_features.load(Ordering::SeqCst)
    }

    pub fn released_models(&self) -> usize {
        self.released_models.load(Ordering::SeqCst)
    }

    /// Options passed to every `create_model` call, in order
    pub fn model_options(&self) -> Vec<ModelOptions> {
        self.model_options.lock().clone()
    }
}

impl Engine for RecordingEngine {
    fn name(&self) -> &str {
        "recording"
    }

    unsafe fn create_array_feature(
        &self,
        data: *const u8,
        shape: &[i32],
        dtype: DType,
        mode: CopyMode,
    ) -> Option<FeatureHandle> {
        self.host.create_array_feature(data, shape, dtype, mode)
    }

    fn create_image_feature(&self, request: &ImageRequest<'_>) -> Option<FeatureHandle> {
        self.host.create_image_feature(request)
    }

    fn create_audio_feature(&self, request: &AudioRequest<'_>) -> Option<FeatureHandle> {
        self.host.create_audio_feature(request)
    }

    unsafe fn release_feature(&self, feature: FeatureHandle) {
        self.released_features.fetch_add(1, Ordering::SeqCst);
        self.host.release_feature(feature);
    }

    fn feature_type(&self, feature: FeatureHandle) -> Option<NativeType> {
        self.host.feature_type(feature)
    }

    fn feature_data(&self, feature: FeatureHandle) -> *const u8 {
        self.host.feature_data(feature)
    }

    fn create_model(&self, graph: &[u8], options: &ModelOptions) -> Option<ModelHandle> {
        self.model_options.lock().push(options.clone());
        self.host.create_model(graph, options)
    }

    unsafe fn release_model(&self, model: ModelHandle) {
        self.released_models.fetch_add(1, Ordering::SeqCst);
        self.host.release_model(model);
    }

    fn input_types(&self, model: ModelHandle) -> Vec<NativeType> {
        self.host.input_types(model)
    }

    fn output_types(&self, model: ModelHandle) -> Vec<NativeType> {
        self.host.output_types(model)
    }

    fn metadata(&self, model: ModelHandle) -> Vec<(String, String)> {
        self.host.metadata(model)
    }

    fn predict(&self, model: ModelHandle, inputs: &[FeatureHandle]) -> Vec<Option<FeatureHandle>> {
        self.host.predict(model, inputs)
    }
}
