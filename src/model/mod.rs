//! Synchronous predictors and the engine-backed edge model

mod stats;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{self, EdgeConfig, InteropConfig};
use crate::error::{EdgeError, EdgeResult};
use crate::feature::{EdgeFeature, Feature, FeatureType};
use crate::native::{Engine, ModelHandle, ModelOptions, NativeFeature, NativeInput, NativeType};

pub use stats::PredictionStats;

/// Synchronous predictor.
///
/// Implementations are not required to be thread-safe; callers serialize
/// access through `&mut self`.
pub trait Predictor {
    type Output;

    fn predict(&mut self, inputs: &[Feature<'_>]) -> EdgeResult<Self::Output>;
}

/// Model executed on-device by an [`Engine`]
pub struct EdgeModel {
    engine: Arc<dyn Engine>,
    handle: ModelHandle,
    inputs: Vec<FeatureType>,
    outputs: Vec<FeatureType>,
    metadata: HashMap<String, String>,
    interop: InteropConfig,
    stats: PredictionStats,
}

impl EdgeModel {
    /// Create a model from graph data.
    ///
    /// Interop settings come from the global configuration.
    pub fn new(engine: Arc<dyn Engine>, graph: &[u8], options: &ModelOptions) -> EdgeResult<Self> {
        let handle = engine
            .create_model(graph, options)
            .ok_or_else(|| EdgeError::null_handle("create model"))?;
        let inputs = marshal_types(&engine.input_types(handle));
        let outputs = marshal_types(&engine.output_types(handle));
        let metadata = engine.metadata(handle).into_iter().collect();
        tracing::info!(
            engine = engine.name(),
            inputs = inputs.len(),
            outputs = outputs.len(),
            "model loaded"
        );
        Ok(Self {
            engine,
            handle,
            inputs,
            outputs,
            metadata,
            interop: config::get_config().interop,
            stats: PredictionStats::default(),
        })
    }

    /// Create a model with the model and interop sections of `config`
    pub fn with_config(engine: Arc<dyn Engine>, graph: &[u8], config: &EdgeConfig) -> EdgeResult<Self> {
        Ok(Self::new(engine, graph, &config.model.options())?.with_interop(config.interop.clone()))
    }

    /// Create a model using the global configuration
    pub fn from_bytes(engine: Arc<dyn Engine>, graph: &[u8]) -> EdgeResult<Self> {
        Self::with_config(engine, graph, &config::get_config())
    }

    /// Create a model from a graph file
    pub fn from_file(engine: Arc<dyn Engine>, path: impl AsRef<Path>, options: &ModelOptions) -> EdgeResult<Self> {
        with_graph_file(path.as_ref(), |graph| Self::new(engine, graph, options))
    }

    /// Create a model from a graph file using the global configuration
    pub fn open(engine: Arc<dyn Engine>, path: impl AsRef<Path>) -> EdgeResult<Self> {
        let config = config::get_config();
        with_graph_file(path.as_ref(), |graph| Self::with_config(engine, graph, &config))
    }

    pub fn with_interop(mut self, interop: InteropConfig) -> Self {
        self.interop = interop;
        self
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn inputs(&self) -> &[FeatureType] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[FeatureType] {
        &self.outputs
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn stats(&self) -> &PredictionStats {
        &self.stats
    }

    pub fn interop(&self) -> &InteropConfig {
        &self.interop
    }

    /// Run one prediction.
    ///
    /// Each input is converted against the declared type at its position. The
    /// engine features made for the inputs are released before returning.
    pub fn predict(&mut self, inputs: &[Feature<'_>]) -> EdgeResult<Vec<NativeFeature>> {
        if inputs.len() != self.inputs.len() {
            return Err(EdgeError::InvalidOperation(format!(
                "model takes {} inputs but was given {}",
                self.inputs.len(),
                inputs.len()
            )));
        }
        let native_inputs = inputs
            .iter()
            .zip(&self.inputs)
            .map(|(input, expected)| input.create_native(&self.engine, expected, &self.interop))
            .collect::<EdgeResult<Vec<NativeInput<'_>>>>()?;
        let handles: Vec<_> = native_inputs.iter().map(NativeInput::handle).collect();

        let start = Instant::now();
        let outputs = self.engine.predict(self.handle, &handles);
        let latency = start.elapsed();
        drop(native_inputs);

        // Wrap every handle before failing so none leaks
        let outputs: Vec<EdgeResult<NativeFeature>> = outputs
            .into_iter()
            .map(|output| match output {
                Some(handle) => NativeFeature::from_handle(self.engine.clone(), handle),
                None => Err(EdgeError::null_handle("predict")),
            })
            .collect();
        let outputs = outputs.into_iter().collect::<EdgeResult<Vec<_>>>()?;

        self.stats.record(latency);
        tracing::debug!(latency_us = latency.as_micros() as u64, outputs = outputs.len(), "prediction complete");
        Ok(outputs)
    }
}

fn with_graph_file<R>(path: &Path, create: impl FnOnce(&[u8]) -> EdgeResult<R>) -> EdgeResult<R> {
    tracing::debug!("loading model graph from {:?}", path);
    #[cfg(feature = "mmap")]
    {
        let file = std::fs::File::open(path)?;
        // SAFETY: the mapping is only read by `create` and dropped before returning
        let graph = unsafe { memmap2::Mmap::map(&file)? };
        create(&graph)
    }
    #[cfg(not(feature = "mmap"))]
    {
        let graph = std::fs::read(path)?;
        create(&graph)
    }
}

fn marshal_types(native: &[NativeType]) -> Vec<FeatureType> {
    native
        .iter()
        .map(|ty| {
            FeatureType::from_native(ty).unwrap_or_else(|| {
                FeatureType::array(ty.name.clone(), ty.dtype, Some(ty.shape.iter().map(|&d| d as isize).collect()))
            })
        })
        .collect()
}

impl Predictor for EdgeModel {
    type Output = Vec<NativeFeature>;

    fn predict(&mut self, inputs: &[Feature<'_>]) -> EdgeResult<Self::Output> {
        EdgeModel::predict(self, inputs)
    }
}

impl Drop for EdgeModel {
    fn drop(&mut self) {
        tracing::debug!(engine = self.engine.name(), "releasing model");
        // SAFETY: the handle came from `self.engine` and is owned by this model alone
        unsafe { self.engine.release_model(self.handle) };
    }
}

impl fmt::Display for EdgeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "EdgeModel ({})", self.engine.name())?;
        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "  input {}: {}", i, input)?;
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "  output {}: {}", i, output)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EdgeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeModel")
            .field("engine", &self.engine.name())
            .field("handle", &self.handle)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}
