//! edgeview - typed tensor views and asynchronous prediction for on-device ML engines
//!
//! Features:
//! - Strided tensor views over owned, borrowed and engine-owned buffers
//! - Zero-copy marshaling of views, images, audio and text into engine features
//! - Engine-backed models with input/output introspection
//! - Single-worker asynchronous predictors with FIFO ordering and cancellation
//! - JSON configuration with change notification

pub mod config;
pub mod error;
pub mod feature;
pub mod model;
pub mod native;
pub mod predictor;
pub mod tensor;

pub use config::{ConfigBuilder, EdgeConfig};
pub use error::{EdgeError, EdgeResult};
pub use feature::{AudioFeature, EdgeFeature, Feature, FeatureKind, FeatureType, ImageFeature, TextFeature};
pub use model::{EdgeModel, PredictionStats, Predictor};
pub use native::{AspectMode, ComputeTarget, CopyMode, Engine, HostEngine, ModelOptions, NativeFeature};
pub use predictor::{AsyncPredictor, Prediction, PredictorExt};
pub use tensor::{DType, Element, Ownership, TensorView};

/// Initialize logging at the configured level.
///
/// Calling this again, or after another subscriber was installed, is a no-op.
pub fn init() -> EdgeResult<()> {
    let config = config::get_config();
    let level: tracing::Level = config
        .logging
        .level
        .parse()
        .map_err(|_| EdgeError::ConfigurationError(format!("unknown logging level {:?}", config.logging.level)))?;

    if tracing_subscriber::fmt().with_max_level(level).try_init().is_ok() {
        tracing::info!(version = version(), "edgeview initialized");
    }
    Ok(())
}

/// Get the current crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
