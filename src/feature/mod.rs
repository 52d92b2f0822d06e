//! Prediction inputs and feature type descriptors
//!
//! Every input kind converts itself into a [`NativeInput`] against the type the
//! model declares for that slot. Arrays choose the copy flag from their buffer
//! ownership; images, audio and text are always copied by the engine.

pub mod array;
pub mod audio;
pub mod image;
pub mod input;
pub mod text;
pub mod types;

use std::sync::Arc;

use crate::config::InteropConfig;
use crate::error::EdgeResult;
use crate::native::{Engine, NativeInput};

pub use audio::AudioFeature;
pub use image::ImageFeature;
pub use input::Feature;
pub use text::TextFeature;
pub use types::{AudioLayout, FeatureKind, FeatureType, ImageLayout};

/// Input that can be handed to an engine
pub trait EdgeFeature {
    /// Type described by this input's own data
    fn feature_type(&self) -> FeatureType;

    /// Create an engine feature matching `expected`.
    ///
    /// The result may read `self` in place, so it borrows `self`.
    fn create_native<'f>(
        &'f self,
        engine: &Arc<dyn Engine>,
        expected: &FeatureType,
        interop: &InteropConfig,
    ) -> EdgeResult<NativeInput<'f>>;
}
