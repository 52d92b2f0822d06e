//! Native inference engine boundary
//!
//! Engines create and release opaque feature and model handles. Everything
//! above this module holds handles only through [`NativeFeature`] and
//! [`NativeInput`], which release them on drop.

pub mod engine;
pub mod feature;
pub mod host;
#[cfg(test)]
pub(crate) mod recording;
#[cfg(feature = "native")]
pub mod ffi;

pub use engine::{
    AspectMode, AudioRequest, ComputeTarget, CopyMode, Engine, FeatureHandle, ImageRequest,
    ModelHandle, ModelOptions, NativeType,
};
pub use feature::{NativeFeature, NativeInput};
pub use host::{HostEngine, HostGraph, HostTensor};
#[cfg(feature = "native")]
pub use ffi::NatEngine;
