//! Typed, strided tensor views
//!
//! - `dtype`: element type tags shared with the native engine
//! - `shape`: dynamic-axis resolution and row-major strides
//! - `storage`: owned, borrowed and native buffers
//! - `view`: the view itself and its zero-copy transforms

pub mod dtype;
pub mod shape;
pub mod storage;
pub mod view;

pub use dtype::{DType, Element};
pub use storage::{NativeBuffer, Ownership, Storage};
pub use view::TensorView;
