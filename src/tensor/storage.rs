use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{EdgeError, EdgeResult};
use crate::native::{CopyMode, NativeFeature};
use super::dtype::Element;

/// Buffer ownership kind backing a view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Contiguous block owned by the view (shared between derived views)
    Owned,
    /// Caller-supplied slice; the caller keeps ownership
    Borrowed,
    /// Data owned by a native engine feature
    Native,
}

impl Ownership {
    /// Whether the engine must copy the data when wrapping it in a native feature.
    ///
    /// Borrowed and native buffers outlive the prediction that reads them, so the
    /// engine may read them in place. Owned buffers are handed over with a copy.
    pub const fn copy_mode(&self) -> CopyMode {
        match self {
            Ownership::Owned => CopyMode::Copy,
            Ownership::Borrowed | Ownership::Native => CopyMode::NoCopy,
        }
    }
}

/// Typed window over the data of a native feature.
///
/// Holding the `Arc` keeps the handle alive; the handle is released when the last view drops.
pub struct NativeBuffer<T: Element> {
    feature: Arc<NativeFeature>,
    len: usize,
    _phantom: PhantomData<T>,
}

impl<T: Element> NativeBuffer<T> {
    pub fn new(feature: Arc<NativeFeature>) -> EdgeResult<Self> {
        if feature.dtype() != T::DTYPE {
            return Err(EdgeError::InvalidOperation(format!(
                "native feature holds {} data but view was requested as {}",
                feature.dtype(),
                T::DTYPE
            )));
        }
        let len = feature.element_count();
        let ptr = feature.data_ptr();
        if len > 0 && ptr.is_null() {
            return Err(EdgeError::null_handle("feature data"));
        }
        if (ptr as usize) % std::mem::align_of::<T>() != 0 {
            return Err(EdgeError::InvalidOperation(format!(
                "native feature data is not aligned for {}",
                T::DTYPE
            )));
        }
        Ok(Self {
            feature,
            len,
            _phantom: PhantomData,
        })
    }

    pub fn feature(&self) -> &Arc<NativeFeature> {
        &self.feature
    }

    pub fn as_slice(&self) -> &[T] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: `new` checked dtype, alignment and non-null data. The engine keeps
        // `len` elements valid until the feature is released, which cannot happen
        // while `self.feature` is alive.
        unsafe { std::slice::from_raw_parts(self.feature.data_ptr() as *const T, self.len) }
    }
}

impl<T: Element> Clone for NativeBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            feature: self.feature.clone(),
            len: self.len,
            _phantom: PhantomData,
        }
    }
}

/// Buffer behind a [`TensorView`](super::TensorView): exactly one ownership kind
pub enum Storage<'a, T: Element> {
    Owned(Arc<[T]>),
    Borrowed(&'a [T]),
    Native(NativeBuffer<T>),
}

impl<'a, T: Element> Storage<'a, T> {
    pub fn owned(data: Vec<T>) -> Self {
        Storage::Owned(data.into())
    }

    pub fn ownership(&self) -> Ownership {
        match self {
            Storage::Owned(_) => Ownership::Owned,
            Storage::Borrowed(_) => Ownership::Borrowed,
            Storage::Native(_) => Ownership::Native,
        }
    }

    /// Element view of the whole buffer
    pub fn as_slice(&self) -> &[T] {
        match self {
            Storage::Owned(data) => &data[..],
            Storage::Borrowed(data) => *data,
            Storage::Native(buffer) => buffer.as_slice(),
        }
    }

    /// Byte view of the whole buffer
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.as_slice())
    }

    /// Number of addressable elements
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backing native feature, when the buffer belongs to the engine
    pub fn native_feature(&self) -> Option<&Arc<NativeFeature>> {
        match self {
            Storage::Native(buffer) => Some(buffer.feature()),
            _ => None,
        }
    }
}

impl<'a, T: Element> Clone for Storage<'a, T> {
    fn clone(&self) -> Self {
        match self {
            Storage::Owned(data) => Storage::Owned(data.clone()),
            Storage::Borrowed(data) => Storage::Borrowed(*data),
            Storage::Native(buffer) => Storage::Native(buffer.clone()),
        }
    }
}

impl<'a, T: Element> std::fmt::Debug for Storage<'a, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("ownership", &self.ownership())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_mode_follows_ownership() {
        assert_eq!(Ownership::Owned.copy_mode(), CopyMode::Copy);
        assert_eq!(Ownership::Borrowed.copy_mode(), CopyMode::NoCopy);
        assert_eq!(Ownership::Native.copy_mode(), CopyMode::NoCopy);
    }

    #[test]
    fn test_owned_storage_shares_on_clone() {
        let storage = Storage::owned(vec![1.0f32, 2.0, 3.0]);
        let shared = storage.clone();
        match (&storage, &shared) {
            (Storage::Owned(a), Storage::Owned(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected owned storage"),
        }
        assert_eq!(shared.as_bytes().len(), 12);
    }

    #[test]
    fn test_borrowed_storage_points_at_caller_data() {
        let data = [4u8, 5, 6];
        let storage = Storage::Borrowed(&data);
        assert_eq!(storage.ownership(), Ownership::Borrowed);
        assert_eq!(storage.as_slice().as_ptr(), data.as_ptr());
        assert!(storage.native_feature().is_none());
    }
}
