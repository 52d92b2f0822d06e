//! Strided, typed views over owned, borrowed or native buffers
//!
//! A view never moves data. Flatten, permute, squeeze and reshape produce a new
//! view over the same storage with new shape and strides; the source stays valid
//! and is dropped independently.

use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use crate::error::{EdgeError, EdgeResult, ErrorContext, WithContext};
use crate::feature::FeatureType;
use crate::native::NativeFeature;
use super::dtype::{DType, Element};
use super::shape;
use super::storage::{NativeBuffer, Ownership, Storage};

/// Strided view over a buffer of `T`.
///
/// A view without a shape is "shapeless": it supports linear indexing over the
/// whole buffer but every shape transform and copy fails.
pub struct TensorView<'a, T: Element> {
    name: Option<String>,
    shape: Option<Vec<usize>>,
    strides: Option<Vec<usize>>,
    storage: Storage<'a, T>,
}

impl<T: Element> TensorView<'static, T> {
    /// Create a view that owns `data`
    pub fn from_vec(data: Vec<T>, shape: &[isize]) -> EdgeResult<Self> {
        Self::from_storage(Storage::owned(data), Some(shape))
    }

    /// Create a shapeless view that owns `data`
    pub fn from_vec_shapeless(data: Vec<T>) -> Self {
        Self::shapeless(Storage::owned(data))
    }

    /// Wrap a native feature, taking ownership of its handle
    pub fn from_native(feature: NativeFeature) -> EdgeResult<Self> {
        Self::from_shared_native(Arc::new(feature))
    }

    /// Wrap a native feature shared with other views
    pub fn from_shared_native(feature: Arc<NativeFeature>) -> EdgeResult<Self> {
        let dims = shape::to_signed(feature.shape());
        let name = feature.name().map(str::to_string);
        let buffer = NativeBuffer::new(feature)?;
        let mut view = Self::from_storage(Storage::Native(buffer), Some(&dims[..]))?;
        view.name = name;
        Ok(view)
    }
}

impl<'a, T: Element> TensorView<'a, T> {
    /// Create a view over caller-owned data. The caller keeps ownership and
    /// must not mutate `data` while the view or any native feature made from it lives.
    pub fn from_slice(data: &'a [T], shape: &[isize]) -> EdgeResult<Self> {
        Self::from_storage(Storage::Borrowed(data), Some(shape))
    }

    /// Create a shapeless view over caller-owned data
    pub fn from_slice_shapeless(data: &'a [T]) -> Self {
        Self::shapeless(Storage::Borrowed(data))
    }

    fn shapeless(storage: Storage<'a, T>) -> Self {
        Self {
            name: None,
            shape: None,
            strides: None,
            storage,
        }
    }

    /// Create a view over any storage.
    ///
    /// A `-1` axis is resolved from the buffer length. A fully specified shape
    /// must fit inside the buffer.
    pub fn from_storage(storage: Storage<'a, T>, shape: Option<&[isize]>) -> EdgeResult<Self> {
        let dims = match shape {
            None => None,
            Some(shape) => {
                let dims = shape::resolve(shape, storage.len())?;
                let count = shape::checked_element_count(dims.iter())?;
                if count > storage.len() {
                    return Err(EdgeError::ElementCountMismatch {
                        expected: storage.len(),
                        actual: count,
                    });
                }
                Some(dims)
            }
        };
        let strides = dims.as_deref().map(shape::row_major_strides);
        let dtype = T::DTYPE;
        tracing::trace!(
            dtype = %dtype,
            ownership = ?storage.ownership(),
            shape = ?dims,
            "created tensor view"
        );
        Ok(Self {
            name: None,
            shape: dims,
            strides,
            storage,
        })
    }

    /// Attach a feature name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn shape(&self) -> Option<&[usize]> {
        self.shape.as_deref()
    }

    pub fn strides(&self) -> Option<&[usize]> {
        self.strides.as_deref()
    }

    pub fn rank(&self) -> usize {
        self.shape.as_ref().map_or(0, Vec::len)
    }

    /// Number of logical elements; `0` for a shapeless view
    pub fn element_count(&self) -> usize {
        self.shape.as_deref().map_or(0, shape::element_count)
    }

    pub fn element_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    pub fn ownership(&self) -> Ownership {
        self.storage.ownership()
    }

    pub fn storage(&self) -> &Storage<'a, T> {
        &self.storage
    }

    /// Whole backing buffer, in memory order
    pub fn as_slice(&self) -> &[T] {
        self.storage.as_slice()
    }

    /// Check whether the strides address the buffer in row-major order
    pub fn is_contiguous(&self) -> bool {
        match (&self.shape, &self.strides) {
            (Some(dims), Some(strides)) => shape::is_row_major(dims, strides),
            _ => true,
        }
    }

    /// Feature type describing this view
    pub fn feature_type(&self) -> FeatureType {
        FeatureType::array(
            self.name.clone(),
            T::DTYPE,
            self.shape.as_deref().map(shape::to_signed),
        )
    }

    // --- Indexing ---

    /// Buffer offset of a multi-index
    pub fn linear_index(&self, idx: &[usize]) -> EdgeResult<usize> {
        let (dims, strides) = self.shaped("index")?;
        if idx.len() != dims.len() {
            return Err(EdgeError::InvalidOperation(format!(
                "expected {} indices but got {}",
                dims.len(),
                idx.len()
            )));
        }
        let mut offset = 0;
        for ((&i, &dim), &stride) in idx.iter().zip(dims).zip(strides) {
            if i >= dim {
                return Err(EdgeError::IndexOutOfRange { index: i, bound: dim });
            }
            offset += i * stride;
        }
        Ok(offset)
    }

    /// Element at a multi-index
    pub fn get(&self, idx: &[usize]) -> EdgeResult<T> {
        let offset = self.linear_index(idx)?;
        self.get_linear(offset)
    }

    /// Element at a buffer offset
    pub fn get_linear(&self, offset: usize) -> EdgeResult<T> {
        let bound = match self.shape {
            Some(_) => self.element_count(),
            None => self.storage.len(),
        };
        if offset >= bound {
            return Err(EdgeError::IndexOutOfRange { index: offset, bound });
        }
        Ok(self.storage.as_slice()[offset])
    }

    /// Elements in logical (row-major over the current shape) order
    pub fn to_vec(&self) -> EdgeResult<Vec<T>> {
        let (dims, strides) = self.shaped("to_vec")?;
        let data = self.storage.as_slice();
        let count = shape::element_count(dims);
        if self.is_contiguous() {
            return Ok(data[..count].to_vec());
        }
        let mut out = Vec::with_capacity(count);
        let mut idx = vec![0usize; dims.len()];
        for _ in 0..count {
            let offset: usize = idx.iter().zip(strides).map(|(i, s)| i * s).sum();
            out.push(data[offset]);
            for axis in (0..dims.len()).rev() {
                idx[axis] += 1;
                if idx[axis] < dims[axis] {
                    break;
                }
                idx[axis] = 0;
            }
        }
        Ok(out)
    }

    // --- Viewing ---

    /// Collapse axes `start_dim..=end_dim` into one. `None` ends at the last axis.
    pub fn flatten(&self, start_dim: usize, end_dim: Option<usize>) -> EdgeResult<TensorView<'a, T>> {
        let (dims, _) = self.shaped_for_transform("flatten")?;
        let end_dim = end_dim.unwrap_or_else(|| dims.len().saturating_sub(1));
        if dims.is_empty() || start_dim > end_dim || end_dim >= dims.len() {
            return Err(EdgeError::InvalidShape(format!(
                "cannot flatten axes {}..={} of a rank {} view",
                start_dim,
                end_dim,
                dims.len()
            )));
        }
        self.require_contiguous("flatten")?;
        let collapsed = shape::element_count(&dims[start_dim..=end_dim]);
        let mut new_shape = Vec::with_capacity(dims.len() - (end_dim - start_dim));
        new_shape.extend_from_slice(&dims[..start_dim]);
        new_shape.push(collapsed);
        new_shape.extend_from_slice(&dims[end_dim + 1..]);
        let strides = shape::row_major_strides(&new_shape);
        Ok(self.derive(new_shape, strides))
    }

    /// Reorder axes. `dims` must be a permutation of `0..rank`.
    ///
    /// Strides are permuted alongside the shape, so the result is a transpose
    /// over the same unmoved buffer.
    pub fn permute(&self, dims: &[usize]) -> EdgeResult<TensorView<'a, T>> {
        let (shape, strides) = self.shaped_for_transform("permute")?;
        let mut seen = vec![false; shape.len()];
        let valid = dims.len() == shape.len()
            && dims.iter().all(|&d| d < seen.len() && !std::mem::replace(&mut seen[d], true));
        if !valid {
            return Err(EdgeError::InvalidShape(format!(
                "{:?} is not a permutation of the axes of a rank {} view",
                dims,
                shape.len()
            )));
        }
        let new_shape = dims.iter().map(|&d| shape[d]).collect();
        let new_strides = dims.iter().map(|&d| strides[d]).collect();
        Ok(self.derive(new_shape, new_strides))
    }

    /// Remove size-1 axes. `None` removes all of them; `Some(dim)` removes only
    /// `dim`, which must have size 1.
    pub fn squeeze(&self, dim: Option<usize>) -> EdgeResult<TensorView<'a, T>> {
        let (shape, strides) = self.shaped_for_transform("squeeze")?;
        let keep: Vec<bool> = match dim {
            None => shape.iter().map(|&d| d != 1).collect(),
            Some(dim) => {
                if dim >= shape.len() || shape[dim] != 1 {
                    return Err(EdgeError::InvalidShape(format!(
                        "cannot squeeze axis {} of shape {:?}",
                        dim, shape
                    )))
                    .with_context(|| {
                        ErrorContext::new("squeeze")
                            .with_shape(shape)
                            .with_suggestion("only axes of size 1 can be squeezed")
                    });
                }
                (0..shape.len()).map(|axis| axis != dim).collect()
            }
        };
        let new_shape = shape.iter().zip(&keep).filter(|(_, k)| **k).map(|(&d, _)| d).collect();
        let new_strides = strides.iter().zip(&keep).filter(|(_, k)| **k).map(|(&s, _)| s).collect();
        Ok(self.derive(new_shape, new_strides))
    }

    /// View the same elements with a new shape. One axis may be `-1`.
    pub fn view(&self, new_shape: &[isize]) -> EdgeResult<TensorView<'a, T>> {
        let (dims, _) = self.shaped_for_transform("view")?;
        let count = shape::element_count(dims);
        let resolved = shape::resolve(new_shape, count).with_context(|| {
            ErrorContext::new("view").with_shape(dims)
        })?;
        let resolved_count = shape::checked_element_count(resolved.iter())?;
        if resolved_count != count {
            return Err(EdgeError::ElementCountMismatch {
                expected: count,
                actual: resolved_count,
            });
        }
        self.require_contiguous("view")?;
        let strides = shape::row_major_strides(&resolved);
        Ok(self.derive(resolved, strides))
    }

    /// Materialize the logical elements into a new owned, row-major view
    pub fn contiguous(&self) -> EdgeResult<TensorView<'static, T>> {
        let (dims, _) = self.shaped("contiguous")?;
        let dims = shape::to_signed(dims);
        let mut view = TensorView::from_vec(self.to_vec()?, &dims)?;
        view.name = self.name.clone();
        Ok(view)
    }

    // --- Copying ---

    /// Copy `element_count` elements of the buffer into `destination`.
    ///
    /// Copies memory order, so a permuted view copies its unpermuted buffer.
    /// Returns the number of elements copied.
    pub fn copy_to(&self, destination: &mut [T]) -> EdgeResult<usize> {
        let count = self.copy_len()?;
        if destination.len() < count {
            return Err(EdgeError::IndexOutOfRange {
                index: count,
                bound: destination.len(),
            });
        }
        destination[..count].copy_from_slice(&self.storage.as_slice()[..count]);
        Ok(count)
    }

    /// Copy the first `length` buffer elements into `destination[start..]`.
    ///
    /// `None` copies as many elements as fit after `start`, up to `element_count`.
    pub fn copy_range_to(&self, destination: &mut [T], start: usize, length: Option<usize>) -> EdgeResult<usize> {
        let available = self.copy_len()?;
        let room = destination.len().checked_sub(start).ok_or(EdgeError::IndexOutOfRange {
            index: start,
            bound: destination.len(),
        })?;
        let length = length.unwrap_or_else(|| available.min(room));
        if length > available {
            return Err(EdgeError::IndexOutOfRange {
                index: length,
                bound: available,
            });
        }
        if length > room {
            return Err(EdgeError::IndexOutOfRange {
                index: start + length,
                bound: destination.len(),
            });
        }
        destination[start..start + length].copy_from_slice(&self.storage.as_slice()[..length]);
        Ok(length)
    }

    /// Byte-level [`copy_to`](Self::copy_to) into an untyped destination
    pub fn copy_to_bytes(&self, destination: &mut [u8]) -> EdgeResult<usize> {
        let count = self.copy_len()? * self.element_size();
        if destination.len() < count {
            return Err(EdgeError::IndexOutOfRange {
                index: count,
                bound: destination.len(),
            });
        }
        destination[..count].copy_from_slice(&self.storage.as_bytes()[..count]);
        Ok(count)
    }

    /// Copy without checking destination capacity.
    ///
    /// # Safety
    /// `destination` must be valid for writes of `element_count()` elements and
    /// must not overlap this view's buffer.
    pub unsafe fn copy_to_unchecked(&self, destination: *mut T) -> EdgeResult<usize> {
        let count = self.copy_len()?;
        std::ptr::copy_nonoverlapping(self.storage.as_slice().as_ptr(), destination, count);
        Ok(count)
    }

    /// Reinterpret the raw bytes of `element_count` elements as `U`.
    ///
    /// Fails when the byte length is not a multiple of `size_of::<U>()`.
    pub fn to_array<U: Element>(&self) -> EdgeResult<Vec<U>> {
        let count = self.copy_len()?;
        let bytes = &self.storage.as_bytes()[..count * self.element_size()];
        let target = std::mem::size_of::<U>();
        if bytes.len() % target != 0 {
            return Err(EdgeError::InvalidOperation(format!(
                "{} bytes of {} data cannot be reinterpreted as {}",
                bytes.len(),
                T::DTYPE,
                U::DTYPE
            )));
        }
        let mut out = vec![U::zeroed(); bytes.len() / target];
        bytemuck::cast_slice_mut::<U, u8>(&mut out).copy_from_slice(bytes);
        Ok(out)
    }

    // --- Internals ---

    fn shaped(&self, operation: &str) -> EdgeResult<(&[usize], &[usize])> {
        match (&self.shape, &self.strides) {
            (Some(dims), Some(strides)) => Ok((dims, strides)),
            _ => Err(EdgeError::operation_error(operation, "view has no shape")),
        }
    }

    fn shaped_for_transform(&self, operation: &str) -> EdgeResult<(&[usize], &[usize])> {
        self.shaped(operation)
            .map_err(|_| EdgeError::InvalidShape(format!("cannot {} a shapeless view", operation)))
    }

    fn require_contiguous(&self, operation: &str) -> EdgeResult<()> {
        if self.is_contiguous() {
            Ok(())
        } else {
            Err(EdgeError::operation_error(
                operation,
                "view is not contiguous; call contiguous() first",
            ))
        }
    }

    fn copy_len(&self) -> EdgeResult<usize> {
        self.shaped("copy")?;
        Ok(self.element_count())
    }

    fn derive(&self, shape: Vec<usize>, strides: Vec<usize>) -> TensorView<'a, T> {
        TensorView {
            name: self.name.clone(),
            shape: Some(shape),
            strides: Some(strides),
            storage: self.storage.clone(),
        }
    }
}

impl<'a, T: Element> Clone for TensorView<'a, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            storage: self.storage.clone(),
        }
    }
}

impl<'a, T: Element> Debug for TensorView<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorView")
            .field("name", &self.name)
            .field("dtype", &T::DTYPE)
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("ownership", &self.ownership())
            .finish()
    }
}

impl<'a, T: Element> Display for TensorView<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.feature_type(), f)
    }
}
