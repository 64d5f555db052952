// src/array.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed strided arrays over a shared `ConcreteBuffer`

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rayon::prelude::*;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer::ConcreteBuffer;
use crate::constants::{PARALLEL_FILL_CHUNK, PARALLEL_FILL_THRESHOLD};
use crate::dtype::Element;
use crate::error::{BridgeError, Result};

/// Row-major element strides for `shape`
pub(crate) fn contiguous_stride(shape: &[usize]) -> Vec<usize> {
    let mut stride = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        stride[i] = stride[i + 1] * shape[i + 1];
    }
    stride
}

/// Number of elements addressed by `shape`. An empty shape addresses nothing.
pub(crate) fn element_count(shape: &[usize]) -> Option<usize> {
    if shape.is_empty() {
        return Some(0);
    }
    shape.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n))
}

/// Strided array of `T` viewing a shared buffer
///
/// Clones share the buffer: writes through one clone are visible through all
/// of them and through any external view created by the bridge.
pub struct SimpleArray<T: Element> {
    shape: Vec<usize>,
    stride: Vec<usize>,
    buffer: Arc<ConcreteBuffer>,
    _marker: PhantomData<T>,
}

impl<T: Element> SimpleArray<T> {
    /// Allocate a zero-initialized, C-contiguous array
    pub fn new(shape: &[usize]) -> Result<Self> {
        let nbytes = element_count(shape)
            .and_then(|n| n.checked_mul(std::mem::size_of::<T>()))
            .ok_or_else(|| BridgeError::InvalidArgument(format!("shape {:?} overflows", shape)))?;
        let buffer = ConcreteBuffer::new(nbytes)?;
        Self::from_buffer(shape, buffer)
    }

    /// One-dimensional array holding a copy of `values`
    pub fn from_slice(values: &[T]) -> Result<Self> {
        let mut arr = Self::new(&[values.len()])?;
        arr.copy_from_slice(values)?;
        Ok(arr)
    }

    /// C-contiguous array of `shape` over an existing buffer
    pub fn from_buffer(shape: &[usize], buffer: Arc<ConcreteBuffer>) -> Result<Self> {
        let count = element_count(shape)
            .ok_or_else(|| BridgeError::InvalidArgument(format!("shape {:?} overflows", shape)))?;
        let required = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| BridgeError::InvalidArgument(format!("shape {:?} overflows", shape)))?;

        if required > buffer.nbytes() {
            return Err(BridgeError::BufferTooSmall {
                required,
                available: buffer.nbytes(),
            });
        }

        let align = std::mem::align_of::<T>();
        if count > 0 && (buffer.data() as usize) % align != 0 {
            return Err(BridgeError::Misaligned { align });
        }

        Ok(Self {
            shape: shape.to_vec(),
            stride: contiguous_stride(shape),
            buffer,
            _marker: PhantomData,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Per-dimension strides, in elements
    pub fn stride(&self) -> &[usize] {
        &self.stride
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements
    pub fn size(&self) -> usize {
        element_count(&self.shape).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn itemsize(&self) -> usize {
        std::mem::size_of::<T>()
    }

    /// Bytes addressed by this array (not the buffer capacity)
    pub fn nbytes(&self) -> usize {
        self.size() * self.itemsize()
    }

    /// The shared buffer handle
    pub fn buffer(&self) -> &Arc<ConcreteBuffer> {
        &self.buffer
    }

    pub fn data(&self) -> *const T {
        self.buffer.data() as *const T
    }

    pub fn data_mut(&mut self) -> *mut T {
        self.buffer.data() as *mut T
    }

    /// Borrow the elements in place
    ///
    /// # Safety
    /// The buffer is shared with every clone of this array and every view
    /// bridged to or from it. None of them may write to it while the slice
    /// is alive.
    pub unsafe fn as_slice(&self) -> &[T] {
        if self.is_empty() {
            return &[];
        }
        // SAFETY: from_buffer checked extent and alignment; aliasing is the
        // caller's contract
        unsafe { std::slice::from_raw_parts(self.data(), self.size()) }
    }

    /// Borrow the elements in place, mutably
    ///
    /// # Safety
    /// No clone of this array and no view bridged to or from it may read or
    /// write the buffer while the slice is alive.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [T] {
        if self.is_empty() {
            return &mut [];
        }
        let len = self.size();
        // SAFETY: as in as_slice
        unsafe { std::slice::from_raw_parts_mut(self.data_mut(), len) }
    }

    /// Copy of the elements in row-major order
    pub fn to_vec(&self) -> Vec<T> {
        let _guard = self.buffer.access().read();
        // SAFETY: the shared read lock excludes writers on every alias
        unsafe { self.as_slice() }.to_vec()
    }

    /// Overwrite every element with `values`; lengths must match
    pub fn copy_from_slice(&mut self, values: &[T]) -> Result<()> {
        if values.len() != self.size() {
            return Err(BridgeError::InvalidArgument(format!(
                "{} values for an array of {} elements",
                values.len(),
                self.size()
            )));
        }
        let data = self.data_mut();
        let _guard = self.buffer.access().write();
        // SAFETY: extent checked above, exclusive lock held
        unsafe { std::ptr::copy_nonoverlapping(values.as_ptr(), data, values.len()) };
        Ok(())
    }

    /// Element at flat (row-major) index
    pub fn get(&self, index: usize) -> Result<T> {
        let len = self.size();
        if index >= len {
            return Err(BridgeError::IndexOutOfRange { index, len });
        }
        let _guard = self.buffer.access().read();
        // SAFETY: in bounds, read lock held
        Ok(unsafe { self.data().add(index).read() })
    }

    /// Store `value` at flat (row-major) index
    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        let len = self.size();
        if index >= len {
            return Err(BridgeError::IndexOutOfRange { index, len });
        }
        let data = self.data_mut();
        let _guard = self.buffer.access().write();
        // SAFETY: in bounds, exclusive lock held
        unsafe { data.add(index).write(value) };
        Ok(())
    }

    /// Element at a multi-dimensional index
    pub fn at(&self, index: &[usize]) -> Result<T> {
        if index.len() != self.ndim() {
            return Err(BridgeError::ShapeMismatch {
                shape: self.ndim(),
                strides: index.len(),
            });
        }
        let mut offset = 0;
        for ((&i, &n), &s) in index.iter().zip(&self.shape).zip(&self.stride) {
            if i >= n {
                return Err(BridgeError::IndexOutOfRange { index: i, len: n });
            }
            offset += i * s;
        }
        self.get(offset)
    }

    /// Set every element to `value`
    pub fn fill(&mut self, value: T) {
        let len = self.size();
        let access = Arc::clone(self.buffer.access());
        let _guard = access.write();
        // SAFETY: exclusive lock held for as long as the slice lives
        let slice = unsafe { self.as_mut_slice() };
        if len >= PARALLEL_FILL_THRESHOLD {
            tracing::debug!("Parallel fill of {} elements", len);
            slice
                .par_chunks_mut(PARALLEL_FILL_CHUNK)
                .for_each(|chunk| chunk.fill(value));
        } else {
            slice.fill(value);
        }
    }

    /// Exchange shape, stride and buffer handle with `other`
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(&mut self.shape, &mut other.shape);
        std::mem::swap(&mut self.stride, &mut other.stride);
        std::mem::swap(&mut self.buffer, &mut other.buffer);
    }
}

impl<T: Element> Clone for SimpleArray<T> {
    fn clone(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            stride: self.stride.clone(),
            buffer: Arc::clone(&self.buffer),
            _marker: PhantomData,
        }
    }
}

impl<T: Element> fmt::Debug for SimpleArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleArray")
            .field("dtype", &T::DTYPE)
            .field("shape", &self.shape)
            .field("stride", &self.stride)
            .field("buffer", &self.buffer)
            .finish()
    }
}

/// Shared slot holding the array behind an array-valued property
///
/// Every clone of the handle refers to the same slot, so a swap performed by
/// a property setter is observed by all holders.
pub struct ArrayHandle<T: Element> {
    inner: Arc<RwLock<SimpleArray<T>>>,
}

impl<T: Element> ArrayHandle<T> {
    pub fn new(array: SimpleArray<T>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(array)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, SimpleArray<T>> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, SimpleArray<T>> {
        self.inner.write()
    }

    /// Whether both handles refer to the same slot
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Element> Clone for ArrayHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Element> fmt::Debug for ArrayHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ArrayHandle").field(&*self.inner.read()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_stride() {
        assert_eq!(contiguous_stride(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(contiguous_stride(&[5]), vec![1]);
        assert!(contiguous_stride(&[]).is_empty());
    }

    #[test]
    fn test_new_is_zeroed() {
        let arr = SimpleArray::<f64>::new(&[3, 4]).unwrap();
        assert_eq!(arr.size(), 12);
        assert_eq!(arr.nbytes(), 96);
        assert_eq!(arr.stride(), &[4, 1]);
        assert!(arr.to_vec().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_zero_extent_shapes() {
        let scalar = SimpleArray::<i32>::new(&[]).unwrap();
        assert_eq!(scalar.nbytes(), 0);
        assert!(scalar.to_vec().is_empty());

        let empty = SimpleArray::<i32>::new(&[0, 5]).unwrap();
        assert_eq!(empty.nbytes(), 0);
        assert_eq!(empty.stride(), &[5, 1]);
    }

    #[test]
    fn test_get_set_and_at() {
        let mut arr = SimpleArray::<i64>::new(&[2, 3]).unwrap();
        for i in 0..arr.size() {
            arr.set(i, i as i64 * 10).unwrap();
        }
        assert_eq!(arr.at(&[1, 2]).unwrap(), 50);
        assert_eq!(arr.get(4).unwrap(), 40);
        assert_eq!(
            arr.get(6),
            Err(BridgeError::IndexOutOfRange { index: 6, len: 6 })
        );
        assert!(matches!(
            arr.at(&[2, 0]),
            Err(BridgeError::IndexOutOfRange { index: 2, len: 2 })
        ));
        assert!(matches!(arr.at(&[0]), Err(BridgeError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_clones_share_buffer() {
        let mut a = SimpleArray::<u16>::from_slice(&[1, 2, 3]).unwrap();
        let b = a.clone();
        a.set(1, 42).unwrap();
        assert_eq!(b.to_vec(), &[1, 42, 3]);
        assert!(Arc::ptr_eq(a.buffer(), b.buffer()));
    }

    #[test]
    fn test_from_buffer_checks_extent() {
        let buffer = ConcreteBuffer::new(16).unwrap();
        let err = SimpleArray::<f64>::from_buffer(&[3], buffer).unwrap_err();
        assert_eq!(
            err,
            BridgeError::BufferTooSmall {
                required: 24,
                available: 16
            }
        );
    }

    #[test]
    fn test_fill_small_and_parallel() {
        let mut small = SimpleArray::<f64>::new(&[11]).unwrap();
        small.fill(102.0);
        assert!(small.to_vec().iter().all(|&v| v == 102.0));

        let mut large = SimpleArray::<u8>::new(&[PARALLEL_FILL_THRESHOLD + 3]).unwrap();
        large.fill(9);
        assert!(large.to_vec().iter().all(|&v| v == 9));
    }

    #[test]
    fn test_swap_exchanges_everything() {
        let mut a = SimpleArray::<f32>::from_slice(&[1.0, 2.0]).unwrap();
        let mut b = SimpleArray::<f32>::new(&[2, 2]).unwrap();
        let (pa, pb) = (a.data(), b.data());
        a.swap(&mut b);
        assert_eq!(a.shape(), &[2, 2]);
        assert_eq!(b.shape(), &[2]);
        assert_eq!(a.data(), pb);
        assert_eq!(b.data(), pa);
    }

    #[test]
    fn test_handle_clones_share_slot() {
        let handle = ArrayHandle::new(SimpleArray::<i32>::from_slice(&[1, 2]).unwrap());
        let other = handle.clone();
        assert!(handle.ptr_eq(&other));
        handle.write().set(0, 5).unwrap();
        assert_eq!(other.read().get(0).unwrap(), 5);
    }

    #[test]
    fn test_copies_do_not_track_later_writes() {
        let mut a = SimpleArray::<f64>::new(&[4]).unwrap();
        let b = a.clone();
        let before = b.to_vec();
        a.fill(9.0);
        assert_eq!(before, &[0.0; 4]);
        assert_eq!(b.to_vec(), &[9.0; 4]);
        assert!(a.copy_from_slice(&[1.0]).is_err());
    }

    #[test]
    fn test_clone_writers_are_serialized() {
        let base = SimpleArray::<u64>::new(&[4096]).unwrap();
        std::thread::scope(|s| {
            for value in 1..=4u64 {
                let mut writer = base.clone();
                s.spawn(move || {
                    for _ in 0..200 {
                        writer.fill(value);
                    }
                });
            }
            let reader = base.clone();
            s.spawn(move || {
                for _ in 0..200 {
                    let seen = reader.to_vec();
                    assert!(seen.iter().all(|&v| v == seen[0]));
                }
            });
        });
    }
}
