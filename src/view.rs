// src/view.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host-side ndarray description: dtype, shape, byte strides, data, owner

use bytes::BytesMut;
use std::fmt;
use std::sync::Arc;

use crate::array::{contiguous_stride, element_count};
use crate::buffer::{AccessLock, ExternalOwner};
use crate::dtype::{DType, Element};
use crate::error::{BridgeError, Result};

/// An external array as the host sees it
///
/// The view never owns the memory it describes. `owner`, when present, is
/// the object responsible for it; anything that wants to outlive the view
/// must clone the owner. Clones share the owner and the access lock.
#[derive(Clone)]
pub struct NdarrayView {
    pub(crate) dtype: DType,
    pub(crate) shape: Vec<usize>,
    pub(crate) strides: Vec<isize>,
    pub(crate) data: *mut u8,
    pub(crate) owner: Option<ExternalOwner>,
    pub(crate) access: AccessLock,
}

impl NdarrayView {
    /// Describe memory owned elsewhere
    ///
    /// # Safety
    /// `data` must address every element reachable through `shape` and
    /// `strides`, and stay valid while `owner` (or, without an owner, the
    /// view itself) is alive. The view gets a fresh access lock, so nothing
    /// outside this crate may write the memory while Rust copies from it.
    pub unsafe fn from_parts(
        dtype: DType,
        shape: Vec<usize>,
        strides: Vec<isize>,
        data: *mut u8,
        owner: Option<ExternalOwner>,
    ) -> Result<Self> {
        if shape.len() != strides.len() {
            return Err(BridgeError::ShapeMismatch {
                shape: shape.len(),
                strides: strides.len(),
            });
        }
        Ok(Self {
            dtype,
            shape,
            strides,
            data,
            owner,
            access: AccessLock::default(),
        })
    }

    /// Hand a `Vec` over to a C-contiguous view of `shape`; the view owns it
    pub fn from_vec<T: Element>(mut values: Vec<T>, shape: &[usize]) -> Result<Self> {
        let count = element_count(shape)
            .ok_or_else(|| BridgeError::InvalidArgument(format!("shape {:?} overflows", shape)))?;
        if count != values.len() {
            return Err(BridgeError::InvalidArgument(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                count,
                values.len()
            )));
        }

        let itemsize = std::mem::size_of::<T>() as isize;
        let data = values.as_mut_ptr() as *mut u8;
        Ok(Self {
            dtype: T::DTYPE,
            shape: shape.to_vec(),
            strides: contiguous_stride(shape)
                .into_iter()
                .map(|s| s as isize * itemsize)
                .collect(),
            data,
            // Moving the Vec into the Arc leaves its heap allocation in place
            owner: Some(Arc::new(values)),
            access: AccessLock::default(),
        })
    }

    /// One-dimensional `uint8` view over a `BytesMut`; the view owns it
    pub fn from_bytes_mut(mut bytes: BytesMut) -> Self {
        let len = bytes.len();
        let data = bytes.as_mut_ptr();
        Self {
            dtype: DType::UInt8,
            shape: vec![len],
            strides: vec![1],
            data,
            owner: Some(Arc::new(bytes)),
            access: AccessLock::default(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Per-dimension strides, in bytes
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn size(&self) -> usize {
        element_count(&self.shape).unwrap_or(0)
    }

    pub fn itemsize(&self) -> usize {
        self.dtype.itemsize()
    }

    pub fn nbytes(&self) -> usize {
        self.size() * self.itemsize()
    }

    pub fn data(&self) -> *mut u8 {
        self.data
    }

    pub fn owner(&self) -> Option<&ExternalOwner> {
        self.owner.as_ref()
    }

    /// Row-major contiguity; dimensions of extent one may carry any stride
    pub fn is_c_contiguous(&self) -> bool {
        if self.size() == 0 {
            return true;
        }
        let mut expected = self.itemsize() as isize;
        for (&n, &s) in self.shape.iter().zip(&self.strides).rev() {
            if n != 1 && s != expected {
                return false;
            }
            expected *= n as isize;
        }
        true
    }

    pub(crate) fn access(&self) -> &AccessLock {
        &self.access
    }

    /// Copy of the elements of a contiguous view, in row-major order
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.check_typed::<T>()?;
        let _guard = self.access.read();
        // SAFETY: read lock held
        Ok(unsafe { self.as_slice::<T>() }?.to_vec())
    }

    /// Overwrite the elements of a contiguous view with `values`
    pub fn copy_from_slice<T: Element>(&mut self, values: &[T]) -> Result<()> {
        self.check_typed::<T>()?;
        if values.len() != self.size() {
            return Err(BridgeError::InvalidArgument(format!(
                "{} values for a view of {} elements",
                values.len(),
                self.size()
            )));
        }
        let access = Arc::clone(&self.access);
        let _guard = access.write();
        // SAFETY: exclusive lock held
        unsafe { self.as_mut_slice::<T>() }?.copy_from_slice(values);
        Ok(())
    }

    /// Typed in-place access to a contiguous view
    ///
    /// # Safety
    /// Clones of the view, native arrays bridged from it and the host may all
    /// reach this memory. None of them may write to it while the slice is
    /// alive.
    pub unsafe fn as_slice<T: Element>(&self) -> Result<&[T]> {
        self.check_typed::<T>()?;
        if self.size() == 0 {
            return Ok(&[]);
        }
        // SAFETY: dtype, contiguity and alignment checked; extent per from_parts
        Ok(unsafe { std::slice::from_raw_parts(self.data as *const T, self.size()) })
    }

    /// Typed in-place write access to a contiguous view
    ///
    /// # Safety
    /// No other alias of the memory may read or write it while the slice is
    /// alive.
    pub unsafe fn as_mut_slice<T: Element>(&mut self) -> Result<&mut [T]> {
        self.check_typed::<T>()?;
        if self.size() == 0 {
            return Ok(&mut []);
        }
        // SAFETY: as in as_slice
        Ok(unsafe { std::slice::from_raw_parts_mut(self.data as *mut T, self.size()) })
    }

    fn check_typed<T: Element>(&self) -> Result<()> {
        if self.dtype != T::DTYPE {
            return Err(BridgeError::TypeMismatch {
                expected: T::DTYPE,
                found: self.dtype,
            });
        }
        if !self.is_c_contiguous() {
            return Err(BridgeError::NotContiguous);
        }
        let align = std::mem::align_of::<T>();
        if self.size() > 0 && (self.data as usize) % align != 0 {
            return Err(BridgeError::Misaligned { align });
        }
        Ok(())
    }
}

impl fmt::Debug for NdarrayView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NdarrayView")
            .field("dtype", &self.dtype)
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("data", &self.data)
            .field("owned", &self.owner.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_layout() {
        let view = NdarrayView::from_vec((0..6).map(|v| v as f32).collect(), &[2, 3]).unwrap();
        assert_eq!(view.dtype(), DType::Float32);
        assert_eq!(view.strides(), &[12, 4]);
        assert_eq!(view.nbytes(), 24);
        assert!(view.is_c_contiguous());
        assert!(view.owner().is_some());
        assert_eq!(view.to_vec::<f32>().unwrap()[4], 4.0);
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        let err = NdarrayView::from_vec(vec![1u8, 2, 3], &[2, 2]).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
    }

    #[test]
    fn test_contiguity_detection() {
        let mut values = vec![0i32; 6];
        let data = values.as_mut_ptr() as *mut u8;
        let transposed =
            unsafe { NdarrayView::from_parts(DType::Int32, vec![3, 2], vec![4, 12], data, None) }
                .unwrap();
        assert!(!transposed.is_c_contiguous());
        assert_eq!(
            transposed.to_vec::<i32>().unwrap_err(),
            BridgeError::NotContiguous
        );

        let column =
            unsafe { NdarrayView::from_parts(DType::Int32, vec![6, 1], vec![4, 99], data, None) }
                .unwrap();
        assert!(column.is_c_contiguous());
    }

    #[test]
    fn test_from_parts_rank_check() {
        let err = unsafe {
            NdarrayView::from_parts(DType::UInt8, vec![4], vec![], std::ptr::null_mut(), None)
        }
        .unwrap_err();
        assert_eq!(err, BridgeError::ShapeMismatch { shape: 1, strides: 0 });
    }

    #[test]
    fn test_bytes_mut_view() {
        let mut view = NdarrayView::from_bytes_mut(BytesMut::from(&b"hello"[..]));
        assert_eq!(view.shape(), &[5]);
        view.copy_from_slice(b"jello").unwrap();
        assert_eq!(view.to_vec::<u8>().unwrap(), b"jello");
        assert!(view.copy_from_slice(b"hi").is_err());
        assert!(matches!(
            view.to_vec::<i8>(),
            Err(BridgeError::TypeMismatch { .. })
        ));
    }
}
