// src/bridge.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Zero-copy conversion between `SimpleArray<T>` and `NdarrayView`
//!
//! Neither direction copies payload bytes. Native → external hands the host
//! the shared buffer handle as owner; external → native wraps the host's
//! memory in a buffer whose `NdarrayRemover` pins the host's owner.

use std::sync::Arc;

use crate::array::SimpleArray;
use crate::buffer::{ConcreteBuffer, ExternalOwner, NdarrayRemover, Remover};
use crate::dtype::Element;
use crate::error::{BridgeError, Result};
use crate::view::NdarrayView;

/// Describe `arr` to the host. The view's owner is the array's buffer.
pub fn to_ndarray<T: Element>(arr: &SimpleArray<T>) -> NdarrayView {
    let itemsize = arr.itemsize() as isize;
    let owner: ExternalOwner = Arc::clone(arr.buffer()) as ExternalOwner;

    NdarrayView {
        dtype: T::DTYPE,
        shape: arr.shape().to_vec(),
        strides: arr.stride().iter().map(|&s| s as isize * itemsize).collect(),
        data: arr.buffer().data(),
        owner: Some(owner),
        access: Arc::clone(arr.buffer().access()),
    }
}

/// Alias the host's memory as a native array, pinning the host's owner
pub fn make_simple_array<T: Element>(view: &NdarrayView) -> Result<SimpleArray<T>> {
    if view.dtype() != T::DTYPE {
        return Err(BridgeError::TypeMismatch {
            expected: T::DTYPE,
            found: view.dtype(),
        });
    }
    if !view.is_c_contiguous() {
        return Err(BridgeError::NotContiguous);
    }

    let remover = Remover::Ndarray(NdarrayRemover::new(view.owner().cloned())?);
    // SAFETY: the view's contract guarantees `data` covers `nbytes` for as long
    // as its owner lives, and the remover keeps the owner alive.
    let buffer = unsafe {
        ConcreteBuffer::construct(
            view.nbytes(),
            view.data(),
            remover,
            Arc::clone(view.access()),
        )?
    };

    tracing::debug!(
        "Bridged {} ndarray {:?} ({} bytes) without copy",
        view.dtype(),
        view.shape(),
        view.nbytes()
    );

    SimpleArray::from_buffer(view.shape(), buffer)
}

/// Replace the backing of `target` with the host's memory
///
/// Byte sizes must match. On success `target` keeps its identity but now
/// aliases `view`; on failure it is left untouched.
pub fn assign_from_ndarray<T: Element>(target: &mut SimpleArray<T>, view: &NdarrayView) -> Result<()> {
    if target.nbytes() != view.nbytes() {
        tracing::warn!(
            "Rejected assignment: {} bytes of input array differ from {} bytes of internal array",
            view.nbytes(),
            target.nbytes()
        );
        return Err(BridgeError::LengthMismatch {
            input: view.nbytes(),
            internal: target.nbytes(),
        });
    }

    let mut fresh = make_simple_array::<T>(view)?;
    target.swap(&mut fresh);
    Ok(())
}
