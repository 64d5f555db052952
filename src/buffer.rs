// src/buffer.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contiguous byte buffers with pluggable release strategies
//!
//! A `ConcreteBuffer` either owns its allocation (`Remover::Owned`) or aliases
//! memory that belongs to somebody else (`Remover::Ndarray`). In the second
//! case the remover holds a strong reference to the external owner, so the
//! memory outlives every buffer that points into it.

use parking_lot::RwLock;
use std::alloc::{self, Layout};
use std::any::Any;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::constants::BUFFER_ALIGNMENT;
use crate::error::{BridgeError, Result};

/// Opaque, reference-counted handle to whatever keeps aliased memory alive
/// (a NumPy array, a `BytesMut`, another `ConcreteBuffer`, ...)
pub type ExternalOwner = Arc<dyn Any + Send + Sync>;

/// Lock shared by every buffer and view aliasing one memory region
///
/// Safe element access takes it for the duration of a copy: readers share
/// it, writers hold it exclusively. Bridging in either direction hands the
/// same lock to the new alias.
pub type AccessLock = Arc<RwLock<()>>;

/// Release strategy of a buffer. Exactly one per buffer.
pub enum Remover {
    /// Buffer allocated the memory itself and frees it with this layout
    Owned(Layout),
    /// Buffer aliases memory kept alive by an external owner
    Ndarray(NdarrayRemover),
}

/// Tag of a `Remover`, for callers that only need to branch on the kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoverKind {
    Owned,
    Ndarray,
}

impl Remover {
    pub fn kind(&self) -> RemoverKind {
        match self {
            Remover::Owned(_) => RemoverKind::Owned,
            Remover::Ndarray(_) => RemoverKind::Ndarray,
        }
    }

    /// Invoked once, when the buffer is dropped
    fn release(&self, data: NonNull<u8>) {
        match self {
            Remover::Owned(layout) => {
                if layout.size() != 0 {
                    // SAFETY: `data` came from `alloc_zeroed` with this exact layout
                    unsafe { alloc::dealloc(data.as_ptr(), *layout) }
                }
            }
            // The external owner frees its own memory; dropping the remover
            // releases our claim on it.
            Remover::Ndarray(_) => {}
        }
    }
}

impl fmt::Debug for Remover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remover::Owned(layout) => f.debug_tuple("Owned").field(layout).finish(),
            Remover::Ndarray(_) => f.write_str("Ndarray(..)"),
        }
    }
}

/// Release strategy that pins an external owner instead of freeing memory
pub struct NdarrayRemover {
    // Held for its reference count only
    _owner: ExternalOwner,
}

impl NdarrayRemover {
    /// Take a strong claim on `owner`. There is no adapter without an owner.
    pub fn new(owner: Option<ExternalOwner>) -> Result<Self> {
        owner
            .map(|owner| Self { _owner: owner })
            .ok_or(BridgeError::InvalidOwnershipAdapter)
    }

    /// Exact-kind check: true only for the external-owner strategy
    pub fn is_same_type(other: &Remover) -> bool {
        matches!(other, Remover::Ndarray(_))
    }
}

#[repr(align(64))]
struct Aligned;

const _: () = assert!(std::mem::align_of::<Aligned>() == BUFFER_ALIGNMENT);

/// Contiguous byte region shared through `Arc<ConcreteBuffer>`
pub struct ConcreteBuffer {
    nbytes: usize,
    data: NonNull<u8>,
    remover: Remover,
    access: AccessLock,
}

// SAFETY: the buffer is a plain byte region. Safe element access from Rust
// holds `access` (shared by every alias of the region) while it copies, and
// the host touches the memory only under its global interpreter lock.
unsafe impl Send for ConcreteBuffer {}
unsafe impl Sync for ConcreteBuffer {}

impl ConcreteBuffer {
    /// Allocate `nbytes` zeroed bytes, aligned to `BUFFER_ALIGNMENT`
    pub fn new(nbytes: usize) -> Result<Arc<Self>> {
        let layout = Layout::from_size_align(nbytes, BUFFER_ALIGNMENT).map_err(|_| {
            BridgeError::InvalidArgument(format!("cannot allocate {} bytes", nbytes))
        })?;

        let data = if nbytes == 0 {
            NonNull::<Aligned>::dangling().cast::<u8>()
        } else {
            // SAFETY: layout has non-zero size
            let ptr = unsafe { alloc::alloc_zeroed(layout) };
            NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout))
        };

        tracing::debug!("Allocated owned buffer of {} bytes", nbytes);

        Ok(Arc::new(Self {
            nbytes,
            data,
            remover: Remover::Owned(layout),
            access: AccessLock::default(),
        }))
    }

    /// Wrap memory that is released by `remover` rather than by the buffer
    ///
    /// `access` must be the lock of whatever else aliases `data`.
    ///
    /// # Safety
    /// `data` must be valid for reads and writes of `nbytes` bytes for as long
    /// as `remover` is alive, and nothing else may free it in the meantime.
    pub unsafe fn construct(
        nbytes: usize,
        data: *mut u8,
        remover: Remover,
        access: AccessLock,
    ) -> Result<Arc<Self>> {
        let data = match NonNull::new(data) {
            Some(data) => data,
            None if nbytes == 0 => NonNull::<Aligned>::dangling().cast::<u8>(),
            None => {
                return Err(BridgeError::InvalidArgument(
                    "null data pointer for non-empty buffer".to_string(),
                ))
            }
        };

        tracing::debug!(
            "Constructed {:?} buffer of {} bytes at {:p}",
            remover.kind(),
            nbytes,
            data
        );

        Ok(Arc::new(Self {
            nbytes,
            data,
            remover,
            access,
        }))
    }

    pub fn nbytes(&self) -> usize {
        self.nbytes
    }

    pub fn is_empty(&self) -> bool {
        self.nbytes == 0
    }

    /// Raw pointer to the first byte
    pub fn data(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// Lock guarding element access to this region
    pub fn access(&self) -> &AccessLock {
        &self.access
    }

    /// Whether this buffer aliases memory pinned from outside
    pub fn is_external_owner(&self) -> bool {
        NdarrayRemover::is_same_type(&self.remover)
    }
}

impl Drop for ConcreteBuffer {
    fn drop(&mut self) {
        tracing::trace!(
            "Releasing {:?} buffer of {} bytes",
            self.remover.kind(),
            self.nbytes
        );
        self.remover.release(self.data);
    }
}

impl fmt::Debug for ConcreteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcreteBuffer")
            .field("nbytes", &self.nbytes)
            .field("data", &self.data)
            .field("remover", &self.remover)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_buffer_is_zeroed_and_aligned() {
        let buf = ConcreteBuffer::new(256).unwrap();
        assert_eq!(buf.nbytes(), 256);
        assert_eq!(buf.data() as usize % BUFFER_ALIGNMENT, 0);
        let bytes = unsafe { std::slice::from_raw_parts(buf.data(), buf.nbytes()) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert!(!buf.is_external_owner());
    }

    #[test]
    fn test_zero_length_buffer() {
        let buf = ConcreteBuffer::new(0).unwrap();
        assert!(buf.is_empty());
        assert!(!buf.data().is_null());
        assert_eq!(buf.data() as usize % BUFFER_ALIGNMENT, 0);
    }

    #[test]
    fn test_identity_check_is_exact() {
        let owned = Remover::Owned(Layout::from_size_align(8, 8).unwrap());
        assert!(!NdarrayRemover::is_same_type(&owned));

        let owner: ExternalOwner = Arc::new(vec![0u8; 8]);
        let pinned = Remover::Ndarray(NdarrayRemover::new(Some(owner)).unwrap());
        assert!(NdarrayRemover::is_same_type(&pinned));
        assert_eq!(pinned.kind(), RemoverKind::Ndarray);
    }

    #[test]
    fn test_adapter_requires_owner() {
        assert_eq!(
            NdarrayRemover::new(None).err(),
            Some(BridgeError::InvalidOwnershipAdapter)
        );
    }

    #[test]
    fn test_remover_pins_owner_until_buffer_drops() {
        let mut storage = vec![7u8; 16];
        let ptr = storage.as_mut_ptr();
        let owner = Arc::new(storage);
        let weak = Arc::downgrade(&owner);

        let remover = Remover::Ndarray(NdarrayRemover::new(Some(owner)).unwrap());
        let buf =
            unsafe { ConcreteBuffer::construct(16, ptr, remover, AccessLock::default()) }.unwrap();
        assert!(buf.is_external_owner());
        assert_eq!(weak.strong_count(), 1);

        // The buffer is now the only thing keeping the Vec alive
        let bytes = unsafe { std::slice::from_raw_parts(buf.data(), buf.nbytes()) };
        assert!(bytes.iter().all(|&b| b == 7));

        drop(buf);
        assert_eq!(weak.strong_count(), 0);
    }

    #[test]
    fn test_construct_rejects_null_pointer() {
        let owner: ExternalOwner = Arc::new(());
        let remover = Remover::Ndarray(NdarrayRemover::new(Some(owner)).unwrap());
        let err = unsafe {
            ConcreteBuffer::construct(8, std::ptr::null_mut(), remover, AccessLock::default())
        };
        assert!(matches!(err, Err(BridgeError::InvalidArgument(_))));
    }
}
