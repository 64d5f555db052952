// src/error.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for the array bridge and the binding helpers

use thiserror::Error;

use crate::dtype::DType;

/// Errors surfaced by bridging, property assignment and operation dispatch.
///
/// Every variant is a caller contract violation scoped to one call; nothing
/// here is retried or recovered internally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("{input} bytes of input array differ from {internal} bytes of internal array")]
    LengthMismatch { input: usize, internal: usize },

    #[error("dtype mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: DType, found: DType },

    #[error("{dtype} array with non-native byte order cannot be aliased")]
    NonNativeByteOrder { dtype: DType },

    #[error("ownership adapter requires an external owner")]
    InvalidOwnershipAdapter,

    #[error("external array must be C-contiguous to be aliased")]
    NotContiguous,

    #[error("data pointer is not aligned to {align} bytes")]
    Misaligned { align: usize },

    #[error("array extent of {required} bytes exceeds buffer of {available} bytes")]
    BufferTooSmall { required: usize, available: usize },

    #[error("shape has {shape} dimensions but strides have {strides}")]
    ShapeMismatch { shape: usize, strides: usize },

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("'{scope}' has no attribute '{name}'")]
    UnknownAttribute { scope: String, name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
