// src/lib.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Zero-copy bridge between native strided arrays and NumPy ndarrays
//!
//! This library provides:
//! - `SimpleArray<T>` over reference-counted `ConcreteBuffer`s
//! - Buffers that alias externally-owned memory and pin its owner
//! - Bidirectional ndarray conversion without copying payload bytes
//! - Swap-based assignment for array-valued properties
//! - A process-wide profiler switch and named timer registry for wrapped calls
//! - Python bindings via PyO3 (feature `python-bindings`)

// Core modules
pub mod array;
pub mod bridge;
pub mod buffer;
pub mod constants;
pub mod dtype;
pub mod error;
pub mod grid;
pub mod profile;
pub mod view;
pub mod wrapper;

// Python bindings
#[cfg(feature = "python-bindings")]
mod python_api;

// Re-export main API
pub use array::{ArrayHandle, SimpleArray};
pub use bridge::{assign_from_ndarray, make_simple_array, to_ndarray};
pub use buffer::{
    AccessLock, ConcreteBuffer, ExternalOwner, NdarrayRemover, Remover, RemoverKind,
};
pub use dtype::{DType, Element};
pub use error::{BridgeError, Result};
pub use grid::StaticGrid1d;
pub use profile::{
    timer_name, Instrumentation, ProfilerConfig, ProfilerSwitch, TimeRegistry, TimerEntry,
    TimerSnapshot,
};
pub use view::NdarrayView;
pub use wrapper::{ClassWrapper, Operation, Value};

// PyO3 module initialization
#[cfg(feature = "python-bindings")]
use pyo3::prelude::*;

#[cfg(feature = "python-bindings")]
#[pymodule]
fn _sabridge(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Register all Python classes and functions
    python_api::register_functions(m)?;
    Ok(())
}
