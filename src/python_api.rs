// src/python_api.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Zero-copy Python bindings using PyO3 and the NumPy C API

use numpy::npyffi::{self, npy_intp, NPY_ARRAY_WRITEABLE, PY_ARRAY_API};
use numpy::{PyArrayDescr, PyArrayDescrMethods, PyUntypedArray, PyUntypedArrayMethods};
use pyo3::exceptions::{PyIndexError, PyTypeError, PyValueError};
use pyo3::ffi;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::os::raw::{c_int, c_void};
use std::sync::{Arc, OnceLock};

use crate::buffer::{ConcreteBuffer, ExternalOwner};
use crate::dtype::DType;
use crate::error::BridgeError;
use crate::grid::{StaticGrid1d, GRID_SCOPE};
use crate::profile::Instrumentation;
use crate::view::NdarrayView;
use crate::wrapper::{ClassWrapper, Value};

impl From<BridgeError> for PyErr {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::TypeMismatch { .. } | BridgeError::NonNativeByteOrder { .. } => {
                PyTypeError::new_err(err.to_string())
            }
            BridgeError::IndexOutOfRange { .. } => PyIndexError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}

// =============================================================================
// Native buffer as ndarray base object
// =============================================================================

/// Python-visible owner of a native buffer.
///
/// Every ndarray handed out by this module has one of these as its `base`, so
/// the buffer stays alive for as long as NumPy references its memory. Also
/// implements the buffer protocol so `memoryview(buf)` works without a copy.
#[pyclass(name = "ConcreteBuffer", frozen)]
pub struct PyConcreteBuffer {
    buffer: Arc<ConcreteBuffer>,
}

#[pymethods]
impl PyConcreteBuffer {
    fn __len__(&self) -> usize {
        self.buffer.nbytes()
    }

    #[getter]
    fn nbytes(&self) -> usize {
        self.buffer.nbytes()
    }

    /// True when the buffer aliases memory owned by another ndarray
    #[getter]
    fn is_external_owner(&self) -> bool {
        self.buffer.is_external_owner()
    }

    /// Writable, one-dimensional byte view of the buffer
    unsafe fn __getbuffer__(
        slf: PyRef<'_, Self>,
        view: *mut ffi::Py_buffer,
        flags: c_int,
    ) -> PyResult<()> {
        let buffer = &slf.buffer;

        unsafe {
            (*view).buf = buffer.data() as *mut c_void;
            (*view).len = buffer.nbytes() as isize;
            (*view).readonly = 0;
            (*view).itemsize = 1;

            (*view).format = if (flags & ffi::PyBUF_FORMAT) != 0 {
                c"B".as_ptr() as *mut std::os::raw::c_char
            } else {
                std::ptr::null_mut()
            };

            (*view).ndim = 1;

            (*view).shape = if (flags & ffi::PyBUF_ND) != 0 {
                &(*view).len as *const isize as *mut isize
            } else {
                std::ptr::null_mut()
            };

            (*view).strides = if (flags & ffi::PyBUF_STRIDES) != 0 {
                &(*view).itemsize as *const isize as *mut isize
            } else {
                std::ptr::null_mut()
            };

            (*view).suboffsets = std::ptr::null_mut();
            (*view).internal = std::ptr::null_mut();

            // The exporter must stay alive while the view is in use
            (*view).obj = slf.as_ptr() as *mut ffi::PyObject;
            ffi::Py_INCREF((*view).obj);
        }

        Ok(())
    }

    unsafe fn __releasebuffer__(&self, _view: *mut ffi::Py_buffer) {
        // Py_DECREF on view.obj releases the exporter; the Arc does the rest
    }
}

// =============================================================================
// NdarrayView <-> numpy.ndarray
// =============================================================================

fn numpy_dtype<'py>(py: Python<'py>, dtype: DType) -> Bound<'py, PyArrayDescr> {
    match dtype {
        DType::Bool => numpy::dtype::<bool>(py),
        DType::Int8 => numpy::dtype::<i8>(py),
        DType::Int16 => numpy::dtype::<i16>(py),
        DType::Int32 => numpy::dtype::<i32>(py),
        DType::Int64 => numpy::dtype::<i64>(py),
        DType::UInt8 => numpy::dtype::<u8>(py),
        DType::UInt16 => numpy::dtype::<u16>(py),
        DType::UInt32 => numpy::dtype::<u32>(py),
        DType::UInt64 => numpy::dtype::<u64>(py),
        DType::Float32 => numpy::dtype::<f32>(py),
        DType::Float64 => numpy::dtype::<f64>(py),
    }
}

/// Wrap a view of a native buffer as an ndarray whose base pins that buffer
fn view_to_pyarray<'py>(py: Python<'py>, view: &NdarrayView) -> PyResult<Bound<'py, PyAny>> {
    let buffer = view
        .owner()
        .cloned()
        .ok_or(BridgeError::InvalidOwnershipAdapter)?
        .downcast::<ConcreteBuffer>()
        .map_err(|_| PyValueError::new_err("view is not backed by a native buffer"))?;

    let mut dims: Vec<npy_intp> = view.shape().iter().map(|&n| n as npy_intp).collect();
    let mut strides: Vec<npy_intp> = view.strides().iter().map(|&s| s as npy_intp).collect();
    if dims.is_empty() {
        // An empty native shape holds no elements; a 0-d ndarray would hold one
        dims.push(0);
        strides.push(view.itemsize() as npy_intp);
    }

    let base = Bound::new(py, PyConcreteBuffer { buffer })?;

    unsafe {
        let ptr = PY_ARRAY_API.PyArray_NewFromDescr(
            py,
            PY_ARRAY_API.get_type_object(py, npyffi::NpyTypes::PyArray_Type),
            numpy_dtype(py, view.dtype()).into_dtype_ptr(),
            dims.len() as c_int,
            dims.as_mut_ptr(),
            strides.as_mut_ptr(),
            view.data() as *mut c_void,
            NPY_ARRAY_WRITEABLE,
            std::ptr::null_mut(),
        );
        if ptr.is_null() {
            return Err(PyErr::fetch(py));
        }
        let array = Bound::from_owned_ptr(py, ptr);

        // Steals the reference to `base`
        if PY_ARRAY_API.PyArray_SetBaseObject(
            py,
            ptr as *mut npyffi::PyArrayObject,
            base.into_ptr(),
        ) < 0
        {
            return Err(PyErr::fetch(py));
        }

        Ok(array)
    }
}

/// Describe an ndarray without copying; the view's owner pins the ndarray
fn view_from_pyarray(array: &Bound<'_, PyUntypedArray>) -> PyResult<NdarrayView> {
    let descr = array.dtype();
    let dtype = DType::from_kind(descr.kind(), descr.itemsize())
        .ok_or_else(|| PyTypeError::new_err(format!("unsupported dtype {}", descr)))?;
    // None means byte order does not apply (single-byte types)
    if descr.is_native_byteorder() == Some(false) {
        return Err(BridgeError::NonNativeByteOrder { dtype }.into());
    }

    let raw = array.as_array_ptr();
    let (data, writeable) = unsafe { ((*raw).data as *mut u8, (*raw).flags & NPY_ARRAY_WRITEABLE != 0) };
    if !writeable {
        return Err(PyValueError::new_err("input array is read-only"));
    }

    let owner: ExternalOwner = Arc::new(array.clone().unbind());
    // SAFETY: NumPy guarantees shape/strides describe memory at `data`, which
    // lives as long as the array object `owner` holds a reference to.
    let view = unsafe {
        NdarrayView::from_parts(
            dtype,
            array.shape().to_vec(),
            array.strides().to_vec(),
            data,
            Some(owner),
        )
    }?;
    Ok(view)
}

// =============================================================================
// StaticGrid1d
// =============================================================================

fn grid_wrapper() -> &'static ClassWrapper<StaticGrid1d> {
    static WRAPPER: OnceLock<ClassWrapper<StaticGrid1d>> = OnceLock::new();
    WRAPPER.get_or_init(|| StaticGrid1d::wrapper(Arc::clone(Instrumentation::global())))
}

/// One-dimensional grid whose `coord` array is shared with NumPy
///
/// # Example
/// ```python
/// import numpy as np
/// import sabridge
///
/// gd = sabridge.StaticGrid1d(11)
/// gd.coord = np.arange(10, -1, -1, dtype='float64')  # aliases, no copy
/// assert list(gd) == [10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0]
/// gd.fill_timed(102)
/// print(sabridge.time_registry_report())
/// ```
#[pyclass(name = "StaticGrid1d")]
struct PyStaticGrid1d {
    inner: StaticGrid1d,
}

impl PyStaticGrid1d {
    fn normalize(&self, index: isize) -> PyResult<usize> {
        let len = self.inner.len() as isize;
        let resolved = if index < 0 { index + len } else { index };
        if resolved < 0 || resolved >= len {
            return Err(PyIndexError::new_err(format!(
                "index {} out of range for length {}",
                index, len
            )));
        }
        Ok(resolved as usize)
    }
}

#[pymethods]
impl PyStaticGrid1d {
    #[new]
    fn new(nx: usize) -> PyResult<Self> {
        Ok(Self {
            inner: StaticGrid1d::new(nx)?,
        })
    }

    #[getter]
    fn nx(&self) -> usize {
        self.inner.nx()
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }

    fn __getitem__(&self, index: isize) -> PyResult<f64> {
        Ok(self.inner.get(self.normalize(index)?)?)
    }

    fn __setitem__(&self, index: isize, value: f64) -> PyResult<()> {
        Ok(self.inner.set(self.normalize(index)?, value)?)
    }

    /// ndarray aliasing the grid coordinates
    #[getter]
    fn coord<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyAny>> {
        let view = grid_wrapper().get_property("coord", &self.inner)?;
        view_to_pyarray(py, &view)
    }

    /// Alias `value` as the coordinates; byte sizes must match
    #[setter]
    fn set_coord(&self, value: &Bound<'_, PyUntypedArray>) -> PyResult<()> {
        let view = view_from_pyarray(value)?;
        Ok(grid_wrapper().set_property("coord", &self.inner, &view)?)
    }

    fn fill(&mut self, value: f64) -> PyResult<()> {
        grid_wrapper().call("fill", &mut self.inner, Value::Float(value))?;
        Ok(())
    }

    /// Same as `fill`, recorded as "StaticGrid1d.fill" while profiling is on
    fn fill_timed(&mut self, value: f64) -> PyResult<()> {
        grid_wrapper().call("fill_timed", &mut self.inner, Value::Float(value))?;
        Ok(())
    }

    fn __repr__(&self) -> String {
        format!("{}(nx={})", GRID_SCOPE, self.inner.nx())
    }
}

// =============================================================================
// Profiler API
// =============================================================================

#[pyfunction]
fn profiler_enable() {
    Instrumentation::global().switch().enable();
}

#[pyfunction]
fn profiler_disable() {
    Instrumentation::global().switch().disable();
}

#[pyfunction]
fn profiler_enabled() -> bool {
    Instrumentation::global().switch().enabled()
}

/// One line per timer: "<name> : count = <n> , time = <seconds> (second)"
#[pyfunction]
fn time_registry_report() -> String {
    Instrumentation::global().registry().report()
}

#[pyfunction]
fn time_registry_clear() {
    Instrumentation::global().registry().clear();
}

/// Counters of one timer as a dict, or None when the name was never timed
#[pyfunction]
fn time_registry_entry<'py>(py: Python<'py>, name: &str) -> PyResult<Option<Bound<'py, PyDict>>> {
    let Some(entry) = Instrumentation::global().registry().get(name) else {
        return Ok(None);
    };
    let snap = entry.snapshot();

    let dict = PyDict::new(py);
    dict.set_item("name", snap.name)?;
    dict.set_item("count", snap.count)?;
    dict.set_item("starts", snap.starts)?;
    dict.set_item("stops", snap.stops)?;
    dict.set_item("time", snap.time.as_secs_f64())?;
    dict.set_item("running", snap.running)?;
    Ok(Some(dict))
}

/// Install a tracing subscriber filtered by RUST_LOG; false if one exists
#[pyfunction]
fn init_logging() -> bool {
    use tracing_subscriber::{fmt, EnvFilter};
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .is_ok()
}

// =============================================================================
// Module Registration
// =============================================================================

pub fn register_functions(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Zero-copy buffer type
    m.add_class::<PyConcreteBuffer>()?;

    // Bound types
    m.add_class::<PyStaticGrid1d>()?;

    // Profiler
    m.add_function(wrap_pyfunction!(profiler_enable, m)?)?;
    m.add_function(wrap_pyfunction!(profiler_disable, m)?)?;
    m.add_function(wrap_pyfunction!(profiler_enabled, m)?)?;
    m.add_function(wrap_pyfunction!(time_registry_report, m)?)?;
    m.add_function(wrap_pyfunction!(time_registry_clear, m)?)?;
    m.add_function(wrap_pyfunction!(time_registry_entry, m)?)?;

    // Logging
    m.add_function(wrap_pyfunction!(init_logging, m)?)?;

    Ok(())
}
