// src/grid.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-dimensional static grid whose coordinates the host can alias

use std::sync::Arc;

use crate::array::{ArrayHandle, SimpleArray};
use crate::error::Result;
use crate::profile::Instrumentation;
use crate::wrapper::{ClassWrapper, Value};

/// Host-visible scope name of the grid
pub const GRID_SCOPE: &str = "StaticGrid1d";

/// Grid of `nx` points with a `coord` array of `f64`
#[derive(Debug)]
pub struct StaticGrid1d {
    nx: usize,
    coord: ArrayHandle<f64>,
}

impl StaticGrid1d {
    pub fn new(nx: usize) -> Result<Self> {
        Ok(Self {
            nx,
            coord: ArrayHandle::new(SimpleArray::new(&[nx])?),
        })
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn len(&self) -> usize {
        self.nx
    }

    pub fn is_empty(&self) -> bool {
        self.nx == 0
    }

    /// Shared slot of the coordinate array
    pub fn coord(&self) -> &ArrayHandle<f64> {
        &self.coord
    }

    pub fn get(&self, index: usize) -> Result<f64> {
        self.coord.read().get(index)
    }

    pub fn set(&self, index: usize, value: f64) -> Result<()> {
        self.coord.write().set(index, value)
    }

    pub fn fill(&self, value: f64) {
        self.coord.write().fill(value);
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.coord.read().to_vec()
    }

    /// Registration table: `coord` property, `fill`/`fill_timed`, `len`
    pub fn wrapper(instrumentation: Arc<Instrumentation>) -> ClassWrapper<Self> {
        let mut wrapper = ClassWrapper::new(GRID_SCOPE, instrumentation);
        wrapper
            .install_array_property("coord", Self::coord)
            .def_pair("fill", |grid: &mut Self, value: Value| {
                grid.fill(value.as_f64()?);
                Ok(Value::None)
            })
            .def("len", |grid: &mut Self, _| Ok(Value::Int(grid.len() as i64)));
        wrapper
    }
}
