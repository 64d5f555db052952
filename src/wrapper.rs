// src/wrapper.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-scope registration of host-visible operations and array properties
//!
//! A `ClassWrapper<S>` is the Rust-side counterpart of a bound host class:
//! operations are looked up by name and optionally timed through the
//! `Instrumentation` hook, and array-valued properties bridge to and from
//! `NdarrayView` with swap-based assignment.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::array::ArrayHandle;
use crate::bridge::{assign_from_ndarray, to_ndarray};
use crate::dtype::Element;
use crate::error::{BridgeError, Result};
use crate::profile::{timer_name, Instrumentation};
use crate::view::NdarrayView;

/// Dynamic value passed to and returned from registered operations
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Array(NdarrayView),
}

impl Value {
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(BridgeError::InvalidArgument(format!(
                "expected a number, got {}",
                other.kind()
            ))),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(BridgeError::InvalidArgument(format!(
                "expected an integer, got {}",
                other.kind()
            ))),
        }
    }

    pub fn as_array(&self) -> Result<&NdarrayView> {
        match self {
            Value::Array(view) => Ok(view),
            other => Err(BridgeError::InvalidArgument(format!(
                "expected an array, got {}",
                other.kind()
            ))),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Array(_) => "array",
        }
    }
}

/// An operation on `S`, shared between its timed and untimed exposures
pub type Operation<S> = Arc<dyn Fn(&mut S, Value) -> Result<Value> + Send + Sync>;

struct Method<S> {
    op: Operation<S>,
    /// Timer entry name when the method is exposed timed
    timer: Option<String>,
}

trait PropertyAccess<S>: Send + Sync {
    fn get(&self, owner: &S) -> NdarrayView;
    fn set(&self, owner: &S, view: &NdarrayView) -> Result<()>;
}

struct ArrayProperty<T, G> {
    getter: G,
    _marker: PhantomData<fn() -> T>,
}

impl<S, T, G> PropertyAccess<S> for ArrayProperty<T, G>
where
    T: Element,
    G: Fn(&S) -> &ArrayHandle<T> + Send + Sync,
{
    fn get(&self, owner: &S) -> NdarrayView {
        to_ndarray(&*(self.getter)(owner).read())
    }

    fn set(&self, owner: &S, view: &NdarrayView) -> Result<()> {
        assign_from_ndarray(&mut *(self.getter)(owner).write(), view)
    }
}

struct Property<S> {
    access: Box<dyn PropertyAccess<S>>,
    /// Timer entry name when get and set are timed
    timer: Option<String>,
}

/// Registration table for one host-visible type
pub struct ClassWrapper<S> {
    scope: String,
    instrumentation: Arc<Instrumentation>,
    methods: BTreeMap<String, Method<S>>,
    properties: BTreeMap<String, Property<S>>,
}

impl<S: 'static> ClassWrapper<S> {
    pub fn new(scope: &str, instrumentation: Arc<Instrumentation>) -> Self {
        Self {
            scope: scope.to_string(),
            instrumentation,
            methods: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Register `op` as an untimed method
    pub fn def<F>(&mut self, name: &str, op: F) -> &mut Self
    where
        F: Fn(&mut S, Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.expose(name, Arc::new(op), false)
    }

    /// Register `op` as a method timed under "scope.name"
    pub fn def_timed<F>(&mut self, name: &str, op: F) -> &mut Self
    where
        F: Fn(&mut S, Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.expose(name, Arc::new(op), true)
    }

    /// Register `name` untimed and `name_timed` timed, both calling one `op`
    pub fn def_pair<F>(&mut self, name: &str, op: F) -> &mut Self
    where
        F: Fn(&mut S, Value) -> Result<Value> + Send + Sync + 'static,
    {
        let op: Operation<S> = Arc::new(op);
        self.expose(name, Arc::clone(&op), false);
        let timer = timer_name(&self.scope, name);
        self.methods.insert(
            format!("{}_timed", name),
            Method {
                op,
                timer: Some(timer),
            },
        );
        self
    }

    /// Register an already-shared operation
    pub fn expose(&mut self, name: &str, op: Operation<S>, timed: bool) -> &mut Self {
        let timer = timed.then(|| timer_name(&self.scope, name));
        tracing::debug!("Registering {} (timed={})", timer_name(&self.scope, name), timed);
        self.methods.insert(name.to_string(), Method { op, timer });
        self
    }

    /// Register an array-valued property backed by the handle `getter` returns
    pub fn install_array_property<T, G>(&mut self, name: &str, getter: G) -> &mut Self
    where
        T: Element,
        G: Fn(&S) -> &ArrayHandle<T> + Send + Sync + 'static,
    {
        self.insert_property(name, getter, false)
    }

    /// Same as `install_array_property`, with get and set timed under
    /// "scope.name"
    pub fn install_array_property_timed<T, G>(&mut self, name: &str, getter: G) -> &mut Self
    where
        T: Element,
        G: Fn(&S) -> &ArrayHandle<T> + Send + Sync + 'static,
    {
        self.insert_property(name, getter, true)
    }

    fn insert_property<T, G>(&mut self, name: &str, getter: G, timed: bool) -> &mut Self
    where
        T: Element,
        G: Fn(&S) -> &ArrayHandle<T> + Send + Sync + 'static,
    {
        let timer = timed.then(|| timer_name(&self.scope, name));
        tracing::debug!(
            "Registering property {} (timed={})",
            timer_name(&self.scope, name),
            timed
        );
        self.properties.insert(
            name.to_string(),
            Property {
                access: Box::new(ArrayProperty {
                    getter,
                    _marker: PhantomData,
                }),
                timer,
            },
        );
        self
    }

    /// Invoke method `name`, through the timing hook when it is timed
    pub fn call(&self, name: &str, receiver: &mut S, arg: Value) -> Result<Value> {
        let method = self
            .methods
            .get(name)
            .ok_or_else(|| self.unknown(name))?;
        match &method.timer {
            Some(timer) => self
                .instrumentation
                .call(timer, || (method.op)(receiver, arg)),
            None => (method.op)(receiver, arg),
        }
    }

    /// Bridge the property's current array to the host
    pub fn get_property(&self, name: &str, receiver: &S) -> Result<NdarrayView> {
        let property = self.properties.get(name).ok_or_else(|| self.unknown(name))?;
        match &property.timer {
            Some(timer) => Ok(self
                .instrumentation
                .call(timer, || property.access.get(receiver))),
            None => Ok(property.access.get(receiver)),
        }
    }

    /// Swap the property's array for the host's memory; sizes must match
    pub fn set_property(&self, name: &str, receiver: &S, view: &NdarrayView) -> Result<()> {
        let property = self.properties.get(name).ok_or_else(|| self.unknown(name))?;
        match &property.timer {
            Some(timer) => self
                .instrumentation
                .call(timer, || property.access.set(receiver, view)),
            None => property.access.set(receiver, view),
        }
    }

    /// `Some(true)` for timed methods and properties, `None` for unknown names
    pub fn is_timed(&self, name: &str) -> Option<bool> {
        self.methods
            .get(name)
            .map(|m| m.timer.is_some())
            .or_else(|| self.properties.get(name).map(|p| p.timer.is_some()))
    }

    pub fn property_names(&self) -> Vec<&str> {
        self.properties.keys().map(String::as_str).collect()
    }

    fn unknown(&self, name: &str) -> BridgeError {
        BridgeError::UnknownAttribute {
            scope: self.scope.clone(),
            name: name.to_string(),
        }
    }
}

impl<S> fmt::Debug for ClassWrapper<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassWrapper")
            .field("scope", &self.scope)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish()
    }
}
