//! Remote objects: the enumerated surface a distributed object exposes
//!
//! Instead of intercepting arbitrary attribute access, a remote object answers
//! exactly three requests (`call`, `get_attr`, `set_attr`) and is built by a
//! [`Class`] constructor. The dispatcher in the root crate turns each request into
//! one task per slot.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::value::Value;
use crate::RemoteError;

/// Positional and keyword arguments, in call order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            keywords: Vec::new(),
        }
    }

    pub fn with(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn with_keyword(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keywords.push((key.into(), value.into()));
        self
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn keyword(&self, key: &str) -> Option<&Value> {
        self.keywords
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Positional argument `index`, falling back to keyword `key`
    pub fn lookup(&self, index: usize, key: &str) -> Option<&Value> {
        self.get(index).or_else(|| self.keyword(key))
    }

    /// Like [`Args::lookup`] but the argument is mandatory
    pub fn require(&self, index: usize, key: &str) -> Result<&Value, RemoteError> {
        self.lookup(index, key)
            .ok_or_else(|| RemoteError::MissingArgument(key.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }
}

/// An object living on a worker
///
/// Implementations must be `Send + Sync` since workers run on their own tasks.
pub trait RemoteObject: Send + Sync + fmt::Debug {
    /// Name of the object's class, used in error messages
    fn type_name(&self) -> &'static str;

    fn get_attr(&self, name: &str) -> Result<Value, RemoteError>;

    fn set_attr(&mut self, name: &str, value: Value) -> Result<(), RemoteError>;

    fn call(&mut self, method: &str, args: Args) -> Result<Value, RemoteError>;
}

/// Shared reference to a remote object.
///
/// Cloning shares the object; equality is identity.
#[derive(Clone)]
pub struct ObjectRef {
    inner: Arc<Mutex<Box<dyn RemoteObject>>>,
    type_name: &'static str,
}

impl ObjectRef {
    pub fn new(object: Box<dyn RemoteObject>) -> Self {
        let type_name = object.type_name();
        Self {
            inner: Arc::new(Mutex::new(object)),
            type_name,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn get_attr(&self, name: &str) -> Result<Value, RemoteError> {
        let guard = self.inner.lock().map_err(|_| RemoteError::Poisoned)?;
        guard.get_attr(name)
    }

    pub fn set_attr(&self, name: &str, value: Value) -> Result<(), RemoteError> {
        let mut guard = self.inner.lock().map_err(|_| RemoteError::Poisoned)?;
        guard.set_attr(name, value)
    }

    pub fn call(&self, method: &str, args: Args) -> Result<Value, RemoteError> {
        let mut guard = self.inner.lock().map_err(|_| RemoteError::Poisoned)?;
        guard.call(method, args)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("type_name", &self.type_name)
            .finish()
    }
}

pub type Constructor =
    dyn Fn(Args) -> Result<Box<dyn RemoteObject>, RemoteError> + Send + Sync + 'static;

/// A constructor that can run on any worker
#[derive(Clone)]
pub struct Class {
    name: &'static str,
    ctor: Arc<Constructor>,
}

impl Class {
    pub fn new<F>(name: &'static str, ctor: F) -> Self
    where
        F: Fn(Args) -> Result<Box<dyn RemoteObject>, RemoteError> + Send + Sync + 'static,
    {
        Self {
            name,
            ctor: Arc::new(ctor),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn instantiate(&self, args: Args) -> Result<ObjectRef, RemoteError> {
        (self.ctor)(args).map(ObjectRef::new)
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class").field("name", &self.name).finish()
    }
}
