//! Host-side values and the host object contract.
//!
//! [`HostValue`] is what host code produces and consumes. Simple values
//! (scalars, strings, date/time, durations, UUIDs, enums) cross the boundary
//! by value; objects cross by handle.

use crate::callback::Callback;
use crate::cancel::CancellationToken;
use crate::types::TypeRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use uuid::Uuid;

/// A value could not be cast to the type host code asked for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot cast {actual} to {expected}")]
pub struct CastError {
    pub expected: String,
    pub actual: String,
}

impl CastError {
    pub fn new(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Upcast helper implemented for every `'static` type.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Synchronous disposal contract.
pub trait Disposable: Send + Sync {
    fn dispose(&self) -> anyhow::Result<()>;
}

/// Asynchronous disposal contract. Preferred over [`Disposable`] when both exist.
#[async_trait]
pub trait AsyncDisposable: Send + Sync {
    async fn dispose_async(&self) -> anyhow::Result<()>;
}

/// A value that is only known once downstream configuration completes.
#[async_trait]
pub trait ValueProvider: Send + Sync {
    async fn value(&self) -> anyhow::Result<Option<String>>;
}

/// A live object owned by the host.
///
/// Everything but `generic_arguments` is an optional capability probe; the
/// defaults say "not supported".
pub trait HostObject: AsAny {
    /// Type arguments of the object's concrete generic construction.
    fn generic_arguments(&self) -> Vec<TypeRef> {
        Vec::new()
    }

    fn as_disposable(&self) -> Option<&dyn Disposable> {
        None
    }

    fn as_async_disposable(&self) -> Option<&dyn AsyncDisposable> {
        None
    }

    fn as_value_provider(&self) -> Option<&dyn ValueProvider> {
        None
    }

    /// Embedded object of the base type, for types that extend another
    /// exported type. Casts fall back to it, so base-type members work on
    /// derived receivers.
    fn base_object(&self) -> Option<&ObjectRef> {
        None
    }
}

/// Shared reference to a host object.
pub type ObjectRef = Arc<dyn HostObject>;

/// Borrow an object as a concrete type, walking its base objects.
pub fn downcast_ref<T: HostObject>(object: &dyn HostObject) -> Option<&T> {
    match <dyn HostObject as AsAny>::as_any(object).downcast_ref::<T>() {
        Some(found) => Some(found),
        None => object
            .base_object()
            .and_then(|base| downcast_ref::<T>(base.as_ref())),
    }
}

/// Clone an object reference as a concrete type, walking its base objects.
pub fn downcast_arc<T: HostObject>(object: &ObjectRef) -> Option<Arc<T>> {
    match <dyn HostObject as AsAny>::into_any_arc(Arc::clone(object)).downcast::<T>() {
        Ok(found) => Some(found),
        Err(_) => object.base_object().and_then(downcast_arc::<T>),
    }
}

/// Identity key of an object reference (address of the shared allocation).
pub fn object_identity(object: &ObjectRef) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

/// Value of an exported enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumValue {
    pub type_tag: String,
    pub name: String,
}

/// A host-side value.
#[derive(Clone)]
pub enum HostValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Duration(chrono::Duration),
    Uuid(Uuid),
    Enum(EnumValue),
    /// Array or read-only list, by value.
    Array(Vec<HostValue>),
    Object(ObjectRef),
    Callback(Callback),
    Token(CancellationToken),
    /// Inline structured value for the host to deserialize.
    Json(serde_json::Value),
}

impl HostValue {
    /// Wrap a host object.
    pub fn object<T: HostObject>(value: T) -> Self {
        HostValue::Object(Arc::new(value))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            HostValue::Null => "null",
            HostValue::Bool(_) => "boolean",
            HostValue::Int(_) => "int",
            HostValue::Float(_) => "number",
            HostValue::String(_) => "string",
            HostValue::DateTime(_) => "datetime",
            HostValue::Duration(_) => "duration",
            HostValue::Uuid(_) => "uuid",
            HostValue::Enum(_) => "enum",
            HostValue::Array(_) => "array",
            HostValue::Object(_) => "object",
            HostValue::Callback(_) => "callback",
            HostValue::Token(_) => "cancellation token",
            HostValue::Json(_) => "json",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    /// Scalars, strings, date/time, durations, UUIDs and enums.
    pub fn is_simple(&self) -> bool {
        matches!(
            self,
            HostValue::Bool(_)
                | HostValue::Int(_)
                | HostValue::Float(_)
                | HostValue::String(_)
                | HostValue::DateTime(_)
                | HostValue::Duration(_)
                | HostValue::Uuid(_)
                | HostValue::Enum(_)
        )
    }

    fn cast_error(&self, expected: &str) -> CastError {
        CastError::new(expected, self.kind_name())
    }

    pub fn as_bool(&self) -> Result<bool, CastError> {
        match self {
            HostValue::Bool(b) => Ok(*b),
            other => Err(other.cast_error("boolean")),
        }
    }

    pub fn as_i64(&self) -> Result<i64, CastError> {
        match self {
            HostValue::Int(i) => Ok(*i),
            other => Err(other.cast_error("int")),
        }
    }

    pub fn as_f64(&self) -> Result<f64, CastError> {
        match self {
            HostValue::Float(f) => Ok(*f),
            HostValue::Int(i) => Ok(*i as f64),
            other => Err(other.cast_error("number")),
        }
    }

    pub fn as_str(&self) -> Result<&str, CastError> {
        match self {
            HostValue::String(s) => Ok(s),
            other => Err(other.cast_error("string")),
        }
    }

    pub fn as_object(&self) -> Result<&ObjectRef, CastError> {
        match self {
            HostValue::Object(obj) => Ok(obj),
            other => Err(other.cast_error("object")),
        }
    }

    /// Cast an object value to a concrete host type.
    pub fn downcast<T: HostObject>(&self) -> Result<Arc<T>, CastError> {
        let expected = std::any::type_name::<T>();
        match self {
            HostValue::Object(obj) => {
                downcast_arc::<T>(obj).ok_or_else(|| CastError::new(expected, "object of another type"))
            }
            other => Err(other.cast_error(expected)),
        }
    }

    pub fn as_callback(&self) -> Result<&Callback, CastError> {
        match self {
            HostValue::Callback(callback) => Ok(callback),
            other => Err(other.cast_error("callback")),
        }
    }

    /// A token argument; `Null` means "no token supplied".
    pub fn as_token(&self) -> Result<Option<&CancellationToken>, CastError> {
        match self {
            HostValue::Token(token) => Ok(Some(token)),
            HostValue::Null => Ok(None),
            other => Err(other.cast_error("cancellation token")),
        }
    }

    pub fn as_array(&self) -> Result<&[HostValue], CastError> {
        match self {
            HostValue::Array(items) => Ok(items),
            other => Err(other.cast_error("array")),
        }
    }

    pub fn as_enum(&self) -> Result<&EnumValue, CastError> {
        match self {
            HostValue::Enum(value) => Ok(value),
            other => Err(other.cast_error("enum")),
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Null => write!(f, "Null"),
            HostValue::Bool(b) => write!(f, "Bool({})", b),
            HostValue::Int(i) => write!(f, "Int({})", i),
            HostValue::Float(x) => write!(f, "Float({})", x),
            HostValue::String(s) => write!(f, "String({:?})", s),
            HostValue::DateTime(dt) => write!(f, "DateTime({})", dt),
            HostValue::Duration(d) => write!(f, "Duration({})", d),
            HostValue::Uuid(u) => write!(f, "Uuid({})", u),
            HostValue::Enum(e) => write!(f, "Enum({}.{})", e.type_tag, e.name),
            HostValue::Array(items) => f.debug_tuple("Array").field(items).finish(),
            HostValue::Object(obj) => write!(f, "Object({:#x})", object_identity(obj)),
            HostValue::Callback(cb) => write!(f, "Callback({})", cb.callback_id()),
            HostValue::Token(t) => write!(f, "Token(cancelled={})", t.is_cancelled()),
            HostValue::Json(v) => write!(f, "Json({})", v),
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Null, HostValue::Null) => true,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::Int(a), HostValue::Int(b)) => a == b,
            (HostValue::Float(a), HostValue::Float(b)) => a == b,
            (HostValue::String(a), HostValue::String(b)) => a == b,
            (HostValue::DateTime(a), HostValue::DateTime(b)) => a == b,
            (HostValue::Duration(a), HostValue::Duration(b)) => a == b,
            (HostValue::Uuid(a), HostValue::Uuid(b)) => a == b,
            (HostValue::Enum(a), HostValue::Enum(b)) => a == b,
            (HostValue::Array(a), HostValue::Array(b)) => a == b,
            (HostValue::Object(a), HostValue::Object(b)) => Arc::ptr_eq(a, b),
            (HostValue::Callback(a), HostValue::Callback(b)) => Callback::ptr_eq(a, b),
            (HostValue::Token(a), HostValue::Token(b)) => a.same_token(b),
            (HostValue::Json(a), HostValue::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Bool(value)
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        HostValue::Int(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        HostValue::Int(value.into())
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Float(value)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::String(value.to_string())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::String(value)
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(HostValue::Null, Into::into)
    }
}

/// Built-in mutable list. Crosses the boundary by handle.
#[derive(Debug)]
pub struct HostList {
    element: TypeRef,
    items: RwLock<Vec<HostValue>>,
}

impl HostList {
    pub fn new(element: TypeRef) -> Self {
        Self::from_values(element, Vec::new())
    }

    pub fn from_values(element: TypeRef, items: Vec<HostValue>) -> Self {
        Self {
            element,
            items: RwLock::new(items),
        }
    }

    pub fn element_type(&self) -> &TypeRef {
        &self.element
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<HostValue>> {
        self.items.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<HostValue>> {
        self.items.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<HostValue> {
        self.read().get(index).cloned()
    }

    /// Replace the item at `index`. Returns `false` when out of bounds.
    pub fn set(&self, index: usize, value: HostValue) -> bool {
        match self.write().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn push(&self, value: HostValue) {
        self.write().push(value);
    }

    pub fn remove_at(&self, index: usize) -> Option<HostValue> {
        let mut items = self.write();
        if index < items.len() {
            Some(items.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn snapshot(&self) -> Vec<HostValue> {
        self.read().clone()
    }
}

impl HostObject for HostList {
    fn generic_arguments(&self) -> Vec<TypeRef> {
        vec![self.element.clone()]
    }
}

/// Built-in mutable string-keyed map. Crosses the boundary by handle.
#[derive(Debug)]
pub struct HostDict {
    value_type: TypeRef,
    entries: RwLock<BTreeMap<String, HostValue>>,
}

impl HostDict {
    pub fn new(value_type: TypeRef) -> Self {
        Self {
            value_type,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn value_type(&self) -> &TypeRef {
        &self.value_type
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, HostValue>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, HostValue>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<HostValue> {
        self.read().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: HostValue) -> Option<HostValue> {
        self.write().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<HostValue> {
        self.write().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl HostObject for HostDict {
    fn generic_arguments(&self) -> Vec<TypeRef> {
        vec![self.value_type.clone()]
    }
}
