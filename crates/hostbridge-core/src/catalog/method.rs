//! Member descriptors: methods, parameters and properties.

use crate::types::TypeRef;
use crate::value::{downcast_arc, CastError, HostObject, HostValue, ObjectRef};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

/// Synchronous method body.
pub type SyncBody = Arc<dyn Fn(Invocation) -> anyhow::Result<HostValue> + Send + Sync>;

/// Asynchronous method body.
pub type AsyncBody =
    Arc<dyn Fn(Invocation) -> BoxFuture<'static, anyhow::Result<HostValue>> + Send + Sync>;

/// Executable body of a method, constructor or function.
#[derive(Clone)]
pub enum MethodBody {
    Sync(SyncBody),
    Async(AsyncBody),
}

static NULL: HostValue = HostValue::Null;

/// Arguments handed to a method body.
pub struct Invocation {
    /// Receiver for instance members; `None` for static members and functions.
    pub target: Option<ObjectRef>,
    /// Positional arguments, in declaration order, defaults applied.
    pub args: Vec<HostValue>,
    /// Bound generic type arguments, in declaration order.
    pub type_args: Vec<TypeRef>,
}

impl Invocation {
    pub fn new(target: Option<ObjectRef>, args: Vec<HostValue>) -> Self {
        Self {
            target,
            args,
            type_args: Vec::new(),
        }
    }

    /// The receiver as a concrete type.
    pub fn target<T: HostObject>(&self) -> Result<Arc<T>, CastError> {
        let expected = std::any::type_name::<T>();
        match &self.target {
            Some(obj) => downcast_arc::<T>(obj)
                .ok_or_else(|| CastError::new(expected, "object of another type")),
            None => Err(CastError::new(expected, "no receiver")),
        }
    }

    /// Argument at `index`, or `Null` when absent.
    pub fn arg(&self, index: usize) -> &HostValue {
        self.args.get(index).unwrap_or(&NULL)
    }

    /// Move the argument at `index` out, leaving `Null` behind.
    pub fn take(&mut self, index: usize) -> HostValue {
        self.args
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, HostValue::Null))
            .unwrap_or(HostValue::Null)
    }

    pub fn type_arg(&self, index: usize) -> Option<&TypeRef> {
        self.type_args.get(index)
    }
}

/// A declared parameter.
#[derive(Clone, Debug)]
pub struct ParamInfo {
    pub name: String,
    pub ty: TypeRef,
    /// Present for optional parameters.
    pub default: Option<HostValue>,
}

impl ParamInfo {
    pub fn is_optional(&self) -> bool {
        self.default.is_some()
    }
}

/// A method, constructor or free function.
#[derive(Clone)]
pub struct MethodInfo {
    pub name: String,
    pub generic_params: Vec<String>,
    pub params: Vec<ParamInfo>,
    pub returns: TypeRef,
    body: MethodBody,
}

impl std::fmt::Debug for MethodInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodInfo")
            .field("name", &self.name)
            .field("generic_params", &self.generic_params)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .field("is_async", &self.is_async())
            .finish()
    }
}

impl MethodInfo {
    /// A method that returns nothing until a handler is attached.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            generic_params: Vec::new(),
            params: Vec::new(),
            returns: TypeRef::Unit,
            body: MethodBody::Sync(Arc::new(|_| Ok(HostValue::Null))),
        }
    }

    /// Declare a generic type parameter.
    pub fn generic(mut self, name: impl Into<String>) -> Self {
        self.generic_params.push(name.into());
        self
    }

    /// Declare a required parameter.
    pub fn param(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.params.push(ParamInfo {
            name: name.into(),
            ty,
            default: None,
        });
        self
    }

    /// Declare an optional parameter with its default.
    pub fn optional(mut self, name: impl Into<String>, ty: TypeRef, default: impl Into<HostValue>) -> Self {
        self.params.push(ParamInfo {
            name: name.into(),
            ty,
            default: Some(default.into()),
        });
        self
    }

    pub fn returns(mut self, ty: TypeRef) -> Self {
        self.returns = ty;
        self
    }

    /// Attach a synchronous body.
    pub fn handler<F>(mut self, body: F) -> Self
    where
        F: Fn(Invocation) -> anyhow::Result<HostValue> + Send + Sync + 'static,
    {
        self.body = MethodBody::Sync(Arc::new(body));
        self
    }

    /// Attach an asynchronous body.
    pub fn async_handler<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HostValue>> + Send + 'static,
    {
        self.body = MethodBody::Async(Arc::new(move |inv| body(inv).boxed()));
        self
    }

    pub fn is_async(&self) -> bool {
        matches!(self.body, MethodBody::Async(_))
    }

    pub fn is_generic(&self) -> bool {
        !self.generic_params.is_empty()
    }

    pub fn body(&self) -> &MethodBody {
        &self.body
    }

    /// Parameters without a default.
    pub fn required_params(&self) -> impl Iterator<Item = &ParamInfo> {
        self.params.iter().filter(|p| !p.is_optional())
    }

    /// Run the body to completion, awaiting asynchronous bodies.
    pub async fn call(&self, invocation: Invocation) -> anyhow::Result<HostValue> {
        match &self.body {
            MethodBody::Sync(body) => body(invocation),
            MethodBody::Async(body) => body(invocation).await,
        }
    }
}

/// Property getter. Receives the receiver, or `None` for static properties.
pub type PropertyGetter =
    Arc<dyn Fn(Option<&ObjectRef>) -> anyhow::Result<HostValue> + Send + Sync>;

/// Property setter. Receives the receiver, or `None` for static properties.
pub type PropertySetter =
    Arc<dyn Fn(Option<&ObjectRef>, HostValue) -> anyhow::Result<()> + Send + Sync>;

/// A readable and optionally writable property.
#[derive(Clone)]
pub struct PropertyInfo {
    pub name: String,
    pub ty: TypeRef,
    pub getter: PropertyGetter,
    pub setter: Option<PropertySetter>,
}

impl PropertyInfo {
    pub fn is_read_only(&self) -> bool {
        self.setter.is_none()
    }
}

impl std::fmt::Debug for PropertyInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyInfo")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sync_and_async_bodies() {
        let sync = MethodInfo::new("double")
            .param("x", TypeRef::Int)
            .returns(TypeRef::Int)
            .handler(|inv| Ok(HostValue::Int(inv.arg(0).as_i64()? * 2)));
        assert!(!sync.is_async());
        let out = sync
            .call(Invocation::new(None, vec![HostValue::Int(4)]))
            .await
            .unwrap();
        assert_eq!(out, HostValue::Int(8));

        let asynchronous = MethodInfo::new("later")
            .returns(TypeRef::String)
            .async_handler(|_| async { Ok(HostValue::from("done")) });
        assert!(asynchronous.is_async());
        let out = asynchronous.call(Invocation::new(None, vec![])).await.unwrap();
        assert_eq!(out, HostValue::from("done"));
    }

    #[test]
    fn test_required_params() {
        let method = MethodInfo::new("f")
            .param("name", TypeRef::String)
            .optional("count", TypeRef::Int, 1);
        let required: Vec<_> = method.required_params().map(|p| p.name.as_str()).collect();
        assert_eq!(required, vec!["name"]);
    }

    #[test]
    fn test_invocation_accessors() {
        let mut inv = Invocation::new(None, vec![HostValue::from("a")]);
        assert_eq!(inv.arg(5), &HostValue::Null);
        assert_eq!(inv.take(0), HostValue::from("a"));
        assert_eq!(inv.arg(0), &HostValue::Null);
        assert!(inv.target::<crate::value::HostList>().is_err());
    }
}
