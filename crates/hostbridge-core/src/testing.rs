//! Shared fixtures for unit tests: a small `demo` assembly and a
//! recording callback invoker.

use crate::callback::CallbackInvoker;
use crate::cancel::CancellationRegistry;
use crate::catalog::{AssemblyBuilder, MethodInfo, PropertySetter, TypeBuilder, TypeCatalog};
use crate::error::{BridgeError, Result};
use crate::handles::HandleRegistry;
use crate::hierarchy::TypeHierarchy;
use crate::marshal::ValueConverter;
use crate::session::Session;
use crate::types::TypeRef;
use crate::value::{HostList, HostObject, HostValue, ObjectRef};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct Counter {
    value: Mutex<i64>,
}

impl Counter {
    pub fn new(start: i64) -> Self {
        Self {
            value: Mutex::new(start),
        }
    }

    pub fn get(&self) -> i64 {
        *self.value.lock().unwrap()
    }

    pub fn set(&self, value: i64) {
        *self.value.lock().unwrap() = value;
    }
}

impl HostObject for Counter {}

pub struct LabeledCounter {
    label: String,
    base: ObjectRef,
}

impl LabeledCounter {
    pub fn new(label: &str, start: i64) -> Self {
        Self {
            label: label.to_string(),
            base: Arc::new(Counter::new(start)),
        }
    }
}

impl HostObject for LabeledCounter {
    fn base_object(&self) -> Option<&ObjectRef> {
        Some(&self.base)
    }
}

/// `Wrapper<T>` holding one value of the element type.
pub struct Wrapper {
    element: TypeRef,
    value: HostValue,
}

impl Wrapper {
    pub fn new(element: TypeRef, value: HostValue) -> Self {
        Self { element, value }
    }
}

impl HostObject for Wrapper {
    fn generic_arguments(&self) -> Vec<TypeRef> {
        vec![self.element.clone()]
    }
}

/// `IntWrapper : Wrapper<int>`.
pub struct IntWrapper {
    base: ObjectRef,
}

impl IntWrapper {
    pub fn new(value: i64) -> Self {
        Self {
            base: Arc::new(Wrapper::new(TypeRef::Int, HostValue::Int(value))),
        }
    }
}

impl HostObject for IntWrapper {
    fn base_object(&self) -> Option<&ObjectRef> {
        Some(&self.base)
    }
}

fn counter_type() -> TypeBuilder {
    let default_step = Arc::new(AtomicI64::new(1));
    let step_reader = Arc::clone(&default_step);
    let step_setter: PropertySetter = Arc::new(move |_: Option<&ObjectRef>, value: HostValue| {
        default_step.store(value.as_i64()?, Ordering::SeqCst);
        Ok(())
    });

    TypeBuilder::for_type::<Counter>("Counter")
        .implements(TypeRef::named("demo/ICounter"))
        .expose_properties()
        .expose_methods()
        .constructor(
            MethodInfo::new("new")
                .optional("start", TypeRef::Int, 0i64)
                .returns(TypeRef::named("demo/Counter"))
                .handler(|inv| Ok(HostValue::object(Counter::new(inv.arg(0).as_i64()?)))),
        )
        .accessor::<Counter, _, _>(
            "value",
            TypeRef::Int,
            |c| Ok(HostValue::Int(c.get())),
            |c, v| {
                c.set(v.as_i64()?);
                Ok(())
            },
        )
        .getter::<Counter, _>("doubled", TypeRef::Int, |c| Ok(HostValue::Int(c.get() * 2)))
        .getter::<Counter, _>("history", TypeRef::list(TypeRef::Int), |c| {
            Ok(HostValue::object(HostList::from_values(
                TypeRef::Int,
                vec![HostValue::Int(c.get())],
            )))
        })
        .method(
            MethodInfo::new("increment")
                .optional("by", TypeRef::Int, 1i64)
                .returns(TypeRef::Int)
                .handler(|inv| {
                    let counter = inv.target::<Counter>()?;
                    counter.set(counter.get() + inv.arg(0).as_i64()?);
                    Ok(HostValue::Int(counter.get()))
                }),
        )
        .method(
            MethodInfo::new("describe")
                .param("name", TypeRef::String)
                .returns(TypeRef::String)
                .handler(|inv| Ok(format!("name:{}", inv.arg(0).as_str()?).into())),
        )
        .method(
            MethodInfo::new("describe")
                .param("value", TypeRef::Int)
                .returns(TypeRef::String)
                .handler(|inv| Ok(format!("value:{}", inv.arg(0).as_i64()?).into())),
        )
        .method(
            MethodInfo::new("describe")
                .param("name", TypeRef::String)
                .param("value", TypeRef::Int)
                .returns(TypeRef::String)
                .handler(|inv| {
                    Ok(format!("name:{},value:{}", inv.arg(0).as_str()?, inv.arg(1).as_i64()?).into())
                }),
        )
        .method(
            MethodInfo::new("toString")
                .returns(TypeRef::String)
                .handler(|inv| Ok(format!("Counter({})", inv.target::<Counter>()?.get()).into())),
        )
        .static_property(
            "defaultStep",
            TypeRef::Int,
            move || Ok(HostValue::Int(step_reader.load(Ordering::SeqCst))),
            Some(step_setter),
        )
        .static_property("instances", TypeRef::Int, || Ok(HostValue::Int(0)), None)
        .static_method(
            MethodInfo::new("max")
                .param("a", TypeRef::Int)
                .param("b", TypeRef::Int)
                .returns(TypeRef::Int)
                .handler(|inv| Ok(HostValue::Int(inv.arg(0).as_i64()?.max(inv.arg(1).as_i64()?)))),
        )
}

fn demo_assembly() -> crate::catalog::Assembly {
    AssemblyBuilder::new("demo")
        .add_type(TypeBuilder::interface("ICounter"))
        .add_type(counter_type())
        .add_type(
            TypeBuilder::for_type::<LabeledCounter>("LabeledCounter")
                .extends(TypeRef::named("demo/Counter"))
                .getter::<LabeledCounter, _>("label", TypeRef::String, |c| {
                    Ok(c.label.clone().into())
                }),
        )
        .add_type(TypeBuilder::interface("IWrapper").generic("T"))
        .add_type(
            TypeBuilder::for_type::<Wrapper>("Wrapper")
                .generic("T")
                .implements(TypeRef::constructed(
                    "demo/IWrapper",
                    vec![TypeRef::generic("T")],
                )),
        )
        .add_type(
            TypeBuilder::for_type::<IntWrapper>("IntWrapper")
                .extends(TypeRef::constructed("demo/Wrapper", vec![TypeRef::Int])),
        )
        .add_type(TypeBuilder::enumeration("Color", &["Red", "Green"]))
        .function(
            MethodInfo::new("identity")
                .generic("T")
                .param("value", TypeRef::generic("T"))
                .returns(TypeRef::generic("T"))
                .handler(|mut inv| Ok(inv.take(0))),
        )
        .function(
            MethodInfo::new("unwrap")
                .generic("T")
                .param(
                    "wrapper",
                    TypeRef::constructed("demo/Wrapper", vec![TypeRef::generic("T")]),
                )
                .returns(TypeRef::generic("T"))
                .handler(|inv| Ok(inv.arg(0).downcast::<Wrapper>()?.value.clone())),
        )
        .function(
            MethodInfo::new("greet")
                .param("name", TypeRef::String)
                .optional("greeting", TypeRef::String, "Hello")
                .returns(TypeRef::String)
                .handler(|inv| {
                    Ok(format!("{}, {}", inv.arg(1).as_str()?, inv.arg(0).as_str()?).into())
                }),
        )
        .function(
            MethodInfo::new("delayedSum")
                .param("a", TypeRef::Int)
                .param("b", TypeRef::Int)
                .returns(TypeRef::Int)
                .async_handler(|inv| async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(HostValue::Int(inv.arg(0).as_i64()? + inv.arg(1).as_i64()?))
                }),
        )
        .function(
            MethodInfo::new("badCast")
                .returns(TypeRef::Int)
                .handler(|_| Ok(HostValue::Int(HostValue::from("seven").as_i64()?))),
        )
        .function(
            MethodInfo::new("fail")
                .handler(|_| Err(anyhow::anyhow!("deliberate failure"))),
        )
        .function(MethodInfo::new("outOfRange").handler(|_| {
            Err(BridgeError::OutOfRange {
                index: 5,
                length: 1,
            }
            .into())
        }))
        .function(
            MethodInfo::new("makeList")
                .param("count", TypeRef::Int)
                .returns(TypeRef::list(TypeRef::Int))
                .handler(|inv| {
                    let items = (0..inv.arg(0).as_i64()?).map(HostValue::Int).collect();
                    Ok(HostValue::object(HostList::from_values(TypeRef::Int, items)))
                }),
        )
        .function(
            MethodInfo::new("withCallback")
                .param(
                    "onValue",
                    TypeRef::async_callback(vec![TypeRef::Int], TypeRef::Unit),
                )
                .async_handler(|inv| async move {
                    inv.arg(0).as_callback()?.invoke(vec![HostValue::Int(1)]).await?;
                    Ok(HostValue::Null)
                }),
        )
        .build()
}

pub fn catalog() -> TypeCatalog {
    TypeCatalog::new(vec![demo_assembly()]).expect("fixture catalog is valid")
}

pub fn converter() -> Arc<ValueConverter> {
    let catalog = catalog();
    let hierarchy = TypeHierarchy::build(&catalog);
    Arc::new(ValueConverter::new(
        Arc::new(catalog),
        Arc::new(hierarchy),
        Arc::new(HandleRegistry::new()),
        Arc::new(CancellationRegistry::new()),
    ))
}

fn open(invoker: Option<Arc<dyn CallbackInvoker>>) -> Session {
    let catalog = catalog();
    let hierarchy = TypeHierarchy::build(&catalog);
    Session::new(Arc::new(catalog), Arc::new(hierarchy), invoker)
}

pub fn session() -> Session {
    open(None)
}

pub fn session_with(invoker: Arc<RecordingInvoker>) -> Session {
    open(Some(invoker))
}

enum Reply {
    Return(Value),
    Fail(Box<dyn Fn() -> BridgeError + Send + Sync>),
    Hang,
}

/// Invoker that records every call and answers with a fixed reply.
pub struct RecordingInvoker {
    calls: Mutex<Vec<(String, Value)>>,
    reply: Reply,
}

impl Default for RecordingInvoker {
    fn default() -> Self {
        Self::returning(Value::Null)
    }
}

impl RecordingInvoker {
    fn with_reply(reply: Reply) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reply,
        }
    }

    pub fn returning(value: Value) -> Self {
        Self::with_reply(Reply::Return(value))
    }

    pub fn failing<F>(error: F) -> Self
    where
        F: Fn() -> BridgeError + Send + Sync + 'static,
    {
        Self::with_reply(Reply::Fail(Box::new(error)))
    }

    /// Never answers.
    pub fn hanging() -> Self {
        Self::with_reply(Reply::Hang)
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallbackInvoker for RecordingInvoker {
    async fn invoke(&self, callback_id: &str, args: Value) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((callback_id.to_string(), args));
        match &self.reply {
            Reply::Return(value) => Ok(value.clone()),
            Reply::Fail(error) => Err(error()),
            Reply::Hang => std::future::pending().await,
        }
    }

    fn is_connected(&self) -> bool {
        true
    }
}
