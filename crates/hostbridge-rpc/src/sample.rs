//! Sample assembly served by the binary.

use hostbridge::catalog::{Assembly, AssemblyBuilder, MethodInfo, TypeBuilder};
use hostbridge::types::TypeRef;
use hostbridge::value::{HostList, HostObject, HostValue, ObjectRef};
use hostbridge::BridgeError;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub const ASSEMBLY: &str = "sample";

pub struct Counter {
    value: Mutex<i64>,
}

impl Counter {
    fn get(&self) -> i64 {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, value: i64) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }
}

impl HostObject for Counter {}

/// A named list of strings, exposed as a live `hostbridge/List`.
pub struct Inventory {
    name: String,
    items: Arc<HostList>,
}

impl HostObject for Inventory {}

fn counter_type() -> TypeBuilder {
    TypeBuilder::for_type::<Counter>("Counter")
        .expose_properties()
        .expose_methods()
        .constructor(
            MethodInfo::new("new")
                .optional("start", TypeRef::Int, 0i64)
                .returns(TypeRef::named("sample/Counter"))
                .handler(|inv| {
                    Ok(HostValue::object(Counter {
                        value: Mutex::new(inv.arg(0).as_i64()?),
                    }))
                }),
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
}

fn inventory_type() -> TypeBuilder {
    TypeBuilder::for_type::<Inventory>("Inventory")
        .constructor(
            MethodInfo::new("new")
                .param("name", TypeRef::String)
                .returns(TypeRef::named("sample/Inventory"))
                .handler(|inv| {
                    Ok(HostValue::object(Inventory {
                        name: inv.arg(0).as_str()?.to_string(),
                        items: Arc::new(HostList::new(TypeRef::String)),
                    }))
                }),
        )
        .getter::<Inventory, _>("name", TypeRef::String, |i| Ok(i.name.clone().into()))
        .getter::<Inventory, _>("items", TypeRef::list(TypeRef::String), |i| {
            let items: ObjectRef = i.items.clone();
            Ok(HostValue::Object(items))
        })
        .method(
            MethodInfo::new("add")
                .param("item", TypeRef::String)
                .returns(TypeRef::Int)
                .handler(|inv| {
                    let inventory = inv.target::<Inventory>()?;
                    inventory.items.push(inv.arg(0).clone());
                    Ok(HostValue::Int(inventory.items.len() as i64))
                }),
        )
}

pub fn assembly() -> Assembly {
    AssemblyBuilder::new(ASSEMBLY)
        .add_type(counter_type())
        .add_type(inventory_type())
        .function(
            MethodInfo::new("echo")
                .generic("T")
                .param("value", TypeRef::generic("T"))
                .returns(TypeRef::generic("T"))
                .handler(|mut inv| Ok(inv.take(0))),
        )
        .function(
            MethodInfo::new("add")
                .param("a", TypeRef::Int)
                .param("b", TypeRef::Int)
                .returns(TypeRef::Int)
                .handler(|inv| Ok(HostValue::Int(inv.arg(0).as_i64()? + inv.arg(1).as_i64()?))),
        )
        .function(
            MethodInfo::new("sleep")
                .param("millis", TypeRef::Int)
                .optional("ct", TypeRef::CancellationToken, HostValue::Null)
                .returns(TypeRef::Bool)
                .async_handler(|inv| async move {
                    let millis = u64::try_from(inv.arg(0).as_i64()?).unwrap_or(0);
                    let sleep = tokio::time::sleep(Duration::from_millis(millis));
                    match inv.arg(1).as_token()? {
                        Some(token) => tokio::select! {
                            _ = sleep => Ok(HostValue::Bool(true)),
                            _ = token.cancelled() => Err(BridgeError::Cancelled.into()),
                        },
                        None => {
                            sleep.await;
                            Ok(HostValue::Bool(true))
                        }
                    }
                }),
        )
        .function(
            MethodInfo::new("forEach")
                .param("items", TypeRef::array(TypeRef::Int))
                .param("onItem", TypeRef::async_callback(vec![TypeRef::Int], TypeRef::Unit))
                .returns(TypeRef::Int)
                .async_handler(|inv| async move {
                    let on_item = inv.arg(1).as_callback()?;
                    let items = inv.arg(0).as_array()?;
                    for item in items {
                        on_item.invoke(vec![item.clone()]).await?;
                    }
                    Ok(HostValue::Int(items.len() as i64))
                }),
        )
        .build()
}
