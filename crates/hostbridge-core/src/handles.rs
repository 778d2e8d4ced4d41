//! The handle registry: the arena of host objects visible to the driver.
//!
//! Every object that crosses the boundary by reference is owned here under an
//! opaque, monotonically increasing id. A handle resolves to the same object
//! for its whole lifetime and fails to resolve after it is unregistered.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::value::{downcast_arc, object_identity, HostObject, ObjectRef};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// A registered object and the type tag it was registered under.
#[derive(Clone)]
pub struct HandleEntry {
    pub object: ObjectRef,
    pub type_tag: String,
}

impl std::fmt::Debug for HandleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleEntry")
            .field("object", &format_args!("{:#x}", object_identity(&self.object)))
            .field("type_tag", &self.type_tag)
            .finish()
    }
}

/// A parsed handle wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleRef {
    pub handle_id: String,
    pub type_tag: Option<String>,
}

impl HandleRef {
    /// Parse `{"$handle": id, "$type"?: tag}` or the legacy
    /// `{"$id": id, "$type": tag}`.
    ///
    /// Ids may be strings or integers. Returns `None` for anything else.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let type_tag = map
            .get(BridgeConfig::TYPE_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);

        let id = match map.get(BridgeConfig::HANDLE_KEY) {
            Some(id) => id,
            // Legacy wrappers are only recognized with a type tag alongside
            None if type_tag.is_some() => map.get(BridgeConfig::LEGACY_HANDLE_KEY)?,
            None => return None,
        };
        let handle_id = match id {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        Some(Self {
            handle_id,
            type_tag,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(BridgeConfig::HANDLE_KEY.into(), Value::String(self.handle_id.clone()));
        if let Some(tag) = &self.type_tag {
            map.insert(BridgeConfig::TYPE_KEY.into(), Value::String(tag.clone()));
        }
        Value::Object(map)
    }
}

/// A wire value after handle resolution.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// The wire value referenced a live object.
    Object(HandleEntry),
    /// Scalars and inline structured values pass through unchanged.
    Inline(Value),
}

#[derive(Default)]
struct Table {
    entries: HashMap<String, HandleEntry>,
    by_identity: HashMap<usize, String>,
}

/// Process-local table of handle id to object.
pub struct HandleRegistry {
    table: Mutex<Table>,
    next_id: AtomicU64,
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("count", &self.count())
            .finish()
    }
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an object and return its new handle id.
    pub fn register(&self, object: ObjectRef, type_tag: impl Into<String>) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let identity = object_identity(&object);
        let type_tag = type_tag.into();
        debug!("Registering handle {} ({})", id, type_tag);

        let mut table = self.table();
        let known = table
            .by_identity
            .get(&identity)
            .and_then(|existing| table.entries.get(existing))
            .is_some_and(|entry| Arc::ptr_eq(&entry.object, &object));
        if !known {
            table.by_identity.insert(identity, id.clone());
        }
        table
            .entries
            .insert(id.clone(), HandleEntry { object, type_tag });
        id
    }

    pub fn try_get(&self, handle_id: &str) -> Option<HandleEntry> {
        self.table().entries.get(handle_id).cloned()
    }

    /// Resolve a handle, failing with `HandleNotFound` if absent.
    pub fn get(&self, handle_id: &str) -> Result<ObjectRef> {
        self.try_get(handle_id)
            .map(|entry| entry.object)
            .ok_or_else(|| BridgeError::HandleNotFound {
                handle_id: handle_id.to_string(),
            })
    }

    /// Resolve a handle as a concrete type.
    pub fn get_typed<T: HostObject>(&self, handle_id: &str) -> Result<Arc<T>> {
        let object = self.get(handle_id)?;
        downcast_arc::<T>(&object).ok_or_else(|| {
            BridgeError::type_mismatch(format!(
                "Handle {} is not a {}",
                handle_id,
                std::any::type_name::<T>()
            ))
        })
    }

    pub fn contains(&self, handle_id: &str) -> bool {
        self.table().entries.contains_key(handle_id)
    }

    /// Remove a handle. Returns `false` if it was unknown.
    pub fn unregister(&self, handle_id: &str) -> bool {
        let mut table = self.table();
        match table.entries.remove(handle_id) {
            Some(entry) => {
                let identity = object_identity(&entry.object);
                if table.by_identity.get(&identity).map(String::as_str) == Some(handle_id) {
                    // Fall back to another live id for the same object
                    let alias = table
                        .entries
                        .iter()
                        .find(|(_, other)| Arc::ptr_eq(&other.object, &entry.object))
                        .map(|(id, _)| id.clone());
                    match alias {
                        Some(alias) => table.by_identity.insert(identity, alias),
                        None => table.by_identity.remove(&identity),
                    };
                }
                debug!("Unregistered handle {}", handle_id);
                true
            }
            None => false,
        }
    }

    /// Handle id already issued for this exact object, if any.
    pub fn handle_for(&self, object: &ObjectRef) -> Option<String> {
        let table = self.table();
        let id = table.by_identity.get(&object_identity(object))?;
        // The identity map may outlive a dropped allocation whose address was reused
        match table.entries.get(id) {
            Some(entry) if Arc::ptr_eq(&entry.object, object) => Some(id.clone()),
            _ => None,
        }
    }

    /// Wire wrapper for an object, registering it if not already present.
    pub fn marshal(&self, object: &ObjectRef, type_tag: &str) -> Value {
        let id = match self.handle_for(object) {
            Some(id) => id,
            None => self.register(Arc::clone(object), type_tag),
        };
        HandleRef {
            handle_id: id,
            type_tag: Some(type_tag.to_string()),
        }
        .to_value()
    }

    /// Resolve a wire value: handle wrappers become live objects, everything
    /// else passes through.
    pub fn resolve_value(&self, value: &Value) -> Result<Resolved> {
        match HandleRef::from_value(value) {
            Some(handle) => {
                let entry = self.try_get(&handle.handle_id).ok_or_else(|| {
                    BridgeError::HandleNotFound {
                        handle_id: handle.handle_id.clone(),
                    }
                })?;
                Ok(Resolved::Object(entry))
            }
            None => Ok(Resolved::Inline(value.clone())),
        }
    }

    pub fn count(&self) -> usize {
        self.table().entries.len()
    }

    /// Dispose every registered object exactly once and clear the table.
    ///
    /// Objects registered under several ids are disposed once. Asynchronous
    /// disposal is preferred when an object offers both. Failures are logged
    /// and do not stop the sweep.
    pub async fn dispose_all(&self) {
        let entries: Vec<(String, HandleEntry)> = {
            let mut table = self.table();
            table.by_identity.clear();
            table.entries.drain().collect()
        };
        let total = entries.len();

        let mut seen = HashSet::new();
        let mut disposed = 0usize;
        for (id, entry) in entries {
            if !seen.insert(object_identity(&entry.object)) {
                continue;
            }
            let object = entry.object.as_ref();
            let result = if let Some(disposable) = object.as_async_disposable() {
                disposable.dispose_async().await
            } else if let Some(disposable) = object.as_disposable() {
                disposable.dispose()
            } else {
                continue;
            };
            match result {
                Ok(()) => disposed += 1,
                Err(e) => warn!("Failed to dispose handle {} ({}): {:#}", id, entry.type_tag, e),
            }
        }
        debug!("Released {} handles, disposed {} objects", total, disposed);
    }
}
