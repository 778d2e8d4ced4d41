//! Indexed access to sequence-like and map-like objects.

use crate::dispatcher::{dict_key, list_index};
use crate::error::{BridgeError, Result};
use crate::session::Session;
use crate::value::{downcast_ref, HostDict, HostList, HostValue, ObjectRef};
use serde_json::Value;

const VALUE_PARAM: &str = "value";

pub(crate) fn get(session: &Session, object: &ObjectRef, index: &Value) -> Result<HostValue> {
    if let Some(list) = downcast_ref::<HostList>(object.as_ref()) {
        let index = list_index(list, index)?;
        return Ok(list.get(index).unwrap_or(HostValue::Null));
    }
    if let Some(dict) = downcast_ref::<HostDict>(object.as_ref()) {
        // A missing key reads as null
        return Ok(dict.get(&dict_key(index)?).unwrap_or(HostValue::Null));
    }
    Err(not_indexable(session, object))
}

pub(crate) fn set(session: &Session, object: &ObjectRef, index: &Value, value: &Value) -> Result<()> {
    if let Some(list) = downcast_ref::<HostList>(object.as_ref()) {
        let index = list_index(list, index)?;
        let value = session.unmarshal(value, list.element_type(), VALUE_PARAM)?;
        if !list.set(index, value) {
            // Shrunk between the bounds check and the write
            return Err(BridgeError::OutOfRange {
                index: index as i64,
                length: list.len(),
            });
        }
        return Ok(());
    }
    if let Some(dict) = downcast_ref::<HostDict>(object.as_ref()) {
        let key = dict_key(index)?;
        let value = session.unmarshal(value, dict.value_type(), VALUE_PARAM)?;
        dict.insert(key, value);
        return Ok(());
    }
    Err(not_indexable(session, object))
}

fn not_indexable(session: &Session, object: &ObjectRef) -> BridgeError {
    BridgeError::NotSupported(format!(
        "{} does not support indexing",
        session.catalog().tag_for_object(object)
    ))
}
