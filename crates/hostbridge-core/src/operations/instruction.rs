//! Self-describing instructions issued by the driver.
//!
//! An instruction is a JSON object discriminated by `name`:
//!
//! ```json
//! {"name": "CREATE_OBJECT", "assembly": "demo", "type": "Counter", "args": {"start": 1}}
//! ```

use crate::error::{BridgeError, Result};
use serde::Deserialize;
use serde_json::Value;

pub(crate) const CREATE_OBJECT: &str = "CREATE_OBJECT";

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    CreateObject(CreateObject),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateObject {
    pub assembly: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub args: Value,
}

impl Instruction {
    /// Decode an instruction payload.
    ///
    /// Unknown instruction names are `NotSupported`; a malformed payload of
    /// a known instruction is `InvalidArgument`.
    pub fn parse(payload: &Value) -> Result<Self> {
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::missing_argument("name"))?;

        match name {
            CREATE_OBJECT => serde_json::from_value(payload.clone())
                .map(Instruction::CreateObject)
                .map_err(|e| {
                    BridgeError::invalid_argument(format!("Malformed {} instruction: {}", name, e))
                }),
            other => Err(BridgeError::NotSupported(format!(
                "Unknown instruction: {}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Instruction::CreateObject(_) => CREATE_OBJECT,
        }
    }
}
