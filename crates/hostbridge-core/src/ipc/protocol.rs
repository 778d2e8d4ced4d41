//! Shared protocol types and framing.
//!
//! Every frame is a 4-byte big-endian length prefix followed by a UTF-8
//! JSON-RPC 2.0 payload:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Both peers send requests and responses over the same stream, so a frame
//! is told apart by the presence of `method`.

use crate::config::TransportConfig;
use crate::error::{BridgeError, ErrorCode, ErrorEnvelope, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

impl IpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: TransportConfig::JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Some(params),
            id: Some(Value::Number(id.into())),
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
    pub id: Option<Value>,
}

impl IpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: TransportConfig::JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Protocol-level error (parse failure, malformed request).
    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: TransportConfig::JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(IpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }

    /// Bridge failure, with the typed envelope in `error.data`.
    pub fn failure(id: Option<Value>, err: &BridgeError) -> Self {
        let data = serde_json::to_value(err.to_envelope()).ok();
        Self {
            jsonrpc: TransportConfig::JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(IpcError {
                code: err.to_rpc_error_code(),
                message: err.to_string(),
                data,
            }),
            id,
        }
    }

    /// The result, or the peer's failure as a typed error.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(error.into_bridge_error()),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl IpcError {
    /// Rebuild the typed error. Falls back to the numeric code when the
    /// peer sent no envelope.
    pub fn into_bridge_error(self) -> BridgeError {
        if let Some(envelope) = self
            .data
            .and_then(|data| serde_json::from_value::<ErrorEnvelope>(data).ok())
        {
            return BridgeError::from_envelope(envelope);
        }
        let code = match self.code {
            -32601 => ErrorCode::CapabilityNotFound,
            -32602 => ErrorCode::InvalidArgument,
            -32006 => ErrorCode::Cancelled,
            _ => ErrorCode::InternalError,
        };
        if code == ErrorCode::Cancelled {
            return BridgeError::Cancelled;
        }
        BridgeError::Remote {
            code,
            message: self.message,
        }
    }
}

/// An inbound frame, decoded.
#[derive(Debug, Clone)]
pub enum IpcMessage {
    Request(IpcRequest),
    Response(IpcResponse),
}

impl IpcMessage {
    pub fn parse(frame: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(frame)?;
        if value.get("method").is_some() {
            Ok(IpcMessage::Request(serde_json::from_value(value)?))
        } else {
            Ok(IpcMessage::Response(serde_json::from_value(value)?))
        }
    }
}

/// Read a length-prefixed frame.
///
/// Returns `None` on clean EOF (peer closed the connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > TransportConfig::MAX_FRAME_SIZE {
        return Err(BridgeError::transport(format!(
            "Frame size {} exceeds maximum {}",
            len,
            TransportConfig::MAX_FRAME_SIZE
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > TransportConfig::MAX_FRAME_SIZE {
        return Err(BridgeError::transport(format!(
            "Frame size {} exceeds maximum {}",
            payload.len(),
            TransportConfig::MAX_FRAME_SIZE
        )));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
