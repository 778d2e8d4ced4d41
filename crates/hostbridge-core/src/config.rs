//! Centralized configuration for the host bridge.
//!
//! Wire keys, the built-in package name, and transport limits live here so the
//! marshalling code and the transport agree on them.

use std::time::Duration;

/// Bridge-level constants shared by marshalling and dispatch.
pub struct BridgeConfig;

impl BridgeConfig {
    /// Package that owns the built-in container types and auxiliary capabilities.
    pub const CORE_PACKAGE: &'static str = "hostbridge";

    /// Key of a handle wrapper: `{"$handle": id, "$type": tag}`.
    pub const HANDLE_KEY: &'static str = "$handle";
    /// Legacy handle wrapper key: `{"$id": id, "$type": tag}`.
    pub const LEGACY_HANDLE_KEY: &'static str = "$id";
    pub const TYPE_KEY: &'static str = "$type";
    pub const EXPR_KEY: &'static str = "$expr";
    pub const CANCELLATION_TOKEN_KEY: &'static str = "$cancellationToken";

    /// Name of the receiver argument of instance-method capabilities.
    pub const CONTEXT_PARAM: &'static str = "context";

    /// Prefix of callback argument slots (`p0`, `p1`, ...).
    pub const CALLBACK_ARG_PREFIX: &'static str = "p";

    /// Methods never exported as capabilities.
    pub const EXCLUDED_METHODS: [&'static str; 4] = ["toString", "equals", "getHashCode", "getType"];
}

/// Transport limits and timeouts.
pub struct TransportConfig;

impl TransportConfig {
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const MAX_CONNECTIONS: usize = 64;
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Upper bound on any single outbound request, callbacks included.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
    pub const JSONRPC_VERSION: &'static str = "2.0";
    /// Request sent by the host to run a driver-side callback.
    pub const INVOKE_CALLBACK_METHOD: &'static str = "invokeCallback";
}
