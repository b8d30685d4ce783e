//! Network-related constants.

/// Default port for the status API.
pub const DEFAULT_STATUS_PORT: u16 = 8080;

/// Default timeout applied to every call against a remote lease store.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
