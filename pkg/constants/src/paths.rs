//! Filesystem path constants.

/// Default config file path for the elector.
pub const DEFAULT_ELECTOR_CONFIG: &str = "/etc/lease-elector/config.yaml";

/// Default data directory for the SlateDB lease store.
pub const DEFAULT_ELECTOR_DATA_DIR: &str = "/tmp/lease-elector-data";
