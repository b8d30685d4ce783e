//! Lease / leader election constants.

/// Default name of the lease object that guards the coordinated role.
pub const DEFAULT_LEASE_NAME: &str = "spring-leader-election";

/// Default namespace (scope) the lease lives in.
pub const DEFAULT_LEASE_NAMESPACE: &str = "default";

/// Lease duration written when no lease exists yet, in seconds.
/// Once the lease exists its own duration is carried forward by every holder.
pub const DEFAULT_LEASE_DURATION_SECS: u32 = 30;

/// The current holder renews this many seconds before its lease would lapse.
pub const DEFAULT_GRACE_PERIOD_SECS: u32 = 15;

/// Delay between two election ticks, in seconds.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 5;

/// Key prefix for leases persisted in the local state store.
/// Full key = `LEASE_KEY_PREFIX + namespace + "/" + name`.
pub const LEASE_KEY_PREFIX: &str = "/registry/leases/";

/// Version reported for stored bytes that cannot be decoded as a lease.
pub const MALFORMED_LEASE_VERSION: &str = "0";
