use async_trait::async_trait;
use tracing::warn;

use pkg_constants::state::MALFORMED_LEASE_VERSION;
use pkg_types::lease::{Lease, LeaseKey};

/// Result of a conditional lease write that reached the store.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The write was persisted; carries the stored record with its new version.
    Applied(Lease),
    /// Another writer changed the record first. Expected under contention.
    Conflict,
}

/// Durable holder of lease records.
///
/// `write` is a compare-and-swap keyed on `metadata.resource_version`:
/// without a version it creates the record only if it does not exist, with a
/// version it replaces the record only if the stored version still matches.
/// Transport and backend errors surface as `Err`, never as `Conflict`.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    async fn get(&self, key: &LeaseKey) -> anyhow::Result<Option<Lease>>;

    async fn write(&self, key: &LeaseKey, lease: &Lease) -> anyhow::Result<WriteOutcome>;

    /// Short backend name for logs and the status API.
    fn backend(&self) -> &'static str;

    /// Flush and release backend resources.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Decode stored bytes. Bytes that are not a lease read back as a free lease
/// at the malformed version, so the next writer can overwrite them. A record
/// stored without a version reads back at the malformed version too.
pub(crate) fn decode_stored(key: &LeaseKey, bytes: &[u8]) -> Lease {
    match serde_json::from_slice::<Lease>(bytes) {
        Ok(mut lease) => {
            if lease.metadata.resource_version.is_none() {
                lease.metadata.resource_version = Some(MALFORMED_LEASE_VERSION.to_string());
            }
            lease
        }
        Err(e) => {
            warn!("Stored lease {} is malformed, treating as free: {}", key, e);
            let mut lease = Lease::new(key);
            lease.metadata.resource_version = Some(MALFORMED_LEASE_VERSION.to_string());
            lease
        }
    }
}

/// Version of the stored bytes as compared by the CAS check.
fn stored_version(key: &LeaseKey, bytes: &[u8]) -> String {
    decode_stored(key, bytes)
        .metadata
        .resource_version
        .unwrap_or_else(|| MALFORMED_LEASE_VERSION.to_string())
}

/// Compare `lease`'s expected version against what is stored and, when they
/// agree, return the record to persist with its version bumped.
///
/// Shared by the byte-oriented backends, which must call it while holding
/// their write lock.
pub(crate) fn compare_and_bump(
    key: &LeaseKey,
    stored: Option<&[u8]>,
    lease: &Lease,
) -> anyhow::Result<Option<(Lease, Vec<u8>)>> {
    let expected = lease.metadata.resource_version.as_deref();
    let next_version = match (stored, expected) {
        (None, None) => 1,
        (Some(bytes), Some(expected)) => {
            let current = stored_version(key, bytes);
            if current != expected {
                return Ok(None);
            }
            current.parse::<u64>().unwrap_or(0) + 1
        }
        // Create over an existing record, or replace a record that is gone.
        _ => return Ok(None),
    };

    let mut next = lease.clone();
    next.metadata.name = key.name.clone();
    next.metadata.namespace = key.namespace.clone();
    next.metadata.resource_version = Some(next_version.to_string());
    let bytes = serde_json::to_vec(&next)?;
    Ok(Some((next, bytes)))
}
