use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use pkg_constants::kube::{LEASE_API_VERSION, LEASE_KIND};
use pkg_constants::state::LEASE_KEY_PREFIX;

use crate::validate::validate_name;

/// Identifies one lease record: `<namespace>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseKey {
    pub namespace: String,
    pub name: String,
}

impl LeaseKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Both parts must be valid DNS-1123 labels.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_name(&self.namespace)?;
        validate_name(&self.name)?;
        Ok(())
    }

    /// Key used by the local state store, e.g. `/registry/leases/default/my-lease`.
    pub fn storage_key(&self) -> String {
        format!("{}{}/{}", LEASE_KEY_PREFIX, self.namespace, self.name)
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A lease object, shaped like a Kubernetes `coordination.k8s.io/v1` Lease
/// so that the same value can be exchanged with every store backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: LeaseMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<LeaseSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Optimistic-concurrency token. `None` on a write means "create if absent".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Server-managed fields (uid, timestamps, labels...) carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseSpec {
    /// Current holder; absent or empty means the lease is free.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_duration_seconds: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "micro_time"
    )]
    pub acquire_time: Option<DateTime<Utc>>,
    /// Absent means never renewed, which reads as expired.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "micro_time"
    )]
    pub renew_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_transitions: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_api_version() -> String {
    LEASE_API_VERSION.to_string()
}

fn default_kind() -> String {
    LEASE_KIND.to_string()
}

/// Where the lease stands relative to one candidate, recomputed from the raw
/// record on every tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// No record, no spec, or no holder.
    Free,
    /// Held by the candidate and inside the renewal window.
    RenewDue,
    /// Held by the candidate, not yet due for renewal.
    HeldBySelf,
    /// Held by someone else whose lease has lapsed.
    Expired { holder: String },
    /// Held by someone else whose lease is still valid.
    HeldByOther { holder: String },
}

impl Availability {
    pub fn is_acquirable(&self) -> bool {
        matches!(
            self,
            Availability::Free | Availability::RenewDue | Availability::Expired { .. }
        )
    }
}

impl Lease {
    /// A free lease with no spec, used as the base for the first write.
    pub fn new(key: &LeaseKey) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: LeaseMeta {
                name: key.name.clone(),
                namespace: key.namespace.clone(),
                ..Default::default()
            },
            spec: None,
        }
    }

    /// The holder identity, treating an empty string as no holder.
    pub fn holder(&self) -> Option<&str> {
        self.spec
            .as_ref()
            .and_then(|s| s.holder_identity.as_deref())
            .filter(|h| !h.is_empty())
    }

    pub fn is_held_by(&self, identity: &str) -> bool {
        self.holder() == Some(identity)
    }

    pub fn renew_time(&self) -> Option<DateTime<Utc>> {
        self.spec.as_ref().and_then(|s| s.renew_time)
    }

    pub fn duration_secs(&self) -> Option<u32> {
        self.spec.as_ref().and_then(|s| s.lease_duration_seconds)
    }

    /// True when `renew_time` is absent or older than `now - window_secs`.
    fn stale_for(&self, window_secs: i64, now: DateTime<Utc>) -> bool {
        match self.renew_time() {
            None => true,
            Some(renewed) => renewed < now - Duration::seconds(window_secs),
        }
    }

    /// Build the record that claims (or renews) the lease for `identity`.
    ///
    /// The existing duration is carried forward; `default_duration_secs` is
    /// only used when the lease has none yet. `acquireTime` and
    /// `leaseTransitions` change only when the holder changes.
    pub fn claimed_by(
        base: Option<&Lease>,
        key: &LeaseKey,
        identity: &str,
        default_duration_secs: u32,
        now: DateTime<Utc>,
    ) -> Lease {
        let mut lease = base.cloned().unwrap_or_else(|| Lease::new(key));
        let renewing = lease.is_held_by(identity);
        let had_record = base.is_some();
        let prev = lease.spec.take().unwrap_or_default();

        let lease_transitions = if renewing {
            prev.lease_transitions
        } else if had_record {
            Some(prev.lease_transitions.unwrap_or(0).saturating_add(1))
        } else {
            Some(0)
        };
        let acquire_time = if renewing {
            prev.acquire_time.or(Some(now))
        } else {
            Some(now)
        };

        lease.spec = Some(LeaseSpec {
            holder_identity: Some(identity.to_string()),
            lease_duration_seconds: Some(
                prev.lease_duration_seconds
                    .filter(|d| *d > 0)
                    .unwrap_or(default_duration_secs),
            ),
            acquire_time,
            renew_time: Some(now),
            lease_transitions,
            extra: prev.extra,
        });
        lease
    }

    /// Build the record that gives the lease up: holder cleared, renew time
    /// refreshed, duration preserved.
    pub fn released(&self, now: DateTime<Utc>) -> Lease {
        let mut lease = self.clone();
        let spec = lease.spec.get_or_insert_with(LeaseSpec::default);
        spec.holder_identity = None;
        spec.renew_time = Some(now);
        lease
    }
}

/// Decide whether `identity` may write the lease at `now`.
///
/// The current holder becomes due `grace_secs` before its lease lapses so it
/// renews ahead of anyone else being allowed in; other candidates must wait
/// for the full duration.
pub fn availability(
    lease: Option<&Lease>,
    identity: &str,
    grace_secs: u32,
    now: DateTime<Utc>,
) -> Availability {
    let Some(lease) = lease else {
        return Availability::Free;
    };
    let Some(holder) = lease.holder() else {
        return Availability::Free;
    };

    let duration = i64::from(lease.duration_secs().unwrap_or(0));
    if holder == identity {
        if lease.stale_for(duration - i64::from(grace_secs), now) {
            Availability::RenewDue
        } else {
            Availability::HeldBySelf
        }
    } else if lease.stale_for(duration, now) {
        Availability::Expired {
            holder: holder.to_string(),
        }
    } else {
        Availability::HeldByOther {
            holder: holder.to_string(),
        }
    }
}

/// RFC 3339 timestamps with microsecond precision, the format Kubernetes
/// uses for `MicroTime` fields.
mod micro_time {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(t) => serializer.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Micros, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ME: &str = "me";
    const OTHER: &str = "other";

    fn key() -> LeaseKey {
        LeaseKey::new("default", "test-lease")
    }

    fn held(holder: &str, renewed_secs_ago: Option<i64>, duration: u32, now: DateTime<Utc>) -> Lease {
        let mut lease = Lease::new(&key());
        lease.spec = Some(LeaseSpec {
            holder_identity: Some(holder.to_string()),
            lease_duration_seconds: Some(duration),
            renew_time: renewed_secs_ago.map(|s| now - Duration::seconds(s)),
            ..Default::default()
        });
        lease
    }

    #[test]
    fn absent_or_unheld_lease_is_free() {
        let now = Utc::now();
        assert_eq!(availability(None, ME, 15, now), Availability::Free);

        let bare = Lease::new(&key());
        assert_eq!(availability(Some(&bare), ME, 15, now), Availability::Free);

        let empty_holder = held("", Some(1), 30, now);
        assert_eq!(availability(Some(&empty_holder), ME, 15, now), Availability::Free);
    }

    #[test]
    fn holder_renews_inside_grace_window() {
        let now = Utc::now();
        let lease = held(ME, Some(16), 30, now);
        assert_eq!(availability(Some(&lease), ME, 15, now), Availability::RenewDue);

        let fresh = held(ME, Some(5), 30, now);
        assert_eq!(availability(Some(&fresh), ME, 15, now), Availability::HeldBySelf);
    }

    #[test]
    fn holder_without_renew_time_is_due() {
        let now = Utc::now();
        let lease = held(ME, None, 30, now);
        assert_eq!(availability(Some(&lease), ME, 15, now), Availability::RenewDue);
    }

    #[test]
    fn other_holder_respected_until_full_expiry() {
        let now = Utc::now();
        let valid = held(OTHER, Some(10), 30, now);
        let a = availability(Some(&valid), ME, 15, now);
        assert!(!a.is_acquirable());
        assert_eq!(
            a,
            Availability::HeldByOther {
                holder: OTHER.to_string()
            }
        );

        // Inside the grace window of the holder but not expired for others.
        let late = held(OTHER, Some(20), 30, now);
        assert!(!availability(Some(&late), ME, 15, now).is_acquirable());

        let expired = held(OTHER, Some(31), 30, now);
        assert_eq!(
            availability(Some(&expired), ME, 15, now),
            Availability::Expired {
                holder: OTHER.to_string()
            }
        );
    }

    #[test]
    fn claim_from_nothing_uses_default_duration() {
        let now = Utc::now();
        let lease = Lease::claimed_by(None, &key(), ME, 42, now);
        let spec = lease.spec.as_ref().unwrap();
        assert_eq!(spec.holder_identity.as_deref(), Some(ME));
        assert_eq!(spec.lease_duration_seconds, Some(42));
        assert_eq!(spec.renew_time, Some(now));
        assert_eq!(spec.acquire_time, Some(now));
        assert_eq!(spec.lease_transitions, Some(0));
        assert_eq!(lease.metadata.name, "test-lease");
        assert!(lease.metadata.resource_version.is_none());
    }

    #[test]
    fn claim_preserves_existing_duration_and_counts_transitions() {
        let now = Utc::now();
        let mut prior = held(OTHER, Some(40), 30, now);
        prior.metadata.resource_version = Some("7".to_string());
        prior.spec.as_mut().unwrap().lease_transitions = Some(3);

        let taken = Lease::claimed_by(Some(&prior), &key(), ME, 99, now);
        let spec = taken.spec.as_ref().unwrap();
        assert_eq!(spec.lease_duration_seconds, Some(30));
        assert_eq!(spec.lease_transitions, Some(4));
        assert_eq!(taken.metadata.resource_version.as_deref(), Some("7"));

        let later = now + Duration::seconds(20);
        let renewed = Lease::claimed_by(Some(&taken), &key(), ME, 99, later);
        let spec = renewed.spec.as_ref().unwrap();
        assert_eq!(spec.lease_transitions, Some(4));
        assert_eq!(spec.acquire_time, Some(now));
        assert_eq!(spec.renew_time, Some(later));
    }

    #[test]
    fn claim_saturates_transition_count() {
        let now = Utc::now();
        let mut prior = held(OTHER, Some(40), 30, now);
        prior.spec.as_mut().unwrap().lease_transitions = Some(u32::MAX);

        let taken = Lease::claimed_by(Some(&prior), &key(), ME, 30, now);
        let spec = taken.spec.as_ref().unwrap();
        assert_eq!(spec.holder_identity.as_deref(), Some(ME));
        assert_eq!(spec.lease_transitions, Some(u32::MAX));
    }

    #[test]
    fn release_clears_holder_only() {
        let now = Utc::now();
        let lease = held(ME, Some(3), 30, now);
        let released = lease.released(now);
        assert_eq!(released.holder(), None);
        assert_eq!(released.duration_secs(), Some(30));
        assert_eq!(released.renew_time(), Some(now));
    }

    #[test]
    fn decodes_kubernetes_lease_json() {
        let raw = r#"{
            "apiVersion": "coordination.k8s.io/v1",
            "kind": "Lease",
            "metadata": {
                "name": "spring-leader-election",
                "namespace": "default",
                "resourceVersion": "1234",
                "uid": "5d9b0c52-6c4e-4f55-9a47-0c1a3f1e7e10"
            },
            "spec": {
                "holderIdentity": "abc",
                "leaseDurationSeconds": 30,
                "renewTime": "2024-05-01T10:00:00.123456Z",
                "leaseTransitions": 2
            }
        }"#;
        let lease: Lease = serde_json::from_str(raw).unwrap();
        assert_eq!(lease.holder(), Some("abc"));
        assert_eq!(lease.duration_secs(), Some(30));
        assert_eq!(lease.metadata.resource_version.as_deref(), Some("1234"));
        assert!(lease.metadata.extra.contains_key("uid"));

        let encoded = serde_json::to_value(&lease).unwrap();
        assert_eq!(encoded["spec"]["renewTime"], "2024-05-01T10:00:00.123456Z");
        assert_eq!(encoded["metadata"]["uid"], "5d9b0c52-6c4e-4f55-9a47-0c1a3f1e7e10");
        assert!(encoded["spec"].get("holderIdentity").is_some());
    }

    #[test]
    fn missing_spec_decodes_as_free() {
        let raw = r#"{"metadata": {"name": "x"}}"#;
        let lease: Lease = serde_json::from_str(raw).unwrap();
        assert_eq!(lease.kind, "Lease");
        assert_eq!(availability(Some(&lease), ME, 15, Utc::now()), Availability::Free);
    }

    #[test]
    fn storage_key_layout() {
        assert_eq!(key().storage_key(), "/registry/leases/default/test-lease");
        assert_eq!(key().to_string(), "default/test-lease");
    }
}
