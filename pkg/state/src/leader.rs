use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pkg_constants::state::{
    DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_GRACE_PERIOD_SECS, DEFAULT_LEASE_DURATION_SECS,
};
use pkg_metrics::{
    ACQUIRED_TOTAL, CONFLICTS_TOTAL, IS_LEADER, MetricsRegistry, RELEASES_TOTAL, RENEWED_TOTAL,
    STORE_ERRORS_TOTAL, TICKS_TOTAL,
};
use pkg_types::lease::{Availability, Lease, LeaseKey, availability};
use pkg_types::validate::validate_lease_timing;

use crate::store::{LeaseStore, WriteOutcome};

/// Static election settings, fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ElectorConfig {
    /// This process's candidate holder identity. Never shared with another process.
    pub identity: String,
    pub key: LeaseKey,
    /// Duration written when the lease does not exist yet.
    pub default_lease_duration_secs: u32,
    pub grace_period_secs: u32,
    pub check_interval: Duration,
}

impl ElectorConfig {
    /// Defaults for `key` with a freshly generated identity.
    pub fn new(key: LeaseKey) -> Self {
        Self {
            identity: Uuid::new_v4().to_string(),
            key,
            default_lease_duration_secs: DEFAULT_LEASE_DURATION_SECS,
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.identity.is_empty() {
            anyhow::bail!("holder identity must not be empty");
        }
        self.key.validate()?;
        validate_lease_timing(self.default_lease_duration_secs, self.grace_period_secs)?;
        if self.check_interval.is_zero() {
            anyhow::bail!("check interval must be greater than zero");
        }
        Ok(())
    }
}

/// What one election tick observed or did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Took a free or expired lease.
    Acquired,
    /// Renewed our own lease inside the grace window.
    Renewed,
    /// We hold the lease and it is not due for renewal; nothing written.
    Held,
    /// Someone else holds a valid lease; nothing written.
    HeldByOther { holder: String },
    /// Another writer got there first.
    Conflict,
    /// The store could not be read or written.
    Failed,
}

impl TickOutcome {
    pub fn is_leader(&self) -> bool {
        matches!(
            self,
            TickOutcome::Acquired | TickOutcome::Renewed | TickOutcome::Held
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// We were not the holder; nothing written.
    NotHolder,
    Conflict,
    Failed,
}

/// Lease-based leader election.
///
/// Every operation re-reads the lease; no leadership state is cached between
/// ticks. Writes are compare-and-swap against the version just read, so the
/// store alone decides races and the elector holds no locks of its own.
pub struct LeaseElector {
    store: Arc<dyn LeaseStore>,
    config: ElectorConfig,
    metrics: Arc<MetricsRegistry>,
    leader_tx: watch::Sender<bool>,
}

impl LeaseElector {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        config: ElectorConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let (leader_tx, _) = watch::channel(false);
        Self {
            store,
            config,
            metrics,
            leader_tx,
        }
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    pub fn key(&self) -> &LeaseKey {
        &self.config.key
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Leadership as observed by the most recent tick or release.
    ///
    /// This is for reacting to transitions; callers about to do leader-only
    /// work must ask `is_leader()` instead.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.leader_tx.subscribe()
    }

    /// Fetch the lease fresh and report whether we hold it.
    /// A missing lease or a store failure counts as not leader.
    pub async fn is_leader(&self) -> bool {
        match self.store.get(&self.config.key).await {
            Ok(lease) => lease.is_some_and(|l| l.is_held_by(&self.config.identity)),
            Err(e) => {
                self.metrics.counter_inc(STORE_ERRORS_TOTAL);
                error!(
                    "[{}] leadership check on lease {} failed: {:#}",
                    self.config.identity, self.config.key, e
                );
                false
            }
        }
    }

    /// Fetch the lease as currently stored.
    pub async fn current(&self) -> anyhow::Result<Option<Lease>> {
        self.store.get(&self.config.key).await
    }

    /// One election tick: read, decide, and conditionally write.
    pub async fn check_and_acquire(&self) -> TickOutcome {
        self.metrics.counter_inc(TICKS_TOTAL);
        let outcome = self.try_acquire_or_renew().await;

        let is_leader = outcome.is_leader();
        self.metrics.gauge_set(IS_LEADER, i64::from(is_leader));
        let was_leader = self.leader_tx.send_replace(is_leader);
        if is_leader && !was_leader {
            info!(
                "[{}] this instance is now the LEADER for {}",
                self.config.identity, self.config.key
            );
        } else if !is_leader && was_leader {
            warn!(
                "[{}] leadership of {} LOST ({:?})",
                self.config.identity, self.config.key, outcome
            );
        }
        outcome
    }

    async fn try_acquire_or_renew(&self) -> TickOutcome {
        let id = &self.config.identity;
        let key = &self.config.key;

        let current = match self.store.get(key).await {
            Ok(lease) => lease,
            Err(e) => {
                self.metrics.counter_inc(STORE_ERRORS_TOTAL);
                error!("[{}] error reading lease {}: {:#}", id, key, e);
                return TickOutcome::Failed;
            }
        };

        let now = Utc::now();
        let state = availability(current.as_ref(), id, self.config.grace_period_secs, now);
        match &state {
            Availability::HeldBySelf => {
                debug!("[{}] lease {} held, renewal not yet due", id, key);
                return TickOutcome::Held;
            }
            Availability::HeldByOther { holder } => {
                info!("[{}] lease {} held by: {}", id, key, holder);
                return TickOutcome::HeldByOther {
                    holder: holder.clone(),
                };
            }
            Availability::Free | Availability::RenewDue | Availability::Expired { .. } => {}
        }

        match current.as_ref().and_then(Lease::duration_secs) {
            Some(duration) if duration <= self.config.grace_period_secs => warn!(
                "[{}] lease {} duration {}s does not exceed grace period {}s; renewing every tick",
                id, key, duration, self.config.grace_period_secs
            ),
            _ => {}
        }

        let desired = Lease::claimed_by(
            current.as_ref(),
            key,
            id,
            self.config.default_lease_duration_secs,
            now,
        );

        match self.store.write(key, &desired).await {
            Ok(WriteOutcome::Applied(_)) if state == Availability::RenewDue => {
                self.metrics.counter_inc(RENEWED_TOTAL);
                debug!("[{}] lease {} renewed", id, key);
                TickOutcome::Renewed
            }
            Ok(WriteOutcome::Applied(_)) => {
                self.metrics.counter_inc(ACQUIRED_TOTAL);
                match &state {
                    Availability::Expired { holder } => {
                        info!("[{}] lease {} acquired (expired holder: {})", id, key, holder)
                    }
                    _ => info!("[{}] lease {} acquired", id, key),
                }
                TickOutcome::Acquired
            }
            Ok(WriteOutcome::Conflict) => {
                self.metrics.counter_inc(CONFLICTS_TOTAL);
                warn!(
                    "[{}] lease conflict on {}: another instance wrote first",
                    id, key
                );
                TickOutcome::Conflict
            }
            Err(e) => {
                self.metrics.counter_inc(STORE_ERRORS_TOTAL);
                error!("[{}] error writing lease {}: {:#}", id, key, e);
                TickOutcome::Failed
            }
        }
    }

    /// Give the lease up if we hold it. The write is conditional on the
    /// version just read, so a lease another instance has since taken is
    /// never cleared.
    pub async fn release(&self) -> ReleaseOutcome {
        let id = &self.config.identity;
        let key = &self.config.key;

        let lease = match self.store.get(key).await {
            Ok(Some(lease)) if lease.is_held_by(id) => lease,
            Ok(_) => {
                debug!("[{}] not holding lease {}, nothing to release", id, key);
                return ReleaseOutcome::NotHolder;
            }
            Err(e) => {
                self.metrics.counter_inc(STORE_ERRORS_TOTAL);
                error!("[{}] error reading lease {} for release: {:#}", id, key, e);
                return ReleaseOutcome::Failed;
            }
        };

        info!("[{}] releasing lease {}", id, key);
        let outcome = match self.store.write(key, &lease.released(Utc::now())).await {
            Ok(WriteOutcome::Applied(_)) => {
                self.metrics.counter_inc(RELEASES_TOTAL);
                info!("[{}] released lease {}", id, key);
                ReleaseOutcome::Released
            }
            Ok(WriteOutcome::Conflict) => {
                self.metrics.counter_inc(CONFLICTS_TOTAL);
                warn!(
                    "[{}] lease {} changed before it could be released; leaving it alone",
                    id, key
                );
                ReleaseOutcome::Conflict
            }
            Err(e) => {
                self.metrics.counter_inc(STORE_ERRORS_TOTAL);
                error!("[{}] error releasing lease {}: {:#}", id, key, e);
                ReleaseOutcome::Failed
            }
        };
        self.metrics.gauge_set(IS_LEADER, 0);
        self.leader_tx.send_replace(false);
        outcome
    }

    /// Run ticks on a fixed interval until `shutdown` turns true.
    ///
    /// Ticks are awaited one after another, so a slow store call delays the
    /// next tick instead of overlapping it.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "LeaseElector started (identity={}, lease={}, backend={}, interval={}s, grace={}s)",
            self.config.identity,
            self.config.key,
            self.store.backend(),
            self.config.check_interval.as_secs(),
            self.config.grace_period_secs
        );

        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    self.check_and_acquire().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("[{}] LeaseElector stopped", self.config.identity);
    }

    /// Start the election loop as a background task.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
