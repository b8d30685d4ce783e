use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pkg_metrics::GUARDED_RUNS_TOTAL;
use pkg_state::leader::LeaseElector;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Work that only the current lease holder may perform.
#[async_trait]
pub trait LeaderDuty: Send + Sync {
    fn name(&self) -> &str;

    async fn run_once(&self) -> anyhow::Result<()>;
}

/// Background task that runs a `LeaderDuty` on a fixed interval, asking the
/// elector for a fresh leadership answer right before every run.
pub struct GuardedTask {
    elector: Arc<LeaseElector>,
    duty: Arc<dyn LeaderDuty>,
    interval: Duration,
}

impl GuardedTask {
    pub fn new(elector: Arc<LeaseElector>, duty: Arc<dyn LeaderDuty>, interval: Duration) -> Self {
        Self {
            elector,
            duty,
            interval,
        }
    }

    /// Run the duty once if we are leader. Returns whether it ran.
    pub async fn run_if_leader(&self) -> bool {
        // Unknown leadership is treated the same as not leader.
        if !self.elector.is_leader().await {
            debug!(
                "[{}] not leader, skipping {}",
                self.elector.identity(),
                self.duty.name()
            );
            return false;
        }

        if let Err(e) = self.duty.run_once().await {
            warn!(
                "[{}] {} failed: {:#}",
                self.elector.identity(),
                self.duty.name(),
                e
            );
        }
        self.elector.metrics().counter_inc(GUARDED_RUNS_TOTAL);
        true
    }

    /// Start the task loop in the background; it exits when `shutdown` turns true.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "GuardedTask {} started (interval={}s)",
                self.duty.name(),
                self.interval.as_secs()
            );
            let mut interval = tokio::time::interval(self.interval);
            while !*shutdown.borrow() {
                tokio::select! {
                    _ = interval.tick() => {
                        self.run_if_leader().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            info!("GuardedTask {} stopped", self.duty.name());
        })
    }
}

/// Demo duty: records a heartbeat each time it runs as leader.
#[derive(Default)]
pub struct HeartbeatDuty {
    last_beat: Mutex<Option<DateTime<Utc>>>,
}

impl HeartbeatDuty {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_beat(&self) -> Option<DateTime<Utc>> {
        *self.last_beat.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LeaderDuty for HeartbeatDuty {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn run_once(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let previous = self
            .last_beat
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(now);
        match previous {
            Some(prev) => info!(
                "Leader heartbeat ({}ms since last)",
                (now - prev).num_milliseconds()
            ),
            None => info!("Leader heartbeat (first run)"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_metrics::MetricsRegistry;
    use pkg_state::leader::ElectorConfig;
    use pkg_state::memory::MemoryLeaseStore;
    use pkg_types::lease::LeaseKey;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDuty {
        runs: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl LeaderDuty for CountingDuty {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run_once(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("duty failed");
            }
            Ok(())
        }
    }

    fn elector(store: &MemoryLeaseStore, identity: &str) -> Arc<LeaseElector> {
        let mut config = ElectorConfig::new(LeaseKey::new("default", "guarded"));
        config.identity = identity.to_string();
        Arc::new(LeaseElector::new(
            Arc::new(store.clone()),
            config,
            Arc::new(MetricsRegistry::for_elector()),
        ))
    }

    fn duty(fail: bool) -> Arc<CountingDuty> {
        Arc::new(CountingDuty {
            runs: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn runs_only_while_leader() {
        let store = MemoryLeaseStore::new();
        let leader = elector(&store, "leader");
        let follower = elector(&store, "follower");
        let d = duty(false);

        let leader_task = GuardedTask::new(leader.clone(), d.clone(), Duration::from_secs(1));
        let follower_task = GuardedTask::new(follower.clone(), d.clone(), Duration::from_secs(1));

        assert!(!leader_task.run_if_leader().await);
        leader.check_and_acquire().await;
        follower.check_and_acquire().await;

        assert!(leader_task.run_if_leader().await);
        assert!(!follower_task.run_if_leader().await);
        assert_eq!(d.runs.load(Ordering::SeqCst), 1);
        assert_eq!(leader.metrics().counter_value(GUARDED_RUNS_TOTAL), Some(1));

        leader.release().await;
        assert!(!leader_task.run_if_leader().await);
        assert_eq!(d.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn store_outage_blocks_duty() {
        let store = MemoryLeaseStore::new();
        let leader = elector(&store, "leader");
        let d = duty(false);
        let task = GuardedTask::new(leader.clone(), d.clone(), Duration::from_secs(1));

        leader.check_and_acquire().await;
        store.set_fail_reads(true);
        assert!(!task.run_if_leader().await);
        assert_eq!(d.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duty_errors_are_contained() {
        let store = MemoryLeaseStore::new();
        let leader = elector(&store, "leader");
        let d = duty(true);
        let task = GuardedTask::new(leader.clone(), d.clone(), Duration::from_secs(1));

        leader.check_and_acquire().await;
        assert!(task.run_if_leader().await);
        assert!(task.run_if_leader().await);
        assert_eq!(d.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn heartbeat_records_each_run() {
        let beat = HeartbeatDuty::new();
        assert!(beat.last_beat().is_none());
        beat.run_once().await.unwrap();
        let first = beat.last_beat().unwrap();
        beat.run_once().await.unwrap();
        assert!(beat.last_beat().unwrap() >= first);
    }
}
