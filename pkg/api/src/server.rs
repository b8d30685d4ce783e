use axum::{Router, middleware, routing::get};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::AppState;
use crate::handlers::status;
use crate::request_id::request_id_middleware;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(status::healthz))
        .route("/api/v1/leader", get(status::leader_status))
        .route("/api/v1/lease", get(status::current_lease))
        .route("/metrics", get(status::metrics))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Serve the status API on an already bound listener until `shutdown` turns true.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!("Starting status server on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;
    info!("Status server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_metrics::MetricsRegistry;
    use pkg_state::leader::{ElectorConfig, LeaseElector};
    use pkg_state::memory::MemoryLeaseStore;
    use pkg_types::lease::{Lease, LeaseKey};
    use pkg_types::status::LeaderStatus;
    use std::sync::Arc;

    async fn spawn_server(
        store: &MemoryLeaseStore,
    ) -> (String, Arc<LeaseElector>, watch::Sender<bool>) {
        let elector = Arc::new(LeaseElector::new(
            Arc::new(store.clone()),
            ElectorConfig::new(LeaseKey::new("default", "status-test")),
            Arc::new(MetricsRegistry::for_elector()),
        ));
        let (tx, rx) = watch::channel(false);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let state = AppState {
            elector: elector.clone(),
        };
        tokio::spawn(async move { serve(listener, state, rx).await.unwrap() });
        (base, elector, tx)
    }

    #[tokio::test]
    async fn leader_and_lease_endpoints_follow_the_store() {
        let store = MemoryLeaseStore::new();
        let (base, elector, _tx) = spawn_server(&store).await;
        let client = reqwest::Client::new();

        let resp = client.get(format!("{}/healthz", base)).send().await.unwrap();
        assert!(resp.status().is_success());
        assert!(resp.headers().contains_key("x-request-id"));

        let resp = client.get(format!("{}/api/v1/lease", base)).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 404);

        let status: LeaderStatus = client
            .get(format!("{}/api/v1/leader", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!status.leader);
        assert_eq!(status.identity, elector.identity());
        assert_eq!(status.backend, "memory");

        elector.check_and_acquire().await;

        let status: LeaderStatus = client
            .get(format!("{}/api/v1/leader", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(status.leader);

        let lease: Lease = client
            .get(format!("{}/api/v1/lease", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(lease.holder(), Some(elector.identity()));

        let text = client
            .get(format!("{}/metrics", base))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(text.contains("lease_elector_acquired_total 1"));
    }

    #[tokio::test]
    async fn store_outage_is_reported() {
        let store = MemoryLeaseStore::new();
        let (base, _elector, _tx) = spawn_server(&store).await;
        store.set_fail_reads(true);

        let resp = reqwest::get(format!("{}/api/v1/lease", base)).await.unwrap();
        assert_eq!(resp.status().as_u16(), 502);

        let status: LeaderStatus = reqwest::get(format!("{}/api/v1/leader", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!status.leader);
    }
}
