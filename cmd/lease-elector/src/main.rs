use clap::Parser;
use pkg_api::AppState;
use pkg_api::server::serve;
use pkg_constants::network::{DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_STATUS_PORT};
use pkg_constants::paths::{DEFAULT_ELECTOR_CONFIG, DEFAULT_ELECTOR_DATA_DIR};
use pkg_constants::state::{
    DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_GRACE_PERIOD_SECS, DEFAULT_LEASE_DURATION_SECS,
    DEFAULT_LEASE_NAME, DEFAULT_LEASE_NAMESPACE,
};
use pkg_controllers::guarded::{GuardedTask, HeartbeatDuty};
use pkg_metrics::MetricsRegistry;
use pkg_state::kube::{KubeConfig, KubeLeaseStore};
use pkg_state::leader::{ElectorConfig, LeaseElector};
use pkg_state::memory::MemoryLeaseStore;
use pkg_state::slate::SlateLeaseStore;
use pkg_state::store::LeaseStore;
use pkg_types::config::{ElectorConfigFile, StoreBackend, load_config_file};
use pkg_types::lease::LeaseKey;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Default)]
#[command(name = "lease-elector", about = "Lease-based leader election")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_ELECTOR_CONFIG)]
    config: String,

    /// Name of the lease object
    #[arg(long)]
    lease_name: Option<String>,

    /// Namespace the lease lives in
    #[arg(long)]
    namespace: Option<String>,

    /// Lease duration used when creating the lease, in seconds
    #[arg(long)]
    lease_duration: Option<u32>,

    /// How early the holder renews before its lease lapses, in seconds
    #[arg(long)]
    grace_period: Option<u32>,

    /// Seconds between election ticks
    #[arg(long)]
    check_interval: Option<u64>,

    /// Lease store backend: memory, slatedb or kubernetes
    #[arg(long)]
    backend: Option<StoreBackend>,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Kubernetes API server URL (defaults to the in-cluster service)
    #[arg(long)]
    kube_api_server: Option<String>,

    /// Bearer token file for the Kubernetes API
    #[arg(long)]
    kube_token_file: Option<String>,

    /// CA bundle for the Kubernetes API
    #[arg(long)]
    kube_ca_file: Option<String>,

    /// Port for the status API
    #[arg(long)]
    status_port: Option<u16>,

    /// Timeout for each lease store call, in seconds
    #[arg(long)]
    request_timeout: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

/// Effective settings after merging CLI args > config file > defaults.
#[derive(Debug, Clone, PartialEq)]
struct Settings {
    key: LeaseKey,
    lease_duration_secs: u32,
    grace_period_secs: u32,
    check_interval: Duration,
    backend: StoreBackend,
    data_dir: String,
    kube_api_server: Option<String>,
    kube_token_file: Option<String>,
    kube_ca_file: Option<String>,
    status_port: u16,
    request_timeout: Duration,
}

impl Settings {
    fn merge(cli: Cli, file: ElectorConfigFile) -> Self {
        let name = cli
            .lease_name
            .or(file.lease_name)
            .unwrap_or_else(|| DEFAULT_LEASE_NAME.to_string());
        let namespace = cli
            .namespace
            .or(file.namespace)
            .unwrap_or_else(|| DEFAULT_LEASE_NAMESPACE.to_string());

        Self {
            key: LeaseKey::new(namespace, name),
            lease_duration_secs: cli
                .lease_duration
                .or(file.lease_duration_seconds)
                .unwrap_or(DEFAULT_LEASE_DURATION_SECS),
            grace_period_secs: cli
                .grace_period
                .or(file.grace_period_seconds)
                .unwrap_or(DEFAULT_GRACE_PERIOD_SECS),
            check_interval: Duration::from_secs(
                cli.check_interval
                    .or(file.check_interval_seconds)
                    .unwrap_or(DEFAULT_CHECK_INTERVAL_SECS),
            ),
            backend: cli.backend.or(file.backend).unwrap_or_default(),
            data_dir: cli
                .data_dir
                .or(file.data_dir)
                .unwrap_or_else(|| DEFAULT_ELECTOR_DATA_DIR.to_string()),
            kube_api_server: cli.kube_api_server.or(file.kube_api_server),
            kube_token_file: cli.kube_token_file.or(file.kube_token_file),
            kube_ca_file: cli.kube_ca_file.or(file.kube_ca_file),
            status_port: cli
                .status_port
                .or(file.status_port)
                .unwrap_or(DEFAULT_STATUS_PORT),
            request_timeout: Duration::from_secs(
                cli.request_timeout
                    .or(file.request_timeout_seconds)
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
        }
    }

    fn elector_config(&self) -> ElectorConfig {
        let mut config = ElectorConfig::new(self.key.clone());
        config.default_lease_duration_secs = self.lease_duration_secs;
        config.grace_period_secs = self.grace_period_secs;
        config.check_interval = self.check_interval;
        config
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn LeaseStore>> {
    let store: Arc<dyn LeaseStore> = match settings.backend {
        StoreBackend::Memory => {
            warn!("Memory backend selected: the lease is only visible to this process");
            Arc::new(MemoryLeaseStore::new())
        }
        StoreBackend::Slatedb => Arc::new(SlateLeaseStore::open(&settings.data_dir).await?),
        StoreBackend::Kubernetes => {
            let config = KubeConfig::resolve(
                settings.kube_api_server.clone(),
                settings.kube_token_file.as_deref(),
                settings.kube_ca_file.as_deref(),
                settings.request_timeout,
            )?;
            Arc::new(KubeLeaseStore::new(config)?)
        }
    };
    Ok(store)
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    // Load config file (returns defaults if file not found)
    let file_cfg: ElectorConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    let settings = Settings::merge(cli, file_cfg);
    let elector_config = settings.elector_config();
    elector_config.validate()?;

    info!("Starting lease-elector");
    info!("  Identity:  {}", elector_config.identity);
    info!("  Lease:     {}", settings.key);
    info!("  Backend:   {}", settings.backend);
    info!(
        "  Timing:    duration={}s grace={}s interval={}s",
        settings.lease_duration_secs,
        settings.grace_period_secs,
        settings.check_interval.as_secs()
    );
    info!("  Status:    :{}", settings.status_port);

    let store = open_store(&settings).await?;
    let metrics = Arc::new(MetricsRegistry::for_elector());
    let elector = Arc::new(LeaseElector::new(store.clone(), elector_config, metrics));

    let listener =
        TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], settings.status_port))).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let election = elector.clone().start(shutdown_rx.clone());
    let duty = GuardedTask::new(
        elector.clone(),
        Arc::new(HeartbeatDuty::new()),
        settings.check_interval,
    )
    .start(shutdown_rx.clone());
    let status_state = AppState {
        elector: elector.clone(),
    };
    let status = tokio::spawn(async move {
        if let Err(e) = serve(listener, status_state, shutdown_rx).await {
            error!("Status server error: {:#}", e);
        }
    });

    shutdown_signal().await?;
    info!("Shutdown signal received, stopping lease-elector");
    let _ = shutdown_tx.send(true);

    for (name, handle) in [("election", election), ("duty", duty), ("status", status)] {
        if let Err(e) = handle.await {
            warn!("{} task ended abnormally: {}", name, e);
        }
    }

    // The election loop has stopped, so nothing can re-acquire after this.
    let outcome = elector.release().await;
    info!("Release on shutdown: {:?}", outcome);

    if let Err(e) = store.close().await {
        warn!("Failed to close lease store: {:#}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_file_overrides_defaults() {
        let cli = Cli {
            lease_name: Some("from-cli".to_string()),
            grace_period: Some(5),
            ..Default::default()
        };
        let file = ElectorConfigFile {
            lease_name: Some("from-file".to_string()),
            namespace: Some("jobs".to_string()),
            lease_duration_seconds: Some(20),
            backend: Some(StoreBackend::Slatedb),
            ..Default::default()
        };

        let settings = Settings::merge(cli, file);
        assert_eq!(settings.key, LeaseKey::new("jobs", "from-cli"));
        assert_eq!(settings.lease_duration_secs, 20);
        assert_eq!(settings.grace_period_secs, 5);
        assert_eq!(
            settings.check_interval,
            Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS)
        );
        assert_eq!(settings.backend, StoreBackend::Slatedb);
        assert_eq!(settings.status_port, DEFAULT_STATUS_PORT);

        let config = settings.elector_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_lease_duration_secs, 20);
    }

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::merge(Cli::default(), ElectorConfigFile::default());
        assert_eq!(settings.backend, StoreBackend::Memory);
        assert!(settings.elector_config().validate().is_ok());
    }

    #[test]
    fn grace_not_below_duration_is_rejected() {
        let cli = Cli {
            lease_duration: Some(10),
            grace_period: Some(10),
            ..Default::default()
        };
        let settings = Settings::merge(cli, ElectorConfigFile::default());
        assert!(settings.elector_config().validate().is_err());
    }

    #[test]
    fn cli_parses_backend() {
        let cli = Cli::parse_from(["lease-elector", "--backend", "kubernetes", "--log-json"]);
        assert_eq!(cli.backend, Some(StoreBackend::Kubernetes));
        assert!(cli.log_json);
        assert_eq!(cli.config, DEFAULT_ELECTOR_CONFIG);
    }
}
