use serde::{Deserialize, Serialize};

/// Elector configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// lease-name: spring-leader-election
/// namespace: default
/// lease-duration-seconds: 30
/// grace-period-seconds: 15
/// check-interval-seconds: 5
/// backend: kubernetes
/// kube-api-server: https://10.0.0.1:6443
/// status-port: 8080
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElectorConfigFile {
    #[serde(default, alias = "lease-name")]
    pub lease_name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default, alias = "lease-duration-seconds")]
    pub lease_duration_seconds: Option<u32>,
    #[serde(default, alias = "grace-period-seconds")]
    pub grace_period_seconds: Option<u32>,
    #[serde(default, alias = "check-interval-seconds")]
    pub check_interval_seconds: Option<u64>,
    #[serde(default)]
    pub backend: Option<StoreBackend>,
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default, alias = "kube-api-server")]
    pub kube_api_server: Option<String>,
    #[serde(default, alias = "kube-token-file")]
    pub kube_token_file: Option<String>,
    #[serde(default, alias = "kube-ca-file")]
    pub kube_ca_file: Option<String>,
    #[serde(default, alias = "status-port")]
    pub status_port: Option<u16>,
    #[serde(default, alias = "request-timeout-seconds")]
    pub request_timeout_seconds: Option<u64>,
}

/// Which lease store the elector talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local; only useful for demos and tests.
    #[default]
    Memory,
    /// SlateDB on the local filesystem.
    Slatedb,
    /// `coordination.k8s.io/v1` Lease objects through the Kubernetes API.
    Kubernetes,
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "slatedb" => Ok(StoreBackend::Slatedb),
            "kubernetes" | "kube" | "k8s" => Ok(StoreBackend::Kubernetes),
            other => anyhow::bail!("unknown store backend '{}'", other),
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Slatedb => "slatedb",
            StoreBackend::Kubernetes => "kubernetes",
        };
        write!(f, "{}", name)
    }
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
