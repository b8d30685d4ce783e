use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, info};

use pkg_constants::kube::{
    LEASE_API_VERSION, SERVICE_ACCOUNT_CA, SERVICE_ACCOUNT_TOKEN, SERVICE_HOST_ENV,
    SERVICE_PORT_ENV,
};
use pkg_types::lease::{Lease, LeaseKey};

use crate::store::{LeaseStore, WriteOutcome};

/// Connection settings for the Kubernetes API server.
#[derive(Debug, Clone)]
pub struct KubeConfig {
    pub api_server: String,
    pub token: Option<String>,
    pub ca_pem: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl KubeConfig {
    /// Resolve settings, falling back to the in-cluster service account for
    /// anything not given explicitly.
    pub fn resolve(
        api_server: Option<String>,
        token_file: Option<&str>,
        ca_file: Option<&str>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let api_server = match api_server {
            Some(s) => s,
            None => in_cluster_server()?,
        };

        let token = read_optional(token_file.unwrap_or(SERVICE_ACCOUNT_TOKEN), token_file.is_some())?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            .filter(|t| !t.is_empty());
        let ca_pem = read_optional(ca_file.unwrap_or(SERVICE_ACCOUNT_CA), ca_file.is_some())?;

        Ok(Self {
            api_server,
            token,
            ca_pem,
            timeout,
        })
    }
}

fn in_cluster_server() -> anyhow::Result<String> {
    let host = std::env::var(SERVICE_HOST_ENV).map_err(|_| {
        anyhow::anyhow!(
            "no Kubernetes API server configured and {} is not set",
            SERVICE_HOST_ENV
        )
    })?;
    let port = std::env::var(SERVICE_PORT_ENV).unwrap_or_else(|_| "443".to_string());
    if host.contains(':') {
        Ok(format!("https://[{}]:{}", host, port))
    } else {
        Ok(format!("https://{}:{}", host, port))
    }
}

/// Read a file that is only mandatory when the user named it explicitly.
fn read_optional(path: &str, required: bool) -> anyhow::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow::anyhow!("Failed to read {}: {}", path, e)),
    }
}

/// Lease store backed by `coordination.k8s.io/v1` Lease objects.
///
/// Creates go through `POST` (409 AlreadyExists is a conflict); replaces go
/// through `PUT` carrying `metadata.resourceVersion` (409 is a conflict).
pub struct KubeLeaseStore {
    client: Client,
    api_server: String,
    token: Option<String>,
}

impl KubeLeaseStore {
    pub fn new(config: KubeConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder().timeout(config.timeout);
        if let Some(pem) = &config.ca_pem {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
        }
        let api_server = config.api_server.trim_end_matches('/').to_string();
        info!(
            "Using Kubernetes lease store at {} (token={})",
            api_server,
            if config.token.is_some() { "set" } else { "none" }
        );
        Ok(Self {
            client: builder.build()?,
            api_server,
            token: config.token,
        })
    }

    fn collection_url(&self, namespace: &str) -> String {
        format!(
            "{}/apis/{}/namespaces/{}/leases",
            self.api_server, LEASE_API_VERSION, namespace
        )
    }

    fn lease_url(&self, key: &LeaseKey) -> String {
        format!("{}/{}", self.collection_url(&key.namespace), key.name)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn unexpected(op: &str, key: &LeaseKey, resp: Response) -> anyhow::Error {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    anyhow::anyhow!("Kubernetes {} of lease {} failed: {} - {}", op, key, status, body)
}

#[async_trait]
impl LeaseStore for KubeLeaseStore {
    async fn get(&self, key: &LeaseKey) -> anyhow::Result<Option<Lease>> {
        let resp = self
            .authed(self.client.get(self.lease_url(key)))
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(resp.json().await?)),
            _ => Err(unexpected("get", key, resp).await),
        }
    }

    async fn write(&self, key: &LeaseKey, lease: &Lease) -> anyhow::Result<WriteOutcome> {
        let mut body = lease.clone();
        body.metadata.name = key.name.clone();
        body.metadata.namespace = key.namespace.clone();

        let request = match &body.metadata.resource_version {
            None => self.client.post(self.collection_url(&key.namespace)),
            Some(_) => self.client.put(self.lease_url(key)),
        };
        let resp = self.authed(request).json(&body).send().await?;

        match resp.status() {
            StatusCode::CONFLICT => {
                debug!("Kubernetes reported a conflict writing lease {}", key);
                Ok(WriteOutcome::Conflict)
            }
            s if s.is_success() => Ok(WriteOutcome::Applied(resp.json().await?)),
            _ => Err(unexpected("write", key, resp).await),
        }
    }

    fn backend(&self) -> &'static str {
        "kubernetes"
    }
}
