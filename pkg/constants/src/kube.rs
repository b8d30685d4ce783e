//! Kubernetes API constants.

/// API group/version of the `Lease` resource.
pub const LEASE_API_VERSION: &str = "coordination.k8s.io/v1";

/// Kind of the `Lease` resource.
pub const LEASE_KIND: &str = "Lease";

/// Service-account token mounted into every pod.
pub const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Cluster CA bundle mounted into every pod.
pub const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Environment variable holding the in-cluster API server host.
pub const SERVICE_HOST_ENV: &str = "KUBERNETES_SERVICE_HOST";

/// Environment variable holding the in-cluster API server port.
pub const SERVICE_PORT_ENV: &str = "KUBERNETES_SERVICE_PORT";
