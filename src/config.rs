//! Run configuration.
//!
//! A [`ClusterConfig`] is built once from CLI flags (and their environment
//! variable fallbacks) at process start and passed by reference into
//! [`crate::setup::SetUp`]. Nothing reads ambient global state.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::{RetrySpec, WaitSpec};
use crate::{Error, Result};

/// Default cluster profile name for both backends
pub const DEFAULT_CLUSTER_NAME: &str = "knative";

/// Default kind node image tag
pub const DEFAULT_KIND_NODE_VERSION: &str = "v1.32.0";

/// Default Knative Serving release
pub const DEFAULT_SERVING_VERSION: &str = "1.17.0";

/// Default Kourier release
pub const DEFAULT_KOURIER_VERSION: &str = "1.17.0";

/// Default Knative Eventing release
pub const DEFAULT_EVENTING_VERSION: &str = "1.17.0";

/// Default host port for the local registry
pub const DEFAULT_REGISTRY_PORT: u16 = 5001;

/// Cluster provisioning backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// kind (Kubernetes in Docker)
    Kind,
    /// minikube
    Minikube,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Kind => write!(f, "kind"),
            Backend::Minikube => write!(f, "minikube"),
        }
    }
}

/// Host directory mounted into the cluster node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMount {
    /// Absolute path on the host
    pub host_path: PathBuf,
    /// Absolute path inside the node
    pub container_path: PathBuf,
}

impl HostMount {
    /// Parse `HOST:CONTAINER`
    pub fn parse(s: &str) -> Result<Self> {
        let (host, container) = s.split_once(':').ok_or_else(|| {
            Error::validation(format!(
                "invalid mount '{}', expected <host-path>:<container-path>",
                s
            ))
        })?;
        Ok(Self {
            host_path: PathBuf::from(host),
            container_path: PathBuf::from(container),
        })
    }
}

/// Release versions substituted into the manifest URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentVersions {
    /// Knative Serving
    pub serving: String,
    /// Kourier networking layer
    pub kourier: String,
    /// Knative Eventing
    pub eventing: String,
}

impl Default for ComponentVersions {
    fn default() -> Self {
        Self {
            serving: DEFAULT_SERVING_VERSION.to_string(),
            kourier: DEFAULT_KOURIER_VERSION.to_string(),
            eventing: DEFAULT_EVENTING_VERSION.to_string(),
        }
    }
}

/// Retry and wait bounds for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeouts {
    /// Manifest applies
    pub apply: RetrySpec,
    /// Pod and CRD readiness waits
    pub wait: WaitSpec,
    /// Cluster start, for backends where it is idempotent
    pub cluster_start: RetrySpec,
}

impl Timeouts {
    /// Overall bound for each readiness wait
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait.timeout = timeout;
        self
    }
}

/// Everything one provisioning run needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Cluster profile name; fixed for the whole run
    pub name: String,
    /// Backend; fixed for the whole run
    pub backend: Backend,
    /// Node image (kind) or Kubernetes version (minikube) override
    pub kubernetes_version: Option<String>,
    /// CPUs for the node (minikube)
    pub cpus: String,
    /// Memory for the node (minikube), e.g. "3g"
    pub memory: String,
    /// Address the ingress listens on and the sslip.io domain resolves to
    pub expose_address: String,
    /// Address the kind API server binds to
    pub api_server_address: String,
    /// Wire a local image registry into the cluster
    pub registry: bool,
    /// Host port of the local registry
    pub registry_port: u16,
    /// Extra host directory mounted into the node
    pub extra_host_mount: Option<HostMount>,
    /// Install Kourier and Knative Serving
    pub install_serving: bool,
    /// Install Knative Eventing
    pub install_eventing: bool,
    /// Component release versions
    pub versions: ComponentVersions,
    /// Retry and wait bounds
    pub timeouts: Timeouts,
}

impl ClusterConfig {
    /// Defaults for `backend` with the given cluster name
    pub fn new(backend: Backend, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend,
            kubernetes_version: None,
            cpus: "3".to_string(),
            memory: "3g".to_string(),
            expose_address: "127.0.0.1".to_string(),
            api_server_address: "127.0.0.1".to_string(),
            registry: false,
            registry_port: DEFAULT_REGISTRY_PORT,
            extra_host_mount: None,
            install_serving: true,
            install_eventing: true,
            versions: ComponentVersions::default(),
            timeouts: Timeouts::default(),
        }
    }

    /// Select components; asking for neither means both
    pub fn with_components(mut self, serving: bool, eventing: bool) -> Self {
        if !serving && !eventing {
            self.install_serving = true;
            self.install_eventing = true;
        } else {
            self.install_serving = serving;
            self.install_eventing = eventing;
        }
        self
    }

    /// Reject values that would only fail later inside an external tool
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::validation("cluster name must not be empty"));
        }
        if !is_dns_label(&self.name) {
            return Err(Error::validation(format!(
                "cluster name '{}' must be lowercase alphanumeric or '-', start and end alphanumeric, at most 63 characters",
                self.name
            )));
        }
        if self.cpus.trim().is_empty() {
            return Err(Error::validation("cpus must not be empty"));
        }
        if self.memory.trim().is_empty() {
            return Err(Error::validation("memory must not be empty"));
        }
        for (flag, address) in [
            ("expose address", &self.expose_address),
            ("API server address", &self.api_server_address),
        ] {
            if address.parse::<IpAddr>().is_err() {
                return Err(Error::validation(format!(
                    "{} '{}' must be an IP address",
                    flag, address
                )));
            }
        }
        if self.registry_port == 0 {
            return Err(Error::validation("registry port must be non-zero"));
        }
        if let Some(mount) = &self.extra_host_mount {
            if !mount.host_path.is_absolute() || !mount.container_path.is_absolute() {
                return Err(Error::validation(format!(
                    "mount paths must be absolute: {}:{}",
                    mount.host_path.display(),
                    mount.container_path.display()
                )));
            }
        }
        Ok(())
    }
}

fn is_dns_label(name: &str) -> bool {
    let bytes = name.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-'
}
