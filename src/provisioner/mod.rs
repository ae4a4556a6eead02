//! Cluster provisioning backends
//!
//! A trait-based abstraction over the two local cluster tools. Each backend
//! implements [`ClusterProvisioner`]; [`provisioner_for`] picks one from the
//! run's [`ClusterConfig`].
//!
//! # Supported Backends
//!
//! - [`KindProvisioner`] - kind, with an optional local registry container
//! - [`MinikubeProvisioner`] - minikube, with a detached `minikube tunnel`
//!
//! Both share the same [`CommandRunner`] and retry/poll primitives; only the
//! commands they issue differ.

mod kind;
mod minikube;

pub use kind::{KindClusterConfig, KindProvisioner};
pub use minikube::MinikubeProvisioner;

use async_trait::async_trait;
use serde_json::json;

use crate::command::CommandRunner;
use crate::config::{Backend, ClusterConfig};
use crate::kubectl::{wait_for_pods_ready, Kubectl};
use crate::resolver::ClusterState;
use crate::retry::WaitSpec;
use crate::version::VersionRequirement;
use crate::Result;

/// Namespace of the control plane's own pods
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// Namespace Knative Serving installs into
pub const KNATIVE_SERVING_NAMESPACE: &str = "knative-serving";

/// Namespace Kourier installs into
pub const KOURIER_SYSTEM_NAMESPACE: &str = "kourier-system";

/// Ingress class value selecting Kourier
pub const KOURIER_INGRESS_CLASS: &str = "kourier.ingress.networking.knative.dev";

/// An external tool a backend needs on PATH, with an install hint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredTool {
    /// Executable name
    pub name: &'static str,
    /// How to get it
    pub hint: &'static str,
}

/// kubectl, needed by every backend
pub const KUBECTL: RequiredTool = RequiredTool {
    name: "kubectl",
    hint: "Install kubectl: https://kubernetes.io/docs/tasks/tools/",
};

/// A local cluster backend
#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    /// Which backend this is
    fn backend(&self) -> Backend;

    /// Target cluster profile name
    fn cluster_name(&self) -> &str;

    /// kubeconfig context the backend creates for the cluster
    fn kube_context(&self) -> String;

    /// Tools that must be on PATH before anything runs
    fn required_tools(&self) -> &'static [RequiredTool];

    /// Minimum version of the backend tool
    fn version_requirement(&self) -> &'static VersionRequirement;

    /// Whether the target profile exists, and whether it already runs Knative.
    ///
    /// An empty profile list is not an error.
    async fn cluster_state(&self, runner: &dyn CommandRunner) -> Result<ClusterState>;

    /// Delete the cluster and anything coupled to it (e.g. its registry)
    async fn delete_cluster(&self, runner: &dyn CommandRunner) -> Result<()>;

    /// Create the cluster and block until kube-system is Ready
    async fn create_cluster(&self, runner: &dyn CommandRunner) -> Result<()>;

    /// Backend-specific exposure of the networking layer.
    ///
    /// Runs after Serving core is Ready, since it edits Serving's config maps.
    async fn configure_network(&self, runner: &dyn CommandRunner, kubectl: &Kubectl)
        -> Result<()>;

    /// Registry host to exempt from tag resolution, when a registry is wired
    fn registry_host(&self) -> Option<String>;

    /// kubectl bound to this cluster's context
    fn kubectl(&self) -> Kubectl {
        Kubectl::new(self.kube_context())
    }
}

/// Build the provisioner for `config.backend`
pub fn provisioner_for(config: &ClusterConfig) -> Box<dyn ClusterProvisioner> {
    match config.backend {
        Backend::Kind => Box::new(KindProvisioner::new(config.clone())),
        Backend::Minikube => Box::new(MinikubeProvisioner::new(config.clone())),
    }
}

/// Block until the control plane's own pods are Ready
pub(crate) async fn wait_for_system_pods(
    runner: &dyn CommandRunner,
    kubectl: &Kubectl,
    wait: &WaitSpec,
) -> Result<()> {
    wait_for_pods_ready(runner, kubectl, KUBE_SYSTEM_NAMESPACE, wait).await
}

/// Point Knative's default domain at `<address>.sslip.io`
pub(crate) async fn configure_domain(
    runner: &dyn CommandRunner,
    kubectl: &Kubectl,
    address: &str,
) -> Result<()> {
    let patch = json!({ "data": { sslip_domain(address): "" } });
    runner
        .run_checked(&kubectl.patch_merge(
            KNATIVE_SERVING_NAMESPACE,
            "configmap/config-domain",
            &patch,
        ))
        .await?;
    Ok(())
}

/// Wildcard DNS domain resolving to `address`
pub fn sslip_domain(address: &str) -> String {
    format!("{}.sslip.io", address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_selects_implementation() {
        let kind = provisioner_for(&ClusterConfig::new(Backend::Kind, "demo"));
        assert_eq!(kind.backend(), Backend::Kind);
        assert_eq!(kind.kube_context(), "kind-demo");
        assert_eq!(kind.kubectl().context(), "kind-demo");

        let minikube = provisioner_for(&ClusterConfig::new(Backend::Minikube, "demo"));
        assert_eq!(minikube.backend(), Backend::Minikube);
        assert_eq!(minikube.kube_context(), "demo");
    }

    #[test]
    fn both_backends_need_kubectl() {
        for backend in [Backend::Kind, Backend::Minikube] {
            let p = provisioner_for(&ClusterConfig::new(backend, "demo"));
            assert!(p.required_tools().iter().any(|t| t.name == "kubectl"));
        }
    }

    #[test]
    fn sslip_domain_uses_address() {
        assert_eq!(sslip_domain("127.0.0.1"), "127.0.0.1.sslip.io");
    }
}
