//! kubectl invocations against one cluster context
//!
//! Builders return [`CommandSpec`]s; the `apply_*` and `wait_*` helpers run
//! them through the retry and poll primitives.

use serde_json::Value;

use crate::command::{CommandRunner, CommandSpec};
use crate::retry::{poll_until_ready, retry_with_interval, RetrySpec, WaitSpec};
use crate::Result;

/// Label selector that skips one-shot job pods
const NOT_A_JOB: &str = "!job-name";

/// kubectl bound to a kubeconfig context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kubectl {
    context: String,
}

impl Kubectl {
    /// Target `context`, e.g. `kind-knative`
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
        }
    }

    /// The context every command targets
    pub fn context(&self) -> &str {
        &self.context
    }

    fn base(&self) -> CommandSpec {
        CommandSpec::new("kubectl").args(["--context", self.context.as_str()])
    }

    /// `kubectl apply -f <url>`
    pub fn apply_url(&self, url: &str) -> CommandSpec {
        self.base().args(["apply", "-f", url])
    }

    /// `kubectl apply -f -` with `manifest` on stdin
    pub fn apply_stdin(&self, manifest: &str) -> CommandSpec {
        self.base().args(["apply", "-f", "-"]).stdin(manifest)
    }

    /// Wait for every non-job pod in `namespace` to be Ready
    pub fn wait_pods_ready(&self, namespace: &str, wait: &WaitSpec) -> CommandSpec {
        self.base().args([
            "wait".to_string(),
            "pod".to_string(),
            format!("--timeout={}s", wait.per_attempt.as_secs()),
            "--for=condition=Ready".to_string(),
            "-l".to_string(),
            NOT_A_JOB.to_string(),
            "-n".to_string(),
            namespace.to_string(),
        ])
    }

    /// Wait for all CRDs to be Established
    pub fn wait_crds_established(&self, wait: &WaitSpec) -> CommandSpec {
        self.base().args([
            "wait".to_string(),
            "--for=condition=Established".to_string(),
            "--all".to_string(),
            "crd".to_string(),
            format!("--timeout={}s", wait.per_attempt.as_secs()),
        ])
    }

    /// JSON merge patch of `resource` (e.g. `configmap/config-network`)
    pub fn patch_merge(&self, namespace: &str, resource: &str, patch: &Value) -> CommandSpec {
        self.base().args([
            "patch".to_string(),
            resource.to_string(),
            "-n".to_string(),
            namespace.to_string(),
            "--type".to_string(),
            "merge".to_string(),
            "-p".to_string(),
            patch.to_string(),
        ])
    }

    /// Delete a resource, tolerating its absence
    pub fn delete_ignore_missing(&self, namespace: &str, resource: &str) -> CommandSpec {
        self.base()
            .args(["delete", resource, "-n", namespace, "--ignore-not-found"])
    }

    /// `kubectl create configmap <name> --from-literal=k=v ...`
    pub fn create_configmap(
        &self,
        namespace: &str,
        name: &str,
        literals: &[(&str, &str)],
    ) -> CommandSpec {
        let mut spec = self.base().args(["create", "configmap", name, "-n", namespace]);
        for (key, value) in literals {
            spec = spec.arg(format!("--from-literal={}={}", key, value));
        }
        spec
    }

    /// `kubectl get namespaces -o name`
    pub fn get_namespaces(&self) -> CommandSpec {
        self.base().args(["get", "namespaces", "-o", "name"])
    }
}

/// Apply with bounded retry; the control plane may not be warmed up yet
pub async fn apply_with_retry(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
    retry: &RetrySpec,
    operation_name: &str,
) -> Result<()> {
    retry_with_interval(retry, operation_name, || async {
        runner.run_checked(spec).await.map(|_| ())
    })
    .await
}

/// Poll `kubectl wait pod` until the namespace's non-job pods are Ready
pub async fn wait_for_pods_ready(
    runner: &dyn CommandRunner,
    kubectl: &Kubectl,
    namespace: &str,
    wait: &WaitSpec,
) -> Result<()> {
    let spec = kubectl.wait_pods_ready(namespace, wait);
    let description = format!("pods in {}", namespace);
    poll_until_ready(wait, &description, || async {
        runner.run_checked(&spec).await.map(|_| ())
    })
    .await
}

/// Poll `kubectl wait crd` until every CRD is Established
pub async fn wait_for_crds_established(
    runner: &dyn CommandRunner,
    kubectl: &Kubectl,
    wait: &WaitSpec,
) -> Result<()> {
    let spec = kubectl.wait_crds_established(wait);
    poll_until_ready(wait, "CRDs to be established", || async {
        runner.run_checked(&spec).await.map(|_| ())
    })
    .await
}

/// Whether any namespace name contains "knative"
pub fn has_knative_namespace(namespaces_output: &str) -> bool {
    namespaces_output
        .lines()
        .map(|line| line.trim().trim_start_matches("namespace/"))
        .any(|ns| ns.contains("knative"))
}
