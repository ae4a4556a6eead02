//! kind backend
//!
//! The cluster config is generated per run from [`ClusterConfig`] and piped
//! to `kind create cluster --config=-`; nothing is written to disk.
//!
//! With a local registry requested, after the cluster is up:
//!
//! 1. **registry container** - `docker run ... registry:2`
//! 2. **network connect** - attach the container to the `kind` network
//! 3. **discovery config map** - publish `local-registry-hosting` in kube-public
//!
//! Each step depends on the one before it and they always run in this order.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::{
    configure_domain, wait_for_system_pods, ClusterProvisioner, RequiredTool,
    KNATIVE_SERVING_NAMESPACE, KOURIER_INGRESS_CLASS, KUBECTL,
};
use crate::command::{CommandRunner, CommandSpec};
use crate::config::{Backend, ClusterConfig, DEFAULT_KIND_NODE_VERSION};
use crate::error::StepExt;
use crate::kubectl::{apply_with_retry, has_knative_namespace, Kubectl};
use crate::resolver::ClusterState;
use crate::version::{ToolVersion, VersionRequirement};
use crate::Result;

const KIND_VERSION: VersionRequirement = VersionRequirement {
    tool: "kind",
    version_args: &["version"],
    minimum: ToolVersion::new(0, 26),
    download_url: "https://github.com/kubernetes-sigs/kind/releases",
};

const KIND_TOOLS: &[RequiredTool] = &[
    RequiredTool {
        name: "kind",
        hint: "Install kind: https://kind.sigs.k8s.io/docs/user/quick-start/#installation",
    },
    KUBECTL,
    RequiredTool {
        name: "docker",
        hint: "Install Docker: https://docs.docker.com/get-docker/",
    },
];

/// Node port the Kourier gateway is exposed on; mapped to host port 80
const KOURIER_NODE_PORT: u16 = 31080;

/// Port the registry listens on inside its container
const REGISTRY_CONTAINER_PORT: u16 = 5000;

/// Docker network kind attaches nodes to
const KIND_NETWORK: &str = "kind";

/// docker's answer for a container that does not exist
const NO_SUCH_CONTAINER: &[&str] = &["No such object", "No such container"];

/// docker's answer when the container is already on the network
const ALREADY_CONNECTED: &str = "already exists in network";

/// Printed on stderr by `kind get clusters` when there are none
const NO_KIND_CLUSTERS: &str = "No kind clusters found.";

/// NodePort service routing host port 80 to the Kourier gateway
const KOURIER_NODEPORT_SERVICE: &str = r#"apiVersion: v1
kind: Service
metadata:
  name: kourier-ingress
  namespace: kourier-system
  labels:
    networking.knative.dev/ingress-provider: kourier
spec:
  type: NodePort
  selector:
    app: 3scale-kourier-gateway
  ports:
    - name: http2
      nodePort: 31080
      port: 80
      targetPort: 8080
"#;

/// Generated `kind.x-k8s.io/v1alpha4` Cluster config
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KindClusterConfig {
    kind: &'static str,
    api_version: &'static str,
    name: String,
    networking: KindNetworking,
    nodes: Vec<KindNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    containerd_config_patches: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct KindNetworking {
    api_server_address: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct KindNode {
    role: &'static str,
    image: String,
    extra_port_mappings: Vec<KindPortMapping>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    extra_mounts: Vec<KindMount>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct KindPortMapping {
    container_port: u16,
    host_port: u16,
    listen_address: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct KindMount {
    host_path: String,
    container_path: String,
}

impl KindClusterConfig {
    /// Build the cluster config for `config`
    pub fn from_config(config: &ClusterConfig) -> Self {
        let extra_mounts = config
            .extra_host_mount
            .iter()
            .map(|m| KindMount {
                host_path: m.host_path.display().to_string(),
                container_path: m.container_path.display().to_string(),
            })
            .collect();

        let containerd_config_patches = if config.registry {
            vec![format!(
                "[plugins.\"io.containerd.grpc.v1.cri\".registry.mirrors.\"localhost:{}\"]\n  endpoint = [\"http://{}:{}\"]",
                config.registry_port,
                registry_container_name(&config.name),
                REGISTRY_CONTAINER_PORT
            )]
        } else {
            Vec::new()
        };

        Self {
            kind: "Cluster",
            api_version: "kind.x-k8s.io/v1alpha4",
            name: config.name.clone(),
            networking: KindNetworking {
                api_server_address: config.api_server_address.clone(),
            },
            nodes: vec![KindNode {
                role: "control-plane",
                image: node_image(config.kubernetes_version.as_deref()),
                extra_port_mappings: vec![KindPortMapping {
                    container_port: KOURIER_NODE_PORT,
                    host_port: 80,
                    listen_address: config.expose_address.clone(),
                }],
                extra_mounts,
            }],
            containerd_config_patches,
        }
    }

    /// Render as YAML for `kind create cluster --config=-`
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Full node image reference; a bare tag becomes `kindest/node:<tag>`
fn node_image(version: Option<&str>) -> String {
    match version {
        Some(v) if v.contains('/') || v.contains(':') => v.to_string(),
        Some(v) => format!("kindest/node:{}", v),
        None => format!("kindest/node:{}", DEFAULT_KIND_NODE_VERSION),
    }
}

/// Registry container coupled to a cluster profile
fn registry_container_name(cluster_name: &str) -> String {
    format!("{}-registry", cluster_name)
}

/// Cluster names from `kind get clusters` output
fn parse_cluster_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != NO_KIND_CLUSTERS)
        .map(str::to_string)
        .collect()
}

/// ConfigMap advertising the local registry to cluster tooling
fn registry_hosting_config_map(port: u16) -> String {
    format!(
        r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: local-registry-hosting
  namespace: kube-public
data:
  localRegistryHosting.v1: |
    host: "localhost:{}"
    help: "https://kind.sigs.k8s.io/docs/user/local-registry/"
"#,
        port
    )
}

/// kind-backed cluster provisioner
#[derive(Debug, Clone)]
pub struct KindProvisioner {
    config: ClusterConfig,
}

impl KindProvisioner {
    /// Create a provisioner for `config`
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    async fn list_clusters(&self, runner: &dyn CommandRunner) -> Result<Vec<String>> {
        let output = runner
            .run_checked(&CommandSpec::new("kind").args(["get", "clusters"]))
            .await?;
        Ok(parse_cluster_list(&output.stdout))
    }

    async fn knative_installed(&self, runner: &dyn CommandRunner) -> bool {
        match runner.run_checked(&self.kubectl().get_namespaces()).await {
            Ok(output) => has_knative_namespace(&output.stdout),
            Err(e) => {
                warn!(
                    cluster = %self.config.name,
                    error = %e,
                    "Could not list namespaces of existing cluster"
                );
                false
            }
        }
    }

    /// `Some(running)` when the registry container exists, `None` when absent
    async fn registry_state(&self, runner: &dyn CommandRunner, container: &str) -> Result<Option<bool>> {
        let spec = CommandSpec::new("docker").args(["inspect", "-f", "{{.State.Running}}", container]);
        let output = runner.run(&spec).await?;
        if output.success {
            return Ok(Some(output.stdout.trim() == "true"));
        }
        let combined = output.combined();
        if NO_SUCH_CONTAINER.iter().any(|m| combined.contains(m)) {
            return Ok(None);
        }
        output.into_result(&spec).map(|_| None)
    }

    async fn start_registry(&self, runner: &dyn CommandRunner) -> Result<()> {
        let container = registry_container_name(&self.config.name);

        match self.registry_state(runner, &container).await.step("registry container")? {
            Some(true) => info!("Reusing running local registry {}", container),
            Some(false) => {
                info!("Starting existing local registry {}", container);
                let start = CommandSpec::new("docker").args(["start", container.as_str()]);
                runner.run_checked(&start).await.step("registry container")?;
            }
            None => {
                info!("Starting local registry {} on port {}", container, self.config.registry_port);
                let run = CommandSpec::new("docker").args([
                    "run".to_string(),
                    "-d".to_string(),
                    "--restart=always".to_string(),
                    "-p".to_string(),
                    format!("127.0.0.1:{}:{}", self.config.registry_port, REGISTRY_CONTAINER_PORT),
                    "--network".to_string(),
                    "bridge".to_string(),
                    "--name".to_string(),
                    container.clone(),
                    "registry:2".to_string(),
                ]);
                runner.run_checked(&run).await.step("registry container")?;
            }
        }

        let connect =
            CommandSpec::new("docker").args(["network", "connect", KIND_NETWORK, container.as_str()]);
        let output = runner.run(&connect).await.step("registry network")?;
        if !output.combined().contains(ALREADY_CONNECTED) {
            output.into_result(&connect).step("registry network")?;
        }

        let config_map = self
            .kubectl()
            .apply_stdin(&registry_hosting_config_map(self.config.registry_port));
        apply_with_retry(
            runner,
            &config_map,
            &self.config.timeouts.apply,
            "registry config map apply",
        )
        .await
        .step("registry config map")?;

        Ok(())
    }

    async fn remove_registry(&self, runner: &dyn CommandRunner) -> Result<()> {
        let container = registry_container_name(&self.config.name);
        let spec = CommandSpec::new("docker").args(["rm", "-f", container.as_str()]);
        let output = runner.run(&spec).await?;
        if output.combined().contains("No such container") {
            return Ok(());
        }
        output.into_result(&spec).map(|_| ())
    }
}

#[async_trait]
impl ClusterProvisioner for KindProvisioner {
    fn backend(&self) -> Backend {
        Backend::Kind
    }

    fn cluster_name(&self) -> &str {
        &self.config.name
    }

    fn kube_context(&self) -> String {
        format!("kind-{}", self.config.name)
    }

    fn required_tools(&self) -> &'static [RequiredTool] {
        KIND_TOOLS
    }

    fn version_requirement(&self) -> &'static VersionRequirement {
        &KIND_VERSION
    }

    async fn cluster_state(&self, runner: &dyn CommandRunner) -> Result<ClusterState> {
        let clusters = self.list_clusters(runner).await?;
        if !clusters.iter().any(|c| c == &self.config.name) {
            return Ok(ClusterState::NoExistingCluster);
        }
        if self.knative_installed(runner).await {
            Ok(ClusterState::ClusterExistsWithKnative)
        } else {
            Ok(ClusterState::ClusterExistsNoKnative)
        }
    }

    async fn delete_cluster(&self, runner: &dyn CommandRunner) -> Result<()> {
        info!("Deleting kind cluster {}...", self.config.name);
        runner
            .run_checked(&CommandSpec::new("kind").args([
                "delete",
                "cluster",
                "--name",
                self.config.name.as_str(),
            ]))
            .await?;
        self.remove_registry(runner).await.step("registry")
    }

    async fn create_cluster(&self, runner: &dyn CommandRunner) -> Result<()> {
        info!("Creating kind cluster {}...", self.config.name);

        let cluster_config = KindClusterConfig::from_config(&self.config).to_yaml()?;
        let create = CommandSpec::new("kind")
            .args(["create", "cluster", "--wait=120s", "--config=-"])
            .stdin(cluster_config);
        runner.run_checked(&create).await.step("kind create")?;

        info!("Waiting on cluster to be ready...");
        wait_for_system_pods(runner, &self.kubectl(), &self.config.timeouts.wait)
            .await
            .step("kind ready")?;

        if self.config.registry {
            self.start_registry(runner).await?;
        }

        info!("Cluster created");
        Ok(())
    }

    async fn configure_network(
        &self,
        runner: &dyn CommandRunner,
        kubectl: &Kubectl,
    ) -> Result<()> {
        let ingress = json!({ "data": { "ingress-class": KOURIER_INGRESS_CLASS } });
        runner
            .run_checked(&kubectl.patch_merge(
                KNATIVE_SERVING_NAMESPACE,
                "configmap/config-network",
                &ingress,
            ))
            .await
            .step("ingress class")?;
        info!("Ingress patched...");

        apply_with_retry(
            runner,
            &kubectl.apply_stdin(KOURIER_NODEPORT_SERVICE),
            &self.config.timeouts.apply,
            "kourier service apply",
        )
        .await
        .step("kourier service")?;
        info!("Kourier service installed...");

        configure_domain(runner, kubectl, &self.config.expose_address)
            .await
            .step("domain dns")?;
        info!("Domain DNS set up...");
        Ok(())
    }

    fn registry_host(&self) -> Option<String> {
        self.config
            .registry
            .then(|| format!("localhost:{}", self.config.registry_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, MockCommandRunner};
    use crate::config::HostMount;

    #[test]
    fn generated_config_carries_name_image_and_port_mapping() {
        let config = ClusterConfig::new(Backend::Kind, "demo");
        let yaml = KindClusterConfig::from_config(&config).to_yaml().unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed["kind"].as_str(), Some("Cluster"));
        assert_eq!(parsed["apiVersion"].as_str(), Some("kind.x-k8s.io/v1alpha4"));
        assert_eq!(parsed["name"].as_str(), Some("demo"));
        assert_eq!(
            parsed["networking"]["apiServerAddress"].as_str(),
            Some("127.0.0.1")
        );

        let node = &parsed["nodes"][0];
        assert_eq!(node["role"].as_str(), Some("control-plane"));
        assert_eq!(node["image"].as_str(), Some("kindest/node:v1.32.0"));
        let mapping = &node["extraPortMappings"][0];
        assert_eq!(mapping["containerPort"].as_u64(), Some(31080));
        assert_eq!(mapping["hostPort"].as_u64(), Some(80));
        assert_eq!(mapping["listenAddress"].as_str(), Some("127.0.0.1"));

        assert!(node.get("extraMounts").is_none());
        assert!(parsed.get("containerdConfigPatches").is_none());
    }

    #[test]
    fn registry_adds_containerd_mirror() {
        let mut config = ClusterConfig::new(Backend::Kind, "demo");
        config.registry = true;
        let generated = KindClusterConfig::from_config(&config);
        assert_eq!(generated.containerd_config_patches.len(), 1);
        let patch = &generated.containerd_config_patches[0];
        assert!(patch.contains(r#"mirrors."localhost:5001""#));
        assert!(patch.contains("http://demo-registry:5000"));
    }

    #[test]
    fn extra_mount_is_rendered() {
        let mut config = ClusterConfig::new(Backend::Kind, "demo");
        config.extra_host_mount = Some(HostMount::parse("/src:/mnt/src").unwrap());
        let yaml = KindClusterConfig::from_config(&config).to_yaml().unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let mount = &parsed["nodes"][0]["extraMounts"][0];
        assert_eq!(mount["hostPath"].as_str(), Some("/src"));
        assert_eq!(mount["containerPath"].as_str(), Some("/mnt/src"));
    }

    #[test]
    fn node_image_override() {
        assert_eq!(node_image(Some("v1.31.2")), "kindest/node:v1.31.2");
        assert_eq!(
            node_image(Some("kindest/node:v1.31.2@sha256:abc")),
            "kindest/node:v1.31.2@sha256:abc"
        );
        assert_eq!(node_image(None), "kindest/node:v1.32.0");
    }

    #[test]
    fn cluster_list_parsing_is_exact() {
        assert_eq!(parse_cluster_list("demo\ndemo-2\n"), vec!["demo", "demo-2"]);
        assert!(parse_cluster_list("No kind clusters found.\n").is_empty());
        assert!(parse_cluster_list("").is_empty());
    }

    #[test]
    fn registry_host_only_when_enabled() {
        let mut config = ClusterConfig::new(Backend::Kind, "demo");
        assert_eq!(KindProvisioner::new(config.clone()).registry_host(), None);
        config.registry = true;
        config.registry_port = 5100;
        assert_eq!(
            KindProvisioner::new(config).registry_host().as_deref(),
            Some("localhost:5100")
        );
    }

    #[test]
    fn registry_config_map_names_port() {
        let cm = registry_hosting_config_map(5001);
        let parsed: serde_yaml::Value = serde_yaml::from_str(&cm).unwrap();
        assert_eq!(parsed["metadata"]["namespace"].as_str(), Some("kube-public"));
        assert!(parsed["data"]["localRegistryHosting.v1"]
            .as_str()
            .unwrap()
            .contains("localhost:5001"));
    }

    #[tokio::test]
    async fn namespace_query_failure_counts_as_no_knative() {
        let provisioner = KindProvisioner::new(ClusterConfig::new(Backend::Kind, "demo"));
        let mut runner = MockCommandRunner::new();
        runner.expect_run_checked().returning(|spec| {
            if spec.program == "kind" {
                Ok(CommandOutput::ok("demo\n"))
            } else {
                Err(crate::Error::CommandFailed {
                    command: spec.command_line(),
                    status: "exit status: 1".to_string(),
                    output: "connection refused".to_string(),
                })
            }
        });

        let state = provisioner.cluster_state(&runner).await.unwrap();
        assert_eq!(state, ClusterState::ClusterExistsNoKnative);
    }

    #[tokio::test]
    async fn knative_namespace_marks_cluster() {
        let provisioner = KindProvisioner::new(ClusterConfig::new(Backend::Kind, "demo"));
        let mut runner = MockCommandRunner::new();
        runner.expect_run_checked().returning(|spec| {
            if spec.program == "kind" {
                Ok(CommandOutput::ok("demo\n"))
            } else {
                assert!(spec.command_line().starts_with("kubectl --context kind-demo get namespaces"));
                Ok(CommandOutput::ok("namespace/knative-eventing\n"))
            }
        });

        let state = provisioner.cluster_state(&runner).await.unwrap();
        assert_eq!(state, ClusterState::ClusterExistsWithKnative);
    }

    #[tokio::test]
    async fn registry_state_reads_docker_inspect() {
        let provisioner = KindProvisioner::new(ClusterConfig::new(Backend::Kind, "demo"));
        for (output, expected) in [
            (CommandOutput::ok("true\n"), Some(true)),
            (CommandOutput::ok("false\n"), Some(false)),
            (CommandOutput::failed(1, "Error: No such object: demo-registry"), None),
        ] {
            let mut runner = MockCommandRunner::new();
            runner.expect_run().return_once(move |spec| {
                assert_eq!(spec.command_line(), "docker inspect -f {{.State.Running}} demo-registry");
                Ok(output)
            });
            let state = provisioner.registry_state(&runner, "demo-registry").await.unwrap();
            assert_eq!(state, expected);
        }
    }

    #[tokio::test]
    async fn registry_state_surfaces_daemon_errors() {
        let provisioner = KindProvisioner::new(ClusterConfig::new(Backend::Kind, "demo"));
        let mut runner = MockCommandRunner::new();
        runner.expect_run().return_once(|_| {
            Ok(CommandOutput::failed(
                1,
                "Cannot connect to the Docker daemon at unix:///var/run/docker.sock",
            ))
        });

        let err = provisioner.registry_state(&runner, "demo-registry").await.unwrap_err();
        assert!(matches!(err, crate::Error::CommandFailed { .. }));
    }
}
