//! minikube backend
//!
//! The Kourier service is switched to LoadBalancer and exposed through a
//! detached `minikube tunnel`. The tunnel outlives this process; a stale one
//! for the same profile is killed before a new one starts.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{
    configure_domain, wait_for_system_pods, ClusterProvisioner, RequiredTool,
    KNATIVE_SERVING_NAMESPACE, KOURIER_INGRESS_CLASS, KOURIER_SYSTEM_NAMESPACE, KUBECTL,
};
use crate::command::{CommandRunner, CommandSpec};
use crate::config::{Backend, ClusterConfig};
use crate::error::StepExt;
use crate::kubectl::Kubectl;
use crate::resolver::ClusterState;
use crate::retry::retry_with_interval;
use crate::version::{ToolVersion, VersionRequirement};
use crate::Result;

const MINIKUBE_VERSION: VersionRequirement = VersionRequirement {
    tool: "minikube",
    version_args: &["version", "--short"],
    minimum: ToolVersion::new(1, 35),
    download_url: "https://github.com/kubernetes/minikube/releases/",
};

const MINIKUBE_TOOLS: &[RequiredTool] = &[
    RequiredTool {
        name: "minikube",
        hint: "Install minikube: https://minikube.sigs.k8s.io/docs/start/",
    },
    KUBECTL,
];

/// Markers minikube prints when no profile exists at all
const NO_PROFILE_MARKERS: &[&str] = &["MK_USAGE_NO_PROFILE", "No minikube profile was found"];

/// `minikube profile list -o json`
#[derive(Debug, Default, Deserialize)]
struct ProfileList {
    #[serde(default)]
    valid: Option<Vec<Profile>>,
    #[serde(default)]
    invalid: Option<Vec<Profile>>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    #[serde(rename = "Name")]
    name: String,
}

/// Profile names, valid and invalid alike; an invalid profile still blocks
/// `minikube start` under the same name
fn parse_profile_list(json: &str) -> Result<Vec<String>> {
    let list: ProfileList = serde_json::from_str(json)?;
    Ok(list
        .valid
        .into_iter()
        .chain(list.invalid)
        .flatten()
        .map(|p| p.name)
        .collect())
}

/// Backslash-escape POSIX extended regex metacharacters
fn regex_escape(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if "\\.^$|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn is_no_profile(output: &str) -> bool {
    NO_PROFILE_MARKERS.iter().any(|m| output.contains(m))
}

/// minikube-backed cluster provisioner
#[derive(Debug, Clone)]
pub struct MinikubeProvisioner {
    config: ClusterConfig,
}

impl MinikubeProvisioner {
    /// Create a provisioner for `config`
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    fn profile_args(&self) -> [&str; 2] {
        ["--profile", self.config.name.as_str()]
    }

    fn start_command(&self) -> CommandSpec {
        let mut spec = CommandSpec::new("minikube")
            .arg("start")
            .args(self.profile_args())
            .args(["--cpus", self.config.cpus.as_str()])
            .args(["--memory", self.config.memory.as_str()])
            .args(["--wait", "all"]);
        if let Some(version) = &self.config.kubernetes_version {
            spec = spec.arg(format!("--kubernetes-version={}", version));
        }
        if let Some(mount) = &self.config.extra_host_mount {
            spec = spec.arg("--mount").arg(format!(
                "--mount-string={}:{}",
                mount.host_path.display(),
                mount.container_path.display()
            ));
        }
        spec
    }

    fn tunnel_command(&self) -> CommandSpec {
        CommandSpec::new("minikube")
            .arg("tunnel")
            .args(self.profile_args())
    }

    /// Extended regex matching exactly this profile's tunnel command line,
    /// whether minikube was invoked by name or by path
    fn tunnel_pattern(&self) -> String {
        format!(
            "(^|/){}$",
            regex_escape(&self.tunnel_command().command_line())
        )
    }

    async fn list_profiles(&self, runner: &dyn CommandRunner) -> Result<Vec<String>> {
        let spec = CommandSpec::new("minikube").args(["profile", "list", "-o", "json"]);
        let output = runner.run(&spec).await?;
        if is_no_profile(&output.combined()) {
            return Ok(Vec::new());
        }
        let output = output.into_result(&spec)?;
        parse_profile_list(&output.stdout)
    }

    /// Kill any tunnel left over from a previous run for this profile
    async fn stop_stale_tunnel(&self, runner: &dyn CommandRunner) -> Result<()> {
        if !runner.tool_available("pkill") {
            debug!("pkill not available, not checking for a stale tunnel");
            return Ok(());
        }
        let pattern = self.tunnel_pattern();
        let spec = CommandSpec::new("pkill").args(["-f", pattern.as_str()]);
        let output = runner.run(&spec).await?;
        // pkill exits 1 when nothing matched
        match output.code {
            Some(0) => info!("Stopped previous tunnel for {}", self.config.name),
            Some(1) => {}
            _ => warn!(command = %spec, "{}", output.combined()),
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterProvisioner for MinikubeProvisioner {
    fn backend(&self) -> Backend {
        Backend::Minikube
    }

    fn cluster_name(&self) -> &str {
        &self.config.name
    }

    fn kube_context(&self) -> String {
        self.config.name.clone()
    }

    fn required_tools(&self) -> &'static [RequiredTool] {
        MINIKUBE_TOOLS
    }

    fn version_requirement(&self) -> &'static VersionRequirement {
        &MINIKUBE_VERSION
    }

    async fn cluster_state(&self, runner: &dyn CommandRunner) -> Result<ClusterState> {
        let profiles = self.list_profiles(runner).await?;
        if profiles.iter().any(|p| p == &self.config.name) {
            Ok(ClusterState::ClusterExistsNoKnative)
        } else {
            Ok(ClusterState::NoExistingCluster)
        }
    }

    async fn delete_cluster(&self, runner: &dyn CommandRunner) -> Result<()> {
        info!("Deleting minikube profile {}...", self.config.name);
        let spec = CommandSpec::new("minikube")
            .arg("delete")
            .args(self.profile_args());
        runner.run_checked(&spec).await?;
        Ok(())
    }

    async fn create_cluster(&self, runner: &dyn CommandRunner) -> Result<()> {
        info!(
            "Creating minikube cluster {} ({} CPUs, {} memory)...",
            self.config.name, self.config.cpus, self.config.memory
        );
        if cfg!(target_os = "macos") {
            info!("On macOS the tunnel may ask for your password to bind port 80");
        }

        let start = self.start_command();
        retry_with_interval(&self.config.timeouts.cluster_start, "minikube start", || async {
            runner.run_checked(&start).await
        })
        .await
        .step("minikube start")?;

        info!("Waiting on cluster to be ready...");
        wait_for_system_pods(runner, &self.kubectl(), &self.config.timeouts.wait)
            .await
            .step("minikube ready")?;

        if self.config.registry {
            let spec = CommandSpec::new("minikube")
                .args(["addons", "enable", "registry"])
                .args(self.profile_args());
            runner.run_checked(&spec).await.step("registry addon")?;
        }

        info!("Cluster created");
        Ok(())
    }

    async fn configure_network(
        &self,
        runner: &dyn CommandRunner,
        kubectl: &Kubectl,
    ) -> Result<()> {
        let lb = json!({ "spec": { "type": "LoadBalancer" } });
        runner
            .run_checked(&kubectl.patch_merge(KOURIER_SYSTEM_NAMESPACE, "svc/kourier", &lb))
            .await
            .step("kourier service")?;

        runner
            .run_checked(
                &kubectl.delete_ignore_missing(KNATIVE_SERVING_NAMESPACE, "configmap/config-network"),
            )
            .await
            .step("ingress class")?;
        runner
            .run_checked(&kubectl.create_configmap(
                KNATIVE_SERVING_NAMESPACE,
                "config-network",
                &[("ingress-class", KOURIER_INGRESS_CLASS)],
            ))
            .await
            .step("ingress class")?;
        info!("Ingress patched...");

        configure_domain(runner, kubectl, &self.config.expose_address)
            .await
            .step("domain dns")?;
        info!("Domain DNS set up...");

        self.stop_stale_tunnel(runner).await.step("tunnel")?;
        let tunnel = runner
            .spawn_detached(&self.tunnel_command())
            .await
            .step("tunnel")?;
        info!(
            pid = ?tunnel.pid,
            "Started `{}` in the background; stop it with `pkill -f \"{}\"`",
            tunnel.command,
            tunnel.command
        );
        Ok(())
    }

    fn registry_host(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostMount;

    #[test]
    fn profile_list_includes_invalid_profiles() {
        let json = r#"{"invalid":[{"Name":"broken"}],"valid":[{"Name":"knative","Status":"Running"}]}"#;
        assert_eq!(parse_profile_list(json).unwrap(), vec!["knative", "broken"]);
    }

    #[test]
    fn profile_list_tolerates_null_sections() {
        assert!(parse_profile_list(r#"{"invalid":null,"valid":null}"#)
            .unwrap()
            .is_empty());
        assert!(parse_profile_list("{}").unwrap().is_empty());
    }

    #[test]
    fn no_profile_markers_are_recognised() {
        assert!(is_no_profile(
            r#"{"error":{"name":"MK_USAGE_NO_PROFILE","advice":"..."}}"#
        ));
        assert!(is_no_profile("* No minikube profile was found."));
        assert!(!is_no_profile(r#"{"valid":[]}"#));
    }

    #[test]
    fn start_command_carries_resources_and_overrides() {
        let mut config = ClusterConfig::new(Backend::Minikube, "demo");
        config.kubernetes_version = Some("v1.31.0".to_string());
        config.extra_host_mount = Some(HostMount::parse("/src:/mnt/src").unwrap());
        let spec = MinikubeProvisioner::new(config).start_command();
        assert_eq!(
            spec.command_line(),
            "minikube start --profile demo --cpus 3 --memory 3g --wait all \
             --kubernetes-version=v1.31.0 --mount --mount-string=/src:/mnt/src"
        );
    }

    #[test]
    fn tunnel_targets_profile() {
        let p = MinikubeProvisioner::new(ClusterConfig::new(Backend::Minikube, "demo"));
        assert_eq!(p.tunnel_command().command_line(), "minikube tunnel --profile demo");
        assert_eq!(p.registry_host(), None);
    }

    #[test]
    fn tunnel_pattern_is_anchored_to_the_profile() {
        let p = MinikubeProvisioner::new(ClusterConfig::new(Backend::Minikube, "demo"));
        assert_eq!(p.tunnel_pattern(), "(^|/)minikube tunnel --profile demo$");
    }

    #[test]
    fn regex_metacharacters_are_escaped() {
        assert_eq!(regex_escape("a.b+c"), "a\\.b\\+c");
        assert_eq!(regex_escape("demo-2"), "demo-2");
    }
}
