//! Knative platform installer
//!
//! Installs the platform onto a running cluster in a fixed order:
//!
//! 1. Networking (Kourier), then wait for kourier-system and knative-serving
//! 2. Serving CRDs, wait Established, Serving core, wait knative-serving
//! 3. Backend network patch, then the registry tag-resolution patch if wired
//! 4. Eventing CRDs, core, in-memory channel and MT channel broker, each
//!    followed by its wait, then a sample Broker
//!
//! The order is data: [`InstallPlan::build`] produces the step list and
//! [`Installer::run`] walks it. Any failure stops the walk and is labelled
//! with the step it happened in.
//!
//! # Example
//!
//! ```ignore
//! use kn_quickstart::install::{InstallPlan, Installer};
//!
//! let plan = InstallPlan::build(&config, provisioner.registry_host().as_deref());
//! Installer::new(&config, provisioner.as_ref(), &runner).run(&plan).await?;
//! ```

use std::fmt;

use serde_json::json;
use tracing::info;

use crate::command::CommandRunner;
use crate::config::{ClusterConfig, ComponentVersions};
use crate::error::StepExt;
use crate::kubectl::{apply_with_retry, wait_for_crds_established, wait_for_pods_ready};
use crate::provisioner::{ClusterProvisioner, KNATIVE_SERVING_NAMESPACE, KOURIER_SYSTEM_NAMESPACE};
use crate::Result;

/// Namespace Knative Eventing installs into
pub const KNATIVE_EVENTING_NAMESPACE: &str = "knative-eventing";

/// Registries Knative never resolves tags for, ahead of any local one
const DEFAULT_SKIP_TAG_REGISTRIES: &str = "kind.local,ko.local,dev.local";

/// Sample Broker applied once Eventing is up
const EXAMPLE_BROKER: &str = r#"apiVersion: eventing.knative.dev/v1
kind: Broker
metadata:
  name: example-broker
  namespace: default
"#;

/// URL of a Kourier release manifest
pub fn kourier_manifest(version: &str) -> String {
    format!(
        "https://github.com/knative/net-kourier/releases/download/knative-v{}/kourier.yaml",
        version
    )
}

/// URL of a Knative Serving release manifest, e.g. `serving-core.yaml`
pub fn serving_manifest(version: &str, file: &str) -> String {
    format!(
        "https://github.com/knative/serving/releases/download/knative-v{}/{}",
        version, file
    )
}

/// URL of a Knative Eventing release manifest, e.g. `eventing-crds.yaml`
pub fn eventing_manifest(version: &str, file: &str) -> String {
    format!(
        "https://github.com/knative/eventing/releases/download/knative-v{}/{}",
        version, file
    )
}

/// Platform component a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// Kourier ingress
    Networking,
    /// Knative Serving
    Serving,
    /// Knative Eventing
    Eventing,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Networking => write!(f, "networking"),
            Component::Serving => write!(f, "serving"),
            Component::Eventing => write!(f, "eventing"),
        }
    }
}

/// What one step does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// `kubectl apply -f <url>`, retried
    ApplyUrl(String),
    /// `kubectl apply -f -` with an inline manifest, retried
    ApplyInline(String),
    /// Wait until all CRDs are Established
    WaitCrdsEstablished,
    /// Wait until a namespace's pods are Ready
    WaitPodsReady(String),
    /// Backend-specific ingress and domain setup
    ConfigureNetwork,
    /// Exempt a registry host from tag-to-digest resolution
    SkipTagResolution(String),
}

/// One labelled step of the plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStep {
    /// Component the step belongs to
    pub component: Component,
    /// Label failures are wrapped with
    pub label: &'static str,
    /// What to do
    pub action: StepAction,
}

/// Ordered install steps for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallPlan {
    steps: Vec<InstallStep>,
}

impl InstallPlan {
    /// Build the plan for the components `config` selects.
    ///
    /// `registry_host` is the backend's local registry, if one is wired.
    pub fn build(config: &ClusterConfig, registry_host: Option<&str>) -> Self {
        let mut plan = Self::default();
        if config.install_serving {
            plan.push_networking(&config.versions);
            plan.push_serving(&config.versions, registry_host);
        }
        if config.install_eventing {
            plan.push_eventing(&config.versions);
        }
        plan
    }

    /// Steps in execution order
    pub fn steps(&self) -> &[InstallStep] {
        &self.steps
    }

    /// Whether there is nothing to install
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn push(&mut self, component: Component, label: &'static str, action: StepAction) {
        self.steps.push(InstallStep {
            component,
            label,
            action,
        });
    }

    fn push_networking(&mut self, versions: &ComponentVersions) {
        use StepAction::*;
        let c = Component::Networking;
        self.push(c, "kourier", ApplyUrl(kourier_manifest(&versions.kourier)));
        self.push(c, "kourier", WaitPodsReady(KOURIER_SYSTEM_NAMESPACE.into()));
        self.push(c, "kourier", WaitPodsReady(KNATIVE_SERVING_NAMESPACE.into()));
    }

    fn push_serving(&mut self, versions: &ComponentVersions, registry_host: Option<&str>) {
        use StepAction::*;
        let c = Component::Serving;
        let v = versions.serving.as_str();
        self.push(c, "serving crds", ApplyUrl(serving_manifest(v, "serving-crds.yaml")));
        self.push(c, "serving crds", WaitCrdsEstablished);
        self.push(c, "serving core", ApplyUrl(serving_manifest(v, "serving-core.yaml")));
        self.push(c, "serving core", WaitPodsReady(KNATIVE_SERVING_NAMESPACE.into()));
        self.push(c, "network", ConfigureNetwork);
        if let Some(host) = registry_host {
            self.push(c, "registry", SkipTagResolution(host.to_string()));
        }
    }

    fn push_eventing(&mut self, versions: &ComponentVersions) {
        use StepAction::*;
        let c = Component::Eventing;
        let v = versions.eventing.as_str();
        let ns = || WaitPodsReady(KNATIVE_EVENTING_NAMESPACE.into());
        self.push(c, "eventing crds", ApplyUrl(eventing_manifest(v, "eventing-crds.yaml")));
        self.push(c, "eventing crds", WaitCrdsEstablished);
        self.push(c, "eventing core", ApplyUrl(eventing_manifest(v, "eventing-core.yaml")));
        self.push(c, "eventing core", ns());
        self.push(
            c,
            "in-memory channel",
            ApplyUrl(eventing_manifest(v, "in-memory-channel.yaml")),
        );
        self.push(c, "in-memory channel", ns());
        self.push(
            c,
            "mt-channel broker",
            ApplyUrl(eventing_manifest(v, "mt-channel-broker.yaml")),
        );
        self.push(c, "mt-channel broker", ns());
        self.push(c, "example broker", ApplyInline(EXAMPLE_BROKER.to_string()));
    }
}

/// Walks an [`InstallPlan`] against one cluster
pub struct Installer<'a> {
    config: &'a ClusterConfig,
    provisioner: &'a dyn ClusterProvisioner,
    runner: &'a dyn CommandRunner,
}

impl<'a> Installer<'a> {
    /// Create an installer targeting `provisioner`'s cluster
    pub fn new(
        config: &'a ClusterConfig,
        provisioner: &'a dyn ClusterProvisioner,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            config,
            provisioner,
            runner,
        }
    }

    /// Run every step in order, stopping at the first failure
    pub async fn run(&self, plan: &InstallPlan) -> Result<()> {
        let mut current = None;
        for step in plan.steps() {
            if current != Some(step.component) {
                info!("Installing {}...", step.component);
                current = Some(step.component);
            }
            self.run_step(step).await.step(step.label)?;
        }
        Ok(())
    }

    async fn run_step(&self, step: &InstallStep) -> Result<()> {
        let kubectl = self.provisioner.kubectl();
        let timeouts = &self.config.timeouts;
        let operation = format!("{} apply", step.label);

        match &step.action {
            StepAction::ApplyUrl(url) => {
                apply_with_retry(self.runner, &kubectl.apply_url(url), &timeouts.apply, &operation)
                    .await
            }
            StepAction::ApplyInline(manifest) => {
                apply_with_retry(
                    self.runner,
                    &kubectl.apply_stdin(manifest),
                    &timeouts.apply,
                    &operation,
                )
                .await
            }
            StepAction::WaitCrdsEstablished => {
                wait_for_crds_established(self.runner, &kubectl, &timeouts.wait).await
            }
            StepAction::WaitPodsReady(namespace) => {
                wait_for_pods_ready(self.runner, &kubectl, namespace, &timeouts.wait).await?;
                info!("{} is ready", namespace);
                Ok(())
            }
            StepAction::ConfigureNetwork => {
                self.provisioner
                    .configure_network(self.runner, &kubectl)
                    .await
            }
            StepAction::SkipTagResolution(host) => {
                let patch = json!({
                    "data": {
                        "registries-skipping-tag-resolving":
                            format!("{},{}", DEFAULT_SKIP_TAG_REGISTRIES, host)
                    }
                });
                self.runner
                    .run_checked(&kubectl.patch_merge(
                        KNATIVE_SERVING_NAMESPACE,
                        "configmap/config-deployment",
                        &patch,
                    ))
                    .await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;

    fn position(plan: &InstallPlan, action: &StepAction) -> usize {
        plan.steps()
            .iter()
            .position(|s| &s.action == action)
            .unwrap_or_else(|| panic!("missing step {:?}", action))
    }

    #[test]
    fn manifest_urls_carry_version() {
        assert_eq!(
            kourier_manifest("1.17.0"),
            "https://github.com/knative/net-kourier/releases/download/knative-v1.17.0/kourier.yaml"
        );
        assert_eq!(
            serving_manifest("1.16.1", "serving-core.yaml"),
            "https://github.com/knative/serving/releases/download/knative-v1.16.1/serving-core.yaml"
        );
        assert_eq!(
            eventing_manifest("1.17.0", "mt-channel-broker.yaml"),
            "https://github.com/knative/eventing/releases/download/knative-v1.17.0/mt-channel-broker.yaml"
        );
    }

    #[test]
    fn networking_is_ready_before_serving_core() {
        let config = ClusterConfig::new(Backend::Kind, "demo");
        let plan = InstallPlan::build(&config, None);

        let kourier_wait = position(&plan, &StepAction::WaitPodsReady("kourier-system".into()));
        let core = position(
            &plan,
            &StepAction::ApplyUrl(serving_manifest("1.17.0", "serving-core.yaml")),
        );
        let network = position(&plan, &StepAction::ConfigureNetwork);
        assert!(kourier_wait < core);
        assert!(core < network);
    }

    #[test]
    fn crds_are_established_before_core() {
        let config = ClusterConfig::new(Backend::Minikube, "demo");
        let plan = InstallPlan::build(&config, None);
        let steps = plan.steps();

        for (crds, core) in [("serving crds", "serving core"), ("eventing crds", "eventing core")] {
            let wait = steps
                .iter()
                .position(|s| s.label == crds && s.action == StepAction::WaitCrdsEstablished)
                .unwrap();
            let apply = steps
                .iter()
                .position(|s| s.label == core && matches!(s.action, StepAction::ApplyUrl(_)))
                .unwrap();
            assert!(wait < apply, "{} not established before {}", crds, core);
        }
    }

    #[test]
    fn component_selection() {
        let config = ClusterConfig::new(Backend::Kind, "demo").with_components(false, true);
        let plan = InstallPlan::build(&config, None);
        assert!(plan
            .steps()
            .iter()
            .all(|s| s.component == Component::Eventing));
        assert_eq!(plan.steps().last().unwrap().label, "example broker");

        let config = ClusterConfig::new(Backend::Kind, "demo").with_components(true, false);
        let plan = InstallPlan::build(&config, None);
        assert!(plan
            .steps()
            .iter()
            .all(|s| s.component != Component::Eventing));
    }

    #[test]
    fn registry_patch_follows_network() {
        let config = ClusterConfig::new(Backend::Kind, "demo");
        let plan = InstallPlan::build(&config, Some("localhost:5001"));
        let network = position(&plan, &StepAction::ConfigureNetwork);
        let registry = position(
            &plan,
            &StepAction::SkipTagResolution("localhost:5001".into()),
        );
        assert_eq!(registry, network + 1);

        let plan = InstallPlan::build(&config, None);
        assert!(!plan
            .steps()
            .iter()
            .any(|s| matches!(s.action, StepAction::SkipTagResolution(_))));
    }

    #[test]
    fn example_broker_is_a_broker() {
        let broker: serde_yaml::Value = serde_yaml::from_str(EXAMPLE_BROKER).unwrap();
        assert_eq!(broker["kind"].as_str(), Some("Broker"));
        assert_eq!(broker["metadata"]["name"].as_str(), Some("example-broker"));
        assert_eq!(broker["metadata"]["namespace"].as_str(), Some("default"));
    }
}
