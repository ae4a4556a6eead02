//! kn-quickstart - local Knative clusters in one command
//!
//! Provisions a kind or minikube cluster and installs Kourier, Knative
//! Serving and Knative Eventing onto it, waiting for each layer to become
//! Ready before the next one goes on.
//!
//! # Modules
//!
//! - [`command`] - external command execution behind a mockable trait
//! - [`retry`] - bounded retry and readiness polling
//! - [`version`] - minimum tool version gate
//! - [`resolver`] - what to do about an existing cluster
//! - [`provisioner`] - kind and minikube backends
//! - [`install`] - ordered platform install
//! - [`setup`] - the end-to-end run
//! - [`error`] - error types

#![deny(missing_docs)]

pub mod command;
pub mod config;
pub mod error;
pub mod install;
pub mod kubectl;
pub mod prompt;
pub mod provisioner;
pub mod resolver;
pub mod retry;
pub mod setup;
pub mod version;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::command::SystemCommandRunner;
use crate::config::{
    Backend, ClusterConfig, HostMount, DEFAULT_CLUSTER_NAME, DEFAULT_EVENTING_VERSION,
    DEFAULT_KOURIER_VERSION, DEFAULT_REGISTRY_PORT, DEFAULT_SERVING_VERSION,
};
use crate::prompt::TerminalPrompt;
use crate::setup::{SetUp, SetupOutcome};

/// Get Knative running on a local cluster
#[derive(Parser, Debug)]
#[command(name = "kn-quickstart")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Backend to provision with
    #[command(subcommand)]
    pub command: Commands,
}

/// Backend subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Quickstart with kind
    Kind(KindArgs),
    /// Quickstart with minikube
    Minikube(MinikubeArgs),
}

/// Flags shared by every backend
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Cluster profile name
    #[arg(short, long, env = "KN_QUICKSTART_NAME", default_value = DEFAULT_CLUSTER_NAME)]
    pub name: String,

    /// Kubernetes version (minikube) or node image tag/reference (kind)
    #[arg(short = 'k', long)]
    pub kubernetes_version: Option<String>,

    /// Install Knative Serving (with Kourier)
    #[arg(long)]
    pub install_serving: bool,

    /// Install Knative Eventing
    #[arg(long)]
    pub install_eventing: bool,

    /// Host directory to mount into the node, as <host-path>:<container-path>
    #[arg(long)]
    pub extra_mount: Option<String>,

    /// Address the ingress listens on and the sslip.io domain resolves to
    #[arg(long, default_value = "127.0.0.1")]
    pub expose_address: String,

    /// Overall bound, in seconds, for each readiness wait
    #[arg(long, default_value_t = 600)]
    pub wait_timeout: u64,

    /// Knative Serving release
    #[arg(long, env = "KN_SERVING_VERSION", default_value = DEFAULT_SERVING_VERSION)]
    pub serving_version: String,

    /// Kourier release
    #[arg(long, env = "KN_KOURIER_VERSION", default_value = DEFAULT_KOURIER_VERSION)]
    pub kourier_version: String,

    /// Knative Eventing release
    #[arg(long, env = "KN_EVENTING_VERSION", default_value = DEFAULT_EVENTING_VERSION)]
    pub eventing_version: String,
}

/// kind flags
#[derive(Args, Debug, Clone)]
pub struct KindArgs {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub common: CommonArgs,

    /// Start a local registry container and wire it into the cluster
    #[arg(long)]
    pub registry: bool,

    /// Host port for the local registry
    #[arg(long, default_value_t = DEFAULT_REGISTRY_PORT)]
    pub registry_port: u16,

    /// Address the API server binds to
    #[arg(long, default_value = "127.0.0.1")]
    pub api_server_address: String,
}

/// minikube flags
#[derive(Args, Debug, Clone)]
pub struct MinikubeArgs {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub common: CommonArgs,

    /// CPUs for the node
    #[arg(long, env = "KN_QUICKSTART_CPUS", default_value = "3")]
    pub cpus: String,

    /// Memory for the node, e.g. 3g
    #[arg(long, env = "KN_QUICKSTART_MEMORY", default_value = "3g")]
    pub memory: String,

    /// Enable minikube's registry addon
    #[arg(long)]
    pub registry: bool,
}

impl CommonArgs {
    fn apply(&self, mut config: ClusterConfig) -> Result<ClusterConfig> {
        config.kubernetes_version = self.kubernetes_version.clone();
        config.expose_address = self.expose_address.clone();
        config.extra_host_mount = self.extra_mount.as_deref().map(HostMount::parse).transpose()?;
        config.versions.serving = self.serving_version.clone();
        config.versions.kourier = self.kourier_version.clone();
        config.versions.eventing = self.eventing_version.clone();
        config.timeouts = config
            .timeouts
            .with_wait_timeout(Duration::from_secs(self.wait_timeout));
        Ok(config.with_components(self.install_serving, self.install_eventing))
    }
}

impl Cli {
    /// Build the run configuration from parsed flags
    pub fn to_config(&self) -> Result<ClusterConfig> {
        match &self.command {
            Commands::Kind(args) => {
                let mut config = ClusterConfig::new(Backend::Kind, args.common.name.clone());
                config.registry = args.registry;
                config.registry_port = args.registry_port;
                config.api_server_address = args.api_server_address.clone();
                args.common.apply(config)
            }
            Commands::Minikube(args) => {
                let mut config = ClusterConfig::new(Backend::Minikube, args.common.name.clone());
                config.cpus = args.cpus.clone();
                config.memory = args.memory.clone();
                config.registry = args.registry;
                args.common.apply(config)
            }
        }
    }

    /// Run against the real system and terminal
    pub async fn run(self) -> Result<SetupOutcome> {
        let config = self.to_config()?;
        let prompt = TerminalPrompt::new();
        SetUp::new(&config, &SystemCommandRunner, &prompt)
            .run()
            .await
    }
}
