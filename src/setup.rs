//! End-to-end quickstart run
//!
//! Ties the pieces together: tool preconditions, the version gate, the
//! existing-cluster decision, cluster creation and the platform install.

use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::command::CommandRunner;
use crate::config::ClusterConfig;
use crate::error::StepExt;
use crate::install::{InstallPlan, Installer};
use crate::prompt::Confirm;
use crate::provisioner::{provisioner_for, ClusterProvisioner};
use crate::resolver::{resolve, ClusterDecision};
use crate::version::{check_version, GateOutcome};
use crate::{Error, Result};

/// How a run ended. Every variant is a clean exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    /// Cluster created and the platform installed
    Completed {
        /// Wall time of the run
        elapsed: Duration,
    },
    /// Existing Knative cluster kept as-is
    Reused,
    /// Existing cluster without Knative left alone at the user's request
    InstallationSkipped,
    /// User declined to continue past the version gate
    Stopped,
}

/// One quickstart run against one backend
pub struct SetUp<'a> {
    config: &'a ClusterConfig,
    runner: &'a dyn CommandRunner,
    prompt: &'a dyn Confirm,
    provisioner: Box<dyn ClusterProvisioner>,
}

impl<'a> SetUp<'a> {
    /// Prepare a run for `config.backend`
    pub fn new(
        config: &'a ClusterConfig,
        runner: &'a dyn CommandRunner,
        prompt: &'a dyn Confirm,
    ) -> Self {
        Self {
            config,
            runner,
            prompt,
            provisioner: provisioner_for(config),
        }
    }

    /// Run to completion or the first error
    pub async fn run(&self) -> Result<SetupOutcome> {
        let start = Instant::now();
        self.config.validate()?;

        info!(
            "Setting up Knative on {} cluster {}",
            self.config.backend, self.config.name
        );

        self.check_prerequisites()?;

        let requirement = self.provisioner.version_requirement();
        if check_version(self.runner, self.prompt, requirement).await? == GateOutcome::Declined {
            return Ok(SetupOutcome::Stopped);
        }

        match resolve(self.provisioner.as_ref(), self.runner, self.prompt).await? {
            ClusterDecision::Create => self.create().await?,
            ClusterDecision::RecreateThenCreate => {
                self.provisioner
                    .delete_cluster(self.runner)
                    .await
                    .step("delete cluster")?;
                self.create().await?;
            }
            ClusterDecision::Reuse => return Ok(SetupOutcome::Reused),
            ClusterDecision::InstallationSkipped => return Ok(SetupOutcome::InstallationSkipped),
        }

        let plan = InstallPlan::build(self.config, self.provisioner.registry_host().as_deref());
        Installer::new(self.config, self.provisioner.as_ref(), self.runner)
            .run(&plan)
            .await?;

        let elapsed = start.elapsed();
        info!(
            "Knative is ready on {} (context {}). Took {}s",
            self.config.name,
            self.provisioner.kube_context(),
            elapsed.as_secs_f64().round() as u64
        );
        Ok(SetupOutcome::Completed { elapsed })
    }

    /// Fail fast on the first tool missing from PATH
    fn check_prerequisites(&self) -> Result<()> {
        for tool in self.provisioner.required_tools() {
            if !self.runner.tool_available(tool.name) {
                return Err(Error::ToolNotFound {
                    tool: tool.name.to_string(),
                    hint: tool.hint.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn create(&self) -> Result<()> {
        self.provisioner
            .create_cluster(self.runner)
            .await
            .step("new cluster")
    }
}
