//! Existing-cluster resolution
//!
//! Decides, once per run, whether to create a cluster, recreate it, reuse it,
//! or stop. The decision is a pure function of the observed [`ClusterState`]
//! and the user's answer; nothing is persisted between runs.

use tracing::info;

use crate::command::CommandRunner;
use crate::prompt::Confirm;
use crate::provisioner::ClusterProvisioner;
use crate::Result;

/// What the backend reports about the target profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    /// No profile with the target name
    NoExistingCluster,
    /// Profile exists, no Knative namespaces found (or not checked)
    ClusterExistsNoKnative,
    /// Profile exists and already hosts Knative
    ClusterExistsWithKnative,
}

/// What to do about the cluster this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterDecision {
    /// Create a fresh cluster
    Create,
    /// Keep the existing cluster and its Knative install; nothing to do
    Reuse,
    /// Delete the existing cluster, then create it again
    RecreateThenCreate,
    /// Leave everything as-is and stop without installing
    InstallationSkipped,
}

impl ClusterState {
    /// Question to put to the user, if this state needs one
    pub fn recreate_question(&self, cluster_name: &str) -> Option<String> {
        match self {
            ClusterState::NoExistingCluster => None,
            ClusterState::ClusterExistsNoKnative => Some(format!(
                "Knative Cluster {} already installed.\nDelete and recreate",
                cluster_name
            )),
            ClusterState::ClusterExistsWithKnative => Some(
                "Knative installation already exists.\nDelete and recreate the cluster"
                    .to_string(),
            ),
        }
    }
}

/// Map a state and the user's answer to a decision.
///
/// `confirmed` is ignored when no cluster exists.
pub fn decide(state: ClusterState, confirmed: bool) -> ClusterDecision {
    match (state, confirmed) {
        (ClusterState::NoExistingCluster, _) => ClusterDecision::Create,
        (_, true) => ClusterDecision::RecreateThenCreate,
        (ClusterState::ClusterExistsNoKnative, false) => ClusterDecision::InstallationSkipped,
        (ClusterState::ClusterExistsWithKnative, false) => ClusterDecision::Reuse,
    }
}

/// Query the backend and, if a cluster exists, ask whether to recreate it
pub async fn resolve(
    provisioner: &dyn ClusterProvisioner,
    runner: &dyn CommandRunner,
    prompt: &dyn Confirm,
) -> Result<ClusterDecision> {
    let state = provisioner.cluster_state(runner).await?;

    let confirmed = match state.recreate_question(provisioner.cluster_name()) {
        Some(question) => prompt.confirm(&question, false).await?,
        None => false,
    };

    let decision = decide(state, confirmed);
    match decision {
        ClusterDecision::InstallationSkipped => info!("Installation skipped"),
        ClusterDecision::Reuse => info!("Skipping installation, keeping existing Knative cluster"),
        _ => {}
    }
    Ok(decision)
}
