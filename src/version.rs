//! Tool version gate
//!
//! Versions compare on major.minor only; patch releases never block.

use std::fmt;

use tracing::{info, warn};

use crate::command::{CommandRunner, CommandSpec};
use crate::prompt::Confirm;
use crate::{Error, Result};

/// A major.minor version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ToolVersion {
    /// Major component
    pub major: u32,
    /// Minor component
    pub minor: u32,
}

impl ToolVersion {
    /// Create a version
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Find the first `vMAJOR.MINOR[.PATCH]` token in tool output.
    ///
    /// Handles both `v1.35.0` (minikube --short) and
    /// `kind v0.26.0 go1.23.4 linux/amd64`.
    pub fn parse(output: &str) -> Option<Self> {
        output.split_whitespace().find_map(Self::parse_token)
    }

    fn parse_token(token: &str) -> Option<Self> {
        let token = token.strip_prefix('v').unwrap_or(token);
        let mut parts = token.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor_part = parts.next()?;
        // Accept pre-release suffixes like "35-beta"
        let digits: String = minor_part
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        let minor = digits.parse().ok()?;
        Some(Self { major, minor })
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Minimum version a tool must report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRequirement {
    /// Executable name
    pub tool: &'static str,
    /// Arguments that make the tool print its version
    pub version_args: &'static [&'static str],
    /// Lowest acceptable major.minor
    pub minimum: ToolVersion,
    /// Where to download a newer release
    pub download_url: &'static str,
}

impl VersionRequirement {
    /// Whether `observed` satisfies the minimum
    pub fn is_satisfied_by(&self, observed: ToolVersion) -> bool {
        observed >= self.minimum
    }
}

/// Result of the version gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Version is fine, or the user accepted the risk
    Proceed,
    /// Version is too old and the user chose to stop
    Declined,
}

/// Query the tool's version and compare it against `requirement`.
///
/// Below the minimum, the user is asked whether to continue anyway.
/// Declining is a clean stop, not an error. Output that cannot be parsed
/// is an [`Error::VersionParse`].
pub async fn check_version(
    runner: &dyn CommandRunner,
    prompt: &dyn Confirm,
    requirement: &VersionRequirement,
) -> Result<GateOutcome> {
    let spec = CommandSpec::new(requirement.tool).args(requirement.version_args.iter().copied());
    let output = runner.run_checked(&spec).await?;
    let raw = output.combined();

    let observed = ToolVersion::parse(&raw).ok_or_else(|| Error::VersionParse {
        tool: requirement.tool.to_string(),
        output: raw.clone(),
    })?;
    info!("{} version is: {}", requirement.tool, raw.trim());

    if requirement.is_satisfied_by(observed) {
        return Ok(GateOutcome::Proceed);
    }

    warn!(
        "We require at least {} v{}, while you are using v{}",
        requirement.tool, requirement.minimum, observed
    );
    warn!(
        "You can download a newer version from {}",
        requirement.download_url
    );

    if prompt
        .confirm("Continue anyway? (not recommended)", false)
        .await?
    {
        Ok(GateOutcome::Proceed)
    } else {
        info!(
            "Installation stopped. Please upgrade {} and run again",
            requirement.tool
        );
        Ok(GateOutcome::Declined)
    }
}
