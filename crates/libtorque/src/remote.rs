use std::{collections::BTreeMap, fmt};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Progress state the remote reports for a launch step that has not started.
const PENDING: &str = "Pending";

/// Lifecycle state of a remote sandbox as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SandboxStatus {
    /// Environment is being provisioned.
    Launching,
    /// Deployment finished successfully.
    Active,
    /// Deployment finished but some applications reported errors.
    ActiveWithError,
    /// Deployment failed.
    LaunchingFailed,
    /// Teardown in progress.
    Ending,
    /// Torn down.
    Ended,
    /// A status this client does not know about, kept verbatim.
    Other(String),
}

impl SandboxStatus {
    /// Whether the sandbox will not transition any further on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Active | Self::ActiveWithError | Self::LaunchingFailed | Self::Ended
        )
    }

    /// Wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Launching => "Launching",
            Self::Active => "Active",
            Self::ActiveWithError => "ActiveWithError",
            Self::LaunchingFailed => "Launching Failed",
            Self::Ending => "Ending",
            Self::Ended => "Ended",
            Self::Other(status) => status,
        }
    }
}

impl From<String> for SandboxStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Launching" => Self::Launching,
            "Active" => Self::Active,
            "ActiveWithError" | "Active With Error" => Self::ActiveWithError,
            "Launching Failed" | "LaunchingFailed" => Self::LaunchingFailed,
            "Ending" => Self::Ending,
            "Ended" => Self::Ended,
            _ => Self::Other(value),
        }
    }
}

impl From<SandboxStatus> for String {
    fn from(value: SandboxStatus) -> Self {
        match value {
            SandboxStatus::Other(status) => status,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one launch step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProgress {
    /// Step state, e.g. `Pending`, `InProgress`, `Done`, `Failed`.
    #[serde(default)]
    pub status: Option<String>,
}

impl StepProgress {
    /// Whether the step has left the pending state.
    pub fn has_started(&self) -> bool {
        self.status.as_deref().is_some_and(|status| status != PENDING)
    }
}

/// Per-step launch progress reported while a sandbox is launching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchingProgress {
    /// Infrastructure provisioning.
    #[serde(default)]
    pub creating_infrastructure: StepProgress,
    /// Artifact retrieval from the source repository.
    #[serde(default)]
    pub preparing_artifacts: StepProgress,
    /// Application deployment.
    #[serde(default)]
    pub deploying_applications: StepProgress,
}

/// A sandbox as returned by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sandbox {
    /// Sandbox identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Current lifecycle state.
    #[serde(rename = "sandbox_status")]
    pub status: SandboxStatus,
    /// Launch step progress.
    #[serde(default)]
    pub launching_progress: LaunchingProgress,
}

/// Default predicate for releasing the temporary branch while a sandbox launches.
///
/// Once artifacts are being prepared and applications deployed, the service has
/// already fetched the blueprint source and no longer needs the branch.
pub fn temp_branch_releasable(sandbox: &Sandbox) -> bool {
    let progress = &sandbox.launching_progress;
    progress.preparing_artifacts.has_started() && progress.deploying_applications.has_started()
}

/// One problem reported by blueprint validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Short error name.
    #[serde(default)]
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
}

/// Result of validating a blueprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Problems found; empty when the blueprint is valid.
    #[serde(default)]
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    /// Whether validation found no problems.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A blueprint as listed by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueprintSummary {
    /// Blueprint name.
    #[serde(rename = "blueprint_name")]
    pub name: String,
    /// Short description from the blueprint file.
    #[serde(default)]
    pub description: Option<String>,
    /// Source repository URL.
    #[serde(default, rename = "url")]
    pub repository_url: Option<String>,
    /// Whether sandboxes can be launched from the blueprint.
    #[serde(default)]
    pub enabled: bool,
}

/// Which sandboxes a listing returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SandboxFilter {
    /// Every sandbox in the space.
    All,
    /// Sandboxes launched by the caller.
    #[default]
    My,
    /// Sandboxes launched by automation.
    Auto,
}

impl SandboxFilter {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::My => "my",
            Self::Auto => "auto",
        }
    }
}

/// Drop ended sandboxes from a listing unless `show_ended` is set.
pub fn visible_sandboxes(sandboxes: Vec<Sandbox>, show_ended: bool) -> Vec<Sandbox> {
    if show_ended {
        return sandboxes;
    }
    sandboxes
        .into_iter()
        .filter(|sandbox| sandbox.status != SandboxStatus::Ended)
        .collect()
}

/// Parameters for launching a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxRequest {
    /// Sandbox display name.
    pub name: String,
    /// Blueprint to launch.
    pub blueprint: String,
    /// Minutes until the sandbox is automatically torn down.
    pub duration_minutes: u64,
    /// Branch the service builds from.
    pub branch: String,
    /// Historic commit on `branch`.
    pub commit: Option<String>,
    /// Blueprint input values.
    pub inputs: BTreeMap<String, String>,
    /// Artifact paths per application.
    pub artifacts: BTreeMap<String, String>,
}

/// Operations consumed from the remote blueprint service.
pub trait RemoteService {
    /// Validate `blueprint` as found on `branch` (optionally at `commit`).
    fn validate_blueprint(
        &self,
        blueprint: &str,
        branch: &str,
        commit: Option<&str>,
    ) -> Result<ValidationReport>;
    /// Launch a sandbox, returning its identifier.
    fn start_sandbox(&self, request: &SandboxRequest) -> Result<String>;
    /// Fetch the current state of a sandbox.
    fn sandbox(&self, sandbox_id: &str) -> Result<Sandbox>;
    /// Request teardown of a sandbox.
    fn end_sandbox(&self, sandbox_id: &str) -> Result<()>;
    /// Browser link for a sandbox.
    fn sandbox_ui_link(&self, sandbox_id: &str) -> String;
    /// Blueprints available in the space.
    fn list_blueprints(&self) -> Result<Vec<BlueprintSummary>>;
    /// Full blueprint data, as returned by the service.
    fn blueprint_detail(&self, name: &str) -> Result<serde_json::Value>;
    /// At most `count` sandboxes matching `filter`, newest first.
    fn list_sandboxes(&self, filter: SandboxFilter, count: u32) -> Result<Vec<Sandbox>>;
    /// Full sandbox data, as returned by the service.
    fn sandbox_detail(&self, sandbox_id: &str) -> Result<serde_json::Value>;
}
