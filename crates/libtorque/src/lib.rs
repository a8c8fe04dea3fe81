#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Core library behind the `torque` command line tool.
//!
//! The central piece is the [`BranchContext`]: a scoped view of a git working
//! tree that makes local, uncommitted work visible to the remote blueprint
//! service by pushing it to a temporary branch, and that always returns the
//! working tree to its original state when it closes. The [`Waiter`] polls a
//! launching sandbox and releases the temporary branch as soon as the remote
//! no longer needs it.

use std::path::{Path, PathBuf};

/// Blueprint repository discovery and blueprint default values.
mod blueprint;
/// HTTP implementation of the remote service.
mod client;
/// Connection settings resolution.
mod config;
/// Branch context lifecycle.
mod context;
/// Error taxonomy.
mod error;
/// Helper routines for interacting with Git repositories.
mod git;
/// Lock guarding a working tree against nested contexts.
mod lock;
/// Remote service interface and domain types.
mod remote;
/// Version-control capability used by the lifecycle.
mod vcs;
/// Sandbox launch polling.
mod waiter;

pub use blueprint::{BLUEPRINTS_DIR, BlueprintRepo, apply_synced_defaults};
pub use client::TorqueClient;
pub use config::{
    DEFAULT_HOST, DEFAULT_PROFILE, ENV_HOST, ENV_PROFILE, ENV_SPACE, ENV_TOKEN, Settings,
    SettingsOverrides,
};
pub use context::{
    BranchContext, BranchRequest, RepoSnapshot, TEMP_BRANCH_PREFIX, is_temp_branch,
    temp_branch_name, with_branch_context,
};
pub use error::{Result, TorqueError};
pub use lock::{ContextLock, LOCK_FILE_NAME};
pub use remote::{
    BlueprintSummary, LaunchingProgress, RemoteService, Sandbox, SandboxFilter, SandboxRequest,
    SandboxStatus, StepProgress, ValidationError, ValidationReport, temp_branch_releasable,
    visible_sandboxes,
};
pub use vcs::{DEFAULT_REMOTE, GitCli, Vcs};
pub use waiter::{
    Clock, DEFAULT_TIMEOUT_MINUTES, MAX_POLL_FAILURES, NoProgress, POLL_INTERVAL, PollOutcome,
    Progress, SystemClock, Waiter,
};

/// Locate the root of the git working tree containing `start_dir`.
pub fn find_repo_root(start_dir: &Path) -> Option<PathBuf> {
    git::find_root(start_dir)
}
