use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use libtorque::{BlueprintRepo, BranchRequest, GitCli, TorqueError, Vcs, find_repo_root};
use torque_term::Output;

/// `torque bp` subcommands.
pub mod blueprint;
/// `torque sb` subcommands.
pub mod sandbox;

/// Everything a command needs besides the remote service.
pub struct CommandEnv {
    /// User-facing messages.
    pub output: Arc<dyn Output>,
    /// Directory the command was started from.
    pub repo_dir: PathBuf,
    /// Git remote temporary branches are pushed to.
    pub remote: String,
    /// Print machine-readable results on stdout.
    pub json: bool,
}

/// Where the blueprint source for a command comes from.
pub enum Source {
    /// The local blueprint repository; its working tree decides the branch.
    Local {
        /// Repository the branch context runs against.
        vcs: GitCli,
        /// Indexed blueprints of the repository.
        repo: BlueprintRepo,
    },
    /// An explicit branch, requested from inside a git working tree.
    Explicit {
        /// Repository the branch context runs against.
        vcs: GitCli,
    },
    /// An explicit branch with no local repository involved.
    Remote {
        /// Branch the remote builds from.
        branch: String,
    },
}

impl Source {
    /// Decide the source for `blueprint` under `request`.
    ///
    /// Without an explicit branch the local repository must be a blueprint
    /// repository that defines `blueprint`.
    pub fn resolve(env: &CommandEnv, request: &BranchRequest, blueprint: &str) -> Result<Self> {
        request.validate()?;
        match &request.branch {
            None => {
                let repo = BlueprintRepo::discover(&env.repo_dir)?;
                repo.require_blueprint(blueprint)?;
                let vcs = GitCli::new(repo.root().to_path_buf(), env.remote.as_str());
                Ok(Self::Local { vcs, repo })
            }
            Some(branch) => {
                let vcs = find_repo_root(&env.repo_dir)
                    .map(|root| GitCli::new(root, env.remote.as_str()));
                Ok(match vcs {
                    // A detached HEAD cannot be snapshotted
                    Some(vcs) if matches!(vcs.current_branch(), Ok(Some(_))) => {
                        Self::Explicit { vcs }
                    }
                    _ => Self::Remote {
                        branch: branch.clone(),
                    },
                })
            }
        }
    }
}

/// Wrap a remote service failure.
pub fn remote_error(err: anyhow::Error) -> TorqueError {
    TorqueError::Remote(format!("{err:#}"))
}
