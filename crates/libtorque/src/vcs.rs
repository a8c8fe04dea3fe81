use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::git;

/// Remote used when none is configured.
pub const DEFAULT_REMOTE: &str = "origin";

/// Version-control capabilities the branch context and inspectors rely on.
///
/// Read operations must reflect the working tree at call time. Write
/// operations are only ever invoked by the branch context lifecycle.
pub trait Vcs {
    /// Directory holding repository metadata; used for the context lock.
    fn git_dir(&self) -> Result<PathBuf>;
    /// Name of the checked-out branch, or `None` when HEAD is detached.
    fn current_branch(&self) -> Result<Option<String>>;
    /// Tracked paths whose content differs from `HEAD`.
    fn modified_files(&self) -> Result<Vec<String>>;
    /// Untracked, non-ignored paths.
    fn untracked_files(&self) -> Result<Vec<String>>;
    /// Whether the local tip of `branch` equals the remote's copy of it.
    fn is_synced_with_remote(&self, branch: &str) -> Result<bool>;
    /// Local branch names.
    fn list_branches(&self) -> Result<Vec<String>>;

    /// Switch to an existing branch.
    fn checkout(&self, branch: &str) -> Result<()>;
    /// Create a branch at `HEAD` and switch to it, keeping the working tree.
    fn create_branch(&self, branch: &str) -> Result<()>;
    /// Force-delete a local branch.
    fn delete_branch(&self, branch: &str) -> Result<()>;
    /// Push a local branch to the remote under the same name.
    fn push_branch(&self, branch: &str) -> Result<()>;
    /// Delete a branch from the remote.
    fn delete_remote_branch(&self, branch: &str) -> Result<()>;
    /// Stage every change (including untracked files and deletions) and commit it.
    fn commit_all(&self, message: &str) -> Result<()>;
    /// Move modifications and untracked files aside, leaving a clean tree.
    /// Returns an identifier for the shelved state, or `None` if nothing was shelved.
    fn shelve(&self, message: &str) -> Result<Option<String>>;
    /// Re-apply shelved state onto the current branch, keeping the shelf.
    fn apply_shelved(&self, shelf: &str) -> Result<()>;
    /// Re-apply shelved state exactly (index included) and drop the shelf.
    fn unshelve(&self, shelf: &str) -> Result<()>;
    /// Discard every modification and untracked file in the working tree.
    fn discard_changes(&self) -> Result<()>;

    /// Whether any tracked file is modified relative to `HEAD`.
    fn is_dirty(&self) -> Result<bool> {
        Ok(!self.modified_files()?.is_empty())
    }

    /// Whether the working tree holds any modification or untracked file.
    fn has_local_changes(&self) -> Result<bool> {
        Ok(self.is_dirty()? || !self.untracked_files()?.is_empty())
    }
}

/// [`Vcs`] implementation that drives the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    /// Root of the working tree.
    repo_dir: PathBuf,
    /// Remote that temporary branches are pushed to.
    remote: String,
}

impl GitCli {
    /// Create a git-backed VCS for the working tree at `repo_dir`, pushing to `remote`.
    pub fn new(repo_dir: PathBuf, remote: impl Into<String>) -> Self {
        Self {
            repo_dir,
            remote: remote.into(),
        }
    }
}

impl Vcs for GitCli {
    fn git_dir(&self) -> Result<PathBuf> {
        git::git_dir(&self.repo_dir)
    }

    fn current_branch(&self) -> Result<Option<String>> {
        git::current_branch(&self.repo_dir)
    }

    fn modified_files(&self) -> Result<Vec<String>> {
        git::modified_files(&self.repo_dir)
    }

    fn untracked_files(&self) -> Result<Vec<String>> {
        git::untracked_files(&self.repo_dir)
    }

    fn is_synced_with_remote(&self, branch: &str) -> Result<bool> {
        let remote_ref = format!("refs/remotes/{}/{branch}", self.remote);
        let Some(remote_tip) = git::rev_parse(&self.repo_dir, &remote_ref)? else {
            debug!(branch, remote = %self.remote, "branch has no remote counterpart");
            return Ok(false);
        };
        let local_ref = format!("refs/heads/{branch}");
        let local_tip = git::rev_parse(&self.repo_dir, &local_ref)?
            .with_context(|| format!("No such branch: {branch}"))?;

        if local_tip == remote_tip {
            return Ok(true);
        }
        if let Ok((ahead, behind)) = git::ahead_behind(&self.repo_dir, &local_ref, &remote_ref) {
            debug!(branch, ahead, behind, "local branch differs from remote");
        }
        Ok(false)
    }

    fn list_branches(&self) -> Result<Vec<String>> {
        git::list_branches(&self.repo_dir)
    }

    fn checkout(&self, branch: &str) -> Result<()> {
        git::checkout(&self.repo_dir, branch)
    }

    fn create_branch(&self, branch: &str) -> Result<()> {
        git::create_branch(&self.repo_dir, branch)
    }

    fn delete_branch(&self, branch: &str) -> Result<()> {
        git::delete_branch(&self.repo_dir, branch, true)
    }

    fn push_branch(&self, branch: &str) -> Result<()> {
        git::push_branch(&self.repo_dir, &self.remote, branch)
    }

    fn delete_remote_branch(&self, branch: &str) -> Result<()> {
        git::delete_remote_branch(&self.repo_dir, &self.remote, branch)
    }

    fn commit_all(&self, message: &str) -> Result<()> {
        git::add_all(&self.repo_dir)?;
        git::commit(&self.repo_dir, message)
    }

    fn shelve(&self, message: &str) -> Result<Option<String>> {
        git::stash_push(&self.repo_dir, message)
    }

    fn apply_shelved(&self, shelf: &str) -> Result<()> {
        git::stash_apply(&self.repo_dir, shelf)
    }

    fn unshelve(&self, shelf: &str) -> Result<()> {
        git::stash_pop(&self.repo_dir, shelf, true)
    }

    fn discard_changes(&self) -> Result<()> {
        git::reset_hard(&self.repo_dir)?;
        git::clean(&self.repo_dir)
    }

    fn has_local_changes(&self) -> Result<bool> {
        git::has_uncommitted_changes(&self.repo_dir)
    }
}
