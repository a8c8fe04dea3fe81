use std::{collections::BTreeSet, result::Result as StdResult};

use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, TorqueError},
    lock::ContextLock,
    vcs::Vcs,
};

/// Marker prefixed to every temporary branch name.
pub const TEMP_BRANCH_PREFIX: &str = "tmp-torque-";

/// Branch and commit named explicitly by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchRequest {
    /// Remote branch to build from, overriding local state inspection.
    pub branch: Option<String>,
    /// Historic commit on `branch`.
    pub commit: Option<String>,
}

impl BranchRequest {
    /// Build a request from optional command-line values.
    pub fn new(branch: Option<String>, commit: Option<String>) -> Self {
        Self { branch, commit }
    }

    /// A commit is only meaningful together with the branch it lives on.
    pub fn validate(&self) -> Result<()> {
        if self.commit.is_some() && self.branch.is_none() {
            return Err(TorqueError::InvalidArgument(
                "a commit can only be specified together with a branch".to_string(),
            ));
        }
        Ok(())
    }
}

/// Repository state captured when a context opens; the restoration target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSnapshot {
    /// Branch checked out when the context opened.
    pub original_branch: String,
    /// Whether tracked files differed from `HEAD`.
    pub has_uncommitted_changes: bool,
    /// Tracked paths that differed from `HEAD`.
    pub modified_paths: Vec<String>,
    /// Untracked, non-ignored paths.
    pub untracked_paths: Vec<String>,
    /// Whether the branch tip matched the remote. Only inspected when no explicit
    /// branch was requested, `false` otherwise.
    pub is_synced_with_remote: bool,
}

impl RepoSnapshot {
    /// Inspect the working tree, optionally comparing the branch against its remote.
    pub fn capture(vcs: &dyn Vcs, check_sync: bool) -> Result<Self> {
        let original_branch = vcs
            .current_branch()
            .map_err(|e| repo_state(&e))?
            .ok_or_else(|| {
                TorqueError::RepoState(
                    "HEAD is detached; check out a branch before running this command".to_string(),
                )
            })?;
        let modified_paths = vcs.modified_files().map_err(|e| repo_state(&e))?;
        let untracked_paths = vcs.untracked_files().map_err(|e| repo_state(&e))?;
        let is_synced_with_remote = check_sync
            && vcs
                .is_synced_with_remote(&original_branch)
                .map_err(|e| repo_state(&e))?;

        debug!(
            branch = %original_branch,
            modified = modified_paths.len(),
            untracked = untracked_paths.len(),
            synced = is_synced_with_remote,
            "examined local repository"
        );

        Ok(Self {
            original_branch,
            has_uncommitted_changes: !modified_paths.is_empty(),
            modified_paths,
            untracked_paths,
            is_synced_with_remote,
        })
    }

    /// Whether there is anything in the working tree that is not committed.
    pub fn has_local_changes(&self) -> bool {
        self.has_uncommitted_changes || !self.untracked_paths.is_empty()
    }

    /// Whether the remote already has exactly what the working tree holds.
    pub fn is_clean_and_synced(&self) -> bool {
        !self.has_local_changes() && self.is_synced_with_remote
    }

    /// Describe every way the current working tree differs from this snapshot.
    fn drift(&self, vcs: &dyn Vcs) -> anyhow::Result<Vec<String>> {
        let mut drift = Vec::new();

        let branch = vcs.current_branch()?;
        if branch.as_deref() != Some(self.original_branch.as_str()) {
            drift.push(format!(
                "expected branch {}, found {}",
                self.original_branch,
                branch.as_deref().unwrap_or("detached HEAD")
            ));
        }
        if as_set(&vcs.modified_files()?) != as_set(&self.modified_paths) {
            drift.push("modified files differ from the original state".to_string());
        }
        if as_set(&vcs.untracked_files()?) != as_set(&self.untracked_paths) {
            drift.push("untracked files differ from the original state".to_string());
        }
        Ok(drift)
    }
}

/// Ordered set view used for order-insensitive path comparisons.
fn as_set(paths: &[String]) -> BTreeSet<&str> {
    paths.iter().map(String::as_str).collect()
}

/// Map an inspection failure into a `TorqueError::RepoState`.
fn repo_state(error: &anyhow::Error) -> TorqueError {
    TorqueError::RepoState(format!("{error:#}"))
}

/// Derive the temporary branch name for `branch` at `now`.
pub fn temp_branch_name(branch: &str, now: DateTime<Local>) -> String {
    format!(
        "{TEMP_BRANCH_PREFIX}{branch}-{}",
        now.format("%Y%m%d%H%M%S")
    )
}

/// Whether `branch` carries the temporary-branch marker.
pub fn is_temp_branch(branch: &str) -> bool {
    branch.starts_with(TEMP_BRANCH_PREFIX)
}

/// Pick a temporary branch name that does not collide with an existing local branch.
fn unique_temp_branch_name(vcs: &dyn Vcs, branch: &str) -> anyhow::Result<String> {
    let base = temp_branch_name(branch, Local::now());
    let existing = vcs.list_branches()?;
    let mut candidate = base.clone();
    let mut suffix = 1;
    while existing.contains(&candidate) {
        candidate = format!("{base}-{suffix}");
        suffix += 1;
    }
    Ok(candidate)
}

/// Scoped view of the repository for the duration of one remote operation.
///
/// Opening a context may move the working tree onto a pushed temporary
/// branch. Closing it (explicitly, through [`with_branch_context`], or on
/// drop) deletes that branch and returns the working tree to the captured
/// [`RepoSnapshot`].
pub struct BranchContext<'a> {
    /// Repository being operated on.
    vcs: &'a dyn Vcs,
    /// State captured at open; the restoration target.
    snapshot: RepoSnapshot,
    /// Branch the caller is working from.
    working_branch: String,
    /// Local temporary branch, when one was created.
    temp_working_branch: Option<String>,
    /// Branch the remote service is told to build from.
    validation_branch: String,
    /// Commit requested together with an explicit branch.
    commit: Option<String>,
    /// The temporary branch has been pushed and not yet deleted from the remote.
    temp_branch_exists: bool,
    /// The local copy of the temporary branch has not been deleted yet.
    local_temp_exists: bool,
    /// Shelved local changes waiting to be re-applied on the original branch.
    shelf: Option<String>,
    /// The working tree has not been returned to the snapshot yet.
    restore_pending: bool,
    /// CLOSE has run.
    closed: bool,
    /// Marks the working tree as owned by this context.
    lock: Option<ContextLock>,
}

impl<'a> BranchContext<'a> {
    /// Validate the request, snapshot the repository and resolve the validation branch,
    /// creating and pushing a temporary branch when the remote cannot see local state.
    pub fn open(vcs: &'a dyn Vcs, request: &BranchRequest) -> Result<Self> {
        request.validate()?;

        let git_dir = vcs.git_dir().map_err(|e| repo_state(&e))?;
        let lock = ContextLock::acquire(&git_dir)?;
        let snapshot = RepoSnapshot::capture(vcs, request.branch.is_none())?;

        let mut context = Self {
            vcs,
            working_branch: snapshot.original_branch.clone(),
            validation_branch: snapshot.original_branch.clone(),
            snapshot,
            temp_working_branch: None,
            commit: request.commit.clone(),
            temp_branch_exists: false,
            local_temp_exists: false,
            shelf: None,
            restore_pending: false,
            closed: false,
            lock: Some(lock),
        };

        if let Some(branch) = &request.branch {
            debug!(branch = %branch, "explicit branch requested; local state is not used");
            context.working_branch = branch.clone();
            context.validation_branch = branch.clone();
            return Ok(context);
        }

        if context.snapshot.is_clean_and_synced() {
            debug!(
                branch = %context.working_branch,
                "working tree is clean and synced; using the current branch"
            );
            return Ok(context);
        }

        let temp = unique_temp_branch_name(vcs, &context.working_branch).map_err(|e| {
            TorqueError::TempBranchCreation {
                branch: TEMP_BRANCH_PREFIX.to_string(),
                message: format!("{e:#}"),
            }
        })?;
        let shelf = materialize_temp_branch(vcs, &context.snapshot, &temp)?;
        info!(branch = %temp, "pushed temporary branch with local changes");

        context.shelf = shelf;
        context.temp_working_branch = Some(temp.clone());
        context.validation_branch = temp;
        context.temp_branch_exists = true;
        context.local_temp_exists = true;
        context.restore_pending = true;
        Ok(context)
    }

    /// Branch the caller is working from.
    pub fn working_branch(&self) -> &str {
        &self.working_branch
    }

    /// Local temporary branch, if one was created.
    pub fn temp_working_branch(&self) -> Option<&str> {
        self.temp_working_branch.as_deref()
    }

    /// Branch the remote service should build from.
    pub fn validation_branch(&self) -> &str {
        &self.validation_branch
    }

    /// Commit requested together with an explicit branch.
    pub fn commit(&self) -> Option<&str> {
        self.commit.as_deref()
    }

    /// Whether the pushed temporary branch still exists on the remote.
    pub fn temp_branch_exists(&self) -> bool {
        self.temp_branch_exists
    }

    /// State captured when the context opened.
    pub fn snapshot(&self) -> &RepoSnapshot {
        &self.snapshot
    }

    /// Whether CLOSE has already run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Return the working tree to the snapshot while the remote temp branch stays alive.
    ///
    /// Steps that fail stay pending: a later call (or CLOSE) retries the checkout
    /// and the unshelve and checks the result again.
    pub fn restore_working_tree(&mut self) -> Result<()> {
        if !self.restore_pending {
            return Ok(());
        }

        let original = self.snapshot.original_branch.clone();
        let mut failures = Vec::new();

        let mut on_original = self.is_on(&original);
        let mut reset_needed = self.shelf.is_some();
        if !on_original {
            if has_leftovers(self.vcs)
                && let Err(e) = self.vcs.discard_changes()
            {
                failures.push(format!("discarding temporary branch changes: {e:#}"));
            }
            match self.vcs.checkout(&original) {
                Ok(()) => {
                    on_original = true;
                    reset_needed = true;
                }
                Err(e) => failures.push(format!("checking out {original}: {e:#}")),
            }
        }

        if on_original {
            // The shelf, not the checkout, is the authority on file contents.
            if reset_needed
                && has_leftovers(self.vcs)
                && let Err(e) = self.vcs.discard_changes()
            {
                failures.push(format!("resetting {original}: {e:#}"));
            }
            if let Some(shelf) = self.shelf.clone() {
                match self.vcs.unshelve(&shelf) {
                    Ok(()) => self.shelf = None,
                    Err(e) => failures.push(format!(
                        "re-applying local changes (kept in stash {shelf}): {e:#}"
                    )),
                }
            }
        } else if let Some(shelf) = &self.shelf {
            failures.push(format!("local changes are kept in stash {shelf}"));
        }

        match self.snapshot.drift(self.vcs) {
            Ok(drift) => failures.extend(drift),
            Err(e) => failures.push(format!("verifying restored state: {e:#}")),
        }

        if failures.is_empty() {
            self.restore_pending = false;
            debug!(branch = %original, "local repository restored");
            Ok(())
        } else {
            let message = failures.join("; ");
            error!(branch = %original, "local repository was not restored: {message}");
            Err(TorqueError::Restoration(message))
        }
    }

    /// Whether `branch` is checked out; unknown counts as no.
    fn is_on(&self, branch: &str) -> bool {
        matches!(self.vcs.current_branch(), Ok(Some(current)) if current == branch)
    }

    /// Delete the temporary branch: the remote copy first, then the local copy once
    /// the working tree has left it. Failures are logged, never returned.
    pub fn delete_temp_branch(&mut self) {
        let Some(temp) = self.temp_working_branch.clone() else {
            return;
        };

        if self.temp_branch_exists {
            self.temp_branch_exists = false;
            match self.vcs.delete_remote_branch(&temp) {
                Ok(()) => debug!(branch = %temp, "deleted remote temporary branch"),
                Err(e) => warn!(branch = %temp, "unable to delete remote temporary branch: {e:#}"),
            }
        }

        if self.local_temp_exists && !self.is_on(&temp) {
            self.local_temp_exists = false;
            match self.vcs.delete_branch(&temp) {
                Ok(()) => debug!(branch = %temp, "deleted local temporary branch"),
                Err(e) => warn!(branch = %temp, "unable to delete local temporary branch: {e:#}"),
            }
        }
    }

    /// Tear the context down: delete the temporary branch and restore the snapshot.
    ///
    /// Every step is attempted even when an earlier one fails. Calling this again
    /// after it has run is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.delete_temp_branch();
        let restored = self.restore_working_tree();
        self.delete_temp_branch();
        self.lock.take();
        restored
    }
}

impl Drop for BranchContext<'_> {
    #[allow(clippy::let_underscore_must_use)]
    fn drop(&mut self) {
        // Restoration failures are logged by `close` itself.
        let _ = self.close();
    }
}

/// Whether anything is left in the working tree; unknown counts as yes.
fn has_leftovers(vcs: &dyn Vcs) -> bool {
    vcs.has_local_changes().unwrap_or(true)
}

/// Create `temp`, commit the snapshot's local changes onto it and push it.
///
/// On failure every completed step is undone before the error is returned.
/// Returns the shelf holding the original changes.
fn materialize_temp_branch(
    vcs: &dyn Vcs,
    snapshot: &RepoSnapshot,
    temp: &str,
) -> Result<Option<String>> {
    let creation_error = |e: &anyhow::Error| TorqueError::TempBranchCreation {
        branch: temp.to_string(),
        message: format!("{e:#}"),
    };

    let shelf = if snapshot.has_local_changes() {
        vcs.shelve(&format!("torque: local changes for {temp}"))
            .map_err(|e| creation_error(&e))?
    } else {
        None
    };

    if let Err(e) = vcs.create_branch(temp) {
        if let Some(shelf) = &shelf
            && let Err(unshelve) = vcs.unshelve(shelf)
        {
            error!("unable to re-apply local changes (kept in stash {shelf}): {unshelve:#}");
        }
        return Err(creation_error(&e));
    }

    let populated = match &shelf {
        Some(shelf) => vcs
            .apply_shelved(shelf)
            .and_then(|()| vcs.commit_all(&format!("Local changes for {}", snapshot.original_branch))),
        None => Ok(()),
    };

    if let Err(e) = populated.and_then(|()| vcs.push_branch(temp)) {
        roll_back_temp_branch(vcs, snapshot, temp, shelf.as_deref());
        return Err(creation_error(&e));
    }

    Ok(shelf)
}

/// Undo a partially materialized temporary branch.
fn roll_back_temp_branch(vcs: &dyn Vcs, snapshot: &RepoSnapshot, temp: &str, shelf: Option<&str>) {
    warn!(branch = %temp, "rolling back temporary branch");
    if let Err(e) = vcs.discard_changes() {
        warn!("unable to discard temporary branch changes: {e:#}");
    }
    if let Err(e) = vcs.checkout(&snapshot.original_branch) {
        error!(branch = %snapshot.original_branch, "unable to return to original branch: {e:#}");
        return;
    }
    if let Err(e) = vcs.delete_branch(temp) {
        warn!(branch = %temp, "unable to delete local temporary branch: {e:#}");
    }
    if let Some(shelf) = shelf
        && let Err(e) = vcs.unshelve(shelf)
    {
        error!("unable to re-apply local changes (kept in stash {shelf}): {e:#}");
    }
}

/// Run `operation` inside a branch context, closing it on every exit path.
///
/// An error from `operation` takes precedence over a restoration error, which is
/// still logged. A panic inside `operation` closes the context while unwinding.
pub fn with_branch_context<T, E, F>(vcs: &dyn Vcs, request: &BranchRequest, operation: F) -> StdResult<T, E>
where
    E: From<TorqueError>,
    F: FnOnce(&mut BranchContext<'_>) -> StdResult<T, E>,
{
    let mut context = BranchContext::open(vcs, request)?;
    let outcome = operation(&mut context);
    let closed = context.close();
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err.into()),
        (Err(err), _) => Err(err),
    }
}

#[cfg(test)]
pub mod tests {
    use std::{
        cell::RefCell,
        collections::{BTreeMap, HashSet},
        panic::{self, AssertUnwindSafe},
        path::PathBuf,
    };

    use anyhow::bail;
    use tempfile::TempDir;

    use super::*;

    /// Mutable model of a repository and its remote.
    #[derive(Default)]
    struct FakeState {
        current: Option<String>,
        branches: BTreeSet<String>,
        remote_branches: BTreeSet<String>,
        modified: Vec<String>,
        untracked: Vec<String>,
        synced: bool,
        shelves: BTreeMap<String, (Vec<String>, Vec<String>)>,
        next_shelf: usize,
        calls: Vec<String>,
    }

    /// In-memory [`Vcs`] with failure injection.
    pub struct FakeVcs {
        dir: TempDir,
        state: RefCell<FakeState>,
        failing: RefCell<HashSet<&'static str>>,
    }

    impl FakeVcs {
        pub fn new(branch: &str) -> Self {
            let state = FakeState {
                current: Some(branch.to_string()),
                branches: BTreeSet::from([branch.to_string()]),
                remote_branches: BTreeSet::from([branch.to_string()]),
                synced: true,
                ..FakeState::default()
            };
            Self {
                dir: TempDir::new().unwrap(),
                state: RefCell::new(state),
                failing: RefCell::new(HashSet::new()),
            }
        }

        pub fn dirty(self, path: &str) -> Self {
            self.state.borrow_mut().modified.push(path.to_string());
            self
        }

        fn untracked(self, path: &str) -> Self {
            self.state.borrow_mut().untracked.push(path.to_string());
            self
        }

        fn unsynced(self) -> Self {
            self.state.borrow_mut().synced = false;
            self
        }

        pub fn fail(&self, operation: &'static str) {
            self.failing.borrow_mut().insert(operation);
        }

        fn recover(&self, operation: &'static str) {
            self.failing.borrow_mut().remove(operation);
        }

        fn record(&self, operation: &'static str) -> anyhow::Result<()> {
            self.state.borrow_mut().calls.push(operation.to_string());
            if self.failing.borrow().contains(operation) {
                bail!("injected {operation} failure");
            }
            Ok(())
        }

        pub fn remote_branches(&self) -> BTreeSet<String> {
            self.state.borrow().remote_branches.clone()
        }

        fn local_branches(&self) -> BTreeSet<String> {
            self.state.borrow().branches.clone()
        }

        fn calls(&self) -> Vec<String> {
            self.state.borrow().calls.clone()
        }

        fn observed(&self) -> (Option<String>, Vec<String>, Vec<String>) {
            let state = self.state.borrow();
            (
                state.current.clone(),
                state.modified.clone(),
                state.untracked.clone(),
            )
        }
    }

    impl Vcs for FakeVcs {
        fn git_dir(&self) -> anyhow::Result<PathBuf> {
            Ok(self.dir.path().to_path_buf())
        }

        fn current_branch(&self) -> anyhow::Result<Option<String>> {
            Ok(self.state.borrow().current.clone())
        }

        fn modified_files(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.state.borrow().modified.clone())
        }

        fn untracked_files(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.state.borrow().untracked.clone())
        }

        fn is_synced_with_remote(&self, _branch: &str) -> anyhow::Result<bool> {
            Ok(self.state.borrow().synced)
        }

        fn list_branches(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.local_branches().into_iter().collect())
        }

        fn checkout(&self, branch: &str) -> anyhow::Result<()> {
            self.record("checkout")?;
            self.state.borrow_mut().current = Some(branch.to_string());
            Ok(())
        }

        fn create_branch(&self, branch: &str) -> anyhow::Result<()> {
            self.record("create_branch")?;
            let mut state = self.state.borrow_mut();
            if !state.branches.insert(branch.to_string()) {
                bail!("Branch '{branch}' already exists");
            }
            state.current = Some(branch.to_string());
            Ok(())
        }

        fn delete_branch(&self, branch: &str) -> anyhow::Result<()> {
            self.record("delete_branch")?;
            let mut state = self.state.borrow_mut();
            if state.current.as_deref() == Some(branch) {
                bail!("Cannot delete checked out branch '{branch}'");
            }
            state.branches.remove(branch);
            Ok(())
        }

        fn push_branch(&self, branch: &str) -> anyhow::Result<()> {
            self.record("push_branch")?;
            self.state
                .borrow_mut()
                .remote_branches
                .insert(branch.to_string());
            Ok(())
        }

        fn delete_remote_branch(&self, branch: &str) -> anyhow::Result<()> {
            self.record("delete_remote_branch")?;
            self.state.borrow_mut().remote_branches.remove(branch);
            Ok(())
        }

        fn commit_all(&self, _message: &str) -> anyhow::Result<()> {
            self.record("commit_all")?;
            let mut state = self.state.borrow_mut();
            state.modified.clear();
            state.untracked.clear();
            Ok(())
        }

        fn shelve(&self, _message: &str) -> anyhow::Result<Option<String>> {
            self.record("shelve")?;
            let mut state = self.state.borrow_mut();
            if state.modified.is_empty() && state.untracked.is_empty() {
                return Ok(None);
            }
            let id = format!("shelf-{}", state.next_shelf);
            state.next_shelf += 1;
            let modified = std::mem::take(&mut state.modified);
            let untracked = std::mem::take(&mut state.untracked);
            state.shelves.insert(id.clone(), (modified, untracked));
            Ok(Some(id))
        }

        fn apply_shelved(&self, shelf: &str) -> anyhow::Result<()> {
            self.record("apply_shelved")?;
            let mut state = self.state.borrow_mut();
            let Some((modified, untracked)) = state.shelves.get(shelf).cloned() else {
                bail!("no shelf {shelf}");
            };
            state.modified = modified;
            state.untracked = untracked;
            Ok(())
        }

        fn unshelve(&self, shelf: &str) -> anyhow::Result<()> {
            self.record("unshelve")?;
            let mut state = self.state.borrow_mut();
            let Some((modified, untracked)) = state.shelves.remove(shelf) else {
                bail!("no shelf {shelf}");
            };
            state.modified = modified;
            state.untracked = untracked;
            Ok(())
        }

        fn discard_changes(&self) -> anyhow::Result<()> {
            self.record("discard_changes")?;
            let mut state = self.state.borrow_mut();
            state.modified.clear();
            state.untracked.clear();
            Ok(())
        }
    }

    fn assert_no_temp_branches(vcs: &FakeVcs) {
        assert!(vcs.local_branches().iter().all(|b| !is_temp_branch(b)));
        assert!(vcs.remote_branches().iter().all(|b| !is_temp_branch(b)));
    }

    #[test]
    fn test_commit_without_branch_is_rejected_before_any_git_call() {
        let vcs = FakeVcs::new("main").dirty("dirty.txt");
        let request = BranchRequest::new(None, Some("abc123".to_string()));

        let result = BranchContext::open(&vcs, &request);
        assert!(matches!(result, Err(TorqueError::InvalidArgument(_))));
        assert!(vcs.calls().is_empty());
    }

    #[test]
    fn test_clean_and_synced_uses_current_branch() {
        let vcs = FakeVcs::new("main");
        let mut context = BranchContext::open(&vcs, &BranchRequest::default()).unwrap();

        assert_eq!(context.validation_branch(), "main");
        assert_eq!(context.working_branch(), "main");
        assert_eq!(context.temp_working_branch(), None);
        assert!(!context.temp_branch_exists());

        context.close().unwrap();
        assert!(vcs.calls().is_empty());
    }

    #[test]
    fn test_every_local_state_is_restored() {
        type Setup = fn(FakeVcs) -> FakeVcs;
        let states: [(&str, Setup); 4] = [
            ("clean", |v| v),
            ("dirty", |v| v.dirty("dirty.txt")),
            ("untracked", |v| v.untracked("untracked.txt")),
            ("dirty+untracked", |v| v.dirty("dirty.txt").untracked("untracked.txt")),
        ];

        for (label, setup) in states {
            for synced in [true, false] {
                let mut vcs = setup(FakeVcs::new("feature"));
                if !synced {
                    vcs = vcs.unsynced();
                }
                let before = vcs.observed();
                let expect_temp = label != "clean" || !synced;

                let result: StdResult<(), TorqueError> =
                    with_branch_context(&vcs, &BranchRequest::default(), |context| {
                        assert_eq!(context.temp_branch_exists(), expect_temp, "{label}/{synced}");
                        if expect_temp {
                            let temp = context.temp_working_branch().unwrap();
                            assert!(is_temp_branch(temp));
                            assert_eq!(context.validation_branch(), temp);
                            assert!(vcs.remote_branches().contains(temp));
                        } else {
                            assert_eq!(context.validation_branch(), "feature");
                        }
                        Ok(())
                    });

                result.unwrap();
                assert_eq!(vcs.observed(), before, "{label}/{synced}");
                assert_no_temp_branches(&vcs);
            }
        }
    }

    #[test]
    fn test_failing_operation_still_restores() {
        let vcs = FakeVcs::new("main").dirty("dirty.txt").untracked("untracked.txt");
        let before = vcs.observed();

        let result: StdResult<(), TorqueError> =
            with_branch_context(&vcs, &BranchRequest::default(), |_| {
                Err(TorqueError::Remote("validation service unavailable".to_string()))
            });

        assert!(matches!(result, Err(TorqueError::Remote(_))));
        assert_eq!(vcs.observed(), before);
        assert_no_temp_branches(&vcs);
    }

    #[test]
    fn test_panicking_operation_still_restores() {
        let vcs = FakeVcs::new("main").untracked("untracked.txt");
        let before = vcs.observed();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: StdResult<(), TorqueError> =
                with_branch_context(&vcs, &BranchRequest::default(), |_| panic!("boom"));
        }));

        assert!(result.is_err());
        assert_eq!(vcs.observed(), before);
        assert_no_temp_branches(&vcs);
    }

    #[test]
    fn test_explicit_branch_wins_over_dirty_tree() {
        let vcs = FakeVcs::new("main").dirty("dirty.txt").untracked("untracked.txt");
        let request = BranchRequest::new(Some("release".to_string()), Some("abc123".to_string()));

        let mut context = BranchContext::open(&vcs, &request).unwrap();
        assert_eq!(context.validation_branch(), "release");
        assert_eq!(context.working_branch(), "release");
        assert_eq!(context.commit(), Some("abc123"));
        assert!(!context.temp_branch_exists());
        assert!(!context.snapshot().is_synced_with_remote);
        context.close().unwrap();

        assert!(vcs.calls().is_empty());
    }

    #[test]
    fn test_push_failure_rolls_back_temp_branch() {
        let vcs = FakeVcs::new("main").dirty("dirty.txt").untracked("untracked.txt");
        vcs.fail("push_branch");
        let before = vcs.observed();

        let result = BranchContext::open(&vcs, &BranchRequest::default());
        assert!(matches!(
            result,
            Err(TorqueError::TempBranchCreation { ref branch, .. }) if is_temp_branch(branch)
        ));
        assert_eq!(vcs.observed(), before);
        assert_no_temp_branches(&vcs);
    }

    #[test]
    fn test_create_failure_returns_shelved_changes() {
        let vcs = FakeVcs::new("main").dirty("dirty.txt");
        vcs.fail("create_branch");
        let before = vcs.observed();

        let result = BranchContext::open(&vcs, &BranchRequest::default());
        assert!(matches!(result, Err(TorqueError::TempBranchCreation { .. })));
        assert_eq!(vcs.observed(), before);
    }

    #[test]
    fn test_close_is_idempotent() {
        let vcs = FakeVcs::new("main").dirty("dirty.txt");
        let mut context = BranchContext::open(&vcs, &BranchRequest::default()).unwrap();

        context.close().unwrap();
        assert!(context.is_closed());
        let calls = vcs.calls().len();

        context.close().unwrap();
        drop(context);
        assert_eq!(vcs.calls().len(), calls);
    }

    #[test]
    fn test_remote_deletion_failure_does_not_block_restoration() {
        let vcs = FakeVcs::new("main").dirty("dirty.txt");
        vcs.fail("delete_remote_branch");
        let before = vcs.observed();

        let mut context = BranchContext::open(&vcs, &BranchRequest::default()).unwrap();
        context.close().unwrap();

        assert!(!context.temp_branch_exists());
        assert_eq!(vcs.observed(), before);
        assert!(vcs.local_branches().iter().all(|b| !is_temp_branch(b)));
    }

    #[test]
    fn test_restoration_failure_is_reported_and_cleanup_continues() {
        let vcs = FakeVcs::new("main").dirty("dirty.txt");
        let mut context = BranchContext::open(&vcs, &BranchRequest::default()).unwrap();
        vcs.fail("unshelve");

        let result = context.close();
        assert!(matches!(result, Err(TorqueError::Restoration(_))));
        assert_no_temp_branches(&vcs);
        assert_eq!(vcs.current_branch().unwrap().as_deref(), Some("main"));
    }

    #[test]
    fn test_early_restore_keeps_remote_branch_until_deleted() {
        let vcs = FakeVcs::new("main").untracked("untracked.txt");
        let before = vcs.observed();
        let mut context = BranchContext::open(&vcs, &BranchRequest::default()).unwrap();
        let temp = context.temp_working_branch().unwrap().to_string();

        context.restore_working_tree().unwrap();
        assert_eq!(vcs.observed(), before);
        assert!(context.temp_branch_exists());
        assert!(vcs.remote_branches().contains(&temp));

        context.delete_temp_branch();
        assert!(!context.temp_branch_exists());
        assert_no_temp_branches(&vcs);

        context.close().unwrap();
        assert_eq!(vcs.observed(), before);
    }

    #[test]
    fn test_failed_early_restore_is_reported_again_by_close() {
        let vcs = FakeVcs::new("main").dirty("dirty.txt");
        let mut context = BranchContext::open(&vcs, &BranchRequest::default()).unwrap();
        vcs.fail("unshelve");

        assert!(matches!(
            context.restore_working_tree(),
            Err(TorqueError::Restoration(_))
        ));
        let closed = context.close();
        assert!(matches!(closed, Err(TorqueError::Restoration(msg)) if msg.contains("shelf-0")));
        assert!(vcs.modified_files().unwrap().is_empty());
        assert_no_temp_branches(&vcs);
    }

    #[test]
    fn test_close_retries_pending_unshelve() {
        let vcs = FakeVcs::new("main").dirty("dirty.txt").untracked("untracked.txt");
        let before = vcs.observed();
        let mut context = BranchContext::open(&vcs, &BranchRequest::default()).unwrap();

        vcs.fail("unshelve");
        assert!(context.restore_working_tree().is_err());
        vcs.recover("unshelve");

        context.close().unwrap();
        assert_eq!(vcs.observed(), before);
        assert_no_temp_branches(&vcs);
    }

    #[test]
    fn test_close_retries_failed_checkout() {
        let vcs = FakeVcs::new("main").dirty("dirty.txt");
        let before = vcs.observed();
        let mut context = BranchContext::open(&vcs, &BranchRequest::default()).unwrap();
        let temp = context.temp_working_branch().unwrap().to_string();

        vcs.fail("checkout");
        let early = context.restore_working_tree();
        assert!(matches!(early, Err(TorqueError::Restoration(msg)) if msg.contains("shelf-0")));
        assert_eq!(vcs.current_branch().unwrap(), Some(temp));

        vcs.recover("checkout");
        context.close().unwrap();
        assert_eq!(vcs.observed(), before);
        assert_no_temp_branches(&vcs);
    }

    #[test]
    fn test_nested_context_is_refused() {
        let vcs = FakeVcs::new("main");
        let _outer = BranchContext::open(&vcs, &BranchRequest::default()).unwrap();

        let inner = BranchContext::open(&vcs, &BranchRequest::default());
        assert!(matches!(inner, Err(TorqueError::ContextActive { .. })));
    }

    #[test]
    fn test_detached_head_is_a_repo_state_error() {
        let vcs = FakeVcs::new("main");
        vcs.state.borrow_mut().current = None;

        let result = BranchContext::open(&vcs, &BranchRequest::default());
        assert!(matches!(result, Err(TorqueError::RepoState(_))));
    }

    #[test]
    fn test_temp_branch_name() {
        let now = Local::now();
        let name = temp_branch_name("feature/login", now);
        assert!(is_temp_branch(&name));
        assert_eq!(
            name,
            format!("tmp-torque-feature/login-{}", now.format("%Y%m%d%H%M%S"))
        );
        assert!(!is_temp_branch("feature/login"));
    }
}
