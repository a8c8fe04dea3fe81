use anyhow::{Context, Result, ensure};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Run a git command inside `repo_path`, ensuring it succeeds.
pub fn git(repo_path: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(args)
        .output()
        .with_context(|| format!("failed to run git {}", args.join(" ")))?;

    ensure!(
        output.status.success(),
        "git command failed: git {}\nstdout: {}\nstderr: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    Ok(output)
}

/// Trimmed stdout of a successful git command.
pub fn git_stdout(repo_path: &Path, args: &[&str]) -> Result<String> {
    let output = git(repo_path, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// A working repository on `main` with a committed `dirty.txt`, pushed to a
/// bare `remote.git` next to it.
pub struct TestRepo {
    /// Keeps the directories alive.
    _temp_dir: TempDir,
    /// Working tree.
    pub path: PathBuf,
    /// Bare repository acting as `origin`.
    pub remote: PathBuf,
}

impl TestRepo {
    /// Create the working repository and its remote.
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("repo");
        let remote = temp_dir.path().join("remote.git");
        fs::create_dir_all(&path)?;

        git(&path, &["init", "-b", "main"])?;
        git(&path, &["config", "user.email", "test@example.com"])?;
        git(&path, &["config", "user.name", "Test User"])?;
        fs::write(path.join("dirty.txt"), "committed\n")?;
        fs::write(path.join(".gitignore"), "*.log\n")?;
        git(&path, &["add", "."])?;
        git(&path, &["commit", "-m", "Initial commit"])?;

        git(temp_dir.path(), &["init", "--bare", "-b", "main", "remote.git"])?;
        git(&path, &["remote", "add", "origin", "../remote.git"])?;
        git(&path, &["push", "-u", "origin", "main"])?;

        Ok(Self {
            _temp_dir: temp_dir,
            path,
            remote,
        })
    }

    /// Modify the tracked `dirty.txt`.
    pub fn make_dirty(&self) -> Result<()> {
        fs::write(self.path.join("dirty.txt"), "local edit\n")?;
        Ok(())
    }

    /// Add the untracked `untracked.txt`.
    pub fn add_untracked(&self) -> Result<()> {
        fs::write(self.path.join("untracked.txt"), "new file\n")?;
        Ok(())
    }

    /// Commit a change locally without pushing it.
    pub fn commit_unpushed(&self) -> Result<()> {
        fs::write(self.path.join("committed.txt"), "unpushed\n")?;
        git(&self.path, &["add", "committed.txt"])?;
        git(&self.path, &["commit", "-m", "Unpushed change"])?;
        Ok(())
    }

    /// Branch names in the working repository.
    pub fn local_branches(&self) -> Result<Vec<String>> {
        branch_names(&self.path)
    }

    /// Branch names in the remote.
    pub fn remote_branches(&self) -> Result<Vec<String>> {
        branch_names(&self.remote)
    }

    /// Content of `path` on `branch` in the remote.
    pub fn remote_file(&self, branch: &str, path: &str) -> Result<String> {
        let output = git(&self.remote, &["show", &format!("{branch}:{path}")])?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Number of entries in the stash.
    pub fn stash_count(&self) -> Result<usize> {
        Ok(git_stdout(&self.path, &["stash", "list"])?.lines().count())
    }
}

/// Short branch names of the repository at `path`.
fn branch_names(path: &Path) -> Result<Vec<String>> {
    Ok(git_stdout(path, &["branch", "--format=%(refname:short)"])?
        .lines()
        .map(str::to_string)
        .collect())
}
