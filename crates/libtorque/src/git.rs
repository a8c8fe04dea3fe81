use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Run a git command with the given arguments in the specified directory.
/// Returns the output if successful, otherwise returns an error with the full command details.
fn run_git(repo_path: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute git command: git {}", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let command = format!("git {}", args.join(" "));
        anyhow::bail!("Git command failed: {}\nError: {}", command, stderr.trim());
    }

    Ok(output)
}

/// Run a git command whose non-zero exit means "no answer" rather than failure.
///
/// Returns the trimmed stdout on success and `None` when git exits non-zero.
fn run_git_optional(repo_path: &Path, args: &[&str]) -> Result<Option<String>> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute git command: git {}", args.join(" ")))?;

    if !output.status.success() {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
}

/// Split NUL-separated path output (from `-z` commands) into owned strings.
fn split_nul(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .split('\0')
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect()
}

/// Walk up from `start_dir` to find the nearest repository root containing a `.git` directory.
pub fn find_root(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;
    loop {
        if current.join(".git").exists() {
            return Some(current.to_path_buf());
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

/// Absolute path of the repository's git directory.
pub fn git_dir(repo_path: &Path) -> Result<PathBuf> {
    let output = run_git(repo_path, &["rev-parse", "--absolute-git-dir"])?;
    Ok(PathBuf::from(
        String::from_utf8_lossy(&output.stdout).trim(),
    ))
}

/// Short name of the checked-out branch, or `None` when HEAD is detached.
pub fn current_branch(repo_path: &Path) -> Result<Option<String>> {
    run_git_optional(repo_path, &["symbolic-ref", "--quiet", "--short", "HEAD"])
}

/// Check whether the repository has staged or unstaged changes.
pub fn has_uncommitted_changes(repo_path: &Path) -> Result<bool> {
    let output = run_git(repo_path, &["status", "--porcelain"])?;
    let status_output = String::from_utf8_lossy(&output.stdout);
    Ok(!status_output.trim().is_empty())
}

/// Tracked paths whose content differs from `HEAD`, staged or not.
pub fn modified_files(repo_path: &Path) -> Result<Vec<String>> {
    let output = run_git(repo_path, &["diff", "--name-only", "-z", "HEAD"])?;
    Ok(split_nul(&output))
}

/// Untracked paths, honouring the repository's ignore rules.
pub fn untracked_files(repo_path: &Path) -> Result<Vec<String>> {
    let output = run_git(
        repo_path,
        &["ls-files", "--others", "--exclude-standard", "-z"],
    )?;
    Ok(split_nul(&output))
}

/// Determine if a branch named `branch_name` exists in the repository.
pub fn has_branch(repo_path: &Path, branch_name: &str) -> Result<bool> {
    let output = run_git(repo_path, &["branch", "--list", branch_name])?;
    let branch_output = String::from_utf8_lossy(&output.stdout);
    Ok(!branch_output.trim().is_empty())
}

/// Enumerate every branch in the repository, returning their short names.
pub fn list_branches(repo_path: &Path) -> Result<Vec<String>> {
    let output = run_git(repo_path, &["branch", "--format=%(refname:short)"])?;
    let output_str = String::from_utf8_lossy(&output.stdout);

    Ok(output_str
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|branch| !branch.is_empty())
        .collect())
}

/// Names of the configured remotes.
pub fn list_remotes(repo_path: &Path) -> Result<Vec<String>> {
    let output = run_git(repo_path, &["remote"])?;
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|remote| !remote.is_empty())
        .collect())
}

/// Resolve `rev` to a commit hash, returning `None` if it does not exist.
pub fn rev_parse(repo_path: &Path, rev: &str) -> Result<Option<String>> {
    let spec = format!("{rev}^{{commit}}");
    run_git_optional(repo_path, &["rev-parse", "--verify", "--quiet", &spec])
}

/// Count commits only reachable from `local` (ahead) and only from `upstream` (behind).
pub fn ahead_behind(repo_path: &Path, local: &str, upstream: &str) -> Result<(usize, usize)> {
    let range = format!("{local}...{upstream}");
    let output = run_git(repo_path, &["rev-list", "--left-right", "--count", &range])?;
    let counts = String::from_utf8_lossy(&output.stdout);
    let mut parts = counts.split_whitespace().map(str::parse::<usize>);
    match (parts.next(), parts.next()) {
        (Some(Ok(ahead)), Some(Ok(behind))) => Ok((ahead, behind)),
        _ => anyhow::bail!("Unexpected rev-list output: {}", counts.trim()),
    }
}

/// Switch the working tree to `branch_name`.
pub fn checkout(repo_path: &Path, branch_name: &str) -> Result<()> {
    run_git(repo_path, &["checkout", "--quiet", branch_name])?;
    Ok(())
}

/// Create `branch_name` at `HEAD` and check it out, carrying the working tree along.
pub fn create_branch(repo_path: &Path, branch_name: &str) -> Result<()> {
    if has_branch(repo_path, branch_name)? {
        anyhow::bail!("Branch '{}' already exists", branch_name);
    }
    run_git(repo_path, &["checkout", "--quiet", "-b", branch_name])?;
    Ok(())
}

/// Delete the branch named `branch_name`, forcing the deletion when `force` is `true`.
pub fn delete_branch(repo_path: &Path, branch_name: &str, force: bool) -> Result<()> {
    let mut args = vec!["branch"];
    if force {
        args.push("-D");
    } else {
        args.push("-d");
    }
    args.push(branch_name);

    run_git(repo_path, &args)?;
    Ok(())
}

/// Stage all tracked and untracked changes in the repository, including deletions.
pub fn add_all(repo_path: &Path) -> Result<()> {
    run_git(repo_path, &["add", "-A"])?;
    Ok(())
}

/// Create a commit with the provided `message`, bypassing hooks and signing.
pub fn commit(repo_path: &Path, message: &str) -> Result<()> {
    run_git(
        repo_path,
        &[
            "-c",
            "commit.gpgsign=false",
            "commit",
            "--quiet",
            "--no-verify",
            "-m",
            message,
        ],
    )?;
    Ok(())
}

/// Push `branch_name` to the same name on `remote`.
pub fn push_branch(repo_path: &Path, remote: &str, branch_name: &str) -> Result<()> {
    let refspec = format!("refs/heads/{branch_name}:refs/heads/{branch_name}");
    run_git(repo_path, &["push", "--quiet", remote, &refspec])?;
    Ok(())
}

/// Delete `branch_name` from `remote`.
pub fn delete_remote_branch(repo_path: &Path, remote: &str, branch_name: &str) -> Result<()> {
    run_git(repo_path, &["push", "--quiet", remote, "--delete", branch_name])?;
    Ok(())
}

/// Stash tracked modifications and untracked files.
///
/// Returns the hash of the new stash entry, or `None` when there was nothing to stash.
pub fn stash_push(repo_path: &Path, message: &str) -> Result<Option<String>> {
    let before = rev_parse(repo_path, "refs/stash")?;
    run_git(
        repo_path,
        &["stash", "push", "--quiet", "--include-untracked", "-m", message],
    )?;
    let after = rev_parse(repo_path, "refs/stash")?;
    Ok(if after != before { after } else { None })
}

/// Apply a stash entry identified by hash without dropping it.
pub fn stash_apply(repo_path: &Path, stash: &str) -> Result<()> {
    run_git(repo_path, &["stash", "apply", "--quiet", stash])?;
    Ok(())
}

/// Pop the stash entry identified by hash, restoring the index as well when `index` is set.
pub fn stash_pop(repo_path: &Path, stash: &str, index: bool) -> Result<()> {
    let output = run_git(repo_path, &["stash", "list", "--format=%H"])?;
    let entries = String::from_utf8_lossy(&output.stdout);
    let position = entries
        .lines()
        .position(|hash| hash.trim() == stash)
        .with_context(|| format!("Stash entry {stash} not found"))?;

    let entry = format!("stash@{{{position}}}");
    let mut args = vec!["stash", "pop", "--quiet"];
    if index {
        args.push("--index");
    }
    args.push(&entry);
    run_git(repo_path, &args)?;
    Ok(())
}

/// Reset the working directory to match `HEAD`, removing all uncommitted changes.
pub fn reset_hard(repo_path: &Path) -> Result<()> {
    run_git(repo_path, &["reset", "--hard", "--quiet", "HEAD"])?;
    Ok(())
}

/// Remove untracked files and directories from the working tree.
pub fn clean(repo_path: &Path) -> Result<()> {
    run_git(repo_path, &["clean", "-fdq"])?;
    Ok(())
}
