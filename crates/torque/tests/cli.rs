// Integration tests are compiled as a separate crate, so these lints don't apply
#![allow(clippy::tests_outside_test_module)]
#![allow(missing_docs)]

use std::{
    fs,
    path::Path,
    process::{Command, Output},
};

use tempfile::TempDir;

fn torque_binary() -> &'static str {
    env!("CARGO_BIN_EXE_torque")
}

/// Run torque in `dir` with an isolated home directory and no settings in the environment.
fn run_torque(dir: &Path, home: &Path, args: &[&str]) -> Output {
    Command::new(torque_binary())
        .current_dir(dir)
        .env("HOME", home)
        .env_remove("TORQUE_TOKEN")
        .env_remove("TORQUE_SPACE")
        .env_remove("TORQUE_HOSTNAME")
        .env_remove("TORQUE_PROFILE")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("failed to run torque")
}

fn git(repo_path: &Path, args: &[&str]) {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(args)
        .output()
        .expect("failed to run git");

    if !output.status.success() {
        panic!(
            "git {:?} failed: stdout={} stderr={}",
            args,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }
}

fn stderr_and_stdout(output: &Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[test]
fn test_commit_without_branch_is_rejected_before_touching_the_repo() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "-b", "main"]);
    fs::write(repo.join("dirty.txt"), "local edit\n").unwrap();

    let output = run_torque(&repo, temp.path(), &["sb", "start", "web", "-c", "abc123"]);

    assert_eq!(output.status.code(), Some(2), "{}", stderr_and_stdout(&output));
    assert!(stderr_and_stdout(&output).contains("commit"));
    assert!(!repo.join(".git").join("torque-branch-context.lock").exists());

    let branches = Command::new("git")
        .current_dir(&repo)
        .args(["branch", "--list"])
        .output()
        .unwrap();
    assert!(!String::from_utf8_lossy(&branches.stdout).contains("tmp-torque-"));
}

#[test]
fn test_validate_rejects_commit_without_branch() {
    let temp = TempDir::new().unwrap();
    let output = run_torque(temp.path(), temp.path(), &["bp", "validate", "web", "--commit", "abc"]);
    assert_eq!(output.status.code(), Some(2), "{}", stderr_and_stdout(&output));
}

#[test]
fn test_missing_credentials_are_a_config_error() {
    let temp = TempDir::new().unwrap();
    let output = run_torque(temp.path(), temp.path(), &["sb", "status", "sb-1"]);
    assert_eq!(output.status.code(), Some(2), "{}", stderr_and_stdout(&output));
}

#[test]
fn test_explicit_config_file_must_exist() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("missing.toml");
    let output = run_torque(
        temp.path(),
        temp.path(),
        &["--config", missing.to_str().unwrap(), "sb", "end", "sb-1"],
    );
    assert_eq!(output.status.code(), Some(2), "{}", stderr_and_stdout(&output));
}

#[test]
fn test_start_outside_blueprint_repo_fails_before_any_request() {
    let temp = TempDir::new().unwrap();
    let output = run_torque(
        temp.path(),
        temp.path(),
        &["--token", "t0k3n", "--space", "demo", "sb", "start", "web"],
    );
    assert_eq!(output.status.code(), Some(3), "{}", stderr_and_stdout(&output));
    assert!(stderr_and_stdout(&output).contains("not a git folder"));
}

#[test]
fn test_color_flags_conflict() {
    let temp = TempDir::new().unwrap();
    let output = run_torque(
        temp.path(),
        temp.path(),
        &["--color", "--no-color", "sb", "status", "sb-1"],
    );
    assert!(!output.status.success());
}

#[test]
fn test_listing_rejects_unknown_filter() {
    let temp = TempDir::new().unwrap();
    let output = run_torque(temp.path(), temp.path(), &["sb", "list", "--filter", "mine"]);
    assert!(!output.status.success());
    assert!(stderr_and_stdout(&output).contains("mine"));

    let output = run_torque(temp.path(), temp.path(), &["bp", "list"]);
    assert_eq!(output.status.code(), Some(2), "{}", stderr_and_stdout(&output));
}
