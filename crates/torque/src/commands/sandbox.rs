use anyhow::Result;
use chrono::Local;
use libtorque::{
    BranchContext, BranchRequest, Clock, DEFAULT_TIMEOUT_MINUTES, PollOutcome, RemoteService,
    Sandbox, SandboxRequest, SandboxStatus, TorqueError, Waiter, apply_synced_defaults,
    visible_sandboxes, with_branch_context,
};
use serde::Serialize;
use tracing::debug;

use super::{CommandEnv, Source, remote_error};
use crate::{
    args::{ListArgs, StartArgs},
    ui::{SpinnerProgress, emit, print_json},
    utils::{generate_sandbox_name, parse_key_values},
};

/// Summary of `torque sb start` for JSON output.
#[derive(Debug, Serialize)]
struct StartReport {
    /// Sandbox identifier.
    id: String,
    /// Browser link.
    url: String,
    /// Branch the remote built from.
    branch: String,
    /// Last status seen while waiting, if the command waited.
    status: Option<String>,
    /// Seconds spent waiting.
    elapsed_seconds: Option<u64>,
    /// The wait ended on the timeout.
    timed_out: bool,
}

/// Run the `torque sb start` command logic.
pub fn start(
    env: &CommandEnv,
    remote: &dyn RemoteService,
    clock: &dyn Clock,
    args: &StartArgs,
) -> Result<()> {
    let request = BranchRequest::new(args.branch.clone(), args.commit.clone());
    request.validate()?;

    let mut template = SandboxRequest {
        blueprint: args.blueprint.clone(),
        duration_minutes: args.duration,
        inputs: parse_key_values(args.inputs.as_deref())?,
        artifacts: parse_key_values(args.artifacts.as_deref())?,
        ..SandboxRequest::default()
    };

    let source = Source::resolve(env, &request, &args.blueprint)?;
    if let Source::Local { vcs, repo } = &source {
        apply_synced_defaults(
            vcs,
            repo,
            &args.blueprint,
            &mut template.artifacts,
            &mut template.inputs,
        );
    }

    let launcher = Launcher {
        env,
        remote,
        clock,
        args,
        template,
    };
    match &source {
        Source::Remote { branch } => {
            launcher.run(branch, branch, request.commit.as_deref(), None)
        }
        Source::Local { vcs, .. } | Source::Explicit { vcs } => {
            with_branch_context(vcs, &request, |context| {
                let working = context.working_branch().to_string();
                let validation = context.validation_branch().to_string();
                let commit = context.commit().map(str::to_string);
                launcher.run(&working, &validation, commit.as_deref(), Some(context))
            })
        }
    }
}

/// Starts one sandbox and waits on it.
struct Launcher<'a> {
    /// Command environment.
    env: &'a CommandEnv,
    /// Service the sandbox is started on.
    remote: &'a dyn RemoteService,
    /// Time source for the wait loop.
    clock: &'a dyn Clock,
    /// Parsed command arguments.
    args: &'a StartArgs,
    /// Blueprint, duration, inputs and artifacts of the request.
    template: SandboxRequest,
}

impl Launcher<'_> {
    /// Start the sandbox from `branch`, then wait as requested.
    ///
    /// `working_branch` names the sandbox when no name was given.
    fn run(
        &self,
        working_branch: &str,
        branch: &str,
        commit: Option<&str>,
        context: Option<&mut BranchContext<'_>>,
    ) -> Result<()> {
        let name = self.args.name.clone().unwrap_or_else(|| {
            generate_sandbox_name(&self.args.blueprint, working_branch, Local::now())
        });
        let request = SandboxRequest {
            name,
            branch: branch.to_string(),
            commit: commit.map(str::to_string),
            ..self.template.clone()
        };
        debug!(branch, blueprint = %request.blueprint, "starting sandbox {}", request.name);

        let id = self.remote.start_sandbox(&request).map_err(remote_error)?;
        let url = self.remote.sandbox_ui_link(&id);
        let output = &self.env.output;
        emit(output.success("Sandbox is starting"))?;
        emit(output.item("Id", &id))?;
        emit(output.item("URL", &url))?;

        let outcome = self.wait(&id, context)?;

        if self.env.json {
            print_json(&StartReport {
                id: id.clone(),
                url,
                branch: branch.to_string(),
                status: outcome.as_ref().map(|o| o.status.to_string()),
                elapsed_seconds: outcome.as_ref().map(|o| o.elapsed_seconds),
                timed_out: outcome.as_ref().is_some_and(|o| o.timed_out),
            })?;
        }

        let Some(outcome) = outcome else {
            return Ok(());
        };
        if outcome.timed_out {
            return Err(TorqueError::Timeout {
                sandbox_id: id,
                minutes: self.timeout_minutes(),
            }
            .into());
        }
        match &outcome.status {
            SandboxStatus::Active => emit(output.success("Sandbox is active"))?,
            status if status.is_terminal() => {
                emit(output.warn(&format!("Sandbox finished launching with status: {status}")))?;
            }
            _ => emit(output.message(
                "Local changes are no longer needed, the sandbox keeps launching remotely",
            ))?,
        }
        Ok(())
    }

    /// Wait on sandbox `id` when blocking was requested or a temporary branch is in play.
    fn wait(
        &self,
        id: &str,
        context: Option<&mut BranchContext<'_>>,
    ) -> Result<Option<PollOutcome>> {
        let temp_branch = context.as_ref().is_some_and(|c| c.temp_branch_exists());
        if !self.args.wait_active && !temp_branch {
            return Ok(None);
        }

        let message = if temp_branch {
            "Waiting for the sandbox to start with local changes. This may take some time."
        } else {
            "Waiting for the sandbox to start. This may take some time."
        };
        emit(self.env.output.message(message))?;
        let spinner = self.env.output.spinner("Waiting for the sandbox to start");
        let progress = SpinnerProgress::new(spinner);
        let waiter = Waiter::new(self.remote, self.clock, &progress);

        let waited = match context {
            Some(context) => {
                waiter.wait_for_completion(id, self.args.timeout, context, self.args.wait_active)
            }
            None => waiter.wait_until_active(id, self.args.timeout).map(Some),
        };
        match &waited {
            Ok(Some(outcome)) if outcome.timed_out => progress.fail("Timeout reached"),
            Err(_) => progress.fail("Unable to follow the sandbox launch"),
            _ => {}
        }
        Ok(waited?)
    }

    /// Timeout in minutes applied to the wait.
    fn timeout_minutes(&self) -> u64 {
        self.args.timeout.unwrap_or(DEFAULT_TIMEOUT_MINUTES)
    }
}

/// Run the `torque sb status` command logic.
pub fn status(env: &CommandEnv, remote: &dyn RemoteService, sandbox_id: &str) -> Result<()> {
    let sandbox = remote.sandbox(sandbox_id).map_err(remote_error)?;
    if env.json {
        return print_json(&sandbox);
    }
    emit(env.output.item("Id", &sandbox.id))?;
    if !sandbox.name.is_empty() {
        emit(env.output.item("Name", &sandbox.name))?;
    }
    emit(env.output.item("Status", sandbox.status.as_str()))?;
    emit(env.output.item("URL", &remote.sandbox_ui_link(&sandbox.id)))?;
    Ok(())
}

/// Run the `torque sb list` command logic.
pub fn list(env: &CommandEnv, remote: &dyn RemoteService, args: &ListArgs) -> Result<()> {
    let sandboxes = listed_sandboxes(remote, args)?;
    if env.json {
        return print_json(&sandboxes);
    }

    if sandboxes.is_empty() {
        emit(env.output.message("No sandboxes found"))?;
        return Ok(());
    }
    for sandbox in &sandboxes {
        emit(env.output.item(
            &sandbox.id,
            &format!("{} [{}]", sandbox.name, sandbox.status),
        ))?;
    }
    Ok(())
}

/// Sandboxes matching `args`, without ended ones unless asked for.
fn listed_sandboxes(remote: &dyn RemoteService, args: &ListArgs) -> Result<Vec<Sandbox>> {
    let listed = remote
        .list_sandboxes(args.filter.into(), args.count)
        .map_err(remote_error)?;
    debug!(count = listed.len(), show_ended = args.show_ended, "listed sandboxes");
    Ok(visible_sandboxes(listed, args.show_ended))
}

/// Run the `torque sb get` command logic.
///
/// `detail` prints the full service data as JSON.
pub fn get(
    env: &CommandEnv,
    remote: &dyn RemoteService,
    sandbox_id: &str,
    detail: bool,
) -> Result<()> {
    if detail {
        let data = remote.sandbox_detail(sandbox_id).map_err(remote_error)?;
        return print_json(&data);
    }

    let sandbox = remote.sandbox(sandbox_id).map_err(remote_error)?;
    if env.json {
        return print_json(&sandbox);
    }
    emit(env.output.item("Id", &sandbox.id))?;
    emit(env.output.item("Name", &sandbox.name))?;
    emit(env.output.item("Status", sandbox.status.as_str()))?;

    let progress = &sandbox.launching_progress;
    let steps = env.output.section("Launch progress:");
    for (label, step) in [
        ("Infrastructure", &progress.creating_infrastructure),
        ("Artifacts", &progress.preparing_artifacts),
        ("Applications", &progress.deploying_applications),
    ] {
        emit(steps.item(label, step.status.as_deref().unwrap_or("-")))?;
    }
    emit(env.output.item("URL", &remote.sandbox_ui_link(&sandbox.id)))?;
    Ok(())
}

/// Run the `torque sb end` command logic.
pub fn end(env: &CommandEnv, remote: &dyn RemoteService, sandbox_id: &str) -> Result<()> {
    remote.end_sandbox(sandbox_id).map_err(remote_error)?;
    if env.json {
        return print_json(&serde_json::json!({ "id": sandbox_id, "ended": true }));
    }
    emit(env.output.success("End request has been sent"))?;
    Ok(())
}
