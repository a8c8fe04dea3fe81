use anyhow::{Result, bail};
use libtorque::{
    BlueprintSummary, BranchRequest, RemoteService, TorqueError, with_branch_context,
};
use tracing::debug;

use super::{CommandEnv, Source, remote_error};
use crate::ui::{emit, print_json, render_validation_errors};

/// Run the `torque bp validate` command logic.
pub fn validate(
    env: &CommandEnv,
    remote: &dyn RemoteService,
    name: &str,
    request: &BranchRequest,
) -> Result<()> {
    let source = Source::resolve(env, request, name)?;

    let report = match &source {
        Source::Remote { branch } => remote
            .validate_blueprint(name, branch, request.commit.as_deref())
            .map_err(remote_error)?,
        Source::Local { vcs, .. } | Source::Explicit { vcs } => {
            with_branch_context(vcs, request, |context| {
                debug!(branch = context.validation_branch(), "validating blueprint {name}");
                remote
                    .validate_blueprint(name, context.validation_branch(), context.commit())
                    .map_err(remote_error)
            })?
        }
    };

    if env.json {
        print_json(&report)?;
    }

    if report.is_valid() {
        emit(env.output.success("Blueprint is valid"))?;
        return Ok(());
    }

    render_validation_errors(env.output.as_ref(), &report)?;
    bail!(
        "Blueprint {name} is invalid ({} error(s))",
        report.errors.len()
    );
}

/// Run the `torque bp list` command logic.
///
/// `detail` fetches the full data of every blueprint and always prints it as JSON.
pub fn list(env: &CommandEnv, remote: &dyn RemoteService, detail: bool) -> Result<()> {
    let blueprints = remote.list_blueprints().map_err(remote_error)?;
    debug!(count = blueprints.len(), "listed blueprints");

    if detail {
        return print_json(&detailed(remote, &blueprints)?);
    }
    if env.json {
        return print_json(&blueprints);
    }

    if blueprints.is_empty() {
        emit(env.output.message("No blueprints found"))?;
        return Ok(());
    }
    for blueprint in &blueprints {
        let state = if blueprint.enabled { "enabled" } else { "disabled" };
        let value = match blueprint.description.as_deref() {
            Some(description) if !description.is_empty() => format!("{state}, {description}"),
            _ => state.to_string(),
        };
        emit(env.output.item(&blueprint.name, &value))?;
    }
    Ok(())
}

/// Full service data for each listed blueprint, in listing order.
fn detailed(
    remote: &dyn RemoteService,
    blueprints: &[BlueprintSummary],
) -> Result<Vec<serde_json::Value>, TorqueError> {
    blueprints
        .iter()
        .map(|blueprint| remote.blueprint_detail(&blueprint.name))
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(remote_error)
}
