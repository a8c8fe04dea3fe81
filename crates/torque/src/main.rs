#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Command-line interface for validating blueprints and launching sandboxes
//! from the local working tree via the libtorque crate.

use std::{
    env,
    io::{self, IsTerminal, Write},
    process,
    sync::Arc,
};

use anyhow::Result;
use clap::Parser;
use libtorque::{
    BranchRequest, Settings, SettingsOverrides, SystemClock, TorqueClient, TorqueError,
};
use torque_term::{Output, Quiet, Terminal};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line argument definitions.
mod args;
/// Command implementations.
mod commands;
/// Output helpers shared by commands.
mod ui;
/// Small parsing and naming helpers.
mod utils;

use args::{BlueprintCommand, Cli, Commands, OutputFormat, SandboxCommand};
use commands::{CommandEnv, blueprint, sandbox};
use utils::expand_tilde;

/// Install the stderr log subscriber. `RUST_LOG` wins over `--debug`.
fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let json = cli.output == OutputFormat::Json;

    // Determine color output preference early for error handling
    let color = if cli.color {
        true
    } else if cli.no_color {
        false
    } else {
        io::stdout().is_terminal()
    };

    // JSON results own stdout, so human-readable messages are dropped
    let output: Arc<dyn Output> = if cli.quiet || json {
        Arc::new(Quiet)
    } else {
        Arc::new(Terminal::new(color))
    };

    if let Err(e) = run(cli, &output) {
        if color && !json && io::stdout().is_terminal() {
            print!("\x1b[0m");
            if let Err(flush_err) = io::stdout().flush() {
                eprintln!("Failed to flush stdout while resetting colors: {flush_err}");
            }
        }

        let exit_code = e
            .downcast_ref::<TorqueError>()
            .map_or(1, TorqueError::exit_code);

        if json {
            eprintln!("{e:#}");
        } else if let Err(display_err) = output.fail(&format!("{e:#}")) {
            eprintln!("Failed to report error via output handler: {display_err:#}");
        }
        if let Err(finish_err) = output.finish() {
            eprintln!("Failed to flush output handler: {finish_err:#}");
        }

        process::exit(exit_code);
    }

    Ok(())
}

/// Connect to the remote service described by `overrides`, the environment and
/// the config file.
fn connect(overrides: &SettingsOverrides) -> Result<TorqueClient> {
    let settings = Settings::resolve(overrides)?;
    Ok(TorqueClient::new(&settings)?)
}

/// Dispatch the parsed command.
fn run(cli: Cli, output: &Arc<dyn Output>) -> Result<()> {
    let repo_dir = match &cli.repo_dir {
        Some(dir) => expand_tilde(dir),
        None => env::current_dir()?,
    };
    let overrides = SettingsOverrides {
        profile: cli.profile,
        token: cli.token,
        space: cli.space,
        host: cli.host,
        config_path: cli.config.as_deref().map(expand_tilde),
    };
    let env = CommandEnv {
        output: Arc::clone(output),
        repo_dir,
        remote: cli.remote,
        json: cli.output == OutputFormat::Json,
    };

    match cli.command {
        Commands::Blueprint { command } => match command {
            BlueprintCommand::Validate {
                name,
                branch,
                commit,
            } => {
                // Argument errors must surface before settings or the repository are touched
                let request = BranchRequest::new(branch, commit);
                request.validate()?;
                let client = connect(&overrides)?;
                blueprint::validate(&env, &client, &name, &request)
            }
            BlueprintCommand::List { detail } => {
                blueprint::list(&env, &connect(&overrides)?, detail)
            }
        },
        Commands::Sandbox { command } => match command {
            SandboxCommand::Start(args) => {
                BranchRequest::new(args.branch.clone(), args.commit.clone()).validate()?;
                let client = connect(&overrides)?;
                sandbox::start(&env, &client, &SystemClock::new(), &args)
            }
            SandboxCommand::List(args) => sandbox::list(&env, &connect(&overrides)?, &args),
            SandboxCommand::Get { sandbox_id, detail } => {
                sandbox::get(&env, &connect(&overrides)?, &sandbox_id, detail)
            }
            SandboxCommand::Status { sandbox_id } => {
                sandbox::status(&env, &connect(&overrides)?, &sandbox_id)
            }
            SandboxCommand::End { sandbox_id } => {
                sandbox::end(&env, &connect(&overrides)?, &sandbox_id)
            }
        },
    }
}
