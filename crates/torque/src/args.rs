use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use libtorque::{DEFAULT_REMOTE, SandboxFilter};

/// Minutes a sandbox lives when no duration is given.
pub const DEFAULT_DURATION_MINUTES: u64 = 120;

/// Sandboxes fetched by `torque sb list` when no count is given.
pub const DEFAULT_LIST_COUNT: u32 = 25;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("color_mode")
        .args(["color", "no_color"])
))]
/// Top-level CLI options for torque.
pub struct Cli {
    /// Profile to read from the config file
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,

    /// Space the blueprints live in
    #[arg(long, global = true, value_name = "SPACE")]
    pub space: Option<String>,

    /// Access token for the Torque service
    #[arg(long, global = true, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Torque service host name
    #[arg(long, global = true, value_name = "HOST")]
    pub host: Option<String>,

    /// Override the config file location
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<String>,

    /// Override the repository directory (defaults to the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub repo_dir: Option<String>,

    /// Git remote temporary branches are pushed to
    #[arg(long, global = true, value_name = "REMOTE", default_value = DEFAULT_REMOTE)]
    pub remote: String,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Log debug details to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    /// Enable colored output
    #[arg(long, global = true)]
    pub color: bool,

    /// Disable colored output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Suppress all output
    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    /// The primary command to execute.
    pub command: Commands,
}

/// Formats results can be printed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Machine-readable JSON on stdout.
    Json,
}

#[derive(Subcommand)]
/// CLI subcommands supported by torque.
pub enum Commands {
    /// Work with blueprints
    #[command(name = "bp", alias = "blueprint")]
    Blueprint {
        #[command(subcommand)]
        /// Blueprint operation.
        command: BlueprintCommand,
    },

    /// Work with sandboxes
    #[command(name = "sb", alias = "sandbox")]
    Sandbox {
        #[command(subcommand)]
        /// Sandbox operation.
        command: SandboxCommand,
    },
}

#[derive(Subcommand)]
/// Blueprint operations.
pub enum BlueprintCommand {
    /// List the blueprints of the space
    List {
        /// Print the full data of every blueprint as JSON
        #[arg(short, long)]
        detail: bool,
    },

    /// Validate a blueprint as found in the working tree or on a remote branch
    Validate {
        /// Name of the blueprint
        name: String,

        /// Validate the blueprint version on this remote branch instead of local changes
        #[arg(short, long)]
        branch: Option<String>,

        /// Validate a historic commit of the branch (requires --branch)
        #[arg(short, long)]
        commit: Option<String>,
    },
}

#[derive(Subcommand)]
/// Sandbox operations.
pub enum SandboxCommand {
    /// Launch a sandbox from a blueprint
    Start(StartArgs),

    /// List sandboxes in the space
    List(ListArgs),

    /// Show a sandbox and its launch progress
    Get {
        /// Sandbox identifier
        sandbox_id: String,

        /// Print the full sandbox data as JSON
        #[arg(short, long)]
        detail: bool,
    },

    /// Show the status of a sandbox
    Status {
        /// Sandbox identifier
        sandbox_id: String,
    },

    /// End a sandbox
    End {
        /// Sandbox identifier
        sandbox_id: String,
    },
}

/// Parameters for `torque sb start`.
#[derive(Args)]
pub struct StartArgs {
    /// Name of the blueprint
    pub blueprint: String,

    /// Sandbox name (generated from the branch and current time if omitted)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Minutes until the sandbox is automatically ended
    #[arg(short, long, value_name = "MINUTES", default_value_t = DEFAULT_DURATION_MINUTES)]
    pub duration: u64,

    /// Blueprint inputs as comma-separated key=value pairs
    #[arg(short, long, value_name = "INPUTS")]
    pub inputs: Option<String>,

    /// Artifact paths per application as comma-separated key=value pairs
    #[arg(short, long, value_name = "ARTIFACTS")]
    pub artifacts: Option<String>,

    /// Run the blueprint version on this remote branch instead of local changes
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Run a historic commit of the branch (requires --branch)
    #[arg(short, long)]
    pub commit: Option<String>,

    /// Minutes to wait before giving control back (default 30)
    #[arg(short, long, value_name = "MINUTES")]
    pub timeout: Option<u64>,

    /// Wait until the sandbox is active, not only until local changes are released
    #[arg(short, long = "wait-active")]
    pub wait_active: bool,
}

/// Which sandboxes `torque sb list` shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListFilter {
    /// Every sandbox in the space
    All,
    /// Sandboxes you launched
    My,
    /// Sandboxes launched by automation
    Auto,
}

impl From<ListFilter> for SandboxFilter {
    fn from(value: ListFilter) -> Self {
        match value {
            ListFilter::All => Self::All,
            ListFilter::My => Self::My,
            ListFilter::Auto => Self::Auto,
        }
    }
}

/// Parameters for `torque sb list`.
#[derive(Args)]
pub struct ListArgs {
    /// Which sandboxes to list
    #[arg(short, long, value_enum, default_value_t = ListFilter::My)]
    pub filter: ListFilter,

    /// Include sandboxes that have already ended
    #[arg(long)]
    pub show_ended: bool,

    /// Maximum number of sandboxes to fetch
    #[arg(long, value_name = "N", default_value_t = DEFAULT_LIST_COUNT)]
    pub count: u32,
}
