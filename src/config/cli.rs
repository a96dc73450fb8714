use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the folio binary.
#[derive(Debug, Parser)]
#[command(name = "folio", version, about = "Portfolio content store")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "FOLIO_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

/// Settings that may be overridden on any subcommand.
#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Content backend to use (github|local|memory).
    #[arg(long = "backend", value_name = "BACKEND", global = true)]
    pub backend: Option<String>,

    /// Bearer token for the content host.
    #[arg(
        long = "github-token",
        env = "GITHUB_TOKEN",
        value_name = "TOKEN",
        hide_env_values = true,
        global = true
    )]
    pub github_token: Option<String>,

    /// Repository owner on the content host.
    #[arg(long = "github-owner", value_name = "OWNER", global = true)]
    pub github_owner: Option<String>,

    /// Repository name on the content host.
    #[arg(long = "github-repo", value_name = "REPO", global = true)]
    pub github_repo: Option<String>,

    /// Branch to read from and commit to.
    #[arg(long = "github-branch", value_name = "BRANCH", global = true)]
    pub github_branch: Option<String>,

    /// Root directory for the local backend.
    #[arg(
        long = "local-root",
        value_name = "PATH",
        value_hint = ValueHint::DirPath,
        global = true
    )]
    pub local_root: Option<PathBuf>,

    /// Deploy hook URL.
    #[arg(long = "deploy-hook-url", value_name = "URL", global = true)]
    pub deploy_hook_url: Option<String>,

    /// Maximum write attempts per operation.
    #[arg(long = "retry-max-attempts", value_name = "COUNT", global = true)]
    pub retry_max_attempts: Option<u32>,

    /// Delay between write attempts.
    #[arg(long = "retry-delay-ms", value_name = "MILLIS", global = true)]
    pub retry_delay_ms: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print a document with its version token.
    Get(GetArgs),
    /// Replace a document with the contents of a JSON file.
    Write(WriteArgs),
    /// Project collection operations.
    #[command(subcommand)]
    Projects(ProjectsCommand),
    /// Trigger a site rebuild.
    Deploy(DeployArgs),
    /// Check the connection to the content host.
    Check,
    /// Toggle the liked state of a project for this client.
    Like(LikeArgs),
}

#[derive(Debug, Args, Clone)]
pub struct GetArgs {
    /// Document key, e.g. `projects` or `about`.
    #[arg(value_name = "KEY")]
    pub key: String,
}

#[derive(Debug, Args, Clone)]
pub struct WriteArgs {
    /// Document key to replace.
    #[arg(value_name = "KEY")]
    pub key: String,

    /// JSON file holding the new document.
    #[arg(long = "file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Commit message; defaults to `Update {key}`.
    #[arg(long = "message", short = 'm', value_name = "MESSAGE")]
    pub message: Option<String>,

    /// Trigger a site rebuild once the document is committed.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub deploy: bool,
}

#[derive(Debug, Args, Clone)]
pub struct DeployArgs {
    /// Retry after a failed deploy instead of starting a new one.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub retry: bool,
}

#[derive(Debug, Args, Clone)]
pub struct LikeArgs {
    #[arg(value_name = "PROJECT_ID")]
    pub project_id: String,

    /// Like count to start from when nothing is stored yet.
    #[arg(long = "initial", default_value_t = 0)]
    pub initial: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    Published,
    Draft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BulkActionArg {
    Publish,
    Draft,
    Delete,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ProjectsCommand {
    /// List projects in display order.
    List {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
    /// Add a project.
    Create(CreateProjectArgs),
    /// Change fields of a project.
    Update {
        #[arg(value_name = "ID")]
        id: String,
        /// `field=value` pairs; values are parsed as JSON when possible.
        #[arg(long = "set", value_name = "FIELD=VALUE", required = true)]
        set: Vec<String>,
    },
    /// Remove a project.
    Delete {
        #[arg(value_name = "ID")]
        id: String,
    },
    /// Publish or unpublish a project.
    Status {
        #[arg(value_name = "ID")]
        id: String,
        #[arg(value_enum, value_name = "STATUS")]
        status: StatusArg,
    },
    /// Apply one action to several projects in a single commit.
    Bulk {
        #[arg(value_enum, value_name = "ACTION")]
        action: BulkActionArg,
        #[arg(value_name = "ID", required = true, num_args = 1..)]
        ids: Vec<String>,
    },
    /// Replace the featured gallery selection.
    Feature {
        #[arg(value_name = "ID", num_args = 0..)]
        ids: Vec<String>,
    },
}

#[derive(Debug, Args, Clone)]
pub struct CreateProjectArgs {
    #[arg(long, value_name = "TITLE")]
    pub title: String,

    #[arg(long, value_name = "YEAR")]
    pub year: i32,

    #[arg(long, value_enum)]
    pub status: Option<StatusArg>,

    /// Additional `field=value` pairs; values are parsed as JSON when possible.
    #[arg(long = "set", value_name = "FIELD=VALUE")]
    pub set: Vec<String>,
}
