#![forbid(unsafe_code)]

mod cmd;
mod output;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use output::{CliError, OutputMode, render_error};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "dg: operate a dimgraph content repository",
    long_about = None
)]
struct Cli {
    /// Directory holding the event log and projection databases.
    #[arg(long, global = true, env = "DIMGRAPH_DIR", default_value = ".dimgraph")]
    dir: PathBuf,

    /// Repository configuration file.
    #[arg(long, global = true, env = "DIMGRAPH_CONFIG", default_value = "dimgraph.toml")]
    config: PathBuf,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Derive the output mode from flags.
    const fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Text
        }
    }

    fn context(&self) -> cmd::Context {
        cmd::Context {
            dir: self.dir.clone(),
            config_path: self.config.clone(),
            output: self.output_mode(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Lifecycle",
        about = "Create the databases and catch up all projections",
        long_about = "Create the event log and projection databases if missing, register the \
                      projections and catch them up. Safe to run repeatedly.",
        after_help = concat!(
            "EXAMPLES:\n    # Set up a repository in ./.dimgraph\n    dg setup\n\n",
            "    # Use another directory and config\n",
            "    dg --dir /srv/content --config /etc/dimgraph.toml setup"
        )
    )]
    Setup,

    #[command(
        next_help_heading = "Projections",
        about = "Apply new events to every subscription",
        after_help = concat!(
            "EXAMPLES:\n    dg catch-up\n\n",
            "    # Emit machine-readable output\n    dg catch-up --json"
        )
    )]
    CatchUp,

    #[command(
        next_help_heading = "Projections",
        about = "Show subscription positions and errors",
        after_help = "EXAMPLES:\n    dg status\n    dg status --json"
    )]
    Status,

    #[command(
        next_help_heading = "Projections",
        about = "Rebuild one subscription from the first event",
        long_about = "Clear the read model of a subscription, rewind it to the beginning of the \
                      log and replay every event. Also clears an error state.",
        after_help = "EXAMPLES:\n    dg reset content_graph"
    )]
    Reset(cmd::subscriptions::ResetArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show the dimension space",
        after_help = concat!(
            "EXAMPLES:\n    # All dimensions and allowed points\n    dg dimensions\n\n",
            "    # Fallbacks of one point\n    dg dimensions --point language=de"
        )
    )]
    Dimensions(cmd::dimensions::DimensionsArgs),

    #[command(
        next_help_heading = "Read",
        about = "List workspaces",
        after_help = "EXAMPLES:\n    dg workspaces\n    dg workspaces --json"
    )]
    Workspaces,

    #[command(
        next_help_heading = "Workspaces",
        about = "Create, publish, discard, rebase or delete a workspace",
        after_help = concat!(
            "EXAMPLES:\n    dg workspace create-root live\n",
            "    dg workspace create user-ada --base live\n",
            "    dg workspace rebase user-ada --force\n",
            "    dg workspace publish user-ada"
        )
    )]
    Workspace {
        #[command(subcommand)]
        command: cmd::workspace::WorkspaceCommand,
    },

    #[command(
        next_help_heading = "Maintenance",
        about = "Check the content graph structure of a workspace",
        after_help = concat!(
            "EXAMPLES:\n    dg check\n\n",
            "    # Repair fixable problems in a workspace\n",
            "    dg check --workspace user-ada --apply"
        )
    )]
    Check(cmd::check::CheckArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Remove content streams no workspace uses",
        after_help = "EXAMPLES:\n    dg prune"
    )]
    Prune,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("DIMGRAPH_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "dimgraph=debug,info"
        } else {
            "dimgraph=info,warn"
        })
    });

    let format = env::var("DIMGRAPH_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    // Logs go to stderr so stdout stays parseable.
    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let ctx = cli.context();
    debug!(command = ?cli.command, dir = %ctx.dir.display(), "dispatching");
    match &cli.command {
        Commands::Setup => cmd::subscriptions::run_setup(&ctx),
        Commands::CatchUp => cmd::subscriptions::run_catch_up(&ctx),
        Commands::Status => cmd::subscriptions::run_status(&ctx),
        Commands::Reset(args) => cmd::subscriptions::run_reset(args, &ctx),
        Commands::Dimensions(args) => cmd::dimensions::run_dimensions(args, &ctx),
        Commands::Workspaces => cmd::workspace::run_list(&ctx),
        Commands::Workspace { command } => cmd::workspace::run_workspace(command, &ctx),
        Commands::Check(args) => cmd::check::run_check(args, &ctx),
        Commands::Prune => cmd::workspace::run_prune(&ctx),
    }
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let error = CliError::from_anyhow(&err);
            if render_error(cli.output_mode(), &error).is_err() {
                eprintln!("error[{}]: {}", error.code, error.message);
            }
            ExitCode::FAILURE
        }
    }
}
