//! podlift - Entry Point
//!
//! Builds a service, ships it to a remote host as a rootless container and
//! rolls it back when the new version does not come up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::error;

use podlift::app::context::ExecContext;
use podlift::config::init::write_starter_config;
use podlift::config::{load_config, ResolvedEnv, CONFIG_FILE};
use podlift::deploy::database::{DbPull, DbPush};
use podlift::deploy::local::{LocalRunner, SystemRunner};
use podlift::deploy::ops::{self, RightsTarget, ServiceAction};
use podlift::deploy::release::{release_version, run_current};
use podlift::deploy::{execute, PipelineRun};
use podlift::errors::DeployError;
use podlift::logs::{init_logging, LogLevel, LogOptions};
use podlift::remote::session::Channel;
use podlift::remote::{RemoteSession, SshExecutor};
use podlift::utils::version_info;

#[derive(Debug, Parser)]
#[command(name = "podlift", about = "Safe rootless-container deploys to a remote host")]
struct Cli {
    /// Print every remote change instead of making it
    #[arg(long, global = true)]
    dry_run: bool,

    /// Debug logging and live build output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Answer yes to every confirmation
    #[arg(short, long, global = true)]
    yes: bool,

    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write a starter deploy.yaml
    Init,

    /// Deploy the current checkout without tagging
    Run { env: String },

    /// Resolve a version tag and deploy it
    Release {
        env: String,

        #[arg(long)]
        version: Option<String>,
    },

    /// Print the compiled unit file
    Render { env: String },

    /// Database sync
    Db {
        #[command(subcommand)]
        action: DbCommand,
    },

    /// Control the service unit
    Service { action: ServiceAction, env: String },

    /// Follow service logs
    Logs {
        env: String,

        /// Read the container log instead of the journal
        #[arg(long)]
        podman: bool,
    },

    /// Remap ownership of the configured volumes
    Rights { env: String, target: RightsTarget },

    /// Remove dangling images and build cache
    Prune { env: String },

    /// Print version information
    Version,
}

impl Command {
    /// Environment the command targets
    fn env_name(&self) -> Option<&str> {
        match self {
            Command::Run { env }
            | Command::Release { env, .. }
            | Command::Render { env }
            | Command::Service { env, .. }
            | Command::Logs { env, .. }
            | Command::Rights { env, .. }
            | Command::Prune { env }
            | Command::Db {
                action: DbCommand::Pull { env } | DbCommand::Push { env },
            } => Some(env),
            Command::Init | Command::Version => None,
        }
    }
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Download a consistent snapshot of the remote database
    Pull { env: String },

    /// Replace the remote database (service must be stopped)
    Push { env: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", "error:".red().bold(), e);
            e.downcast_ref::<DeployError>().map(DeployError::exit_code).unwrap_or(1)
        }
    };
    std::process::exit(code);
}

fn start_logging(cli: &Cli, level: LogLevel) {
    let options = LogOptions {
        log_level: if cli.verbose { LogLevel::Debug } else { level },
        json_format: cli.log_format == LogFormat::Json,
    };
    if let Err(e) = init_logging(options) {
        eprintln!("Failed to initialize logging: {e}");
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match &cli.command {
        Command::Version => {
            println!("{}", serde_json::to_string_pretty(&version_info())?);
            return Ok(0);
        }
        Command::Init => {
            start_logging(&cli, LogLevel::Info);
            write_starter_config(&cli.config).await?;
            return Ok(0);
        }
        _ => {}
    }

    let config = load_config(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;
    start_logging(&cli, config.log_level);

    let project_dir = cli
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let ctx = ExecContext::new(cli.dry_run, cli.verbose, cli.yes);
    let runner: Arc<dyn LocalRunner> = Arc::new(SystemRunner);

    let Some(env_name) = cli.command.env_name() else {
        return Ok(0);
    };
    let env = config.resolve(env_name)?;

    if let Command::Render { .. } = &cli.command {
        print!("{}", ops::render(&env).text);
        return Ok(0);
    }

    let mut session = RemoteSession::new(Arc::new(SshExecutor::new()), env.target.clone(), ctx);
    let run = match cli.command {
        Command::Run { .. } => run_current(env, runner, &mut session, &project_dir).await,
        Command::Release { version, .. } => {
            release_version(env, runner, &mut session, &project_dir, version.as_deref()).await?
        }
        Command::Db { action } => db(action, &env, runner, &mut session, &project_dir).await?,
        Command::Service { action, .. } => {
            ops::service_action(&mut session, &env, action).await?;
            return Ok(0);
        }
        Command::Logs { podman, .. } => {
            ops::stream_logs(&mut session, &env, podman).await?;
            return Ok(0);
        }
        Command::Rights { target, .. } => {
            ops::change_rights(&mut session, &env, target).await?;
            return Ok(0);
        }
        Command::Prune { .. } => {
            ops::prune(&mut session).await?;
            return Ok(0);
        }
        Command::Render { .. } | Command::Init | Command::Version => return Ok(0),
    };

    report(&run);
    Ok(run.exit_code())
}

async fn db(
    action: DbCommand,
    env: &ResolvedEnv,
    runner: Arc<dyn LocalRunner>,
    session: &mut RemoteSession,
    project_dir: &Path,
) -> Result<PipelineRun, DeployError> {
    let run = match action {
        DbCommand::Pull { .. } => execute(&mut DbPull::new(env, runner, project_dir)?, session).await,
        DbCommand::Push { .. } => execute(&mut DbPush::new(env, runner, project_dir)?, session).await,
    };
    Ok(run)
}

fn report(run: &PipelineRun) {
    if run.dry_run {
        println!("{}", "Planned commands:".bold());
        for record in &run.commands {
            let marker = if record.executed { "ran " } else { "skip" };
            let channel = match record.channel {
                Channel::Local => "local",
                _ => "remote",
            };
            println!("  [{}] {:<6} {}: {}", marker, channel, record.label, record.text);
        }
    }
    eprintln!("{}", run.summary());
}
