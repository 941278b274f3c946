use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use cover_runner::bootstrap::Bootstrapper;
use cover_runner::config::{self, ApiKeySource, ConfigSources, Settings, SettingsFile, SETTING_KEYS};
use cover_runner::error::ConfigError;
use cover_runner::host::{ConsoleNotifier, ConsoleProgress, ConsoleSink, ProgressReporter};
use cover_runner::keyring;
use cover_runner::orchestrator::{Host, Orchestrator, RunReport, RunRequest, TOOL_API_KEY_ENV};
use cover_runner::supervisor::{CommandSpec, Outcome};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Exit status when the run was cancelled with Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "cover-runner",
    about = "Generate unit tests for a source file with cover-agent",
    version
)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate tests for FILE
    Run(RunArgs),
    /// Install cover-agent into its private environment
    Setup {
        /// Remove any existing environment first
        #[arg(long)]
        force: bool,
        /// Workspace whose settings apply (defaults to the current directory)
        #[arg(long)]
        workspace: Option<PathBuf>,
    },
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Store the provider API key in the system keychain
    SetKey { key: String },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Source file to generate tests for
    file: PathBuf,
    /// Workspace root (defaults to the current directory)
    #[arg(long)]
    workspace: Option<PathBuf>,
    /// Print the resolved command without installing or running anything
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective settings
    Show {
        #[arg(long)]
        workspace: Option<PathBuf>,
    },
    /// Set KEY to VALUE in the user settings, or the workspace settings with --workspace
    Set {
        key: String,
        value: String,
        #[arg(long)]
        workspace: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "cover_runner=debug" } else { "cover_runner=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match dispatch(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("  Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Run(args) => run(args).await,
        Commands::Setup { force, workspace } => setup(force, workspace).await,
        Commands::Config { action } => match action {
            ConfigAction::Show { workspace } => config_show(workspace.as_deref()),
            ConfigAction::Set {
                key,
                value,
                workspace,
            } => config_set(&key, &value, workspace.as_deref()),
        },
        Commands::SetKey { key } => {
            keyring::set_api_key(key.trim()).map_err(|e| anyhow!("Failed to store API key: {}", e))?;
            eprintln!("  + API key saved to the system keychain");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn console_host() -> Host {
    Host {
        sink: Arc::new(ConsoleSink),
        progress: Arc::new(ConsoleProgress),
        notifier: Arc::new(ConsoleNotifier),
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let workspace = match args.workspace {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to read the current directory")?,
    };
    let request = RunRequest {
        workspace_root: Some(workspace),
        active_file: Some(args.file),
    };
    let orchestrator = Orchestrator::new(console_host());

    if args.dry_run {
        let plan = orchestrator.plan(&request)?;
        let executable = orchestrator.bootstrapper(&plan.settings).executable();
        let spec = CommandSpec::new(executable, &plan.context.workspace_root)
            .args(plan.invocation.args());
        println!("cwd: {}", plan.context.workspace_root.display());
        for (name, value) in plan.invocation.env_overrides() {
            let shown = if name == TOOL_API_KEY_ENV { mask_key(&value) } else { value };
            println!("env: {}={}", name, shown);
        }
        println!("{}", spec.display_line());
        return Ok(ExitCode::SUCCESS);
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let code = match orchestrator.run(request, cancel).await {
        RunReport::Finished(Outcome::Success) => ExitCode::SUCCESS,
        RunReport::Finished(Outcome::Cancelled) => ExitCode::from(EXIT_CANCELLED),
        RunReport::Finished(Outcome::Failure(_)) | RunReport::Aborted(_) => ExitCode::FAILURE,
    };
    Ok(code)
}

async fn setup(force: bool, workspace: Option<PathBuf>) -> Result<ExitCode> {
    let workspace = match workspace {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to read the current directory")?,
    };
    let settings = Settings::load_without_credential(&ConfigSources::discover(Some(&workspace)))?;
    let bootstrapper = Bootstrapper::from_settings(&settings);

    let path = tokio::task::spawn_blocking(move || {
        let progress = ConsoleProgress;
        let progress: &dyn ProgressReporter = &progress;
        if force {
            bootstrapper.reinstall(progress)
        } else {
            bootstrapper.ensure_executable(progress)
        }
    })
    .await
    .context("setup task panicked")??;

    eprintln!("  + cover-agent ready at {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn config_show(workspace: Option<&Path>) -> Result<ExitCode> {
    let sources = ConfigSources::discover(workspace);
    for (label, path) in [
        ("user settings", &sources.user_file),
        ("workspace settings", &sources.workspace_file),
    ] {
        if let Some(path) = path {
            let marker = if path.is_file() { "" } else { " (not present)" };
            println!("# {}: {}{}", label, path.display(), marker);
        }
    }

    let mut merged = sources.merged()?;
    merged.api_key = merged.api_key.as_deref().map(mask_key);
    println!("{}", serde_json::to_string_pretty(&merged)?);

    match Settings::load(&sources) {
        Ok((settings, source)) => {
            let origin = match source {
                ApiKeySource::Settings => "apiKey setting".to_string(),
                ApiKeySource::Keychain => "system keychain".to_string(),
                ApiKeySource::Env(name) => format!("${}", name),
            };
            println!("# API key: {} (from {})", mask_key(&settings.api_key), origin);
            println!("# install root: {}", settings.install_root.display());
        }
        Err(err) => println!("# {}", err),
    }
    Ok(ExitCode::SUCCESS)
}

fn config_set(key: &str, value: &str, workspace: Option<&Path>) -> Result<ExitCode> {
    if !SETTING_KEYS.contains(&key) {
        return Err(anyhow!(
            "Unknown setting `{}`. Valid keys: {}",
            key,
            SETTING_KEYS.join(", ")
        ));
    }
    let path = match workspace {
        Some(root) => config::workspace_settings_path(root),
        None => config::user_settings_path().ok_or(ConfigError::NoConfigDir)?,
    };

    let mut file = SettingsFile::read(&path)?;
    file.set(key, value)?;
    file.validate()?;
    file.write(&path)?;

    eprintln!("  + {} saved to {}", key, path.display());
    Ok(ExitCode::SUCCESS)
}

/// `sk-a…wxyz` style display of a secret.
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}
