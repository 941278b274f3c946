//! One user-triggered test-generation run
//!
//! Preconditions → settings → placeholder resolution → run lock → tool setup
//! → test directory → supervised run. Every failure along the way becomes a
//! notification and a [`RunReport::Aborted`]; nothing escapes to the host.

use crate::bootstrap::{Bootstrapper, SetupRunner};
use crate::config::{ConfigSources, Settings};
use crate::context::{confine_to_workspace, PathContext};
use crate::error::{BootstrapError, FilesystemError, PreconditionError, RunError};
use crate::host::{LogSink, Notifier, ProgressReporter, Severity};
use crate::lock::RunLock;
use crate::placeholder::{resolve, PlaceholderValues};
use crate::supervisor::{CommandSpec, FailureReason, Outcome, ProcessSupervisor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Environment variables the tool reads its provider credentials from.
pub const TOOL_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const TOOL_API_BASE_ENV: &str = "OPENAI_API_BASE";

/// What the host knows when the user triggers a run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub workspace_root: Option<PathBuf>,
    pub active_file: Option<PathBuf>,
}

/// Complete argument set for one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInvocation {
    pub source_file_path: String,
    pub test_file_path: String,
    pub test_command: String,
    pub model: String,
    pub base_url: String,
    pub code_coverage_report_path: String,
    pub coverage_type: String,
    pub desired_coverage: u8,
    pub max_iterations: u32,
    pub max_fix_attempts: u32,
    pub api_key: String,
}

impl ResolvedInvocation {
    pub fn resolve(settings: &Settings, ctx: &PathContext) -> Self {
        let path_values = PlaceholderValues::for_paths(ctx);
        let source_file_path = resolve(&settings.source_file_path, &path_values);
        let test_file_path = resolve(&settings.test_file_path, &path_values);
        let test_command = resolve(
            &settings.test_command,
            &PlaceholderValues::for_command(ctx, &test_file_path),
        );

        Self {
            source_file_path,
            test_file_path,
            test_command,
            model: settings.model.clone(),
            base_url: settings.base_url.clone(),
            code_coverage_report_path: settings.code_coverage_report_path.clone(),
            coverage_type: settings.coverage_type.clone(),
            desired_coverage: settings.desired_coverage,
            max_iterations: settings.max_iterations,
            max_fix_attempts: settings.max_fix_attempts,
            api_key: settings.api_key.clone(),
        }
    }

    pub fn args(&self) -> Vec<String> {
        vec![
            "--model".to_string(),
            self.model.clone(),
            "--source-file-path".to_string(),
            self.source_file_path.clone(),
            "--test-file-path".to_string(),
            self.test_file_path.clone(),
            "--code-coverage-report-path".to_string(),
            self.code_coverage_report_path.clone(),
            "--test-command".to_string(),
            self.test_command.clone(),
            "--coverage-type".to_string(),
            self.coverage_type.clone(),
            "--desired-coverage".to_string(),
            self.desired_coverage.to_string(),
            "--max-iterations".to_string(),
            self.max_iterations.to_string(),
            "--max-fix-attempts".to_string(),
            self.max_fix_attempts.to_string(),
        ]
    }

    pub fn env_overrides(&self) -> Vec<(String, String)> {
        vec![
            (TOOL_API_KEY_ENV.to_string(), self.api_key.clone()),
            (TOOL_API_BASE_ENV.to_string(), self.base_url.clone()),
        ]
    }
}

/// Everything decided before any side effect.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub context: PathContext,
    pub settings: Settings,
    pub invocation: ResolvedInvocation,
}

#[derive(Debug)]
pub enum RunReport {
    Finished(Outcome),
    Aborted(RunError),
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Host capabilities handed to the orchestrator.
#[derive(Clone)]
pub struct Host {
    pub sink: Arc<dyn LogSink>,
    pub progress: Arc<dyn ProgressReporter>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct Orchestrator {
    host: Host,
    user_settings: Option<PathBuf>,
    use_keyring: bool,
    env: EnvLookup,
    setup_runner: Option<Arc<dyn SetupRunner>>,
    supervisor: ProcessSupervisor,
}

impl Orchestrator {
    pub fn new(host: Host) -> Self {
        let defaults = ConfigSources::discover(None);
        Self {
            host,
            user_settings: defaults.user_file,
            use_keyring: defaults.use_keyring,
            env: Arc::new(|name: &str| std::env::var(name).ok()),
            setup_runner: None,
            supervisor: ProcessSupervisor::default(),
        }
    }

    /// Read user settings from `path` instead of the per-user config dir.
    pub fn with_user_settings(mut self, path: Option<PathBuf>) -> Self {
        self.user_settings = path;
        self
    }

    pub fn with_keyring(mut self, enabled: bool) -> Self {
        self.use_keyring = enabled;
        self
    }

    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(env);
        self
    }

    pub fn with_setup_runner(mut self, runner: Arc<dyn SetupRunner>) -> Self {
        self.setup_runner = Some(runner);
        self
    }

    pub fn with_supervisor(mut self, supervisor: ProcessSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    fn sources(&self, workspace_root: &Path) -> ConfigSources {
        ConfigSources {
            user_file: self.user_settings.clone(),
            workspace_file: Some(crate::config::workspace_settings_path(workspace_root)),
            use_keyring: self.use_keyring,
        }
    }

    pub fn bootstrapper(&self, settings: &Settings) -> Bootstrapper {
        let bootstrapper = Bootstrapper::from_settings(settings);
        match &self.setup_runner {
            Some(runner) => bootstrapper.with_runner(Arc::clone(runner)),
            None => bootstrapper,
        }
    }

    /// Check preconditions, load settings, and resolve templates.
    pub fn plan(&self, request: &RunRequest) -> Result<RunPlan, RunError> {
        let active_file = request
            .active_file
            .as_deref()
            .ok_or(PreconditionError::NoActiveFile)?;
        let workspace_root = request
            .workspace_root
            .as_deref()
            .ok_or(PreconditionError::NoWorkspace)?;

        let workspace_root = std::path::absolute(workspace_root)
            .map_err(|_| PreconditionError::WorkspaceMissing(workspace_root.to_path_buf()))?;
        if !workspace_root.is_dir() {
            return Err(PreconditionError::WorkspaceMissing(workspace_root).into());
        }
        let active_file = std::path::absolute(active_file)
            .map_err(|_| PreconditionError::ActiveFileMissing(active_file.to_path_buf()))?;
        if !active_file.is_file() {
            return Err(PreconditionError::ActiveFileMissing(active_file).into());
        }

        let context = PathContext::new(&workspace_root, &active_file)?;
        let (settings, key_source) =
            Settings::load_with_env(&self.sources(&workspace_root), |name| (self.env)(name))?;
        debug!(?key_source, "settings loaded");
        let invocation = ResolvedInvocation::resolve(&settings, &context);

        Ok(RunPlan {
            context,
            settings,
            invocation,
        })
    }

    /// Run the tool for the request and report the outcome to the notifier.
    pub async fn run(&self, request: RunRequest, cancel: CancellationToken) -> RunReport {
        let span = tracing::info_span!("run", run_id = %uuid::Uuid::new_v4());
        let report = self.run_inner(&request, &cancel).instrument(span).await;
        match &report {
            RunReport::Finished(outcome) => self.notify_outcome(outcome),
            RunReport::Aborted(err) => {
                warn!(error = %err, "run aborted");
                self.host.notifier.notify(Severity::Error, &err.to_string());
            }
        }
        report
    }

    async fn run_inner(&self, request: &RunRequest, cancel: &CancellationToken) -> RunReport {
        let plan = match self.plan(request) {
            Ok(plan) => plan,
            Err(err) => return RunReport::Aborted(err),
        };
        let root = plan.context.workspace_root.clone();

        let _lock = match RunLock::acquire(&root) {
            Ok(lock) => lock,
            Err(err) => return RunReport::Aborted(err),
        };

        // A blocking install cannot be interrupted; stop waiting for it instead.
        let executable = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("cancelled during cover-agent setup");
                return self.cancelled_before_launch();
            }
            result = self.ensure_tool(&plan.settings) => match result {
                Ok(path) => path,
                Err(err) => return RunReport::Aborted(err.into()),
            },
        };
        if cancel.is_cancelled() {
            return self.cancelled_before_launch();
        }

        if let Err(err) = ensure_test_dir(&root, &plan.invocation.test_file_path) {
            return RunReport::Aborted(err.into());
        }

        self.host.progress.report(&format!(
            "{} Generating tests for {} → {}",
            chrono::Local::now().format("%H:%M:%S"),
            plan.invocation.source_file_path,
            plan.invocation.test_file_path
        ));

        let spec = CommandSpec::new(executable, &root)
            .args(plan.invocation.args())
            .with_env_overrides(&plan.invocation.env_overrides());
        info!(
            source = %plan.invocation.source_file_path,
            test = %plan.invocation.test_file_path,
            model = %plan.invocation.model,
            "starting cover-agent"
        );

        let outcome = self
            .supervisor
            .run(&spec, Arc::clone(&self.host.sink), cancel)
            .await;
        RunReport::Finished(outcome)
    }

    /// The sink still gets its single `finished` call when no process ran.
    fn cancelled_before_launch(&self) -> RunReport {
        self.host.sink.finished(&Outcome::Cancelled);
        RunReport::Finished(Outcome::Cancelled)
    }

    async fn ensure_tool(&self, settings: &Settings) -> Result<PathBuf, BootstrapError> {
        let bootstrapper = self.bootstrapper(settings);
        let progress = Arc::clone(&self.host.progress);
        tokio::task::spawn_blocking(move || bootstrapper.ensure_executable(progress.as_ref()))
            .await
            .unwrap_or_else(|join_err| {
                Err(BootstrapError::Step {
                    step: "setup task",
                    detail: join_err.to_string(),
                })
            })
    }

    fn notify_outcome(&self, outcome: &Outcome) {
        let (severity, message) = match outcome {
            Outcome::Success => (
                Severity::Info,
                "Test generation completed successfully".to_string(),
            ),
            Outcome::Failure(FailureReason::ExitCode(code)) => (
                Severity::Error,
                format!("cover-agent failed with exit code {}. See the log for details.", code),
            ),
            Outcome::Failure(FailureReason::Terminated(reason)) => (
                Severity::Error,
                format!("cover-agent stopped unexpectedly: {}", reason),
            ),
            Outcome::Failure(FailureReason::Launch(reason)) => (
                Severity::Error,
                format!("Failed to launch cover-agent: {}", reason),
            ),
            Outcome::Cancelled => (Severity::Warning, "Test generation cancelled".to_string()),
        };
        self.host.notifier.notify(severity, &message);
    }
}

/// Create the directory that will hold the generated test file.
fn ensure_test_dir(workspace_root: &Path, test_file_path: &str) -> Result<PathBuf, FilesystemError> {
    let target = confine_to_workspace(workspace_root, test_file_path)?;
    let dir = target
        .absolute
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| workspace_root.to_path_buf());
    std::fs::create_dir_all(&dir).map_err(|source| FilesystemError::CreateDir {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}
