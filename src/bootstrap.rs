//! First-run installation of the cover-agent executable
//!
//! The tool lives in a private Python virtual environment under the install
//! root. When the executable is already there, nothing happens. Otherwise a
//! venv is created and the package is installed into it with pip. That slow
//! path is single-flight per install root, both inside this process and
//! across processes sharing the same root.

use crate::config::Settings;
use crate::error::BootstrapError;
use crate::host::ProgressReporter;
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, info, warn};

pub const ENV_DIR: &str = "cover_agent_env";
pub const TOOL_NAME: &str = "cover-agent";
const LOCK_FILE: &str = ".bootstrap.lock";

/// Platform-specific location of the tool inside a venv.
pub fn executable_path(env_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        env_dir.join("Scripts").join(format!("{}.exe", TOOL_NAME))
    } else {
        env_dir.join("bin").join(TOOL_NAME)
    }
}

fn env_python(env_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        env_dir.join("Scripts").join("python.exe")
    } else {
        env_dir.join("bin").join("python")
    }
}

/// One external command of the setup sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupStep {
    pub label: &'static str,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

/// Executes setup steps. Blocking; callers run it off the async runtime.
pub trait SetupRunner: Send + Sync {
    fn run(&self, step: &SetupStep) -> Result<(), String>;
}

/// Runs steps with `std::process::Command`, capturing their output.
#[derive(Debug, Default)]
pub struct CommandSetupRunner;

impl SetupRunner for CommandSetupRunner {
    fn run(&self, step: &SetupStep) -> Result<(), String> {
        let output = Command::new(&step.program)
            .args(&step.args)
            .current_dir(&step.cwd)
            .output()
            .map_err(|e| format!("failed to run {}: {}", step.program.display(), e))?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!(
            "{} exited with {}: {}",
            step.program.display(),
            output.status,
            stderr.lines().last().unwrap_or("unknown error")
        ))
    }
}

fn in_flight_roots() -> &'static Mutex<HashSet<PathBuf>> {
    static IN_FLIGHT: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    IN_FLIGHT.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Holds the in-process flag and the cross-process lock for one install root.
struct FlightGuard {
    root: PathBuf,
    lock: File,
}

impl FlightGuard {
    fn acquire(root: &Path) -> Result<Self, BootstrapError> {
        {
            let mut roots = in_flight_roots()
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !roots.insert(root.to_path_buf()) {
                return Err(BootstrapError::InProgress);
            }
        }

        let release_flag = || {
            in_flight_roots()
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(root);
        };

        let io_err = |source| BootstrapError::Io {
            path: root.to_path_buf(),
            source,
        };
        let lock = fs::create_dir_all(root)
            .and_then(|_| File::create(root.join(LOCK_FILE)))
            .map_err(|e| {
                release_flag();
                io_err(e)
            })?;
        if lock.try_lock_exclusive().is_err() {
            release_flag();
            return Err(BootstrapError::InProgress);
        }

        Ok(Self {
            root: root.to_path_buf(),
            lock,
        })
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let _ = self.lock.unlock();
        in_flight_roots()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.root);
    }
}

#[derive(Clone)]
pub struct Bootstrapper {
    install_root: PathBuf,
    python: String,
    package_spec: String,
    runner: Arc<dyn SetupRunner>,
}

impl std::fmt::Debug for Bootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrapper")
            .field("install_root", &self.install_root)
            .field("python", &self.python)
            .field("package_spec", &self.package_spec)
            .finish_non_exhaustive()
    }
}

impl Bootstrapper {
    pub fn new(
        install_root: impl Into<PathBuf>,
        python: impl Into<String>,
        package_spec: impl Into<String>,
    ) -> Self {
        Self {
            install_root: install_root.into(),
            python: python.into(),
            package_spec: package_spec.into(),
            runner: Arc::new(CommandSetupRunner),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.install_root.clone(),
            settings.python_path.clone(),
            settings.package_spec.clone(),
        )
    }

    pub fn with_runner(mut self, runner: Arc<dyn SetupRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn env_dir(&self) -> PathBuf {
        self.install_root.join(ENV_DIR)
    }

    pub fn executable(&self) -> PathBuf {
        executable_path(&self.env_dir())
    }

    /// Return the executable path, installing the tool first if it is absent.
    pub fn ensure_executable(
        &self,
        progress: &dyn ProgressReporter,
    ) -> Result<PathBuf, BootstrapError> {
        let executable = self.executable();
        if executable.is_file() {
            debug!(path = %executable.display(), "cover-agent already installed");
            return Ok(executable);
        }

        let _guard = FlightGuard::acquire(&self.install_root)?;
        // Another process may have finished while we waited for the lock.
        if executable.is_file() {
            return Ok(executable);
        }
        self.install(progress)
    }

    /// Remove the existing environment and install from scratch.
    pub fn reinstall(&self, progress: &dyn ProgressReporter) -> Result<PathBuf, BootstrapError> {
        let _guard = FlightGuard::acquire(&self.install_root)?;
        let env_dir = self.env_dir();
        if env_dir.exists() {
            progress.report("Removing previous cover-agent environment");
            fs::remove_dir_all(&env_dir).map_err(|source| BootstrapError::Io {
                path: env_dir.clone(),
                source,
            })?;
        }
        self.install(progress)
    }

    fn setup_steps(&self) -> Vec<SetupStep> {
        let env_dir = self.env_dir();
        vec![
            SetupStep {
                label: "create virtual environment",
                program: PathBuf::from(&self.python),
                args: vec![
                    "-m".to_string(),
                    "venv".to_string(),
                    env_dir.to_string_lossy().into_owned(),
                ],
                cwd: self.install_root.clone(),
            },
            SetupStep {
                label: "install cover-agent",
                program: env_python(&env_dir),
                args: vec![
                    "-m".to_string(),
                    "pip".to_string(),
                    "install".to_string(),
                    "--upgrade".to_string(),
                    self.package_spec.clone(),
                ],
                cwd: self.install_root.clone(),
            },
        ]
    }

    fn install(&self, progress: &dyn ProgressReporter) -> Result<PathBuf, BootstrapError> {
        info!(root = %self.install_root.display(), "setting up cover-agent environment");
        progress.report("Setting up cover-agent for first use (this may take a few minutes)");

        for step in self.setup_steps() {
            progress.report(&format!("Running: {}", step.label));
            self.runner.run(&step).map_err(|detail| {
                warn!(step = step.label, detail = %detail, "cover-agent setup step failed");
                BootstrapError::Step {
                    step: step.label,
                    detail,
                }
            })?;
        }

        let executable = self.executable();
        if !executable.is_file() {
            return Err(BootstrapError::ExecutableMissing(executable));
        }
        progress.report("cover-agent is ready");
        Ok(executable)
    }
}
